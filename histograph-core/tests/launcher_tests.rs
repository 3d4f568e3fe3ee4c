// Extraction launcher and session directory against an HTTP backend

use histograph_client::{ExtractionConfig, HttpBackend, OutputType, SessionId, SessionStatus};
use histograph_core::directory::{DirectoryStats, SessionDirectory};
use histograph_core::launcher::{ExtractionLauncher, LaunchError, RunOutcome};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, method, path},
};

const POLL: Duration = Duration::from_millis(40);

fn backend(server: &MockServer) -> Arc<HttpBackend> {
    Arc::new(HttpBackend::new(&format!("{}/api", server.uri())).unwrap())
}

async fn mount_start(server: &MockServer, session: u64) {
    Mock::given(method("POST"))
        .and(path("/api/extract"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": session})))
        .mount(server)
        .await;
}

async fn mount_status_once(server: &MockServer, session: u64, status: &str, progress: u8) {
    Mock::given(method("GET"))
        .and(path(format!("/api/extract/{}/status", session)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": status, "progress": progress})),
        )
        .up_to_n_times(1)
        .mount(server)
        .await;
}

async fn status_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().ends_with("/status"))
        .count()
}

// ============================================================================
// Launcher
// ============================================================================

#[tokio::test]
async fn test_polling_runs_until_completed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/extract"))
        .and(body_json(json!({
            "output_type": "sql",
            "seed_url": "https://en.wikipedia.org/wiki/Korean_War",
            "max_degree": 3
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": 12})))
        .expect(1)
        .mount(&server)
        .await;
    mount_status_once(&server, 12, "running", 10).await;
    mount_status_once(&server, 12, "running", 55).await;
    mount_status_once(&server, 12, "completed", 100).await;

    let launcher = ExtractionLauncher::with_interval(backend(&server), POLL);
    let mut run = launcher.start(ExtractionConfig::default()).await.unwrap();
    assert_eq!(run.session(), SessionId(12));
    assert_eq!(run.wait().await.unwrap(), RunOutcome::Completed);

    tokio::time::sleep(POLL * 4).await;
    assert_eq!(status_requests(&server).await, 3);
    assert_eq!(
        run.log(),
        &[
            "Started extraction session 12",
            "Progress: 10% - running",
            "Progress: 55% - running",
            "Progress: 100% - completed",
            "Extraction completed",
        ]
    );
}

#[tokio::test]
async fn test_invalid_config_sends_nothing() {
    let server = MockServer::start().await;
    mount_start(&server, 1).await;
    let launcher = ExtractionLauncher::with_interval(backend(&server), POLL);

    for max_degree in [0, 11] {
        let config = ExtractionConfig {
            max_degree,
            ..ExtractionConfig::default()
        };
        assert!(matches!(
            launcher.start(config).await,
            Err(LaunchError::Validation(_))
        ));
    }

    let config = ExtractionConfig {
        output_type: OutputType::Csv,
        seed_url: String::new(),
        max_degree: 2,
    };
    assert!(launcher.start(config).await.is_err());

    let received = server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_rejected_submission_is_a_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/extract"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "bad seed"})))
        .mount(&server)
        .await;

    let launcher = ExtractionLauncher::with_interval(backend(&server), POLL);
    let err = launcher.start(ExtractionConfig::default()).await.err().unwrap();
    assert!(matches!(err, LaunchError::Backend(_)));
    assert_eq!(status_requests(&server).await, 0);
}

#[tokio::test]
async fn test_stop_halts_polling_and_notifies_backend() {
    let server = MockServer::start().await;
    mount_start(&server, 8).await;
    Mock::given(method("GET"))
        .and(path("/api/extract/8/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running", "progress": 30})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/extract/8/stop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Extraction stopped"})))
        .expect(1)
        .mount(&server)
        .await;

    let launcher = ExtractionLauncher::with_interval(backend(&server), POLL);
    let mut run = launcher.start(ExtractionConfig::default()).await.unwrap();
    run.next_event().await.unwrap();
    run.next_event().await.unwrap();

    assert_eq!(run.stop().await.unwrap(), RunOutcome::Stopped);
    let polled = status_requests(&server).await;

    tokio::time::sleep(POLL * 5).await;
    assert_eq!(status_requests(&server).await, polled);
    assert_eq!(run.log().last().unwrap(), "Extraction stopped by user");
    server.verify().await;
}

#[tokio::test]
async fn test_unknown_status_is_logged_and_polling_continues() {
    let server = MockServer::start().await;
    mount_start(&server, 3).await;
    Mock::given(method("GET"))
        .and(path("/api/extract/3/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "unknown"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_status_once(&server, 3, "completed", 100).await;

    let launcher = ExtractionLauncher::with_interval(backend(&server), POLL);
    let mut run = launcher.start(ExtractionConfig::default()).await.unwrap();
    assert_eq!(run.wait().await.unwrap(), RunOutcome::Completed);
    assert!(run.log()[1].starts_with("Status check failed"));
}

// ============================================================================
// Session directory
// ============================================================================

#[tokio::test]
async fn test_directory_lists_newest_first() {
    let server = MockServer::start().await;
    let session = |id: u64, status: &str, nodes: u64| {
        json!({
            "id": id,
            "session_name": format!("Extraction {}", id),
            "seed_url": "https://en.wikipedia.org/wiki/Korean_War",
            "max_degree": 3,
            "total_nodes": nodes,
            "status": status,
            "created_at": "2024-01-01T10:00:00"
        })
    };
    Mock::given(method("GET"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            session(1, "completed", 40),
            session(3, "running", 2),
            session(2, "failed", 0)
        ])))
        .mount(&server)
        .await;

    let directory = SessionDirectory::new(backend(&server));
    let sessions = directory.list().await.unwrap();
    let ids: Vec<u64> = sessions.iter().map(|s| s.id.0).collect();
    assert_eq!(ids, vec![3, 2, 1]);
    assert_eq!(sessions[0].status, SessionStatus::Running);

    let stats = DirectoryStats::from_sessions(&sessions);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.total_nodes, 42);
}

#[tokio::test]
async fn test_directory_summary_reads_degree_counts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sessions/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session": {
                "id": 5,
                "session_name": "Korean War",
                "seed_url": "https://en.wikipedia.org/wiki/Korean_War",
                "max_degree": 2,
                "total_nodes": 14,
                "status": "completed",
                "started_at": "2024-01-01T10:00:00",
                "completed_at": "2024-01-01T10:05:00",
                "created_at": "2024-01-01T10:00:00"
            },
            "degree_counts": {
                "0": {"Event": 1},
                "1": {"Event": 2, "Person": 6},
                "2": {"Event": 3, "Person": 2}
            }
        })))
        .mount(&server)
        .await;

    let directory = SessionDirectory::new(backend(&server));
    let summary = directory.summary(SessionId(5)).await.unwrap();
    assert_eq!(summary.degree_counts.len(), 3);
    assert_eq!(summary.degree_counts[&0].people, 0);
    assert_eq!(summary.degree_counts[&1].people, 6);
}
