use crate::error::{ClientError, Result};
use crate::types::{
    ExtractionConfig, ExtractionStarted, NetworkData, NodeId, Session, SessionId, SessionSummary,
    StatusReport,
};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000/api";

/// Request/response contract of the extraction backend.
///
/// The graph model and the extraction launcher only talk to the backend
/// through this trait, so tests can substitute an in-memory implementation.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /sessions`
    async fn sessions(&self) -> Result<Vec<Session>>;

    /// `GET /sessions/{id}`
    async fn session_summary(&self, session: SessionId) -> Result<SessionSummary>;

    /// `GET /sessions/{id}/network`
    async fn network(&self, session: SessionId) -> Result<NetworkData>;

    /// `POST /sessions/{id}/nodes/{node}/expand`
    async fn expand_node(&self, session: SessionId, node: &NodeId) -> Result<NetworkData>;

    /// `POST /extract`
    async fn start_extraction(&self, config: &ExtractionConfig) -> Result<ExtractionStarted>;

    /// `POST /extract/{id}/stop`
    async fn stop_extraction(&self, session: SessionId) -> Result<()>;

    /// `GET /extract/{id}/status`
    async fn extraction_status(&self, session: SessionId) -> Result<StatusReport>;
}

/// JSON-over-HTTP implementation of [`Backend`].
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, 10)
    }

    pub fn with_timeout(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .user_agent(concat!("Histograph/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL. Segments are percent-encoded, so
    /// node ids containing `/` or spaces stay a single segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        Self::decode(url, response).await
    }

    async fn post_json<B, T>(&self, url: Url, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        debug!("POST {}", url);
        let mut request = self.client.post(url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::decode(url, response).await
    }

    async fn decode<T: DeserializeOwned>(url: Url, response: Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|source| ClientError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn sessions(&self) -> Result<Vec<Session>> {
        self.get_json(self.endpoint(&["sessions"])?).await
    }

    async fn session_summary(&self, session: SessionId) -> Result<SessionSummary> {
        let id = session.to_string();
        self.get_json(self.endpoint(&["sessions", id.as_str()])?).await
    }

    async fn network(&self, session: SessionId) -> Result<NetworkData> {
        let id = session.to_string();
        self.get_json(self.endpoint(&["sessions", id.as_str(), "network"])?)
            .await
    }

    async fn expand_node(&self, session: SessionId, node: &NodeId) -> Result<NetworkData> {
        let id = session.to_string();
        let url = self.endpoint(&["sessions", id.as_str(), "nodes", node.as_str(), "expand"])?;
        self.post_json::<(), _>(url, None).await
    }

    async fn start_extraction(&self, config: &ExtractionConfig) -> Result<ExtractionStarted> {
        self.post_json(self.endpoint(&["extract"])?, Some(config))
            .await
    }

    async fn stop_extraction(&self, session: SessionId) -> Result<()> {
        let id = session.to_string();
        let url = self.endpoint(&["extract", id.as_str(), "stop"])?;
        debug!("POST {}", url);
        let response = self.client.post(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn extraction_status(&self, session: SessionId) -> Result<StatusReport> {
        let id = session.to_string();
        self.get_json(self.endpoint(&["extract", id.as_str(), "status"])?)
            .await
    }
}
