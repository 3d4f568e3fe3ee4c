use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use futures::future::join_all;
use histograph_client::{Backend, ExtractionConfig, HttpBackend, NodeType, OutputType, SessionId};
use histograph_core::directory::{self, DirectoryStats, SessionDirectory};
use histograph_core::launcher::{self, ExtractionLauncher, ExtractionRun, LaunchEvent, RunOutcome};
use histograph_core::{Config, GraphModel, Snapshot};
use histograph_tui::{run_explorer, run_monitor};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

// ============================================================================
// Settings
// ============================================================================

/// Load the layered configuration and apply command-line overrides on top.
pub fn load_settings(matches: &ArgMatches) -> Result<Config> {
    let path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = Config::load(path)?;
    apply_overrides(&mut config, matches);
    debug!("Resolved configuration: {:?}", config);
    Ok(config)
}

/// CLI flags win over the file and the environment.
pub fn apply_overrides(config: &mut Config, matches: &ArgMatches) {
    if let Some(url) = matches.get_one::<Url>("backend-url") {
        config.backend_url = url.as_str().to_string();
    }
    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.timeout_secs = *timeout;
    }
}

/// Whether the chosen subcommand takes over the terminal.
pub fn uses_terminal_ui(matches: &ArgMatches) -> bool {
    match matches.subcommand() {
        Some(("explore", _)) => true,
        Some(("extract", args)) => args.get_flag("monitor"),
        _ => false,
    }
}

/// Build and validate the extraction request from `extract` arguments.
pub fn build_extraction_config(args: &ArgMatches) -> Result<ExtractionConfig> {
    let seed_url = args
        .get_one::<Url>("seed-url")
        .ok_or_else(|| anyhow!("--seed-url is required"))?;
    let max_degree = *args.get_one::<u32>("max-degree").unwrap_or(&3);
    let output_type = args
        .get_one::<String>("output-type")
        .map(|raw| raw.parse::<OutputType>())
        .transpose()
        .map_err(|e| anyhow!(e))?
        .unwrap_or(OutputType::Sql);

    let config = ExtractionConfig {
        output_type,
        seed_url: seed_url.as_str().to_string(),
        max_degree,
    };
    launcher::validate(&config)?;
    Ok(config)
}

fn connect(config: &Config) -> Result<Arc<HttpBackend>> {
    let backend = HttpBackend::with_timeout(&config.backend_url, config.timeout_secs)
        .with_context(|| format!("Invalid backend URL '{}'", config.backend_url))?;
    Ok(Arc::new(backend))
}

fn spinner(message: impl Into<String>) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message.into());
    Ok(spinner)
}

fn rule() -> String {
    "═".repeat(60).bright_blue().bold().to_string()
}

// ============================================================================
// Sessions
// ============================================================================

pub async fn handle_sessions(config: &Config, args: &ArgMatches) -> Result<()> {
    let directory = SessionDirectory::new(connect(config)?);

    let progress = spinner("Fetching sessions...")?;
    let listed = directory.list().await;
    progress.finish_and_clear();
    let sessions = listed.context("Failed to list sessions")?;

    if sessions.is_empty() {
        println!(
            "{} No extraction sessions yet. Start one with {}",
            "ℹ".blue().bold(),
            "histograph extract".cyan()
        );
        return Ok(());
    }

    print!("{}", directory::sessions_table(&sessions));
    println!();
    println!("{}", directory::stats_report(&DirectoryStats::from_sessions(&sessions)));

    if args.get_flag("details") {
        let summaries = join_all(sessions.iter().map(|s| directory.summary(s.id))).await;
        for (session, summary) in sessions.iter().zip(summaries) {
            println!();
            match summary {
                Ok(summary) => print!("{}", directory::summary_report(&summary)),
                Err(e) => println!("{} Session {}: {}", "✗".red().bold(), session.id, e),
            }
        }
    }
    Ok(())
}

pub async fn handle_session(config: &Config, args: &ArgMatches) -> Result<()> {
    let id = session_arg(args)?;
    let directory = SessionDirectory::new(connect(config)?);
    let summary = directory
        .summary(id)
        .await
        .with_context(|| format!("Failed to load session {}", id))?;
    print!("{}", directory::summary_report(&summary));
    Ok(())
}

fn session_arg(args: &ArgMatches) -> Result<SessionId> {
    args.get_one::<u64>("ID")
        .map(|id| SessionId(*id))
        .ok_or_else(|| anyhow!("a session id is required"))
}

// ============================================================================
// Network
// ============================================================================

/// Node counts per degree as `(events, people)`.
pub fn degree_breakdown(snapshot: &Snapshot) -> BTreeMap<u32, (usize, usize)> {
    let mut breakdown: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
    for node in snapshot.nodes() {
        let entry = breakdown.entry(node.degree).or_default();
        match node.node_type {
            NodeType::Event => entry.0 += 1,
            NodeType::Person => entry.1 += 1,
        }
    }
    breakdown
}

pub async fn handle_network(config: &Config, args: &ArgMatches) -> Result<()> {
    let id = session_arg(args)?;
    let model = GraphModel::new(connect(config)?);

    let progress = spinner(format!("Loading network for session {}...", id))?;
    let loaded = model.load(id).await;
    progress.finish_and_clear();
    let snapshot = loaded.with_context(|| format!("Failed to load network for session {}", id))?;

    let stats = snapshot.stats();
    println!("{}", rule());
    println!("{}", format!("  Network of session {}", id).bright_white().bold());
    println!("{}", rule());
    println!("  {:<14} {}", "Nodes:", stats.nodes.to_string().bold());
    println!("  {:<14} {}", "Events:", stats.events.to_string().red());
    println!("  {:<14} {}", "People:", stats.people.to_string().cyan());
    println!("  {:<14} {}", "Connections:", stats.connections.to_string().bold());

    let breakdown = degree_breakdown(&snapshot);
    if !breakdown.is_empty() {
        println!();
        println!("{}", format!("  {:<8} {:>8} {:>8}", "Degree", "Events", "People").bold());
        for (degree, (events, people)) in breakdown {
            println!("  {:<8} {:>8} {:>8}", degree, events, people);
        }
    }
    Ok(())
}

// ============================================================================
// Extraction
// ============================================================================

pub async fn handle_extract(config: &Config, args: &ArgMatches) -> Result<()> {
    let extraction = build_extraction_config(args)?;
    let seed_url = extraction.seed_url.clone();
    info!(
        "Starting {} extraction from {} (max degree {})",
        extraction.output_type, seed_url, extraction.max_degree
    );

    let launcher = ExtractionLauncher::with_interval(connect(config)?, config.poll_interval());
    let run = launcher
        .start(extraction)
        .await
        .context("Failed to start extraction")?;
    let session = run.session();

    if args.get_flag("monitor") {
        return match run_monitor(run, &seed_url).await? {
            Some(outcome) => report_outcome(session, &outcome),
            None => {
                println!(
                    "{} Detached from session {}; it keeps running. Check it with {}",
                    "ℹ".blue().bold(),
                    session,
                    format!("histograph session {}", session).cyan()
                );
                Ok(())
            }
        };
    }

    println!("{} Started extraction session {}", "✓".green().bold(), session);
    let outcome = follow_with_spinner(run).await?;
    report_outcome(session, &outcome)
}

enum Step {
    Interrupted(std::io::Result<()>),
    Event(Option<LaunchEvent>),
}

/// Follow a run on a spinner until it finishes. Ctrl+C stops the run.
async fn follow_with_spinner<B: Backend>(mut run: ExtractionRun<B>) -> Result<RunOutcome> {
    let session = run.session();
    let progress = spinner(format!("Session {}: waiting for the first status...", session))?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let step = tokio::select! {
            result = &mut ctrl_c => Step::Interrupted(result),
            event = run.next_event() => Step::Event(event),
        };

        match step {
            Step::Interrupted(result) => {
                result.context("Failed to listen for Ctrl+C")?;
                progress.set_message(format!("Stopping session {}...", session));
                let stopped = run.stop().await;
                progress.finish_and_clear();
                return Ok(stopped?);
            }
            Step::Event(Some(LaunchEvent::Progress { progress: pct, status })) => {
                progress.set_message(format!("Session {}: {}% ({})", session, pct, status));
            }
            Step::Event(Some(LaunchEvent::StatusCheckFailed(e))) => {
                progress.println(format!("{} Status check failed: {}", "!".yellow().bold(), e));
            }
            Step::Event(Some(LaunchEvent::Finished(outcome))) => {
                progress.finish_and_clear();
                return Ok(outcome);
            }
            Step::Event(Some(LaunchEvent::Started(_))) => {}
            Step::Event(None) => break,
        }
    }

    progress.finish_and_clear();
    Ok(run.wait().await?)
}

fn report_outcome(session: SessionId, outcome: &RunOutcome) -> Result<()> {
    match outcome {
        RunOutcome::Completed => {
            println!("{} Extraction session {} completed", "✓".green().bold(), session);
            println!(
                "  Explore it with {}",
                format!("histograph explore --session {}", session).cyan()
            );
            Ok(())
        }
        RunOutcome::Stopped => {
            println!("{} Extraction session {} stopped", "■".yellow().bold(), session);
            Ok(())
        }
        RunOutcome::Failed(Some(reason)) => {
            bail!("Extraction session {} failed: {}", session, reason)
        }
        RunOutcome::Failed(None) => bail!("Extraction session {} failed", session),
    }
}

pub async fn handle_stop(config: &Config, args: &ArgMatches) -> Result<()> {
    let id = session_arg(args)?;
    let backend = connect(config)?;
    backend
        .stop_extraction(id)
        .await
        .with_context(|| format!("Failed to stop session {}", id))?;
    println!("{} Stop requested for session {}", "✓".green().bold(), id);
    Ok(())
}

// ============================================================================
// Explorer
// ============================================================================

pub async fn handle_explore(config: &Config, args: &ArgMatches) -> Result<()> {
    let initial = args.get_one::<u64>("session").map(|id| SessionId(*id));
    run_explorer(connect(config)?, initial).await
}
