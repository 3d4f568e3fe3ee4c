use anyhow::anyhow;
use colored::Colorize;
use histograph::command_argument_builder;
use histograph::handlers::*;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const VERBOSE_FILTER: &str =
    "info,histograph=debug,histograph_client=debug,histograph_core=debug,histograph_tui=debug";

#[tokio::main]
async fn main() {
    let chosen_command = command_argument_builder().get_matches();
    let verbose = chosen_command.get_flag("verbose");

    let config = match load_settings(&chosen_command) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            std::process::exit(2);
        }
    };

    // A terminal UI owns the screen, so its logs go to a file
    let log_file = uses_terminal_ui(&chosen_command).then(|| config.log_path());
    if let Err(e) = init_logging(verbose, log_file) {
        eprintln!("{} Logging disabled: {:#}", "!".yellow().bold(), e);
    }

    let result = match chosen_command.subcommand() {
        Some(("sessions", args)) => handle_sessions(&config, args).await,
        Some(("session", args)) => handle_session(&config, args).await,
        Some(("network", args)) => handle_network(&config, args).await,
        Some(("extract", args)) => handle_extract(&config, args).await,
        Some(("stop", args)) => handle_stop(&config, args).await,
        Some(("explore", args)) => handle_explore(&config, args).await,
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> anyhow::Result<()> {
    let default = match (verbose, log_file.is_some()) {
        (true, _) => VERBOSE_FILTER,
        (false, true) => "info",
        (false, false) => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    }
    .map_err(|e| anyhow!("{}", e))
}
