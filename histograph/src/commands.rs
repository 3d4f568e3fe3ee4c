use crate::CLAP_STYLING;
use clap::{arg, command};
use histograph_client::types::DEFAULT_SEED_URL;
use url::Url;

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("histograph")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("histograph")
        .about("Explore and grow event/person extraction graphs")
        .styles(CLAP_STYLING)
        .arg(arg!(-v --"verbose" "Enable debug logging (RUST_LOG overrides)").global(true))
        .arg(
            arg!(-c --"config" <PATH>)
                .required(false)
                .global(true)
                .help("Configuration file [default: ~/.config/histograph/config.toml]"),
        )
        .arg(
            arg!(--"backend-url" <URL>)
                .required(false)
                .global(true)
                .help("Base URL of the extraction backend API")
                .value_parser(clap::value_parser!(Url)),
        )
        .arg(
            arg!(--"timeout" <SECS>)
                .required(false)
                .global(true)
                .help("Per-request timeout in seconds")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            command!("sessions")
                .about("List extraction sessions, newest first")
                .arg(
                    arg!(-d --"details")
                        .required(false)
                        .help("Also fetch the per-degree summary of every session"),
                ),
        )
        .subcommand(
            command!("session")
                .about("Show one session with its per-degree node counts")
                .arg(
                    arg!(<ID>)
                        .help("Session id")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            command!("network")
                .about("Load a session network and print node and connection counts")
                .arg(
                    arg!(<ID>)
                        .help("Session id")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            command!("extract")
                .about("Start a new extraction and follow its progress")
                .arg(
                    arg!(-s --"seed-url" <URL>)
                        .required(false)
                        .help("Article the extraction starts from")
                        .value_parser(clap::value_parser!(Url))
                        .default_value(DEFAULT_SEED_URL),
                )
                .arg(
                    arg!(-d --"max-degree" <N>)
                        .required(false)
                        .help("How many hops away from the seed to extract (1-10)")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("3"),
                )
                .arg(
                    arg!(-o --"output-type" <TYPE>)
                        .required(false)
                        .help("Backend output format")
                        .value_parser(["sql", "csv"])
                        .default_value("sql"),
                )
                .arg(
                    arg!(-m --"monitor")
                        .required(false)
                        .help("Follow the run in the terminal monitor instead of a spinner"),
                ),
        )
        .subcommand(
            command!("stop").about("Stop a running extraction").arg(
                arg!(<ID>)
                    .help("Session id")
                    .value_parser(clap::value_parser!(u64)),
            ),
        )
        .subcommand(
            command!("explore")
                .about("Open the interactive network explorer")
                .arg(
                    arg!(-s --"session" <ID>)
                        .required(false)
                        .help("Session to open first [default: newest]")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
}
