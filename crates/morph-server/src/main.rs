use clap::{value_parser, Arg, ArgAction, Command};
use morph_engine::{Orchestrator, SimulatedAdapter, SimulatedTelemetry};
use morph_server::simulate::{self, SimulationConfig};
use morph_server::{http, logging, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn cli() -> Command {
    Command::new("morph")
        .version(morph_engine::VERSION)
        .about("Live topology transformation orchestrator")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("serve")
                .about("Serve the HTTP API over the in-memory simulator")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                )
                .arg(
                    Arg::new("addr")
                        .long("addr")
                        .value_parser(value_parser!(SocketAddr))
                        .help("Listen address, overrides the config file"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Seed for simulated telemetry"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the scripted scenarios and report")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("window-ms")
                        .long("window-ms")
                        .default_value("50")
                        .value_parser(value_parser!(u64))
                        .help("Health sampling window in milliseconds"),
                ),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    logging::init(matches.get_flag("log-json"))?;

    match matches.subcommand() {
        Some(("serve", args)) => {
            let mut config = match args.get_one::<PathBuf>("config") {
                Some(path) => ServerConfig::load(path)?,
                None => ServerConfig::default(),
            };
            if let Some(addr) = args.get_one::<SocketAddr>("addr") {
                config.server.addr = *addr;
            }
            let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);

            let topology = if config.topology.services.is_empty() {
                warn!("no topology configured, starting from the demo topology");
                simulate::demo_topology()
            } else {
                config.topology.to_snapshot()?
            };
            let orchestrator = Arc::new(Orchestrator::new(
                config.orchestrator,
                topology,
                Arc::new(SimulatedAdapter::new()),
                Arc::new(SimulatedTelemetry::new(seed)),
            )?);

            let shutdown = async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                }
            };
            http::serve(orchestrator, config.server.addr, shutdown).await
        }
        Some(("simulate", args)) => {
            let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);
            let window = args.get_one::<u64>("window-ms").copied().unwrap_or(50);

            let report = simulate::run(SimulationConfig {
                seed,
                window: Duration::from_millis(window),
            })
            .await?;
            println!("{}", report.generate_text());
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn serve_accepts_address_override() {
        let matches = cli()
            .try_get_matches_from(["morph", "serve", "--addr", "0.0.0.0:9999", "--log-json"])
            .unwrap();
        assert!(matches.get_flag("log-json"));
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(
            args.get_one::<SocketAddr>("addr").unwrap().port(),
            9999
        );
    }
}
