mod app;
mod chat;
mod config;
mod handler;
mod supervisor;

use std::path::PathBuf;

use clap::{arg, Command};
use config::Config;
use tokio::sync::watch;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

fn cli() -> Command {
    Command::new("ops-server")
        .about("Operations plane for game servers exposing only RCON and log files.")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("run").arg(arg!([config] "Path to the TOML config file")))
        .subcommand(Command::new("validate-config").arg(arg!([config] "Path to the TOML config file"))
        )
}

fn init_logging() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", "market-audit.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    let audit_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(filter_fn(|metadata| metadata.target().contains("marketplace")));

    tracing_subscriber::registry().with(stdout_layer).with(audit_layer).init();
    guard
}

async fn load_and_validate(path: &PathBuf) -> Config {
    let config = match Config::from_path(path).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("config error: {e}");
        std::process::exit(1);
    }
    config
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("validate-config", sub)) => {
            let path = sub.get_one::<String>("config").map(PathBuf::from).unwrap_or_else(|| "config.toml".into());
            load_and_validate(&path).await;
            println!("config is valid");
        }
        Some(("run", sub)) => {
            let _guard = init_logging();
            let path = sub.get_one::<String>("config").map(PathBuf::from).unwrap_or_else(|| "config.toml".into());
            let config = load_and_validate(&path).await;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
                let _ = shutdown_tx.send(true);
            });

            if let Err(e) = app::run(config, shutdown_rx).await {
                eprintln!("fatal error: {e}");
                std::process::exit(1);
            }
        }
        _ => unreachable!(),
    }
}
