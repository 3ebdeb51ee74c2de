use crate::common::commands;
use crate::common::config::Config;
use crate::common::logger::{self, StderrLogger};
use crate::common::observer::LogObserver;
use crate::net::listener;
use crate::proxy::Trampoline;
use clap::Parser;
use std::sync::Arc;

mod common;
mod net;
mod proxy;

const CONFIG_HELP: &str = r#"JSON config file to take the settings from

sample config.json:
{
    "host": "0.0.0.0",
    "port": 10883,
    "username": "username",
    "password": "password",
    "redirect_host": "127.0.0.1",
    "redirect_port": 443,
    "try_fork": false,
    "random_port": false,
    "commands": ["echo hello"]
}"#;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "SOCKS5 proxy that forwards everything else to a decoy backend",
    long_about = None
)]
struct Args {
    #[arg(short, long = "configfile", value_name = "FILE", default_value = "./config.json", long_help = CONFIG_HELP)]
    config: String,

    /// Shortcut for --log-level debug
    #[arg(short, long)]
    debug: bool,

    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    if args.debug {
        config.log.level = "debug".to_string();
    }

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = logger::setup_logger(config.log.clone()) {
        eprintln!("Failed to initialize logger: {}", e);
        if log::set_boxed_logger(Box::new(StderrLogger)).is_ok() {
            log::set_max_level(logger::parse_level(&config.log.level));
        }
    }

    log::info!("Starting with config: {:?}", config);

    let failed = commands::run_commands(&config.commands).await;
    if failed > 0 {
        log::warn!("{} pre-start command(s) failed", failed);
    }

    let listener = match listener::bind_with_retry(&config).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let trampoline = Trampoline::new(Arc::new(config), Arc::new(LogObserver));
    trampoline
        .run(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
}
