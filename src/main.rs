//! R0N Forward binary entry point.
//!
//! Loads the JSON rule file, binds every active rule, and runs until an
//! interrupt or terminate signal triggers graceful shutdown.
//!
//! ```bash
//! # Run with the default configuration file
//! r0n-forward
//!
//! # Run with an explicit configuration file
//! r0n-forward -c /etc/r0n-forward/config.json
//!
//! # Validate the configuration and exit
//! r0n-forward -c config.json --check
//! ```

use std::path::PathBuf;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use r0n_forward::config::ConfigLoader;
use r0n_forward::gateway::Gateway;

/// Command-line arguments.
struct Args {
    /// Configuration file path.
    config_path: PathBuf,
    /// Validate the configuration and exit.
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("config.json");
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                },
                "--check" => {
                    check_config = true;
                },
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                },
                "-v" | "--version" => {
                    println!("r0n-forward v{}", env!("CARGO_PKG_VERSION"));
                    std::process::exit(0);
                },
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                },
            }
        }

        Self {
            config_path,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"r0n-forward v{}

Multi-rule layer-4 TCP/UDP forwarding proxy.

USAGE:
    r0n-forward [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Configuration file [default: config.json]
        --check            Validate the configuration and exit
    -h, --help             Print help
    -v, --version          Print version"#,
        env!("CARGO_PKG_VERSION")
    );
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match ConfigLoader::new().load(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config_path.display(), error = %e, "Failed to load configuration");
            std::process::exit(2);
        },
    };

    if args.check_config {
        let mut invalid = 0usize;
        for rule in &config.forward {
            if let Err(e) = rule.mappings() {
                error!(rule = rule.id, error = %e, "Invalid rule");
                invalid += 1;
            }
        }
        if invalid > 0 {
            error!(invalid, total = config.forward.len(), "Configuration check failed");
            std::process::exit(1);
        }
        info!(rules = config.forward.len(), "Configuration is valid");
        return;
    }

    info!(
        path = %args.config_path.display(),
        rules = config.forward.len(),
        "Configuration loaded"
    );

    let gateway = Gateway::start(&config).await;
    if gateway.forwarder_count() == 0 {
        warn!("No forwarders are running");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, shutting down");
        }
        _ = wait_for_terminate() => {
            info!("Received terminate, shutting down");
        }
    }

    gateway.shutdown().await;
}

/// Wait for the OS terminate signal.
#[cfg(unix)]
async fn wait_for_terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install signal handler");
    terminate.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_terminate() {
    std::future::pending::<()>().await;
}
