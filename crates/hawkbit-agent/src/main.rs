//! `rauc-hawkbit-agent`: CLI entry point and composition root.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use hawkbit_core::config::ConfigError;
use hawkbit_core::{ActiveAction, Config, LogLevel};
use hawkbit_http::HttpClient;
use hawkbit_runtime::{service, Coordinator};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Device-side hawkBit DDI agent driving a RAUC update executor.
#[derive(Parser, Debug)]
#[command(name = "rauc-hawkbit-agent", disable_version_flag = true)]
struct Cli {
    /// Path to the INI configuration file.
    #[arg(short = 'c', long = "config-file")]
    config_file: Option<PathBuf>,

    /// Print the agent version and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Force debug-level logging, overriding the configured log level.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Run a single poll cycle then exit (0 on full success, 1 otherwise).
    #[arg(short = 'r', long = "run-once")]
    run_once: bool,

    /// Emit logs in a journald-friendly format (no embedded timestamps).
    #[arg(short = 's', long = "output-systemd")]
    output_systemd: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(1);
        }
    };

    if cli.version {
        println!("rauc-hawkbit-agent {VERSION}");
        return ExitCode::SUCCESS;
    }

    let Some(config_path) = cli.config_file.clone() else {
        eprintln!("error: --config-file is required");
        return ExitCode::from(2);
    };

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(ConfigError::NotFound(path)) => {
            eprintln!("config file not found: {}", path.display());
            return ExitCode::from(3);
        }
        Err(err) => {
            eprintln!("config file invalid: {err}");
            return ExitCode::from(4);
        }
    };

    init_logging(&config, cli.debug, cli.output_systemd);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    let success = runtime.block_on(run(config, cli.run_once));

    if cli.run_once && !success {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

async fn run(config: Config, run_once: bool) -> bool {
    let config = Arc::new(config);

    let client = match HttpClient::new(&config) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            tracing::error!(%err, "failed to build HTTP client");
            return false;
        }
    };

    let active = Arc::new(ActiveAction::new());
    let coordinator = Arc::new(Coordinator::new(
        config.clone(),
        client.clone(),
        active,
        run_once,
    ));

    service::serve(config, client, coordinator, run_once).await
}


fn init_logging(config: &Config, debug_override: bool, output_systemd: bool) {
    let level = if debug_override {
        LogLevel::Debug
    } else {
        config.log_level
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_tracing_filter()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if output_systemd {
        subscriber.without_time().init();
    } else {
        subscriber.init();
    }
}
