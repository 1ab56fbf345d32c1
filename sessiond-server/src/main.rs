//! sessiond - terminal session daemon

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use sessiond_server::config::{env_truthy, parse_idle_timeout, DEFAULT_CONFIG_TOML};
use sessiond_server::{AppConfig, ConfigLoader, Server, SessionOptions};
use sessiond_utils::{init_logging_with_config, log_dir, record_dir, LogConfig, ProtocolLogger, Result};

/// Terminal session daemon
#[derive(Parser, Debug)]
#[command(name = "sessiond")]
#[command(about = "Keeps terminal sessions alive behind a Unix socket")]
#[command(version)]
struct Args {
    /// Socket path (overrides the config file)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Close sessions idle this long (`30m`, `90s`, `500ms`; `0` or `off` disables)
    #[arg(long)]
    idle_timeout: Option<String>,

    /// Directory for raw PTY captures
    #[arg(long, env = "SESSIOND_RECORD_DIR")]
    record_dir: Option<PathBuf>,

    /// Capture raw PTY output (`1`, `true`, `yes`, `on`)
    #[arg(
        long,
        env = "SESSIOND_RECORD_PTY",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    record_pty: Option<String>,

    /// Debug logging plus the protocol event log
    #[arg(short, long)]
    verbose: bool,

    /// Directory for the protocol event log
    #[arg(long)]
    protocol_log_dir: Option<PathBuf>,

    /// Config file (default: `$XDG_CONFIG_HOME/sessiond/config.toml`)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

/// Apply command-line overrides on top of the config file
fn resolve_options(args: &Args, config: &AppConfig) -> Result<SessionOptions> {
    let mut options = SessionOptions::from_config(config)?;

    if let Some(socket) = &args.socket {
        options.socket_path = socket.clone();
    }
    if let Some(idle) = &args.idle_timeout {
        options.idle_timeout = parse_idle_timeout(idle)?;
    }

    let record = config.record.enabled || args.record_pty.as_deref().is_some_and(env_truthy);
    options.record_dir = record.then(|| {
        args.record_dir
            .clone()
            .or_else(|| config.record.dir.clone())
            .unwrap_or_else(record_dir)
    });

    if args.verbose || config.logging.protocol_log {
        let dir = args
            .protocol_log_dir
            .clone()
            .or_else(|| config.logging.protocol_log_dir.clone())
            .unwrap_or_else(log_dir);
        match ProtocolLogger::open(&dir) {
            Ok(logger) => {
                info!(path = %logger.path().display(), "protocol log enabled");
                options.protocol_log = Some(Arc::new(logger));
            }
            Err(e) => warn!(error = %e, "protocol log unavailable"),
        }
    }

    Ok(options)
}

/// Resolve on SIGINT or SIGTERM
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.print_config {
        print!("{}", DEFAULT_CONFIG_TOML);
        return Ok(());
    }

    init_logging_with_config(LogConfig::daemon(args.verbose))?;

    let config = ConfigLoader::load_and_validate(args.config.as_deref())?;
    let options = resolve_options(&args, &config)?;
    info!(
        socket = %options.socket_path.display(),
        idle_timeout = ?options.idle_timeout,
        recording = options.record_dir.is_some(),
        "sessiond starting"
    );

    let server = Server::new(options);
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => {
                info!(signal = name, "signal received, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!(error = %e, "signal handler unavailable"),
        }
    });

    server.run().await
}
