//! halbridge Daemon
//!
//! Runs MegaHAL as a subprocess and bridges it to a chat network. Chat
//! events arrive as NDJSON on stdin; replies leave as NDJSON on stdout.

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use halbridge_core::config::{self, Config};
use halbridge_core::CorrelationOrder;
use halbridge_daemon::bridge::{Bridge, BridgeError};
use halbridge_daemon::chat;
use halbridge_daemon::storage::Database;
use halbridge_daemon::subprocess::ProcessSupervisor;

#[derive(Parser, Debug)]
#[command(name = "halbridge-daemon")]
#[command(version, about = "halbridge daemon - MegaHAL chat bridge")]
struct Args {
    /// Config file, merged over the global settings
    #[arg(long, env = "HALBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the MegaHAL executable
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Directory holding the brain files
    #[arg(long)]
    brain_dir: Option<PathBuf>,

    /// The bot's nickname on the chat network
    #[arg(long)]
    nickname: Option<String>,

    /// Key-value store file path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// How replies are paired with pending requests.
    #[arg(long, value_parser = ["fifo", "lifo"])]
    correlation_order: Option<String>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "HALBRIDGE_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "HALBRIDGE_LOG_JSON")]
    log_json: bool,

    /// OpenTelemetry OTLP endpoint for traces and metrics export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "HALBRIDGE_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

impl Args {
    /// CLI flags take precedence over every config layer.
    fn apply(&self, config: &mut Config) {
        if let Some(executable) = &self.executable {
            config.subprocess.executable.clone_from(executable);
        }
        if let Some(dir) = &self.brain_dir {
            config.subprocess.working_directory = Some(dir.clone());
        }
        if let Some(nickname) = &self.nickname {
            config.bot.nickname.clone_from(nickname);
        }
        if let Some(path) = &self.db_path {
            config.database_path = Some(path.clone());
        }
        if let Some(order) = self
            .correlation_order
            .as_deref()
            .and_then(|order| order.parse::<CorrelationOrder>().ok())
        {
            config.correlation.order = order;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    #[cfg(feature = "metrics")]
    let metrics_endpoint = args.metrics_endpoint.as_deref();
    #[cfg(not(feature = "metrics"))]
    let metrics_endpoint: Option<&str> = None;

    // Hold the guard so the OTel pipeline stays alive for the process lifetime.
    let log_filter = format!("halbridge_daemon={0},halbridge_core={0}", args.log_level);
    #[allow(clippy::let_unit_value)]
    let metrics_guard = halbridge_core::tracing_init::init_tracing_with_metrics(
        &log_filter,
        args.log_json,
        metrics_endpoint,
    );

    let mut config = config::load_config(args.config.as_deref())?;
    args.apply(&mut config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        executable = %config.subprocess.executable.display(),
        nickname = %config.bot.nickname,
        "Starting halbridge-daemon"
    );

    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => config::default_database_path()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine data directory"))?,
    };
    info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).await?;

    // No retry: the bridge cannot work without the subprocess.
    let (supervisor, output_rx) = ProcessSupervisor::start(&config.subprocess)?;
    info!(pid = ?supervisor.pid(), "Subprocess started");

    let (chat_tx, chat_rx) = mpsc::channel(256);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    // A blocking-pool stdin read cannot be cancelled and would keep the
    // runtime alive after shutdown; the reader gets its own thread instead.
    chat::spawn_stdin_reader(chat_tx)?;
    let writer = tokio::spawn(chat::write_outbound(tokio::io::stdout(), outbound_rx));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal = shutdown_signal();
    tokio::spawn(async move {
        signal.await;
        let _ = shutdown_tx.send(true);
    });

    // Notify systemd that the daemon is ready (unix only). The `true`
    // parameter unsets $NOTIFY_SOCKET for child processes.
    #[cfg(unix)]
    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %e, "Failed to notify systemd");
    }

    let bridge = Bridge::new(&config, supervisor.handle(), db, outbound_tx).await;
    let result = bridge.run(chat_rx, output_rx, shutdown_rx).await;

    let outcome = match result {
        Ok(summary) => {
            info!(
                dispatched = summary.stats.dispatched,
                unsolicited = summary.stats.unsolicited,
                abandoned = summary.abandoned,
                checkpoints = summary.checkpoints,
                "Bridge stopped"
            );
            match supervisor.quit().await {
                Ok(status) => info!(?status, "Subprocess stopped"),
                Err(e) => warn!(error = %e, "Subprocess did not stop cleanly"),
            }
            Ok(())
        }
        Err(BridgeError::SubprocessExited) => {
            error!("Subprocess exited; no restart policy, shutting down");
            Err(anyhow::anyhow!(BridgeError::SubprocessExited))
        }
        Err(e) => Err(e.into()),
    };

    // The bridge dropped its sender; flush what is left.
    let _ = writer.await;

    #[cfg(feature = "metrics")]
    if let Some(guard) = metrics_guard
        && let Err(e) = guard.shutdown()
    {
        warn!(error = %e, "Failed to flush telemetry");
    }
    #[cfg(not(feature = "metrics"))]
    let () = metrics_guard;

    info!("Daemon stopped");
    outcome
}

/// Resolves on Ctrl+C or SIGTERM. The SIGTERM handler is installed before
/// this returns, so the signal cannot slip past an unpolled task.
fn shutdown_signal() -> impl Future<Output = ()> + Send {
    #[cfg(unix)]
    let sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .inspect_err(|e| warn!(error = %e, "Cannot listen for SIGTERM"))
        .ok();

    async move {
        #[cfg(unix)]
        if let Some(mut sigterm) = sigterm {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C shutdown signal"),
                _ = sigterm.recv() => info!("Received SIGTERM shutdown signal"),
            }
            return;
        }
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C shutdown signal");
    }
}
