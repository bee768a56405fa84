// =============================================================================
// Hurricane Engine — Main Entry Point
// =============================================================================
//
// Reads newline-delimited JSON commands from stdin and writes one JSON reply
// per line to stdout.  Logs go to stderr so they never interleave with
// replies.  Calibration state is restored at start-up, snapshotted on an
// interval, and saved once more on Ctrl+C or end of input.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hurricane_engine::command::handle_line;
use hurricane_engine::types::Timeframe;
use hurricane_engine::{EngineConfig, EngineState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Hurricane Engine — Starting Up                    ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("HURRICANE_CONFIG").unwrap_or_else(|_| "engine_config.json".into());
    let mut config = EngineConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });

    if let Ok(path) = std::env::var("HURRICANE_SNAPSHOT") {
        config.snapshot_path = path;
    }
    if let Ok(list) = std::env::var("HURRICANE_TIMEFRAMES") {
        match Timeframe::parse_list(&list) {
            Ok(tfs) => config.timeframes = tfs,
            Err(e) => warn!(error = %e, "Ignoring HURRICANE_TIMEFRAMES"),
        }
    }
    let snapshot_path = PathBuf::from(&config.snapshot_path);
    let snapshot_interval = config.snapshot_interval_secs;

    // ── 2. Build engine & restore calibration ────────────────────────────
    let engine = Arc::new(EngineState::new(config));

    info!(
        timeframes = ?engine.config().timeframes,
        snapshot = %snapshot_path.display(),
        "Configured timeframes"
    );

    match engine.load_snapshot(&snapshot_path) {
        Ok(true) => info!("Calibration state restored from snapshot"),
        Ok(false) => info!("No snapshot found, trackers start warm-up"),
        Err(e) => warn!(error = %e, "Failed to restore snapshot, starting fresh"),
    }

    // ── 3. Periodic snapshot loop ────────────────────────────────────────
    if snapshot_interval > 0 {
        let snap_engine = engine.clone();
        let snap_path = snapshot_path.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(snapshot_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = snap_engine.save_snapshot(&snap_path) {
                    error!(error = %e, "Periodic snapshot failed");
                }
            }
        });
    }

    // ── 4. Command loop ──────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("Ready for commands on stdin. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(reply) = handle_line(&engine, &line) {
                            let mut out = reply.to_line();
                            out.push('\n');
                            stdout.write_all(out.as_bytes()).await?;
                            stdout.flush().await?;
                        }
                    }
                    Ok(None) => {
                        info!("End of input");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Shutdown signal received, stopping gracefully");
                break;
            }
        }
    }

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    if let Err(e) = engine.save_snapshot(&snapshot_path) {
        error!(error = %e, "Failed to save snapshot on shutdown");
    }

    info!("Hurricane Engine shut down complete.");
    Ok(())
}

