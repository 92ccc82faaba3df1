use anyhow::Result;
use dotenvy::dotenv;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info};
use trademirror::client::BridgeClient;
use trademirror::config::Config;
use trademirror::copier::ReplicationEngine;
use trademirror::gateway::TerminalGateway;
use trademirror::runner::{event_channel, run_executor, run_watcher, ReconnectPolicy};
use trademirror::tracker::PositionTracker;

/// How long a worker gets to finish after the stop flag is set.
const JOIN_WINDOW: Duration = Duration::from_secs(10);

/// Executor dequeue timeout; on expiry the loop just polls the stop flag.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cfg = Config::from_env()?;
    info!(
        "Master: {} (Login: {}, Server: {})",
        cfg.master.label, cfg.master.login, cfg.master.server
    );
    info!(
        "Slave:  {} (Login: {}, Server: {})",
        cfg.slave.label, cfg.slave.login, cfg.slave.server
    );

    let master: Arc<dyn TerminalGateway> = Arc::new(BridgeClient::new(
        cfg.master_api_base.clone(),
        cfg.master.clone(),
    ));
    let slave: Arc<dyn TerminalGateway> = Arc::new(BridgeClient::new(
        cfg.slave_api_base.clone(),
        cfg.slave.clone(),
    ));

    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = event_channel();

    let tracker = PositionTracker::new(&cfg.map_file);
    let engine = ReplicationEngine::new(slave.clone(), tracker, cfg.max_slippage_points);

    let watcher = tokio::spawn(run_watcher(
        master,
        tx,
        stop.clone(),
        Duration::from_millis(cfg.poll_interval_ms),
        ReconnectPolicy::default(),
    ));
    let executor = tokio::spawn(run_executor(
        slave,
        rx,
        engine,
        stop.clone(),
        DEQUEUE_TIMEOUT,
        ReconnectPolicy::default(),
    ));

    info!("Both workers started");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Stopping...");
                break;
            }
            _ = sleep(Duration::from_secs(1)) => {
                if stop.load(Ordering::Relaxed)
                    || watcher.is_finished()
                    || executor.is_finished()
                {
                    break;
                }
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    info!("Waiting for workers to finish...");
    shutdown("Master", watcher).await;
    shutdown("Slave", executor).await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown(name: &str, handle: JoinHandle<Result<()>>) {
    let abort = handle.abort_handle();
    match timeout(JOIN_WINDOW, handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!("[{name}] worker error: {e}"),
        Ok(Err(e)) => error!("[{name}] worker panicked: {e}"),
        Err(_) => {
            error!("[{name}] still running after {}s, aborting", JOIN_WINDOW.as_secs());
            abort.abort();
        }
    }
}
