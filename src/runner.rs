use crate::copier::ReplicationEngine;
use crate::gateway::TerminalGateway;
use crate::monitor::SnapshotDiffer;
use crate::wire;
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

/// Reconnection cadence for a dropped terminal session: fixed interval,
/// unbounded retries. Injected into the loops so reconnect behavior is
/// testable without wall-clock delays.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    interval: Duration,
}

impl ReconnectPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn delay(&self) -> Duration {
        self.interval
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

/// The watcher/executor handoff. Frames are wire-encoded events; the channel
/// is in-memory only, so frames enqueued but not yet consumed are lost if the
/// executor dies. Producer side never blocks; consumer side polls with a
/// bounded timeout.
pub fn event_channel() -> (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
    mpsc::unbounded_channel()
}

async fn connect_or_stop(
    gateway: &Arc<dyn TerminalGateway>,
    side: &str,
    stop: &AtomicBool,
) -> Result<()> {
    match gateway.connect().await {
        Ok(true) => {}
        Ok(false) | Err(_) => {
            error!("[{side}] Cannot connect!");
            stop.store(true, Ordering::Relaxed);
            return Err(anyhow!("{side}: initial connect failed"));
        }
    }
    match gateway.get_balance().await {
        Ok(balance) => info!("[{side}] Connected - Balance=${balance:.2}"),
        Err(e) => warn!("[{side}] Connected, balance unavailable: {e}"),
    }
    Ok(())
}

async fn reconnect_if_needed(
    gateway: &Arc<dyn TerminalGateway>,
    side: &str,
    policy: &ReconnectPolicy,
) -> bool {
    if gateway.is_connected() {
        return true;
    }
    warn!("[{side}] Disconnected, reconnecting...");
    match gateway.connect().await {
        Ok(true) => {
            info!("[{side}] Reconnected");
            true
        }
        Ok(false) | Err(_) => {
            sleep(policy.delay()).await;
            false
        }
    }
}

/// Master-side loop: poll open positions, diff against the retained
/// baseline, enqueue one frame per detected event.
///
/// The differencer baseline is deliberately kept across reconnect gaps; the
/// first diff after an outage reports whatever changed during it.
pub async fn run_watcher(
    gateway: Arc<dyn TerminalGateway>,
    tx: mpsc::UnboundedSender<String>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
    reconnect: ReconnectPolicy,
) -> Result<()> {
    info!("[Master] Starting, polling every {} ms", poll_interval.as_millis());
    connect_or_stop(&gateway, "Master", &stop).await?;

    let mut differ = SnapshotDiffer::new();

    while !stop.load(Ordering::Relaxed) {
        if !reconnect_if_needed(&gateway, "Master", &reconnect).await {
            continue;
        }

        match gateway.list_open_positions(None).await {
            Ok(positions) => {
                for event in differ.detect_changes(positions) {
                    info!(
                        "[Master] Event sent -> queue: {} #{}",
                        event.kind, event.master_ticket
                    );
                    if tx.send(wire::encode(&event)).is_err() {
                        warn!("[Master] Event channel closed, executor is gone");
                    }
                }
            }
            Err(e) => warn!("[Master] Position poll failed: {e}"),
        }

        sleep(poll_interval).await;
    }

    gateway.disconnect().await;
    info!("[Master] Stopped");
    Ok(())
}

/// Slave-side loop: restore the mapping store, reconcile it against live
/// slave positions, then drain the event channel one event at a time.
pub async fn run_executor(
    gateway: Arc<dyn TerminalGateway>,
    mut rx: mpsc::UnboundedReceiver<String>,
    mut engine: ReplicationEngine,
    stop: Arc<AtomicBool>,
    dequeue_timeout: Duration,
    reconnect: ReconnectPolicy,
) -> Result<()> {
    info!("[Slave] Starting");

    engine.tracker_mut().load();
    info!("[Slave] Restored {} mappings", engine.tracker().count());

    connect_or_stop(&gateway, "Slave", &stop).await?;

    // Mappings whose slave position vanished while the process was down are
    // unusable; drop them now. The executor owns no master session, so the
    // mapped master tickets stand in for the live master set here.
    match gateway.list_open_positions(None).await {
        Ok(positions) => {
            let slave_tickets: HashSet<i64> = positions.iter().map(|p| p.ticket).collect();
            let master_tickets: HashSet<i64> = engine
                .tracker()
                .mappings()
                .map(|m| m.master_ticket)
                .collect();
            let orphans = engine.tracker().sync_check(&master_tickets, &slave_tickets);
            engine
                .tracker_mut()
                .cleanup_orphaned(&orphans.orphaned_slave);
        }
        Err(e) => warn!("[Slave] Startup reconcile skipped, position poll failed: {e}"),
    }

    while !stop.load(Ordering::Relaxed) {
        if !reconnect_if_needed(&gateway, "Slave", &reconnect).await {
            continue;
        }

        match timeout(dequeue_timeout, rx.recv()).await {
            // Queue empty within the window: keep looping.
            Err(_) => continue,
            Ok(None) => {
                warn!("[Slave] Event channel closed, watcher is gone");
                break;
            }
            Ok(Some(frame)) => match wire::decode(&frame) {
                Ok(event) => {
                    info!(
                        "[Slave] Event received: {} #{}",
                        event.kind, event.master_ticket
                    );
                    engine.process_event(&event).await;
                }
                Err(e) => warn!("[Slave] Dropping bad event frame: {e}"),
            },
        }
    }

    engine.tracker().save();
    gateway.disconnect().await;
    info!("[Slave] Saved {} mappings", engine.tracker().count());
    info!("[Slave] Stopped");
    Ok(())
}
