use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SweeperConfig;
use crate::database::connection::ConnectionRegistry;

/// Background liveness sweep over the connection registry.
///
/// On each tick, every cached connection is pinged; dead entries are
/// evicted through the registry's conditional eviction path, which takes
/// the same per-tenant lock as `connect` — a sweep can never tear down a
/// fresh handle that a concurrent connect just installed. Live entries are
/// never evicted. Ping failures are handled here, not propagated; the
/// sweeper has no caller to report to.
pub struct Sweeper {
    connections: Arc<ConnectionRegistry>,
    interval: Duration,
    ping_timeout: Duration,
}

pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        config: &SweeperConfig,
        ping_timeout: Duration,
    ) -> Self {
        Self { connections, interval: config.interval(), ping_timeout }
    }

    /// Spawn the sweep loop. The first sweep runs one full interval after
    /// startup; connects that just succeeded do not get probed immediately.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown, mut signal) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            tracing::debug!("connection sweeper stopping");
                            break;
                        }
                    }
                }
            }
        });

        SweeperHandle { shutdown, handle }
    }

    /// One pass over the registry. Public so embedders (and tests) can
    /// force a sweep without waiting out the interval.
    pub async fn sweep(&self) {
        for tenant_id in self.connections.tenant_ids().await {
            let Some(entry) = self.connections.get(&tenant_id).await else {
                continue;
            };

            match entry.ping(self.ping_timeout).await {
                Ok(()) => {
                    tracing::debug!("sweep: tenant {} connection is live", tenant_id);
                }
                Err(e) => {
                    tracing::warn!("sweep: tenant {} connection is dead ({}), evicting", tenant_id, e);
                    self.connections.evict_if_current(&tenant_id, &entry).await;
                }
            }
        }
    }
}

impl SweeperHandle {
    /// Signal the loop to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}
