use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::registry::HandlerRegistry;
use super::stats::DispatchStats;
use crate::config::ProbeFailurePolicy;
use crate::postgres::codec;
use crate::postgres::session::{NotificationSource, SessionEvent};
use crate::{Error, Result};

/// What happened to a single notification payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { table: String },
    Unrouted { table: String },
    Malformed,
    HandlerFailed { table: String },
}

/// The control loop: waits for the next session event or the liveness
/// deadline, whichever comes first, and routes decoded events by table.
pub struct Dispatcher<S> {
    source: S,
    registry: Arc<HandlerRegistry>,
    stats: Arc<DispatchStats>,
    liveness_window: Duration,
    probe_failure: ProbeFailurePolicy,
}

impl<S: NotificationSource> Dispatcher<S> {
    pub fn new(
        source: S,
        registry: Arc<HandlerRegistry>,
        liveness_window: Duration,
        probe_failure: ProbeFailurePolicy,
    ) -> Self {
        Self {
            source,
            registry,
            stats: Arc::new(DispatchStats::default()),
            liveness_window,
            probe_failure,
        }
    }

    pub fn with_stats(mut self, stats: Arc<DispatchStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until shutdown is signalled, the source closes, or a fatal
    /// error occurs. The source is closed on every exit path.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if *shutdown.borrow() {
            self.source.close().await;
            return Ok(());
        }

        let result = self.run_loop(&mut shutdown).await;
        self.source.close().await;
        result
    }

    async fn run_loop(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, stopping dispatch loop");
                        return Ok(());
                    }
                }
                event = self.source.recv() => {
                    match event? {
                        Some(event) => self.on_session_event(event),
                        None => {
                            info!("Notification source closed");
                            return Ok(());
                        }
                    }
                }
                _ = tokio::time::sleep(self.liveness_window) => {
                    self.check_liveness().await?;
                }
            }
        }
    }

    fn on_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Notification(payload) => {
                self.dispatch(&payload);
            }
            SessionEvent::Connected => {
                info!("Notification session connected");
            }
            SessionEvent::Reconnected => {
                self.stats.record_reconnect();
                info!("Notification session reconnected");
            }
            SessionEvent::Disconnected(reason) => {
                warn!(reason = ?reason, "Notification session disconnected");
            }
            SessionEvent::ConnectionAttemptFailed(reason) => {
                warn!("Listener connection attempt failed: {}", reason);
            }
        }
    }

    async fn check_liveness(&mut self) -> Result<()> {
        self.stats.record_probe();
        debug!(window = ?self.liveness_window, "No notifications within liveness window, probing");

        let Err(e) = self.source.ping().await else {
            return Ok(());
        };
        self.stats.record_probe_failure();

        match self.probe_failure {
            ProbeFailurePolicy::Fatal => {
                error!("Liveness probe failed: {}", e);
                Err(Error::LivenessProbe {
                    message: e.to_string(),
                })
            }
            ProbeFailurePolicy::Reconnect => {
                warn!("Liveness probe failed, reconnecting: {}", e);
                Ok(())
            }
        }
    }

    /// Decodes one raw payload and hands it to the handler for its table.
    /// Never fails: every problem is logged and reflected in the outcome.
    pub fn dispatch(&self, payload: &str) -> DispatchOutcome {
        let event = match codec::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                self.stats.record_malformed();
                warn!(bytes = payload.len(), "Dropping notification: {}", e);
                return DispatchOutcome::Malformed;
            }
        };

        let Some(handler) = self.registry.resolve(&event.table) else {
            self.stats.record_unrouted();
            debug!(table = %event.table, "No handler registered for table");
            return DispatchOutcome::Unrouted { table: event.table };
        };

        match handler.handle_change(event.operation, &event.data) {
            Ok(()) => {
                self.stats.record_delivered();
                debug!(
                    table = %event.table,
                    operation = %event.operation,
                    timestamp = %event.timestamp,
                    "Change delivered"
                );
                DispatchOutcome::Delivered { table: event.table }
            }
            Err(e) => {
                self.stats.record_handler_failure();
                error!(
                    table = %event.table,
                    operation = %event.operation,
                    "Handler failed: {:#}", e
                );
                DispatchOutcome::HandlerFailed { table: event.table }
            }
        }
    }
}
