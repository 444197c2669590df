use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::dispatch::{DispatchStats, Dispatcher, HandlerRegistry, TableChangeHandler};
use crate::postgres::Session;
use crate::{Config, Result};

/// Owns the handler registry and runs the dispatch loop against a
/// PostgreSQL session on the configured channel.
///
/// ```rust,no_run
/// # use pg_notify_relay::{Config, Listener};
/// # use pg_notify_relay::handlers::ConfigCache;
/// # use std::sync::Arc;
/// # async fn example(config: Config) -> pg_notify_relay::Result<()> {
/// let listener = Listener::new(config);
/// listener.register_handler("s_config", Arc::new(ConfigCache::new()));
/// listener.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct Listener {
    config: Config,
    registry: Arc<HandlerRegistry>,
    stats: Arc<DispatchStats>,
    shutdown: watch::Sender<bool>,
}

impl Listener {
    pub fn new(config: Config) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            registry: Arc::new(HandlerRegistry::new()),
            stats: Arc::new(DispatchStats::default()),
            shutdown,
        }
    }

    /// Routes events for `table` to `handler`. The last registration for a
    /// table wins; registering while the listener runs is allowed.
    pub fn register_handler(
        &self,
        table: impl Into<String>,
        handler: Arc<dyn TableChangeHandler>,
    ) {
        let table = table.into();
        if self.registry.register(table.clone(), handler).is_some() {
            warn!("Replaced existing handler for table {}", table);
        } else {
            info!("Registered handler for table {}", table);
        }
    }

    pub fn registry(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Subscribes and dispatches until [`Listener::close`] is called or a
    /// fatal error occurs. The listener can be started again once a run
    /// has returned.
    pub async fn start(&self) -> Result<()> {
        self.config.validate()?;

        let listener = &self.config.listener;
        info!(
            channel = %listener.channel,
            handlers = self.registry.len(),
            "Starting listener"
        );

        let session = Session::new(self.config.postgres_url(), listener)
            .with_connect_timeout(self.config.postgres.connect_timeout());
        let dispatcher = Dispatcher::new(
            session,
            Arc::clone(&self.registry),
            listener.liveness_window(),
            listener.probe_failure,
        )
        .with_stats(Arc::clone(&self.stats));

        let result = dispatcher.run(self.shutdown.subscribe()).await;
        self.shutdown.send_replace(false);
        info!(stats = ?self.stats.snapshot(), "Listener stopped");
        result
    }

    /// Stops a running [`Listener::start`] and releases its connection.
    /// A close that arrives while nothing runs stops the next `start`
    /// before it connects.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}
