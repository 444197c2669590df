use anyhow::Context;
use clap::Parser;
use pg_notify_relay::handlers::{config_cache, user_cache, ConfigCache, UserCache};
use pg_notify_relay::postgres::trigger;
use pg_notify_relay::{Config, Listener};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_postgres::NoTls;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "pg-notify-relay")]
#[command(
    about = "Routes PostgreSQL row change notifications to table handlers",
    long_about = None
)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[arg(
        long = "install-trigger",
        value_name = "TABLE",
        help = "Install the change trigger on TABLE before listening (repeatable)"
    )]
    install_trigger: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting pg-notify-relay");
    info!("Loading configuration from {:?}", args.config);

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading configuration from {:?}", args.config))?;

    info!(
        postgres_host = %config.postgres.host,
        postgres_port = %config.postgres.port,
        postgres_database = %config.postgres.database,
        channel = %config.listener.channel,
        liveness_window_secs = config.listener.liveness_window_secs,
        probe_failure = ?config.listener.probe_failure,
        "Configuration summary"
    );

    if !args.install_trigger.is_empty() {
        install_triggers(&config, &args.install_trigger).await?;
    }

    let listener = Arc::new(Listener::new(config));
    listener.register_handler(config_cache::TABLE, Arc::new(ConfigCache::new()));
    listener.register_handler(user_cache::TABLE, Arc::new(UserCache::new()));

    let signal_listener = Arc::clone(&listener);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            signal_listener.close();
        }
    });

    if let Err(e) = listener.start().await {
        error!("Listener stopped with error: {}", e);
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}

async fn install_triggers(config: &Config, tables: &[String]) -> anyhow::Result<()> {
    let (client, connection) = tokio_postgres::connect(&config.postgres_url(), NoTls)
        .await
        .context("connecting to install triggers")?;

    let connection_task = tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("Connection error: {}", e);
        }
    });

    let result = trigger::install(&client, &config.listener.channel, tables).await;
    drop(client);
    connection_task.abort();
    result.context("installing change triggers")
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("pg_notify_relay=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pg_notify_relay=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
