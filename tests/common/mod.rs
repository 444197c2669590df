use pg_notify_relay::config::{Config, ListenerConfig, PostgresConfig};
use std::env;
use tokio_postgres::{Client, NoTls};

/// Get test configuration from environment variables
pub fn get_test_config(name: &str) -> Config {
    // Use TEST_ prefix for test environment variables
    let postgres = PostgresConfig {
        url: None,
        host: env::var("TEST_PG_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: env::var("TEST_PG_PORT")
            .unwrap_or_else(|_| "5432".to_string())
            .parse()
            .unwrap_or(5432),
        database: env::var("TEST_PG_DATABASE").unwrap_or_else(|_| "postgres".to_string()),
        username: env::var("TEST_PG_USERNAME").unwrap_or_else(|_| "postgres".to_string()),
        password: env::var("TEST_PG_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
        connect_timeout_secs: 5,
    };

    let listener = ListenerConfig {
        // Tests run in parallel; each one listens on its own channel
        channel: format!("test_{}_{}", name, std::process::id()),
        min_reconnect_interval_secs: 1,
        max_reconnect_interval_secs: 2,
        ..ListenerConfig::default()
    };

    Config { postgres, listener }
}

pub async fn connect(config: &Config) -> Client {
    let (client, connection) = tokio_postgres::connect(&config.postgres_url(), NoTls)
        .await
        .expect("connect to test database");

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("Test connection error: {}", e);
        }
    });

    client
}
