use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Config, NoTls};
use tracing::{debug, error, info, warn};

use crate::{Error, Result};

/// Messages forwarded from the connection driver task.
#[derive(Debug)]
pub enum ConnectionMessage {
    Notification { channel: String, payload: String },
    /// The server side of the connection went away. Carries the driver
    /// error, if there was one.
    Closed(Option<String>),
}

/// A single PostgreSQL connection subscribed to one notification channel.
///
/// tokio-postgres only surfaces `NOTIFY` traffic through
/// `Connection::poll_message`, so the connection future is driven on its
/// own task and notifications are forwarded over an unbounded channel.
pub struct NotifyConnection {
    client: tokio_postgres::Client,
    connection_task: tokio::task::JoinHandle<()>,
    messages: mpsc::UnboundedReceiver<ConnectionMessage>,
    channel: String,
}

impl NotifyConnection {
    pub async fn connect(connection_string: &str, channel: &str) -> Result<Self> {
        debug!("Connecting to PostgreSQL for LISTEN on '{}'", channel);

        let config = connection_string.parse::<Config>()?;
        let (client, mut connection) = config.connect(NoTls).await?;

        let (tx, messages) = mpsc::unbounded_channel();
        let connection_task = tokio::spawn(async move {
            let stream = futures::stream::poll_fn(move |cx| connection.poll_message(cx));
            futures::pin_mut!(stream);

            while let Some(message) = stream.next().await {
                match message {
                    Ok(AsyncMessage::Notification(notification)) => {
                        let forwarded = ConnectionMessage::Notification {
                            channel: notification.channel().to_string(),
                            payload: notification.payload().to_string(),
                        };
                        if tx.send(forwarded).is_err() {
                            return;
                        }
                    }
                    Ok(AsyncMessage::Notice(notice)) => {
                        debug!("Server notice: {}", notice.message());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Connection error: {}", e);
                        let _ = tx.send(ConnectionMessage::Closed(Some(e.to_string())));
                        return;
                    }
                }
            }

            let _ = tx.send(ConnectionMessage::Closed(None));
        });

        let mut conn = Self {
            client,
            connection_task,
            messages,
            channel: channel.to_string(),
        };

        if let Err(e) = conn.listen().await {
            conn.connection_task.abort();
            return Err(e);
        }

        info!("Listening on channel: {}", conn.channel);
        Ok(conn)
    }

    async fn listen(&mut self) -> Result<()> {
        let command = format!("LISTEN {}", quote_identifier(&self.channel));
        self.client.batch_execute(&command).await?;
        Ok(())
    }

    /// Waits for the next message from the driver task. Cancel-safe.
    pub async fn recv(&mut self) -> ConnectionMessage {
        match self.messages.recv().await {
            Some(message) => message,
            None => ConnectionMessage::Closed(None),
        }
    }

    /// Lightweight round-trip used to detect a silently dead connection.
    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        if self.client.is_closed() {
            return Err(Error::Connection("connection is closed".to_string()));
        }

        match tokio::time::timeout(timeout, self.client.simple_query("SELECT 1")).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(Error::Postgres(e)),
            Err(_) => Err(Error::Timeout {
                message: "liveness probe".to_string(),
                after: timeout,
            }),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn close(mut self) {
        debug!("Closing notification connection");

        let command = format!("UNLISTEN {}", quote_identifier(&self.channel));
        if !self.client.is_closed() {
            if let Err(e) = self.client.batch_execute(&command).await {
                warn!("Failed to UNLISTEN before close: {}", e);
            }
        }

        self.messages.close();
        self.connection_task.abort();
    }
}

impl Drop for NotifyConnection {
    fn drop(&mut self) {
        self.connection_task.abort();
    }
}

/// Quotes a PostgreSQL identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
