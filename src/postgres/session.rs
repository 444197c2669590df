//! Long-lived subscription to the shared notification channel.
//!
//! A [`Session`] moves between three live states and one terminal state:
//!
//! - `Connecting`: open a connection and `LISTEN`. Each attempt is bounded
//!   by the connect timeout. Failures are retried with a doubling delay
//!   bounded by the min/max reconnect intervals.
//! - `Listening`: yield notification payloads as they arrive.
//! - liveness check: [`Session::ping`] runs a round-trip on the current
//!   connection. On failure the connection is dropped and the session goes
//!   back to `Connecting`.
//! - `Closed`: the connection is released and `recv` yields `None`.
//!
//! Connection changes are reported as [`SessionEvent`]s alongside the
//! notifications so the caller can log them.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::connection::{ConnectionMessage, NotifyConnection};
use crate::config::ListenerConfig;
use crate::{Error, Result};

/// Something the session observed while waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A raw payload received on the subscribed channel.
    Notification(String),
    /// The first connection of this session was established.
    Connected,
    /// An established connection was lost.
    Disconnected(Option<String>),
    /// A connection was re-established after a loss.
    Reconnected,
    /// A connection attempt failed; another will follow after a delay.
    ConnectionAttemptFailed(String),
}

/// The seam between the dispatch loop and the transport.
///
/// `recv` must be cancel-safe: the dispatch loop races it against the
/// liveness timer and drops it when the timer wins.
pub trait NotificationSource: Send {
    /// Next event, `Ok(None)` once closed. Errors are fatal.
    fn recv(&mut self) -> impl Future<Output = Result<Option<SessionEvent>>> + Send;

    /// Round-trip on the current connection.
    fn ping(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Releases the connection. Idempotent.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Listening,
    Closed,
}

/// Reconnect delay that doubles after each consecutive failure.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.min(max);
        Self {
            min,
            max,
            current: min,
            failures: 0,
        }
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn record_failure(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.current = self.min;
        self.failures = 0;
    }
}

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type ConnectAttempt = Pin<Box<dyn Future<Output = Result<NotifyConnection>> + Send>>;

pub struct Session {
    connection_string: String,
    channel: String,
    probe_timeout: Duration,
    connect_timeout: Duration,
    max_reconnect_attempts: Option<u32>,
    state: SessionState,
    connection: Option<NotifyConnection>,
    backoff: Backoff,
    retry_at: Option<Instant>,
    /// In-flight attempt, kept so a cancelled `recv` resumes it.
    attempt: Option<ConnectAttempt>,
    ever_connected: bool,
}

impl Session {
    pub fn new(connection_string: impl Into<String>, config: &ListenerConfig) -> Self {
        Self {
            connection_string: connection_string.into(),
            channel: config.channel.clone(),
            probe_timeout: config.probe_timeout(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_reconnect_attempts: config.max_reconnect_attempts,
            state: SessionState::Connecting,
            connection: None,
            backoff: Backoff::new(config.min_reconnect_interval(), config.max_reconnect_interval()),
            retry_at: None,
            attempt: None,
            ever_connected: false,
        }
    }

    /// Upper bound on one connection attempt, handshake and `LISTEN`
    /// included. An attempt that runs out counts as a failure.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn schedule_retry(&mut self) -> Duration {
        let delay = self.backoff.next_delay();
        self.retry_at = Some(Instant::now() + delay);
        delay
    }

    fn drop_connection(&mut self) {
        self.connection = None;
        if self.state != SessionState::Closed {
            self.state = SessionState::Connecting;
            self.schedule_retry();
        }
    }

    async fn attempt_connect(&mut self) -> Result<SessionEvent> {
        if let Some(at) = self.retry_at {
            sleep_until(at).await;
        }

        let attempt = self.attempt.get_or_insert_with(|| {
            connect_attempt(
                self.connection_string.clone(),
                self.channel.clone(),
                self.connect_timeout,
            )
        });
        let result = attempt.await;
        self.attempt = None;

        match result {
            Ok(connection) => {
                self.connection = Some(connection);
                self.state = SessionState::Listening;
                self.retry_at = None;
                self.backoff.reset();

                if self.ever_connected {
                    info!(channel = %self.channel, "Reconnected to notification channel");
                    Ok(SessionEvent::Reconnected)
                } else {
                    self.ever_connected = true;
                    Ok(SessionEvent::Connected)
                }
            }
            Err(e) => {
                let attempts = self.backoff.record_failure();
                if let Some(max) = self.max_reconnect_attempts {
                    if attempts >= max {
                        self.close_session().await;
                        return Err(Error::ReconnectExhausted { attempts });
                    }
                }

                let delay = self.schedule_retry();
                warn!(
                    attempts,
                    retry_in = ?delay,
                    "Connection attempt failed: {}", e
                );
                Ok(SessionEvent::ConnectionAttemptFailed(e.to_string()))
            }
        }
    }

    async fn close_session(&mut self) {
        self.state = SessionState::Closed;
        self.retry_at = None;
        self.attempt = None;
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }
}

fn connect_attempt(connection_string: String, channel: String, limit: Duration) -> ConnectAttempt {
    Box::pin(async move {
        let connect = NotifyConnection::connect(&connection_string, &channel);
        match tokio::time::timeout(limit, connect).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                message: "connection attempt".to_string(),
                after: limit,
            }),
        }
    })
}

impl NotificationSource for Session {
    async fn recv(&mut self) -> Result<Option<SessionEvent>> {
        match self.state {
            SessionState::Closed => Ok(None),
            SessionState::Connecting => self.attempt_connect().await.map(Some),
            SessionState::Listening => {
                let Some(connection) = self.connection.as_mut() else {
                    self.drop_connection();
                    return Ok(Some(SessionEvent::Disconnected(None)));
                };

                match connection.recv().await {
                    ConnectionMessage::Notification { channel, payload } => {
                        debug!(channel = %channel, bytes = payload.len(), "Notification received");
                        Ok(Some(SessionEvent::Notification(payload)))
                    }
                    ConnectionMessage::Closed(reason) => {
                        self.drop_connection();
                        Ok(Some(SessionEvent::Disconnected(reason)))
                    }
                }
            }
        }
    }

    async fn ping(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::SessionClosed);
        }

        let Some(connection) = self.connection.as_ref() else {
            return Err(Error::Connection("no connection".to_string()));
        };

        match connection.ping(self.probe_timeout).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.drop_connection();
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if self.state != SessionState::Closed {
            info!(channel = %self.channel, "Closing session");
        }
        self.close_session().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postgres::test_server::TestServer;

    fn unreachable_config(max_attempts: Option<u32>) -> ListenerConfig {
        ListenerConfig {
            min_reconnect_interval_secs: 10,
            max_reconnect_interval_secs: 60,
            max_reconnect_attempts: max_attempts,
            ..ListenerConfig::default()
        }
    }

    // Port 1 on localhost refuses connections on any sane test host.
    const UNREACHABLE: &str = "host=127.0.0.1 port=1 user=postgres connect_timeout=1";

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(60));
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![10, 20, 40, 60, 60]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_min_clamped_to_max() {
        let mut backoff = Backoff::new(Duration::from_secs(90), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_counts_failures() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(2));
        assert_eq!(backoff.record_failure(), 1);
        assert_eq!(backoff.record_failure(), 2);
        assert_eq!(backoff.failures(), 2);
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
    }

    #[tokio::test]
    async fn test_failed_connect_schedules_retry() {
        let mut session = Session::new(UNREACHABLE, &unreachable_config(None));
        assert_eq!(session.state(), SessionState::Connecting);

        let event = session.recv().await.unwrap();
        assert!(matches!(event, Some(SessionEvent::ConnectionAttemptFailed(_))));
        assert_eq!(session.state(), SessionState::Connecting);

        let retry_at = session.retry_at.expect("retry scheduled");
        assert!(retry_at > Instant::now() + Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_reconnect_exhausted_is_fatal() {
        let mut session = Session::new(UNREACHABLE, &unreachable_config(Some(1)));

        let result = session.recv().await;
        assert!(matches!(result, Err(Error::ReconnectExhausted { attempts: 1 })));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ping_without_connection_fails() {
        let mut session = Session::new(UNREACHABLE, &unreachable_config(None));
        assert!(matches!(session.ping().await, Err(Error::Connection(_))));

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.ping().await, Err(Error::SessionClosed)));
        assert!(session.recv().await.unwrap().is_none());
    }

    fn session_for(server: &TestServer, max_attempts: Option<u32>) -> Session {
        let config = ListenerConfig {
            max_reconnect_attempts: max_attempts,
            ..ListenerConfig::default()
        };
        Session::new(server.connection_string(), &config)
            .with_backoff(Backoff::new(
                Duration::from_millis(50),
                Duration::from_millis(200),
            ))
            .with_connect_timeout(Duration::from_secs(2))
    }

    async fn next_event(session: &mut Session) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), session.recv())
            .await
            .expect("no session event within 5s")
            .unwrap()
            .expect("session closed")
    }

    #[tokio::test]
    async fn test_hung_handshake_counts_as_failed_attempt() {
        let server = TestServer::silent().await;
        let mut session =
            session_for(&server, Some(2)).with_connect_timeout(Duration::from_millis(300));

        // Cancel `recv` well inside the attempt deadline, as the dispatch
        // loop does when its liveness timer wins the race.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        let outcome = loop {
            assert!(Instant::now() < deadline, "connection attempts never gave up");
            match tokio::time::timeout(Duration::from_millis(100), session.recv()).await {
                Err(_) => continue,
                Ok(Ok(Some(event))) => events.push(event),
                Ok(other) => break other,
            }
        };

        assert!(matches!(outcome, Err(Error::ReconnectExhausted { attempts: 2 })));
        match events.as_slice() {
            [SessionEvent::ConnectionAttemptFailed(reason)] => {
                assert!(reason.contains("connection attempt"), "{}", reason);
            }
            other => panic!("unexpected events: {:?}", other),
        }
        assert_eq!(server.accepted(), 2);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_reconnects_after_connection_lost() {
        let mut server = TestServer::start().await;
        let mut session = session_for(&server, None);

        assert_eq!(next_event(&mut session).await, SessionEvent::Connected);
        assert_eq!(session.state(), SessionState::Listening);
        let backend = server.backend().await;

        backend.notify(session.channel(), "first");
        assert_eq!(
            next_event(&mut session).await,
            SessionEvent::Notification("first".to_string())
        );

        let lost_at = Instant::now();
        backend.terminate();
        assert!(matches!(
            next_event(&mut session).await,
            SessionEvent::Disconnected(_)
        ));
        assert_eq!(session.state(), SessionState::Connecting);

        assert_eq!(next_event(&mut session).await, SessionEvent::Reconnected);
        assert!(lost_at.elapsed() >= Duration::from_millis(50));
        assert_eq!(session.state(), SessionState::Listening);

        let backend = server.backend().await;
        backend.notify(session.channel(), "second");
        assert_eq!(
            next_event(&mut session).await,
            SessionEvent::Notification("second".to_string())
        );

        session.close().await;
        assert!(session.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_successful_connect_resets_backoff() {
        let server = TestServer::start().await;
        server.reject_next(2);
        let mut session = session_for(&server, None);

        for _ in 0..2 {
            assert!(matches!(
                next_event(&mut session).await,
                SessionEvent::ConnectionAttemptFailed(_)
            ));
        }
        assert_eq!(session.backoff.failures(), 2);

        assert_eq!(next_event(&mut session).await, SessionEvent::Connected);
        assert_eq!(session.backoff.failures(), 0);
        assert_eq!(session.backoff.clone().next_delay(), Duration::from_millis(50));
        assert!(session.retry_at.is_none());
    }

    #[tokio::test]
    async fn test_failed_ping_returns_to_connecting() {
        let mut server = TestServer::start().await;
        let mut session = session_for(&server, None);
        session.probe_timeout = Duration::from_millis(200);

        assert_eq!(next_event(&mut session).await, SessionEvent::Connected);
        let backend = server.backend().await;
        session.ping().await.unwrap();

        backend.stall();
        assert!(matches!(session.ping().await, Err(Error::Timeout { .. })));
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.retry_at.is_some());

        assert_eq!(next_event(&mut session).await, SessionEvent::Reconnected);
        session.ping().await.unwrap();
        session.close().await;
    }
}
