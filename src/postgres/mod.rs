pub mod codec;
pub mod connection;
pub mod session;
pub mod trigger;
pub mod types;

#[cfg(test)]
pub(crate) mod test_server;

pub use connection::{ConnectionMessage, NotifyConnection};
pub use session::{Backoff, NotificationSource, Session, SessionEvent, SessionState};
pub use types::*;
