pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod listener;

pub mod postgres;

pub use config::Config;
pub use dispatch::{HandlerRegistry, TableChangeHandler};
pub use error::{Error, Result};
pub use listener::Listener;
pub use postgres::{ChangeEvent, ChangeOperation};
