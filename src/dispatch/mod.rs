pub mod dispatcher;
pub mod handler;
pub mod registry;
pub mod stats;


pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use handler::TableChangeHandler;
pub use registry::HandlerRegistry;
pub use stats::{DispatchStats, StatsSnapshot};
