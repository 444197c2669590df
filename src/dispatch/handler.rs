use serde_json::value::RawValue;

use crate::postgres::ChangeOperation;

/// A consumer of change events for one table.
///
/// `data` is the row exactly as the trigger serialized it. Implementations
/// decode it into their own shape and guard any state they mutate; the
/// dispatch loop calls them from a single task, one event at a time.
pub trait TableChangeHandler: Send + Sync {
    fn handle_change(&self, operation: ChangeOperation, data: &RawValue) -> anyhow::Result<()>;
}

impl<F> TableChangeHandler for F
where
    F: Fn(ChangeOperation, &RawValue) -> anyhow::Result<()> + Send + Sync,
{
    fn handle_change(&self, operation: ChangeOperation, data: &RawValue) -> anyhow::Result<()> {
        self(operation, data)
    }
}
