use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "INSERT",
            ChangeOperation::Update => "UPDATE",
            ChangeOperation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row-level change as published by the `notify_data_change` trigger.
///
/// `data` is kept as the exact JSON text the producer sent; consumers
/// decode it into their own row type with [`ChangeEvent::data_as`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub operation: ChangeOperation,
    pub data: Box<RawValue>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        table: impl Into<String>,
        operation: ChangeOperation,
        data: Box<RawValue>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            table: table.into(),
            operation,
            data,
            timestamp,
        }
    }

    pub fn data_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.data.get())
    }
}

impl PartialEq for ChangeEvent {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table
            && self.operation == other.operation
            && self.data.get() == other.data.get()
            && self.timestamp == other.timestamp
    }
}

impl Eq for ChangeEvent {}
