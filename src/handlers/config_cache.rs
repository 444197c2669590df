use anyhow::Context;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::info;

use crate::dispatch::TableChangeHandler;
use crate::postgres::ChangeOperation;

pub const TABLE: &str = "s_config";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfigRow {
    pub id: i64,
    pub config_key: String,
    pub config_value: Option<String>,
}

/// Mirror of `s_config` keyed by `config_key`.
#[derive(Debug, Default)]
pub struct ConfigCache {
    entries: DashMap<String, ConfigRow>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .and_then(|entry| entry.value().config_value.clone())
    }

    pub fn row(&self, key: &str) -> Option<ConfigRow> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TableChangeHandler for ConfigCache {
    fn handle_change(&self, operation: ChangeOperation, data: &RawValue) -> anyhow::Result<()> {
        let row: ConfigRow =
            serde_json::from_str(data.get()).context("decoding s_config row")?;

        info!(
            id = row.id,
            key = %row.config_key,
            "[{}] {}", TABLE, operation
        );

        match operation {
            ChangeOperation::Insert | ChangeOperation::Update => {
                // A renamed key leaves the old entry behind; drop it by id.
                self.entries
                    .retain(|key, cached| cached.id != row.id || key == &row.config_key);
                self.entries.insert(row.config_key.clone(), row);
            }
            ChangeOperation::Delete => {
                self.entries.remove(&row.config_key);
            }
        }
        Ok(())
    }
}
