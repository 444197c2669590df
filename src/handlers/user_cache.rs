use anyhow::Context;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::info;

use crate::dispatch::TableChangeHandler;
use crate::postgres::ChangeOperation;

pub const TABLE: &str = "s_user";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Mirror of `s_user` keyed by primary key.
#[derive(Debug, Default)]
pub struct UserCache {
    users: DashMap<i64, UserRow>,
}

impl UserCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i64) -> Option<UserRow> {
        self.users.get(&id).map(|entry| entry.value().clone())
    }

    pub fn find_by_username(&self, username: &str) -> Option<UserRow> {
        self.users
            .iter()
            .find(|entry| entry.value().username == username)
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl TableChangeHandler for UserCache {
    fn handle_change(&self, operation: ChangeOperation, data: &RawValue) -> anyhow::Result<()> {
        let row: UserRow = serde_json::from_str(data.get()).context("decoding s_user row")?;

        info!(id = row.id, "[{}] {}", TABLE, operation);

        match operation {
            ChangeOperation::Insert | ChangeOperation::Update => {
                self.users.insert(row.id, row);
            }
            ChangeOperation::Delete => {
                self.users.remove(&row.id);
            }
        }
        Ok(())
    }
}
