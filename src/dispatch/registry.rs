use dashmap::DashMap;
use std::sync::Arc;

use super::handler::TableChangeHandler;

/// Routes table names to their handlers.
///
/// Matching is exact; there are no wildcards because every envelope already
/// carries the concrete table name. Backed by a concurrent map so handlers
/// may be registered while the dispatch loop is running.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn TableChangeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `handler` with `table`, returning the handler it replaced.
    pub fn register(
        &self,
        table: impl Into<String>,
        handler: Arc<dyn TableChangeHandler>,
    ) -> Option<Arc<dyn TableChangeHandler>> {
        self.handlers.insert(table.into(), handler)
    }

    pub fn unregister(&self, table: &str) -> Option<Arc<dyn TableChangeHandler>> {
        self.handlers.remove(table).map(|(_, handler)| handler)
    }

    /// The map guard is released before returning, so the caller may invoke
    /// the handler while other tasks register.
    pub fn resolve(&self, table: &str) -> Option<Arc<dyn TableChangeHandler>> {
        self.handlers.get(table).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, table: &str) -> bool {
        self.handlers.contains_key(table)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        tables.sort();
        tables
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("tables", &self.tables())
            .finish()
    }
}
