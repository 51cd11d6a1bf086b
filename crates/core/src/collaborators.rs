//! Narrow interfaces to services the engine consumes but does not own.

use crate::{EngineError, EngineResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// Tabular result of a relational query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Cell `column` of row `row`, if both exist.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))?;
        self.rows.get(row)?.get(index)
    }

    /// Cell rendered as text; strings are unquoted, null is empty.
    pub fn text(&self, row: usize, column: &str) -> String {
        match self.cell(row, column) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Relational query/execute interface.
pub trait SqlExecutor: Send + Sync {
    /// Runs `statement` with named parameters and returns its result set (empty for
    /// statements that return no rows).
    fn execute(&self, statement: &str, params: &[(&str, Value)]) -> EngineResult<Table>;
}

/// Keyed id ↔ guid lookup.
pub trait GuidStore: Send + Sync {
    fn guid_for(&self, id: &str) -> Option<String>;
    fn id_for(&self, guid: &str) -> Option<String>;
    fn record(&self, id: &str, guid: &str) -> EngineResult<()>;
}

/// In-process [`GuidStore`].
#[derive(Debug, Default)]
pub struct MemoryGuidStore {
    by_id: RwLock<HashMap<String, String>>,
    by_guid: RwLock<HashMap<String, String>>,
}

impl MemoryGuidStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GuidStore for MemoryGuidStore {
    fn guid_for(&self, id: &str) -> Option<String> {
        self.by_id.read().ok()?.get(id).cloned()
    }

    fn id_for(&self, guid: &str) -> Option<String> {
        self.by_guid.read().ok()?.get(guid).cloned()
    }

    fn record(&self, id: &str, guid: &str) -> EngineResult<()> {
        let poisoned = |_| EngineError::Database("guid store lock poisoned".into());
        let mut by_id = self.by_id.write().map_err(poisoned)?;
        let mut by_guid = self.by_guid.write().map_err(poisoned)?;
        if let Some(previous) = by_id.insert(id.to_string(), guid.to_string()) {
            by_guid.remove(&previous);
        }
        by_guid.insert(guid.to_string(), id.to_string());
        Ok(())
    }
}

/// Source of new record identifiers.
pub trait IdAllocator: Send + Sync {
    /// Returns `(id, guid)` for a new record.
    fn allocate(&self) -> (String, String);
}

/// Allocates ids from random v4 UUIDs: the guid is the hyphenated UUID, the id its first
/// twelve hex digits upper-cased.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidAllocator;

/// Length of allocated record ids.
pub const ALLOCATED_ID_LENGTH: usize = 12;

impl IdAllocator for UuidAllocator {
    fn allocate(&self) -> (String, String) {
        let uuid = uuid::Uuid::new_v4();
        let simple = uuid.simple().to_string().to_ascii_uppercase();
        (simple[..ALLOCATED_ID_LENGTH].to_string(), uuid.to_string())
    }
}
