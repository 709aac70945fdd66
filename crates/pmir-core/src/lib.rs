//! Core domain model for the portal mirror.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "pmir-core";

/// Placeholder customer login when the portal renders a customer without a
/// linked account.
pub const UNKNOWN_CUSTOMER_LOGIN: &str = "n/a";

/// First date a fresh deployment starts mirroring from when no cursor row
/// exists yet.
pub fn sentinel_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).expect("static date is valid")
}

/// The two independently mirrored entity pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Staff,
    Tasks,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Staff => "staff",
            EntityKind::Tasks => "tasks",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A personnel record as extracted from the staff table, keyed by the
/// portal's own identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: i32,
    pub full_name: String,
    pub short_name: Option<String>,
    pub position: String,
    pub email: String,
    pub phone: String,
}

/// A work-order record extracted from one task-table row. Transient value:
/// it lives for a single sync cycle and is reconciled against persisted
/// state, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub id: i64,
    pub type_name: String,
    pub created: NaiveDate,
    pub closed: Option<NaiveDate>,
    pub description: String,
    pub address: String,
    pub customer_name: String,
    pub customer_login: String,
    pub comments: Vec<String>,
    /// Assignee display names referencing `Person::short_name`.
    pub executors: Vec<String>,
}

impl TaskDraft {
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }
}

/// Durable progress marker, one row per entity pipeline. `last_date` is the
/// next date to process: everything strictly before it is known persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub entity: EntityKind,
    pub last_date: NaiveDate,
    /// Opaque digest of the last fetched result set, compared for equality
    /// only, never parsed.
    pub last_fingerprint: Option<String>,
}

impl SyncCursor {
    pub fn starting(entity: EntityKind) -> Self {
        Self {
            entity,
            last_date: sentinel_start_date(),
            last_fingerprint: None,
        }
    }
}

/// A single table row that failed extraction. Recorded and logged, never
/// escalated: one malformed row must not stall the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub field: &'static str,
    pub reason: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}: {}", self.row, self.field, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_cursor_uses_sentinel_date() {
        let cursor = SyncCursor::starting(EntityKind::Tasks);
        assert_eq!(cursor.last_date, sentinel_start_date());
        assert!(cursor.last_fingerprint.is_none());
    }

    #[test]
    fn entity_kind_renders_lowercase() {
        assert_eq!(EntityKind::Staff.to_string(), "staff");
        assert_eq!(EntityKind::Tasks.to_string(), "tasks");
    }
}
