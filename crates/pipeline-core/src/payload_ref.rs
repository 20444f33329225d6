//! Job payload references.
//!
//! A job's payload is either a pointer into an application table (`table_name`, `row_id`)
//! or an inline JSON document -- never a loosely-typed string that callers have to parse.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadRef {
    Row { table_name: String, row_id: Uuid },
    Inline(serde_json::Value),
}

impl PayloadRef {
    pub fn row(table_name: impl Into<String>, row_id: Uuid) -> Self {
        Self::Row { table_name: table_name.into(), row_id }
    }

    pub fn inline(value: serde_json::Value) -> Self {
        Self::Inline(value)
    }

    pub fn table_name(&self) -> Option<&str> {
        match self {
            Self::Row { table_name, .. } => Some(table_name),
            Self::Inline(_) => None,
        }
    }
}
