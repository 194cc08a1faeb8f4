//! Record domain model.
//!
//! # Responsibility
//! - Pair an immutable identifier with a mutable text payload.
//! - Provide the human-readable rendering used in logs and CLI output.
//!
//! # Invariants
//! - `id` never changes after construction.
//! - `text` may be replaced in place; the change is not persisted until an
//!   explicit accessor `update` call.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one row in the `objects` table.
///
/// Supplied by the caller on insert, never generated by the store.
pub type RecordId = Uuid;

/// One row of the `objects` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    text: String,
}

impl Record {
    pub fn new(id: RecordId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replaces the in-memory text payload.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Splits the record into its `(id, text)` parts.
    pub fn into_parts(self) -> (RecordId, String) {
        (self.id, self.text)
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Record{{id={}, text='{}'}}", self.id, self.text)
    }
}
