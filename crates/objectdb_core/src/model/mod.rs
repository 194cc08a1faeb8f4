//! Domain model for the single `objects` table.
//!
//! # Responsibility
//! - Define the record shape returned by every accessor read path.
//!
//! # Invariants
//! - Every record is identified by a caller-supplied `RecordId`.
//! - Records are detached copies; the store stays authoritative.

pub mod record;
