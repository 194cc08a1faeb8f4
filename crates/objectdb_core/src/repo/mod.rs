//! Accessor layer over the `objects` table.
//!
//! # Responsibility
//! - Define the accessor contract consumed by callers.
//! - Isolate dialect SQL from pooling and execution.
//!
//! # Invariants
//! - Accessors never outlive the pooled connection they borrow.

pub mod object_dao;
