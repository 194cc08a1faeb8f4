//! Accessor contract for the `objects` table and its dialect implementations.
//!
//! # Responsibility
//! - Declare the fixed set of table operations consumed by callers.
//! - Keep SQL text for each dialect inside the persistence boundary.
//! - Map retrieved rows into detached `Record` values.
//!
//! # Invariants
//! - `create_table` is re-runnable against an existing table.
//! - `update`/`delete` on an absent id affect zero rows and do not fail.
//! - Duplicate ids on insert surface the driver's constraint error unchanged.

use crate::db::{DbError, DbResult};
use crate::model::record::{Record, RecordId};
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;
use uuid::Uuid;

const SQLITE_CREATE_TABLE_SQL: &str =
    "CREATE TABLE IF NOT EXISTS objects (id TEXT PRIMARY KEY, text TEXT);";
const SQLITE_INSERT_SQL: &str = "INSERT INTO objects (id, text) VALUES (?1, ?2);";
const SQLITE_UPDATE_SQL: &str = "UPDATE objects SET text = ?1 WHERE id = ?2;";
const SQLITE_DELETE_SQL: &str = "DELETE FROM objects WHERE id = ?1;";
const SQLITE_LIST_SQL: &str = "SELECT id, text FROM objects;";

const POSTGRES_CREATE_TABLE_SQL: &str =
    "CREATE TABLE IF NOT EXISTS objects (id TEXT PRIMARY KEY, text TEXT)";
const POSTGRES_INSERT_SQL: &str = "INSERT INTO objects (id, text) VALUES ($1, $2)";
const POSTGRES_UPDATE_SQL: &str = "UPDATE objects SET text = $1 WHERE id = $2";
const POSTGRES_DELETE_SQL: &str = "DELETE FROM objects WHERE id = $1";
const POSTGRES_LIST_SQL: &str = "SELECT id, text FROM objects";

/// Data operations against the single `objects` table.
///
/// One implementation exists per store dialect; each borrows a pooled
/// connection for the duration of one unit of work.
pub trait ObjectDao {
    /// Creates the table if it does not exist yet.
    fn create_table(&mut self) -> DbResult<()>;

    /// Inserts a new row. Fails with a constraint violation on duplicate `id`.
    fn insert(&mut self, id: RecordId, text: &str) -> DbResult<()>;

    /// Replaces the text of `id`. Returns the number of affected rows.
    fn update(&mut self, id: RecordId, text: &str) -> DbResult<usize>;

    /// Removes `id`. Returns the number of affected rows.
    fn delete(&mut self, id: RecordId) -> DbResult<usize>;

    /// Reads every row currently in the table, in no particular order.
    fn list(&mut self) -> DbResult<Vec<Record>>;

    /// Collapses `list()` into an id → text lookup.
    ///
    /// Ids are unique by the primary key; if a duplicate ever appeared the
    /// last row read would win.
    fn as_mapping(&mut self) -> DbResult<HashMap<RecordId, String>> {
        Ok(self.list()?.into_iter().map(Record::into_parts).collect())
    }
}

/// SQLite dialect of [`ObjectDao`].
pub struct SqliteObjectDao<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteObjectDao<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ObjectDao for SqliteObjectDao<'_> {
    fn create_table(&mut self) -> DbResult<()> {
        self.conn.execute_batch(SQLITE_CREATE_TABLE_SQL)?;
        Ok(())
    }

    fn insert(&mut self, id: RecordId, text: &str) -> DbResult<()> {
        let mut stmt = self.conn.prepare_cached(SQLITE_INSERT_SQL)?;
        stmt.execute(params![id.to_string(), text])?;
        Ok(())
    }

    fn update(&mut self, id: RecordId, text: &str) -> DbResult<usize> {
        let mut stmt = self.conn.prepare_cached(SQLITE_UPDATE_SQL)?;
        Ok(stmt.execute(params![text, id.to_string()])?)
    }

    fn delete(&mut self, id: RecordId) -> DbResult<usize> {
        let mut stmt = self.conn.prepare_cached(SQLITE_DELETE_SQL)?;
        Ok(stmt.execute([id.to_string()])?)
    }

    fn list(&mut self) -> DbResult<Vec<Record>> {
        let mut stmt = self.conn.prepare_cached(SQLITE_LIST_SQL)?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            records.push(map_sqlite_row(row)?);
        }

        Ok(records)
    }
}

/// PostgreSQL dialect of [`ObjectDao`].
pub struct PostgresObjectDao<'conn> {
    client: &'conn mut postgres::Client,
}

impl<'conn> PostgresObjectDao<'conn> {
    pub fn new(client: &'conn mut postgres::Client) -> Self {
        Self { client }
    }
}

impl ObjectDao for PostgresObjectDao<'_> {
    fn create_table(&mut self) -> DbResult<()> {
        self.client.batch_execute(POSTGRES_CREATE_TABLE_SQL)?;
        Ok(())
    }

    fn insert(&mut self, id: RecordId, text: &str) -> DbResult<()> {
        self.client
            .execute(POSTGRES_INSERT_SQL, &[&id.to_string(), &text])?;
        Ok(())
    }

    fn update(&mut self, id: RecordId, text: &str) -> DbResult<usize> {
        let changed = self
            .client
            .execute(POSTGRES_UPDATE_SQL, &[&text, &id.to_string()])?;
        Ok(affected_rows(changed))
    }

    fn delete(&mut self, id: RecordId) -> DbResult<usize> {
        let changed = self
            .client
            .execute(POSTGRES_DELETE_SQL, &[&id.to_string()])?;
        Ok(affected_rows(changed))
    }

    fn list(&mut self) -> DbResult<Vec<Record>> {
        self.client
            .query(POSTGRES_LIST_SQL, &[])?
            .iter()
            .map(map_postgres_row)
            .collect()
    }
}

/// Maps one SQLite row of `objects` into a [`Record`].
pub fn map_sqlite_row(row: &Row<'_>) -> DbResult<Record> {
    let id_text: String = row.get("id")?;
    let text: Option<String> = row.get("text")?;
    build_record(&id_text, text)
}

/// Maps one PostgreSQL row of `objects` into a [`Record`].
pub fn map_postgres_row(row: &postgres::Row) -> DbResult<Record> {
    let id_text: String = row.try_get("id")?;
    let text: Option<String> = row.try_get("text")?;
    build_record(&id_text, text)
}

/// Parses a textual record id.
pub fn parse_record_id(value: &str) -> DbResult<RecordId> {
    Uuid::parse_str(value.trim())
        .map_err(|err| DbError::InvalidArgument(format!("invalid record id `{value}`: {err}")))
}

fn build_record(id_text: &str, text: Option<String>) -> DbResult<Record> {
    let id = Uuid::parse_str(id_text).map_err(|_| {
        DbError::InvalidData(format!("invalid uuid value `{id_text}` in objects.id"))
    })?;
    // NULL text written by other tools reads back as empty.
    Ok(Record::new(id, text.unwrap_or_default()))
}

fn affected_rows(changed: u64) -> usize {
    usize::try_from(changed).unwrap_or(usize::MAX)
}
