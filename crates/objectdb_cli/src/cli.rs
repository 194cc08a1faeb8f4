//! CLI argument definitions and command dispatch.
//!
//! # Responsibility
//! - Turn flags and environment variables into store, pool and worker settings.
//! - Run one accessor operation per invocation in the chosen execution mode.

use clap::{Parser, Subcommand, ValueEnum};
use objectdb_core::{
    parse_record_id, Database, DbResult, ExecutionMode, PoolConfig, Record, StoreConfig,
    WorkerPolicy, WorkerPoolConfig,
};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about = "Pooled access to the objects table", long_about = None)]
pub struct Args {
    /// Embedded database file name; `.db` is appended
    #[arg(long, env = "OBJECTDB_FILE", default_value = "objects", global = true)]
    pub file: PathBuf,

    /// Networked store host; when set, the networked store is used
    #[arg(long, env = "OBJECTDB_HOST", global = true)]
    pub host: Option<String>,

    #[arg(long, env = "OBJECTDB_PORT", default_value_t = 5432, global = true)]
    pub port: u16,

    #[arg(long, env = "OBJECTDB_DATABASE", default_value = "objects", global = true)]
    pub database: String,

    #[arg(long, env = "OBJECTDB_USER", default_value = "postgres", global = true)]
    pub user: String,

    #[arg(
        long,
        env = "OBJECTDB_PASSWORD",
        default_value = "",
        hide_env_values = true,
        global = true
    )]
    pub password: String,

    /// Extra connection flags appended to the networked URL
    #[arg(long, env = "OBJECTDB_FLAGS", default_value = "", global = true)]
    pub flags: String,

    /// Maximum pooled connections
    #[arg(long, env = "OBJECTDB_POOL_SIZE", default_value_t = 10, global = true)]
    pub pool_size: u32,

    /// Worker policy: scheduled|elastic|fixed|single or 0..=3
    #[arg(long, env = "OBJECTDB_POLICY", default_value = "fixed", global = true)]
    pub policy: WorkerPolicy,

    /// Execution mode for the operation
    #[arg(long, value_enum, default_value_t = Mode::Sync, global = true)]
    pub mode: Mode,

    /// Absolute directory for rotating log files; logging is off when unset
    #[arg(long, env = "OBJECTDB_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "OBJECTDB_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Print records as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sync,
    Async,
}

impl From<Mode> for ExecutionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Sync => ExecutionMode::Sync,
            Mode::Async => ExecutionMode::Async,
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the objects table if missing
    Init,
    /// Insert a record; a random id is generated when omitted
    Insert {
        text: String,
        #[arg(long)]
        id: Option<String>,
    },
    /// Replace the text of a record
    Update { id: String, text: String },
    /// Delete a record
    Delete { id: String },
    /// List every record
    List,
    /// Print the id → text mapping
    Map,
}

impl Args {
    pub fn store_config(&self) -> StoreConfig {
        match &self.host {
            Some(host) => StoreConfig::networked(
                host.clone(),
                self.port,
                self.database.clone(),
                self.user.clone(),
                self.password.clone(),
                self.flags.clone(),
            ),
            None => StoreConfig::embedded(self.file.clone()),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default().with_max_size(self.pool_size)
    }

    pub fn worker_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.policy)
    }
}

impl Command {
    /// Runs the command and returns the lines to print.
    pub fn run(&self, db: &Database, mode: ExecutionMode, json: bool) -> DbResult<Vec<String>> {
        match self {
            Self::Init => {
                db.with_execute(mode, |dao| dao.create_table())?;
                Ok(vec!["table ready".to_string()])
            }
            Self::Insert { text, id } => {
                let id = match id {
                    Some(value) => parse_record_id(value)?,
                    None => Uuid::new_v4(),
                };
                let text = text.clone();
                db.with_execute(mode, move |dao| dao.insert(id, &text))?;
                Ok(vec![id.to_string()])
            }
            Self::Update { id, text } => {
                let id = parse_record_id(id)?;
                let text = text.clone();
                let changed = db.with_execute(mode, move |dao| dao.update(id, &text))?;
                Ok(vec![format!("updated {changed}")])
            }
            Self::Delete { id } => {
                let id = parse_record_id(id)?;
                let changed = db.with_execute(mode, move |dao| dao.delete(id))?;
                Ok(vec![format!("deleted {changed}")])
            }
            Self::List => {
                let records = db.with_execute(mode, |dao| dao.list())?;
                Ok(records.iter().map(|record| render(record, json)).collect())
            }
            Self::Map => {
                let mapping = db.with_execute(mode, |dao| dao.as_mapping())?;
                if json {
                    return Ok(vec![serde_json::json!(mapping).to_string()]);
                }
                let mut lines: Vec<String> = mapping
                    .into_iter()
                    .map(|(id, text)| format!("{id}\t{text}"))
                    .collect();
                lines.sort();
                Ok(lines)
            }
        }
    }
}

fn render(record: &Record, json: bool) -> String {
    if json {
        serde_json::to_string(record).unwrap_or_else(|_| record.to_string())
    } else {
        record.to_string()
    }
}
