//! Command-line front end for the objects table.
//!
//! # Responsibility
//! - Open the configured store, run one command, shut down cleanly.
//! - Keep output line-oriented for scripting.

use clap::Parser;
use log::error;
use objectdb_core::{
    default_log_level, flush_logs, init_logging, Database, ExecutionMode, LogSettings,
};
use std::process::ExitCode;

mod cli;

use cli::Args;

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(log_dir) = &args.log_dir {
        let level = args.log_level.as_deref().unwrap_or(default_log_level());
        let settings = LogSettings::new(level, log_dir.clone()).with_echo_warnings(true);
        if let Err(err) = init_logging(&settings) {
            eprintln!("logging disabled: {err}");
        }
    }

    let code = match run(&args) {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("event=cli_command module=cli status=error error={}", err);
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    };
    flush_logs();
    code
}

fn run(args: &Args) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let db = Database::open(args.store_config(), &args.pool_config(), &args.worker_config())?;
    let result = args
        .command
        .run(&db, ExecutionMode::from(args.mode), args.json);
    db.shutdown();
    Ok(result?)
}
