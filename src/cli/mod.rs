//! Command-line interface for taskcal
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is implemented in its own submodule on top of the
//! request dispatcher, so the CLI and raw `request` bodies share one path.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};

use crate::calendar::LocalCalendar;
use crate::config::Config;
use crate::dispatch::{Dispatcher, Response};
use crate::error::Result;
use crate::output::{emit_failure, emit_success, HumanOutput, OutputOptions};
use crate::reconcile::Reconciler;
use crate::sheet::WorkbookFile;
use crate::storage::Storage;
use crate::task::{self, TaskStore};

mod occurrences;
mod reconcile;
mod request;
mod tasks;

/// taskcal - task sheet to calendar reconciliation
///
/// Keeps a task workbook and a calendar in step, expanding recurring tasks
/// with per-occurrence overrides.
#[derive(Parser, Debug)]
#[command(name = "taskcal")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory holding the workbook and config (defaults to current directory)
    #[arg(long, global = true, env = "TASKCAL_DIR")]
    pub dir: Option<PathBuf>,

    /// Config file (defaults to <dir>/.taskcal.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispatch a raw `{action, payload}` JSON request and print the response
    Request {
        /// Request body (read from stdin when omitted)
        body: Option<String>,
    },

    /// List every task row
    Tasks,

    /// Expand occurrences in a date window
    Occurrences {
        /// First day of the window (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// Last day of the window, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: String,

        /// Only expand this task id
        #[arg(long)]
        task: Option<String>,
    },

    /// Create a task
    Create(TaskArgs),

    /// Replace the fields of a task row (omitted fields are cleared)
    #[command(disable_version_flag = true)]
    Update {
        /// Row number as shown in the sheet
        row: usize,

        #[command(flatten)]
        fields: TaskArgs,

        /// Version last seen (checked only with strict versioning)
        #[arg(long)]
        version: Option<u64>,
    },

    /// Mark a task row for deletion
    Delete {
        /// Row number as shown in the sheet
        row: usize,
    },

    /// Reconcile every task row with the calendar
    Reconcile,
}

/// Task fields accepted by `create` and `update`
#[derive(Args, Debug, Clone, Default)]
pub struct TaskArgs {
    #[arg(long)]
    pub subject: Option<String>,

    /// YYYY-MM-DD
    #[arg(long)]
    pub start_date: Option<String>,

    /// HH:MM; omit for an all-day task
    #[arg(long)]
    pub start_time: Option<String>,

    #[arg(long)]
    pub end_date: Option<String>,

    #[arg(long)]
    pub end_time: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    /// e.g. "weekly", "every 2 days", "FREQ=MONTHLY;COUNT=6"
    #[arg(long)]
    pub recurrence: Option<String>,

    #[arg(long)]
    pub repeat_count: Option<u32>,

    /// Low, Medium, High or Urgent
    #[arg(long)]
    pub priority: Option<String>,

    /// Comma-separated tags
    #[arg(long)]
    pub tags: Option<String>,

    #[arg(long)]
    pub notes: Option<String>,

    /// Mark the task completed
    #[arg(long)]
    pub completed: bool,
}

impl TaskArgs {
    /// Request payload keyed by Tasks header names
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        let text_fields = [
            (task::COL_SUBJECT, &self.subject),
            (task::COL_START_DATE, &self.start_date),
            (task::COL_START_TIME, &self.start_time),
            (task::COL_END_DATE, &self.end_date),
            (task::COL_END_TIME, &self.end_time),
            (task::COL_CATEGORY, &self.category),
            (task::COL_RECURRENCE, &self.recurrence),
            (task::COL_PRIORITY, &self.priority),
            (task::COL_TAGS, &self.tags),
            (task::COL_NOTES, &self.notes),
        ];
        for (column, value) in text_fields {
            if let Some(value) = value {
                payload.insert(column.to_string(), Value::String(value.clone()));
            }
        }
        if let Some(count) = self.repeat_count {
            payload.insert(task::COL_REPEAT_COUNT.to_string(), Value::from(count));
        }
        payload.insert(task::COL_COMPLETED.to_string(), Value::Bool(self.completed));
        payload
    }
}

impl Cli {
    /// Run the command, returning the process exit code
    pub async fn run(self) -> Result<i32> {
        let dir = match self.dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::load_from_dir(&dir),
        };
        let output = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };
        let mut dispatcher = open_dispatcher(&dir, config)?;

        match self.command {
            Commands::Request { body } => request::run(&mut dispatcher, body).await,
            Commands::Tasks => tasks::list(&mut dispatcher, output).await,
            Commands::Occurrences { from, to, task } => {
                occurrences::run(&mut dispatcher, output, from, to, task).await
            }
            Commands::Create(fields) => tasks::create(&mut dispatcher, output, &fields).await,
            Commands::Update {
                row,
                fields,
                version,
            } => tasks::update(&mut dispatcher, output, row, &fields, version).await,
            Commands::Delete { row } => tasks::delete(&mut dispatcher, output, row).await,
            Commands::Reconcile => reconcile::run(&mut dispatcher, output).await,
        }
    }
}

/// Wire the workbook, local calendar and reconciler for `dir`
pub fn open_dispatcher(dir: &std::path::Path, config: Config) -> Result<Dispatcher> {
    let storage = Storage::new(dir);
    let workbook = WorkbookFile::new(storage.clone(), storage.workbook_file(&config));
    let calendar = LocalCalendar::open(
        storage.clone(),
        storage.calendar_file(&config),
        config.calendar.calendar_id.clone(),
    )?;
    let reconciler = Reconciler::new(Arc::new(calendar), &config.calendar);
    let store = TaskStore::open(workbook, config)?;
    Ok(Dispatcher::new(store, reconciler))
}

/// Print a dispatcher response and return its exit code
fn finish(
    output: OutputOptions,
    command: &str,
    response: &Response,
    human: impl FnOnce(&Value) -> HumanOutput,
) -> Result<i32> {
    match response.data() {
        Some(data) if response.is_success() => {
            let human = human(data);
            emit_success(output, command, data, Some(&human))?;
        }
        _ => emit_failure(output, command, response.body(), response.exit_code())?,
    }
    Ok(response.exit_code())
}

/// Human summary of the `calendar` part of a write response
fn calendar_summary(human: &mut HumanOutput, data: &Value) {
    let Some(calendar) = data.get("calendar") else {
        return;
    };
    if let Some(error) = calendar.get("error").and_then(Value::as_str) {
        human.push_warning(format!("calendar not updated: {error}"));
        human.push_next_step("taskcal reconcile");
        return;
    }
    if let Some(action) = calendar.get("action").and_then(Value::as_str) {
        human.push_summary("calendar", action.replace('_', " "));
    }
    if let Some(event_id) = calendar.get("eventId").and_then(Value::as_str) {
        human.push_summary("event", event_id);
    }
}
