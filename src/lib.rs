//! taskcal - Task Sheet to Calendar Reconciliation Library
//!
//! This library keeps a row-oriented task workbook and an external calendar
//! consistent, and expands recurring tasks with per-occurrence exceptions.
//!
//! # Core Concepts
//!
//! - **Tasks**: rows of the `Tasks` sheet, addressed by sheet row number and
//!   stamped with a row version on every write
//! - **Occurrences**: recurring tasks expanded over a bounded date window,
//!   with done/delete/edit overlays and series splits applied
//! - **Reconciliation**: idempotent create/update/delete of one calendar
//!   event per active task, tolerating stale event references
//! - **Dispatch**: `{action, payload}` requests answered with
//!   `{status, data}` envelopes
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.taskcal.toml`
//! - `error`: Error types and result aliases
//! - `id`: Sortable task identifiers
//! - `sheet`: Row/column tables and the persisted workbook
//! - `task`: Typed task records and the Tasks sheet adapter
//! - `recurrence`: Recurrence rules, overlays and occurrence expansion
//! - `calendar`: Calendar collaborator trait and the local calendar
//! - `reminder`: Reminder offsets by priority and category
//! - `reconcile`: Task to calendar reconciliation
//! - `dispatch`: Request routing and response envelopes
//! - `output`: CLI output formatting
//! - `storage`: Data directory layout and JSON persistence
//! - `lock`: File locking and atomic writes

pub mod calendar;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod id;
pub mod lock;
pub mod output;
pub mod recurrence;
pub mod reconcile;
pub mod reminder;
pub mod sheet;
pub mod storage;
pub mod task;

pub use error::{Error, Result};
