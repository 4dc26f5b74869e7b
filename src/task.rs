//! Task records and the Tasks sheet adapter.
//!
//! A task is one row of the `Tasks` sheet. [`TaskStore`] owns the mapping
//! between rows and typed [`Task`] records, row-number addressing, and the
//! version/timestamp stamping applied on every write.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::id::IdGenerator;
use crate::recurrence::Rule;
use crate::sheet::{
    format_checkbox, parse_checkbox, ColumnMap, RowRef, Sheet, Workbook, WorkbookFile, TASKS_SHEET,
};

pub const COL_SUBJECT: &str = "Subject";
pub const COL_START_DATE: &str = "Start Date";
pub const COL_START_TIME: &str = "Start Time";
pub const COL_END_DATE: &str = "End Date";
pub const COL_END_TIME: &str = "End Time";
pub const COL_COMPLETED: &str = "Is it Completed";
pub const COL_DELETE: &str = "Delete this";
pub const COL_CATEGORY: &str = "Category";
pub const COL_RECURRENCE: &str = "Recurrence";
pub const COL_REPEAT_COUNT: &str = "Repeat Count";
pub const COL_PRIORITY: &str = "Priority";
pub const COL_TAGS: &str = "Tags";
pub const COL_NOTES: &str = "Notes";
pub const COL_TASK_ID: &str = "_Task ID";
pub const COL_TIMEZONE: &str = "_Timezone";
pub const COL_EVENT_ID: &str = "_Calendar Event ID";
pub const COL_ETAG: &str = "_Last Calendar ETag";
pub const COL_SYNCED_AT: &str = "_Last Calendar Sync At";
pub const COL_ROW_VERSION: &str = "_Row Version";
pub const COL_CREATED_AT: &str = "_Created At";
pub const COL_UPDATED_AT: &str = "_Updated At";

/// Every column of the Tasks sheet, in provisioning order
pub const TASK_COLUMNS: [&str; 21] = [
    COL_SUBJECT,
    COL_START_DATE,
    COL_START_TIME,
    COL_END_DATE,
    COL_END_TIME,
    COL_COMPLETED,
    COL_DELETE,
    COL_CATEGORY,
    COL_RECURRENCE,
    COL_REPEAT_COUNT,
    COL_PRIORITY,
    COL_TAGS,
    COL_NOTES,
    COL_TASK_ID,
    COL_TIMEZONE,
    COL_EVENT_ID,
    COL_ETAG,
    COL_SYNCED_AT,
    COL_ROW_VERSION,
    COL_CREATED_AT,
    COL_UPDATED_AT,
];

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_INPUT_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const TIME_FORMAT: &str = "%H:%M";
const TIME_INPUT_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];
const TAG_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
            Priority::Urgent => "Urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Priority::ALL
            .into_iter()
            .find(|priority| priority.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                Error::invalid_field(
                    COL_PRIORITY,
                    format!("unknown priority '{trimmed}' (expected Low, Medium, High or Urgent)"),
                )
            })
    }
}

/// User-editable fields as supplied by a request or an occurrence edit.
///
/// `None` means the field was absent or empty. For create/update that
/// stores an empty cell; for occurrence overlays it leaves the parent value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFields {
    pub subject: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_date: Option<NaiveDate>,
    pub end_time: Option<NaiveTime>,
    pub is_completed: Option<bool>,
    pub marked_for_deletion: Option<bool>,
    pub category: Option<String>,
    pub recurrence: Option<String>,
    pub repeat_count: Option<u32>,
    pub priority: Option<Priority>,
    pub tags: Option<BTreeSet<String>>,
    pub notes: Option<String>,
}

impl TaskFields {
    /// Parse fields keyed by Tasks header names; unknown keys are ignored
    pub fn from_json(object: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            subject: json_text(object, COL_SUBJECT)?,
            start_date: json_text(object, COL_START_DATE)?
                .map(|raw| parse_date(COL_START_DATE, &raw))
                .transpose()?,
            start_time: json_text(object, COL_START_TIME)?
                .map(|raw| parse_time(COL_START_TIME, &raw))
                .transpose()?,
            end_date: json_text(object, COL_END_DATE)?
                .map(|raw| parse_date(COL_END_DATE, &raw))
                .transpose()?,
            end_time: json_text(object, COL_END_TIME)?
                .map(|raw| parse_time(COL_END_TIME, &raw))
                .transpose()?,
            is_completed: json_bool(object, COL_COMPLETED)?,
            marked_for_deletion: json_bool(object, COL_DELETE)?,
            category: json_text(object, COL_CATEGORY)?,
            recurrence: json_text(object, COL_RECURRENCE)?,
            repeat_count: json_text(object, COL_REPEAT_COUNT)?
                .map(|raw| parse_repeat_count(&raw))
                .transpose()?,
            priority: json_text(object, COL_PRIORITY)?
                .map(|raw| raw.parse::<Priority>())
                .transpose()?,
            tags: json_tags(object)?,
            notes: json_text(object, COL_NOTES)?,
        })
    }

    /// Inverse of [`TaskFields::from_json`], emitting only present fields
    pub fn to_json(&self) -> Map<String, Value> {
        let mut object = Map::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                object.insert(key.to_string(), Value::String(value));
            }
        };
        put(COL_SUBJECT, self.subject.clone());
        put(COL_START_DATE, self.start_date.map(format_date));
        put(COL_START_TIME, self.start_time.map(format_time));
        put(COL_END_DATE, self.end_date.map(format_date));
        put(COL_END_TIME, self.end_time.map(format_time));
        put(COL_CATEGORY, self.category.clone());
        put(COL_RECURRENCE, self.recurrence.clone());
        put(COL_REPEAT_COUNT, self.repeat_count.map(|count| count.to_string()));
        put(COL_PRIORITY, self.priority.map(|p| p.as_str().to_string()));
        put(COL_TAGS, self.tags.as_ref().map(format_tags));
        put(COL_NOTES, self.notes.clone());
        if let Some(done) = self.is_completed {
            object.insert(COL_COMPLETED.to_string(), Value::Bool(done));
        }
        if let Some(deleted) = self.marked_for_deletion {
            object.insert(COL_DELETE.to_string(), Value::Bool(deleted));
        }
        object
    }

    pub fn is_empty(&self) -> bool {
        *self == TaskFields::default()
    }
}

/// One row of the Tasks sheet
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Task {
    #[serde(rename = "rowIndex")]
    pub row: RowRef,
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Start Date")]
    pub start_date: Option<NaiveDate>,
    #[serde(rename = "Start Time", serialize_with = "serialize_time")]
    pub start_time: Option<NaiveTime>,
    #[serde(rename = "End Date")]
    pub end_date: Option<NaiveDate>,
    #[serde(rename = "End Time", serialize_with = "serialize_time")]
    pub end_time: Option<NaiveTime>,
    #[serde(rename = "Is it Completed")]
    pub is_completed: bool,
    #[serde(rename = "Delete this")]
    pub marked_for_deletion: bool,
    #[serde(rename = "Category")]
    pub category: Option<String>,
    #[serde(rename = "Recurrence")]
    pub recurrence: Option<String>,
    #[serde(rename = "Repeat Count")]
    pub repeat_count: Option<u32>,
    #[serde(rename = "Priority")]
    pub priority: Option<Priority>,
    #[serde(rename = "Tags")]
    pub tags: BTreeSet<String>,
    #[serde(rename = "Notes")]
    pub notes: String,
    #[serde(rename = "_Task ID")]
    pub task_id: String,
    #[serde(rename = "_Timezone")]
    pub timezone: String,
    #[serde(rename = "_Calendar Event ID")]
    pub external_event_id: Option<String>,
    #[serde(rename = "_Last Calendar ETag")]
    pub external_etag: Option<String>,
    #[serde(rename = "_Last Calendar Sync At")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(rename = "_Row Version")]
    pub row_version: u64,
    #[serde(rename = "_Created At")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "_Updated At")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// Completed and soft-deleted tasks must not keep a calendar event
    pub fn wants_calendar_event(&self) -> bool {
        !self.is_completed && !self.marked_for_deletion
    }

    /// Overlay every present field of `fields` onto this task
    pub fn apply_fields(&mut self, fields: &TaskFields) {
        if let Some(subject) = &fields.subject {
            self.subject = subject.clone();
        }
        if fields.start_date.is_some() {
            self.start_date = fields.start_date;
        }
        if fields.start_time.is_some() {
            self.start_time = fields.start_time;
        }
        if fields.end_date.is_some() {
            self.end_date = fields.end_date;
        }
        if fields.end_time.is_some() {
            self.end_time = fields.end_time;
        }
        if let Some(done) = fields.is_completed {
            self.is_completed = done;
        }
        if let Some(deleted) = fields.marked_for_deletion {
            self.marked_for_deletion = deleted;
        }
        if fields.category.is_some() {
            self.category = fields.category.clone();
        }
        if fields.recurrence.is_some() {
            self.recurrence = fields.recurrence.clone();
        }
        if fields.repeat_count.is_some() {
            self.repeat_count = fields.repeat_count;
        }
        if fields.priority.is_some() {
            self.priority = fields.priority;
        }
        if let Some(tags) = &fields.tags {
            self.tags = tags.clone();
        }
        if let Some(notes) = &fields.notes {
            self.notes = notes.clone();
        }
    }

    /// Replace every user field; absent fields become empty
    fn assign_fields(&mut self, fields: &TaskFields) {
        self.subject = fields.subject.clone().unwrap_or_default();
        self.start_date = fields.start_date;
        self.start_time = fields.start_time;
        self.end_date = fields.end_date;
        self.end_time = fields.end_time;
        self.is_completed = fields.is_completed.unwrap_or(false);
        self.marked_for_deletion = fields.marked_for_deletion.unwrap_or(false);
        self.category = fields.category.clone();
        self.recurrence = fields.recurrence.clone();
        self.repeat_count = fields.repeat_count;
        self.priority = fields.priority;
        self.tags = fields.tags.clone().unwrap_or_default();
        self.notes = fields.notes.clone().unwrap_or_default();
    }

    fn from_cells(row: RowRef, columns: &ColumnMap, cells: &[String]) -> Self {
        let text = |name: &str| non_empty(columns.get(cells, name));
        Self {
            row,
            subject: columns.get(cells, COL_SUBJECT).to_string(),
            start_date: lenient(row, COL_START_DATE, text(COL_START_DATE), parse_date),
            start_time: lenient(row, COL_START_TIME, text(COL_START_TIME), parse_time),
            end_date: lenient(row, COL_END_DATE, text(COL_END_DATE), parse_date),
            end_time: lenient(row, COL_END_TIME, text(COL_END_TIME), parse_time),
            is_completed: parse_checkbox(columns.get(cells, COL_COMPLETED)),
            marked_for_deletion: parse_checkbox(columns.get(cells, COL_DELETE)),
            category: text(COL_CATEGORY),
            recurrence: text(COL_RECURRENCE),
            repeat_count: lenient(row, COL_REPEAT_COUNT, text(COL_REPEAT_COUNT), |_, raw| {
                parse_repeat_count(raw)
            }),
            priority: lenient(row, COL_PRIORITY, text(COL_PRIORITY), |_, raw| raw.parse()),
            tags: parse_tags(columns.get(cells, COL_TAGS)),
            notes: columns.get(cells, COL_NOTES).to_string(),
            task_id: columns.get(cells, COL_TASK_ID).to_string(),
            timezone: columns.get(cells, COL_TIMEZONE).to_string(),
            external_event_id: text(COL_EVENT_ID),
            external_etag: text(COL_ETAG),
            last_synced_at: lenient(row, COL_SYNCED_AT, text(COL_SYNCED_AT), parse_timestamp),
            row_version: columns.get(cells, COL_ROW_VERSION).parse().unwrap_or(0),
            created_at: lenient(row, COL_CREATED_AT, text(COL_CREATED_AT), parse_timestamp),
            updated_at: lenient(row, COL_UPDATED_AT, text(COL_UPDATED_AT), parse_timestamp),
        }
    }

    fn user_cells(&self) -> Vec<(&'static str, String)> {
        vec![
            (COL_SUBJECT, self.subject.clone()),
            (COL_START_DATE, self.start_date.map(format_date).unwrap_or_default()),
            (COL_START_TIME, self.start_time.map(format_time).unwrap_or_default()),
            (COL_END_DATE, self.end_date.map(format_date).unwrap_or_default()),
            (COL_END_TIME, self.end_time.map(format_time).unwrap_or_default()),
            (COL_COMPLETED, format_checkbox(self.is_completed)),
            (COL_DELETE, format_checkbox(self.marked_for_deletion)),
            (COL_CATEGORY, self.category.clone().unwrap_or_default()),
            (COL_RECURRENCE, self.recurrence.clone().unwrap_or_default()),
            (
                COL_REPEAT_COUNT,
                self.repeat_count.map(|count| count.to_string()).unwrap_or_default(),
            ),
            (
                COL_PRIORITY,
                self.priority.map(|p| p.as_str().to_string()).unwrap_or_default(),
            ),
            (COL_TAGS, format_tags(&self.tags)),
            (COL_NOTES, self.notes.clone()),
        ]
    }

    fn system_cells(&self) -> Vec<(&'static str, String)> {
        vec![
            (COL_TASK_ID, self.task_id.clone()),
            (COL_TIMEZONE, self.timezone.clone()),
            (COL_EVENT_ID, self.external_event_id.clone().unwrap_or_default()),
            (COL_ETAG, self.external_etag.clone().unwrap_or_default()),
            (COL_SYNCED_AT, format_optional_timestamp(self.last_synced_at)),
            (COL_ROW_VERSION, self.row_version.to_string()),
            (COL_CREATED_AT, format_optional_timestamp(self.created_at)),
            (COL_UPDATED_AT, format_optional_timestamp(self.updated_at)),
        ]
    }

    fn cells(&self) -> Vec<(&'static str, String)> {
        let mut cells = self.user_cells();
        cells.extend(self.system_cells());
        cells
    }
}

/// Calendar bookkeeping written back after a confirmed remote change
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStamp {
    pub event_id: Option<String>,
    pub etag: Option<String>,
    pub synced_at: DateTime<Utc>,
}

/// Typed access to the Tasks sheet of a workbook
#[derive(Debug)]
pub struct TaskStore {
    workbook: Workbook,
    file: Option<WorkbookFile>,
    config: Config,
    ids: IdGenerator,
    dirty: bool,
}

impl TaskStore {
    /// Wrap an in-memory workbook; fails if a Tasks column is missing
    pub fn new(workbook: Workbook, config: Config) -> Result<Self> {
        workbook.sheet(TASKS_SHEET)?.columns().require(&TASK_COLUMNS)?;
        Ok(Self {
            workbook,
            file: None,
            config,
            ids: IdGenerator::new(),
            dirty: false,
        })
    }

    /// Load the workbook behind `file`; [`TaskStore::flush`] writes it back
    pub fn open(file: WorkbookFile, config: Config) -> Result<Self> {
        let workbook = file.load()?;
        let mut store = Self::new(workbook, config)?;
        store.file = Some(file);
        Ok(store)
    }

    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    /// Mutable workbook access for the auxiliary tables
    pub fn workbook_mut(&mut self) -> &mut Workbook {
        self.dirty = true;
        &mut self.workbook
    }

    /// Persist pending changes when backed by a file
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(file) = &self.file {
            file.save(&self.workbook)?;
        }
        self.dirty = false;
        Ok(())
    }

    fn sheet(&self) -> Result<&Sheet> {
        self.workbook.sheet(TASKS_SHEET)
    }

    fn sheet_mut(&mut self) -> Result<&mut Sheet> {
        self.dirty = true;
        self.workbook.sheet_mut(TASKS_SHEET)
    }

    /// Number of task rows, including soft-deleted ones
    pub fn row_count(&self) -> Result<usize> {
        Ok(self.sheet()?.len())
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        let sheet = self.sheet()?;
        let columns = sheet.columns();
        Ok(sheet
            .rows()
            .map(|(row, cells)| Task::from_cells(row, &columns, cells))
            .collect())
    }

    pub fn get(&self, row: RowRef) -> Result<Task> {
        let sheet = self.sheet()?;
        let cells = sheet
            .read_row(row)
            .ok_or_else(|| Error::NotFound(format!("task at {row}")))?;
        Ok(Task::from_cells(row, &sheet.columns(), cells))
    }

    pub fn find_by_id(&self, task_id: &str) -> Result<Option<Task>> {
        let task_id = task_id.trim();
        Ok(self
            .list_tasks()?
            .into_iter()
            .find(|task| task.task_id == task_id))
    }

    pub fn create_task(&mut self, fields: &TaskFields) -> Result<RowRef> {
        self.validate(fields)?;
        let now = Utc::now();
        let mut task = Task::default();
        task.assign_fields(fields);
        task.marked_for_deletion = false;
        task.task_id = self.ids.next_id();
        task.timezone = self.config.timezone.clone();
        task.row_version = 1;
        task.created_at = Some(now);
        task.updated_at = Some(now);

        let sheet = self.sheet_mut()?;
        let cells = sheet.columns().layout(None, &task.cells())?;
        let row = sheet.append_row(cells);
        tracing::debug!(%row, task_id = %task.task_id, "task created");
        Ok(row)
    }

    /// Overwrite the user fields of `row` and bump its version
    ///
    /// The new version is the stored one plus one. `expected_version` is only
    /// compared when strict versioning is enabled. Identity and calendar
    /// columns are carried over from the stored row.
    pub fn update_task(
        &mut self,
        row: RowRef,
        fields: &TaskFields,
        expected_version: Option<u64>,
    ) -> Result<RowRef> {
        self.validate(fields)?;
        let mut task = self.get(row)?;
        if self.config.store.strict_versioning {
            if let Some(expected) = expected_version {
                if expected != task.row_version {
                    return Err(Error::VersionConflict {
                        row: row.0,
                        expected,
                        stored: task.row_version,
                    });
                }
            }
        }
        task.assign_fields(fields);
        task.row_version += 1;
        task.updated_at = Some(Utc::now());
        self.write_task(&task)?;
        tracing::debug!(%row, version = task.row_version, "task updated");
        Ok(row)
    }

    /// Soft delete: flag the row, never remove it
    pub fn delete_task(&mut self, row: RowRef) -> Result<RowRef> {
        let mut task = self.get(row)?;
        task.marked_for_deletion = true;
        task.row_version += 1;
        task.updated_at = Some(Utc::now());
        self.write_task(&task)?;
        tracing::debug!(%row, "task marked for deletion");
        Ok(row)
    }

    /// Write back calendar bookkeeping without touching version or content
    pub fn record_sync(&mut self, row: RowRef, stamp: &SyncStamp) -> Result<()> {
        let sheet = self.sheet_mut()?;
        let columns = sheet.columns();
        let existing = sheet
            .read_row(row)
            .ok_or_else(|| Error::NotFound(format!("task at {row}")))?;
        let cells = columns.layout(
            Some(existing),
            &[
                (COL_EVENT_ID, stamp.event_id.clone().unwrap_or_default()),
                (COL_ETAG, stamp.etag.clone().unwrap_or_default()),
                (COL_SYNCED_AT, format_timestamp(stamp.synced_at)),
            ],
        )?;
        sheet.write_row(row, cells)
    }

    fn write_task(&mut self, task: &Task) -> Result<()> {
        let row = task.row;
        let sheet = self.sheet_mut()?;
        let columns = sheet.columns();
        let existing = sheet
            .read_row(row)
            .ok_or_else(|| Error::NotFound(format!("task at {row}")))?;
        let cells = columns.layout(Some(existing), &task.cells())?;
        sheet.write_row(row, cells)
    }

    fn validate(&self, fields: &TaskFields) -> Result<()> {
        if let Some(category) = &fields.category {
            if !self.config.allows_category(category) {
                return Err(Error::invalid_field(
                    COL_CATEGORY,
                    format!(
                        "unknown category '{category}' (expected one of: {})",
                        self.config.categories.join(", ")
                    ),
                ));
            }
        }
        if let Some(rule) = &fields.recurrence {
            Rule::parse(rule)?;
        }
        if let (Some(start), Some(end)) = (fields.start_date, fields.end_date) {
            if end < start {
                return Err(Error::invalid_field(
                    COL_END_DATE,
                    format!("{end} is before the start date {start}"),
                ));
            }
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Parse a user-editable cell, logging and dropping unparseable values
fn lenient<T>(
    row: RowRef,
    column: &str,
    raw: Option<String>,
    parse: impl Fn(&str, &str) -> Result<T>,
) -> Option<T> {
    let raw = raw?;
    match parse(column, &raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(%row, column, value = %raw, error = %err, "ignoring unparseable cell");
            None
        }
    }
}

pub(crate) fn parse_date(field: &str, raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    // ISO timestamps as emitted by spreadsheet JSON exports.
    let candidate = match trimmed.get(..10) {
        Some(prefix) if trimmed.len() > 10 && trimmed.as_bytes()[10] == b'T' => prefix,
        _ => trimmed,
    };
    DATE_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(candidate, format).ok())
        .ok_or_else(|| Error::invalid_field(field, format!("'{trimmed}' is not a date (YYYY-MM-DD)")))
}

pub(crate) fn parse_time(field: &str, raw: &str) -> Result<NaiveTime> {
    let trimmed = raw.trim();
    TIME_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| Error::invalid_field(field, format!("'{trimmed}' is not a time (HH:MM)")))
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| Error::invalid_field(field, err.to_string()))
}

fn parse_repeat_count(raw: &str) -> Result<u32> {
    let trimmed = raw.trim();
    let count = trimmed
        .strip_suffix(".0")
        .unwrap_or(trimmed)
        .parse::<u32>()
        .map_err(|_| {
            Error::invalid_field(COL_REPEAT_COUNT, format!("'{trimmed}' is not a whole number"))
        })?;
    if count == 0 {
        return Err(Error::invalid_field(COL_REPEAT_COUNT, "must be at least 1"));
    }
    Ok(count)
}

fn parse_tags(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn format_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn format_tags(tags: &BTreeSet<String>) -> String {
    tags.iter().cloned().collect::<Vec<_>>().join(TAG_SEPARATOR)
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn format_optional_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(format_timestamp).unwrap_or_default()
}

fn serialize_time<S: Serializer>(time: &Option<NaiveTime>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match time {
        Some(time) => serializer.serialize_str(&format_time(*time)),
        None => serializer.serialize_none(),
    }
}

/// Text value of a payload key; numbers and booleans are stringified
fn json_text(object: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(non_empty(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(Error::invalid_field(key, format!("expected text, got {other}"))),
    }
}

fn json_bool(object: &Map<String, Value>, key: &str) -> Result<Option<bool>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::Number(n)) => Ok(Some(n.as_f64().map(|v| v != 0.0).unwrap_or(false))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(parse_checkbox(s))),
        Some(other) => Err(Error::invalid_field(key, format!("expected a checkbox, got {other}"))),
    }
}

fn json_tags(object: &Map<String, Value>) -> Result<Option<BTreeSet<String>>> {
    match object.get(COL_TAGS) {
        Some(Value::Array(items)) => {
            let mut tags = BTreeSet::new();
            for item in items {
                match item {
                    Value::String(tag) if !tag.trim().is_empty() => {
                        tags.insert(tag.trim().to_string());
                    }
                    Value::String(_) | Value::Null => {}
                    other => {
                        return Err(Error::invalid_field(
                            COL_TAGS,
                            format!("expected text tags, got {other}"),
                        ))
                    }
                }
            }
            Ok(Some(tags))
        }
        _ => Ok(json_text(object, COL_TAGS)?.map(|raw| parse_tags(&raw))),
    }
}
