//! Row/column tables addressed by sheet coordinates.
//!
//! A [`Workbook`] is a set of named [`Sheet`]s. Row 1 of every sheet is the
//! header; data starts at row 2, the same numbering a spreadsheet shows, and
//! that number is the [`RowRef`] handed to callers. Cells are strings.
//! Column positions are never assumed: [`ColumnMap`] resolves header names
//! and [`ColumnMap::layout`] is the one place that turns named values back
//! into positional cells.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::Storage;

pub const TASKS_SHEET: &str = "Tasks";
pub const OCCURRENCE_DONE_SHEET: &str = "OccurrenceDone";
pub const OCCURRENCE_DELETES_SHEET: &str = "OccurrenceDeletes";
pub const OCCURRENCE_EDITS_SHEET: &str = "OccurrenceEdits";
pub const SPLITS_SHEET: &str = "Splits";
pub const PRIORITY_REMINDERS_SHEET: &str = "PriorityReminders";
pub const CATEGORY_REMINDERS_SHEET: &str = "CategoryReminders";
pub const SYNC_META_SHEET: &str = "SyncMeta";

/// First row holding data (row 1 is the header)
pub const FIRST_DATA_ROW: usize = 2;

/// Sheet row number of a data row
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RowRef(pub usize);

impl RowRef {
    fn offset(self) -> Option<usize> {
        self.0.checked_sub(FIRST_DATA_ROW)
    }
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    header: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn with_header(columns: &[&str]) -> Self {
        Self {
            header: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn columns(&self) -> ColumnMap {
        ColumnMap::from_header(&self.header)
    }

    /// Number of data rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sheet row number of the last row (1 when only the header exists)
    pub fn last_row(&self) -> usize {
        self.rows.len() + FIRST_DATA_ROW - 1
    }

    pub fn rows(&self) -> impl Iterator<Item = (RowRef, &[String])> {
        self.rows
            .iter()
            .enumerate()
            .map(|(idx, cells)| (RowRef(idx + FIRST_DATA_ROW), cells.as_slice()))
    }

    pub fn read_row(&self, row: RowRef) -> Option<&[String]> {
        let offset = row.offset()?;
        self.rows.get(offset).map(|cells| cells.as_slice())
    }

    pub fn write_row(&mut self, row: RowRef, cells: Vec<String>) -> Result<()> {
        let slot = row
            .offset()
            .and_then(|offset| self.rows.get_mut(offset))
            .ok_or_else(|| Error::NotFound(row.to_string()))?;
        *slot = cells;
        Ok(())
    }

    pub fn append_row(&mut self, cells: Vec<String>) -> RowRef {
        self.rows.push(cells);
        RowRef(self.last_row())
    }

    /// Add any header columns from `columns` that are not present yet
    pub fn ensure_columns(&mut self, columns: &[&str]) {
        for column in columns {
            if !self.header.iter().any(|existing| existing.trim() == *column) {
                self.header.push(column.to_string());
            }
        }
    }
}

/// Header-name to column-position lookup for one sheet
#[derive(Debug, Clone)]
pub struct ColumnMap {
    width: usize,
    positions: HashMap<String, usize>,
}

impl ColumnMap {
    pub fn from_header(header: &[String]) -> Self {
        let mut positions = HashMap::new();
        for (idx, name) in header.iter().enumerate() {
            positions.entry(name.trim().to_string()).or_insert(idx);
        }
        Self {
            width: header.len(),
            positions,
        }
    }

    pub fn index(&self, name: &str) -> Result<usize> {
        self.positions
            .get(name)
            .copied()
            .ok_or_else(|| Error::MissingReference(format!("column '{name}' not found")))
    }

    /// Fail with `MissingReference` naming the first absent column
    pub fn require(&self, names: &[&str]) -> Result<()> {
        for name in names {
            self.index(name)?;
        }
        Ok(())
    }

    /// Trimmed cell value, empty when the column or cell is absent
    pub fn get<'a>(&self, cells: &'a [String], name: &str) -> &'a str {
        self.positions
            .get(name)
            .and_then(|&idx| cells.get(idx))
            .map(|value| value.trim())
            .unwrap_or("")
    }

    /// Place named values into positional cells
    ///
    /// Starts from `existing` (so columns this crate does not own keep their
    /// contents) and pads to the header width.
    pub fn layout(&self, existing: Option<&[String]>, values: &[(&str, String)]) -> Result<Vec<String>> {
        let mut cells: Vec<String> = existing.map(|cells| cells.to_vec()).unwrap_or_default();
        cells.resize(self.width.max(cells.len()), String::new());
        for (name, value) in values {
            let idx = self.index(name)?;
            cells[idx] = value.clone();
        }
        Ok(cells)
    }
}

/// All tables backing one task list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbook {
    #[serde(default)]
    tables: BTreeMap<String, Sheet>,
}

impl Workbook {
    /// Workbook with every table this crate reads, headers only
    pub fn standard() -> Self {
        let mut workbook = Self::default();
        workbook.ensure_standard_tables();
        workbook
    }

    /// Create missing tables and append missing header columns
    pub fn ensure_standard_tables(&mut self) {
        for (name, columns) in standard_tables() {
            self.tables
                .entry(name.to_string())
                .or_insert_with(|| Sheet::with_header(columns))
                .ensure_columns(columns);
        }
    }

    pub fn sheet(&self, name: &str) -> Result<&Sheet> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::MissingReference(format!("sheet '{name}' not found")))
    }

    pub fn sheet_mut(&mut self, name: &str) -> Result<&mut Sheet> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::MissingReference(format!("sheet '{name}' not found")))
    }

    pub fn insert_sheet(&mut self, name: impl Into<String>, sheet: Sheet) {
        self.tables.insert(name.into(), sheet);
    }

    /// Insert a row keyed by the first `key_len` named values, or overwrite
    /// the existing row carrying the same key.
    pub fn upsert(&mut self, name: &str, key_len: usize, values: &[(&str, String)]) -> Result<RowRef> {
        let sheet = self.sheet_mut(name)?;
        let columns = sheet.columns();
        let key = &values[..key_len.min(values.len())];
        let existing = sheet.rows().find_map(|(row, cells)| {
            key.iter()
                .all(|(column, value)| columns.get(cells, column) == value.trim())
                .then_some(row)
        });
        match existing {
            Some(row) => {
                let cells = columns.layout(sheet.read_row(row), values)?;
                sheet.write_row(row, cells)?;
                Ok(row)
            }
            None => {
                let cells = columns.layout(None, values)?;
                Ok(sheet.append_row(cells))
            }
        }
    }
}

fn standard_tables() -> [(&'static str, &'static [&'static str]); 8] {
    [
        (TASKS_SHEET, &crate::task::TASK_COLUMNS[..]),
        (
            OCCURRENCE_DONE_SHEET,
            &["recurrence_id", "local_date", "is_done", "updated_at"],
        ),
        (
            OCCURRENCE_DELETES_SHEET,
            &["recurrence_id", "local_date", "updated_at"],
        ),
        (
            OCCURRENCE_EDITS_SHEET,
            &["recurrence_id", "fields_json", "updated_at"],
        ),
        (
            SPLITS_SHEET,
            &["original_task_id", "split_at", "new_task_id"],
        ),
        (PRIORITY_REMINDERS_SHEET, &["Priority", "ReminderOffsets"]),
        (CATEGORY_REMINDERS_SHEET, &["Category", "ReminderOffsets"]),
        (SYNC_META_SHEET, &["key", "value"]),
    ]
}

/// A workbook persisted as one JSON document
#[derive(Debug, Clone)]
pub struct WorkbookFile {
    storage: Storage,
    path: PathBuf,
}

impl WorkbookFile {
    pub fn new(storage: Storage, path: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the workbook; a missing file yields the standard empty tables
    pub fn load(&self) -> Result<Workbook> {
        let mut workbook: Workbook = self.storage.read_json_or_default(&self.path)?;
        workbook.ensure_standard_tables();
        Ok(workbook)
    }

    pub fn save(&self, workbook: &Workbook) -> Result<()> {
        self.storage.write_json_locked(&self.path, workbook)
    }
}

/// Checkbox-like cell coercion
pub fn parse_checkbox(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1" | "x" | "checked" | "✓" | "✔"
    )
}

pub fn format_checkbox(value: bool) -> String {
    let label = if value { "TRUE" } else { "FALSE" };
    label.to_string()
}
