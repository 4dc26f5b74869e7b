//! Reminder offsets attached to calendar events.
//!
//! Offsets come from two independent mappings, by priority and by category.
//! Configured defaults are overridden per key by rows of the
//! `PriorityReminders` / `CategoryReminders` sheets. When both mappings
//! apply to a task the offsets are unioned.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ReminderConfig;
use crate::error::Result;
use crate::sheet::{Workbook, CATEGORY_REMINDERS_SHEET, PRIORITY_REMINDERS_SHEET};
use crate::task::Task;

/// Longest reminder offset a calendar accepts (four weeks, in minutes)
pub const MAX_OFFSET_MINUTES: u32 = 40_320;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderPolicy {
    priority: BTreeMap<String, BTreeSet<u32>>,
    category: BTreeMap<String, BTreeSet<u32>>,
}

impl ReminderPolicy {
    pub fn from_config(config: &ReminderConfig) -> Self {
        Self {
            priority: normalize(&config.priority),
            category: normalize(&config.category),
        }
    }

    /// Config defaults overlaid with the reminder sheets
    pub fn load(config: &ReminderConfig, workbook: &Workbook) -> Result<Self> {
        let mut policy = Self::from_config(config);
        overlay_sheet(&mut policy.priority, workbook, PRIORITY_REMINDERS_SHEET, "Priority")?;
        overlay_sheet(&mut policy.category, workbook, CATEGORY_REMINDERS_SHEET, "Category")?;
        Ok(policy)
    }

    /// Deduplicated offsets for `task`, smallest first
    pub fn offsets_for(&self, task: &Task) -> Vec<u32> {
        let mut offsets = BTreeSet::new();
        if let Some(priority) = task.priority {
            if let Some(found) = self.priority.get(&key(priority.as_str())) {
                offsets.extend(found);
            }
        }
        if let Some(category) = &task.category {
            if let Some(found) = self.category.get(&key(category)) {
                offsets.extend(found);
            }
        }
        offsets.into_iter().collect()
    }
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn normalize(map: &BTreeMap<String, Vec<u32>>) -> BTreeMap<String, BTreeSet<u32>> {
    map.iter()
        .map(|(name, offsets)| {
            let offsets = offsets
                .iter()
                .copied()
                .filter(|offset| *offset <= MAX_OFFSET_MINUTES)
                .collect();
            (key(name), offsets)
        })
        .collect()
}

fn overlay_sheet(
    target: &mut BTreeMap<String, BTreeSet<u32>>,
    workbook: &Workbook,
    sheet_name: &str,
    key_column: &str,
) -> Result<()> {
    let sheet = workbook.sheet(sheet_name)?;
    let columns = sheet.columns();
    for (row, cells) in sheet.rows() {
        let name = columns.get(cells, key_column);
        if name.is_empty() {
            continue;
        }
        match parse_offsets(columns.get(cells, "ReminderOffsets")) {
            Some(offsets) => {
                target.insert(key(name), offsets);
            }
            None => tracing::warn!(sheet = sheet_name, %row, "skipping malformed reminder offsets"),
        }
    }
    Ok(())
}

/// Parse `"10, 60m"` style lists; `None` if any entry is invalid
pub fn parse_offsets(raw: &str) -> Option<BTreeSet<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.strip_suffix('m')
                .unwrap_or(part)
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|offset| *offset <= MAX_OFFSET_MINUTES)
        })
        .collect()
}
