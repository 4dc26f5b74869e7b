//! Recurrence rules and occurrence expansion.
//!
//! A recurring task is never stored per occurrence. Occurrences are computed
//! on demand for a bounded [`DateWindow`] from the parent row plus the sparse
//! overlay tables (done, deleted, edited, split).

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::sheet::{
    format_checkbox, parse_checkbox, RowRef, Workbook, OCCURRENCE_DELETES_SHEET,
    OCCURRENCE_DONE_SHEET, OCCURRENCE_EDITS_SHEET, SPLITS_SHEET,
};
use crate::task::{format_date, format_timestamp, parse_date, Task, TaskFields, COL_RECURRENCE};

/// Longest window a single expansion may cover
pub const MAX_WINDOW_DAYS: i64 = 3660;

const LOCAL_DATE_KEY: &str = "local_date";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// A parsed recurrence rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub frequency: Frequency,
    pub interval: u32,
    /// Weekly rules only; sorted Monday first
    pub weekdays: Vec<Weekday>,
    pub count: Option<u32>,
    pub until: Option<NaiveDate>,
}

impl Rule {
    fn every(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval,
            weekdays: Vec::new(),
            count: None,
            until: None,
        }
    }

    /// Parse a textual or RRULE-style rule
    ///
    /// Accepted forms: `daily`, `weekly`, `monthly`, `yearly`, `weekdays`,
    /// `every 2 weeks`, `every:3d`, `weekly:mon,wed` and
    /// `FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,TH;COUNT=6` (optionally prefixed
    /// with `RRULE:`).
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty rule"));
        }
        let rule = if trimmed.contains('=') {
            parse_rrule(trimmed)?
        } else {
            parse_text(&trimmed.to_ascii_lowercase())?
        };
        if rule.interval == 0 {
            return Err(invalid("interval must be at least 1"));
        }
        if !rule.weekdays.is_empty() && rule.frequency != Frequency::Weekly {
            return Err(invalid("weekdays are only allowed on weekly rules"));
        }
        Ok(rule)
    }

    /// Candidate dates anchored at `anchor`, ascending and unbounded
    /// unless the rule carries `COUNT` or `UNTIL`
    pub fn dates_from(&self, anchor: NaiveDate) -> impl Iterator<Item = NaiveDate> {
        let until = self.until;
        let limit = self.count.map(|count| count as usize).unwrap_or(usize::MAX);
        RuleDates {
            rule: self.clone(),
            anchor,
            period: 0,
            pending: VecDeque::new(),
            exhausted: false,
        }
        .take(limit)
        .take_while(move |date| until.map_or(true, |until| *date <= until))
    }
}

impl FromStr for Rule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Rule::parse(s)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::invalid_field(COL_RECURRENCE, message)
}

fn parse_text(rule: &str) -> Result<Rule> {
    match rule {
        "daily" | "every day" => return Ok(Rule::every(Frequency::Daily, 1)),
        "weekly" | "every week" => return Ok(Rule::every(Frequency::Weekly, 1)),
        "monthly" | "every month" => return Ok(Rule::every(Frequency::Monthly, 1)),
        "yearly" | "annually" | "every year" => return Ok(Rule::every(Frequency::Yearly, 1)),
        "weekdays" | "every weekday" => {
            let mut weekly = Rule::every(Frequency::Weekly, 1);
            weekly.weekdays = vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ];
            return Ok(weekly);
        }
        _ => {}
    }

    if let Some(days) = rule.strip_prefix("weekly:") {
        let mut weekly = Rule::every(Frequency::Weekly, 1);
        weekly.weekdays = parse_weekdays(days.split(','))?;
        return Ok(weekly);
    }

    if let Some(step) = rule.strip_prefix("every:") {
        let step = step.trim();
        let split = step
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| invalid(format!("missing unit in 'every:{step}'")))?;
        let (count, unit) = step.split_at(split);
        let frequency = match unit {
            "d" => Frequency::Daily,
            "w" => Frequency::Weekly,
            "m" => Frequency::Monthly,
            "y" => Frequency::Yearly,
            other => return Err(invalid(format!("unknown unit '{other}' (expected d, w, m or y)"))),
        };
        return Ok(Rule::every(frequency, parse_interval(count)?));
    }

    if let Some(rest) = rule.strip_prefix("every ") {
        let mut words = rest.split_whitespace();
        if let (Some(count), Some(unit), None) = (words.next(), words.next(), words.next()) {
            let frequency = match unit.trim_end_matches('s') {
                "day" => Frequency::Daily,
                "week" => Frequency::Weekly,
                "month" => Frequency::Monthly,
                "year" => Frequency::Yearly,
                other => return Err(invalid(format!("unknown unit '{other}'"))),
            };
            return Ok(Rule::every(frequency, parse_interval(count)?));
        }
    }

    Err(invalid(format!("unrecognized rule '{rule}'")))
}

fn parse_rrule(raw: &str) -> Result<Rule> {
    let body = match raw.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("rrule:") => &raw[6..],
        _ => raw,
    };

    let mut frequency = None;
    let mut rule = Rule::every(Frequency::Daily, 1);
    for part in body.split(';').map(str::trim).filter(|part| !part.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| invalid(format!("expected KEY=VALUE, got '{part}'")))?;
        let value = value.trim();
        match key.trim().to_ascii_uppercase().as_str() {
            "FREQ" => {
                frequency = Some(match value.to_ascii_uppercase().as_str() {
                    "DAILY" => Frequency::Daily,
                    "WEEKLY" => Frequency::Weekly,
                    "MONTHLY" => Frequency::Monthly,
                    "YEARLY" => Frequency::Yearly,
                    other => return Err(invalid(format!("unsupported FREQ '{other}'"))),
                })
            }
            "INTERVAL" => rule.interval = parse_interval(value)?,
            "COUNT" => {
                let count = parse_interval(value)
                    .map_err(|_| invalid(format!("COUNT must be a positive number, got '{value}'")))?;
                rule.count = Some(count);
            }
            "UNTIL" => {
                let date = value.get(..8).unwrap_or(value);
                rule.until = Some(
                    NaiveDate::parse_from_str(date, "%Y%m%d")
                        .map_err(|_| invalid(format!("UNTIL must be YYYYMMDD, got '{value}'")))?,
                );
            }
            "BYDAY" => rule.weekdays = parse_weekdays(value.split(','))?,
            "WKST" => {}
            other => return Err(invalid(format!("unsupported rule part '{other}'"))),
        }
    }
    rule.frequency = frequency.ok_or_else(|| invalid("missing FREQ"))?;
    Ok(rule)
}

fn parse_interval(raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(format!("'{}' is not a positive interval", raw.trim()))),
    }
}

fn parse_weekdays<'a>(names: impl Iterator<Item = &'a str>) -> Result<Vec<Weekday>> {
    let mut days = Vec::new();
    for name in names.map(str::trim).filter(|name| !name.is_empty()) {
        let day = match name.to_ascii_lowercase().get(..2) {
            Some("mo") => Weekday::Mon,
            Some("tu") => Weekday::Tue,
            Some("we") => Weekday::Wed,
            Some("th") => Weekday::Thu,
            Some("fr") => Weekday::Fri,
            Some("sa") => Weekday::Sat,
            Some("su") => Weekday::Sun,
            _ => return Err(invalid(format!("unknown weekday '{name}'"))),
        };
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err(invalid("no weekdays given"));
    }
    days.sort_by_key(|day| day.num_days_from_monday());
    Ok(days)
}

/// Unbounded date generator behind [`Rule::dates_from`]
struct RuleDates {
    rule: Rule,
    anchor: NaiveDate,
    period: u32,
    pending: VecDeque<NaiveDate>,
    exhausted: bool,
}

impl RuleDates {
    fn period_dates(&self, period: u32) -> Option<Vec<NaiveDate>> {
        let step = period.checked_mul(self.rule.interval)?;
        let anchor = self.anchor;
        let dates = match self.rule.frequency {
            Frequency::Daily => vec![anchor.checked_add_days(Days::new(step.into()))?],
            Frequency::Weekly if self.rule.weekdays.is_empty() => {
                vec![anchor.checked_add_days(Days::new(u64::from(step) * 7))?]
            }
            Frequency::Weekly => {
                let monday = anchor
                    .checked_sub_days(Days::new(anchor.weekday().num_days_from_monday().into()))?
                    .checked_add_days(Days::new(u64::from(step) * 7))?;
                let mut dates = Vec::with_capacity(self.rule.weekdays.len());
                for day in &self.rule.weekdays {
                    dates.push(monday.checked_add_days(Days::new(day.num_days_from_monday().into()))?);
                }
                dates
            }
            Frequency::Monthly => vec![add_months(anchor, step)?],
            Frequency::Yearly => vec![add_months(anchor, step.checked_mul(12)?)?],
        };
        Some(dates)
    }
}

impl Iterator for RuleDates {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        loop {
            if let Some(date) = self.pending.pop_front() {
                return Some(date);
            }
            if self.exhausted {
                return None;
            }
            match self.period_dates(self.period) {
                Some(dates) => {
                    let anchor = self.anchor;
                    self.pending.extend(dates.into_iter().filter(|date| *date >= anchor));
                }
                None => self.exhausted = true,
            }
            match self.period.checked_add(1) {
                Some(next) => self.period = next,
                None => self.exhausted = true,
            }
        }
    }
}

/// Add calendar months, clamping the anchor's day to the target month
fn add_months(anchor: NaiveDate, months: u32) -> Option<NaiveDate> {
    let total = i64::from(anchor.year()) * 12 + i64::from(anchor.month0()) + i64::from(months);
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = u32::try_from(total.rem_euclid(12)).ok()? + 1;
    let day = anchor.day().min(days_in_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day)
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year.checked_add(1)?, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from((next - first).num_days()).ok()
}

/// Inclusive date range an expansion is bounded by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if to < from {
            return Err(Error::invalid_field("to", format!("{to} is before {from}")));
        }
        if (to - from).num_days() > MAX_WINDOW_DAYS {
            return Err(Error::invalid_field(
                "to",
                format!("window is longer than {MAX_WINDOW_DAYS} days"),
            ));
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.from, self.to)
    }
}

type OccurrenceKey = (String, NaiveDate);

/// Per-occurrence exceptions, indexed for lookup during expansion
#[derive(Debug, Clone, Default)]
pub struct Overlays {
    done: HashMap<OccurrenceKey, bool>,
    deletes: HashSet<OccurrenceKey>,
    edits: HashMap<OccurrenceKey, TaskFields>,
    /// original task id -> (split date, new task id), ascending by date
    splits: HashMap<String, Vec<(NaiveDate, String)>>,
}

impl Overlays {
    /// Read every overlay table; malformed rows are logged and skipped
    pub fn load(workbook: &Workbook) -> Result<Self> {
        let mut overlays = Self::default();

        let sheet = workbook.sheet(OCCURRENCE_DONE_SHEET)?;
        let columns = sheet.columns();
        for (row, cells) in sheet.rows() {
            let id = columns.get(cells, "recurrence_id");
            match overlay_key(id, columns.get(cells, "local_date")) {
                Some(key) => {
                    overlays
                        .done
                        .insert(key, parse_checkbox(columns.get(cells, "is_done")));
                }
                None => skip(OCCURRENCE_DONE_SHEET, row),
            }
        }

        let sheet = workbook.sheet(OCCURRENCE_DELETES_SHEET)?;
        let columns = sheet.columns();
        for (row, cells) in sheet.rows() {
            let id = columns.get(cells, "recurrence_id");
            match overlay_key(id, columns.get(cells, "local_date")) {
                Some(key) => {
                    overlays.deletes.insert(key);
                }
                None => skip(OCCURRENCE_DELETES_SHEET, row),
            }
        }

        let sheet = workbook.sheet(OCCURRENCE_EDITS_SHEET)?;
        let columns = sheet.columns();
        for (row, cells) in sheet.rows() {
            let id = columns.get(cells, "recurrence_id");
            match parse_edit(columns.get(cells, "fields_json")) {
                Some((date, fields)) if !id.is_empty() => {
                    overlays.edits.insert((id.to_string(), date), fields);
                }
                _ => skip(OCCURRENCE_EDITS_SHEET, row),
            }
        }

        let sheet = workbook.sheet(SPLITS_SHEET)?;
        let columns = sheet.columns();
        for (row, cells) in sheet.rows() {
            let original = columns.get(cells, "original_task_id");
            let target = columns.get(cells, "new_task_id");
            match overlay_key(original, columns.get(cells, "split_at")) {
                Some((original, split_at)) if !target.is_empty() => overlays
                    .splits
                    .entry(original)
                    .or_default()
                    .push((split_at, target.to_string())),
                _ => skip(SPLITS_SHEET, row),
            }
        }
        for splits in overlays.splits.values_mut() {
            splits.sort();
        }

        Ok(overlays)
    }

    pub fn is_deleted(&self, task_id: &str, date: NaiveDate) -> bool {
        self.deletes.contains(&(task_id.to_string(), date))
    }

    pub fn done(&self, task_id: &str, date: NaiveDate) -> Option<bool> {
        self.done.get(&(task_id.to_string(), date)).copied()
    }

    pub fn edit(&self, task_id: &str, date: NaiveDate) -> Option<&TaskFields> {
        self.edits.get(&(task_id.to_string(), date))
    }

    /// Latest split of `task_id` taking effect on or before `date`
    pub fn split_target(&self, task_id: &str, date: NaiveDate) -> Option<&str> {
        self.splits
            .get(task_id)?
            .iter()
            .rev()
            .find(|(split_at, _)| *split_at <= date)
            .map(|(_, target)| target.as_str())
    }

    /// Whether `task_id` continues another series
    pub fn is_split_target(&self, task_id: &str) -> bool {
        self.splits
            .values()
            .flatten()
            .any(|(_, target)| target == task_id)
    }
}

fn overlay_key(id: &str, date: &str) -> Option<OccurrenceKey> {
    if id.is_empty() {
        return None;
    }
    let date = parse_date(LOCAL_DATE_KEY, date).ok()?;
    Some((id.to_string(), date))
}

fn parse_edit(raw: &str) -> Option<(NaiveDate, TaskFields)> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let date = parse_date(LOCAL_DATE_KEY, object.get(LOCAL_DATE_KEY)?.as_str()?).ok()?;
    let fields = TaskFields::from_json(object).ok()?;
    Some((date, fields))
}

fn skip(sheet: &str, row: RowRef) {
    tracing::warn!(sheet, %row, "skipping malformed overlay row");
}

/// Mark one occurrence done or not done
pub fn record_done(
    workbook: &mut Workbook,
    task_id: &str,
    date: NaiveDate,
    is_done: bool,
    now: DateTime<Utc>,
) -> Result<RowRef> {
    workbook.upsert(
        OCCURRENCE_DONE_SHEET,
        2,
        &[
            ("recurrence_id", task_id.to_string()),
            ("local_date", format_date(date)),
            ("is_done", format_checkbox(is_done)),
            ("updated_at", format_timestamp(now)),
        ],
    )
}

/// Drop one occurrence from its series
pub fn record_delete(
    workbook: &mut Workbook,
    task_id: &str,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<RowRef> {
    workbook.upsert(
        OCCURRENCE_DELETES_SHEET,
        2,
        &[
            ("recurrence_id", task_id.to_string()),
            ("local_date", format_date(date)),
            ("updated_at", format_timestamp(now)),
        ],
    )
}

/// Store field overrides for one occurrence, replacing earlier ones
pub fn record_edit(
    workbook: &mut Workbook,
    task_id: &str,
    date: NaiveDate,
    fields: &TaskFields,
    now: DateTime<Utc>,
) -> Result<RowRef> {
    let mut payload = fields.to_json();
    payload.insert(LOCAL_DATE_KEY.to_string(), Value::String(format_date(date)));
    let values = [
        ("recurrence_id", task_id.to_string()),
        ("fields_json", Value::Object(payload).to_string()),
        ("updated_at", format_timestamp(now)),
    ];

    let sheet = workbook.sheet_mut(OCCURRENCE_EDITS_SHEET)?;
    let columns = sheet.columns();
    let existing = sheet.rows().find_map(|(row, cells)| {
        let same_task = columns.get(cells, "recurrence_id") == task_id;
        let same_date = parse_edit(columns.get(cells, "fields_json"))
            .is_some_and(|(edited, _)| edited == date);
        (same_task && same_date).then_some(row)
    });
    match existing {
        Some(row) => {
            let cells = columns.layout(sheet.read_row(row), &values)?;
            sheet.write_row(row, cells)?;
            Ok(row)
        }
        None => {
            let cells = columns.layout(None, &values)?;
            Ok(sheet.append_row(cells))
        }
    }
}

/// Redirect `original`'s occurrences from `split_at` on to `new_task`
pub fn record_split(
    workbook: &mut Workbook,
    original: &str,
    split_at: NaiveDate,
    new_task: &str,
) -> Result<RowRef> {
    workbook.upsert(
        SPLITS_SHEET,
        2,
        &[
            ("original_task_id", original.to_string()),
            ("split_at", format_date(split_at)),
            ("new_task_id", new_task.to_string()),
        ],
    )
}

/// One concrete instance of a task on a local date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occurrence {
    /// Task whose fields (and overlays) this occurrence uses
    #[serde(rename = "recurrenceId")]
    pub recurrence_id: String,
    /// Task whose rule produced the date
    #[serde(rename = "seriesId")]
    pub series_id: String,
    #[serde(rename = "localDate")]
    pub local_date: NaiveDate,
    #[serde(rename = "isEdited")]
    pub is_edited: bool,
    pub task: Task,
}

/// Expands tasks against the overlay tables
#[derive(Debug)]
pub struct Expander<'a> {
    tasks: HashMap<&'a str, &'a Task>,
    overlays: &'a Overlays,
}

impl<'a> Expander<'a> {
    pub fn new(tasks: &'a [Task], overlays: &'a Overlays) -> Self {
        let tasks = tasks
            .iter()
            .filter(|task| !task.task_id.is_empty())
            .map(|task| (task.task_id.as_str(), task))
            .collect();
        Self { tasks, overlays }
    }

    /// Lazily expand one task over `window`
    ///
    /// A task without a rule yields at most its start date. A soft-deleted
    /// task or one without a start date yields nothing.
    pub fn expand(&self, task: &Task, window: DateWindow) -> Result<Occurrences<'_>> {
        let rule = task.recurrence.as_deref().map(Rule::parse).transpose()?;
        let candidates: Box<dyn Iterator<Item = NaiveDate>> =
            match (task.start_date, task.marked_for_deletion) {
                (Some(start), false) => match rule {
                    Some(rule) => {
                        let limit = task.repeat_count.map(|n| n as usize).unwrap_or(usize::MAX);
                        Box::new(rule.dates_from(start).take(limit))
                    }
                    None => Box::new(std::iter::once(start)),
                },
                _ => Box::new(std::iter::empty()),
            };
        let candidates = candidates
            .skip_while(move |date| *date < window.from)
            .take_while(move |date| *date <= window.to);
        Ok(Occurrences {
            expander: self,
            origin: task.clone(),
            candidates: Box::new(candidates),
        })
    }

    /// Every occurrence in `window` across all series, ordered by date
    ///
    /// Tasks continuing a split series are reached through their original
    /// and not expanded twice; once the original is deleted they expand on
    /// their own. Tasks with unparseable rules are skipped.
    pub fn expand_all(&self, tasks: &[Task], window: DateWindow) -> Vec<Occurrence> {
        let mut occurrences = Vec::new();
        for task in tasks {
            if self.continues_live_series(task) {
                continue;
            }
            match self.expand(task, window) {
                Ok(expanded) => occurrences.extend(expanded),
                Err(err) => {
                    tracing::warn!(row = %task.row, error = %err, "skipping task with invalid recurrence")
                }
            }
        }
        occurrences.sort_by(|a, b| {
            (a.local_date, &a.series_id).cmp(&(b.local_date, &b.series_id))
        });
        occurrences
    }

    fn continues_live_series(&self, task: &Task) -> bool {
        self.overlays.splits.iter().any(|(original, splits)| {
            splits.iter().any(|(_, target)| *target == task.task_id)
                && self
                    .tasks
                    .get(original.as_str())
                    .is_some_and(|original| !original.marked_for_deletion)
        })
    }

    /// Follow split records from `origin` to the task owning `date`
    ///
    /// `None` means the owning task was soft-deleted.
    fn effective_parent<'t>(&'t self, origin: &'t Task, date: NaiveDate) -> Option<&'t Task> {
        let mut current = origin;
        let mut seen = HashSet::new();
        while seen.insert(current.task_id.as_str()) {
            let Some(target_id) = self.overlays.split_target(&current.task_id, date) else {
                break;
            };
            match self.tasks.get(target_id) {
                Some(target) => current = *target,
                None => {
                    tracing::warn!(
                        task_id = %current.task_id,
                        target = target_id,
                        "split target missing; keeping original fields"
                    );
                    break;
                }
            }
        }
        (!current.marked_for_deletion || current.task_id == origin.task_id).then_some(current)
    }

    fn resolve(&self, origin: &Task, date: NaiveDate) -> Option<Occurrence> {
        let parent = self.effective_parent(origin, date)?;
        let id = parent.task_id.as_str();
        if self.overlays.is_deleted(id, date) {
            return None;
        }

        let mut task = parent.clone();
        if let Some(start) = parent.start_date {
            task.end_date = parent.end_date.and_then(|end| {
                let span = Days::new(u64::try_from((end - start).num_days()).ok()?);
                date.checked_add_days(span)
            });
        }
        task.start_date = Some(date);

        let edit = self.overlays.edit(id, date);
        if let Some(fields) = edit {
            task.apply_fields(fields);
        }
        if let Some(done) = self.overlays.done(id, date) {
            task.is_completed = done;
        }

        Some(Occurrence {
            recurrence_id: id.to_string(),
            series_id: origin.task_id.clone(),
            local_date: date,
            is_edited: edit.is_some(),
            task,
        })
    }
}

/// Lazy, ascending occurrences of one series
pub struct Occurrences<'e> {
    expander: &'e Expander<'e>,
    origin: Task,
    candidates: Box<dyn Iterator<Item = NaiveDate> + 'e>,
}

impl Iterator for Occurrences<'_> {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        loop {
            let date = self.candidates.next()?;
            if let Some(occurrence) = self.expander.resolve(&self.origin, date) {
                return Some(occurrence);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
    }

    fn window(from: &str, to: &str) -> DateWindow {
        DateWindow::new(date(from), date(to)).expect("window")
    }

    fn dates(rule: &str, anchor: &str, n: usize) -> Vec<String> {
        Rule::parse(rule)
            .expect("rule")
            .dates_from(date(anchor))
            .take(n)
            .map(format_date)
            .collect()
    }

    fn task(id: &str, start: &str, rule: Option<&str>) -> Task {
        Task {
            row: RowRef(2),
            subject: format!("task {id}"),
            start_date: Some(date(start)),
            recurrence: rule.map(str::to_string),
            task_id: id.to_string(),
            notes: "parent notes".to_string(),
            row_version: 1,
            ..Task::default()
        }
    }

    #[test]
    fn textual_rules_parse() {
        assert_eq!(Rule::parse("Daily").expect("daily"), Rule::every(Frequency::Daily, 1));
        assert_eq!(
            Rule::parse("every 2 weeks").expect("every"),
            Rule::every(Frequency::Weekly, 2)
        );
        assert_eq!(
            Rule::parse("every:3d").expect("every:"),
            Rule::every(Frequency::Daily, 3)
        );
        let weekly = Rule::parse("weekly:fri,mon,Wednesday").expect("weekly:");
        assert_eq!(weekly.weekdays, vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]);
    }

    #[test]
    fn rrule_parses_all_parts() {
        let rule = Rule::parse("RRULE:FREQ=WEEKLY;INTERVAL=2;BYDAY=TU,TH;COUNT=5").expect("rrule");
        assert_eq!(rule.frequency, Frequency::Weekly);
        assert_eq!(rule.interval, 2);
        assert_eq!(rule.weekdays, vec![Weekday::Tue, Weekday::Thu]);
        assert_eq!(rule.count, Some(5));

        let until = Rule::parse("freq=daily;until=20240405").expect("until");
        assert_eq!(until.until, Some(date("2024-04-05")));
    }

    #[test]
    fn bad_rules_are_invalid_fields() {
        for raw in ["", "sometimes", "every 0 days", "every:5q", "FREQ=HOURLY", "INTERVAL=2", "FREQ=DAILY;BYDAY=MO", "weekly:funday"] {
            let err = Rule::parse(raw).unwrap_err();
            assert!(
                matches!(err, Error::InvalidField { ref field, .. } if field == COL_RECURRENCE),
                "{raw}: {err}"
            );
        }
    }

    #[test]
    fn daily_and_weekly_steps() {
        assert_eq!(
            dates("every 2 days", "2024-02-27", 3),
            vec!["2024-02-27", "2024-02-29", "2024-03-02"]
        );
        assert_eq!(
            dates("weekly", "2024-04-01", 3),
            vec!["2024-04-01", "2024-04-08", "2024-04-15"]
        );
    }

    #[test]
    fn weekly_by_day_starts_at_anchor() {
        // 2024-04-03 is a Wednesday: the Monday of that week is skipped.
        assert_eq!(
            dates("weekly:mon,wed,fri", "2024-04-03", 4),
            vec!["2024-04-03", "2024-04-05", "2024-04-08", "2024-04-10"]
        );
        assert_eq!(
            dates("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO", "2024-04-01", 3),
            vec!["2024-04-01", "2024-04-15", "2024-04-29"]
        );
    }

    #[test]
    fn monthly_clamps_to_month_end_from_anchor() {
        assert_eq!(
            dates("monthly", "2024-01-31", 4),
            vec!["2024-01-31", "2024-02-29", "2024-03-31", "2024-04-30"]
        );
        assert_eq!(
            dates("yearly", "2024-02-29", 3),
            vec!["2024-02-29", "2025-02-28", "2026-02-28"]
        );
    }

    #[test]
    fn count_and_until_bound_rules() {
        assert_eq!(dates("FREQ=DAILY;COUNT=2", "2024-04-01", 10).len(), 2);
        assert_eq!(
            dates("FREQ=DAILY;UNTIL=20240403", "2024-04-01", 10),
            vec!["2024-04-01", "2024-04-02", "2024-04-03"]
        );
    }

    #[test]
    fn window_is_validated() {
        assert!(DateWindow::new(date("2024-04-02"), date("2024-04-01")).is_err());
        assert!(DateWindow::new(date("2000-01-01"), date("2030-01-01")).is_err());
        let window = window("2024-04-01", "2024-04-01");
        assert!(window.contains(date("2024-04-01")));
        assert!(!window.contains(date("2024-04-02")));
    }

    #[test]
    fn expansion_is_windowed_and_restartable() {
        let tasks = vec![task("A", "2024-04-01", Some("daily"))];
        let overlays = Overlays::default();
        let expander = Expander::new(&tasks, &overlays);
        let window = window("2024-04-10", "2024-04-12");

        let first: Vec<NaiveDate> = expander
            .expand(&tasks[0], window)
            .expect("expand")
            .map(|o| o.local_date)
            .collect();
        let second: Vec<NaiveDate> = expander
            .expand(&tasks[0], window)
            .expect("expand")
            .map(|o| o.local_date)
            .collect();
        assert_eq!(first, vec![date("2024-04-10"), date("2024-04-11"), date("2024-04-12")]);
        assert_eq!(first, second);
    }

    #[test]
    fn repeat_count_counts_occurrences_before_window() {
        let mut series = task("A", "2024-04-01", Some("FREQ=DAILY;COUNT=10"));
        series.repeat_count = Some(5);
        let tasks = vec![series];
        let overlays = Overlays::default();
        let expander = Expander::new(&tasks, &overlays);

        let dates: Vec<NaiveDate> = expander
            .expand(&tasks[0], window("2024-04-04", "2024-04-30"))
            .expect("expand")
            .map(|o| o.local_date)
            .collect();
        assert_eq!(dates, vec![date("2024-04-04"), date("2024-04-05")]);
    }

    #[test]
    fn single_tasks_and_deleted_tasks() {
        let mut deleted = task("B", "2024-04-02", Some("daily"));
        deleted.marked_for_deletion = true;
        let tasks = vec![task("A", "2024-04-02", None), deleted];
        let overlays = Overlays::default();
        let expander = Expander::new(&tasks, &overlays);

        let inside = window("2024-04-01", "2024-04-03");
        assert_eq!(expander.expand(&tasks[0], inside).expect("single").count(), 1);
        let outside = window("2024-04-03", "2024-04-05");
        assert_eq!(expander.expand(&tasks[0], outside).expect("single").count(), 0);
        assert_eq!(expander.expand(&tasks[1], inside).expect("deleted").count(), 0);
    }

    #[test]
    fn overlays_apply_with_precedence() {
        let mut workbook = Workbook::standard();
        let now = Utc::now();
        let d = date("2024-04-01");
        let d7 = date("2024-04-08");
        let d14 = date("2024-04-15");
        record_delete(&mut workbook, "A", d, now).expect("delete");
        let edit = TaskFields {
            subject: Some("Moved standup".to_string()),
            ..TaskFields::default()
        };
        record_edit(&mut workbook, "A", d7, &edit, now).expect("edit");
        record_done(&mut workbook, "A", d7, true, now).expect("done");
        // Done alone on a deleted date changes nothing.
        record_done(&mut workbook, "A", d, true, now).expect("done");
        record_done(&mut workbook, "A", d14, false, now).expect("done");

        let tasks = vec![task("A", "2024-04-01", Some("weekly"))];
        let overlays = Overlays::load(&workbook).expect("overlays");
        let expander = Expander::new(&tasks, &overlays);
        let occurrences: Vec<Occurrence> = expander
            .expand(&tasks[0], window("2024-04-01", "2024-04-15"))
            .expect("expand")
            .collect();

        assert_eq!(occurrences.len(), 2);
        let edited = &occurrences[0];
        assert_eq!(edited.local_date, d7);
        assert_eq!(edited.task.subject, "Moved standup");
        assert_eq!(edited.task.notes, "parent notes");
        assert_eq!(edited.task.start_date, Some(d7));
        assert!(edited.task.is_completed);
        assert!(edited.is_edited);
        assert!(!occurrences[1].task.is_completed);
        assert!(!occurrences[1].is_edited);
    }

    #[test]
    fn repeated_edits_replace_the_overlay() {
        let mut workbook = Workbook::standard();
        let now = Utc::now();
        let d = date("2024-04-01");
        for subject in ["first", "second"] {
            let edit = TaskFields {
                subject: Some(subject.to_string()),
                ..TaskFields::default()
            };
            record_edit(&mut workbook, "A", d, &edit, now).expect("edit");
        }
        assert_eq!(workbook.sheet(OCCURRENCE_EDITS_SHEET).expect("edits").len(), 1);
        let overlays = Overlays::load(&workbook).expect("overlays");
        assert_eq!(
            overlays.edit("A", d).and_then(|f| f.subject.as_deref()),
            Some("second")
        );
    }

    #[test]
    fn malformed_overlay_rows_are_skipped() {
        let mut workbook = Workbook::standard();
        let sheet = workbook.sheet_mut(OCCURRENCE_EDITS_SHEET).expect("edits");
        sheet.append_row(vec!["A".to_string(), "not json".to_string(), String::new()]);
        sheet.append_row(vec![
            "A".to_string(),
            json!({ "Subject": "no date" }).to_string(),
            String::new(),
        ]);
        workbook
            .sheet_mut(OCCURRENCE_DONE_SHEET)
            .expect("done")
            .append_row(vec!["A".to_string(), "someday".to_string(), "TRUE".to_string()]);

        let overlays = Overlays::load(&workbook).expect("overlays");
        assert!(overlays.edits.is_empty());
        assert!(overlays.done.is_empty());
    }

    #[test]
    fn split_redirects_later_occurrences() {
        let mut workbook = Workbook::standard();
        let split_at = date("2024-04-15");
        record_split(&mut workbook, "A", split_at, "B").expect("split");
        record_delete(&mut workbook, "B", date("2024-04-22"), Utc::now()).expect("delete");

        let original = task("A", "2024-04-01", Some("weekly"));
        let mut successor = task("B", "2024-04-15", Some("weekly"));
        successor.subject = "Renamed".to_string();
        let tasks = vec![original, successor];
        let overlays = Overlays::load(&workbook).expect("overlays");
        let expander = Expander::new(&tasks, &overlays);

        let all = expander.expand_all(&tasks, window("2024-04-01", "2024-04-29"));
        let summary: Vec<(String, &str)> = all
            .iter()
            .map(|o| (format_date(o.local_date), o.task.subject.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("2024-04-01".to_string(), "task A"),
                ("2024-04-08".to_string(), "task A"),
                ("2024-04-15".to_string(), "Renamed"),
                ("2024-04-29".to_string(), "Renamed"),
            ]
        );
        assert_eq!(all[2].recurrence_id, "B");
        assert_eq!(all[2].series_id, "A");
        assert!(overlays.is_split_target("B"));
    }

    #[test]
    fn split_into_deleted_task_ends_the_series() {
        let mut workbook = Workbook::standard();
        record_split(&mut workbook, "A", date("2024-04-08"), "B").expect("split");
        let mut successor = task("B", "2024-04-08", Some("weekly"));
        successor.marked_for_deletion = true;
        let tasks = vec![task("A", "2024-04-01", Some("weekly")), successor];
        let overlays = Overlays::load(&workbook).expect("overlays");
        let expander = Expander::new(&tasks, &overlays);

        let dates: Vec<NaiveDate> = expander
            .expand(&tasks[0], window("2024-04-01", "2024-04-30"))
            .expect("expand")
            .map(|o| o.local_date)
            .collect();
        assert_eq!(dates, vec![date("2024-04-01")]);
    }

    #[test]
    fn deleted_original_lets_successor_expand_alone() {
        let mut workbook = Workbook::standard();
        record_split(&mut workbook, "A", date("2024-04-15"), "B").expect("split");
        let mut original = task("A", "2024-04-01", Some("weekly"));
        original.marked_for_deletion = true;
        let tasks = vec![original, task("B", "2024-04-15", Some("weekly"))];
        let overlays = Overlays::load(&workbook).expect("overlays");
        let expander = Expander::new(&tasks, &overlays);

        let all = expander.expand_all(&tasks, window("2024-04-01", "2024-04-29"));
        let dates: Vec<String> = all.iter().map(|o| format_date(o.local_date)).collect();
        assert_eq!(dates, vec!["2024-04-15", "2024-04-22", "2024-04-29"]);
        assert!(all.iter().all(|o| o.series_id == "B" && o.recurrence_id == "B"));
    }

    #[test]
    fn multi_day_tasks_keep_their_span() {
        let mut series = task("A", "2024-04-01", Some("weekly"));
        series.end_date = Some(date("2024-04-03"));
        let tasks = vec![series];
        let overlays = Overlays::default();
        let expander = Expander::new(&tasks, &overlays);
        let occurrence = expander
            .expand(&tasks[0], window("2024-04-08", "2024-04-08"))
            .expect("expand")
            .next()
            .expect("occurrence");
        assert_eq!(occurrence.task.end_date, Some(date("2024-04-10")));
    }
}
