//! Calendar collaborator interface and the bundled local calendar.
//!
//! The reconciler only talks to [`Calendar`]. Event identity belongs to the
//! calendar: the id cached on a task row may point at an event that no
//! longer exists, which `find_event` reports as `Ok(None)`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::Storage;

/// Failures reported by a calendar collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("event {0} not found")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),
}

impl From<CalendarError> for Error {
    fn from(err: CalendarError) -> Self {
        match err {
            CalendarError::NotFound(id) => Error::StaleExternalReference(id),
            CalendarError::Unavailable(message) => Error::CollaboratorUnavailable(message),
            CalendarError::Timeout(ms) => Error::CollaboratorTimeout(ms),
        }
    }
}

pub type CalendarResult<T> = std::result::Result<T, CalendarError>;

/// When an event happens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventWindow {
    /// Whole days; `end` is exclusive
    AllDay { start: NaiveDate, end: NaiveDate },
    /// Wall-clock times in `timezone`
    Timed {
        start: NaiveDateTime,
        end: NaiveDateTime,
        timezone: String,
    },
}

impl EventWindow {
    pub fn is_all_day(&self) -> bool {
        matches!(self, EventWindow::AllDay { .. })
    }
}

/// Event fields other than title and window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOptions {
    pub description: String,
    /// Minutes before start
    #[serde(default)]
    pub reminders: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Change token, new on every write
    pub etag: String,
    pub calendar_id: String,
    pub title: String,
    pub window: EventWindow,
    #[serde(flatten)]
    pub options: EventOptions,
    pub updated_at: DateTime<Utc>,
}

/// Remote calendar operations consumed by the reconciler
///
/// Calls are blocking; the reconciler runs them off the async runtime and
/// bounds each one with a timeout.
pub trait Calendar: Send + Sync {
    /// `Ok(None)` when no event has this id (deleted remotely or never existed)
    fn find_event(&self, id: &str) -> CalendarResult<Option<Event>>;

    fn create_event(
        &self,
        title: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        timezone: &str,
        options: &EventOptions,
    ) -> CalendarResult<Event>;

    /// `end` is exclusive
    fn create_all_day_event(
        &self,
        title: &str,
        start: NaiveDate,
        end: NaiveDate,
        options: &EventOptions,
    ) -> CalendarResult<Event>;

    fn update_event(
        &self,
        event: &Event,
        title: &str,
        window: &EventWindow,
        options: &EventOptions,
    ) -> CalendarResult<Event>;

    fn delete_event(&self, event: &Event) -> CalendarResult<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CalendarState {
    #[serde(default)]
    revision: u64,
    #[serde(default)]
    events: BTreeMap<String, Event>,
}

impl CalendarState {
    fn next_etag(&mut self) -> String {
        self.revision += 1;
        format!("\"{}\"", self.revision)
    }
}

/// Calendar kept in memory, optionally mirrored to a JSON file
#[derive(Debug)]
pub struct LocalCalendar {
    calendar_id: String,
    state: Mutex<CalendarState>,
    file: Option<(Storage, PathBuf)>,
}

impl LocalCalendar {
    pub fn in_memory(calendar_id: impl Into<String>) -> Self {
        Self {
            calendar_id: calendar_id.into(),
            state: Mutex::new(CalendarState::default()),
            file: None,
        }
    }

    /// Load events from `path` (empty when absent); every write saves them back
    pub fn open(storage: Storage, path: impl Into<PathBuf>, calendar_id: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let state: CalendarState = storage.read_json_or_default(&path)?;
        Ok(Self {
            calendar_id: calendar_id.into(),
            state: Mutex::new(state),
            file: Some((storage, path)),
        })
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|(_, path)| path.as_path())
    }

    /// Snapshot of every stored event, ordered by id
    pub fn events(&self) -> CalendarResult<Vec<Event>> {
        Ok(self.lock()?.events.values().cloned().collect())
    }

    fn lock(&self) -> CalendarResult<MutexGuard<'_, CalendarState>> {
        self.state
            .lock()
            .map_err(|_| CalendarError::Unavailable("calendar state poisoned".to_string()))
    }

    /// Save `next`, then make it the live state; memory is untouched on failure
    fn commit(&self, state: &mut CalendarState, next: CalendarState) -> CalendarResult<()> {
        if let Some((storage, path)) = &self.file {
            storage
                .write_json_locked(path, &next)
                .map_err(|err| CalendarError::Unavailable(err.to_string()))?;
        }
        *state = next;
        Ok(())
    }

    fn insert(&self, title: &str, window: EventWindow, options: &EventOptions) -> CalendarResult<Event> {
        let mut state = self.lock()?;
        let mut next = state.clone();
        let event = Event {
            id: Uuid::new_v4().simple().to_string(),
            etag: next.next_etag(),
            calendar_id: self.calendar_id.clone(),
            title: title.to_string(),
            window,
            options: options.clone(),
            updated_at: Utc::now(),
        };
        next.events.insert(event.id.clone(), event.clone());
        self.commit(&mut state, next)?;
        Ok(event)
    }
}

impl Calendar for LocalCalendar {
    fn find_event(&self, id: &str) -> CalendarResult<Option<Event>> {
        Ok(self.lock()?.events.get(id).cloned())
    }

    fn create_event(
        &self,
        title: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        timezone: &str,
        options: &EventOptions,
    ) -> CalendarResult<Event> {
        if end < start {
            return Err(CalendarError::Unavailable(format!(
                "event ends before it starts ({start} > {end})"
            )));
        }
        let window = EventWindow::Timed {
            start,
            end,
            timezone: timezone.to_string(),
        };
        self.insert(title, window, options)
    }

    fn create_all_day_event(
        &self,
        title: &str,
        start: NaiveDate,
        end: NaiveDate,
        options: &EventOptions,
    ) -> CalendarResult<Event> {
        if end <= start {
            return Err(CalendarError::Unavailable(format!(
                "all-day event needs end after start ({start} >= {end})"
            )));
        }
        self.insert(title, EventWindow::AllDay { start, end }, options)
    }

    fn update_event(
        &self,
        event: &Event,
        title: &str,
        window: &EventWindow,
        options: &EventOptions,
    ) -> CalendarResult<Event> {
        let mut state = self.lock()?;
        let mut next = state.clone();
        let etag = next.next_etag();
        let stored = next
            .events
            .get_mut(&event.id)
            .ok_or_else(|| CalendarError::NotFound(event.id.clone()))?;
        stored.title = title.to_string();
        stored.window = window.clone();
        stored.options = options.clone();
        stored.etag = etag;
        stored.updated_at = Utc::now();
        let updated = stored.clone();
        self.commit(&mut state, next)?;
        Ok(updated)
    }

    fn delete_event(&self, event: &Event) -> CalendarResult<()> {
        let mut state = self.lock()?;
        let mut next = state.clone();
        if next.events.remove(&event.id).is_none() {
            return Err(CalendarError::NotFound(event.id.clone()));
        }
        self.commit(&mut state, next)
    }
}
