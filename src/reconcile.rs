//! Calendar reconciliation.
//!
//! After a task row changes, [`Reconciler::reconcile`] decides whether its
//! calendar event must be created, updated or deleted, performs that call
//! and writes the resulting event reference back onto the row. The cached
//! event id is only written after a confirmed create and only cleared after
//! a confirmed delete (or a confirmed "not found").

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::calendar::{Calendar, CalendarError, CalendarResult, Event, EventOptions, EventWindow};
use crate::config::CalendarConfig;
use crate::error::Result;
use crate::reminder::ReminderPolicy;
use crate::sheet::{RowRef, SYNC_META_SHEET};
use crate::task::{format_timestamp, SyncStamp, Task, TaskStore};

pub const META_LAST_RECONCILE_AT: &str = "last_reconcile_at";
pub const META_CALENDAR_ID: &str = "calendar_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    Created,
    Updated,
    Deleted,
    /// Cached id pointed at an event that no longer exists; id cleared
    ClearedStale,
    Unchanged,
    /// No start date, so there is nothing to place on the calendar
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub row_index: RowRef,
    pub action: ReconcileAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Result of reconciling every row
#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub outcomes: Vec<ReconcileOutcome>,
    pub failures: Vec<ReconcileFailure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileFailure {
    pub row_index: RowRef,
    pub kind: &'static str,
    pub message: String,
}

/// Event window for a task, or `None` without a start date
///
/// Without a start time the event is all-day: the exclusive end is the day
/// after End Date (or after Start Date when no End Date is set). With a start
/// time the end defaults to the start date and start time.
pub fn event_window(task: &Task, default_timezone: &str) -> Option<EventWindow> {
    let start_date = task.start_date?;
    match task.start_time {
        None => {
            let last_day = task
                .end_date
                .filter(|end| *end >= start_date)
                .unwrap_or(start_date);
            let end = last_day.checked_add_days(Days::new(1))?;
            Some(EventWindow::AllDay {
                start: start_date,
                end,
            })
        }
        Some(start_time) => {
            let start = NaiveDateTime::new(start_date, start_time);
            let end_date: NaiveDate = task.end_date.unwrap_or(start_date);
            let end = NaiveDateTime::new(end_date, task.end_time.unwrap_or(start_time)).max(start);
            let timezone = if task.timezone.is_empty() {
                default_timezone.to_string()
            } else {
                task.timezone.clone()
            };
            Some(EventWindow::Timed {
                start,
                end,
                timezone,
            })
        }
    }
}

/// Drives the calendar collaborator for task rows
pub struct Reconciler {
    calendar: Arc<dyn Calendar>,
    calendar_id: String,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(calendar: Arc<dyn Calendar>, config: &CalendarConfig) -> Self {
        Self {
            calendar,
            calendar_id: config.calendar_id.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one blocking collaborator call with the configured timeout
    async fn call<T, F>(&self, op: &'static str, f: F) -> CalendarResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Calendar) -> CalendarResult<T> + Send + 'static,
    {
        let calendar = Arc::clone(&self.calendar);
        let handle = tokio::task::spawn_blocking(move || f(calendar.as_ref()));
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(CalendarError::Unavailable(format!("{op} failed: {join}"))),
            Err(_) => {
                let ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(op, timeout_ms = ms, "calendar call timed out");
                Err(CalendarError::Timeout(ms))
            }
        }
    }

    async fn find(&self, id: &str) -> CalendarResult<Option<Event>> {
        let id = id.to_string();
        self.call("find_event", move |calendar| calendar.find_event(&id))
            .await
    }

    async fn create(&self, title: String, window: EventWindow, options: EventOptions) -> CalendarResult<Event> {
        self.call("create_event", move |calendar| match window {
            EventWindow::AllDay { start, end } => {
                calendar.create_all_day_event(&title, start, end, &options)
            }
            EventWindow::Timed {
                start,
                end,
                timezone,
            } => calendar.create_event(&title, start, end, &timezone, &options),
        })
        .await
    }

    async fn update(
        &self,
        event: Event,
        title: String,
        window: EventWindow,
        options: EventOptions,
    ) -> CalendarResult<Event> {
        self.call("update_event", move |calendar| {
            calendar.update_event(&event, &title, &window, &options)
        })
        .await
    }

    async fn delete(&self, event: Event) -> CalendarResult<()> {
        self.call("delete_event", move |calendar| calendar.delete_event(&event))
            .await
    }

    /// Bring the calendar in line with the task at `row`
    ///
    /// Errors are collaborator or store failures; callers on the request path
    /// log them instead of failing the request.
    pub async fn reconcile(&self, store: &mut TaskStore, row: RowRef) -> Result<ReconcileOutcome> {
        let task = store.get(row)?;
        let cached_id = task.external_event_id.clone();
        let existing = match &cached_id {
            Some(id) => self.find(id).await?,
            None => None,
        };

        let outcome = if task.wants_calendar_event() {
            self.ensure_event(store, &task, existing).await?
        } else {
            self.remove_event(store, &task, existing).await?
        };

        if !matches!(outcome.action, ReconcileAction::Unchanged | ReconcileAction::Skipped)
            || cached_id.is_some()
        {
            self.record_meta(store)?;
        }
        Ok(outcome)
    }

    async fn ensure_event(
        &self,
        store: &mut TaskStore,
        task: &Task,
        existing: Option<Event>,
    ) -> Result<ReconcileOutcome> {
        let row = task.row;
        let Some(window) = event_window(task, &store.config().timezone) else {
            if existing.is_some() || task.external_event_id.is_some() {
                tracing::info!(%row, "task no longer has a start date; removing its event");
                return self.remove_event(store, task, existing).await;
            }
            tracing::warn!(%row, "task has no start date; not placing it on the calendar");
            return Ok(outcome(row, ReconcileAction::Skipped, None));
        };
        let policy = ReminderPolicy::load(&store.config().reminders, store.workbook())?;
        let options = EventOptions {
            description: task.notes.clone(),
            reminders: policy.offsets_for(task),
        };

        if let Some(event) = existing {
            let event_id = event.id.clone();
            match self
                .update(event, task.subject.clone(), window.clone(), options.clone())
                .await
            {
                Ok(updated) => {
                    tracing::info!(%row, event_id = %updated.id, "calendar event updated");
                    self.stamp(store, row, Some(&updated))?;
                    return Ok(outcome(row, ReconcileAction::Updated, Some(updated.id)));
                }
                Err(CalendarError::NotFound(_)) => {
                    tracing::warn!(%row, %event_id, "event vanished before update; recreating");
                }
                Err(err) => return Err(err.into()),
            }
        } else if let Some(stale) = &task.external_event_id {
            tracing::warn!(%row, event_id = %stale, "cached calendar event no longer exists; recreating");
        }

        let created = match self.create(task.subject.clone(), window, options).await {
            Ok(created) => created,
            Err(CalendarError::Timeout(ms)) => {
                tracing::warn!(
                    %row,
                    timeout_ms = ms,
                    "event create timed out; if it still lands the next reconcile creates a duplicate"
                );
                return Err(CalendarError::Timeout(ms).into());
            }
            Err(err) => return Err(err.into()),
        };
        tracing::info!(%row, event_id = %created.id, "calendar event created");
        self.stamp(store, row, Some(&created))?;
        Ok(outcome(row, ReconcileAction::Created, Some(created.id)))
    }

    async fn remove_event(
        &self,
        store: &mut TaskStore,
        task: &Task,
        existing: Option<Event>,
    ) -> Result<ReconcileOutcome> {
        let row = task.row;
        match (existing, &task.external_event_id) {
            (Some(event), _) => {
                let event_id = event.id.clone();
                match self.delete(event).await {
                    Ok(()) => tracing::info!(%row, %event_id, "calendar event deleted"),
                    Err(CalendarError::NotFound(_)) => {
                        tracing::debug!(%row, %event_id, "event already gone")
                    }
                    Err(err) => return Err(err.into()),
                }
                self.stamp(store, row, None)?;
                Ok(outcome(row, ReconcileAction::Deleted, None))
            }
            (None, Some(stale)) => {
                tracing::debug!(%row, event_id = %stale, "clearing stale event reference");
                self.stamp(store, row, None)?;
                Ok(outcome(row, ReconcileAction::ClearedStale, None))
            }
            (None, None) => Ok(outcome(row, ReconcileAction::Unchanged, None)),
        }
    }

    fn stamp(&self, store: &mut TaskStore, row: RowRef, event: Option<&Event>) -> Result<()> {
        store.record_sync(
            row,
            &SyncStamp {
                event_id: event.map(|e| e.id.clone()),
                etag: event.map(|e| e.etag.clone()),
                synced_at: Utc::now(),
            },
        )
    }

    fn record_meta(&self, store: &mut TaskStore) -> Result<()> {
        let workbook = store.workbook_mut();
        workbook.upsert(
            SYNC_META_SHEET,
            1,
            &[
                ("key", META_LAST_RECONCILE_AT.to_string()),
                ("value", format_timestamp(Utc::now())),
            ],
        )?;
        workbook.upsert(
            SYNC_META_SHEET,
            1,
            &[("key", META_CALENDAR_ID.to_string()), ("value", self.calendar_id.clone())],
        )?;
        Ok(())
    }

    /// Reconcile every row, collecting failures instead of stopping
    pub async fn reconcile_all(&self, store: &mut TaskStore) -> Result<ReconcileReport> {
        let rows: Vec<RowRef> = store.list_tasks()?.into_iter().map(|task| task.row).collect();
        let mut report = ReconcileReport::default();
        for row in rows {
            match self.reconcile(store, row).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(err) => {
                    tracing::warn!(%row, error = %err, "reconcile failed");
                    report.failures.push(ReconcileFailure {
                        row_index: row,
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}

fn outcome(row: RowRef, action: ReconcileAction, event_id: Option<String>) -> ReconcileOutcome {
    ReconcileOutcome {
        row_index: row,
        action,
        event_id,
    }
}
