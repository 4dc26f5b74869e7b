#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use taskcal::calendar::{
    Calendar, CalendarError, CalendarResult, Event, EventOptions, EventWindow, LocalCalendar,
};
use taskcal::config::Config;
use taskcal::dispatch::{Action, Dispatcher, Request, Response};
use taskcal::reconcile::Reconciler;
use taskcal::sheet::{RowRef, Workbook};
use taskcal::task::TaskStore;

/// Calendar double that records every call and can be made to fail or stall
pub struct RecordingCalendar {
    inner: LocalCalendar,
    calls: Mutex<Vec<&'static str>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl RecordingCalendar {
    pub fn new() -> Self {
        Self {
            inner: LocalCalendar::in_memory("primary"),
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            delay: Mutex::new(None),
        }
    }

    /// Direct access, bypassing the recording (simulates edits made elsewhere)
    pub fn inner(&self) -> &LocalCalendar {
        &self.inner
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|call| **call == op).count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().expect("calls").clear();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().expect("delay") = delay;
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.events().expect("events")
    }

    fn enter(&self, op: &'static str) -> CalendarResult<()> {
        self.calls.lock().expect("calls").push(op);
        let delay = *self.delay.lock().expect("delay");
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CalendarError::Unavailable("calendar offline".to_string()));
        }
        Ok(())
    }
}

impl Calendar for RecordingCalendar {
    fn find_event(&self, id: &str) -> CalendarResult<Option<Event>> {
        self.enter("find_event")?;
        self.inner.find_event(id)
    }

    fn create_event(
        &self,
        title: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        timezone: &str,
        options: &EventOptions,
    ) -> CalendarResult<Event> {
        self.enter("create_event")?;
        self.inner.create_event(title, start, end, timezone, options)
    }

    fn create_all_day_event(
        &self,
        title: &str,
        start: NaiveDate,
        end: NaiveDate,
        options: &EventOptions,
    ) -> CalendarResult<Event> {
        self.enter("create_all_day_event")?;
        self.inner.create_all_day_event(title, start, end, options)
    }

    fn update_event(
        &self,
        event: &Event,
        title: &str,
        window: &EventWindow,
        options: &EventOptions,
    ) -> CalendarResult<Event> {
        self.enter("update_event")?;
        self.inner.update_event(event, title, window, options)
    }

    fn delete_event(&self, event: &Event) -> CalendarResult<()> {
        self.enter("delete_event")?;
        self.inner.delete_event(event)
    }
}

/// In-memory dispatcher wired to a recording calendar
pub fn harness(config: Config) -> (Dispatcher, Arc<RecordingCalendar>) {
    let calendar = Arc::new(RecordingCalendar::new());
    let shared: Arc<dyn Calendar> = calendar.clone();
    let reconciler = Reconciler::new(shared, &config.calendar);
    let store = TaskStore::new(Workbook::standard(), config).expect("store");
    (Dispatcher::new(store, reconciler), calendar)
}

pub fn default_harness() -> (Dispatcher, Arc<RecordingCalendar>) {
    harness(Config::default())
}

pub async fn send(dispatcher: &mut Dispatcher, action: Action, payload: Value) -> Response {
    dispatcher.dispatch(Request::new(action, payload)).await
}

/// Send a request that must succeed and return its data
pub async fn ok(dispatcher: &mut Dispatcher, action: Action, payload: Value) -> Value {
    let response = send(dispatcher, action, payload).await;
    assert!(response.is_success(), "{action} failed: {}", response.body());
    response.data().cloned().expect("data")
}

pub fn row_of(data: &Value) -> RowRef {
    RowRef(data["rowIndex"].as_u64().expect("rowIndex") as usize)
}

pub fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
}
