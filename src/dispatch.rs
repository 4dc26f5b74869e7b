//! Request routing.
//!
//! Requests are `{action, payload}` JSON objects. Every response is an
//! envelope: `{status: "success", data}` or
//! `{status: "error", message, kind, details?}`. Writes are persisted and
//! then reconciled with the calendar before the response is built; a
//! calendar failure is logged and reported under `data.calendar` but never
//! turns a successful write into an error.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::error::{exit_codes, Error, JsonError, Result};
use crate::recurrence::{self, DateWindow, Expander, Overlays};
use crate::reconcile::Reconciler;
use crate::sheet::RowRef;
use crate::task::{parse_date, Task, TaskFields, TaskStore, COL_ROW_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    GetTasks,
    CreateTask,
    UpdateTask,
    DeleteTask,
    GetOccurrences,
    SetOccurrenceDone,
    DeleteOccurrence,
    EditOccurrence,
    SplitSeries,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::GetTasks,
        Action::CreateTask,
        Action::UpdateTask,
        Action::DeleteTask,
        Action::GetOccurrences,
        Action::SetOccurrenceDone,
        Action::DeleteOccurrence,
        Action::EditOccurrence,
        Action::SplitSeries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::GetTasks => "getTasks",
            Action::CreateTask => "createTask",
            Action::UpdateTask => "updateTask",
            Action::DeleteTask => "deleteTask",
            Action::GetOccurrences => "getOccurrences",
            Action::SetOccurrenceDone => "setOccurrenceDone",
            Action::DeleteOccurrence => "deleteOccurrence",
            Action::EditOccurrence => "editOccurrence",
            Action::SplitSeries => "splitSeries",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == trimmed)
            .ok_or_else(|| Error::InvalidAction(format!("unknown action '{trimmed}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

impl Request {
    pub fn new(action: Action, payload: Value) -> Self {
        Self {
            action: action.as_str().to_string(),
            payload,
        }
    }
}

/// Response envelope plus the exit code it maps to
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    body: Value,
    exit_code: i32,
}

impl Response {
    pub fn success(data: Value) -> Self {
        Self {
            body: json!({ "status": "success", "data": data }),
            exit_code: exit_codes::SUCCESS,
        }
    }

    pub fn failure(err: &Error) -> Self {
        Self {
            body: serde_json::to_value(JsonError::from(err))
                .unwrap_or_else(|_| json!({ "status": "error", "message": err.to_string() })),
            exit_code: err.exit_code(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == exit_codes::SUCCESS
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn data(&self) -> Option<&Value> {
        self.body.get("data")
    }

    pub fn into_body(self) -> Value {
        self.body
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

/// Routes requests to the task store and reconciler
pub struct Dispatcher {
    store: TaskStore,
    reconciler: Reconciler,
}

impl Dispatcher {
    pub fn new(store: TaskStore, reconciler: Reconciler) -> Self {
        Self { store, reconciler }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TaskStore {
        &mut self.store
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Reconciler and store borrowed together for bulk runs
    pub fn parts_mut(&mut self) -> (&Reconciler, &mut TaskStore) {
        (&self.reconciler, &mut self.store)
    }

    /// Parse a raw JSON body and dispatch it
    pub async fn dispatch_json(&mut self, raw: &str) -> Response {
        match serde_json::from_str::<Request>(raw) {
            Ok(request) => self.dispatch(request).await,
            Err(err) => Response::failure(&Error::InvalidAction(format!("malformed request: {err}"))),
        }
    }

    pub async fn dispatch(&mut self, request: Request) -> Response {
        match self.route(request).await {
            Ok(data) => Response::success(data),
            Err(err) => {
                tracing::debug!(kind = err.kind(), error = %err, "request failed");
                Response::failure(&err)
            }
        }
    }

    async fn route(&mut self, request: Request) -> Result<Value> {
        let action: Action = request.action.parse()?;
        tracing::debug!(%action, "dispatching");
        let payload = &request.payload;
        match action {
            Action::GetTasks => Ok(serde_json::to_value(self.store.list_tasks()?)?),
            Action::CreateTask => {
                let fields = TaskFields::from_json(payload_object(payload)?)?;
                let row = self.store.create_task(&fields)?;
                self.written(row, "Task created").await
            }
            Action::UpdateTask => {
                let object = payload_object(payload)?;
                let row = row_index(object)?;
                let fields = TaskFields::from_json(object)?;
                let expected = optional_u64(object, COL_ROW_VERSION)?;
                self.store.update_task(row, &fields, expected)?;
                self.written(row, "Task updated").await
            }
            Action::DeleteTask => {
                let row = row_index(payload_object(payload)?)?;
                self.store.delete_task(row)?;
                self.written(row, "Task deleted").await
            }
            Action::GetOccurrences => self.occurrences(payload_object(payload)?),
            Action::SetOccurrenceDone => {
                let object = payload_object(payload)?;
                let (task, date) = self.occurrence_target(object)?;
                let is_done = match object.get("isDone") {
                    None | Some(Value::Null) => true,
                    Some(Value::Bool(done)) => *done,
                    Some(other) => {
                        return Err(Error::invalid_field("isDone", format!("expected a boolean, got {other}")))
                    }
                };
                recurrence::record_done(self.store.workbook_mut(), &task.task_id, date, is_done, Utc::now())?;
                self.overlay_written(&task, date, "Occurrence updated")
            }
            Action::DeleteOccurrence => {
                let (task, date) = self.occurrence_target(payload_object(payload)?)?;
                recurrence::record_delete(self.store.workbook_mut(), &task.task_id, date, Utc::now())?;
                self.overlay_written(&task, date, "Occurrence deleted")
            }
            Action::EditOccurrence => {
                let object = payload_object(payload)?;
                let (task, date) = self.occurrence_target(object)?;
                let fields = match object.get("fields") {
                    Some(Value::Object(fields)) => TaskFields::from_json(fields)?,
                    Some(other) => {
                        return Err(Error::invalid_field("fields", format!("expected an object, got {other}")))
                    }
                    None => return Err(Error::MissingReference("fields".to_string())),
                };
                if fields.is_empty() {
                    return Err(Error::invalid_field("fields", "no field overrides given"));
                }
                recurrence::record_edit(self.store.workbook_mut(), &task.task_id, date, &fields, Utc::now())?;
                self.overlay_written(&task, date, "Occurrence edited")
            }
            Action::SplitSeries => self.split_series(payload_object(payload)?).await,
        }
    }

    /// Persist a task write, then reconcile the row
    async fn written(&mut self, row: RowRef, message: &str) -> Result<Value> {
        self.store.flush()?;
        let calendar = match self.reconciler.reconcile(&mut self.store, row).await {
            Ok(outcome) => {
                tracing::debug!(%row, action = ?outcome.action, "reconciled");
                serde_json::to_value(outcome)?
            }
            Err(err) => {
                tracing::warn!(%row, error = %err, "calendar reconcile failed; task write kept");
                json!({ "error": err.to_string(), "kind": err.kind() })
            }
        };
        if let Err(err) = self.store.flush() {
            tracing::warn!(%row, error = %err, "failed to persist calendar bookkeeping");
        }
        let task = self.store.get(row)?;
        Ok(json!({
            "message": message,
            "rowIndex": row,
            "taskId": task.task_id,
            "rowVersion": task.row_version,
            "calendar": calendar,
        }))
    }

    fn overlay_written(&mut self, task: &Task, date: NaiveDate, message: &str) -> Result<Value> {
        self.store.flush()?;
        Ok(json!({
            "message": message,
            "rowIndex": task.row,
            "taskId": task.task_id,
            "localDate": date,
        }))
    }

    fn occurrences(&self, object: &Map<String, Value>) -> Result<Value> {
        let window = DateWindow::new(required_date(object, "from")?, required_date(object, "to")?)?;
        let tasks = self.store.list_tasks()?;
        let overlays = Overlays::load(self.store.workbook())?;
        let expander = Expander::new(&tasks, &overlays);

        let occurrences = match optional_text(object, "taskId")? {
            Some(task_id) => {
                let task = tasks
                    .iter()
                    .find(|task| task.task_id == task_id)
                    .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
                expander.expand(task, window)?.collect()
            }
            None => expander.expand_all(&tasks, window),
        };
        Ok(serde_json::to_value(occurrences)?)
    }

    fn occurrence_target(&self, object: &Map<String, Value>) -> Result<(Task, NaiveDate)> {
        let task_id = optional_text(object, "taskId")?
            .ok_or_else(|| Error::MissingReference("taskId".to_string()))?;
        let date = required_date(object, "localDate")?;
        let task = self
            .store
            .find_by_id(&task_id)?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
        Ok((task, date))
    }

    /// Continue a recurring series from `splitAt` as a new task
    ///
    /// Fields missing from the request are carried over from the original,
    /// except Start Date (the split date) and the completion flags.
    async fn split_series(&mut self, object: &Map<String, Value>) -> Result<Value> {
        let row = row_index(object)?;
        let split_at = required_date(object, "splitAt")?;
        let original = self.store.get(row)?;
        if !original.is_recurring() {
            return Err(Error::invalid_field("rowIndex", format!("task at {row} does not recur")));
        }
        if original.marked_for_deletion {
            return Err(Error::invalid_field("rowIndex", format!("task at {row} is deleted")));
        }
        if original.start_date.is_some_and(|start| split_at <= start) {
            return Err(Error::invalid_field("splitAt", "must be after the series start date"));
        }

        let mut fields = match object.get("fields") {
            None | Some(Value::Null) => TaskFields::default(),
            Some(Value::Object(fields)) => TaskFields::from_json(fields)?,
            Some(other) => {
                return Err(Error::invalid_field("fields", format!("expected an object, got {other}")))
            }
        };
        inherit_fields(&mut fields, &original);
        fields.start_date = fields.start_date.or(Some(split_at));

        let new_row = self.store.create_task(&fields)?;
        let new_id = self.store.get(new_row)?.task_id;
        recurrence::record_split(self.store.workbook_mut(), &original.task_id, split_at, &new_id)?;
        self.written(new_row, "Series split").await
    }
}

fn inherit_fields(fields: &mut TaskFields, original: &Task) {
    fields.subject = fields.subject.take().or_else(|| Some(original.subject.clone()));
    fields.start_time = fields.start_time.or(original.start_time);
    fields.end_time = fields.end_time.or(original.end_time);
    fields.category = fields.category.take().or_else(|| original.category.clone());
    fields.recurrence = fields.recurrence.take().or_else(|| original.recurrence.clone());
    fields.priority = fields.priority.or(original.priority);
    if fields.tags.is_none() && !original.tags.is_empty() {
        fields.tags = Some(original.tags.clone());
    }
    if fields.notes.is_none() && !original.notes.is_empty() {
        fields.notes = Some(original.notes.clone());
    }
    fields.is_completed = Some(fields.is_completed.unwrap_or(false));
    fields.marked_for_deletion = None;
}

fn payload_object(payload: &Value) -> Result<&Map<String, Value>> {
    match payload {
        Value::Object(object) => Ok(object),
        Value::Null => Err(Error::MissingReference("payload".to_string())),
        other => Err(Error::invalid_field("payload", format!("expected an object, got {other}"))),
    }
}

/// `rowIndex` as a number or numeric string
fn row_index(object: &Map<String, Value>) -> Result<RowRef> {
    match optional_u64(object, "rowIndex")? {
        Some(row) => usize::try_from(row)
            .map(RowRef)
            .map_err(|_| Error::invalid_field("rowIndex", "out of range")),
        None => Err(Error::MissingReference("rowIndex".to_string())),
    }
}

fn optional_u64(object: &Map<String, Value>, key: &str) -> Result<Option<u64>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| Error::invalid_field(key, format!("expected a whole number, got {n}"))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_field(key, format!("expected a whole number, got '{s}'"))),
        Some(other) => Err(Error::invalid_field(key, format!("expected a whole number, got {other}"))),
    }
}

fn optional_text(object: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => Err(Error::invalid_field(key, format!("expected text, got {other}"))),
    }
}

fn required_date(object: &Map<String, Value>, key: &str) -> Result<NaiveDate> {
    let raw = optional_text(object, key)?.ok_or_else(|| Error::MissingReference(key.to_string()))?;
    parse_date(key, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_parse_by_exact_name() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().expect("action"), action);
        }
        let err = "GetTasks".parse::<Action>().unwrap_err();
        assert!(matches!(err, Error::InvalidAction(_)));
    }

    #[test]
    fn row_index_accepts_numbers_and_strings() {
        let object = json!({ "rowIndex": 4 });
        assert_eq!(row_index(object.as_object().expect("object")).expect("row"), RowRef(4));
        let object = json!({ "rowIndex": " 7 " });
        assert_eq!(row_index(object.as_object().expect("object")).expect("row"), RowRef(7));

        let object = json!({});
        assert!(matches!(
            row_index(object.as_object().expect("object")),
            Err(Error::MissingReference(_))
        ));
        let object = json!({ "rowIndex": -1 });
        assert!(matches!(
            row_index(object.as_object().expect("object")),
            Err(Error::InvalidField { .. })
        ));
    }

    #[test]
    fn failure_envelope_carries_kind() {
        let response = Response::failure(&Error::InvalidAction("unknown action 'x'".to_string()));
        assert!(!response.is_success());
        assert_eq!(response.exit_code(), exit_codes::USER_ERROR);
        assert_eq!(response.body()["status"], json!("error"));
        assert_eq!(response.body()["kind"], json!("invalid_action"));
        assert_eq!(
            response.body()["message"],
            json!("Invalid action: unknown action 'x'")
        );
    }

    #[test]
    fn success_envelope_wraps_data() {
        let response = Response::success(json!([1, 2]));
        assert!(response.is_success());
        assert_eq!(response.data(), Some(&json!([1, 2])));
        assert_eq!(
            serde_json::to_value(&response).expect("json"),
            json!({ "status": "success", "data": [1, 2] })
        );
    }

    #[test]
    fn split_inherits_missing_fields() {
        let original = Task {
            subject: "Standup".to_string(),
            recurrence: Some("weekly".to_string()),
            notes: "room 4".to_string(),
            is_completed: true,
            ..Task::default()
        };
        let mut fields = TaskFields {
            subject: Some("Standup v2".to_string()),
            ..TaskFields::default()
        };
        inherit_fields(&mut fields, &original);
        assert_eq!(fields.subject.as_deref(), Some("Standup v2"));
        assert_eq!(fields.recurrence.as_deref(), Some("weekly"));
        assert_eq!(fields.notes.as_deref(), Some("room 4"));
        assert_eq!(fields.is_completed, Some(false));
    }
}
