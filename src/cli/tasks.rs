//! `taskcal tasks|create|update|delete`

use serde_json::{json, Value};

use crate::cli::{calendar_summary, finish, TaskArgs};
use crate::dispatch::{Action, Dispatcher, Request};
use crate::error::Result;
use crate::output::{HumanOutput, OutputOptions};
use crate::task::COL_ROW_VERSION;

pub async fn list(dispatcher: &mut Dispatcher, output: OutputOptions) -> Result<i32> {
    let response = dispatcher
        .dispatch(Request::new(Action::GetTasks, Value::Null))
        .await;
    finish(output, "tasks", &response, |data| {
        let tasks = data.as_array().map(Vec::as_slice).unwrap_or_default();
        let mut human = HumanOutput::new(format!("{} task(s)", tasks.len()));
        for task in tasks {
            human.push_detail(task_line(task));
        }
        human
    })
}

pub async fn create(dispatcher: &mut Dispatcher, output: OutputOptions, fields: &TaskArgs) -> Result<i32> {
    let request = Request::new(Action::CreateTask, Value::Object(fields.to_payload()));
    let response = dispatcher.dispatch(request).await;
    finish(output, "create", &response, |data| written("Task created", data))
}

pub async fn update(
    dispatcher: &mut Dispatcher,
    output: OutputOptions,
    row: usize,
    fields: &TaskArgs,
    version: Option<u64>,
) -> Result<i32> {
    let mut payload = fields.to_payload();
    payload.insert("rowIndex".to_string(), json!(row));
    if let Some(version) = version {
        payload.insert(COL_ROW_VERSION.to_string(), json!(version));
    }
    let response = dispatcher
        .dispatch(Request::new(Action::UpdateTask, Value::Object(payload)))
        .await;
    finish(output, "update", &response, |data| written("Task updated", data))
}

pub async fn delete(dispatcher: &mut Dispatcher, output: OutputOptions, row: usize) -> Result<i32> {
    let response = dispatcher
        .dispatch(Request::new(Action::DeleteTask, json!({ "rowIndex": row })))
        .await;
    finish(output, "delete", &response, |data| written("Task deleted", data))
}

fn written(header: &str, data: &Value) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    if let Some(row) = data.get("rowIndex") {
        human.push_summary("row", row.to_string());
    }
    if let Some(version) = data.get("rowVersion") {
        human.push_summary("version", version.to_string());
    }
    if let Some(task_id) = data.get("taskId").and_then(Value::as_str) {
        human.push_summary("task", task_id);
    }
    calendar_summary(&mut human, data);
    human
}

fn task_line(task: &Value) -> String {
    let text = |key: &str| task.get(key).and_then(Value::as_str).unwrap_or_default();
    let mut line = format!("[{}] {}", task["rowIndex"], text("Subject"));
    let start = text("Start Date");
    if !start.is_empty() {
        line.push_str(&format!(" on {start}"));
        let time = text("Start Time");
        if !time.is_empty() {
            line.push_str(&format!(" at {time}"));
        }
    }
    let rule = text("Recurrence");
    if !rule.is_empty() {
        line.push_str(&format!(" ({rule})"));
    }
    if task["Is it Completed"] == Value::Bool(true) {
        line.push_str(" [done]");
    }
    if task["Delete this"] == Value::Bool(true) {
        line.push_str(" [deleted]");
    }
    line
}
