//! `taskcal occurrences`

use serde_json::{json, Value};

use crate::cli::finish;
use crate::dispatch::{Action, Dispatcher, Request};
use crate::error::Result;
use crate::output::{HumanOutput, OutputOptions};

pub async fn run(
    dispatcher: &mut Dispatcher,
    output: OutputOptions,
    from: String,
    to: String,
    task: Option<String>,
) -> Result<i32> {
    let mut payload = json!({ "from": from, "to": to });
    if let Some(task) = task {
        payload["taskId"] = Value::String(task);
    }
    let response = dispatcher
        .dispatch(Request::new(Action::GetOccurrences, payload))
        .await;
    finish(output, "occurrences", &response, |data| {
        let occurrences = data.as_array().map(Vec::as_slice).unwrap_or_default();
        let mut human = HumanOutput::new(format!("{} occurrence(s) {from}..{to}", occurrences.len()));
        for occurrence in occurrences {
            let task = &occurrence["task"];
            let mut line = format!(
                "{} {}",
                occurrence["localDate"].as_str().unwrap_or_default(),
                task["Subject"].as_str().unwrap_or_default()
            );
            if task["Is it Completed"] == Value::Bool(true) {
                line.push_str(" [done]");
            }
            if occurrence["isEdited"] == Value::Bool(true) {
                line.push_str(" [edited]");
            }
            human.push_detail(line);
        }
        human
    })
}
