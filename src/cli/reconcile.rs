//! `taskcal reconcile`

use crate::dispatch::Dispatcher;
use crate::error::{exit_codes, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};

pub async fn run(dispatcher: &mut Dispatcher, output: OutputOptions) -> Result<i32> {
    let (reconciler, store) = dispatcher.parts_mut();
    let report = reconciler.reconcile_all(store).await?;
    store.flush()?;

    let mut human = HumanOutput::new(format!(
        "Reconciled {} task(s)",
        report.outcomes.len() + report.failures.len()
    ));
    for outcome in &report.outcomes {
        let action = serde_json::to_value(outcome.action)?;
        human.push_detail(format!(
            "{}: {}",
            outcome.row_index,
            action.as_str().unwrap_or_default().replace('_', " ")
        ));
    }
    for failure in &report.failures {
        human.push_warning(format!("{}: {}", failure.row_index, failure.message));
    }
    if !report.failures.is_empty() {
        human.push_next_step("taskcal reconcile");
    }
    emit_success(output, "reconcile", &report, Some(&human))?;

    if report.failures.is_empty() {
        Ok(exit_codes::SUCCESS)
    } else {
        Ok(exit_codes::OPERATION_FAILED)
    }
}
