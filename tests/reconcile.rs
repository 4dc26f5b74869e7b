use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use taskcal::calendar::{Calendar, EventWindow};
use taskcal::config::Config;
use taskcal::dispatch::Action;
use taskcal::reconcile::{ReconcileAction, Reconciler, META_CALENDAR_ID, META_LAST_RECONCILE_AT};
use taskcal::sheet::{PRIORITY_REMINDERS_SHEET, SYNC_META_SHEET};

mod support;

use support::{date, default_harness, harness, ok, row_of};

#[tokio::test]
async fn reconcile_twice_creates_once() {
    let (mut dispatcher, calendar) = default_harness();
    let row = row_of(
        &ok(
            &mut dispatcher,
            Action::CreateTask,
            json!({ "Subject": "Gym", "Start Date": "2024-04-03" }),
        )
        .await,
    );

    let (reconciler, store) = dispatcher.parts_mut();
    let again = reconciler.reconcile(store, row).await.expect("reconcile");
    assert_eq!(again.action, ReconcileAction::Updated);
    let third = reconciler.reconcile(store, row).await.expect("reconcile");
    assert_eq!(third.action, ReconcileAction::Updated);
    assert_eq!(third.event_id, again.event_id);

    assert_eq!(calendar.count("create_all_day_event"), 1);
    assert_eq!(calendar.count("update_event"), 2);
    assert_eq!(calendar.events().len(), 1);
}

#[tokio::test]
async fn timed_task_gets_exact_window() {
    let (mut dispatcher, calendar) = default_harness();
    ok(
        &mut dispatcher,
        Action::CreateTask,
        json!({
            "Subject": "Review",
            "Start Date": "2024-04-01",
            "Start Time": "09:00",
            "End Time": "10:30",
            "Notes": "bring notes",
        }),
    )
    .await;

    assert_eq!(calendar.count("create_event"), 1);
    let event = calendar.events().pop().expect("event");
    let day = date("2024-04-01");
    assert_eq!(
        event.window,
        EventWindow::Timed {
            start: day.and_hms_opt(9, 0, 0).expect("time"),
            end: day.and_hms_opt(10, 30, 0).expect("time"),
            timezone: "UTC".to_string(),
        }
    );
    assert_eq!(event.options.description, "bring notes");
}

#[tokio::test]
async fn stale_event_reference_is_replaced() {
    let (mut dispatcher, calendar) = default_harness();
    let row = row_of(
        &ok(
            &mut dispatcher,
            Action::CreateTask,
            json!({ "Subject": "Vet", "Start Date": "2024-06-01" }),
        )
        .await,
    );
    let original = calendar.events().pop().expect("event");
    calendar.inner().delete_event(&original).expect("delete elsewhere");

    let data = ok(
        &mut dispatcher,
        Action::UpdateTask,
        json!({ "rowIndex": row.0, "Subject": "Vet", "Start Date": "2024-06-02" }),
    )
    .await;
    assert_eq!(data["calendar"]["action"], json!("created"));

    let replacement = calendar.events().pop().expect("event");
    assert_ne!(replacement.id, original.id);
    let task = dispatcher.store().get(row).expect("task");
    assert_eq!(task.external_event_id.as_deref(), Some(replacement.id.as_str()));
}

#[tokio::test]
async fn stale_reference_on_deleted_task_is_cleared_without_calls() {
    let (mut dispatcher, calendar) = default_harness();
    let row = row_of(
        &ok(
            &mut dispatcher,
            Action::CreateTask,
            json!({ "Subject": "Old", "Start Date": "2024-06-01" }),
        )
        .await,
    );
    let event = calendar.events().pop().expect("event");
    calendar.inner().delete_event(&event).expect("delete elsewhere");
    calendar.reset_calls();

    let data = ok(&mut dispatcher, Action::DeleteTask, json!({ "rowIndex": row.0 })).await;
    assert_eq!(data["calendar"]["action"], json!("cleared_stale"));
    assert_eq!(calendar.calls(), vec!["find_event"]);
    assert_eq!(dispatcher.store().get(row).expect("task").external_event_id, None);
}

#[tokio::test]
async fn calendar_outage_does_not_fail_the_write() {
    let (mut dispatcher, calendar) = default_harness();
    calendar.set_failing(true);

    let data = ok(
        &mut dispatcher,
        Action::CreateTask,
        json!({ "Subject": "Offline", "Start Date": "2024-04-01" }),
    )
    .await;
    assert_eq!(data["calendar"]["kind"], json!("collaborator_unavailable"));
    let row = row_of(&data);
    let task = dispatcher.store().get(row).expect("task");
    assert_eq!(task.row_version, 1);
    assert_eq!(task.external_event_id, None);

    // Once the calendar is back a reconcile creates the event.
    calendar.set_failing(false);
    let (reconciler, store) = dispatcher.parts_mut();
    let outcome = reconciler.reconcile(store, row).await.expect("reconcile");
    assert_eq!(outcome.action, ReconcileAction::Created);
    assert_eq!(calendar.events().len(), 1);
}

#[tokio::test]
async fn failed_delete_keeps_the_reference() {
    let (mut dispatcher, calendar) = default_harness();
    let row = row_of(
        &ok(
            &mut dispatcher,
            Action::CreateTask,
            json!({ "Subject": "Keep", "Start Date": "2024-04-01" }),
        )
        .await,
    );
    let event_id = dispatcher.store().get(row).expect("task").external_event_id;
    assert!(event_id.is_some());

    calendar.set_failing(true);
    let data = ok(&mut dispatcher, Action::DeleteTask, json!({ "rowIndex": row.0 })).await;
    assert!(data["calendar"]["error"].is_string());
    let task = dispatcher.store().get(row).expect("task");
    assert!(task.marked_for_deletion);
    assert_eq!(task.external_event_id, event_id);
}

#[tokio::test]
async fn slow_calendar_times_out() {
    let calendar = Arc::new(support::RecordingCalendar::new());
    calendar.set_delay(Some(Duration::from_millis(300)));
    let shared: Arc<dyn Calendar> = calendar.clone();
    let config = Config::default();
    let reconciler =
        Reconciler::new(shared, &config.calendar).with_timeout(Duration::from_millis(20));
    let store = taskcal::task::TaskStore::new(taskcal::sheet::Workbook::standard(), config)
        .expect("store");
    let mut dispatcher = taskcal::dispatch::Dispatcher::new(store, reconciler);

    let data = ok(
        &mut dispatcher,
        Action::CreateTask,
        json!({ "Subject": "Slow", "Start Date": "2024-04-01" }),
    )
    .await;
    assert_eq!(data["calendar"]["kind"], json!("collaborator_unavailable"));
    assert_eq!(
        dispatcher.store().get(row_of(&data)).expect("task").external_event_id,
        None
    );

    // The abandoned call still finishes; its event is never linked to the row.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(calendar.events().len(), 1);
    assert_eq!(
        dispatcher.store().get(row_of(&data)).expect("task").external_event_id,
        None
    );
}

#[tokio::test]
async fn undated_tasks_are_skipped() {
    let (mut dispatcher, calendar) = default_harness();
    let data = ok(&mut dispatcher, Action::CreateTask, json!({ "Subject": "Someday" })).await;
    assert_eq!(data["calendar"]["action"], json!("skipped"));
    assert!(calendar.calls().is_empty());
}

#[tokio::test]
async fn clearing_the_start_date_removes_the_event() {
    let (mut dispatcher, calendar) = default_harness();
    let row = row_of(
        &ok(
            &mut dispatcher,
            Action::CreateTask,
            json!({ "Subject": "Dentist", "Start Date": "2024-05-01" }),
        )
        .await,
    );
    assert_eq!(calendar.events().len(), 1);

    let data = ok(
        &mut dispatcher,
        Action::UpdateTask,
        json!({ "rowIndex": row.0, "Subject": "Dentist" }),
    )
    .await;
    assert_eq!(data["calendar"]["action"], json!("deleted"));
    assert!(calendar.events().is_empty());
    let task = dispatcher.store().get(row).expect("task");
    assert_eq!(task.start_date, None);
    assert_eq!(task.external_event_id, None);

    // Nothing left to remove; later reconciles just skip the row.
    let (reconciler, store) = dispatcher.parts_mut();
    let outcome = reconciler.reconcile(store, row).await.expect("reconcile");
    assert_eq!(outcome.action, ReconcileAction::Skipped);
    assert_eq!(calendar.count("delete_event"), 1);
}

#[tokio::test]
async fn reminders_union_priority_and_category() {
    let mut config = Config::default();
    config.reminders.priority.insert("High".to_string(), vec![30]);
    config.reminders.category.insert("Work".to_string(), vec![15, 30]);
    let (mut dispatcher, calendar) = harness(config);
    dispatcher
        .store_mut()
        .workbook_mut()
        .upsert(
            PRIORITY_REMINDERS_SHEET,
            1,
            &[("Priority", "Urgent".to_string()), ("ReminderOffsets", "5".to_string())],
        )
        .expect("reminder row");

    ok(
        &mut dispatcher,
        Action::CreateTask,
        json!({
            "Subject": "Standup",
            "Start Date": "2024-04-01",
            "Priority": "High",
            "Category": "Work",
        }),
    )
    .await;
    ok(
        &mut dispatcher,
        Action::CreateTask,
        json!({ "Subject": "Incident", "Start Date": "2024-04-01", "Priority": "Urgent" }),
    )
    .await;

    let mut reminders: Vec<(String, Vec<u32>)> = calendar
        .events()
        .into_iter()
        .map(|event| (event.title, event.options.reminders))
        .collect();
    reminders.sort();
    assert_eq!(
        reminders,
        vec![
            ("Incident".to_string(), vec![5]),
            ("Standup".to_string(), vec![15, 30]),
        ]
    );
}

#[tokio::test]
async fn sync_meta_records_last_reconcile() {
    let (mut dispatcher, _calendar) = default_harness();
    ok(
        &mut dispatcher,
        Action::CreateTask,
        json!({ "Subject": "Meta", "Start Date": "2024-04-01" }),
    )
    .await;

    let sheet = dispatcher
        .store()
        .workbook()
        .sheet(SYNC_META_SHEET)
        .expect("meta");
    let columns = sheet.columns();
    let entries: Vec<(String, String)> = sheet
        .rows()
        .map(|(_, cells)| {
            (
                columns.get(cells, "key").to_string(),
                columns.get(cells, "value").to_string(),
            )
        })
        .collect();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|(key, value)| key == META_CALENDAR_ID && value == "primary"));
    assert!(entries.iter().any(|(key, value)| key == META_LAST_RECONCILE_AT && !value.is_empty()));
}

#[tokio::test]
async fn reconcile_all_reports_each_row() {
    let (mut dispatcher, calendar) = default_harness();
    calendar.set_failing(true);
    for subject in ["A", "B"] {
        ok(
            &mut dispatcher,
            Action::CreateTask,
            json!({ "Subject": subject, "Start Date": "2024-04-01" }),
        )
        .await;
    }
    ok(&mut dispatcher, Action::CreateTask, json!({ "Subject": "Undated" })).await;
    calendar.set_failing(false);

    let (reconciler, store) = dispatcher.parts_mut();
    let report = reconciler.reconcile_all(store).await.expect("report");
    assert!(report.failures.is_empty());
    let actions: Vec<ReconcileAction> = report.outcomes.iter().map(|o| o.action).collect();
    assert_eq!(
        actions,
        vec![
            ReconcileAction::Created,
            ReconcileAction::Created,
            ReconcileAction::Skipped,
        ]
    );
    assert_eq!(calendar.events().len(), 2);
}
