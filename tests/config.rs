use std::fs;

use taskcal::config::{Config, CONFIG_FILE};
use taskcal::reminder::ReminderPolicy;
use taskcal::task::{Priority, Task};

#[test]
fn load_from_dir_defaults_on_invalid_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join(CONFIG_FILE), "timezone = 123").expect("write invalid config");

    let cfg = Config::load_from_dir(dir.path());
    assert_eq!(cfg.timezone, "UTC");
    assert_eq!(cfg.calendar.calendar_id, "primary");
}

#[test]
fn load_from_dir_defaults_on_zero_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let content = r#"
[calendar]
timeout_ms = 0
"#;
    fs::write(dir.path().join(CONFIG_FILE), content.trim()).expect("write config");

    let cfg = Config::load_from_dir(dir.path());
    assert_eq!(cfg.calendar.timeout_ms, 10_000);
}

#[test]
fn explicit_load_reports_invalid_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(CONFIG_FILE);
    fs::write(&path, "categories = [\"Work\", \"work\"]").expect("write config");

    let err = Config::load(&path).expect_err("duplicate category");
    assert_eq!(err.kind(), "invalid_config");
}

#[test]
fn reminder_tables_feed_the_policy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let content = r#"
[reminders.priority]
High = [30, 10]

[reminders.category]
Errand = ["oops"]
"#;
    fs::write(dir.path().join(CONFIG_FILE), content.trim()).expect("write config");

    // A type error anywhere falls back to defaults as a whole.
    let cfg = Config::load_from_dir(dir.path());
    assert!(cfg.reminders.priority.is_empty());

    let content = r#"
[reminders.priority]
High = [30, 10]
"#;
    fs::write(dir.path().join(CONFIG_FILE), content.trim()).expect("write config");
    let cfg = Config::load_from_dir(dir.path());
    let policy = ReminderPolicy::from_config(&cfg.reminders);
    let task = Task {
        priority: Some(Priority::High),
        ..Task::default()
    };
    assert_eq!(policy.offsets_for(&task), vec![10, 30]);
}

#[test]
fn save_then_load_keeps_settings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(CONFIG_FILE);
    let mut cfg = Config::default();
    cfg.timezone = "America/New_York".to_string();
    cfg.store.strict_versioning = true;
    cfg.save(&path).expect("save");

    let loaded = Config::load(&path).expect("load");
    assert_eq!(loaded.timezone, "America/New_York");
    assert!(loaded.store.strict_versioning);
    assert_eq!(loaded.categories, cfg.categories);
}
