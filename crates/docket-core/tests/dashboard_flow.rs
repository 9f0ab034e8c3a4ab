use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use docket_core::controller::EventController;
use docket_core::dashboard::Dashboard;
use docket_core::event::{EventDraft, EventPatch, Priority};
use docket_core::filter::{self, FilterMode};
use docket_core::reminder::{ReminderPolicy, ReminderScheduler};
use docket_core::store::{EventStore, FileKeyValueStore, KeyValueStore};
use tempfile::tempdir;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
}

fn draft(name: &str, when: &str, priority: Priority) -> EventDraft {
    EventDraft {
        name: name.to_string(),
        when: when.to_string(),
        description: None,
        priority: Some(priority),
    }
}

fn open(dir: &std::path::Path) -> EventController<FileKeyValueStore> {
    let backend = FileKeyValueStore::open(dir).expect("open store");
    EventController::open_in(EventStore::new(backend), now(), chrono_tz::UTC)
}

#[test]
fn snapshot_survives_reopen() {
    let temp = tempdir().expect("tempdir");

    let mut controller = open(temp.path());
    let standup = controller
        .create(draft("Standup", "+30m", Priority::High), now())
        .expect("create standup");
    assert!(standup.is_persisted());
    let retro = controller
        .create(draft("Retro", "+2d", Priority::Low), now())
        .expect("create retro");
    controller
        .update(
            retro.value.id,
            EventPatch {
                description: Some("sprint 42".to_string()),
                ..EventPatch::default()
            },
            now(),
        )
        .expect("update retro");
    controller
        .toggle_complete(standup.value.id, now())
        .expect("toggle standup");

    let reopened = open(temp.path());
    assert_eq!(reopened.events(), controller.events());
    assert_eq!(reopened.insights(), controller.insights());

    let raw = FileKeyValueStore::open(temp.path())
        .expect("open store")
        .get("events")
        .expect("read snapshot")
        .expect("snapshot present");
    assert!(raw.contains("\"date\":\"2026-10-18T09:30:00Z\""));
    assert!(raw.contains("\"completed\":true"));
}

#[test]
fn legacy_snapshot_loads_title_as_name() {
    let temp = tempdir().expect("tempdir");
    let mut backend = FileKeyValueStore::open(temp.path()).expect("open store");
    backend
        .set(
            "events",
            r#"[{"id":1760778000000,"title":"Dentist","date":"2026-10-18T14:00:00.000Z","priority":"high"}]"#,
        )
        .expect("seed snapshot");

    let controller = open(temp.path());
    let event = controller.get(1_760_778_000_000).expect("legacy event");
    assert_eq!(event.name, "Dentist");
    assert_eq!(event.priority, Priority::High);
    assert!(!event.completed);
    assert_eq!(controller.insights().today, 1);
}

#[test]
fn standup_reminder_fires_once_per_schedule() {
    let temp = tempdir().expect("tempdir");
    let controller = open(temp.path());
    let scheduler = ReminderScheduler::new(
        Duration::from_secs(60),
        TimeDelta::minutes(60),
        ReminderPolicy::Once,
    );
    let mut dash = Dashboard::new(controller, scheduler);

    let standup = dash
        .add(draft("Standup", "+30m", Priority::Medium), now())
        .expect("add standup");
    dash.add(draft("Planning", "+3h", Priority::Medium), now())
        .expect("add planning");

    let first = dash.remind(now());
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].message, "Reminder: \"Standup\" is coming up soon!");
    assert!(dash.remind(now() + TimeDelta::minutes(1)).is_empty());

    dash.edit(
        standup.value.id,
        EventPatch {
            when: Some("+45m".to_string()),
            ..EventPatch::default()
        },
        now(),
    )
    .expect("reschedule standup");
    assert_eq!(dash.remind(now() + TimeDelta::minutes(2)).len(), 1);
}

#[test]
fn watcher_sees_events_written_by_another_process() {
    let temp = tempdir().expect("tempdir");
    let mut dash = Dashboard::new(open(temp.path()), ReminderScheduler::default());
    dash.set_follow_store(true);
    assert!(dash.remind(now()).is_empty());

    let mut writer = open(temp.path());
    writer
        .create(draft("Deploy", "+10m", Priority::High), now())
        .expect("create deploy");

    let reminders = dash.remind(now());
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].name, "Deploy");
    assert_eq!(dash.insights().high_priority, 1);
}

#[test]
fn today_filter_uses_calendar_day() {
    let temp = tempdir().expect("tempdir");
    let mut controller = open(temp.path());
    for (name, when) in [
        ("Yesterday", "2026-10-17T23:30"),
        ("Morning", "2026-10-18T00:15"),
        ("Evening", "2026-10-18T23:45"),
        ("Tomorrow", "2026-10-19T00:00"),
    ] {
        controller
            .create(draft(name, when, Priority::Medium), now())
            .expect("create event");
    }

    let today: Vec<&str> =
        filter::apply_in(controller.events(), FilterMode::Today, now(), controller.timezone())
            .iter()
            .map(|event| event.name.as_str())
            .collect();
    assert_eq!(today, vec!["Morning", "Evening"]);

    let upcoming =
        filter::count(controller.events(), FilterMode::Upcoming, now(), controller.timezone());
    assert_eq!(upcoming, 2);
}
