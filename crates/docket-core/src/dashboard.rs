use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::controller::{Applied, EventController, Insights};
use crate::error::DashboardError;
use crate::event::{Event, EventDraft, EventId, EventPatch};
use crate::filter::{self, FilterMode};
use crate::notify::{self, NotificationKind, SharedNotifications};
use crate::reminder::{Reminder, ReminderScheduler};
use crate::store::KeyValueStore;

pub type SharedDashboard<K> = Arc<Mutex<Dashboard<K>>>;

/// A message the presentation layer should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub kind: NotificationKind,
}

impl Notice {
    fn normal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NotificationKind::Normal,
        }
    }
}

#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub notices: Vec<Notice>,
}

/// Controller, current filter selection and reminder scheduler. The
/// filter selection lives only as long as the process.
#[derive(Debug)]
pub struct Dashboard<K> {
    controller: EventController<K>,
    filter: FilterMode,
    scheduler: ReminderScheduler,
    follow_store: bool,
}

impl<K: KeyValueStore> Dashboard<K> {
    pub fn new(controller: EventController<K>, scheduler: ReminderScheduler) -> Self {
        Self {
            controller,
            filter: FilterMode::default(),
            scheduler,
            follow_store: false,
        }
    }

    pub fn into_shared(self) -> SharedDashboard<K> {
        Arc::new(Mutex::new(self))
    }

    pub fn controller(&self) -> &EventController<K> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut EventController<K> {
        &mut self.controller
    }

    pub fn scheduler(&self) -> &ReminderScheduler {
        &self.scheduler
    }

    /// Reload the snapshot before every reminder scan, for a process that
    /// only watches while others write.
    pub fn set_follow_store(&mut self, follow: bool) {
        self.follow_store = follow;
    }

    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    pub fn set_filter(&mut self, mode: FilterMode) {
        debug!(mode = %mode, "filter selected");
        self.filter = mode;
    }

    pub fn insights(&self) -> Insights {
        self.controller.insights()
    }

    /// Events under the current filter, in insertion order.
    pub fn visible(&self, now: DateTime<Utc>) -> Vec<&Event> {
        filter::apply_in(
            self.controller.events(),
            self.filter,
            now,
            self.controller.timezone(),
        )
    }

    pub fn add(
        &mut self,
        draft: EventDraft,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Event>, DashboardError> {
        let applied = self.controller.create(draft, now)?;
        let message = format!("Event \"{}\" added successfully!", applied.value.name);
        Ok(with_notices(applied, Some(message)))
    }

    pub fn edit(
        &mut self,
        id: EventId,
        patch: EventPatch,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Event>, DashboardError> {
        let applied = self.controller.update(id, patch, now)?;
        let message = format!("Event \"{}\" updated successfully!", applied.value.name);
        Ok(with_notices(applied, Some(message)))
    }

    pub fn remove(&mut self, id: EventId, now: DateTime<Utc>) -> Outcome<Option<Event>> {
        let applied = self.controller.delete(id, now);
        let message = applied
            .value
            .as_ref()
            .map(|_| "Event deleted successfully!".to_string());
        with_notices(applied, message)
    }

    pub fn toggle(
        &mut self,
        id: EventId,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Event>, DashboardError> {
        let applied = self.controller.toggle_complete(id, now)?;
        Ok(with_notices(applied, None))
    }

    /// One reminder scan against the current events.
    pub fn remind(&mut self, now: DateTime<Utc>) -> Vec<Reminder> {
        if self.follow_store {
            self.controller.reload(now);
        } else {
            self.controller.refresh_insights(now);
        }
        self.scheduler.tick(self.controller.events(), now)
    }
}

fn with_notices<T>(applied: Applied<T>, confirmation: Option<String>) -> Outcome<T> {
    let mut notices = vec![];
    if let Some(message) = confirmation {
        notices.push(Notice::normal(message));
    }
    if let Some(err) = applied.persist_error {
        notices.push(Notice::normal(format!("Warning: {err}")));
    }
    Outcome {
        value: applied.value,
        notices,
    }
}

/// Moves the scheduler from idle to armed and starts its repeating scan.
/// The first scan runs immediately; reminders go to `notes`, each with
/// its own expiry timer.
pub fn arm_reminders<K, F>(
    shared: SharedDashboard<K>,
    notes: SharedNotifications,
    clock: F,
) -> anyhow::Result<JoinHandle<()>>
where
    K: KeyValueStore + Send + 'static,
    F: Fn() -> DateTime<Utc> + Send + 'static,
{
    let period = {
        let mut dash = shared.lock();
        dash.scheduler.mark_armed()?;
        dash.scheduler.period()
    };

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = clock();
            let reminders = shared.lock().remind(now);
            if !reminders.is_empty() {
                info!(count = reminders.len(), "reminders due");
            }
            for reminder in reminders {
                notify::present(&notes, reminder.message, NotificationKind::Reminder, now);
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, TimeDelta, TimeZone, Utc};

    use super::{Dashboard, arm_reminders};
    use crate::controller::EventController;
    use crate::event::{EventDraft, Priority};
    use crate::filter::FilterMode;
    use crate::notify::{NotificationCenter, NotificationEvent, NotificationKind};
    use crate::reminder::{ReminderPolicy, ReminderScheduler, SchedulerState};
    use crate::store::{EventStore, MemoryKeyValueStore};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
    }

    fn dashboard(policy: ReminderPolicy) -> Dashboard<MemoryKeyValueStore> {
        let controller = EventController::open_in(
            EventStore::new(MemoryKeyValueStore::new()),
            now(),
            chrono_tz::UTC,
        );
        let scheduler = ReminderScheduler::new(Duration::from_secs(60), TimeDelta::hours(1), policy);
        Dashboard::new(controller, scheduler)
    }

    fn draft(name: &str, when: &str, priority: Priority) -> EventDraft {
        EventDraft {
            name: name.to_string(),
            when: when.to_string(),
            description: None,
            priority: Some(priority),
        }
    }

    #[test]
    fn mutations_produce_confirmations() {
        let mut dash = dashboard(ReminderPolicy::Once);
        let added = dash.add(draft("Standup", "+30m", Priority::Medium), now()).unwrap();
        assert_eq!(added.notices.len(), 1);
        assert_eq!(added.notices[0].message, "Event \"Standup\" added successfully!");

        let toggled = dash.toggle(added.value.id, now()).unwrap();
        assert!(toggled.notices.is_empty());

        let removed = dash.remove(added.value.id, now());
        assert_eq!(removed.notices[0].message, "Event deleted successfully!");
        assert!(dash.remove(added.value.id, now()).notices.is_empty());
    }

    #[test]
    fn persist_failure_becomes_warning_notice() {
        let mut dash = dashboard(ReminderPolicy::Once);
        dash.controller_mut().store_mut().backend_mut().fail_writes = true;

        let added = dash.add(draft("Standup", "+30m", Priority::Medium), now()).unwrap();
        assert_eq!(added.notices.len(), 2);
        assert!(added.notices[1].message.starts_with("Warning:"));
        assert_eq!(dash.controller().events().len(), 1);
    }

    #[test]
    fn visible_follows_selected_filter() {
        let mut dash = dashboard(ReminderPolicy::Once);
        dash.add(draft("Deploy", "+2h", Priority::High), now()).unwrap();
        dash.add(draft("Retro", "+2d", Priority::Low), now()).unwrap();

        assert_eq!(dash.visible(now()).len(), 2);
        dash.set_filter(FilterMode::High);
        let names: Vec<&str> = dash.visible(now()).iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Deploy"]);
    }

    #[test]
    fn one_tick_reminds_about_standup() {
        let mut dash = dashboard(ReminderPolicy::Once);
        dash.add(draft("Standup", "+30m", Priority::Medium), now()).unwrap();
        dash.add(draft("Later", "+3h", Priority::Medium), now()).unwrap();

        let reminders = dash.remind(now());
        assert_eq!(reminders.len(), 1);
        assert!(reminders[0].message.contains("Standup"));
    }

    #[tokio::test(start_paused = true)]
    async fn armed_scheduler_ticks_immediately_then_every_period() {
        let mut dash = dashboard(ReminderPolicy::Repeat);
        dash.add(draft("Standup", "+30m", Priority::Medium), now()).unwrap();
        let shared = dash.into_shared();
        let notes = NotificationCenter::default().into_shared();
        let mut rx = notes.lock().subscribe();

        let start = tokio::time::Instant::now();
        let base = now();
        let clock = move || base + TimeDelta::from_std(start.elapsed()).unwrap_or_default();
        let handle = arm_reminders(shared.clone(), notes.clone(), clock).unwrap();

        assert_eq!(shared.lock().scheduler().state(), SchedulerState::Armed);
        assert!(arm_reminders(shared.clone(), notes.clone(), now).is_err());

        match rx.recv().await.unwrap() {
            NotificationEvent::Shown(note) => {
                assert_eq!(note.kind, NotificationKind::Reminder);
                assert!(note.message.contains("Standup"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        tokio::time::sleep(Duration::from_secs(61)).await;
        let mut shown = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, NotificationEvent::Shown(_)) {
                shown += 1;
            }
        }
        assert_eq!(shown, 1);
        handle.abort();
    }
}
