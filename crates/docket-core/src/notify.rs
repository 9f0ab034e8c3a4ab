use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type NotificationId = u64;

pub type SharedNotifications = Arc<Mutex<NotificationCenter>>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Normal,
    Reminder,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Normal => f.write_str("normal"),
            NotificationKind::Reminder => f.write_str("reminder"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Visible,
    Leaving,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub message: String,
    pub kind: NotificationKind,
    pub shown_at: DateTime<Utc>,
    pub phase: Phase,
}

/// Lifecycle changes, for whoever draws the notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    Shown(Notification),
    Leaving(NotificationId),
    Removed(NotificationId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationTiming {
    /// How long a notification stays fully visible.
    pub display: Duration,
    /// Exit transition before it is removed.
    pub exit: Duration,
}

impl Default for NotificationTiming {
    fn default() -> Self {
        Self {
            display: Duration::from_secs(5),
            exit: Duration::from_millis(300),
        }
    }
}

/// Transient messages, independent of the event store. Nothing caps how
/// many are active at once.
#[derive(Debug)]
pub struct NotificationCenter {
    timing: NotificationTiming,
    next_id: NotificationId,
    active: Vec<Notification>,
    events: broadcast::Sender<NotificationEvent>,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(NotificationTiming::default())
    }
}

impl NotificationCenter {
    pub fn new(timing: NotificationTiming) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            timing,
            next_id: 1,
            active: vec![],
            events,
        }
    }

    pub fn into_shared(self) -> SharedNotifications {
        Arc::new(Mutex::new(self))
    }

    pub fn timing(&self) -> NotificationTiming {
        self.timing
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.events.subscribe()
    }

    pub fn active(&self) -> &[Notification] {
        &self.active
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.active.iter().find(|note| note.id == id)
    }

    #[tracing::instrument(skip(self, message, now), fields(kind = %kind))]
    pub fn show(
        &mut self,
        message: impl Into<String>,
        kind: NotificationKind,
        now: DateTime<Utc>,
    ) -> NotificationId {
        let id = self.next_id;
        self.next_id += 1;

        let note = Notification {
            id,
            message: message.into(),
            kind,
            shown_at: now,
            phase: Phase::Visible,
        };
        info!(id, message = %note.message, "notification shown");
        self.active.push(note.clone());
        self.publish(NotificationEvent::Shown(note));
        id
    }

    /// Starts the exit transition. Returns false for unknown or already
    /// leaving notifications.
    pub fn begin_exit(&mut self, id: NotificationId) -> bool {
        let Some(note) = self.active.iter_mut().find(|note| note.id == id) else {
            return false;
        };
        if note.phase == Phase::Leaving {
            return false;
        }
        note.phase = Phase::Leaving;
        self.publish(NotificationEvent::Leaving(id));
        true
    }

    pub fn remove(&mut self, id: NotificationId) -> Option<Notification> {
        let idx = self.active.iter().position(|note| note.id == id)?;
        let note = self.active.remove(idx);
        debug!(id, "notification removed");
        self.publish(NotificationEvent::Removed(id));
        Some(note)
    }

    /// Advances every notification against `now` instead of a timer.
    /// Returns the ids that were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<NotificationId> {
        let display = to_delta(self.timing.display);
        let gone = display + to_delta(self.timing.exit);

        let mut leaving = vec![];
        let mut removed = vec![];
        for note in &self.active {
            let age = now - note.shown_at;
            if age >= gone {
                removed.push(note.id);
            } else if age >= display && note.phase == Phase::Visible {
                leaving.push(note.id);
            }
        }

        for id in leaving {
            self.begin_exit(id);
        }
        for id in &removed {
            self.remove(*id);
        }
        removed
    }

    fn publish(&self, event: NotificationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn to_delta(span: Duration) -> TimeDelta {
    TimeDelta::from_std(span).unwrap_or(TimeDelta::MAX)
}

/// Shows a notification and arms its own removal timer.
pub fn present(
    shared: &SharedNotifications,
    message: impl Into<String>,
    kind: NotificationKind,
    now: DateTime<Utc>,
) -> (NotificationId, JoinHandle<()>) {
    let id = shared.lock().show(message, kind, now);
    (id, spawn_expiry(shared.clone(), id))
}

/// Runs one notification's display and exit timers on the tokio clock.
/// There is no way to cancel it short of dropping the runtime.
pub fn spawn_expiry(shared: SharedNotifications, id: NotificationId) -> JoinHandle<()> {
    let timing = shared.lock().timing();
    tokio::spawn(async move {
        tokio::time::sleep(timing.display).await;
        shared.lock().begin_exit(id);
        tokio::time::sleep(timing.exit).await;
        shared.lock().remove(id);
    })
}
