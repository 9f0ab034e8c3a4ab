use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{
  DateTime,
  TimeDelta,
  Utc
};
use tracing::{
  debug,
  info
};

use crate::event::{
  Event,
  EventId
};

pub const DEFAULT_PERIOD: Duration =
  Duration::from_secs(60);

pub const DEFAULT_WINDOW_MINUTES: i64 =
  60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
  pub event_id:     EventId,
  pub name:         String,
  pub scheduled_at: DateTime<Utc>,
  pub message:      String
}

impl Reminder {
  fn for_event(event: &Event) -> Self {
    Self {
      event_id:     event.id,
      name:         event.name.clone(),
      scheduled_at: event.scheduled_at,
      message:      format!(
        "Reminder: \"{}\" is coming up \
         soon!",
        event.name
      )
    }
  }
}

/// What happens when an event is still inside the window on a later
/// tick.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq,
)]
pub enum ReminderPolicy {
  /// Remind once per event and scheduled time.
  #[default]
  Once,
  /// Remind on every tick the event qualifies.
  Repeat
}

impl FromStr for ReminderPolicy {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "once" | "off" | "no"
      | "false" | "0" => {
        Ok(ReminderPolicy::Once)
      }
      | "repeat" | "on" | "yes"
      | "true" | "1" => {
        Ok(ReminderPolicy::Repeat)
      }
      | other => {
        Err(anyhow!(
          "invalid reminder policy: \
           {other}"
        ))
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
  Idle,
  Armed
}

/// Incomplete events with `now < scheduled_at < now + window`, in input
/// order.
pub fn scan(
  events: &[Event],
  now: DateTime<Utc>,
  window: TimeDelta
) -> Vec<Reminder> {
  let horizon = now + window;
  events
    .iter()
    .filter(|event| {
      !event.completed
        && event.scheduled_at > now
        && event.scheduled_at < horizon
    })
    .map(Reminder::for_event)
    .collect()
}

#[derive(Debug, Clone)]
pub struct ReminderScheduler {
  state:    SchedulerState,
  period:   Duration,
  window:   TimeDelta,
  policy:   ReminderPolicy,
  notified: HashSet<(EventId, DateTime<Utc>)>
}

impl Default for ReminderScheduler {
  fn default() -> Self {
    Self::new(
      DEFAULT_PERIOD,
      TimeDelta::minutes(
        DEFAULT_WINDOW_MINUTES
      ),
      ReminderPolicy::default()
    )
  }
}

impl ReminderScheduler {
  pub fn new(
    period: Duration,
    window: TimeDelta,
    policy: ReminderPolicy
  ) -> Self {
    Self {
      state: SchedulerState::Idle,
      period,
      window,
      policy,
      notified: HashSet::new()
    }
  }

  pub fn state(&self) -> SchedulerState {
    self.state
  }

  pub fn period(&self) -> Duration {
    self.period
  }

  pub fn window(&self) -> TimeDelta {
    self.window
  }

  pub fn policy(&self) -> ReminderPolicy {
    self.policy
  }

  /// Idle to Armed. There is no way back.
  pub fn mark_armed(
    &mut self
  ) -> anyhow::Result<()> {
    if self.state == SchedulerState::Armed
    {
      return Err(anyhow!(
        "reminder scheduler is \
         already armed"
      ));
    }
    self.state = SchedulerState::Armed;
    info!(
      period_secs = self.period.as_secs(),
      window_mins =
        self.window.num_minutes(),
      policy = ?self.policy,
      "reminder scheduler armed"
    );
    Ok(())
  }

  /// One scan under the configured policy.
  #[tracing::instrument(skip(
    self, events, now
  ))]
  pub fn tick(
    &mut self,
    events: &[Event],
    now: DateTime<Utc>
  ) -> Vec<Reminder> {
    let due =
      scan(events, now, self.window);

    let out = match self.policy {
      | ReminderPolicy::Repeat => due,
      | ReminderPolicy::Once => {
        let live: HashSet<(
          EventId,
          DateTime<Utc>
        )> = events
          .iter()
          .map(|event| {
            (event.id, event.scheduled_at)
          })
          .collect();
        self
          .notified
          .retain(|key| live.contains(key));

        due
          .into_iter()
          .filter(|reminder| {
            self.notified.insert((
              reminder.event_id,
              reminder.scheduled_at
            ))
          })
          .collect()
      }
    };

    debug!(
      reminders = out.len(),
      "reminder tick"
    );
    out
  }
}
