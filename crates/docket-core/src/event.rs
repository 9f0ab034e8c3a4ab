use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::datetime::{calendar_date, iso_date_serde};

/// Creation timestamp in Unix milliseconds.
pub type EventId = u64;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(Priority::Low),
            "m" | "med" | "medium" => Ok(Priority::Medium),
            "h" | "high" => Ok(Priority::High),
            other => Err(anyhow!("invalid priority: {other} (expected low, medium or high)")),
        }
    }
}

/// One schedulable record. Field names match the persisted snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,

    #[serde(alias = "title")]
    pub name: String,

    #[serde(rename = "date", with = "iso_date_serde")]
    pub scheduled_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub completed: bool,
}

impl Event {
    pub fn new(id: EventId, name: String, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            scheduled_at,
            description: None,
            priority: Priority::default(),
            completed: false,
        }
    }

    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at > now && !self.completed
    }

    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at < now
    }

    pub fn is_on_day_of(&self, now: DateTime<Utc>, tz: &Tz) -> bool {
        calendar_date(self.scheduled_at, tz) == calendar_date(now, tz)
    }

    /// Short countdown label shown next to the date.
    pub fn time_until(&self, now: DateTime<Utc>) -> String {
        let diff = self.scheduled_at - now;
        if diff.num_milliseconds() < 0 {
            return "(Past)".to_string();
        }

        let days = diff.num_days();
        let hours = diff.num_hours() % 24;
        if days > 0 {
            format!("({days} days, {hours} hours left)")
        } else if hours > 0 {
            format!("({hours} hours left)")
        } else {
            "(Soon)".to_string()
        }
    }
}

/// Input for creating an event; `when` is parsed by the controller.
#[derive(Debug, Clone, Default)]
pub struct EventDraft {
    pub name: String,
    pub when: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub name: Option<String>,
    pub when: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.when.is_none()
            && self.description.is_none()
            && self.priority.is_none()
    }
}
