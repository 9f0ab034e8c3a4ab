use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Utc
};
use chrono_tz::Tz;
use tracing::trace;

use crate::datetime::project_timezone;
use crate::event::{
  Event,
  Priority
};

/// Named predicate selecting which events are displayed. Every mode
/// except `All` hides completed events.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
)]
pub enum FilterMode {
  #[default]
  All,
  Upcoming,
  Today,
  High
}

impl FilterMode {
  pub const ALL_MODES: [FilterMode; 4] = [
    FilterMode::All,
    FilterMode::Upcoming,
    FilterMode::Today,
    FilterMode::High
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      | FilterMode::All => "all",
      | FilterMode::Upcoming => {
        "upcoming"
      }
      | FilterMode::Today => "today",
      | FilterMode::High => "high"
    }
  }

  pub fn matches(
    self,
    event: &Event,
    now: DateTime<Utc>,
    tz: &Tz
  ) -> bool {
    match self {
      | FilterMode::All => true,
      | FilterMode::Upcoming => {
        event.is_upcoming(now)
      }
      | FilterMode::Today => {
        !event.completed
          && event.is_on_day_of(now, tz)
      }
      | FilterMode::High => {
        !event.completed
          && event.priority
            == Priority::High
      }
    }
  }
}

impl fmt::Display for FilterMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for FilterMode {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(FilterMode::All),
      | "upcoming" => {
        Ok(FilterMode::Upcoming)
      }
      | "today" => Ok(FilterMode::Today),
      | "high" | "high-priority"
      | "priority" => {
        Ok(FilterMode::High)
      }
      | other => {
        Err(anyhow!(
          "unknown filter mode: \
           {other} (expected all, \
           upcoming, today or high)"
        ))
      }
    }
  }
}

/// Filters with calendar days taken in the project timezone.
pub fn apply(
  events: &[Event],
  mode: FilterMode,
  now: DateTime<Utc>
) -> Vec<&Event> {
  apply_in(
    events,
    mode,
    now,
    project_timezone()
  )
}

#[tracing::instrument(skip(
  events, now, tz
))]
pub fn apply_in<'a>(
  events: &'a [Event],
  mode: FilterMode,
  now: DateTime<Utc>,
  tz: &Tz
) -> Vec<&'a Event> {
  let out: Vec<&Event> = events
    .iter()
    .filter(|event| {
      mode.matches(event, now, tz)
    })
    .collect();
  trace!(
    total = events.len(),
    shown = out.len(),
    "applied filter"
  );
  out
}

pub fn count(
  events: &[Event],
  mode: FilterMode,
  now: DateTime<Utc>,
  tz: &Tz
) -> usize {
  events
    .iter()
    .filter(|event| {
      mode.matches(event, now, tz)
    })
    .count()
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    TimeZone,
    Utc
  };

  use super::{
    FilterMode,
    apply_in
  };
  use crate::event::{
    Event,
    Priority
  };

  fn fixture(
    now: chrono::DateTime<Utc>
  ) -> Vec<Event> {
    let mut past = Event::new(
      1,
      "past".to_string(),
      now - Duration::hours(2)
    );
    past.priority = Priority::High;

    let later_today = Event::new(
      2,
      "later".to_string(),
      now + Duration::hours(1)
    );

    let mut done_high = Event::new(
      3,
      "done".to_string(),
      now + Duration::hours(3)
    );
    done_high.priority = Priority::High;
    done_high.completed = true;

    let next_week = Event::new(
      4,
      "next week".to_string(),
      now + Duration::days(7)
    );

    vec![
      past,
      later_today,
      done_high,
      next_week,
    ]
  }

  fn ids(events: &[&Event]) -> Vec<u64> {
    events
      .iter()
      .map(|event| event.id)
      .collect()
  }

  #[test]
  fn all_is_identity() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 18, 12, 0, 0
      )
      .unwrap();
    let events = fixture(now);
    let shown = apply_in(
      &events,
      FilterMode::All,
      now,
      &chrono_tz::UTC
    );
    assert_eq!(ids(&shown), vec![
      1, 2, 3, 4
    ]);
  }

  #[test]
  fn upcoming_today_and_high_modes()
  {
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 18, 12, 0, 0
      )
      .unwrap();
    let events = fixture(now);
    let tz = chrono_tz::UTC;

    assert_eq!(
      ids(&apply_in(
        &events,
        FilterMode::Upcoming,
        now,
        &tz
      )),
      vec![2, 4]
    );
    assert_eq!(
      ids(&apply_in(
        &events,
        FilterMode::Today,
        now,
        &tz
      )),
      vec![1, 2]
    );
    assert_eq!(
      ids(&apply_in(
        &events,
        FilterMode::High,
        now,
        &tz
      )),
      vec![1]
    );
  }

  #[test]
  fn completed_only_visible_under_all()
  {
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 18, 12, 0, 0
      )
      .unwrap();
    let mut events = fixture(now);
    for event in &mut events {
      event.completed = true;
    }

    for mode in [
      FilterMode::Upcoming,
      FilterMode::Today,
      FilterMode::High
    ] {
      assert!(
        apply_in(
          &events,
          mode,
          now,
          &chrono_tz::UTC
        )
        .is_empty()
      );
    }
  }

  #[test]
  fn yesterday_and_tomorrow_are_not_today()
  {
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 18, 12, 0, 0
      )
      .unwrap();
    let events = vec![
      Event::new(
        1,
        "yesterday".to_string(),
        now - Duration::days(1)
      ),
      Event::new(
        2,
        "tomorrow".to_string(),
        now + Duration::days(1)
      ),
    ];
    assert!(
      apply_in(
        &events,
        FilterMode::Today,
        now,
        &chrono_tz::UTC
      )
      .is_empty()
    );
  }

  #[test]
  fn today_follows_the_given_timezone()
  {
    // 02:00 UTC on the 19th is still the 18th in Mexico City.
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 18, 20, 0, 0
      )
      .unwrap();
    let events = vec![Event::new(
      1,
      "late".to_string(),
      now + Duration::hours(6)
    )];
    let mexico: chrono_tz::Tz =
      "America/Mexico_City"
        .parse()
        .unwrap();

    assert_eq!(
      apply_in(
        &events,
        FilterMode::Today,
        now,
        &mexico
      )
      .len(),
      1
    );
    assert!(
      apply_in(
        &events,
        FilterMode::Today,
        now,
        &chrono_tz::UTC
      )
      .is_empty()
    );
  }

  #[test]
  fn parses_mode_aliases() {
    assert_eq!(
      "high-priority"
        .parse::<FilterMode>()
        .unwrap(),
      FilterMode::High
    );
    assert_eq!(
      "Upcoming"
        .parse::<FilterMode>()
        .unwrap(),
      FilterMode::Upcoming
    );
    assert!(
      "someday"
        .parse::<FilterMode>()
        .is_err()
    );
  }
}
