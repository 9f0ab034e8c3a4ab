use std::collections::HashSet;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::datetime::{parse_schedule_expr_in, project_timezone};
use crate::error::{DashboardError, PersistenceError};
use crate::event::{Event, EventDraft, EventId, EventPatch};
use crate::filter::{self, FilterMode};
use crate::store::{EventStore, KeyValueStore};

/// Counts shown above the event list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Insights {
    pub total: usize,
    pub upcoming: usize,
    pub today: usize,
    pub high_priority: usize,
}

impl Insights {
    pub fn compute(events: &[Event], now: DateTime<Utc>, tz: &Tz) -> Self {
        Self {
            total: events.len(),
            upcoming: filter::count(events, FilterMode::Upcoming, now, tz),
            today: filter::count(events, FilterMode::Today, now, tz),
            high_priority: filter::count(events, FilterMode::High, now, tz),
        }
    }
}

/// Result of a mutation that was applied in memory. A failed snapshot
/// write does not undo the change; it is carried in `persist_error`.
#[derive(Debug)]
pub struct Applied<T> {
    pub value: T,
    pub persist_error: Option<PersistenceError>,
}

impl<T> Applied<T> {
    pub fn is_persisted(&self) -> bool {
        self.persist_error.is_none()
    }
}

#[derive(Debug)]
pub struct EventController<K> {
    store: EventStore<K>,
    events: Vec<Event>,
    insights: Insights,
    tz: Tz,
}

impl<K: KeyValueStore> EventController<K> {
    #[tracing::instrument(skip(store, now))]
    pub fn open(store: EventStore<K>, now: DateTime<Utc>) -> Self {
        Self::open_in(store, now, *project_timezone())
    }

    pub fn open_in(store: EventStore<K>, now: DateTime<Utc>, tz: Tz) -> Self {
        let events = store.load();
        let insights = Insights::compute(&events, now, &tz);
        info!(count = events.len(), "loaded events");
        Self {
            store,
            events,
            insights,
            tz,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.events.iter().find(|event| event.id == id)
    }

    pub fn insights(&self) -> Insights {
        self.insights
    }

    pub fn timezone(&self) -> &Tz {
        &self.tz
    }

    pub fn store(&self) -> &EventStore<K> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EventStore<K> {
        &mut self.store
    }

    pub fn refresh_insights(&mut self, now: DateTime<Utc>) -> Insights {
        self.insights = Insights::compute(&self.events, now, &self.tz);
        self.insights
    }

    /// Replaces the in-memory list with whatever the snapshot holds now.
    #[tracing::instrument(skip(self, now))]
    pub fn reload(&mut self, now: DateTime<Utc>) {
        self.events = self.store.load();
        debug!(count = self.events.len(), "reloaded events from snapshot");
        self.refresh_insights(now);
    }

    #[tracing::instrument(skip(self, draft, now), fields(name = %draft.name))]
    pub fn create(
        &mut self,
        draft: EventDraft,
        now: DateTime<Utc>,
    ) -> Result<Applied<Event>, DashboardError> {
        let name = validate_name(&draft.name)?;
        let scheduled_at = self.parse_when(&draft.when, now)?;

        let id = self.next_id(now)?;
        let mut event = Event::new(id, name, scheduled_at);
        event.description = normalize_description(draft.description);
        event.priority = draft.priority.unwrap_or_default();

        self.events.push(event.clone());
        info!(id, "event created");
        let persist_error = self.commit(now);
        Ok(Applied {
            value: event,
            persist_error,
        })
    }

    #[tracing::instrument(skip(self, patch, now))]
    pub fn update(
        &mut self,
        id: EventId,
        patch: EventPatch,
        now: DateTime<Utc>,
    ) -> Result<Applied<Event>, DashboardError> {
        let idx = self.position(id)?;

        // Validate everything before touching the stored record.
        let mut next = self.events[idx].clone();
        if let Some(name) = patch.name.as_deref() {
            next.name = validate_name(name)?;
        }
        if let Some(when) = patch.when.as_deref() {
            next.scheduled_at = self.parse_when(when, now)?;
        }
        if let Some(description) = patch.description {
            next.description = normalize_description(Some(description));
        }
        if let Some(priority) = patch.priority {
            next.priority = priority;
        }

        self.events[idx] = next.clone();
        info!(id, "event updated");
        let persist_error = self.commit(now);
        Ok(Applied {
            value: next,
            persist_error,
        })
    }

    /// Removing an absent id is a no-op, not an error.
    #[tracing::instrument(skip(self, now))]
    pub fn delete(&mut self, id: EventId, now: DateTime<Utc>) -> Applied<Option<Event>> {
        let Some(idx) = self.events.iter().position(|event| event.id == id) else {
            debug!(id, "delete of unknown id ignored");
            return Applied {
                value: None,
                persist_error: None,
            };
        };

        let removed = self.events.remove(idx);
        info!(id, "event deleted");
        let persist_error = self.commit(now);
        Applied {
            value: Some(removed),
            persist_error,
        }
    }

    #[tracing::instrument(skip(self, now))]
    pub fn toggle_complete(
        &mut self,
        id: EventId,
        now: DateTime<Utc>,
    ) -> Result<Applied<Event>, DashboardError> {
        let idx = self.position(id)?;
        let event = &mut self.events[idx];
        event.completed = !event.completed;
        let toggled = event.clone();

        info!(id, completed = toggled.completed, "event completion toggled");
        let persist_error = self.commit(now);
        Ok(Applied {
            value: toggled,
            persist_error,
        })
    }

    /// Replaces the whole collection, as an import does.
    #[tracing::instrument(skip(self, events, now), fields(count = events.len()))]
    pub fn replace_all(
        &mut self,
        events: Vec<Event>,
        now: DateTime<Utc>,
    ) -> Result<Applied<usize>, DashboardError> {
        let mut seen = HashSet::with_capacity(events.len());
        for event in &events {
            if !seen.insert(event.id) {
                return Err(DashboardError::validation(format!(
                    "duplicate event id {}",
                    event.id
                )));
            }
            validate_name(&event.name)?;
        }

        let count = events.len();
        self.events = events;
        let persist_error = self.commit(now);
        Ok(Applied {
            value: count,
            persist_error,
        })
    }

    fn position(&self, id: EventId) -> Result<usize, DashboardError> {
        self.events
            .iter()
            .position(|event| event.id == id)
            .ok_or(DashboardError::NotFound(id))
    }

    fn parse_when(&self, when: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, DashboardError> {
        parse_schedule_expr_in(when, now, &self.tz)
            .map_err(|err| DashboardError::validation(format!("{err:#}")))
    }

    fn next_id(&self, now: DateTime<Utc>) -> Result<EventId, DashboardError> {
        let stamp = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        match self.events.iter().map(|event| event.id).max() {
            Some(max) if stamp <= max => max
                .checked_add(1)
                .ok_or_else(|| DashboardError::validation("event id space exhausted")),
            _ => Ok(stamp),
        }
    }

    fn commit(&mut self, now: DateTime<Utc>) -> Option<PersistenceError> {
        self.refresh_insights(now);
        match self.store.save_all(&self.events) {
            Ok(()) => None,
            Err(err) => {
                warn!(error = %err, "snapshot write failed; keeping in-memory state");
                Some(err)
            }
        }
    }
}

fn validate_name(raw: &str) -> Result<String, DashboardError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DashboardError::validation("name is required"));
    }
    Ok(name.to_string())
}

fn normalize_description(raw: Option<String>) -> Option<String> {
    raw.map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{EventController, Insights};
    use crate::error::DashboardError;
    use crate::event::{Event, EventDraft, EventPatch, Priority};
    use crate::store::{EventStore, KeyValueStore, MemoryKeyValueStore};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn controller() -> EventController<MemoryKeyValueStore> {
        EventController::open_in(EventStore::new(MemoryKeyValueStore::new()), now(), chrono_tz::UTC)
    }

    fn draft(name: &str, when: &str) -> EventDraft {
        EventDraft {
            name: name.to_string(),
            when: when.to_string(),
            ..EventDraft::default()
        }
    }

    #[test]
    fn create_assigns_monotonic_ids_and_persists() {
        let mut ctl = controller();
        let first = ctl.create(draft("Standup", "+30m"), now()).unwrap();
        let second = ctl.create(draft("Lunch", "+2h"), now()).unwrap();

        assert!(first.is_persisted());
        assert_eq!(first.value.id, now().timestamp_millis() as u64);
        assert_eq!(second.value.id, first.value.id + 1);
        assert_eq!(first.value.priority, Priority::Medium);
        assert_eq!(ctl.store().load(), ctl.events().to_vec());
    }

    #[test]
    fn create_rejects_missing_fields() {
        let mut ctl = controller();
        let err = ctl.create(draft("   ", "+1h"), now()).unwrap_err();
        assert!(matches!(err, DashboardError::Validation(_)));

        let err = ctl.create(draft("Standup", "not a date"), now()).unwrap_err();
        assert!(matches!(err, DashboardError::Validation(_)));
        assert!(ctl.events().is_empty());
    }

    #[test]
    fn update_merges_only_given_fields() {
        let mut ctl = controller();
        let mut input = draft("Standup", "+1h");
        input.description = Some("daily".to_string());
        input.priority = Some(Priority::High);
        let created = ctl.create(input, now()).unwrap().value;

        let patch = EventPatch {
            name: Some("Team standup".to_string()),
            ..EventPatch::default()
        };
        let updated = ctl.update(created.id, patch, now()).unwrap().value;

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.name, "Team standup");
        assert_eq!(updated.scheduled_at, created.scheduled_at);
        assert_eq!(updated.description.as_deref(), Some("daily"));
        assert_eq!(updated.priority, Priority::High);
    }

    #[test]
    fn invalid_update_leaves_record_untouched() {
        let mut ctl = controller();
        let created = ctl.create(draft("Standup", "+1h"), now()).unwrap().value;
        let patch = EventPatch {
            name: Some("Renamed".to_string()),
            when: Some("whenever".to_string()),
            ..EventPatch::default()
        };
        assert!(matches!(
            ctl.update(created.id, patch, now()),
            Err(DashboardError::Validation(_))
        ));
        assert_eq!(ctl.get(created.id), Some(&created));
    }

    #[test]
    fn unknown_ids() {
        let mut ctl = controller();
        ctl.create(draft("Standup", "+1h"), now()).unwrap();
        let before = ctl.events().to_vec();

        assert!(matches!(
            ctl.update(42, EventPatch::default(), now()),
            Err(DashboardError::NotFound(42))
        ));
        assert!(matches!(ctl.toggle_complete(42, now()), Err(DashboardError::NotFound(42))));

        let deleted = ctl.delete(42, now());
        assert!(deleted.value.is_none());
        assert!(deleted.is_persisted());
        assert_eq!(ctl.events(), before.as_slice());
    }

    #[test]
    fn toggle_twice_restores_state() {
        let mut ctl = controller();
        let created = ctl.create(draft("Standup", "+1h"), now()).unwrap().value;

        assert!(ctl.toggle_complete(created.id, now()).unwrap().value.completed);
        assert!(!ctl.toggle_complete(created.id, now()).unwrap().value.completed);
        assert_eq!(ctl.get(created.id), Some(&created));
    }

    #[test]
    fn insights_follow_mutations() {
        let mut ctl = controller();
        let mut high = draft("Deploy", "+3h");
        high.priority = Some(Priority::High);
        let deploy = ctl.create(high, now()).unwrap().value;
        ctl.create(draft("Yesterday", "-1d"), now()).unwrap();

        assert_eq!(
            ctl.insights(),
            Insights {
                total: 2,
                upcoming: 1,
                today: 1,
                high_priority: 1,
            }
        );

        ctl.toggle_complete(deploy.id, now()).unwrap();
        assert_eq!(
            ctl.insights(),
            Insights {
                total: 2,
                upcoming: 0,
                today: 0,
                high_priority: 0,
            }
        );
    }

    #[test]
    fn failed_persist_keeps_memory_state() {
        let mut ctl = controller();
        ctl.store_mut().backend_mut().fail_writes = true;

        let created = ctl.create(draft("Standup", "+1h"), now()).unwrap();
        assert!(!created.is_persisted());
        assert_eq!(ctl.events().len(), 1);
        assert!(ctl.store().backend().get("events").unwrap().is_none());

        ctl.store_mut().backend_mut().fail_writes = false;
        assert!(ctl.toggle_complete(created.value.id, now()).unwrap().is_persisted());
        assert_eq!(ctl.store().load().len(), 1);
    }

    #[test]
    fn replay_matches_fresh_store() {
        let script = |ctl: &mut EventController<MemoryKeyValueStore>| {
            let a = ctl.create(draft("A", "+1h"), now()).unwrap().value;
            let b = ctl.create(draft("B", "+2h"), now() + Duration::seconds(1)).unwrap().value;
            ctl.update(
                a.id,
                EventPatch {
                    priority: Some(Priority::Low),
                    ..EventPatch::default()
                },
                now(),
            )
            .unwrap();
            ctl.delete(b.id, now());
            ctl.create(draft("C", "tomorrow"), now() + Duration::seconds(2)).unwrap();
        };

        let mut first = controller();
        script(&mut first);
        let mut second = controller();
        script(&mut second);

        assert_eq!(first.events(), second.events());

        let reopened = EventController::open_in(
            EventStore::new(first.store().backend().clone()),
            now(),
            chrono_tz::UTC,
        );
        assert_eq!(reopened.events(), first.events());
    }

    #[test]
    fn create_rejects_out_of_range_offsets() {
        let mut ctl = controller();
        for when in ["+999999999999999d", "+1000000000000m"] {
            let err = ctl.create(draft("Far away", when), now()).unwrap_err();
            assert!(matches!(err, DashboardError::Validation(_)), "{when}");
        }
        assert!(ctl.events().is_empty());
    }

    #[test]
    fn create_fails_cleanly_when_ids_are_exhausted() {
        let mut ctl = controller();
        let last = Event::new(u64::MAX, "Last".to_string(), now());
        ctl.replace_all(vec![last], now()).unwrap();

        let err = ctl.create(draft("One more", "+1h"), now()).unwrap_err();
        assert!(matches!(err, DashboardError::Validation(_)));
        assert_eq!(ctl.events().len(), 1);
    }

    #[test]
    fn replace_all_rejects_duplicate_ids() {
        let mut ctl = controller();
        let event = ctl.create(draft("A", "+1h"), now()).unwrap().value;
        let err = ctl
            .replace_all(vec![event.clone(), event], now())
            .unwrap_err();
        assert!(matches!(err, DashboardError::Validation(_)));
        assert_eq!(ctl.events().len(), 1);
    }
}
