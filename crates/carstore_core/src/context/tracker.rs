//! Per-context change tracking.
//!
//! # Invariants
//! - One entry per `CarId`.
//! - `original_version` is the version the store held when the entry was
//!   first observed; it is the concurrency token used on save.
//! - Pending entries are written in the order they were first tracked.

use crate::model::car::{Car, CarId};
use std::collections::HashMap;

/// Lifecycle state of a tracked car inside one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// New; inserted on save.
    Added,
    /// Matches the store as of the last read or save.
    Unchanged,
    /// Attributes changed; updated on save.
    Modified,
    /// Deleted on save.
    Deleted,
}

#[derive(Debug, Clone)]
pub(crate) struct TrackedEntry {
    pub(crate) current: Car,
    /// Snapshot as read from the store; `None` for added or attached cars.
    pub(crate) original: Option<Car>,
    pub(crate) original_version: i64,
    pub(crate) state: EntityState,
    seq: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    entries: HashMap<CarId, TrackedEntry>,
    next_seq: u64,
}

impl ChangeTracker {
    pub(crate) fn get(&self, id: &CarId) -> Option<&TrackedEntry> {
        self.entries.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &CarId) -> Option<&mut TrackedEntry> {
        self.entries.get_mut(id)
    }

    pub(crate) fn contains(&self, id: &CarId) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Tracks a car loaded from the store.
    pub(crate) fn track_unchanged(&mut self, car: Car) {
        let version = car.version;
        self.insert(car.clone(), Some(car), version, EntityState::Unchanged);
    }

    pub(crate) fn track_added(&mut self, car: Car) {
        let version = car.version;
        self.insert(car, None, version, EntityState::Added);
    }

    /// Attaches a car the context has not seen, trusting its `version`.
    pub(crate) fn track_attached(&mut self, car: Car, state: EntityState) {
        let version = car.version;
        self.insert(car, None, version, state);
    }

    pub(crate) fn mark(&mut self, id: &CarId, state: EntityState) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.state = state;
        }
    }

    pub(crate) fn detach(&mut self, id: &CarId) -> Option<TrackedEntry> {
        self.entries.remove(id)
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.entries
            .values()
            .any(|entry| entry.state != EntityState::Unchanged)
    }

    /// Pending entries in tracking order.
    pub(crate) fn pending(&self) -> Vec<&TrackedEntry> {
        let mut pending: Vec<&TrackedEntry> = self
            .entries
            .values()
            .filter(|entry| entry.state != EntityState::Unchanged)
            .collect();
        pending.sort_by_key(|entry| entry.seq);
        pending
    }

    /// Marks a saved entry as matching the store at `version`.
    pub(crate) fn accept(&mut self, id: &CarId, version: i64) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.current.version = version;
            entry.original = Some(entry.current.clone());
            entry.original_version = version;
            entry.state = EntityState::Unchanged;
        }
    }

    /// Drops pending work and returns how many entries were affected.
    pub(crate) fn discard(&mut self) -> usize {
        let mut affected = 0;
        self.entries.retain(|_, entry| match entry.state {
            EntityState::Unchanged => true,
            EntityState::Added => {
                affected += 1;
                false
            }
            EntityState::Modified | EntityState::Deleted => {
                affected += 1;
                match entry.original.clone() {
                    Some(original) => {
                        entry.current = original;
                        entry.state = EntityState::Unchanged;
                        true
                    }
                    None => false,
                }
            }
        });
        affected
    }

    fn insert(
        &mut self,
        current: Car,
        original: Option<Car>,
        original_version: i64,
        state: EntityState,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            current.id,
            TrackedEntry {
                current,
                original,
                original_version,
                state,
                seq,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeTracker, EntityState};
    use crate::model::car::Car;
    use serde_json::Map;

    #[test]
    fn pending_follows_tracking_order() {
        let mut tracker = ChangeTracker::default();
        let first = Car::new(Map::new());
        let second = Car::new(Map::new());
        let loaded = Car {
            version: 3,
            ..Car::new(Map::new())
        };

        tracker.track_added(second.clone());
        tracker.track_unchanged(loaded.clone());
        tracker.track_added(first.clone());

        let ids: Vec<_> = tracker.pending().iter().map(|entry| entry.current.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert!(tracker.has_pending());
    }

    #[test]
    fn discard_reverts_modified_and_drops_added() {
        let mut tracker = ChangeTracker::default();
        let mut loaded = Car {
            version: 2,
            ..Car::new(Map::new())
        };
        loaded.set_attribute("color", "red");
        tracker.track_unchanged(loaded.clone());

        let entry = tracker.get_mut(&loaded.id).unwrap();
        entry.current.set_attribute("color", "blue");
        entry.state = EntityState::Modified;

        let added = Car::new(Map::new());
        tracker.track_added(added.clone());

        assert_eq!(tracker.discard(), 2);
        assert!(!tracker.contains(&added.id));
        let reverted = tracker.get(&loaded.id).unwrap();
        assert_eq!(reverted.state, EntityState::Unchanged);
        assert_eq!(reverted.current, loaded);
        assert!(!tracker.has_pending());
    }

    #[test]
    fn attached_entry_keeps_caller_version_and_is_dropped_on_discard() {
        let mut tracker = ChangeTracker::default();
        let attached = Car {
            version: 4,
            ..Car::new(Map::new())
        };

        tracker.track_attached(attached.clone(), EntityState::Modified);

        let entry = tracker.get(&attached.id).unwrap();
        assert_eq!(entry.state, EntityState::Modified);
        assert_eq!(entry.original_version, 4);
        assert!(entry.original.is_none());
        assert_eq!(tracker.pending().len(), 1);

        assert_eq!(tracker.discard(), 1);
        assert!(!tracker.contains(&attached.id));
    }

    #[test]
    fn accept_resets_original_version() {
        let mut tracker = ChangeTracker::default();
        let car = Car::new(Map::new());
        tracker.track_added(car.clone());

        tracker.accept(&car.id, 1);

        let entry = tracker.get(&car.id).unwrap();
        assert_eq!(entry.state, EntityState::Unchanged);
        assert_eq!(entry.original_version, 1);
        assert_eq!(entry.current.version, 1);
    }
}
