//! In-memory event tables.
//!
//! [`LiveEventTable`] holds the last accepted raw record of every event the
//! feed currently reports. [`ArchivedEventTable`] holds the transformed
//! snapshot of every event that has left the feed; the first archive of an
//! ID wins and is never overwritten.

use std::collections::BTreeMap;
use std::sync::RwLock;

use scoreline_types::{EventId, RawEvent, SportEvent};

use crate::locks;

/// Live raw records keyed by event ID.
#[derive(Debug, Default)]
pub struct LiveEventTable {
    rows: RwLock<BTreeMap<EventId, RawEvent>>,
}

impl LiveEventTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored record for `id`, if any.
    pub fn get(&self, id: &EventId) -> Option<RawEvent> {
        locks::read(&self.rows).get(id).cloned()
    }

    /// Whether `id` is tracked.
    pub fn contains(&self, id: &EventId) -> bool {
        locks::read(&self.rows).contains_key(id)
    }

    /// Insert or replace the record under its own ID. Returns the previous one.
    pub fn insert(&self, record: RawEvent) -> Option<RawEvent> {
        locks::write(&self.rows).insert(record.id.clone(), record)
    }

    /// Remove and return the record for `id`.
    pub fn remove(&self, id: &EventId) -> Option<RawEvent> {
        locks::write(&self.rows).remove(id)
    }

    /// Every tracked ID, ascending.
    pub fn ids(&self) -> Vec<EventId> {
        locks::read(&self.rows).keys().cloned().collect()
    }

    /// Every stored record, ascending by ID.
    pub fn snapshot(&self) -> Vec<RawEvent> {
        locks::read(&self.rows).values().cloned().collect()
    }

    /// Number of tracked events.
    pub fn len(&self) -> usize {
        locks::read(&self.rows).len()
    }

    /// Whether no event is tracked.
    pub fn is_empty(&self) -> bool {
        locks::read(&self.rows).is_empty()
    }
}

/// Archived snapshots of events that left the feed.
#[derive(Debug, Default)]
pub struct ArchivedEventTable {
    rows: RwLock<BTreeMap<EventId, SportEvent>>,
}

impl ArchivedEventTable {
    /// Create an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive `event` unless its ID is already archived.
    ///
    /// Returns `true` if the snapshot was stored.
    pub fn archive(&self, event: SportEvent) -> bool {
        let mut rows = locks::write(&self.rows);
        if rows.contains_key(&event.id) {
            return false;
        }
        rows.insert(event.id.clone(), event);
        true
    }

    /// The archived snapshot for `id`, if any.
    pub fn get(&self, id: &EventId) -> Option<SportEvent> {
        locks::read(&self.rows).get(id).cloned()
    }

    /// Every archived snapshot, ascending by ID.
    pub fn all(&self) -> Vec<SportEvent> {
        locks::read(&self.rows).values().cloned().collect()
    }

    /// Number of archived events.
    pub fn len(&self) -> usize {
        locks::read(&self.rows).len()
    }

    /// Whether nothing is archived.
    pub fn is_empty(&self) -> bool {
        locks::read(&self.rows).is_empty()
    }
}
