//! Time-versioned ID-to-name cache.
//!
//! The mapping feed and the event feed evolve at different rates: an event
//! row may reference an ID whose name was changed (or dropped) by the
//! mapping feed since the row was last seen. [`VersionedMappingCache`]
//! therefore never overwrites a value. Each ID owns an append-only log of
//! [`MappingVersion`]s ordered by observation time, supporting both
//! "latest" and "as of timestamp" lookups.
//!
//! History is bounded by [`prune_older_than`](VersionedMappingCache::prune_older_than),
//! run periodically once [`start_pruning`](VersionedMappingCache::start_pruning)
//! is called. Pruning keeps, per ID, the earliest version still within the
//! retention window and everything after it. An ID whose whole history is
//! older than the window is dropped entirely, last known value included.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use scoreline_types::MappingId;
use tracing::debug;

use crate::locks;
use crate::runner::IntervalTaskRunner;

/// One observed value of an ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingVersion {
    /// The human-readable name.
    pub value: String,
    /// When the mapping feed reported it.
    pub observed_at: DateTime<Utc>,
}

/// Result of one prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// IDs dropped because their entire history was stale.
    pub ids_removed: usize,
    /// Versions dropped across all IDs (including dropped IDs).
    pub versions_removed: usize,
    /// IDs left in the cache.
    pub ids_remaining: usize,
}

/// Append-only, per-ID, timestamp-ordered mapping store.
///
/// All operations take `&self`; the map is serialized behind a single
/// `RwLock` so the mapping sync and the reconciliation engine can share
/// one instance through an [`Arc`].
#[derive(Default)]
pub struct VersionedMappingCache {
    entries: RwLock<BTreeMap<MappingId, Vec<MappingVersion>>>,
    pruner: Mutex<Option<IntervalTaskRunner>>,
}

impl VersionedMappingCache {
    /// Create an empty cache without periodic pruning.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `id`, observed now.
    pub fn set(&self, id: &MappingId, value: &str) {
        self.set_at(id, value, Utc::now());
    }

    /// Record `value` for `id` with an explicit observation time.
    ///
    /// A timestamp older than the ID's newest version is clamped to it so
    /// the log stays non-decreasing.
    pub fn set_at(&self, id: &MappingId, value: &str, observed_at: DateTime<Utc>) {
        let mut entries = locks::write(&self.entries);
        let versions = entries.entry(id.clone()).or_default();
        let observed_at = versions
            .last()
            .map_or(observed_at, |newest| observed_at.max(newest.observed_at));
        versions.push(MappingVersion {
            value: value.to_owned(),
            observed_at,
        });
    }

    /// Look up `id`: the latest value without a timestamp, otherwise the
    /// latest value observed at or before `at`.
    pub fn get(&self, id: &MappingId, at: Option<DateTime<Utc>>) -> Option<String> {
        match at {
            None => self.latest(id),
            Some(at) => self.as_of(id, at),
        }
    }

    /// The most recent value of `id`.
    pub fn latest(&self, id: &MappingId) -> Option<String> {
        let entries = locks::read(&self.entries);
        entries
            .get(id)
            .and_then(|versions| versions.last())
            .map(|version| version.value.clone())
    }

    /// The value of `id` as it was at `at` (inclusive).
    pub fn as_of(&self, id: &MappingId, at: DateTime<Utc>) -> Option<String> {
        let entries = locks::read(&self.entries);
        let versions = entries.get(id)?;
        let visible = versions.partition_point(|version| version.observed_at <= at);
        visible
            .checked_sub(1)
            .and_then(|idx| versions.get(idx))
            .map(|version| version.value.clone())
    }

    /// Find the ID whose latest value equals `name`, ignoring case.
    ///
    /// Only latest values are considered. When several IDs match, the
    /// smallest ID wins so the answer is stable across calls.
    pub fn find_latest_by_value(&self, name: &str) -> Option<MappingId> {
        let wanted = name.to_lowercase();
        let entries = locks::read(&self.entries);
        entries.iter().find_map(|(id, versions)| {
            versions
                .last()
                .filter(|newest| newest.value.to_lowercase() == wanted)
                .map(|_| id.clone())
        })
    }

    /// Number of versions recorded for `id`.
    pub fn versions(&self, id: &MappingId) -> usize {
        locks::read(&self.entries).get(id).map_or(0, Vec::len)
    }

    /// Number of IDs with at least one version.
    pub fn len(&self) -> usize {
        locks::read(&self.entries).len()
    }

    /// Whether the cache holds no IDs.
    pub fn is_empty(&self) -> bool {
        locks::read(&self.entries).is_empty()
    }

    /// Drop history older than `max_age`, measured from now.
    pub fn prune_older_than(&self, max_age: Duration) -> PruneStats {
        self.prune_older_than_at(max_age, Utc::now())
    }

    /// Drop history older than `max_age`, measured from `now`.
    ///
    /// A version observed exactly `max_age` before `now` is retained.
    pub fn prune_older_than_at(&self, max_age: Duration, now: DateTime<Utc>) -> PruneStats {
        let cutoff = TimeDelta::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut stats = PruneStats::default();
        let mut entries = locks::write(&self.entries);

        entries.retain(|_, versions| {
            match versions.iter().position(|version| version.observed_at >= cutoff) {
                Some(first_valid) => {
                    versions.drain(..first_valid);
                    stats.versions_removed = stats.versions_removed.saturating_add(first_valid);
                    true
                }
                None => {
                    stats.ids_removed = stats.ids_removed.saturating_add(1);
                    stats.versions_removed = stats.versions_removed.saturating_add(versions.len());
                    false
                }
            }
        });
        stats.ids_remaining = entries.len();
        drop(entries);

        debug!(
            ids_removed = stats.ids_removed,
            versions_removed = stats.versions_removed,
            ids_remaining = stats.ids_remaining,
            "Mapping cache pruned"
        );
        stats
    }

    /// Prune every `interval`, dropping history older than `max_age`.
    ///
    /// The prune task holds only a weak reference, so it never keeps the
    /// cache alive. Returns `false` if pruning is already running.
    pub fn start_pruning(self: &Arc<Self>, max_age: Duration, interval: Duration) -> bool {
        let mut pruner = locks::lock(&self.pruner);
        if pruner.as_ref().is_some_and(IntervalTaskRunner::is_running) {
            return false;
        }

        let cache = Arc::downgrade(self);
        let runner = IntervalTaskRunner::new("mapping cache prune", move || {
            let cache = cache.clone();
            async move {
                if let Some(cache) = cache.upgrade() {
                    cache.prune_older_than(max_age);
                }
                Ok(())
            }
        });
        let started = runner.start(interval);
        *pruner = Some(runner);
        started
    }

    /// Stop periodic pruning. The contents remain queryable.
    pub fn destroy(&self) {
        if let Some(runner) = locks::lock(&self.pruner).take() {
            runner.stop();
        }
    }
}

impl core::fmt::Debug for VersionedMappingCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VersionedMappingCache")
            .field("ids", &self.len())
            .finish_non_exhaustive()
    }
}
