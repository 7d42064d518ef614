//! Mapping feed synchronization and name resolution.
//!
//! [`MappingSyncTask`] periodically pulls the mapping feed into the shared
//! [`VersionedMappingCache`] and is the only way the reconciliation engine
//! turns opaque IDs into names. Resolution failures are typed
//! ([`MappingError`]) so callers decide whether they skip a row, drop a
//! field, or omit an event from a query.
//!
//! # Payload format
//!
//! ```text
//! s1:FOOTBALL;c1:PremierLeague;st1:LIVE;h1:Arsenal;a1:Chelsea;p1:1stHalf
//! ```
//!
//! Pairs missing either side of the `:` are dropped. Every valid pair is
//! appended to the cache on every successful refresh, which keeps IDs the
//! feed still reports inside the cache's retention window.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use scoreline_types::{
    Competitors, MappingId, PeriodScore, REMOVED_STATUS, RawEvent, SCORES_NOT_AVAILABLE, Scores,
    SportEvent,
};
use tracing::{debug, info, warn};

use crate::cache::VersionedMappingCache;
use crate::error::{FeedError, MappingError};
use crate::feed::MappingFeed;
use crate::locks;
use crate::runner::IntervalTaskRunner;

/// Result of one successful mapping refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Valid pairs written to the cache.
    pub pairs: usize,
    /// Malformed pairs dropped.
    pub dropped: usize,
    /// Whether the parsed mapping set differs from the previous refresh.
    pub changed: bool,
    /// Mapping snapshot version after this refresh.
    pub version: u64,
}

/// Split a mapping payload into `(id, name)` pairs.
///
/// Returns the valid pairs in payload order and the number of dropped
/// malformed pairs. Blank segments (such as a trailing `;`) are ignored.
pub fn parse_mappings(payload: &str) -> (Vec<(MappingId, String)>, usize) {
    let mut pairs = Vec::new();
    let mut dropped: usize = 0;

    for segment in payload.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        match segment.split_once(':') {
            Some((id, value)) if !id.trim().is_empty() && !value.trim().is_empty() => {
                pairs.push((MappingId::new(id.trim()), value.trim().to_owned()));
            }
            _ => dropped = dropped.saturating_add(1),
        }
    }

    (pairs, dropped)
}

/// Keeps the mapping cache in sync with the mapping feed and resolves IDs.
pub struct MappingSyncTask<F> {
    feed: F,
    cache: Arc<VersionedMappingCache>,
    version: AtomicU64,
    last_parsed: Mutex<Option<Vec<(MappingId, String)>>>,
    runner: Mutex<Option<IntervalTaskRunner>>,
}

impl<F: MappingFeed> MappingSyncTask<F> {
    /// Create a task writing `feed` into `cache`. Version starts at 0.
    pub fn new(feed: F, cache: Arc<VersionedMappingCache>) -> Self {
        Self {
            feed,
            cache,
            version: AtomicU64::new(0),
            last_parsed: Mutex::new(None),
            runner: Mutex::new(None),
        }
    }

    /// The shared cache this task writes to.
    pub const fn cache(&self) -> &Arc<VersionedMappingCache> {
        &self.cache
    }

    /// Mapping snapshot version; 0 until the first successful refresh.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Fetch the feed and write every valid pair into the cache.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, or [`FeedError::EmptyPayload`] when the feed
    /// has no usable pairs. The cache is not touched in either case.
    pub async fn try_refresh(&self) -> Result<RefreshOutcome, FeedError> {
        let payload = self.feed.fetch_mappings().await?;
        let raw = payload
            .mappings
            .filter(|m| !m.trim().is_empty())
            .ok_or(FeedError::EmptyPayload)?;

        let (pairs, dropped) = parse_mappings(&raw);
        if pairs.is_empty() {
            return Err(FeedError::EmptyPayload);
        }

        let observed_at = Utc::now();
        for (id, value) in &pairs {
            self.cache.set_at(id, value, observed_at);
        }

        let pair_count = pairs.len();
        let changed = {
            let mut last = locks::lock(&self.last_parsed);
            let changed = last.as_deref() != Some(pairs.as_slice());
            if changed {
                *last = Some(pairs);
            }
            changed
        };
        let version = if changed {
            self.version.fetch_add(1, Ordering::AcqRel).saturating_add(1)
        } else {
            self.version()
        };

        if dropped > 0 {
            debug!(dropped, "Dropped malformed mapping pairs");
        }
        if changed {
            info!(pairs = pair_count, version, "Mappings updated");
        }

        Ok(RefreshOutcome {
            pairs: pair_count,
            dropped,
            changed,
            version,
        })
    }

    /// Refresh, logging and swallowing any failure.
    ///
    /// Returns `None` when the cycle was a no-op.
    pub async fn refresh(&self) -> Option<RefreshOutcome> {
        match self.try_refresh().await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(error = %err, "Mapping refresh skipped");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Resolve `id` to its name, latest or as of `at`.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Missing`] carrying the ID.
    pub fn resolve_name(
        &self,
        id: &MappingId,
        at: Option<DateTime<Utc>>,
    ) -> Result<String, MappingError> {
        self.cache
            .get(id, at)
            .ok_or_else(|| MappingError::Missing { id: id.clone() })
    }

    /// Find the ID whose latest name is `name`, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::UnknownName`] if no ID maps to `name`.
    pub fn resolve_id_by_name(&self, name: &str) -> Result<MappingId, MappingError> {
        self.cache
            .find_latest_by_value(name)
            .ok_or_else(|| MappingError::UnknownName {
                name: name.to_owned(),
            })
    }

    /// Resolve both competitors into the fixed home/away pair.
    ///
    /// # Errors
    ///
    /// Returns the first [`MappingError::Missing`], home before away.
    pub fn resolve_competitors(
        &self,
        home: &MappingId,
        away: &MappingId,
        at: Option<DateTime<Utc>>,
    ) -> Result<Competitors, MappingError> {
        let home = self.resolve_name(home, at)?;
        let away = self.resolve_name(away, at)?;
        Ok(Competitors::new(home, away))
    }

    /// Resolve a raw score string into period scores keyed by period name.
    ///
    /// `N/A` passes through. Otherwise each `periodId@home:away` entry has
    /// its period ID resolved; a later entry for the same period name
    /// replaces an earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Missing`] for the first unresolvable period.
    pub fn resolve_scores(
        &self,
        raw: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Scores, MappingError> {
        if raw == SCORES_NOT_AVAILABLE {
            return Ok(Scores::NotAvailable);
        }

        let mut periods = BTreeMap::new();
        for (period_id, home, away) in score_entries(raw) {
            let period = self.resolve_name(&period_id, at)?;
            periods.insert(
                period.clone(),
                PeriodScore {
                    period,
                    home: home.to_owned(),
                    away: away.to_owned(),
                },
            );
        }
        Ok(Scores::Periods(periods))
    }

    /// Check that every ID referenced by `record` resolves now.
    ///
    /// Checked in order: sport, competition, status, home, away, then each
    /// score period.
    ///
    /// # Errors
    ///
    /// Returns the first [`MappingError::Missing`] encountered.
    pub fn verify(&self, record: &RawEvent) -> Result<(), MappingError> {
        for id in [
            &record.sport_id,
            &record.competition_id,
            &record.status_id,
            &record.home_competitor_id,
            &record.away_competitor_id,
        ] {
            self.resolve_name(id, None)?;
        }

        if !record.is_unscored() {
            for (period_id, _, _) in score_entries(&record.scores) {
                self.resolve_name(&period_id, None)?;
            }
        }
        Ok(())
    }

    /// Build the readable view of `raw`, or `None` (logged) if any ID no
    /// longer resolves.
    pub fn transform(&self, raw: &RawEvent) -> Option<SportEvent> {
        self.try_transform(raw, None)
            .map_err(|err| warn!(event_id = %raw.id, error = %err, "Failed to transform event"))
            .ok()
    }

    /// Build the archived view of `raw`, with status forced to `REMOVED`.
    ///
    /// The status ID is not resolved, so an event whose status mapping has
    /// vanished can still be archived.
    pub fn transform_removed(&self, raw: &RawEvent) -> Option<SportEvent> {
        self.try_transform(raw, Some(REMOVED_STATUS))
            .map_err(|err| {
                warn!(event_id = %raw.id, error = %err, "Failed to transform removed event");
            })
            .ok()
    }

    fn try_transform(
        &self,
        raw: &RawEvent,
        status_override: Option<&str>,
    ) -> Result<SportEvent, MappingError> {
        let status = match status_override {
            Some(status) => status.to_owned(),
            None => self.resolve_name(&raw.status_id, None)?,
        };

        Ok(SportEvent {
            id: raw.id.clone(),
            status,
            sport: self.resolve_name(&raw.sport_id, None)?,
            competition: self.resolve_name(&raw.competition_id, None)?,
            start_time: raw.start_time.clone(),
            competitors: self.resolve_competitors(
                &raw.home_competitor_id,
                &raw.away_competitor_id,
                None,
            )?,
            scores: self.resolve_scores(&raw.scores, None)?,
        })
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Refresh now and then every `interval`.
    ///
    /// Returns `false` if the task is already polling.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let mut runner = locks::lock(&self.runner);
        if runner.as_ref().is_some_and(IntervalTaskRunner::is_running) {
            info!("Mapping polling already started");
            return false;
        }

        let task = Arc::downgrade(self);
        let polling = IntervalTaskRunner::new("mapping sync", move || {
            let task = task.clone();
            async move {
                if let Some(task) = task.upgrade() {
                    task.refresh().await;
                }
                Ok(())
            }
        });
        let started = polling.start(interval);
        *runner = Some(polling);
        started
    }

    /// Stop periodic refreshes.
    pub fn stop(&self) {
        if let Some(runner) = locks::lock(&self.runner).take() {
            runner.stop();
        }
    }
}

/// Split a score string into `(period_id, home, away)` entries.
///
/// An entry without `:` yields an empty away score.
fn score_entries(raw: &str) -> impl Iterator<Item = (MappingId, &str, &str)> {
    raw.split('|')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (period_id, score) = entry.split_once('@').unwrap_or((entry, ""));
            let (home, away) = score.split_once(':').unwrap_or((score, ""));
            (MappingId::new(period_id), home, away)
        })
}
