//! Event feed reconciliation.
//!
//! [`ReconciliationEngine`] runs one cycle per scheduled tick:
//!
//! 1. **Bootstrap** -- if no mapping snapshot was ever loaded, refresh the
//!    mappings with exponential backoff; exhaustion fails the tick
//! 2. **Fetch** -- pull the event feed; an empty payload flags the feed as
//!    empty and leaves the live table alone, a failed fetch just skips
//! 3. **Recover** -- the first non-empty payload after an empty one forces a
//!    mapping refresh before anything is diffed
//! 4. **Parse and verify** -- each row becomes a [`RawEvent`]; rows that fail
//!    are skipped and logged
//! 5. **Diff** -- new IDs are created, tracked IDs get status and per-period
//!    score notifications
//! 6. **Remove** -- tracked IDs absent from the feed are archived with status
//!    `REMOVED` and dropped from the live table
//!
//! Every cycle yields a [`CycleReport`]; its notifications are also
//! published on a broadcast channel (see [`ReconciliationEngine::subscribe`]).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use scoreline_types::{
    ChangeNotification, EventId, MappingId, PRE_MATCH_STATUS, PeriodScore, RawEvent,
    SCORES_NOT_AVAILABLE, Scores, SportEvent,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::{MappingError, RowError, SyncError};
use crate::feed::{EventFeed, MappingFeed};
use crate::locks;
use crate::mapping::MappingSyncTask;
use crate::runner::IntervalTaskRunner;
use crate::tables::{ArchivedEventTable, LiveEventTable};

/// Capacity of the notification broadcast channel.
const NOTIFICATION_CAPACITY: usize = 1024;

/// Number of mandatory columns in an event feed row.
const REQUIRED_FIELDS: usize = 6;

// ---------------------------------------------------------------------------
// Settings and reports
// ---------------------------------------------------------------------------

/// Bootstrap retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Total bootstrap mapping fetch attempts per tick (at least 1).
    pub bootstrap_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub bootstrap_base_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bootstrap_attempts: 3,
            bootstrap_base_delay: Duration::from_millis(1000),
        }
    }
}

/// Delay before bootstrap retry `retry` (0-based): `base * 2^retry`.
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(retry))
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The feed had rows and the live table was reconciled against them.
    Reconciled,
    /// The feed payload was empty or absent; nothing was touched.
    FeedEmpty,
    /// The feed could not be fetched; nothing was touched.
    FetchFailed,
}

/// Summary of one reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// How the cycle ended.
    pub outcome: CycleOutcome,
    /// Events seen for the first time.
    pub created: usize,
    /// Tracked events whose status or scores changed.
    pub updated: usize,
    /// Events archived and dropped from the live table.
    pub removed: usize,
    /// Rows skipped as malformed or unresolvable.
    pub skipped: usize,
    /// Notifications emitted, in order.
    pub notifications: Vec<ChangeNotification>,
}

impl CycleReport {
    const fn new(outcome: CycleOutcome) -> Self {
        Self {
            outcome,
            created: 0,
            updated: 0,
            removed: 0,
            skipped: 0,
            notifications: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Query surface
// ---------------------------------------------------------------------------

/// Read access to the reconciled state.
///
/// Implementations never fail; before the first successful cycle they
/// return empty results.
pub trait EventQuery: Send + Sync {
    /// Readable view of every live event. Events that no longer transform
    /// are omitted.
    fn current_events(&self) -> BTreeMap<EventId, SportEvent>;

    /// Readable view of one live event.
    fn current_event(&self, id: &EventId) -> Option<SportEvent>;

    /// Every archived event, with status `REMOVED`.
    fn removed_events(&self) -> BTreeMap<EventId, SportEvent>;

    /// Current mapping snapshot version.
    fn mapping_version(&self) -> u64;

    /// Number of events in the live table.
    fn live_count(&self) -> usize;

    /// Number of archived events.
    fn removed_count(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Reconciles the event feed into the live and archived tables.
pub struct ReconciliationEngine<E, M> {
    feed: E,
    mappings: Arc<MappingSyncTask<M>>,
    settings: EngineSettings,
    live: LiveEventTable,
    archive: ArchivedEventTable,
    feed_empty: AtomicBool,
    cycle: tokio::sync::Mutex<()>,
    notifications: broadcast::Sender<ChangeNotification>,
    runner: Mutex<Option<IntervalTaskRunner>>,
}

impl<E: EventFeed, M: MappingFeed> ReconciliationEngine<E, M> {
    /// Create an engine reading `feed` and resolving through `mappings`.
    pub fn new(feed: E, mappings: Arc<MappingSyncTask<M>>, settings: EngineSettings) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            feed,
            mappings,
            settings,
            live: LiveEventTable::new(),
            archive: ArchivedEventTable::new(),
            feed_empty: AtomicBool::new(false),
            cycle: tokio::sync::Mutex::new(()),
            notifications,
            runner: Mutex::new(None),
        }
    }

    /// The mapping sync task used for resolution.
    pub const fn mappings(&self) -> &Arc<MappingSyncTask<M>> {
        &self.mappings
    }

    /// Subscribe to change notifications from subsequent cycles.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.notifications.subscribe()
    }

    /// A sender publishing on the notification channel.
    pub fn notification_sender(&self) -> broadcast::Sender<ChangeNotification> {
        self.notifications.clone()
    }

    /// Whether the last fetched event payload was empty.
    pub fn is_feed_empty(&self) -> bool {
        self.feed_empty.load(Ordering::Acquire)
    }

    /// The stored raw record of a live event.
    pub fn raw_event(&self, id: &EventId) -> Option<RawEvent> {
        self.live.get(id)
    }

    /// Run one reconciliation cycle.
    ///
    /// Concurrent calls are serialized.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::BootstrapExhausted`] if no mapping snapshot was
    /// ever loaded and every bootstrap attempt failed.
    pub async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let _cycle = self.cycle.lock().await;

        if self.mappings.version() == 0 {
            self.bootstrap().await?;
        }

        let payload = match self.feed.fetch_events().await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "Event feed fetch failed, skipping cycle");
                return Ok(CycleReport::new(CycleOutcome::FetchFailed));
            }
        };

        let Some(rows) = payload.odds.filter(|odds| !odds.trim().is_empty()) else {
            if !self.feed_empty.swap(true, Ordering::AcqRel) {
                warn!("Event feed returned no rows, keeping live state");
            }
            return Ok(CycleReport::new(CycleOutcome::FeedEmpty));
        };

        if self.feed_empty.load(Ordering::Acquire) {
            info!("Event feed recovered, forcing mapping refresh");
            self.mappings.refresh().await;
            self.feed_empty.store(false, Ordering::Release);
        }

        let report = self.reconcile(&rows, Utc::now());
        for notification in &report.notifications {
            // No subscribers is not an error.
            let _ = self.notifications.send(notification.clone());
        }

        debug!(
            created = report.created,
            updated = report.updated,
            removed = report.removed,
            skipped = report.skipped,
            live = self.live.len(),
            "Reconciliation cycle complete"
        );
        Ok(report)
    }

    /// Retry the mapping refresh until it succeeds or attempts run out.
    async fn bootstrap(&self) -> Result<(), SyncError> {
        let attempts = self.settings.bootstrap_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            match self.mappings.try_refresh().await {
                Ok(outcome) => {
                    info!(version = outcome.version, pairs = outcome.pairs, "Mapping bootstrap complete");
                    return Ok(());
                }
                Err(err) => {
                    let retry = attempt;
                    attempt = attempt.saturating_add(1);
                    if attempt >= attempts {
                        error!(attempts = attempt, error = %err, "Mapping bootstrap exhausted");
                        return Err(SyncError::BootstrapExhausted {
                            attempts: attempt,
                            source: err,
                        });
                    }

                    let delay = backoff_delay(self.settings.bootstrap_base_delay, retry);
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Mapping bootstrap failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Diff the feed rows against the live table.
    fn reconcile(&self, rows: &str, now: DateTime<Utc>) -> CycleReport {
        let previous: BTreeSet<EventId> = self.live.ids().into_iter().collect();
        let mut seen: BTreeSet<EventId> = BTreeSet::new();
        let mut report = CycleReport::new(CycleOutcome::Reconciled);

        for line in rows.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let record = match self.parse_row(line).and_then(|record| {
                self.mappings.verify(&record)?;
                Ok(record)
            }) {
                Ok(record) => record,
                Err(err) => {
                    warn!(row = line, error = %err, "Skipping event row");
                    // A tracked event with a bad row keeps its stored state.
                    if let Some(id) = row_id(line) {
                        seen.insert(id);
                    }
                    report.skipped = report.skipped.saturating_add(1);
                    continue;
                }
            };

            seen.insert(record.id.clone());
            let result = match self.live.get(&record.id) {
                None => self.create(record, now).map(|note| {
                    report.created = report.created.saturating_add(1);
                    vec![note]
                }),
                Some(stored) => self.update(stored, record, now).map(|(changed, notes)| {
                    if changed {
                        report.updated = report.updated.saturating_add(1);
                    }
                    notes
                }),
            };

            match result {
                Ok(notes) => report.notifications.extend(notes),
                Err(err) => {
                    warn!(error = %err, "Skipping event row");
                    report.skipped = report.skipped.saturating_add(1);
                }
            }
        }

        for id in previous.difference(&seen) {
            if let Some(note) = self.remove(id) {
                report.removed = report.removed.saturating_add(1);
                report.notifications.push(note);
            }
        }

        report
    }

    /// Parse one CSV row, filling in the pre-match status for short rows.
    fn parse_row(&self, line: &str) -> Result<RawEvent, RowError> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |index: usize| fields.get(index).copied().filter(|f| !f.is_empty());

        let id = field(0).ok_or(RowError::MissingId)?;
        if fields.len() < REQUIRED_FIELDS {
            return Err(RowError::TooFewFields { found: fields.len() });
        }

        let (status_id, scores) = match (field(6), field(7)) {
            (Some(status), Some(scores)) => (MappingId::new(status), scores.to_owned()),
            _ => (
                self.mappings.resolve_id_by_name(PRE_MATCH_STATUS)?,
                SCORES_NOT_AVAILABLE.to_owned(),
            ),
        };

        let column = |index: usize| MappingId::new(field(index).unwrap_or_default());
        Ok(RawEvent {
            id: EventId::new(id),
            sport_id: column(1),
            competition_id: column(2),
            start_time: field(3).unwrap_or_default().to_owned(),
            home_competitor_id: column(4),
            away_competitor_id: column(5),
            status_id,
            scores,
            changed_at: None,
        })
    }

    /// Insert a newly seen event.
    fn create(&self, mut record: RawEvent, now: DateTime<Utc>) -> Result<ChangeNotification, MappingError> {
        let note = ChangeNotification::Created {
            event_id: record.id.clone(),
            sport: self.mappings.resolve_name(&record.sport_id, None)?,
            competition: self.mappings.resolve_name(&record.competition_id, None)?,
            status: self.mappings.resolve_name(&record.status_id, None)?,
        };

        record.changed_at = Some(now);
        info!(event_id = %record.id, "Event created");
        self.live.insert(record);
        Ok(note)
    }

    /// Apply status and score changes of a tracked event.
    ///
    /// Returns whether the stored record changed, and the notifications.
    fn update(
        &self,
        stored: RawEvent,
        incoming: RawEvent,
        now: DateTime<Utc>,
    ) -> Result<(bool, Vec<ChangeNotification>), MappingError> {
        let mut notes = Vec::new();
        let mut next = stored.clone();

        if stored.status_id != incoming.status_id {
            // The old status resolves as of its own last change.
            let from = self
                .mappings
                .resolve_name(&stored.status_id, stored.changed_at)
                .ok();
            let to = self.mappings.resolve_name(&incoming.status_id, None)?;
            info!(event_id = %stored.id, from = from.as_deref().unwrap_or("?"), to = %to, "Event status updated");
            notes.push(ChangeNotification::StatusChanged {
                event_id: stored.id.clone(),
                from,
                to,
            });
            next.status_id = incoming.status_id;
        }

        if stored.scores != incoming.scores {
            // Old periods resolve against the latest mappings; pruning may
            // already have dropped the snapshot at `changed_at`.
            let previous = self
                .mappings
                .resolve_scores(&stored.scores, None)
                .or_else(|_| self.mappings.resolve_scores(&stored.scores, stored.changed_at));
            let current = self.mappings.resolve_scores(&incoming.scores, None)?;

            match (&previous, &current) {
                (Ok(previous), Scores::Periods(periods)) => {
                    for (name, score) in periods {
                        let before = previous
                            .period(name)
                            .cloned()
                            .unwrap_or_else(|| PeriodScore::nil(name.as_str()));
                        if score.differs_from(&before) {
                            info!(event_id = %stored.id, period = %name, "Event score updated");
                            notes.push(ChangeNotification::ScoreChanged {
                                event_id: stored.id.clone(),
                                period: name.clone(),
                                previous: before,
                                current: score.clone(),
                            });
                        }
                    }
                }
                (Err(err), _) => {
                    warn!(event_id = %stored.id, error = %err, "Previous scores no longer resolve, skipping score diff");
                }
                (Ok(_), Scores::NotAvailable) => {}
            }
            next.scores = incoming.scores;
        }

        let changed = next != stored;
        if changed {
            next.changed_at = Some(now);
            self.live.insert(next);
        }
        Ok((changed, notes))
    }

    /// Archive and drop an event that left the feed.
    fn remove(&self, id: &EventId) -> Option<ChangeNotification> {
        let raw = self.live.remove(id)?;
        match self.mappings.transform_removed(&raw) {
            Some(snapshot) => {
                if !self.archive.archive(snapshot) {
                    debug!(event_id = %id, "Event already archived, keeping first snapshot");
                }
            }
            None => warn!(event_id = %id, "Removed event could not be archived"),
        }
        info!(event_id = %id, "Event removed");
        Some(ChangeNotification::Removed {
            event_id: id.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Reconcile now and then every `interval`.
    ///
    /// Returns `false` if the engine is already polling.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let mut runner = locks::lock(&self.runner);
        if runner.as_ref().is_some_and(IntervalTaskRunner::is_running) {
            info!("Event polling already started");
            return false;
        }

        let engine = Arc::downgrade(self);
        let polling = IntervalTaskRunner::new("event reconciliation", move || {
            let engine = engine.clone();
            async move {
                match engine.upgrade() {
                    Some(engine) => engine.run_cycle().await.map(|_| ()),
                    None => Ok(()),
                }
            }
        })
        .with_error_handler(|err: &SyncError| {
            error!(error = %err, "Reconciliation tick failed");
        });
        let started = polling.start(interval);
        *runner = Some(polling);
        started
    }

    /// Stop periodic reconciliation.
    pub fn stop(&self) {
        if let Some(runner) = locks::lock(&self.runner).take() {
            runner.stop();
        }
    }
}

impl<E: EventFeed, M: MappingFeed> EventQuery for ReconciliationEngine<E, M> {
    fn current_events(&self) -> BTreeMap<EventId, SportEvent> {
        self.live
            .snapshot()
            .iter()
            .filter_map(|raw| self.mappings.transform(raw))
            .map(|event| (event.id.clone(), event))
            .collect()
    }

    fn current_event(&self, id: &EventId) -> Option<SportEvent> {
        self.live.get(id).and_then(|raw| self.mappings.transform(&raw))
    }

    fn removed_events(&self) -> BTreeMap<EventId, SportEvent> {
        self.archive
            .all()
            .into_iter()
            .map(|event| (event.id.clone(), event))
            .collect()
    }

    fn mapping_version(&self) -> u64 {
        self.mappings.version()
    }

    fn live_count(&self) -> usize {
        self.live.len()
    }

    fn removed_count(&self) -> usize {
        self.archive.len()
    }
}

/// The event ID of a row, if its first column is present.
fn row_id(line: &str) -> Option<EventId> {
    line.split(',')
        .next()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(EventId::new)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use scoreline_types::Competitors;

    use super::*;
    use crate::cache::VersionedMappingCache;
    use crate::error::FeedError;
    use crate::feed::{MappingsPayload, OddsPayload};

    /// One scripted feed response.
    #[derive(Debug, Clone)]
    enum Step {
        Body(String),
        Empty,
        Fail,
    }

    /// Replays scripted responses, repeating the last one forever.
    #[derive(Clone, Default)]
    struct Script {
        steps: Arc<Mutex<VecDeque<Step>>>,
        calls: Arc<AtomicUsize>,
    }

    impl Script {
        fn new(steps: &[Step]) -> Self {
            let script = Self::default();
            for step in steps {
                script.push(step.clone());
            }
            script
        }

        fn push(&self, step: Step) {
            locks::lock(&self.steps).push_back(step);
        }

        /// Drop any queued responses and answer `step` from now on.
        fn set(&self, step: Step) {
            let mut steps = locks::lock(&self.steps);
            steps.clear();
            steps.push_back(step);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next(&self) -> Result<Option<String>, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut steps = locks::lock(&self.steps);
            let step = if steps.len() > 1 {
                steps.pop_front()
            } else {
                steps.front().cloned()
            };
            match step.unwrap_or(Step::Empty) {
                Step::Body(body) => Ok(Some(body)),
                Step::Empty => Ok(None),
                Step::Fail => Err(FeedError::Status {
                    url: String::from("http://feed.test"),
                    status: 503,
                }),
            }
        }
    }

    impl MappingFeed for Script {
        async fn fetch_mappings(&self) -> Result<MappingsPayload, FeedError> {
            self.next().map(|mappings| MappingsPayload { mappings })
        }
    }

    impl EventFeed for Script {
        async fn fetch_events(&self) -> Result<OddsPayload, FeedError> {
            self.next().map(|odds| OddsPayload { odds })
        }
    }

    const MAPPINGS: &str = "s1:FOOTBALL;c1:PremierLeague;st1:LIVE;st2:ENDED;h1:Arsenal;a1:Chelsea;p1:1stHalf;p2:2ndHalf;pre1:PRE";

    fn body(text: &str) -> Step {
        Step::Body(text.to_owned())
    }

    struct Harness {
        engine: Arc<ReconciliationEngine<Script, Script>>,
        mappings: Script,
        events: Script,
    }

    fn harness(mappings: &[Step], events: &[Step]) -> Harness {
        let mappings = Script::new(mappings);
        let events = Script::new(events);
        let sync = Arc::new(MappingSyncTask::new(
            mappings.clone(),
            Arc::new(VersionedMappingCache::new()),
        ));
        let engine = Arc::new(ReconciliationEngine::new(
            events.clone(),
            sync,
            EngineSettings::default(),
        ));
        Harness {
            engine,
            mappings,
            events,
        }
    }

    fn id(raw: &str) -> EventId {
        EventId::new(raw)
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(base, 200), Duration::MAX);
    }

    #[tokio::test]
    async fn first_cycle_creates_readable_event() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1700000000,h1,a1,st1,p1@1:0")]);

        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::Reconciled);
        assert_eq!(report.created, 1);
        assert_eq!(
            report.notifications,
            vec![ChangeNotification::Created {
                event_id: id("e1"),
                sport: String::from("FOOTBALL"),
                competition: String::from("PremierLeague"),
                status: String::from("LIVE"),
            }]
        );

        let event = h.engine.current_event(&id("e1")).unwrap();
        assert_eq!(event.sport, "FOOTBALL");
        assert_eq!(event.competition, "PremierLeague");
        assert_eq!(event.status, "LIVE");
        assert_eq!(event.start_time, "1700000000");
        assert_eq!(event.competitors, Competitors::new("Arsenal", "Chelsea"));
        let first_half = event.scores.period("1stHalf").unwrap();
        assert_eq!((first_half.home.as_str(), first_half.away.as_str()), ("1", "0"));
        assert_eq!(h.engine.current_events().len(), 1);
        assert_eq!(h.engine.mapping_version(), 1);
    }

    #[tokio::test]
    async fn short_row_becomes_pre_match() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1700000000,h1,a1\ne2,s1,c1,1700000000,h1,a1,st1")]);

        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.created, 2);

        for event_id in ["e1", "e2"] {
            let raw = h.engine.raw_event(&id(event_id)).unwrap();
            assert_eq!(raw.status_id, MappingId::new("pre1"));
            assert_eq!(raw.scores, "N/A");

            let event = h.engine.current_event(&id(event_id)).unwrap();
            assert_eq!(event.status, "PRE");
            assert_eq!(event.scores, Scores::NotAvailable);
        }
    }

    #[tokio::test]
    async fn short_row_without_pre_mapping_is_skipped() {
        let h = harness(
            &[body("s1:FOOTBALL;c1:PremierLeague;h1:Arsenal;a1:Chelsea")],
            &[body("e1,s1,c1,1700000000,h1,a1")],
        );

        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(h.engine.current_events().is_empty());
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_individually() {
        let h = harness(
            &[body(MAPPINGS)],
            &[body(",s1,c1,1,h1,a1,st1,N/A\ne2,s1,c1\ne3,s1,c1,1,h1,a1,st1,N/A\n\ne4,s9,c1,1,h1,a1,st1,N/A")],
        );

        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(h.engine.current_events().keys().collect::<Vec<_>>(), vec![&id("e3")]);
    }

    #[tokio::test]
    async fn score_changes_emit_one_notification_per_differing_period() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1,h1,a1,st1,p1@1:0")]);
        h.engine.run_cycle().await.unwrap();

        // Same score string: nothing to report.
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.updated, 0);
        assert!(report.notifications.is_empty());

        // New period at 0:0 equals the default baseline.
        h.events.set(body("e1,s1,c1,1,h1,a1,st1,p1@1:0|p2@0:0"));
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.updated, 1);
        assert!(report.notifications.is_empty());
        assert_eq!(h.engine.raw_event(&id("e1")).unwrap().scores, "p1@1:0|p2@0:0");

        h.events.set(body("e1,s1,c1,1,h1,a1,st1,p1@2:0|p2@0:0"));
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(
            report.notifications,
            vec![ChangeNotification::ScoreChanged {
                event_id: id("e1"),
                period: String::from("1stHalf"),
                previous: PeriodScore {
                    period: String::from("1stHalf"),
                    home: String::from("1"),
                    away: String::from("0"),
                },
                current: PeriodScore {
                    period: String::from("1stHalf"),
                    home: String::from("2"),
                    away: String::from("0"),
                },
            }]
        );

        h.events.set(body("e1,s1,c1,1,h1,a1,st1,p1@3:0|p2@0:1"));
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.notifications.len(), 2);
    }

    #[tokio::test]
    async fn new_period_compares_against_nil_score() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1,h1,a1,st1,N/A")]);
        h.engine.run_cycle().await.unwrap();

        h.events.set(body("e1,s1,c1,1,h1,a1,st1,p1@1:0"));
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(
            report.notifications,
            vec![ChangeNotification::ScoreChanged {
                event_id: id("e1"),
                period: String::from("1stHalf"),
                previous: PeriodScore::nil("1stHalf"),
                current: PeriodScore {
                    period: String::from("1stHalf"),
                    home: String::from("1"),
                    away: String::from("0"),
                },
            }]
        );
    }

    #[tokio::test]
    async fn score_diff_survives_pruned_mapping_history() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1,h1,a1,st1,p1@1:0|p2@0:0")]);
        h.engine.run_cycle().await.unwrap();

        // Eleven minutes later the feed re-sent every pair and the pruner
        // dropped everything observed at or before the event's last change.
        let later = Utc::now() + chrono::TimeDelta::minutes(11);
        let cache = h.engine.mappings().cache();
        let (pairs, _) = crate::mapping::parse_mappings(MAPPINGS);
        for (mapping_id, value) in &pairs {
            cache.set_at(mapping_id, value, later);
        }
        cache.prune_older_than_at(Duration::from_secs(600), later);
        let changed_at = h.engine.raw_event(&id("e1")).unwrap().changed_at.unwrap();
        assert!(cache.as_of(&MappingId::new("p1"), changed_at).is_none());

        h.events.set(body("e1,s1,c1,1,h1,a1,st1,p1@1:0|p2@0:1"));
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(
            report.notifications,
            vec![ChangeNotification::ScoreChanged {
                event_id: id("e1"),
                period: String::from("2ndHalf"),
                previous: PeriodScore::nil("2ndHalf"),
                current: PeriodScore {
                    period: String::from("2ndHalf"),
                    home: String::from("0"),
                    away: String::from("1"),
                },
            }]
        );
    }

    #[tokio::test]
    async fn status_change_notifies_old_and_new_names() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1,h1,a1,st1,N/A")]);
        h.engine.run_cycle().await.unwrap();

        h.events.set(body("e1,s1,c1,1,h1,a1,st2,N/A"));
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(
            report.notifications,
            vec![ChangeNotification::StatusChanged {
                event_id: id("e1"),
                from: Some(String::from("LIVE")),
                to: String::from("ENDED"),
            }]
        );
        assert_eq!(h.engine.current_event(&id("e1")).unwrap().status, "ENDED");
    }

    #[tokio::test]
    async fn absent_event_is_archived_as_removed() {
        let h = harness(
            &[body(MAPPINGS)],
            &[body("e1,s1,c1,1,h1,a1,st1,N/A\ne2,s1,c1,1,h1,a1,st1,N/A")],
        );
        h.engine.run_cycle().await.unwrap();

        h.events.set(body("e2,s1,c1,1,h1,a1,st1,N/A"));
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(
            report.notifications,
            vec![ChangeNotification::Removed { event_id: id("e1") }]
        );

        let removed = h.engine.removed_events();
        assert_eq!(removed.get(&id("e1")).unwrap().status, "REMOVED");
        assert!(!h.engine.current_events().contains_key(&id("e1")));
        assert!(h.engine.current_events().contains_key(&id("e2")));
    }

    #[tokio::test]
    async fn reappearing_event_is_recreated_and_archive_keeps_first_snapshot() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1,h1,a1,st1,N/A\ne2,s1,c1,1,h1,a1,st1,N/A")]);
        h.engine.run_cycle().await.unwrap();

        h.events.set(body("e2,s1,c1,1,h1,a1,st1,N/A"));
        h.engine.run_cycle().await.unwrap();

        h.events.set(body("e1,s1,c1,1,h1,a1,st2,p1@1:1\ne2,s1,c1,1,h1,a1,st1,N/A"));
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.created, 1);

        h.events.set(body("e2,s1,c1,1,h1,a1,st1,N/A"));
        h.engine.run_cycle().await.unwrap();

        let archived = h.engine.removed_events().remove(&id("e1")).unwrap();
        assert_eq!(archived.status, "REMOVED");
        assert_eq!(archived.scores, Scores::NotAvailable);
        assert_eq!(h.engine.removed_count(), 1);
    }

    #[tokio::test]
    async fn empty_feed_leaves_live_state_untouched() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1,h1,a1,st1,N/A")]);
        h.engine.run_cycle().await.unwrap();
        let before = h.engine.current_events();

        h.events.set(Step::Empty);
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::FeedEmpty);
        assert!(h.engine.is_feed_empty());
        assert_eq!(h.engine.current_events(), before);
        assert!(h.engine.removed_events().is_empty());

        h.events.set(body("   "));
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::FeedEmpty);
        assert_eq!(h.engine.current_events(), before);
    }

    #[tokio::test]
    async fn recovery_after_empty_feed_forces_mapping_refresh() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1,h1,a1,st1,N/A")]);
        h.engine.run_cycle().await.unwrap();
        assert_eq!(h.mappings.calls(), 1);

        h.events.set(Step::Empty);
        h.engine.run_cycle().await.unwrap();
        assert_eq!(h.mappings.calls(), 1);

        // The feed restarted with a remapped competitor.
        h.mappings.set(body(&format!("{MAPPINGS};h2:Everton")));
        h.events.set(body("e1,s1,c1,1,h1,a1,st1,N/A\ne2,s1,c1,1,h2,a1,st1,N/A"));
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(h.mappings.calls(), 2);
        assert!(!h.engine.is_feed_empty());
        assert_eq!(report.created, 1);
        assert_eq!(
            h.engine.current_event(&id("e2")).unwrap().competitors,
            Competitors::new("Everton", "Chelsea")
        );
    }

    #[tokio::test]
    async fn fetch_failure_skips_cycle_without_flagging_empty() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1,h1,a1,st1,N/A")]);
        h.engine.run_cycle().await.unwrap();

        h.events.set(Step::Fail);
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::FetchFailed);
        assert!(!h.engine.is_feed_empty());
        assert_eq!(h.engine.live_count(), 1);
        assert!(h.engine.removed_events().is_empty());
    }

    #[tokio::test]
    async fn invalid_row_for_tracked_event_is_left_untouched() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1,h1,a1,st1,p1@1:0")]);
        h.engine.run_cycle().await.unwrap();

        // Unknown status: the row is skipped but the event is neither updated nor removed.
        h.events.set(body("e1,s1,c1,1,h1,a1,st9,p1@2:0"));
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.removed, 0);
        let raw = h.engine.raw_event(&id("e1")).unwrap();
        assert_eq!(raw.status_id, MappingId::new("st1"));
        assert_eq!(raw.scores, "p1@1:0");
        assert!(h.engine.removed_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_retries_with_backoff() {
        let h = harness(
            &[Step::Fail, Step::Empty, body(MAPPINGS)],
            &[body("e1,s1,c1,1,h1,a1,st1,N/A")],
        );

        let started = tokio::time::Instant::now();
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(h.mappings.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bootstrap_fails_the_tick() {
        let h = harness(&[Step::Fail], &[body("e1,s1,c1,1,h1,a1,st1,N/A")]);

        let started = tokio::time::Instant::now();
        let err = h.engine.run_cycle().await.unwrap_err();
        assert!(matches!(err, SyncError::BootstrapExhausted { attempts: 3, .. }));
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
        assert_eq!(h.events.calls(), 0);
        assert!(h.engine.current_events().is_empty());
    }

    #[tokio::test]
    async fn notifications_are_broadcast() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1,h1,a1,st1,N/A")]);
        let mut rx = h.engine.subscribe();

        h.engine.run_cycle().await.unwrap();
        let note = rx.recv().await.unwrap();
        assert_eq!(note.event_id(), &id("e1"));
        assert!(matches!(note, ChangeNotification::Created { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_reconciles_on_interval() {
        let h = harness(&[body(MAPPINGS)], &[body("e1,s1,c1,1,h1,a1,st1,N/A")]);
        assert!(h.engine.start(Duration::from_millis(1000)));
        assert!(!h.engine.start(Duration::from_millis(1000)));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.engine.live_count(), 1);

        h.events.set(body("e2,s1,c1,1,h1,a1,st1,N/A"));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        h.engine.stop();

        assert_eq!(h.engine.live_count(), 1);
        assert!(h.engine.current_events().contains_key(&id("e2")));
        assert_eq!(h.engine.removed_count(), 1);
    }
}
