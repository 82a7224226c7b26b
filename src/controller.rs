use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::classify::{Classifier, FeedItem, IdentitySource, RuleTable};
use crate::clock::Clock;
use crate::config::{RunConfig, TimingsConfig};
use crate::locate::Locator;
pub use crate::progress::StopReason;
use crate::progress::{ItemOutcome, ItemReport, ProgressSink, Reporter, RunStats};
use crate::protocol::{Failure, Outcome, RemovalEngine};
use crate::surface::{Surface, SurfaceError, SurfaceResult};

#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedSet {
    ids: HashSet<String>,
}

impl ProcessedSet {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn to_sorted_vec(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ids.iter().cloned().collect();
        ids.sort();
        ids
    }
}

impl FromIterator<String> for ProcessedSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone)]
pub struct RunContext {
    pub surface: Arc<dyn Surface>,
    pub clock: Arc<dyn Clock>,
    pub settings: RunConfig,
    pub timings: TimingsConfig,
    pub stop: StopSignal,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: RunStats,
    pub reason: StopReason,
    pub processed: ProcessedSet,
}

#[derive(Debug)]
enum Phase {
    BuildingBatch,
    Draining(VecDeque<FeedItem>),
    Paginating,
    Done(StopReason),
}

pub struct Controller {
    ctx: RunContext,
    classifier: Classifier,
    processed: ProcessedSet,
    stats: RunStats,
    reporter: Reporter,
    empty_streak: u32,
}

impl Controller {
    pub fn new(ctx: RunContext, sink: Arc<dyn ProgressSink>) -> Self {
        let classifier = Classifier::new(ctx.surface.clone(), ctx.clock.clone());
        let reporter = Reporter::new(sink, ctx.settings.report_every);
        Self {
            ctx,
            classifier,
            processed: ProcessedSet::default(),
            stats: RunStats::default(),
            reporter,
            empty_streak: 0,
        }
    }

    pub fn with_processed(mut self, processed: ProcessedSet) -> Self {
        self.processed = processed;
        self
    }

    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.classifier = self.classifier.with_rules(rules);
        self
    }

    pub fn run(mut self) -> RunSummary {
        info!(
            cutoff = %self.ctx.settings.cutoff_date,
            kinds = ?self.ctx.settings.enabled_kinds,
            resumed = self.processed.len(),
            "run started"
        );
        self.reporter.started(&self.stats);

        let mut phase = Phase::BuildingBatch;
        let reason = loop {
            phase = match phase {
                Phase::Done(reason) => break reason,
                Phase::BuildingBatch => self.build_batch(),
                Phase::Draining(queue) => self.drain(queue),
                Phase::Paginating => self.paginate(),
            };
        };

        self.reporter.finished(&self.stats, reason);
        RunSummary {
            stats: self.stats,
            reason,
            processed: self.processed,
        }
    }

    fn build_batch(&mut self) -> Phase {
        if let Some(reason) = self.should_stop() {
            return Phase::Done(reason);
        }

        let items = match self.classifier.try_enumerate() {
            Ok(items) => items,
            Err(err) => {
                return match self.loop_fault("enumerate", err) {
                    Some(reason) => Phase::Done(reason),
                    None => Phase::Paginating,
                };
            }
        };

        let rendered = items.len();
        let queue: VecDeque<FeedItem> = items
            .into_iter()
            .filter(|item| !self.processed.contains(&item.identity.key))
            .collect();
        self.stats.total_elements_in_last_pass = queue.len() as u64;

        if queue.is_empty() {
            debug!(rendered, "nothing new rendered");
            return Phase::Paginating;
        }

        self.empty_streak = 0;
        debug!(rendered, queued = queue.len(), "batch built");
        Phase::Draining(queue)
    }

    fn drain(&mut self, mut queue: VecDeque<FeedItem>) -> Phase {
        while !queue.is_empty() {
            if let Some(reason) = self.should_stop() {
                return Phase::Done(reason);
            }
            if let Some(item) = queue.pop_front() {
                self.process(item);
            }
        }
        self.ctx.clock.sleep(self.ctx.timings.batch_pause);
        Phase::BuildingBatch
    }

    fn process(&mut self, mut item: FeedItem) {
        // Virtualization can render the same item twice in one pass.
        if !self.processed.insert(item.identity.key.clone()) {
            debug!(id = %item.identity, "already processed");
            return;
        }
        self.stats.processed += 1;
        if item.identity.source == IdentitySource::Random {
            warn!(id = %item.identity, "item has no stable identity, dedup is best effort");
        }

        let outcome = if item.timestamp >= self.ctx.settings.cutoff() {
            self.stats.skipped += 1;
            ItemOutcome::TooRecent
        } else if !self.ctx.settings.kind_enabled(item.kind) {
            self.stats.skipped += 1;
            ItemOutcome::KindDisabled
        } else {
            let outcome = match Locator::new(&self.classifier).relocate(&item.identity, Some(item.element)) {
                Some(element) => {
                    item.element = element;
                    RemovalEngine::new(&self.classifier, self.ctx.clock.clone(), self.ctx.timings)
                        .run(&item)
                }
                None => Outcome::Failed(Failure::ItemNotFound),
            };
            match outcome {
                Outcome::Removed => self.stats.deleted += 1,
                Outcome::Failed(_) => self.stats.errors += 1,
            }
            self.ctx.clock.sleep(self.ctx.settings.delete_delay);
            outcome.into()
        };

        debug!(id = %item.identity, kind = %item.kind, outcome = ?outcome, "item processed");
        self.reporter.item(&self.stats, ItemReport::new(&item, outcome));
    }

    fn paginate(&mut self) -> Phase {
        if let Some(reason) = self.should_stop() {
            return Phase::Done(reason);
        }
        if let Some(reason) = self.scroll_ceiling() {
            return Phase::Done(reason);
        }

        self.stats.scroll_attempts += 1;
        let grew = match self.scroll_for_more() {
            Ok(grew) => grew,
            Err(err) => {
                return match self.loop_fault("paginate", err).or_else(|| self.scroll_ceiling()) {
                    Some(reason) => Phase::Done(reason),
                    None => Phase::BuildingBatch,
                };
            }
        };

        if grew {
            self.empty_streak = 0;
        } else {
            self.empty_streak += 1;
            let threshold = self.ctx.settings.empty_page_stop_threshold.max(1);
            debug!(streak = self.empty_streak, threshold, "feed did not grow");
            if self.empty_streak >= threshold {
                info!(streak = self.empty_streak, "no new content, stopping");
                return Phase::Done(StopReason::EmptyStreak);
            }
        }

        // The attempt just made may be the last one allowed.
        match self.scroll_ceiling() {
            Some(reason) => Phase::Done(reason),
            None => Phase::BuildingBatch,
        }
    }

    fn scroll_for_more(&self) -> SurfaceResult<bool> {
        let surface = self.ctx.surface.as_ref();
        let before = surface.scroll_height()?;
        surface.scroll_to(before)?;
        self.ctx.clock.sleep(self.ctx.settings.scroll_delay);
        let after = surface.scroll_height()?;
        debug!(before, after, attempt = self.stats.scroll_attempts, "scrolled for more");
        Ok(after > before)
    }

    fn scroll_ceiling(&self) -> Option<StopReason> {
        if self.stats.scroll_attempts < self.ctx.settings.max_scroll_attempts {
            return None;
        }
        info!(attempts = self.stats.scroll_attempts, "scroll attempt ceiling reached");
        Some(StopReason::ScrollCeiling)
    }

    fn should_stop(&self) -> Option<StopReason> {
        if self.ctx.stop.is_stopped() {
            info!("stop requested");
            return Some(StopReason::Stopped);
        }
        if self.stats.processed >= self.ctx.settings.max_items {
            info!(processed = self.stats.processed, "item ceiling reached");
            return Some(StopReason::ItemCeiling);
        }
        None
    }

    // Counts a fault outside any removal protocol; past the error ceiling
    // the run ends.
    fn loop_fault(&mut self, during: &str, err: SurfaceError) -> Option<StopReason> {
        self.stats.errors += 1;
        error!(during, error = %err, errors = self.stats.errors, "loop fault");
        (self.stats.errors > self.ctx.settings.max_errors).then_some(StopReason::ErrorCeiling)
    }
}
