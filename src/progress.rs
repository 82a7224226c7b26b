use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::{FeedItem, ItemKind};
use crate::protocol::{Failure, Outcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub processed: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub errors: u64,
    pub scroll_attempts: u64,
    pub total_elements_in_last_pass: u64,
}

impl RunStats {
    // Removed share of the items a removal was attempted on, in percent.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.deleted + self.errors;
        if attempted == 0 {
            return 0.0;
        }
        self.deleted as f64 * 100.0 / attempted as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stopped,
    EmptyStreak,
    ScrollCeiling,
    ItemCeiling,
    ErrorCeiling,
}

impl StopReason {
    pub fn describe(&self) -> &'static str {
        match self {
            StopReason::Stopped => "stopped by request",
            StopReason::EmptyStreak => "no new items after repeated pagination",
            StopReason::ScrollCeiling => "scroll attempt ceiling reached",
            StopReason::ItemCeiling => "item ceiling reached",
            StopReason::ErrorCeiling => "too many errors",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ItemOutcome {
    Removed,
    TooRecent,
    KindDisabled,
    Failed { failure: Failure },
}

impl From<Outcome> for ItemOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Removed => ItemOutcome::Removed,
            Outcome::Failed(failure) => ItemOutcome::Failed { failure },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub id: String,
    pub kind: ItemKind,
    pub timestamp: DateTime<Utc>,
    pub excerpt: String,
    pub outcome: ItemOutcome,
}

impl ItemReport {
    pub fn new(item: &FeedItem, outcome: ItemOutcome) -> Self {
        Self {
            id: item.identity.key.clone(),
            kind: item.kind,
            timestamp: item.timestamp,
            excerpt: item.excerpt.clone(),
            outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { stats: RunStats },
    Item { stats: RunStats, item: ItemReport },
    Snapshot { stats: RunStats },
    Completed { stats: RunStats, reason: StopReason },
}

impl ProgressEvent {
    pub fn stats(&self) -> &RunStats {
        match self {
            ProgressEvent::Started { stats }
            | ProgressEvent::Item { stats, .. }
            | ProgressEvent::Snapshot { stats }
            | ProgressEvent::Completed { stats, .. } => stats,
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl ProgressSink for Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.send(event);
    }
}

#[derive(Debug, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<ProgressEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn items(&self) -> Vec<ItemReport> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Item { item, .. } => Some(item.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for EventLog {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

pub struct Reporter {
    sink: Arc<dyn ProgressSink>,
    every: u64,
}

impl Reporter {
    pub fn new(sink: Arc<dyn ProgressSink>, every: u64) -> Self {
        Self { sink, every }
    }

    pub fn started(&self, stats: &RunStats) {
        self.sink.emit(ProgressEvent::Started { stats: *stats });
    }

    pub fn item(&self, stats: &RunStats, item: ItemReport) {
        self.sink.emit(ProgressEvent::Item {
            stats: *stats,
            item,
        });
        if self.every > 0 && stats.processed > 0 && stats.processed % self.every == 0 {
            info!(
                processed = stats.processed,
                deleted = stats.deleted,
                skipped = stats.skipped,
                errors = stats.errors,
                "progress"
            );
            self.sink.emit(ProgressEvent::Snapshot { stats: *stats });
        }
    }

    pub fn finished(&self, stats: &RunStats, reason: StopReason) {
        info!(
            processed = stats.processed,
            deleted = stats.deleted,
            skipped = stats.skipped,
            errors = stats.errors,
            scroll_attempts = stats.scroll_attempts,
            success_rate = format!("{:.1}%", stats.success_rate()),
            reason = reason.describe(),
            "run finished"
        );
        match reason {
            StopReason::ItemCeiling | StopReason::ScrollCeiling | StopReason::ErrorCeiling => {
                warn!(reason = reason.describe(), "run ended at a ceiling")
            }
            StopReason::Stopped | StopReason::EmptyStreak => {}
        }
        self.sink.emit(ProgressEvent::Completed {
            stats: *stats,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(processed: u64) -> RunStats {
        RunStats {
            processed,
            ..RunStats::default()
        }
    }

    fn report() -> ItemReport {
        ItemReport {
            id: "1".into(),
            kind: ItemKind::Original,
            timestamp: Utc::now(),
            excerpt: String::new(),
            outcome: ItemOutcome::TooRecent,
        }
    }

    #[test]
    fn snapshots_every_n_items() {
        let log = Arc::new(EventLog::default());
        let reporter = Reporter::new(log.clone(), 2);
        for processed in 1..=5 {
            reporter.item(&stats(processed), report());
        }
        let snapshots: Vec<u64> = log
            .events()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Snapshot { stats } => Some(stats.processed),
                _ => None,
            })
            .collect();
        assert_eq!(snapshots, vec![2, 4]);
        assert_eq!(log.items().len(), 5);
    }

    #[test]
    fn success_rate_ignores_skips() {
        let stats = RunStats {
            processed: 10,
            deleted: 3,
            skipped: 6,
            errors: 1,
            ..RunStats::default()
        };
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(RunStats::default().success_rate(), 0.0);
    }

    #[test]
    fn events_serialize_tagged() {
        let event = ProgressEvent::Completed {
            stats: stats(1),
            reason: StopReason::EmptyStreak,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "completed");
        assert_eq!(json["reason"], "empty_streak");
        assert_eq!(json["stats"]["processed"], 1);
    }
}
