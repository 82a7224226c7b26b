use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use crossbeam_channel::Receiver;
use tempfile::TempDir;

use feed_sweep::classify::ItemKind;
use feed_sweep::clock::ManualClock;
use feed_sweep::config::{Config, RunOverrides};
use feed_sweep::progress::{ProgressEvent, RunStats, StopReason};
use feed_sweep::service::{Service, ServiceError};
use feed_sweep::sim::{FeedFixture, SimFeed, SimPost};
use feed_sweep::storage::{self, Store};

fn day(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, month, day, 10, 0, 0).unwrap()
}

fn config() -> Config {
    let mut cfg = Config::default();
    cfg.run.cutoff_date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
    cfg
}

struct Fixture {
    _dir: TempDir,
    store: Arc<Store>,
    feed: Arc<SimFeed>,
    service: Service,
}

fn setup(posts: Vec<SimPost>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        Store::open(storage::Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap(),
    );
    let feed = Arc::new(SimFeed::new(FeedFixture::new("https://x.com/me", posts)));
    let clock = Arc::new(ManualClock::new(day(8, 10)));
    let service = Service::new(feed.clone(), clock, store.clone(), config());
    Fixture {
        _dir: dir,
        store,
        feed,
        service,
    }
}

fn recent_posts() -> Vec<SimPost> {
    (1..=3)
        .map(|n| SimPost::new(n.to_string(), ItemKind::Original, day(8, n + 1)))
        .collect()
}

fn completion(events: &Receiver<ProgressEvent>) -> (RunStats, StopReason) {
    for event in events.iter() {
        if let ProgressEvent::Completed { stats, reason } = event {
            return (stats, reason);
        }
    }
    panic!("event channel closed before completion");
}

#[test]
fn completion_arrives_after_the_run_is_marked_finished() {
    let fx = setup(recent_posts());
    let events = fx.service.events();

    fx.service.start(RunOverrides::default()).unwrap();
    let (stats, reason) = completion(&events);

    let status = fx.service.status();
    assert!(!status.is_running);
    assert_eq!(status.stats, stats);
    assert_eq!(reason, StopReason::EmptyStreak);
    assert_eq!(stats.processed, 3);
    assert!(matches!(fx.service.stop(), Err(ServiceError::NotRunning)));
}

#[test]
fn progress_is_saved_and_resumed() {
    let fx = setup(recent_posts());
    let events = fx.service.events();

    fx.service.start(RunOverrides::default()).unwrap();
    completion(&events);
    fx.service.wait();

    let snapshot = fx.store.load_progress().unwrap().expect("snapshot saved");
    assert_eq!(snapshot.processed, vec!["1", "2", "3"]);
    assert_eq!(snapshot.stats.skipped, 3);

    fx.service.start(RunOverrides::default()).unwrap();
    let (resumed, _) = completion(&events);
    assert_eq!(resumed.processed, 0);

    fx.service.reset_progress().unwrap();
    assert!(fx.store.load_progress().unwrap().is_none());
    fx.service.start(RunOverrides::default()).unwrap();
    let (again, _) = completion(&events);
    assert_eq!(again.processed, 3);
}

#[test]
fn fresh_start_ignores_the_snapshot() {
    let fx = setup(recent_posts());
    let events = fx.service.events();

    fx.service.start(RunOverrides::default()).unwrap();
    completion(&events);

    fx.service.start_fresh(RunOverrides::default()).unwrap();
    let (stats, _) = completion(&events);
    assert_eq!(stats.processed, 3);
}

#[test]
fn overrides_apply_to_one_run() {
    let fx = setup(vec![
        SimPost::new("1", ItemKind::Original, day(7, 1)),
        SimPost::new("2", ItemKind::Reply, day(7, 2)),
    ]);
    let events = fx.service.events();

    fx.service
        .start_fresh(RunOverrides {
            enabled_kinds: Some(vec![ItemKind::Reply]),
            ..RunOverrides::default()
        })
        .unwrap();
    let (stats, _) = completion(&events);

    assert_eq!(stats.deleted, 1);
    assert_eq!(fx.feed.removed(), vec!["2".to_string()]);
    assert_eq!(fx.service.status().config.enabled_kinds, vec![ItemKind::Reply]);
    assert_eq!(fx.service.config().run.enabled_kinds.len(), ItemKind::ALL.len());
}

#[test]
fn stop_ends_a_run_early() {
    let posts = (1..=40)
        .map(|n| SimPost::new(n.to_string(), ItemKind::Original, day(6, 1 + n % 28)))
        .collect();
    let fx = setup(posts);
    let events = fx.service.events();

    fx.service.start_fresh(RunOverrides::default()).unwrap();
    // Stop as soon as the first item has been handled.
    for event in events.iter() {
        if matches!(event, ProgressEvent::Item { .. }) {
            let _ = fx.service.stop();
            break;
        }
    }
    let (stats, reason) = completion(&events);

    assert!(reason == StopReason::Stopped || stats.processed == 40);
    assert!(!fx.service.status().is_running);
    fx.service.wait();
}
