use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use crossbeam_channel::Receiver;

use feed_sweep::classify::ItemKind;
use feed_sweep::clock::ManualClock;
use feed_sweep::config::{Config, RunOverrides};
use feed_sweep::logging;
use feed_sweep::progress::ProgressEvent;
use feed_sweep::service::Service;
use feed_sweep::sim::{FeedFixture, SimFeed, SimPost};
use feed_sweep::storage::{self, Store};

fn finish(service: &Service, events: &Receiver<ProgressEvent>) {
    for event in events.iter() {
        if matches!(event, ProgressEvent::Completed { .. }) {
            break;
        }
    }
    service.wait();
}

fn debug_entries(store: &Store) -> usize {
    store
        .list_logs(100_000)
        .unwrap()
        .into_iter()
        .filter(|entry| entry.level == "DEBUG")
        .count()
}

// One test per binary: the subscriber is process-global.
#[test]
fn debug_override_switches_the_level_per_run() {
    std::env::remove_var("RUST_LOG");
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        Store::open(storage::Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap(),
    );
    logging::init(false, Some(store.clone())).unwrap();

    let posts = (1..=3)
        .map(|n| {
            SimPost::new(
                n.to_string(),
                ItemKind::Original,
                Utc.with_ymd_and_hms(2025, 8, n + 1, 10, 0, 0).unwrap(),
            )
        })
        .collect();
    let feed = Arc::new(SimFeed::new(FeedFixture::new("https://x.com/me", posts)));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 8, 10, 12, 0, 0).unwrap(),
    ));
    let mut config = Config::default();
    config.run.cutoff_date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
    let service = Service::new(feed, clock, store.clone(), config);
    let events = service.events();

    service.start_fresh(RunOverrides::default()).unwrap();
    finish(&service, &events);
    assert_eq!(debug_entries(&store), 0);
    assert!(!store.list_logs(100_000).unwrap().is_empty());

    service
        .start_fresh(RunOverrides {
            debug: Some(true),
            ..RunOverrides::default()
        })
        .unwrap();
    finish(&service, &events);
    let with_debug = debug_entries(&store);
    assert!(with_debug > 0);

    service.start_fresh(RunOverrides::default()).unwrap();
    finish(&service, &events);
    assert_eq!(debug_entries(&store), with_debug);
}
