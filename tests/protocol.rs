use std::sync::Arc;

use chrono::{TimeZone, Utc};

use feed_sweep::classify::{Classifier, FeedItem, ItemKind};
use feed_sweep::clock::ManualClock;
use feed_sweep::config::TimingsConfig;
use feed_sweep::protocol::{Failure, Outcome, RemovalEngine};
use feed_sweep::sim::{FeedFixture, Fault, SimFeed, SimPost, ITEM_HEIGHT, VIEWPORT_HEIGHT};

const TARGET: &str = "4";
const TARGET_POSITION: f64 = 3.0;
const ACTION_BAR_OFFSET: f64 = 520.0;

struct Bench {
    feed: Arc<SimFeed>,
    classifier: Classifier,
    clock: Arc<ManualClock>,
}

// Five rendered posts; the fourth is the one under test.
fn bench(kind: ItemKind, fault: Option<Fault>) -> Bench {
    let at = Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap();
    let posts = (1..=5)
        .map(|n| {
            let id = n.to_string();
            if id == TARGET {
                let post = SimPost::new(id, kind, at);
                match fault {
                    Some(fault) => post.with_fault(fault),
                    None => post,
                }
            } else {
                SimPost::new(id, ItemKind::Original, at)
            }
        })
        .collect();
    let feed = Arc::new(SimFeed::new(
        FeedFixture::new("https://x.com/me", posts).with_page_size(5),
    ));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 8, 10, 12, 0, 0).unwrap(),
    ));
    let classifier = Classifier::new(feed.clone(), clock.clone());
    Bench {
        feed,
        classifier,
        clock,
    }
}

impl Bench {
    fn target(&self) -> FeedItem {
        self.classifier
            .enumerate()
            .into_iter()
            .find(|item| item.identity.key == TARGET)
            .expect("target rendered")
    }

    fn remove(&self) -> Outcome {
        let item = self.target();
        RemovalEngine::new(&self.classifier, self.clock.clone(), TimingsConfig::default()).run(&item)
    }
}

fn assert_near(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "scroll top {actual}, expected {expected}"
    );
}

#[test]
fn missing_delete_option_dismisses_the_menu() {
    let bench = bench(ItemKind::Original, Some(Fault::NoDeleteOption));

    assert_eq!(bench.remove(), Outcome::Failed(Failure::DeleteOptionMissing));
    assert_eq!(bench.feed.attempts(TARGET), 1);
    assert!(!bench.feed.overlay_open());
    assert!(bench.feed.removed().is_empty());
}

#[test]
fn missing_undo_option_dismisses_the_reshare_menu() {
    let bench = bench(ItemKind::Reshare, Some(Fault::NoUndoOption));

    assert_eq!(bench.remove(), Outcome::Failed(Failure::UndoOptionMissing));
    assert_eq!(bench.feed.attempts(TARGET), 1);
    assert!(!bench.feed.overlay_open());
}

#[test]
fn missing_confirm_sheet_leaves_no_overlay() {
    let bench = bench(ItemKind::Reply, Some(Fault::NoConfirm));

    assert_eq!(bench.remove(), Outcome::Failed(Failure::ConfirmMissing));
    assert_eq!(bench.feed.attempts(TARGET), 1);
    assert!(!bench.feed.overlay_open());
}

#[test]
fn missing_action_bar_never_opens_a_menu() {
    let bench = bench(ItemKind::Original, Some(Fault::NoActions));

    assert_eq!(bench.remove(), Outcome::Failed(Failure::OverflowMenuMissing));
    assert_eq!(bench.feed.attempts(TARGET), 0);
    assert!(!bench.feed.overlay_open());
}

#[test]
fn plain_confirm_button_is_found_by_label() {
    let bench = bench(ItemKind::Quote, Some(Fault::PlainConfirm));

    assert_eq!(bench.remove(), Outcome::Removed);
    assert_eq!(bench.feed.removed(), vec![TARGET.to_string()]);
    assert!(!bench.feed.overlay_open());
}

#[test]
fn menu_items_are_scrolled_to_a_third_of_the_viewport() {
    let bench = bench(ItemKind::Original, Some(Fault::NoDeleteOption));

    bench.remove();

    assert_near(
        bench.feed.scroll_top(),
        TARGET_POSITION * ITEM_HEIGHT - VIEWPORT_HEIGHT * 0.3,
    );
}

#[test]
fn reshare_toggles_are_scrolled_lower_in_the_viewport() {
    let bench = bench(ItemKind::Reshare, Some(Fault::NoUndoOption));

    bench.remove();

    assert_near(
        bench.feed.scroll_top(),
        TARGET_POSITION * ITEM_HEIGHT + ACTION_BAR_OFFSET - VIEWPORT_HEIGHT * 0.7,
    );
}
