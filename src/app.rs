use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::classify::ItemKind;
use crate::clock::ManualClock;
use crate::config::{self, RunOverrides};
use crate::logging;
use crate::progress::{ItemOutcome, ItemReport, ProgressEvent, RunStats, StopReason};
use crate::service::Service;
use crate::sim::{FeedFixture, SimFeed};
use crate::storage;

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub fixture: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub state: Option<PathBuf>,
    pub cutoff: Option<NaiveDate>,
    pub kinds: Option<Vec<ItemKind>>,
    pub fresh: bool,
    pub reset: bool,
    pub debug: bool,
}

pub fn run(options: Options) -> Result<()> {
    let mut cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    if let Some(state) = options.state.clone() {
        cfg.storage.path = Some(state);
    }

    let store = Arc::new(
        storage::Store::open(storage::Options {
            path: cfg.storage.path.clone(),
        })
        .context("open storage")?,
    );
    logging::init(cfg.run.debug, Some(store.clone()))?;

    let fixture_path = options
        .fixture
        .clone()
        .context("a feed fixture is required (--fixture <path>)")?;
    let fixture = FeedFixture::load(&fixture_path)
        .with_context(|| format!("load fixture {}", fixture_path.display()))?;

    let feed = Arc::new(SimFeed::new(fixture));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = Service::new(feed.clone(), clock.clone(), store, cfg);

    if options.reset {
        service.reset_progress().context("reset progress")?;
        println!("Progress reset.");
    }

    let overrides = RunOverrides {
        cutoff_date: options.cutoff,
        enabled_kinds: options.kinds.clone(),
        debug: options.debug.then_some(true),
        ..RunOverrides::default()
    };
    let events = service.events();
    if options.fresh {
        service.start_fresh(overrides)?;
    } else {
        service.start(overrides)?;
    }

    let bar = spinner();
    let mut finished = None;
    for event in events.iter() {
        match event {
            ProgressEvent::Started { .. } | ProgressEvent::Snapshot { .. } => {}
            ProgressEvent::Item { stats, item } => {
                bar.set_message(stats_line(&stats));
                bar.suspend(|| println!("{}", item_line(&item)));
            }
            ProgressEvent::Completed { stats, reason } => {
                finished = Some((stats, reason));
                break;
            }
        }
    }
    bar.finish_and_clear();
    service.wait();

    let (stats, reason) = finished.context("run ended without a completion event")?;
    print_summary(&stats, reason, clock.slept());
    println!("  removed         {}", feed.removed().join(", "));
    Ok(())
}

fn spinner() -> ProgressBar {
    let style = ProgressStyle::default_spinner()
        .template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let bar = ProgressBar::new_spinner();
    bar.set_style(style);
    bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}

fn stats_line(stats: &RunStats) -> String {
    format!(
        "processed {} | deleted {} | skipped {} | errors {}",
        stats.processed, stats.deleted, stats.skipped, stats.errors
    )
}

fn item_line(item: &ItemReport) -> String {
    let outcome = match item.outcome {
        ItemOutcome::Removed => "removed".to_string(),
        ItemOutcome::TooRecent => "kept (too recent)".to_string(),
        ItemOutcome::KindDisabled => "kept (kind disabled)".to_string(),
        ItemOutcome::Failed { failure } => format!("failed ({})", failure.describe()),
    };
    format!(
        "{:<24} {:<9} {} {} {:?}",
        outcome,
        item.kind.as_str(),
        item.timestamp.format("%Y-%m-%d"),
        item.id,
        item.excerpt
    )
}

fn print_summary(stats: &RunStats, reason: StopReason, simulated: Duration) {
    println!("Run finished: {}", reason.describe());
    println!("  processed       {}", stats.processed);
    println!("  deleted         {}", stats.deleted);
    println!("  skipped         {}", stats.skipped);
    println!("  errors          {}", stats.errors);
    println!("  scroll attempts {}", stats.scroll_attempts);
    println!("  success rate    {:.1}%", stats.success_rate());
    println!(
        "  simulated time  {}",
        humantime::format_duration(Duration::from_secs(simulated.as_secs()))
    );
}
