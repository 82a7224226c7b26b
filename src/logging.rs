use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use once_cell::sync::OnceCell;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as fmt_layer, reload, EnvFilter, Layer, Registry};

use crate::config::StorageConfig;
use crate::storage::{NewLogEntry, Store};

const CRATE_TARGET: &str = "feed_sweep";

struct FilterControl {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

static FILTER: OnceCell<FilterControl> = OnceCell::new();

pub fn init(debug: bool, store: Option<Arc<Store>>) -> Result<()> {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (crate_filter(debug)?, false),
    };
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt_layer::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(store.map(StoreLayer::new))
        .try_init()
        .context("logging: install subscriber")?;

    let _ = FILTER.set(FilterControl { handle, from_env });
    Ok(())
}

// Switches this crate's level for the next run. A filter taken from
// `RUST_LOG` is left alone, as is a process that never called `init`.
pub fn set_debug(debug: bool) -> Result<()> {
    let Some(control) = FILTER.get() else {
        return Ok(());
    };
    if control.from_env {
        return Ok(());
    }
    control
        .handle
        .reload(crate_filter(debug)?)
        .context("logging: reload filter")
}

fn crate_filter(debug: bool) -> Result<EnvFilter> {
    let level = if debug { "debug" } else { "info" };
    EnvFilter::try_new(format!("{CRATE_TARGET}={level}")).context("logging: build filter")
}

pub fn prune(store: &Store, cfg: &StorageConfig) -> Result<usize> {
    let retention = chrono::Duration::from_std(cfg.log_retention)
        .unwrap_or_else(|_| chrono::Duration::days(3));
    store.prune_logs(Utc::now() - retention, cfg.max_log_entries)
}

pub struct StoreLayer {
    store: Arc<Store>,
}

impl StoreLayer {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl<S: Subscriber> Layer<S> for StoreLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let meta = event.metadata();
        if !meta.target().starts_with(CRATE_TARGET) {
            return;
        }
        let mut text = EventText::default();
        event.record(&mut text);
        let entry = NewLogEntry {
            recorded_at: Utc::now(),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            message: text.render(),
        };
        // Store failures are dropped; the fmt layer still has the line.
        let _ = self.store.append_log(&entry);
    }
}

#[derive(Default)]
struct EventText {
    message: String,
    fields: Vec<String>,
}

impl EventText {
    fn render(self) -> String {
        if self.fields.is_empty() {
            return self.message;
        }
        format!("{} {}", self.message, self.fields.join(" "))
    }
}

impl Visit for EventText {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}
