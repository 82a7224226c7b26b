use std::sync::Arc;
use std::thread;

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::{Config, RunConfig, RunOverrides};
use crate::controller::{Controller, ProcessedSet, RunContext, RunSummary, StopSignal};
use crate::logging;
use crate::progress::{ProgressEvent, ProgressSink, RunStats};
use crate::storage::{ProgressSnapshot, Store};
use crate::surface::Surface;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error("no run in progress")]
    NotRunning,
    #[error("storage: {0:#}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub is_running: bool,
    pub stats: RunStats,
    pub config: RunConfig,
}

struct Inner {
    surface: Arc<dyn Surface>,
    clock: Arc<dyn Clock>,
    store: Arc<Store>,
    config: RwLock<Config>,
    status: RwLock<Status>,
    stop: StopSignal,
    events: Sender<ProgressEvent>,
}

pub struct Service {
    inner: Arc<Inner>,
    events: Receiver<ProgressEvent>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Service {
    pub fn new(
        surface: Arc<dyn Surface>,
        clock: Arc<dyn Clock>,
        store: Arc<Store>,
        config: Config,
    ) -> Self {
        let (tx, rx) = unbounded();
        let status = Status {
            is_running: false,
            stats: RunStats::default(),
            config: config.run.clone(),
        };
        if let Err(err) = logging::prune(&store, &config.storage) {
            warn!(error = %err, "pruning logs failed");
        }
        Self {
            inner: Arc::new(Inner {
                surface,
                clock,
                store,
                config: RwLock::new(config),
                status: RwLock::new(status),
                stop: StopSignal::new(),
                events: tx,
            }),
            events: rx,
            worker: Mutex::new(None),
        }
    }

    pub fn start(&self, overrides: RunOverrides) -> Result<(), ServiceError> {
        self.launch(overrides, true)
    }

    pub fn start_fresh(&self, overrides: RunOverrides) -> Result<(), ServiceError> {
        self.launch(overrides, false)
    }

    pub fn stop(&self) -> Result<(), ServiceError> {
        if !self.inner.status.read().is_running {
            return Err(ServiceError::NotRunning);
        }
        info!("stop requested");
        self.inner.stop.stop();
        Ok(())
    }

    pub fn status(&self) -> Status {
        self.inner.status.read().clone()
    }

    pub fn reset_progress(&self) -> Result<(), ServiceError> {
        if self.inner.status.read().is_running {
            return Err(ServiceError::AlreadyRunning);
        }
        self.inner.store.clear_progress()?;
        self.inner.status.write().stats = RunStats::default();
        info!("progress reset");
        Ok(())
    }

    pub fn events(&self) -> Receiver<ProgressEvent> {
        self.events.clone()
    }

    pub fn config(&self) -> Config {
        self.inner.config.read().clone()
    }

    pub fn set_config(&self, config: Config) {
        let mut status = self.inner.status.write();
        if !status.is_running {
            status.config = config.run.clone();
        }
        *self.inner.config.write() = config;
    }

    pub fn wait(&self) {
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("run worker panicked");
            }
        }
    }

    fn launch(&self, overrides: RunOverrides, resume: bool) -> Result<(), ServiceError> {
        let mut worker = self.worker.lock();
        if self.inner.status.read().is_running {
            return Err(ServiceError::AlreadyRunning);
        }
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }

        let config = self.inner.config.read().clone();
        let settings = overrides.apply(&config.run);
        if let Err(err) = logging::set_debug(settings.debug) {
            warn!(error = %err, "switching log level failed");
        }
        let processed = if resume {
            self.inner.saved_processed()?
        } else {
            ProcessedSet::default()
        };

        self.inner.stop.reset();
        {
            let mut status = self.inner.status.write();
            status.is_running = true;
            status.stats = RunStats::default();
            status.config = settings.clone();
        }

        let ctx = RunContext {
            surface: self.inner.surface.clone(),
            clock: self.inner.clock.clone(),
            settings,
            timings: config.timings,
            stop: self.inner.stop.clone(),
        };
        let inner = self.inner.clone();
        *worker = Some(thread::spawn(move || inner.run(ctx, processed)));
        Ok(())
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.inner.stop.stop();
        self.wait();
    }
}

impl Inner {
    fn saved_processed(&self) -> anyhow::Result<ProcessedSet> {
        Ok(self
            .store
            .load_progress()?
            .map(|snapshot| snapshot.processed.into_iter().collect())
            .unwrap_or_default())
    }

    fn run(self: Arc<Self>, ctx: RunContext, processed: ProcessedSet) {
        let sink = Arc::new(StatusSink {
            inner: self.clone(),
            completion: Mutex::new(None),
        });
        let summary = Controller::new(ctx, sink.clone())
            .with_processed(processed)
            .run();

        self.save(&summary);
        self.status.write().is_running = false;
        let completion = sink.completion.lock().take();
        if let Some(event) = completion {
            let _ = self.events.send(event);
        }
    }

    fn save(&self, summary: &RunSummary) {
        let snapshot = ProgressSnapshot {
            stats: summary.stats,
            processed: summary.processed.to_sorted_vec(),
            saved_at: Utc::now(),
        };
        match self.store.save_progress(&snapshot) {
            Ok(()) => info!(processed = snapshot.processed.len(), "progress saved"),
            Err(err) => error!(error = %err, "saving progress failed"),
        }
    }
}

// Mirrors stats into `Status` and forwards events. The completion event is
// held back until the snapshot is saved and the run is marked finished.
struct StatusSink {
    inner: Arc<Inner>,
    completion: Mutex<Option<ProgressEvent>>,
}

impl ProgressSink for StatusSink {
    fn emit(&self, event: ProgressEvent) {
        self.inner.status.write().stats = *event.stats();
        if matches!(event, ProgressEvent::Completed { .. }) {
            *self.completion.lock() = Some(event);
            return;
        }
        let _ = self.inner.events.send(event);
    }
}
