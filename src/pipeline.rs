//! Orchestration: one acquisition thread and one worker thread per stream.
//!
//! `Pipeline` wires the components together; `spawn` moves them onto their
//! threads and returns a `PipelineHandle`. All three contexts watch one
//! `Shutdown` flag. A fatal error (or a panic) in any of them trips the
//! flag, so the others wind down at their next loop iteration and
//! `PipelineHandle::join` reports the first failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::Local;

use crate::acquisition::{
    AcquisitionLoop, AcquisitionStats, AcquisitionStatsSnapshot, DEFAULT_HEALTH_LOG_INTERVAL,
};
use crate::config::PaddockConfig;
use crate::debounce::{DebounceStart, DetectionDebouncer, DEFAULT_DEBOUNCE_WINDOW};
use crate::detect::{build_detector, Detector};
use crate::error::PipelineResult;
use crate::frame::StreamKind;
use crate::handoff::HandoffSlot;
use crate::ingest::{RtspSource, StreamSource};
use crate::ledger::MetadataLedger;
use crate::sink::{EvidenceLayout, ImageSink, JpegImageSink};
use crate::worker::{DetectionWorker, FrameOutcome, WorkerSettings, WorkerStats, WorkerStatsSnapshot};

/// Cooperative stop signal shared by every pipeline context.
#[derive(Clone, Debug, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub tick_period: Duration,
    pub debounce_window: Duration,
    pub debounce_start: DebounceStart,
    pub health_log_interval: Duration,
    pub worker: WorkerSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            debounce_start: DebounceStart::default(),
            health_log_interval: DEFAULT_HEALTH_LOG_INTERVAL,
            worker: WorkerSettings::default(),
        }
    }
}

/// The source and detector for one stream.
pub struct StreamParts {
    pub source: Box<dyn StreamSource>,
    pub detector: Box<dyn Detector>,
}

pub struct Pipeline {
    acquisition: AcquisitionLoop,
    workers: Vec<DetectionWorker>,
    ledger: Arc<MetadataLedger>,
    layout: EvidenceLayout,
}

impl Pipeline {
    /// Wire up a pipeline from already-built parts. Creates the output
    /// directories and opens the ledger.
    pub fn assemble(
        optical: StreamParts,
        thermal: StreamParts,
        sink: Arc<dyn ImageSink>,
        layout: EvidenceLayout,
        settings: PipelineSettings,
    ) -> PipelineResult<Self> {
        layout.prepare()?;
        let ledger = Arc::new(MetadataLedger::open(layout.ledger_path())?);
        // One gate for both workers: a recorded event on either stream
        // holds off the other for the same window.
        let debouncer = Arc::new(DetectionDebouncer::with_start(
            settings.debounce_window,
            settings.debounce_start,
        ));
        if settings.debounce_start == DebounceStart::Seed {
            debouncer.seed_at(Instant::now());
        }

        let mut workers = Vec::with_capacity(2);
        let mut wire = |stream: StreamKind, parts: StreamParts| {
            let slot = Arc::new(HandoffSlot::new());
            workers.push(DetectionWorker::new(
                stream,
                slot.clone(),
                parts.detector,
                debouncer.clone(),
                ledger.clone(),
                sink.clone(),
                layout.clone(),
                settings.worker.clone(),
            ));
            (parts.source, slot)
        };
        let optical_lane = wire(StreamKind::Optical, optical);
        let thermal_lane = wire(StreamKind::Thermal, thermal);
        let acquisition = AcquisitionLoop::new(optical_lane, thermal_lane, settings.tick_period)
            .with_health_interval(settings.health_log_interval);

        Ok(Self {
            acquisition,
            workers,
            ledger,
            layout,
        })
    }

    /// Build the production pipeline: RTSP (or `stub://`) sources, the
    /// configured detector backend and JPEG output.
    pub fn from_config(config: &PaddockConfig) -> Result<Self> {
        let layout = config.evidence_layout(Local::now().date_naive());
        let parts = |stream: StreamKind| -> Result<StreamParts> {
            Ok(StreamParts {
                source: Box::new(RtspSource::new(config.rtsp_config(stream))?),
                detector: build_detector(&config.detector, stream)?,
            })
        };
        let optical = parts(StreamKind::Optical)?;
        let thermal = parts(StreamKind::Thermal)?;
        let sink = Arc::new(JpegImageSink::new(config.output.jpeg_quality));
        let pipeline = Self::assemble(optical, thermal, sink, layout, config.pipeline_settings())?;
        Ok(pipeline)
    }

    pub fn layout(&self) -> &EvidenceLayout {
        &self.layout
    }

    pub fn ledger(&self) -> &MetadataLedger {
        &self.ledger
    }

    pub fn acquisition(&self) -> &AcquisitionLoop {
        &self.acquisition
    }

    pub fn open_sources(&mut self) {
        self.acquisition.open_all();
    }

    /// One acquisition tick followed by one non-blocking step of each
    /// worker, all on the calling thread, as if the time were `now`.
    pub fn run_once_at(&mut self, now: Instant) -> PipelineResult<Vec<(StreamKind, FrameOutcome)>> {
        self.acquisition.tick_at(now);
        let mut outcomes = Vec::new();
        for worker in &mut self.workers {
            if let Some(outcome) = worker.step_at(now)? {
                outcomes.push((worker.stream(), outcome));
            }
        }
        Ok(outcomes)
    }

    /// Start the three contexts.
    pub fn spawn(self, shutdown: Shutdown) -> Result<PipelineHandle> {
        let Self {
            mut acquisition,
            workers,
            ledger,
            ..
        } = self;
        log::info!("pipeline starting; ledger at {}", ledger.path().display());

        let acquisition_stats = StreamKind::ALL
            .into_iter()
            .filter_map(|stream| acquisition.stats(stream).map(|stats| (stream, stats)))
            .collect();
        let worker_stats = workers
            .iter()
            .map(|worker| (worker.stream(), worker.stats()))
            .collect();

        let mut handle = PipelineHandle {
            shutdown: shutdown.clone(),
            threads: Vec::with_capacity(3),
            acquisition_stats,
            worker_stats,
        };

        let spawned = spawn_context("acquisition".to_string(), &shutdown, move |shutdown| {
            acquisition.run(shutdown);
            Ok(())
        });
        handle.push("acquisition".to_string(), spawned)?;

        for mut worker in workers {
            let name = format!("{}-worker", worker.stream());
            let spawned = spawn_context(name.clone(), &shutdown, move |shutdown| {
                worker.run(shutdown)
            });
            handle.push(name, spawned)?;
        }
        Ok(handle)
    }
}

fn spawn_context<F>(
    name: String,
    shutdown: &Shutdown,
    body: F,
) -> std::io::Result<JoinHandle<PipelineResult<()>>>
where
    F: FnOnce(&Shutdown) -> PipelineResult<()> + Send + 'static,
{
    let shutdown = shutdown.clone();
    std::thread::Builder::new().name(name).spawn(move || {
        let _trip = TripOnPanic(shutdown.clone());
        let result = body(&shutdown);
        if result.is_err() {
            shutdown.trigger();
        }
        result
    })
}

struct TripOnPanic(Shutdown);

impl Drop for TripOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.trigger();
        }
    }
}

pub struct PipelineHandle {
    shutdown: Shutdown,
    threads: Vec<(String, JoinHandle<PipelineResult<()>>)>,
    acquisition_stats: Vec<(StreamKind, Arc<AcquisitionStats>)>,
    worker_stats: Vec<(StreamKind, Arc<WorkerStats>)>,
}

impl PipelineHandle {
    fn push(
        &mut self,
        name: String,
        spawned: std::io::Result<JoinHandle<PipelineResult<()>>>,
    ) -> Result<()> {
        match spawned {
            Ok(join) => {
                self.threads.push((name, join));
                Ok(())
            }
            Err(err) => {
                self.shutdown.trigger();
                Err(anyhow!("failed to spawn {} thread: {}", name, err))
            }
        }
    }

    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn acquisition_stats(&self, stream: StreamKind) -> Option<AcquisitionStatsSnapshot> {
        self.acquisition_stats
            .iter()
            .find(|(s, _)| *s == stream)
            .map(|(_, stats)| stats.snapshot())
    }

    pub fn worker_stats(&self, stream: StreamKind) -> Option<WorkerStatsSnapshot> {
        self.worker_stats
            .iter()
            .find(|(s, _)| *s == stream)
            .map(|(_, stats)| stats.snapshot())
    }

    /// Trip shutdown and wait for every context to exit.
    pub fn stop(self) -> Result<()> {
        self.shutdown.trigger();
        self.join()
    }

    /// Wait for every context to exit. Returns the first fatal error, if any.
    pub fn join(self) -> Result<()> {
        let mut first_error = None;
        for (name, join) in self.threads {
            let outcome = match join.join() {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => anyhow::Error::new(err).context(format!("{} thread failed", name)),
                Err(_) => anyhow!("{} thread panicked", name),
            };
            log::error!("{:#}", outcome);
            self.shutdown.trigger();
            first_error.get_or_insert(outcome);
        }
        log::info!("pipeline stopped");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
