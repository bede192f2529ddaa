//! Per-stream detection worker.
//!
//! Drains one hand-off slot, runs the detector, saves periodic baseline
//! frames and, when the category filter and the shared debounce gate both
//! agree, persists the raw + annotated images and one ledger row per
//! qualifying detection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;

use crate::annotate::annotate;
use crate::debounce::DetectionDebouncer;
use crate::detect::{CategoryFilter, Detector};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{Frame, StreamKind};
use crate::handoff::HandoffSlot;
use crate::ledger::{DetectionRecord, MetadataLedger};
use crate::pipeline::Shutdown;
use crate::sink::{EvidenceLayout, ImageKind, ImageSink};

pub const DEFAULT_BASELINE_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_ANNOTATION_THRESHOLD: f32 = 0.2;

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub filter: CategoryFilter,
    pub baseline_period: Duration,
    /// Minimum confidence for a box to be drawn on the annotated copy.
    pub annotation_threshold: f32,
    /// How long to wait on an empty slot before re-checking shutdown.
    pub idle_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            filter: CategoryFilter::default(),
            baseline_period: DEFAULT_BASELINE_PERIOD,
            annotation_threshold: DEFAULT_ANNOTATION_THRESHOLD,
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }
}

/// Shared counters; read from outside the worker thread.
#[derive(Debug, Default)]
pub struct WorkerStats {
    frames_processed: AtomicU64,
    detect_failures: AtomicU64,
    baselines_saved: AtomicU64,
    events_recorded: AtomicU64,
    records_written: AtomicU64,
    persist_failures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub frames_processed: u64,
    pub detect_failures: u64,
    pub baselines_saved: u64,
    pub events_recorded: u64,
    pub records_written: u64,
    pub persist_failures: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            detect_failures: self.detect_failures.load(Ordering::Relaxed),
            baselines_saved: self.baselines_saved.load(Ordering::Relaxed),
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// What happened to one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    pub detect_failed: bool,
    pub baseline_saved: bool,
    /// The filter passed and the debounce gate allowed the event.
    pub event_recorded: bool,
    pub records_written: usize,
}

pub struct DetectionWorker {
    stream: StreamKind,
    slot: Arc<HandoffSlot>,
    detector: Box<dyn Detector>,
    debouncer: Arc<DetectionDebouncer>,
    ledger: Arc<MetadataLedger>,
    sink: Arc<dyn ImageSink>,
    layout: EvidenceLayout,
    settings: WorkerSettings,
    last_baseline: Instant,
    stats: Arc<WorkerStats>,
}

impl DetectionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: StreamKind,
        slot: Arc<HandoffSlot>,
        detector: Box<dyn Detector>,
        debouncer: Arc<DetectionDebouncer>,
        ledger: Arc<MetadataLedger>,
        sink: Arc<dyn ImageSink>,
        layout: EvidenceLayout,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            stream,
            slot,
            detector,
            debouncer,
            ledger,
            sink,
            layout,
            settings,
            last_baseline: Instant::now(),
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Drain the slot until shutdown. Returns early only on a fatal error.
    pub fn run(&mut self, shutdown: &Shutdown) -> PipelineResult<()> {
        log::info!("{} worker started", self.stream);
        while !shutdown.is_triggered() {
            let Some(frame) = self.slot.take_timeout(self.settings.idle_interval) else {
                continue;
            };
            if let Err(err) = self.process_at(frame, Instant::now()) {
                log::error!("{} worker stopping: {}", self.stream, err);
                return Err(err);
            }
        }
        log::info!("{} worker stopped", self.stream);
        Ok(())
    }

    /// Take whatever is in the slot, without waiting, and process it.
    pub fn step_at(&mut self, now: Instant) -> PipelineResult<Option<FrameOutcome>> {
        match self.slot.try_take() {
            Some(frame) => self.process_at(frame, now).map(Some),
            None => Ok(None),
        }
    }

    /// Handle one frame as if the current time were `now`.
    ///
    /// Non-fatal failures are logged and reflected in the outcome; `Err` is
    /// returned only for fatal ones.
    pub fn process_at(&mut self, frame: Frame, now: Instant) -> PipelineResult<FrameOutcome> {
        let mut outcome = FrameOutcome::default();
        WorkerStats::bump(&self.stats.frames_processed);
        log::debug!("{} worker processing {:?}", self.stream, frame);

        let result = match self.detector.detect(&frame) {
            Ok(result) => result,
            Err(err) => {
                let err = PipelineError::DetectFailed {
                    stream: self.stream,
                    reason: format!("{:#}", err),
                };
                log::warn!("{}", err);
                WorkerStats::bump(&self.stats.detect_failures);
                outcome.detect_failed = true;
                return Ok(outcome);
            }
        };

        let unix_seconds = frame.unix_seconds();
        let image = frame.to_rgb_image();

        if now.saturating_duration_since(self.last_baseline) > self.settings.baseline_period {
            self.last_baseline = now;
            let path = self
                .layout
                .image_path(ImageKind::Baseline, self.stream, unix_seconds);
            match self.sink.write(&path, &image) {
                Ok(()) => {
                    log::info!("{} baseline saved to {}", self.stream, path.display());
                    WorkerStats::bump(&self.stats.baselines_saved);
                    outcome.baseline_saved = true;
                }
                Err(err) => self.persist_failed(err)?,
            }
        }

        if !self.settings.filter.passes(&result) || !self.debouncer.allow_at(now) {
            return Ok(outcome);
        }
        let qualifying = self.settings.filter.qualifying(&result);
        outcome.event_recorded = true;
        WorkerStats::bump(&self.stats.events_recorded);

        let original_image = self.layout.image_path(ImageKind::Raw, self.stream, unix_seconds);
        let annotated_image = self
            .layout
            .image_path(ImageKind::Annotated, self.stream, unix_seconds);
        let annotated = annotate(&image, &result, self.settings.annotation_threshold);
        for (path, img) in [(&original_image, &image), (&annotated_image, &annotated)] {
            if let Err(err) = self.sink.write(path, img) {
                // The gate stays consumed: evidence is best effort.
                self.persist_failed(err)?;
                return Ok(outcome);
            }
        }

        for detection in qualifying {
            let record = DetectionRecord {
                timestamp: Local::now(),
                original_image: original_image.clone(),
                annotated_image: annotated_image.clone(),
                confidence: detection.confidence,
                category: detection.label.clone(),
            };
            if let Err(err) = self.ledger.append(&record) {
                self.persist_failed(err)?;
                return Ok(outcome);
            }
            outcome.records_written += 1;
            WorkerStats::bump(&self.stats.records_written);
            log::info!(
                "{} detection recorded: {} conf={:.2} image={}",
                self.stream,
                detection.label,
                detection.confidence,
                original_image.display()
            );
        }
        Ok(outcome)
    }

    fn persist_failed(&self, err: PipelineError) -> PipelineResult<()> {
        if err.is_fatal() {
            return Err(err);
        }
        log::warn!("{} worker: {}", self.stream, err);
        WorkerStats::bump(&self.stats.persist_failures);
        Ok(())
    }
}
