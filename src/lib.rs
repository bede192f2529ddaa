//! Paddock Watch
//!
//! Dual-camera (optical + thermal) ingestion and detection pipeline for
//! unattended livestock and intruder monitoring.
//!
//! # Architecture
//!
//! Three long-lived contexts share process memory:
//!
//! 1. **Acquisition**: one loop polls both cameras at a fixed rate and hands
//!    each frame to its stream's capacity-1 slot. A stalled camera or a slow
//!    worker is resolved by reconnecting the source, never by queueing.
//! 2. **Optical worker** and 3. **Thermal worker**: each drains its slot,
//!    runs the detector, saves a baseline frame every baseline period and,
//!    when a category of interest is found and the shared quiet window has
//!    elapsed, persists raw + annotated images and ledger rows.
//!
//! # Module Structure
//!
//! - `frame`: captured frames and stream identity
//! - `ingest`: stream sources (RTSP, synthetic `stub://`)
//! - `handoff`: capacity-1 hand-off slot
//! - `acquisition`: the polling/reconnect loop
//! - `detect`: detector trait, backends and the category filter
//! - `debounce`: shared quiet-window gate
//! - `annotate`, `sink`: annotated copies and image persistence
//! - `ledger`: append-only CSV record of detections
//! - `worker`: per-stream detection worker
//! - `pipeline`: wiring, threads and shutdown
//! - `config`: file + environment configuration

pub mod acquisition;
pub mod annotate;
pub mod config;
pub mod debounce;
pub mod detect;
pub mod error;
pub mod frame;
pub mod handoff;
pub mod ingest;
pub mod ledger;
pub mod pipeline;
pub mod sink;
pub mod worker;

pub use acquisition::{AcquisitionLoop, AcquisitionStats, StreamState, TickOutcome};
pub use config::{DetectorBackendKind, DetectorSettings, PaddockConfig};
pub use debounce::{DebounceStart, DetectionDebouncer};
pub use detect::{
    build_detector, BoundingBox, CategoryFilter, Detection, DetectionResult, Detector,
    ScriptedBackend, StubBackend,
};
pub use error::{PipelineError, PipelineResult};
pub use frame::{Frame, StreamKind};
pub use handoff::HandoffSlot;
pub use ingest::{RtspConfig, RtspSource, StreamSource};
pub use ledger::{DetectionRecord, MetadataLedger};
pub use pipeline::{Pipeline, PipelineHandle, PipelineSettings, Shutdown, StreamParts};
pub use sink::{EvidenceLayout, ImageKind, ImageSink, JpegImageSink};
pub use worker::{DetectionWorker, FrameOutcome, WorkerSettings};
