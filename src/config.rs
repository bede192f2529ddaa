use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::debounce::DebounceStart;
use crate::detect::{CategoryFilter, Detection, DEFAULT_CATEGORIES};
use crate::frame::StreamKind;
use crate::ingest::RtspConfig;
use crate::pipeline::PipelineSettings;
use crate::sink::{EvidenceLayout, DEFAULT_JPEG_QUALITY};
use crate::worker::WorkerSettings;

const DEFAULT_OPTICAL_URL: &str = "stub://optical";
const DEFAULT_THERMAL_URL: &str = "stub://thermal";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_BASELINE_DIR: &str = "baseline";
const DEFAULT_FRAME_RATE: f64 = 1.0;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_ANNOTATION_CONFIDENCE: f32 = 0.2;
const DEFAULT_DEBOUNCE_SECS: f64 = 5.0;
const DEFAULT_BASELINE_SECS: f64 = 30.0;
const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_WORKER_IDLE_MS: u64 = 50;
const DEFAULT_HEALTH_LOG_SECS: u64 = 30;
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const MAX_FRAME_DIMENSION: u32 = 8192;
const MAX_TICK_PERIOD: Duration = Duration::from_secs(60 * 60);

pub const CONFIG_ENV: &str = "PADDOCK_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct PaddockConfigFile {
    streams: Option<StreamsConfigFile>,
    output: Option<OutputConfigFile>,
    detection: Option<DetectionConfigFile>,
    detector: Option<DetectorConfigFile>,
    runtime: Option<RuntimeConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamsConfigFile {
    optical_url: Option<String>,
    thermal_url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    output_dir: Option<PathBuf>,
    baseline_dir: Option<PathBuf>,
    dated_subdirs: Option<bool>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    frame_rate: Option<f64>,
    confidence_threshold: Option<f32>,
    categories: Option<Vec<String>>,
    annotation_threshold: Option<f32>,
    debounce_secs: Option<f64>,
    debounce_start: Option<DebounceStart>,
    baseline_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<DetectorBackendKind>,
    model_path: Option<PathBuf>,
    min_confidence: Option<f32>,
    scripted: Option<ScriptedConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ScriptedConfigFile {
    #[serde(default)]
    optical: Vec<Detection>,
    #[serde(default)]
    thermal: Vec<Detection>,
}

#[derive(Debug, Deserialize, Default)]
struct RuntimeConfigFile {
    worker_idle_ms: Option<u64>,
    health_log_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PaddockConfig {
    pub streams: StreamSettings,
    pub output: OutputSettings,
    pub detection: DetectionSettings,
    pub detector: DetectorSettings,
    pub runtime: RuntimeSettings,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub optical_url: String,
    pub thermal_url: String,
    pub width: u32,
    pub height: u32,
    pub read_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub output_dir: PathBuf,
    pub baseline_dir: PathBuf,
    /// Append a `DD_MM_YY` directory to both roots.
    pub dated_subdirs: bool,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub frame_rate: f64,
    pub confidence_threshold: f32,
    pub categories: Vec<String>,
    pub annotation_threshold: f32,
    pub debounce_window: Duration,
    pub debounce_start: DebounceStart,
    pub baseline_period: Duration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackendKind {
    /// Never detects anything.
    #[default]
    Stub,
    /// Returns the configured detections for every frame.
    Scripted,
    /// YOLOv5 ONNX model (requires the backend-tract feature).
    Yolov5,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorBackendKind,
    pub model_path: Option<PathBuf>,
    /// Candidates below this score are discarded by the model backend.
    pub min_confidence: f32,
    pub scripted_optical: Vec<Detection>,
    pub scripted_thermal: Vec<Detection>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DetectorBackendKind::default(),
            model_path: None,
            min_confidence: DEFAULT_ANNOTATION_CONFIDENCE,
            scripted_optical: Vec::new(),
            scripted_thermal: Vec::new(),
        }
    }
}

impl DetectorSettings {
    pub fn scripted_for(&self, stream: StreamKind) -> &[Detection] {
        match stream {
            StreamKind::Optical => &self.scripted_optical,
            StreamKind::Thermal => &self.scripted_thermal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub worker_idle: Duration,
    pub health_log_interval: Duration,
}

impl PaddockConfig {
    /// Load from the file named by `PADDOCK_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PaddockConfigFile) -> Result<Self> {
        let streams = file.streams.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let runtime = file.runtime.unwrap_or_default();
        let scripted = detector.scripted.unwrap_or_default();

        Ok(Self {
            streams: StreamSettings {
                optical_url: streams
                    .optical_url
                    .unwrap_or_else(|| DEFAULT_OPTICAL_URL.to_string()),
                thermal_url: streams
                    .thermal_url
                    .unwrap_or_else(|| DEFAULT_THERMAL_URL.to_string()),
                width: streams.width.unwrap_or(DEFAULT_FRAME_WIDTH),
                height: streams.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
                read_timeout: Duration::from_millis(
                    streams.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
                ),
            },
            output: OutputSettings {
                output_dir: output
                    .output_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                baseline_dir: output
                    .baseline_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_BASELINE_DIR)),
                dated_subdirs: output.dated_subdirs.unwrap_or(true),
                jpeg_quality: output.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            detection: DetectionSettings {
                frame_rate: detection.frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE),
                categories: detection.categories.unwrap_or_else(|| {
                    DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
                }),
                annotation_threshold: detection
                    .annotation_threshold
                    .unwrap_or(DEFAULT_ANNOTATION_CONFIDENCE),
                debounce_window: seconds(
                    "debounce_secs",
                    detection.debounce_secs.unwrap_or(DEFAULT_DEBOUNCE_SECS),
                )?,
                debounce_start: detection.debounce_start.unwrap_or_default(),
                baseline_period: seconds(
                    "baseline_secs",
                    detection.baseline_secs.unwrap_or(DEFAULT_BASELINE_SECS),
                )?,
            },
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or_default(),
                model_path: detector.model_path,
                min_confidence: detector
                    .min_confidence
                    .unwrap_or(DEFAULT_ANNOTATION_CONFIDENCE),
                scripted_optical: scripted.optical,
                scripted_thermal: scripted.thermal,
            },
            runtime: RuntimeSettings {
                worker_idle: Duration::from_millis(
                    runtime.worker_idle_ms.unwrap_or(DEFAULT_WORKER_IDLE_MS),
                ),
                health_log_interval: Duration::from_secs(
                    runtime.health_log_secs.unwrap_or(DEFAULT_HEALTH_LOG_SECS),
                ),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("PADDOCK_OPTICAL_URL") {
            self.streams.optical_url = url;
        }
        if let Some(url) = non_empty_env("PADDOCK_THERMAL_URL") {
            self.streams.thermal_url = url;
        }
        if let Some(dir) = non_empty_env("PADDOCK_OUTPUT_DIR") {
            self.output.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_env("PADDOCK_BASELINE_DIR") {
            self.output.baseline_dir = PathBuf::from(dir);
        }
        if let Some(rate) = non_empty_env("PADDOCK_FRAME_RATE") {
            self.detection.frame_rate = rate
                .parse()
                .map_err(|_| anyhow!("PADDOCK_FRAME_RATE must be a number of frames per second"))?;
        }
        if let Some(confidence) = non_empty_env("PADDOCK_CONFIDENCE") {
            self.detection.confidence_threshold = confidence
                .parse()
                .map_err(|_| anyhow!("PADDOCK_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(categories) = std::env::var("PADDOCK_CATEGORIES") {
            let parsed = split_csv(&categories);
            if !parsed.is_empty() {
                self.detection.categories = parsed;
            }
        }
        if let Some(secs) = non_empty_env("PADDOCK_DEBOUNCE_SECS") {
            self.detection.debounce_window = parse_seconds("PADDOCK_DEBOUNCE_SECS", &secs)?;
        }
        if let Some(secs) = non_empty_env("PADDOCK_BASELINE_SECS") {
            self.detection.baseline_period = parse_seconds("PADDOCK_BASELINE_SECS", &secs)?;
        }
        Ok(())
    }

    /// Check ranges and normalise category labels to lower case.
    pub fn validate(&mut self) -> Result<()> {
        if self.streams.width == 0 || self.streams.height == 0 {
            return Err(anyhow!("frame size must be non-zero"));
        }
        if self.streams.width > MAX_FRAME_DIMENSION || self.streams.height > MAX_FRAME_DIMENSION {
            return Err(anyhow!(
                "frame size {}x{} exceeds {} pixels per side",
                self.streams.width,
                self.streams.height,
                MAX_FRAME_DIMENSION
            ));
        }
        for (name, url) in [
            ("optical", &self.streams.optical_url),
            ("thermal", &self.streams.thermal_url),
        ] {
            validate_stream_url(name, url)?;
        }
        frame_period(self.detection.frame_rate)?;
        for (name, value) in [
            ("confidence threshold", self.detection.confidence_threshold),
            ("annotation threshold", self.detection.annotation_threshold),
            ("detector min confidence", self.detector.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be between 0 and 1, got {}", name, value));
            }
        }

        let mut categories: Vec<String> = self
            .detection
            .categories
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        categories.dedup();
        if categories.is_empty() {
            return Err(anyhow!("at least one detection category is required"));
        }
        self.detection.categories = categories;

        if self.detection.debounce_window.is_zero() {
            return Err(anyhow!("debounce window must be greater than zero"));
        }
        if self.detection.baseline_period.is_zero() {
            return Err(anyhow!("baseline period must be greater than zero"));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be between 1 and 100"));
        }
        if self.detector.backend == DetectorBackendKind::Yolov5 && self.detector.model_path.is_none()
        {
            return Err(anyhow!("yolov5 detector requires a model path"));
        }
        Ok(())
    }

    /// Polling period for the configured frame rate. `validate` rejects
    /// rates with no usable period; those fall back to the default rate.
    pub fn tick_period(&self) -> Duration {
        frame_period(self.detection.frame_rate)
            .unwrap_or_else(|_| Duration::from_secs_f64(1.0 / DEFAULT_FRAME_RATE))
    }

    pub fn category_filter(&self) -> CategoryFilter {
        CategoryFilter::new(
            self.detection.confidence_threshold,
            self.detection.categories.iter().cloned(),
        )
    }

    pub fn rtsp_config(&self, stream: StreamKind) -> RtspConfig {
        let url = match stream {
            StreamKind::Optical => &self.streams.optical_url,
            StreamKind::Thermal => &self.streams.thermal_url,
        };
        RtspConfig {
            url: url.clone(),
            stream,
            width: self.streams.width,
            height: self.streams.height,
            read_timeout: self.streams.read_timeout,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            filter: self.category_filter(),
            baseline_period: self.detection.baseline_period,
            annotation_threshold: self.detection.annotation_threshold,
            idle_interval: self.runtime.worker_idle,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            tick_period: self.tick_period(),
            debounce_window: self.detection.debounce_window,
            debounce_start: self.detection.debounce_start,
            health_log_interval: self.runtime.health_log_interval,
            worker: self.worker_settings(),
        }
    }

    /// Output and baseline directories for a run that starts on `date`.
    pub fn evidence_layout(&self, date: NaiveDate) -> EvidenceLayout {
        if self.output.dated_subdirs {
            EvidenceLayout::dated(&self.output.output_dir, &self.output.baseline_dir, date)
        } else {
            EvidenceLayout::new(&self.output.output_dir, &self.output.baseline_dir)
        }
    }
}

fn read_config_file(path: &Path) -> Result<PaddockConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be a number of seconds", key))?;
    seconds(key, secs)
}

fn seconds(name: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(anyhow!("{} must be a positive number of seconds", name));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| anyhow!("{} is out of range ({} seconds): {}", name, secs, e))
}

fn frame_period(frame_rate: f64) -> Result<Duration> {
    if !(frame_rate.is_finite() && frame_rate > 0.0) {
        return Err(anyhow!("frame rate must be greater than zero"));
    }
    let period = Duration::try_from_secs_f64(1.0 / frame_rate)
        .map_err(|_| anyhow!("frame rate {} is too low", frame_rate))?;
    if period > MAX_TICK_PERIOD {
        return Err(anyhow!(
            "frame rate {} is too low: at least one frame per {}s is required",
            frame_rate,
            MAX_TICK_PERIOD.as_secs()
        ));
    }
    Ok(period)
}

// The url ends up as a decoder element property, so anything that is not a
// single well-formed URL is refused here.
fn validate_stream_url(name: &str, url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(anyhow!("{} stream url must be set", name));
    }
    if url.chars().any(|c| c.is_whitespace() || c.is_control() || c == '!') {
        return Err(anyhow!("{} stream url contains invalid characters: {:?}", name, url));
    }
    Url::parse(url).map_err(|e| anyhow!("invalid {} stream url {}: {}", name, url, e))?;
    Ok(())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_field_deployment() {
        let mut cfg = PaddockConfig::from_file(PaddockConfigFile::default()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.streams.optical_url, "stub://optical");
        assert_eq!(cfg.tick_period(), Duration::from_secs(1));
        assert_eq!(cfg.detection.debounce_window, Duration::from_secs(5));
        assert_eq!(cfg.detection.baseline_period, Duration::from_secs(30));
        assert_eq!(cfg.detection.debounce_start, DebounceStart::Seed);
        assert_eq!(
            cfg.detection.categories,
            vec!["sheep", "horse", "cow", "dog", "person"]
        );
        assert_eq!(cfg.detector.backend, DetectorBackendKind::Stub);
    }

    #[test]
    fn dated_layout_can_be_disabled() {
        let mut cfg = PaddockConfig::from_file(PaddockConfigFile::default()).unwrap();
        let date = NaiveDate::from_ymd_opt(2023, 11, 14).unwrap();
        assert_eq!(
            cfg.evidence_layout(date).output_dir(),
            Path::new("output/14_11_23")
        );
        cfg.output.dated_subdirs = false;
        assert_eq!(cfg.evidence_layout(date).baseline_dir(), Path::new("baseline"));
    }

    #[test]
    fn validate_normalises_categories() {
        let mut cfg = PaddockConfig::from_file(PaddockConfigFile::default()).unwrap();
        cfg.detection.categories = vec![" Horse".into(), "".into(), "DOG ".into()];
        cfg.validate().unwrap();
        assert_eq!(cfg.detection.categories, vec!["horse", "dog"]);
        let filter = cfg.category_filter();
        assert_eq!(filter.categories().collect::<Vec<_>>(), vec!["dog", "horse"]);
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let base = || PaddockConfig::from_file(PaddockConfigFile::default()).unwrap();

        let mut cfg = base();
        cfg.detection.frame_rate = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.detection.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.detection.categories = vec![" ".into()];
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.detector.backend = DetectorBackendKind::Yolov5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_durations_are_errors() {
        assert!(parse_seconds("PADDOCK_DEBOUNCE_SECS", "1e30").is_err());
        let file = PaddockConfigFile {
            detection: Some(DetectionConfigFile {
                baseline_secs: Some(1e30),
                ..DetectionConfigFile::default()
            }),
            ..PaddockConfigFile::default()
        };
        assert!(PaddockConfig::from_file(file).is_err());
    }

    #[test]
    fn frame_rate_without_usable_period_is_rejected() {
        let base = || PaddockConfig::from_file(PaddockConfigFile::default()).unwrap();
        for rate in [1e-320, 1e-9, f64::INFINITY, f64::NAN] {
            let mut cfg = base();
            cfg.detection.frame_rate = rate;
            assert!(cfg.validate().is_err(), "rate {} accepted", rate);
            assert_eq!(cfg.tick_period(), Duration::from_secs(1));
        }
        let mut cfg = base();
        cfg.detection.frame_rate = 0.5;
        cfg.validate().unwrap();
        assert_eq!(cfg.tick_period(), Duration::from_secs(2));
    }

    #[test]
    fn detector_min_confidence_is_read_and_checked() {
        let file: PaddockConfigFile =
            serde_json::from_str(r#"{"detector": {"min_confidence": 0.35}}"#).unwrap();
        let mut cfg = PaddockConfig::from_file(file).unwrap();
        assert_eq!(cfg.detector.min_confidence, 0.35);
        cfg.validate().unwrap();

        let mut cfg = PaddockConfig::from_file(PaddockConfigFile::default()).unwrap();
        assert_eq!(cfg.detector.min_confidence, 0.2);
        cfg.detector.min_confidence = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut cfg = PaddockConfig::from_file(PaddockConfigFile::default()).unwrap();
        cfg.streams.width = 100_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn stream_urls_must_be_single_urls() {
        let base = || PaddockConfig::from_file(PaddockConfigFile::default()).unwrap();
        for url in [
            "rtsp://10.0.0.64/ch1 ! fakesink",
            "rtsp://10.0.0.64/ch1!",
            "rtsp://10.0.0.64/a b",
            "not a url",
            " ",
        ] {
            let mut cfg = base();
            cfg.streams.optical_url = url.to_string();
            assert!(cfg.validate().is_err(), "url {:?} accepted", url);
        }
        let mut cfg = base();
        cfg.streams.thermal_url = "rtsp://admin:pw@10.0.0.64/Streaming/Channels/201".to_string();
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_seconds_is_rejected() {
        assert!(parse_seconds("X", "0").is_err());
        assert!(parse_seconds("X", "-1").is_err());
        assert!(parse_seconds("X", "soon").is_err());
        assert_eq!(parse_seconds("X", " 2.5 ").unwrap(), Duration::from_millis(2500));
    }
}
