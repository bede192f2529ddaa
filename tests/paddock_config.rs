use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use paddock_watch::config::PaddockConfig;
use paddock_watch::{DebounceStart, DetectorBackendKind, StreamKind};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PADDOCK_CONFIG",
        "PADDOCK_OPTICAL_URL",
        "PADDOCK_THERMAL_URL",
        "PADDOCK_OUTPUT_DIR",
        "PADDOCK_BASELINE_DIR",
        "PADDOCK_FRAME_RATE",
        "PADDOCK_CONFIDENCE",
        "PADDOCK_CATEGORIES",
        "PADDOCK_DEBOUNCE_SECS",
        "PADDOCK_BASELINE_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "streams": {
            "optical_url": "rtsp://10.0.0.64/Streaming/Channels/101",
            "thermal_url": "rtsp://10.0.0.64/Streaming/Channels/201",
            "width": 1280,
            "height": 720
        },
        "output": {
            "output_dir": "/srv/paddock/output",
            "baseline_dir": "/srv/paddock/baseline",
            "dated_subdirs": false
        },
        "detection": {
            "frame_rate": 2.0,
            "confidence_threshold": 0.6,
            "categories": ["horse", "person"],
            "debounce_secs": 10,
            "debounce_start": "open"
        },
        "detector": {
            "backend": "scripted",
            "scripted": {
                "optical": [
                    {"label": "horse", "confidence": 0.9,
                     "bbox": {"x": 0.1, "y": 0.2, "w": 0.3, "h": 0.4}}
                ]
            }
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("PADDOCK_CONFIG", file.path());
    std::env::set_var("PADDOCK_THERMAL_URL", "stub://thermal");
    std::env::set_var("PADDOCK_CATEGORIES", "Sheep, cow ,");
    std::env::set_var("PADDOCK_BASELINE_SECS", "60");

    let cfg = PaddockConfig::load().expect("load config");

    assert_eq!(cfg.streams.optical_url, "rtsp://10.0.0.64/Streaming/Channels/101");
    assert_eq!(cfg.streams.thermal_url, "stub://thermal");
    assert_eq!(cfg.rtsp_config(StreamKind::Optical).width, 1280);
    assert_eq!(cfg.output.output_dir, PathBuf::from("/srv/paddock/output"));
    assert!(!cfg.output.dated_subdirs);
    assert_eq!(cfg.tick_period(), Duration::from_millis(500));
    assert_eq!(cfg.detection.confidence_threshold, 0.6);
    assert_eq!(cfg.detection.categories, vec!["sheep", "cow"]);
    assert_eq!(cfg.detection.debounce_window, Duration::from_secs(10));
    assert_eq!(cfg.detection.debounce_start, DebounceStart::Open);
    assert_eq!(cfg.detection.baseline_period, Duration::from_secs(60));
    assert_eq!(cfg.detector.backend, DetectorBackendKind::Scripted);
    assert_eq!(cfg.detector.scripted_for(StreamKind::Optical).len(), 1);
    assert!(cfg.detector.scripted_for(StreamKind::Thermal).is_empty());

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[streams]
optical_url = "stub://front"

[detection]
confidence_threshold = 0.75
baseline_secs = 45

[runtime]
worker_idle_ms = 20
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = PaddockConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.streams.optical_url, "stub://front");
    assert_eq!(cfg.streams.thermal_url, "stub://thermal");
    assert_eq!(cfg.detection.confidence_threshold, 0.75);
    assert_eq!(cfg.detection.baseline_period, Duration::from_secs(45));
    assert_eq!(cfg.worker_settings().idle_interval, Duration::from_millis(20));

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PaddockConfig::load().expect("load defaults");
    assert_eq!(cfg.streams.optical_url, "stub://optical");
    assert_eq!(cfg.output.output_dir, PathBuf::from("output"));
    assert_eq!(cfg.output.baseline_dir, PathBuf::from("baseline"));
    assert!(cfg.output.dated_subdirs);
    assert_eq!(cfg.detection.confidence_threshold, 0.5);
    assert_eq!(cfg.detection.annotation_threshold, 0.2);

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PADDOCK_DEBOUNCE_SECS", "five");
    assert!(PaddockConfig::load().is_err());
    clear_env();

    std::env::set_var("PADDOCK_CONFIDENCE", "1.2");
    assert!(PaddockConfig::load().is_err());
    clear_env();

    std::env::set_var("PADDOCK_FRAME_RATE", "0");
    assert!(PaddockConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_out_of_range_durations_instead_of_panicking() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PADDOCK_DEBOUNCE_SECS", "1e30");
    let err = PaddockConfig::load().unwrap_err();
    assert!(err.to_string().contains("PADDOCK_DEBOUNCE_SECS"));
    clear_env();

    std::env::set_var("PADDOCK_BASELINE_SECS", "1e30");
    assert!(PaddockConfig::load().is_err());
    clear_env();

    std::env::set_var("PADDOCK_FRAME_RATE", "1e-320");
    let err = PaddockConfig::load().unwrap_err();
    assert!(err.to_string().contains("frame rate"));
    clear_env();
}

#[test]
fn rejects_stream_url_with_pipeline_syntax() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PADDOCK_OPTICAL_URL", "rtsp://cam/x ! fakesink");
    assert!(PaddockConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_unreadable_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(b"{ not json").expect("write config");
    std::env::set_var("PADDOCK_CONFIG", file.path());
    let err = PaddockConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
