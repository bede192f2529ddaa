//! paddockd - dual-stream paddock monitoring daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by --config / PADDOCK_CONFIG, then env)
//! 2. Connects the optical and thermal streams
//! 3. Runs one detection worker per stream
//! 4. Writes evidence images, baseline frames and metadata.csv
//! 5. Stops cleanly on Ctrl-C or on a fatal storage error

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use paddock_watch::{DetectorBackendKind, PaddockConfig, Pipeline, Shutdown};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON (or .toml) configuration file.
    #[arg(long, env = "PADDOCK_CONFIG")]
    config: Option<PathBuf>,
    /// Detector backend; overrides the configuration file.
    #[arg(long, value_enum)]
    detector: Option<DetectorBackendKind>,
    /// ONNX model for the yolov5 backend.
    #[arg(long)]
    model: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PaddockConfig::load_from(args.config.as_deref())?;
    if let Some(backend) = args.detector {
        config.detector.backend = backend;
    }
    if let Some(model) = args.model {
        config.detector.model_path = Some(model);
    }
    config.validate()?;

    log::info!(
        "paddockd {} starting: optical={} thermal={} rate={}Hz",
        env!("CARGO_PKG_VERSION"),
        config.streams.optical_url,
        config.streams.thermal_url,
        config.detection.frame_rate
    );

    let pipeline = Pipeline::from_config(&config)?;
    log::info!(
        "writing detections to {} and baselines to {}",
        pipeline.layout().output_dir().display(),
        pipeline.layout().baseline_dir().display()
    );

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received, stopping pipeline...");
            shutdown.trigger();
        })
        .context("error setting Ctrl-C handler")?;
    }

    let handle = pipeline.spawn(shutdown)?;
    log::info!("paddockd running; waiting for shutdown signal (Ctrl-C)...");
    handle.join()
}
