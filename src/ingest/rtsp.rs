//! Camera connection over RTSP.
//!
//! `RtspSource` decodes an IP camera stream (optical or thermal channel) to
//! packed RGB frames stamped with their capture time. `close` tears down the
//! whole decode pipeline, so a reconnect starts from nothing.
//!
//! `stub://<name>` URLs select a synthetic backend. Two query parameters let
//! tests and demos exercise the recovery paths:
//! - `fail_every=N`: every Nth read fails
//! - `refuse_connect=N`: the first N opens fail

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
#[cfg(feature = "rtsp-gstreamer")]
use gstreamer::prelude::*;
use std::time::Duration;

use url::Url;

use crate::error::{PipelineError, PipelineResult};
use crate::frame::{Frame, StreamKind};
use crate::ingest::StreamSource;

/// Where and how one camera is reached.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// RTSP URL (e.g., "rtsp://192.168.1.64/Streaming/Channels/101")
    pub url: String,
    /// Which camera this URL feeds.
    pub stream: StreamKind,
    /// Frame width (for synthetic frames).
    pub width: u32,
    /// Frame height (for synthetic frames).
    pub height: u32,
    /// Upper bound on how long a single read may block.
    pub read_timeout: Duration,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "stub://optical".to_string(),
            stream: StreamKind::Optical,
            width: 640,
            height: 480,
            read_timeout: Duration::from_secs(2),
        }
    }
}

/// One camera stream. GStreamer handles `rtsp://` targets; `stub://`
/// targets get deterministic synthetic frames.
pub struct RtspSource {
    config: RtspConfig,
    backend: RtspBackend,
    stats: RtspStats,
}

enum RtspBackend {
    Synthetic(SyntheticRtspSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspSource),
}

/// Connection and capture counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RtspStats {
    pub opens: u64,
    pub closes: u64,
    pub frames_captured: u64,
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> anyhow::Result<Self> {
        let backend = if config.url.starts_with("stub://") {
            RtspBackend::Synthetic(SyntheticRtspSource::new(&config)?)
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                RtspBackend::Gstreamer(GstreamerRtspSource::new()?)
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!(
                    "{} stream {} requires the rtsp-gstreamer feature",
                    config.stream,
                    config.url
                )
            }
        };
        Ok(Self {
            config,
            backend,
            stats: RtspStats::default(),
        })
    }

    pub fn stats(&self) -> RtspStats {
        self.stats.clone()
    }

    fn read_failed(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::ReadFailed {
            stream: self.config.stream,
            reason: reason.into(),
        }
    }
}

impl StreamSource for RtspSource {
    fn stream(&self) -> StreamKind {
        self.config.stream
    }

    fn target(&self) -> &str {
        &self.config.url
    }

    fn open(&mut self) -> PipelineResult<()> {
        let result = match &mut self.backend {
            RtspBackend::Synthetic(source) => source.open(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.open(&self.config).map_err(|e| e.to_string()),
        };
        match result {
            Ok(()) => {
                self.stats.opens += 1;
                log::info!("RtspSource: {} connected to {}", self.config.stream, self.config.url);
                Ok(())
            }
            Err(reason) => Err(PipelineError::ConnectFailed {
                stream: self.config.stream,
                target: self.config.url.clone(),
                reason,
            }),
        }
    }

    fn read(&mut self) -> PipelineResult<Frame> {
        let result = match &mut self.backend {
            RtspBackend::Synthetic(source) => source.read(&self.config),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => {
                source.read(&self.config).map_err(|e| format!("{:#}", e))
            }
        };
        match result {
            Ok(frame) => {
                self.stats.frames_captured += 1;
                Ok(frame)
            }
            Err(reason) => Err(self.read_failed(reason)),
        }
    }

    fn close(&mut self) {
        let was_open = self.is_open();
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.close(),
        }
        if was_open {
            self.stats.closes += 1;
            log::info!("RtspSource: {} disconnected from {}", self.config.stream, self.config.url);
        }
    }

    fn is_open(&self) -> bool {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.connected,
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.pipeline.is_some(),
        }
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------------
// Synthetic stub:// camera
// ----------------------------------------------------------------------------

struct SyntheticRtspSource {
    frame_len: usize,
    connected: bool,
    reads: u64,
    fail_every: u64,
    refusals_left: u64,
}

impl SyntheticRtspSource {
    fn new(config: &RtspConfig) -> anyhow::Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| anyhow::anyhow!("invalid stub url {}: {}", config.url, e))?;
        let frame_len = (config.width as usize)
            .checked_mul(config.height as usize)
            .and_then(|n| n.checked_mul(3))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "synthetic frame size {}x{} is too large",
                    config.width,
                    config.height
                )
            })?;
        let mut fail_every = 0;
        let mut refusals_left = 0;
        for (key, value) in url.query_pairs() {
            let parsed: u64 = value
                .parse()
                .map_err(|_| anyhow::anyhow!("stub url parameter {} must be an integer", key))?;
            match key.as_ref() {
                "fail_every" => fail_every = parsed,
                "refuse_connect" => refusals_left = parsed,
                other => anyhow::bail!("unknown stub url parameter '{}'", other),
            }
        }
        Ok(Self {
            frame_len,
            connected: false,
            reads: 0,
            fail_every,
            refusals_left,
        })
    }

    /// Synthetic sources connect instantly unless told to refuse.
    fn open(&mut self) -> Result<(), String> {
        if self.refusals_left > 0 {
            self.refusals_left -= 1;
            return Err("connection refused (synthetic)".to_string());
        }
        self.connected = true;
        Ok(())
    }

    fn read(&mut self, config: &RtspConfig) -> Result<Frame, String> {
        if !self.connected {
            return Err("not connected".to_string());
        }
        self.reads += 1;
        if self.fail_every > 0 && self.reads % self.fail_every == 0 {
            return Err("synthetic read failure".to_string());
        }
        let pixels = self.generate_synthetic_pixels();
        Frame::new(config.stream, config.width, config.height, pixels)
            .ok_or_else(|| "synthetic frame size mismatch".to_string())
    }

    /// Moving gradient so consecutive frames differ.
    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let mut pixels = vec![0u8; self.frame_len];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.reads) % 256) as u8;
        }
        pixels
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

// ----------------------------------------------------------------------------
// GStreamer camera
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    pipeline: Option<(gstreamer::Pipeline, gstreamer_app::AppSink)>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    fn new() -> anyhow::Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self { pipeline: None })
    }

    /// Build and start: rtspsrc ! decodebin ! videoconvert ! appsink (RGB).
    ///
    /// The pipeline is rebuilt on every open so a reconnect never reuses a
    /// wedged element.
    fn open(&mut self, config: &RtspConfig) -> anyhow::Result<()> {
        self.close();

        // The url is set as a property, never spliced into the description.
        let pipeline = gstreamer::parse::launch(
            "rtspsrc name=src latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
        )
        .context("build RTSP pipeline")?
        .downcast::<gstreamer::Pipeline>()
        .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        pipeline
            .by_name("src")
            .context("rtspsrc element missing from pipeline")?
            .set_property("location", config.url.as_str());

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        if let Err(err) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(err).context("set RTSP pipeline to Playing");
        }
        self.pipeline = Some((pipeline, appsink));
        Ok(())
    }

    fn read(&mut self, config: &RtspConfig) -> anyhow::Result<Frame> {
        let Some((pipeline, appsink)) = self.pipeline.as_ref() else {
            anyhow::bail!("not connected");
        };
        poll_bus(pipeline)?;

        let timeout = gstreamer::ClockTime::from_mseconds(config.read_timeout.as_millis() as u64);
        let sample = appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| anyhow::anyhow!("RTSP stream stalled"))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        Frame::new(config.stream, width, height, pixels)
            .ok_or_else(|| anyhow::anyhow!("decoded RTSP frame has inconsistent size"))
    }

    fn close(&mut self) {
        if let Some((pipeline, _appsink)) = self.pipeline.take() {
            if let Err(err) = pipeline.set_state(gstreamer::State::Null) {
                log::warn!("RtspSource: failed to stop pipeline: {}", err);
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn poll_bus(pipeline: &gstreamer::Pipeline) -> anyhow::Result<()> {
    let Some(bus) = pipeline.bus() else {
        return Ok(());
    };
    while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
        use gstreamer::MessageView;
        match message.view() {
            MessageView::Error(err) => {
                anyhow::bail!(
                    "gstreamer error from {:?}: {}",
                    err.src().map(|s| s.path_string()),
                    err.error()
                );
            }
            MessageView::Eos(..) => anyhow::bail!("gstreamer reached EOS"),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> anyhow::Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("RTSP buffer is shorter than its caps")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
