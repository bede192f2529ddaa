//! Frame ingestion sources.
//!
//! This module provides the `StreamSource` contract and its implementations:
//! - RTSP streams (IP cameras, feature: rtsp-gstreamer)
//! - Synthetic `stub://` streams (testing and demos)
//!
//! A source owns one live connection. It can be closed and reopened any
//! number of times; reopening must release whatever the previous connection
//! held. Sources have no retry policy of their own: the acquisition loop
//! decides when to reconnect.

pub mod rtsp;

pub use rtsp::{RtspConfig, RtspSource};

use crate::error::PipelineResult;
use crate::frame::{Frame, StreamKind};

/// A reopenable connection to one camera.
pub trait StreamSource: Send {
    /// Which stream this source feeds.
    fn stream(&self) -> StreamKind;

    /// Connection target, for logging.
    fn target(&self) -> &str;

    /// Establish the connection. Fails with `ConnectFailed`.
    fn open(&mut self) -> PipelineResult<()>;

    /// Read the next frame. Fails with `ReadFailed`, including when the
    /// source is not open. May block up to the source's I/O timeout.
    fn read(&mut self) -> PipelineResult<Frame>;

    /// Tear the connection down. Closing a closed source is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}
