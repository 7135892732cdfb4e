//! Frame capture sources.
//!
//! - RTSP streams (IP cameras, feature: rtsp-gstreamer)
//! - HTTP MJPEG streams and JPEG snapshot endpoints
//! - `stub://` synthetic source (demos and tests)
//!
//! The capture loop only sees the `CaptureDevice` / `CaptureFactory` traits. A device
//! is opened per source URI, read until it fails or returns an empty frame, then
//! dropped and reopened.

pub mod mjpeg;
pub mod rtsp;
pub mod synthetic;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::frame::RawImage;

pub use mjpeg::HttpCamera;
pub use rtsp::RtspSource;
pub use synthetic::SyntheticSource;

/// An open capture handle.
pub trait CaptureDevice: Send {
    /// Read the next frame. `Ok(None)` reports an empty frame.
    fn read(&mut self) -> Result<Option<RawImage>>;
}

/// Opens capture handles for source URIs.
pub trait CaptureFactory: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn CaptureDevice>>;
}

/// Picks a source implementation from the URI scheme.
#[derive(Clone, Debug)]
pub struct UriCaptureFactory {
    /// Frame pacing for sources that do not pace themselves.
    pub target_fps: u32,
    /// Dimensions of `stub://` frames.
    pub stub_width: u32,
    pub stub_height: u32,
}

impl Default for UriCaptureFactory {
    fn default() -> Self {
        Self {
            target_fps: 10,
            stub_width: 640,
            stub_height: 480,
        }
    }
}

impl CaptureFactory for UriCaptureFactory {
    fn open(&self, uri: &str) -> Result<Box<dyn CaptureDevice>> {
        let parsed = Url::parse(uri).with_context(|| format!("parse source uri {}", uri))?;
        match parsed.scheme() {
            "stub" => Ok(Box::new(SyntheticSource::new(
                uri,
                self.stub_width,
                self.stub_height,
                self.target_fps,
            ))),
            "rtsp" | "rtsps" => Ok(Box::new(RtspSource::open(uri, self.target_fps)?)),
            "http" | "https" => Ok(Box::new(HttpCamera::open(uri, self.target_fps)?)),
            other => Err(anyhow!("unsupported source scheme '{}' in {}", other, uri)),
        }
    }
}
