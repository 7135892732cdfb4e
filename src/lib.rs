//! stream-watch
//!
//! Watches live camera streams for people, one capture window at a time.
//!
//! # Architecture
//!
//! Every stream runs two threads joined by a window buffer:
//!
//! 1. **Capture**: reads frames. While the stream is active they are collected into a
//!    batch of at most `buffer_limit` frames; when it goes inactive the batch is sealed
//!    and queued.
//! 2. **Processing**: pops sealed batches in order, scores a handful of candidate
//!    frames with the detector and, when a person is found, stores the best frame and
//!    sends a notification that points at it.
//!
//! Streams are switched on and off through MQTT, one topic per stream.
//!
//! # Module Structure
//!
//! - `frame`, `window`, `stream`: frames, batches, the buffer and per-stream state
//! - `ingest`: capture sources (RTSP, HTTP MJPEG, synthetic)
//! - `capture`, `processor`: the two per-stream loops
//! - `controller`, `manager`: stream lifecycle and command routing
//! - `detect`, `publish`, `services`: detector, object store and notifier
//! - `control`, `transport`: MQTT control ingress and connection setup
//! - `config`: configuration loading

use chrono::Local;

pub mod capture;
pub mod config;
pub mod control;
pub mod controller;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod manager;
pub mod processor;
pub mod publish;
pub mod services;
pub mod stream;
pub mod transport;
pub mod window;

pub use config::WatchConfig;
pub use controller::{ControllerState, StreamController};
pub use detect::{person_confidence, Classifier, LabelScore, MatchRule};
pub use frame::{Frame, FrameBatch, RawImage};
pub use ingest::{CaptureDevice, CaptureFactory, UriCaptureFactory};
pub use manager::{StopReport, StreamCommand, StreamManager};
pub use processor::{candidate_positions, BatchOutcome, BatchProcessor};
pub use publish::{Notification, Notifier, ObjectStore, StoreRequest};
pub use services::Services;
pub use stream::{PipelineSettings, StreamIdentity, StreamStats};
pub use window::{QueuePolicy, WindowBuffer};

/// Local wall-clock format used in frame labels and storage keys.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Current local time as `yyyy-MM-dd_HH:mm:ss`.
pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// `{stream}_{timestamp}` label attached to each captured frame.
pub fn frame_label(stream: &str) -> String {
    format!("{}_{}", stream, timestamp_now())
}

/// Stream names may be MQTT topic paths; `/` is replaced so the name is a single
/// storage path segment.
pub fn sanitize_stream_name(name: &str) -> String {
    name.replace('/', "_")
}
