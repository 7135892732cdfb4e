//! Per-stream identity, settings and the state shared by its two loops.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::window::{QueuePolicy, WindowBuffer};

pub const DEFAULT_BUFFER_LIMIT: usize = 30;
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(1);
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(100);

/// Stream name (also its control topic) and source URI. Fixed for a controller's lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StreamIdentity {
    pub name: String,
    pub source_uri: String,
}

impl StreamIdentity {
    pub fn new(name: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_uri: source_uri.into(),
        }
    }

    /// Name with `/` replaced, usable as a storage path segment.
    pub fn sanitized_name(&self) -> String {
        crate::sanitize_stream_name(&self.name)
    }
}

impl std::fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Knobs shared by every stream of a manager.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Maximum frames per batch.
    pub buffer_limit: usize,
    /// Pause after a failed or empty read before reopening the source.
    pub retry_pause: Duration,
    /// Consumer sleep when the window buffer is empty.
    pub idle_poll: Duration,
    pub queue_policy: QueuePolicy,
    pub jpeg_quality: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            retry_pause: DEFAULT_RETRY_PAUSE,
            idle_poll: DEFAULT_IDLE_POLL,
            queue_policy: QueuePolicy::Unbounded,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// State read and written by the capture loop, the processor loop and the controller.
///
/// The active flag and the window buffer are synchronized independently: toggling
/// the flag never waits on a batch transfer.
#[derive(Debug)]
pub struct StreamShared {
    running: AtomicBool,
    active: AtomicBool,
    pub buffer: WindowBuffer,
    pub counters: StreamCounters,
}

impl StreamShared {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            running: AtomicBool::new(false),
            active: AtomicBool::new(false),
            buffer: WindowBuffer::with_policy(policy),
            counters: StreamCounters::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

/// Monotonic per-stream counters.
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub frames_captured: AtomicU64,
    pub frames_buffered: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_discarded: AtomicU64,
    pub frames_released: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub batches_processed: AtomicU64,
    pub batches_evicted: AtomicU64,
    pub read_failures: AtomicU64,
    pub detections: AtomicU64,
    pub collaborator_failures: AtomicU64,
}

impl StreamCounters {
    pub(crate) fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    pub fn snapshot(&self) -> StreamStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StreamStats {
            frames_captured: get(&self.frames_captured),
            frames_buffered: get(&self.frames_buffered),
            frames_dropped: get(&self.frames_dropped),
            frames_discarded: get(&self.frames_discarded),
            frames_released: get(&self.frames_released),
            batches_flushed: get(&self.batches_flushed),
            batches_processed: get(&self.batches_processed),
            batches_evicted: get(&self.batches_evicted),
            read_failures: get(&self.read_failures),
            detections: get(&self.detections),
            collaborator_failures: get(&self.collaborator_failures),
        }
    }
}

/// Point-in-time copy of `StreamCounters`.
///
/// `frames_buffered` counts frames that entered a batch; each of them is counted
/// once in `frames_released` when its batch is evaluated, evicted, drained or abandoned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_captured: u64,
    pub frames_buffered: u64,
    pub frames_dropped: u64,
    pub frames_discarded: u64,
    pub frames_released: u64,
    pub batches_flushed: u64,
    pub batches_processed: u64,
    pub batches_evicted: u64,
    pub read_failures: u64,
    pub detections: u64,
    pub collaborator_failures: u64,
}

impl StreamStats {
    /// Frames still owned by an in-progress batch or the window buffer.
    pub fn frames_in_flight(&self) -> u64 {
        self.frames_buffered.saturating_sub(self.frames_released)
    }
}
