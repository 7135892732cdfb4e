//! Capture loop: reads frames and assembles them into windowed batches.
//!
//! While the stream is active, frames accumulate in the in-progress batch (up to
//! `buffer_limit`; extra frames are dropped). The first frame read after the stream
//! goes inactive seals the batch and pushes it into the window buffer. Frames read
//! while inactive with nothing in progress are discarded immediately.

use std::sync::Arc;
use std::time::Duration;

use crate::frame::{Frame, FrameBatch, RawImage};
use crate::ingest::{CaptureDevice, CaptureFactory};
use crate::stream::{StreamCounters, StreamIdentity, StreamShared};

/// Slots reserved up front for a new batch; larger windows grow on demand.
const BATCH_CAPACITY_HINT: usize = 64;

/// What happened to a frame handed to `BatchAssembler::observe`.
#[derive(Debug)]
pub enum Observation {
    /// Appended to the in-progress batch.
    Appended,
    /// Active, but the batch already held `buffer_limit` frames.
    Dropped,
    /// Inactive with no batch in progress.
    Discarded,
    /// Inactive: the in-progress batch is sealed and returned. The frame itself is discarded.
    Flushed(FrameBatch),
}

/// Batching rules of the capture loop, without any I/O.
#[derive(Debug)]
pub struct BatchAssembler {
    limit: usize,
    current: FrameBatch,
}

impl BatchAssembler {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            current: FrameBatch::with_capacity(limit.min(BATCH_CAPACITY_HINT)),
        }
    }

    pub fn observe(&mut self, frame: Frame, active: bool) -> Observation {
        if active {
            return match self.current.try_push(frame, self.limit) {
                Ok(()) => Observation::Appended,
                Err(_dropped) => Observation::Dropped,
            };
        }
        drop(frame);
        if self.current.is_empty() {
            Observation::Discarded
        } else {
            let fresh = FrameBatch::with_capacity(self.limit.min(BATCH_CAPACITY_HINT));
            let sealed = std::mem::replace(&mut self.current, fresh);
            Observation::Flushed(sealed)
        }
    }

    /// Frames in the batch under construction.
    pub fn in_progress(&self) -> usize {
        self.current.len()
    }

    /// Release the in-progress batch without flushing it. Returns the frame count.
    pub fn abandon(self) -> usize {
        self.current.release()
    }
}

/// Producer half of a stream: owns the capture handle and the batch under construction.
pub struct StreamSource {
    identity: StreamIdentity,
    factory: Arc<dyn CaptureFactory>,
    shared: Arc<StreamShared>,
    buffer_limit: usize,
    retry_pause: Duration,
}

impl StreamSource {
    pub fn new(
        identity: StreamIdentity,
        factory: Arc<dyn CaptureFactory>,
        shared: Arc<StreamShared>,
        buffer_limit: usize,
        retry_pause: Duration,
    ) -> Self {
        Self {
            identity,
            factory,
            shared,
            buffer_limit,
            retry_pause,
        }
    }

    /// Run until the running flag clears. Read failures never end the loop.
    pub fn run(self) {
        let name = &self.identity.name;
        let counters = &self.shared.counters;
        let mut assembler = BatchAssembler::new(self.buffer_limit);
        let mut device: Option<Box<dyn CaptureDevice>> = None;

        log::info!("{}: capture loop started for {}", name, self.identity.source_uri);

        while self.shared.is_running() {
            if device.is_none() {
                match self.factory.open(&self.identity.source_uri) {
                    Ok(opened) => {
                        log::info!("{}: opened capture {}", name, self.identity.source_uri);
                        device = Some(opened);
                    }
                    Err(e) => {
                        log::error!("{}: failed to open capture: {:#}", name, e);
                        StreamCounters::bump(&counters.read_failures);
                        std::thread::sleep(self.retry_pause);
                        continue;
                    }
                }
            }
            let Some(handle) = device.as_mut() else {
                continue;
            };

            match handle.read() {
                Ok(Some(image)) if !image.is_empty() => {
                    StreamCounters::bump(&counters.frames_captured);
                    self.accept(&mut assembler, image);
                }
                Ok(_) => {
                    log::warn!("{}: empty frame, reopening capture", name);
                    self.release_device(&mut device);
                }
                Err(e) => {
                    log::warn!("{}: capture read failed: {:#}", name, e);
                    self.release_device(&mut device);
                }
            }
        }

        drop(device);
        let abandoned = assembler.abandon();
        StreamCounters::add(&counters.frames_released, abandoned as u64);
        log::info!(
            "{}: capture loop stopped ({} in-progress frames released)",
            name,
            abandoned
        );
    }

    fn accept(&self, assembler: &mut BatchAssembler, image: RawImage) {
        let counters = &self.shared.counters;
        let frame = Frame::new(crate::frame_label(&self.identity.name), image);
        match assembler.observe(frame, self.shared.is_active()) {
            Observation::Appended => StreamCounters::bump(&counters.frames_buffered),
            Observation::Dropped => StreamCounters::bump(&counters.frames_dropped),
            Observation::Discarded => StreamCounters::bump(&counters.frames_discarded),
            Observation::Flushed(batch) => {
                StreamCounters::bump(&counters.frames_discarded);
                log::info!(
                    "{}: window closed, queued batch of {} frames",
                    self.identity.name,
                    batch.len()
                );
                StreamCounters::bump(&counters.batches_flushed);
                if let Some(evicted) = self.shared.buffer.push(batch) {
                    let released = evicted.release();
                    log::warn!(
                        "{}: window buffer full, evicted oldest batch ({} frames)",
                        self.identity.name,
                        released
                    );
                    StreamCounters::bump(&counters.batches_evicted);
                    StreamCounters::add(&counters.frames_released, released as u64);
                }
            }
        }
    }

    fn release_device(&self, device: &mut Option<Box<dyn CaptureDevice>>) {
        StreamCounters::bump(&self.shared.counters.read_failures);
        *device = None;
        std::thread::sleep(self.retry_pause);
    }
}
