//! One stream's lifecycle: a capture thread, a processor thread and the flags
//! between them.
//!
//! `Created -> Running -> Stopped`. Stopped is terminal: a controller is never restarted.

use anyhow::{anyhow, Context, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::capture::StreamSource;
use crate::ingest::CaptureFactory;
use crate::processor::BatchProcessor;
use crate::services::Services;
use crate::stream::{PipelineSettings, StreamCounters, StreamIdentity, StreamShared, StreamStats};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Created,
    Running,
    Stopped,
}

struct Lifecycle {
    state: ControllerState,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
}

pub struct StreamController {
    identity: StreamIdentity,
    settings: PipelineSettings,
    factory: Arc<dyn CaptureFactory>,
    services: Services,
    shared: Arc<StreamShared>,
    lifecycle: Mutex<Lifecycle>,
}

impl StreamController {
    pub fn new(
        identity: StreamIdentity,
        settings: PipelineSettings,
        factory: Arc<dyn CaptureFactory>,
        services: Services,
    ) -> Self {
        let shared = Arc::new(StreamShared::new(settings.queue_policy));
        Self {
            identity,
            settings,
            factory,
            services,
            shared,
            lifecycle: Mutex::new(Lifecycle {
                state: ControllerState::Created,
                producer: None,
                consumer: None,
            }),
        }
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    pub fn state(&self) -> ControllerState {
        self.lifecycle().state
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.counters.snapshot()
    }

    /// Batches waiting for the processor.
    pub fn queued_batches(&self) -> usize {
        self.shared.buffer.len()
    }

    /// Launch the capture and processor threads. Starting a running controller is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        match lifecycle.state {
            ControllerState::Running => return Ok(()),
            ControllerState::Stopped => {
                return Err(anyhow!(
                    "stream {} was stopped and cannot be restarted",
                    self.identity
                ))
            }
            ControllerState::Created => {}
        }

        self.shared.set_running(true);
        let source = StreamSource::new(
            self.identity.clone(),
            self.factory.clone(),
            self.shared.clone(),
            self.settings.buffer_limit,
            self.settings.retry_pause,
        );
        let producer = match std::thread::Builder::new()
            .name(format!("capture-{}", self.identity.sanitized_name()))
            .spawn(move || source.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.set_running(false);
                lifecycle.state = ControllerState::Stopped;
                return Err(e).with_context(|| format!("spawn capture thread for {}", self.identity));
            }
        };

        let processor = BatchProcessor::new(
            self.identity.clone(),
            self.shared.clone(),
            self.services.clone(),
            self.settings.idle_poll,
            self.settings.jpeg_quality,
        );
        let consumer = match std::thread::Builder::new()
            .name(format!("process-{}", self.identity.sanitized_name()))
            .spawn(move || processor.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.set_running(false);
                if producer.join().is_err() {
                    log::error!("{}: capture thread panicked", self.identity);
                }
                self.release_queued();
                lifecycle.state = ControllerState::Stopped;
                return Err(e)
                    .with_context(|| format!("spawn processor thread for {}", self.identity));
            }
        };

        lifecycle.producer = Some(producer);
        lifecycle.consumer = Some(consumer);
        lifecycle.state = ControllerState::Running;
        log::info!(
            "{}: started ({} -> buffer limit {})",
            self.identity,
            self.identity.source_uri,
            self.settings.buffer_limit
        );
        Ok(())
    }

    /// Clear the running flag without waiting. `stop` still has to be called to join.
    pub fn signal_stop(&self) {
        self.shared.set_running(false);
    }

    /// Stop both loops, wait for them and release every queued batch.
    ///
    /// Idempotent. When it returns, nothing touches the window buffer anymore.
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        match lifecycle.state {
            ControllerState::Stopped => return Ok(()),
            ControllerState::Created => {
                lifecycle.state = ControllerState::Stopped;
                return Ok(());
            }
            ControllerState::Running => {}
        }

        self.shared.set_running(false);
        self.shared.set_active(false);

        let mut panicked = Vec::new();
        if let Some(producer) = lifecycle.producer.take() {
            if producer.join().is_err() {
                panicked.push("capture");
            }
        }
        if let Some(consumer) = lifecycle.consumer.take() {
            if consumer.join().is_err() {
                panicked.push("processor");
            }
        }

        let released = self.release_queued();
        lifecycle.state = ControllerState::Stopped;
        log::info!(
            "{}: stopped ({} queued frames released)",
            self.identity,
            released
        );

        if !panicked.is_empty() {
            return Err(anyhow!(
                "{} thread for {} panicked",
                panicked.join(" and "),
                self.identity
            ));
        }
        Ok(())
    }

    /// Open the capture window. Returns false when the stream is not running.
    pub fn activate(&self) -> bool {
        self.set_active(true)
    }

    /// Close the capture window. Returns false when the stream is not running.
    pub fn deactivate(&self) -> bool {
        self.set_active(false)
    }

    fn set_active(&self, active: bool) -> bool {
        if !self.shared.is_running() {
            log::warn!(
                "{}: ignoring {} while not running",
                self.identity,
                if active { "activate" } else { "deactivate" }
            );
            return false;
        }
        let was = self.shared.is_active();
        self.shared.set_active(active);
        // `stop` clears running before active; seeing it cleared here means our
        // store may have landed after its clear.
        if active && !self.shared.is_running() {
            self.shared.set_active(false);
            return false;
        }
        if was != active {
            log::info!(
                "{}: {}",
                self.identity,
                if active { "activated" } else { "deactivated" }
            );
        }
        true
    }

    fn release_queued(&self) -> usize {
        let released: usize = self
            .shared
            .buffer
            .drain()
            .into_iter()
            .map(|batch| batch.release())
            .sum();
        StreamCounters::add(&self.shared.counters.frames_released, released as u64);
        released
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("{}: {:#}", self.identity, e);
        }
    }
}
