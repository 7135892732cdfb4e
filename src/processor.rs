//! Consumer half of a stream: pops sealed batches, scores a few candidate
//! frames and publishes the best one.

use std::sync::Arc;
use std::time::Duration;

use crate::frame::FrameBatch;
use crate::publish::{Notification, StoreRequest};
use crate::services::Services;
use crate::stream::{StreamCounters, StreamIdentity, StreamShared};

/// Indices evaluated for a batch of `len` frames: every `i` in `0..len` with
/// `i` in {1, 2, 3, len/2}, ascending.
///
/// A batch of one frame evaluates index 0, because `1/2 == 0`.
pub fn candidate_positions(len: usize) -> Vec<usize> {
    (0..len)
        .filter(|&i| i == 1 || i == 2 || i == 3 || i == len / 2)
        .collect()
}

/// Best-scoring frame of one batch evaluation.
#[derive(Clone, Debug)]
pub struct DetectionCandidate {
    pub position: usize,
    pub confidence: f32,
    pub label: String,
    pub jpeg: Vec<u8>,
}

/// What processing one batch led to.
#[derive(Clone, Debug, PartialEq)]
pub enum BatchOutcome {
    /// No candidate scored above zero.
    NoMatch,
    /// Stored under `key`; `notified` is false when the notifier failed.
    Published {
        key: String,
        confidence: f32,
        position: usize,
        notified: bool,
    },
    /// A candidate matched but the store failed, so nothing was notified.
    StoreFailed { confidence: f32, position: usize },
}

pub struct BatchProcessor {
    identity: StreamIdentity,
    shared: Arc<StreamShared>,
    services: Services,
    idle_poll: Duration,
    jpeg_quality: u8,
}

impl BatchProcessor {
    pub fn new(
        identity: StreamIdentity,
        shared: Arc<StreamShared>,
        services: Services,
        idle_poll: Duration,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            identity,
            shared,
            services,
            idle_poll,
            jpeg_quality,
        }
    }

    /// Run until the running flag clears. Batches left in the buffer are the
    /// controller's to drain.
    pub fn run(self) {
        log::info!("{}: processor loop started", self.identity.name);
        while self.shared.is_running() {
            match self.shared.buffer.try_pop() {
                Some(batch) => {
                    self.process(batch);
                }
                None => std::thread::sleep(self.idle_poll),
            }
        }
        log::info!("{}: processor loop stopped", self.identity.name);
    }

    /// Evaluate, publish on a match, then release the batch.
    pub fn process(&self, batch: FrameBatch) -> BatchOutcome {
        let counters = &self.shared.counters;
        let outcome = match self.evaluate(&batch) {
            Some(best) => self.publish(&best),
            None => BatchOutcome::NoMatch,
        };
        let released = batch.release();
        StreamCounters::add(&counters.frames_released, released as u64);
        StreamCounters::bump(&counters.batches_processed);
        outcome
    }

    /// Score the candidate frames and keep the strictly greatest confidence above zero.
    ///
    /// Encoding or detector failures skip that candidate.
    pub fn evaluate(&self, batch: &FrameBatch) -> Option<DetectionCandidate> {
        let name = &self.identity.name;
        let mut best: Option<DetectionCandidate> = None;

        for position in candidate_positions(batch.len()) {
            let Some(frame) = batch.get(position) else {
                continue;
            };
            let jpeg = match frame.encode_jpeg(self.jpeg_quality) {
                Ok(jpeg) => jpeg,
                Err(e) => {
                    log::warn!("{}: skipping candidate {}: {:#}", name, position, e);
                    continue;
                }
            };
            let labels = match self.services.classifier.score(&jpeg) {
                Ok(labels) => labels,
                Err(e) => {
                    log::warn!(
                        "{}: detector {} failed on candidate {}: {:#}",
                        name,
                        self.services.classifier.name(),
                        position,
                        e
                    );
                    StreamCounters::bump(&self.shared.counters.collaborator_failures);
                    continue;
                }
            };
            let confidence = self.services.rule.confidence(&labels);
            log::debug!(
                "{}: candidate {} ({}) scored {}",
                name,
                position,
                frame.label(),
                confidence
            );

            let current = best.as_ref().map_or(0.0, |b| b.confidence);
            if confidence > current {
                best = Some(DetectionCandidate {
                    position,
                    confidence,
                    label: frame.label().to_string(),
                    jpeg,
                });
            }
        }
        best
    }

    fn publish(&self, best: &DetectionCandidate) -> BatchOutcome {
        let name = &self.identity.name;
        let counters = &self.shared.counters;
        let timestamp = crate::timestamp_now();
        let request = StoreRequest {
            stream: &self.identity,
            jpeg: &best.jpeg,
            confidence: best.confidence,
            position: best.position,
            timestamp: &timestamp,
        };

        let key = match self.services.store.store(&request) {
            Ok(key) => key,
            Err(e) => {
                log::error!(
                    "{}: {} store failed for {}: {:#}",
                    name,
                    self.services.store.name(),
                    best.label,
                    e
                );
                StreamCounters::bump(&counters.collaborator_failures);
                return BatchOutcome::StoreFailed {
                    confidence: best.confidence,
                    position: best.position,
                };
            }
        };
        StreamCounters::bump(&counters.detections);
        log::info!(
            "{}: person detected ({:.1}) at position {}, stored as {}",
            name,
            best.confidence,
            best.position,
            key
        );

        let notification =
            Notification::detection(&request, &key, &self.services.attachment_name);
        let notified = match self.services.notifier.notify(&notification) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "{}: {} notification failed for {}: {:#}",
                    name,
                    self.services.notifier.name(),
                    key,
                    e
                );
                StreamCounters::bump(&counters.collaborator_failures);
                false
            }
        };

        BatchOutcome::Published {
            key,
            confidence: best.confidence,
            position: best.position,
            notified,
        }
    }
}
