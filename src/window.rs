//! Hand-off queue between a stream's capture loop and its batch processor.
//!
//! Every mutation of the queue happens inside the same mutex, so a push and a pop
//! never interleave. Batches leave in the order they arrived.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::frame::FrameBatch;

/// How many batches the queue may hold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueuePolicy {
    /// No cap. A slow consumer lets batches pile up.
    #[default]
    Unbounded,
    /// Keep at most N batches, evicting the oldest on overflow.
    DropOldest(usize),
}

impl QueuePolicy {
    pub fn from_cap(cap: Option<usize>) -> Self {
        match cap {
            Some(max) if max > 0 => Self::DropOldest(max),
            _ => Self::Unbounded,
        }
    }
}

#[derive(Debug, Default)]
pub struct WindowBuffer {
    queue: Mutex<VecDeque<FrameBatch>>,
    policy: QueuePolicy,
}

impl WindowBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: QueuePolicy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            policy,
        }
    }

    /// Append a batch at the tail.
    ///
    /// Under `DropOldest` the batch evicted from the head is returned so the caller
    /// can release and account for it.
    pub fn push(&self, batch: FrameBatch) -> Option<FrameBatch> {
        let mut queue = self.lock();
        queue.push_back(batch);
        match self.policy {
            QueuePolicy::DropOldest(max) if queue.len() > max => queue.pop_front(),
            _ => None,
        }
    }

    /// Remove and return the head batch, if any.
    pub fn try_pop(&self) -> Option<FrameBatch> {
        self.lock().pop_front()
    }

    /// Take every queued batch, oldest first.
    pub fn drain(&self) -> Vec<FrameBatch> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Frames currently held across all queued batches.
    pub fn queued_frames(&self) -> usize {
        self.lock().iter().map(FrameBatch::len).sum()
    }

    // VecDeque operations leave the queue consistent even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, VecDeque<FrameBatch>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, RawImage};
    use std::sync::Arc;

    fn batch_of(tag: &str, frames: usize) -> FrameBatch {
        let mut batch = FrameBatch::new();
        for i in 0..frames {
            let image = RawImage::new(vec![0; 3], 1, 1);
            batch
                .try_push(Frame::new(format!("{tag}-{i}"), image), usize::MAX)
                .unwrap();
        }
        batch
    }

    fn first_label(batch: &FrameBatch) -> String {
        batch.get(0).map(|f| f.label().to_string()).unwrap_or_default()
    }

    #[test]
    fn pops_in_push_order() {
        let buffer = WindowBuffer::new();
        for tag in ["a", "b", "c"] {
            assert!(buffer.push(batch_of(tag, 1)).is_none());
        }
        assert_eq!(buffer.len(), 3);
        let order: Vec<String> = std::iter::from_fn(|| buffer.try_pop())
            .map(|b| first_label(&b))
            .collect();
        assert_eq!(order, vec!["a-0", "b-0", "c-0"]);
        assert!(buffer.try_pop().is_none());
    }

    #[test]
    fn unbounded_policy_never_evicts() {
        let buffer = WindowBuffer::new();
        for i in 0..100 {
            assert!(buffer.push(batch_of(&i.to_string(), 1)).is_none());
        }
        assert_eq!(buffer.len(), 100);
    }

    #[test]
    fn drop_oldest_policy_evicts_head() {
        let buffer = WindowBuffer::with_policy(QueuePolicy::DropOldest(2));
        assert!(buffer.push(batch_of("a", 2)).is_none());
        assert!(buffer.push(batch_of("b", 1)).is_none());
        let evicted = buffer.push(batch_of("c", 1)).expect("evicted batch");
        assert_eq!(first_label(&evicted), "a-0");
        assert_eq!(evicted.release(), 2);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn drain_empties_queue() {
        let buffer = WindowBuffer::new();
        buffer.push(batch_of("a", 2));
        buffer.push(batch_of("b", 3));
        assert_eq!(buffer.queued_frames(), 5);
        let released: usize = buffer.drain().into_iter().map(FrameBatch::release).sum();
        assert_eq!(released, 5);
        assert!(buffer.is_empty());
    }

    #[test]
    fn cap_of_zero_means_unbounded() {
        assert_eq!(QueuePolicy::from_cap(Some(0)), QueuePolicy::Unbounded);
        assert_eq!(QueuePolicy::from_cap(None), QueuePolicy::Unbounded);
        assert_eq!(QueuePolicy::from_cap(Some(4)), QueuePolicy::DropOldest(4));
    }

    #[test]
    fn concurrent_producer_and_consumer_preserve_order() {
        let buffer = Arc::new(WindowBuffer::new());
        let producer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    buffer.push(batch_of(&i.to_string(), 1));
                }
            })
        };
        let mut seen = Vec::new();
        while seen.len() < 200 {
            match buffer.try_pop() {
                Some(batch) => seen.push(first_label(&batch)),
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();
        let expected: Vec<String> = (0..200).map(|i| format!("{i}-0")).collect();
        assert_eq!(seen, expected);
    }
}
