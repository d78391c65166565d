//! Bounded FIFO of outbound envelopes.

use std::collections::VecDeque;

use shell_core::Envelope;
use tracing::warn;

/// Outbound envelopes waiting for the next flush.
///
/// Holds commands across disconnects. When full, the oldest envelope is
/// discarded to make room.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<Envelope>,
    capacity: usize,
    dropped: u64,
}

impl OutboundQueue {
    /// Empty queue holding at most `capacity` envelopes (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Append, evicting the oldest envelope if the queue is full.
    pub fn push(&mut self, envelope: Envelope) {
        if self.items.len() >= self.capacity {
            if let Some(evicted) = self.items.pop_front() {
                self.dropped += 1;
                warn!(
                    kind = evicted.kind(),
                    capacity = self.capacity,
                    "outbound queue full, dropping oldest envelope"
                );
            }
        }
        self.items.push_back(envelope);
    }

    /// Remove up to `max` envelopes from the front.
    pub fn take_batch(&mut self, max: usize) -> Vec<Envelope> {
        let n = max.min(self.items.len());
        self.items.drain(..n).collect()
    }

    /// Put an unsent batch back at the front, keeping its order.
    ///
    /// Anything that no longer fits is dropped from the back.
    pub fn requeue_front(&mut self, batch: Vec<Envelope>) {
        for envelope in batch.into_iter().rev() {
            self.items.push_front(envelope);
        }
        while self.items.len() > self.capacity {
            let _ = self.items.pop_back();
            self.dropped += 1;
        }
    }

    /// Queued envelopes.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Envelopes evicted so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(seq: u64) -> Envelope {
        Envelope::new("NAVIGATE").with("seq", seq)
    }

    fn seqs(batch: &[Envelope]) -> Vec<u64> {
        batch.iter().filter_map(|e| e.get_u64("seq")).collect()
    }

    #[test]
    fn batches_preserve_order() {
        let mut q = OutboundQueue::new(100);
        for i in 0..15 {
            q.push(env(i));
        }
        assert_eq!(seqs(&q.take_batch(10)), (0..10).collect::<Vec<_>>());
        assert_eq!(seqs(&q.take_batch(10)), (10..15).collect::<Vec<_>>());
        assert!(q.is_empty());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let mut q = OutboundQueue::new(3);
        for i in 0..5 {
            q.push(env(i));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.dropped(), 2);
        assert_eq!(seqs(&q.take_batch(10)), vec![2, 3, 4]);
    }

    #[test]
    fn requeue_goes_back_to_front() {
        let mut q = OutboundQueue::new(10);
        for i in 0..4 {
            q.push(env(i));
        }
        let batch = q.take_batch(2);
        q.push(env(4));
        q.requeue_front(batch);
        assert_eq!(seqs(&q.take_batch(10)), vec![0, 1, 2, 3, 4]);
    }
}
