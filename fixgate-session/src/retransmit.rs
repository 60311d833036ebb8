//! Bounded batch request/fill controller for ILink3 gap recovery (§4.4).
//!
//! Splits a detected gap into sequential batches no larger than
//! `max_batch_size`, tracks the single in-flight request, and advances
//! `fill_seq_no` as retransmitted messages arrive. Rejects don't stall the
//! session: the engine just moves on to the next queued batch.

use std::collections::VecDeque;

/// Sentinel meaning "no retransmit batch outstanding", matching the spec's
/// `agreeRetransmitFillSeqNo(NOT_AWAITING_RETRANSMIT)` invariant.
pub const NOT_AWAITING_RETRANSMIT: u64 = 0;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Batch {
    pub from_seq_no: u64,
    pub count: u32,
}

#[derive(Debug, Default)]
pub struct RetransmitEngine {
    max_batch_size: u32,
    queued: VecDeque<Batch>,
    in_flight: Option<Batch>,
    /// Highest seq number that completes the in-flight batch, or
    /// [`NOT_AWAITING_RETRANSMIT`] when nothing is outstanding.
    fill_seq_no: u64,
}

impl RetransmitEngine {
    pub fn new(max_batch_size: u32) -> RetransmitEngine {
        RetransmitEngine {
            max_batch_size,
            queued: VecDeque::new(),
            in_flight: None,
            fill_seq_no: NOT_AWAITING_RETRANSMIT,
        }
    }

    pub fn fill_seq_no(&self) -> u64 {
        self.fill_seq_no
    }

    pub fn is_awaiting(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Splits `[lo, hi]` (inclusive) into batches of at most `max_batch_size`
    /// and enqueues them. Does not itself issue a request; call
    /// [`RetransmitEngine::next_request`] to get the next one to send.
    pub fn enqueue_gap(&mut self, lo: u64, hi: u64) {
        let mut from = lo;
        while from <= hi {
            let remaining = hi - from + 1;
            let count = remaining.min(self.max_batch_size as u64) as u32;
            self.queued.push_back(Batch {
                from_seq_no: from,
                count,
            });
            from += count as u64;
        }
    }

    /// Returns the next batch to request, if none is currently in flight.
    pub fn next_request(&mut self) -> Option<Batch> {
        if self.in_flight.is_some() {
            return None;
        }
        let batch = self.queued.pop_front()?;
        self.fill_seq_no = batch.from_seq_no + batch.count as u64;
        self.in_flight = Some(batch);
        Some(batch)
    }

    /// The in-flight request was accepted by the peer.
    pub fn on_accepted(&mut self) {
        // fill_seq_no was already set in `next_request`; nothing to do but
        // keep the in-flight batch recorded so `on_message_filled` can track
        // completion.
    }

    /// A retransmitted (or live, gap-filling) message with `seq_no` arrived.
    /// Returns `true` once this completes the in-flight batch.
    pub fn on_message_filled(&mut self, seq_no: u64) -> bool {
        if self.in_flight.is_none() {
            return false;
        }
        if seq_no + 1 >= self.fill_seq_no {
            self.in_flight = None;
            self.fill_seq_no = NOT_AWAITING_RETRANSMIT;
            true
        } else {
            false
        }
    }

    /// The in-flight request was rejected. Clears it so the next poll can
    /// issue the next queued batch without stalling.
    pub fn on_rejected(&mut self) -> Option<Batch> {
        let rejected = self.in_flight.take();
        self.fill_seq_no = NOT_AWAITING_RETRANSMIT;
        rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_gap_is_one_batch() {
        let mut engine = RetransmitEngine::new(2500);
        engine.enqueue_gap(1, 2);
        let batch = engine.next_request().unwrap();
        assert_eq!(batch, Batch { from_seq_no: 1, count: 2 });
        assert_eq!(engine.fill_seq_no(), 3);
        assert!(engine.next_request().is_none());
    }

    #[test]
    fn large_gap_splits_into_sequential_batches() {
        let mut engine = RetransmitEngine::new(2500);
        engine.enqueue_gap(1, 5000);
        let first = engine.next_request().unwrap();
        assert_eq!(first, Batch { from_seq_no: 1, count: 2500 });
        assert!(engine.next_request().is_none(), "second batch must wait for first to clear");
        assert!(engine.on_message_filled(2500));
        let second = engine.next_request().unwrap();
        assert_eq!(second, Batch { from_seq_no: 2501, count: 2499 });
        assert!(engine.on_message_filled(4999));
        assert_eq!(engine.fill_seq_no(), NOT_AWAITING_RETRANSMIT);
    }

    #[test]
    fn reject_clears_in_flight_without_stalling_queue() {
        let mut engine = RetransmitEngine::new(2500);
        engine.enqueue_gap(1, 5000);
        engine.next_request();
        let rejected = engine.on_rejected().unwrap();
        assert_eq!(rejected, Batch { from_seq_no: 1, count: 2500 });
        assert_eq!(engine.fill_seq_no(), NOT_AWAITING_RETRANSMIT);
        let next = engine.next_request().unwrap();
        assert_eq!(next, Batch { from_seq_no: 2501, count: 2499 });
    }
}
