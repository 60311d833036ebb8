//! Claim-then-commit outbound byte sink, the only way a session writes to
//! the wire. Modeled on a ring-buffer publication API (claim a slot sized
//! for the message, write into it, commit or abort) rather than a plain
//! `Write`, so backpressure is visible to the caller as `try_claim`
//! returning `None` instead of an unbounded internal buffer.

/// A claimed, writable region of the publication's buffer. Must be explicitly
/// [`commit`](ClaimedSlot::commit)ed; dropping without committing aborts it.
pub struct ClaimedSlot<'a> {
    bytes: Vec<u8>,
    sink: Box<dyn FnMut(Vec<u8>) + 'a>,
}

impl<'a> ClaimedSlot<'a> {
    pub fn new(bytes: Vec<u8>, sink: impl FnMut(Vec<u8>) + 'a) -> ClaimedSlot<'a> {
        ClaimedSlot {
            bytes,
            sink: Box::new(sink),
        }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn commit(mut self) {
        (self.sink)(std::mem::take(&mut self.bytes));
    }

    pub fn abort(self) {
        // Just drops `self.bytes`; `sink` is never invoked.
    }
}

pub trait Publication {
    /// Reserves `len` bytes for an outbound message. Returns `None` when the
    /// publication is backpressured; the caller must not buffer the message
    /// itself and instead leaves its FSM in a state that re-attempts the
    /// send on the next poll.
    fn try_claim(&mut self, len: usize) -> Option<ClaimedSlot<'_>>;
}

/// In-memory publication for tests and the bundled demo: every committed
/// frame is appended to an internal queue a test driver can drain.
pub struct LoopbackPublication {
    capacity: usize,
    committed: Vec<Vec<u8>>,
}

impl LoopbackPublication {
    pub fn new(capacity: usize) -> LoopbackPublication {
        LoopbackPublication {
            capacity,
            committed: Vec::new(),
        }
    }

    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.committed)
    }
}

impl Publication for LoopbackPublication {
    fn try_claim(&mut self, len: usize) -> Option<ClaimedSlot<'_>> {
        if len > self.capacity {
            return None;
        }
        let committed = &mut self.committed;
        Some(ClaimedSlot::new(vec![0u8; len], move |bytes| {
            committed.push(bytes)
        }))
    }
}
