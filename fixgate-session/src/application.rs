//! Synchronous application callbacks, invoked directly from a session's
//! `poll`/message-handling path on the framer thread.
//!
//! The teacher's `application.rs` wires business code to the session
//! through an async `Emitter`/`EventStream` pair backed by an mpsc channel;
//! that shape doesn't fit a cooperative, suspension-free poll loop (§5), so
//! this is a plain trait invoked in-line instead. Handlers must not block.

use fixgate_core::CompositeKey;

use crate::error::SessionError;

/// How the application wants an ILink3 `NotApplied` notification resolved.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotAppliedResolution {
    /// Advance `next_sent_seq_no` to `from + count` without resending.
    GapFill,
    /// Replay persisted messages `[from, from + count)` in order.
    Retransmit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DisconnectReason {
    LoggedOut,
    Terminated,
    Timeout,
    TransportFault,
    ProtocolViolation,
}

pub trait ApplicationHandler {
    /// A business (non-session-administration) message was received in
    /// order. `template_id` is the FIX `MsgType` byte or the ILink3
    /// `template_id`, reported uninterpreted.
    fn on_message(&mut self, key: &CompositeKey, seq_no: u64, template_id: u32, payload: &[u8]);

    /// ILink3 peer reports it detected a gap in our outbound stream.
    fn on_not_applied(&mut self, key: &CompositeKey, from_seq_no: u64, count: u32) -> NotAppliedResolution {
        let _ = (key, from_seq_no, count);
        NotAppliedResolution::GapFill
    }

    fn on_retransmit_reject(&mut self, key: &CompositeKey, reason: u16, from_seq_no: u64, count: u32) {
        let _ = (key, reason, from_seq_no, count);
    }

    fn on_disconnect(&mut self, key: &CompositeKey, reason: DisconnectReason) {
        let _ = (key, reason);
    }

    fn on_session_ready(&mut self, key: &CompositeKey) {
        let _ = key;
    }

    /// A non-fatal protocol anomaly was observed and handled locally (the
    /// session already took the corrective action); reported for
    /// monitoring rather than as a reason to intervene.
    fn on_session_error(&mut self, key: &CompositeKey, error: &SessionError) {
        let _ = (key, error);
    }
}

/// No-op handler, analogous to the teacher's `NullStorage`: useful as a
/// default in tests that only care about the FSM's own state.
#[derive(Default)]
pub struct NullHandler;

impl ApplicationHandler for NullHandler {
    fn on_message(&mut self, _key: &CompositeKey, _seq_no: u64, _template_id: u32, _payload: &[u8]) {}
}
