//! FIX session state data, grounded on the teacher's `session_state.rs`
//! (`State<S>`): the same field shape (flags, heartbeat interval, last
//! send/receive timestamps, pending resend range), but timestamps are
//! plain `i64` millis against an injected [`fixgate_core::Clock`] instead
//! of `tokio::time::Instant`.

use std::{collections::HashSet, ops::RangeInclusive};

use fixgate_core::AsciiString;

use crate::sequence_state::SequenceState;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FixSessionState {
    Connected,
    SentLogon,
    Active,
    AwaitingLogout,
    Disconnected,
}

#[derive(Debug)]
pub struct FixState {
    pub fsm: FixSessionState,
    pub sequence: SequenceState,
    pub initiator: bool,
    pub heartbeat_interval_ms: u64,
    pub last_sent_ms: i64,
    pub last_received_ms: i64,
    pub sent_logout: bool,
    pub received_logon: bool,
    /// Deadline for the counterparty's Logout reply while `fsm` is
    /// `AwaitingLogout`; unused otherwise.
    pub logout_deadline_ms: i64,
    /// Set while a gap is outstanding: `[next_recv_seq_no, observed_seq - 1]`.
    pub resend_range: Option<RangeInclusive<u64>>,
    /// TestReqIDs we've sent while waiting for a heartbeat reply, so a
    /// late/duplicate Heartbeat doesn't reset timers twice.
    pub outstanding_test_req_ids: HashSet<AsciiString>,
    pub pending_heartbeat: bool,
    pub test_request_sent: bool,
}

impl FixState {
    pub fn new(initiator: bool, heartbeat_interval_ms: u64, sequence: SequenceState) -> FixState {
        FixState {
            fsm: FixSessionState::Connected,
            sequence,
            initiator,
            heartbeat_interval_ms,
            last_sent_ms: 0,
            last_received_ms: 0,
            sent_logout: false,
            received_logon: false,
            logout_deadline_ms: 0,
            resend_range: None,
            outstanding_test_req_ids: HashSet::new(),
            pending_heartbeat: false,
            test_request_sent: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.fsm == FixSessionState::Active
    }
}
