use fixgate_core::AsciiString;

use crate::sequence_state::SequenceState;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ilink3SessionState {
    SentNegotiate,
    Negotiated,
    SentEstablish,
    Established,
    AwaitingRetransmit,
    Unbinding,
    Unbound,
}

#[derive(Debug)]
pub struct Ilink3State {
    pub fsm: Ilink3SessionState,
    pub sequence: SequenceState,
    pub keep_alive_interval_ms: u64,
    pub negotiate_timeout_ms: u64,
    pub next_send_deadline_ms: i64,
    pub next_receive_deadline_ms: i64,
    /// Deadline for a reply to the outstanding Negotiate/Establish while
    /// `fsm` is `SentNegotiate`/`SentEstablish`; unused once past the
    /// handshake.
    pub handshake_deadline_ms: i64,
    pub negotiate_retransmitted: bool,
    pub establish_retransmitted: bool,
    /// Set once a `Lapsed` keepalive warning has been sent to the peer, so
    /// a second silent interval escalates to Terminate instead of warning
    /// again.
    pub lapsed_warning_sent: bool,
    /// Retained so a handshake retry on timeout can resend the identical
    /// Negotiate/Establish request.
    pub session_id: AsciiString,
    pub firm_id: AsciiString,
}

impl Ilink3State {
    pub fn new(keep_alive_interval_ms: u64, negotiate_timeout_ms: u64, sequence: SequenceState) -> Ilink3State {
        Ilink3State {
            fsm: Ilink3SessionState::SentNegotiate,
            sequence,
            keep_alive_interval_ms,
            negotiate_timeout_ms,
            next_send_deadline_ms: 0,
            next_receive_deadline_ms: 0,
            handshake_deadline_ms: 0,
            negotiate_retransmitted: false,
            establish_retransmitted: false,
            lapsed_warning_sent: false,
            session_id: AsciiString::new(),
            firm_id: AsciiString::new(),
        }
    }
}
