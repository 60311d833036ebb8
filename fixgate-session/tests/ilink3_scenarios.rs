use fixgate_core::{AsciiString, CompositeKey};
use fixgate_codec::ilink3::{self, Ilink3Body};
use fixgate_session::{
    application::{ApplicationHandler, DisconnectReason, NullHandler},
    error::SessionError,
    ilink3::Ilink3Session,
    sequence_state::SequenceState,
    InMemorySequenceStore, LoopbackPublication,
};

#[derive(Default)]
struct RecordingHandler {
    disconnects: Vec<DisconnectReason>,
    errors: Vec<String>,
}

impl ApplicationHandler for RecordingHandler {
    fn on_message(&mut self, _key: &CompositeKey, _seq_no: u64, _template_id: u32, _payload: &[u8]) {}

    fn on_disconnect(&mut self, _key: &CompositeKey, reason: DisconnectReason) {
        self.disconnects.push(reason);
    }

    fn on_session_error(&mut self, _key: &CompositeKey, error: &SessionError) {
        self.errors.push(error.to_string());
    }
}

fn key() -> CompositeKey {
    CompositeKey::new(
        AsciiString::try_from("FIRM01").unwrap(),
        AsciiString::try_from("CME").unwrap(),
    )
}

/// Scenario 1: Negotiate -> NegotiateResponse -> Establish ->
/// EstablishmentAck(prev_seq=0, next_seq=1) lands ESTABLISHED with uuid=U.
#[test]
fn ilink3_happy_path_establish() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = NullHandler;

    let mut session = Ilink3Session::new(key(), 500, 5_000, SequenceState::fresh(), 2500);
    session
        .negotiate(
            42,
            AsciiString::try_from("FIRM01").unwrap(),
            AsciiString::try_from("SESS01").unwrap(),
            1_000,
            &mut publication,
            &mut store,
        )
        .unwrap();
    assert_eq!(publication.drain().len(), 1);

    let response = ilink3::Ilink3Frame {
        header: ilink3::SbeHeader {
            block_length: 0,
            template_id: ilink3::TEMPLATE_NEGOTIATION_RESPONSE,
            schema_id: ilink3::SCHEMA_ID,
            version: ilink3::SCHEMA_VERSION,
        },
        body: Ilink3Body::NegotiationResponse {
            uuid: 42,
            request_timestamp: 1_000,
            next_seq_no: 1,
        },
    };
    session
        .on_frame_in(response, 1_100, &mut publication, &mut store, &mut handler)
        .unwrap();
    assert_eq!(session.state.fsm, fixgate_session::ilink3::Ilink3SessionState::Negotiated);
    assert_eq!(session.state.sequence.uuid, 42);

    let ack = ilink3::Ilink3Frame {
        header: ilink3::SbeHeader {
            block_length: 0,
            template_id: ilink3::TEMPLATE_ESTABLISHMENT_ACK,
            schema_id: ilink3::SCHEMA_ID,
            version: ilink3::SCHEMA_VERSION,
        },
        body: Ilink3Body::EstablishmentAck {
            uuid: 42,
            request_timestamp: 1_100,
            next_seq_no: 1,
            keepalive_interval_ms: 500,
        },
    };
    session
        .on_frame_in(ack, 1_200, &mut publication, &mut store, &mut handler)
        .unwrap();

    assert_eq!(session.state.fsm, fixgate_session::ilink3::Ilink3SessionState::Established);
    assert_eq!(session.state.sequence.uuid, 42);
}

/// Scenario 2: ESTABLISHED, no outbound for the keepalive interval emits a
/// Sequence message.
#[test]
fn ilink3_keepalive_emits_sequence_on_send_deadline() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = NullHandler;

    let mut sequence = SequenceState::fresh();
    sequence.uuid = 7;
    let mut session = Ilink3Session::new(key(), 500, 5_000, sequence, 2500);
    session.state.fsm = fixgate_session::ilink3::Ilink3SessionState::Established;
    session.state.next_send_deadline_ms = 500;
    session.state.next_receive_deadline_ms = 10_000;

    let progressed = session
        .poll(500, &mut publication, &mut store, &mut handler)
        .unwrap();
    assert!(progressed);

    let sent = publication.drain();
    assert_eq!(sent.len(), 1);
    let decoded = ilink3::decode(&sent[0]).unwrap();
    assert!(matches!(decoded.body, Ilink3Body::Sequence { next_seq_no: 1, .. }));
}

/// Scenario 6: ESTABLISHED, next_recv=2; peer sends Sequence(1) (a
/// regression) -> local sends Terminate and moves to UNBINDING.
#[test]
fn ilink3_low_seq_sequence_message_terminates() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = NullHandler;

    let mut sequence = SequenceState::fresh();
    sequence.uuid = 9;
    sequence.next_recv_seq_no = 2;
    let mut session = Ilink3Session::new(key(), 500, 5_000, sequence, 2500);
    session.state.fsm = fixgate_session::ilink3::Ilink3SessionState::Established;

    let regression = ilink3::Ilink3Frame {
        header: ilink3::SbeHeader {
            block_length: 0,
            template_id: ilink3::TEMPLATE_SEQUENCE,
            schema_id: ilink3::SCHEMA_ID,
            version: ilink3::SCHEMA_VERSION,
        },
        body: Ilink3Body::Sequence {
            uuid: 9,
            next_seq_no: 1,
            keep_alive_lapsed: false,
        },
    };
    session
        .on_frame_in(regression, 2_000, &mut publication, &mut store, &mut handler)
        .unwrap();

    assert_eq!(session.state.fsm, fixgate_session::ilink3::Ilink3SessionState::Unbinding);
    let sent = publication.drain();
    assert_eq!(sent.len(), 1);
    let decoded = ilink3::decode(&sent[0]).unwrap();
    assert!(matches!(decoded.body, Ilink3Body::Terminate { .. }));
    assert_eq!(session.state.sequence.next_recv_seq_no, 2, "persisted next_recv must not advance on a fatal regression");
}

/// A Lapsed Sequence from the peer must be answered with a NotLapsed
/// Sequence rather than silently accepted.
#[test]
fn ilink3_lapsed_sequence_gets_a_not_lapsed_reply() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = NullHandler;

    let mut sequence = SequenceState::fresh();
    sequence.uuid = 11;
    let mut session = Ilink3Session::new(key(), 500, 5_000, sequence, 2500);
    session.state.fsm = fixgate_session::ilink3::Ilink3SessionState::Established;

    let lapsed = ilink3::Ilink3Frame {
        header: ilink3::SbeHeader {
            block_length: 0,
            template_id: ilink3::TEMPLATE_SEQUENCE,
            schema_id: ilink3::SCHEMA_ID,
            version: ilink3::SCHEMA_VERSION,
        },
        body: Ilink3Body::Sequence {
            uuid: 11,
            next_seq_no: 1,
            keep_alive_lapsed: true,
        },
    };
    session
        .on_frame_in(lapsed, 2_000, &mut publication, &mut store, &mut handler)
        .unwrap();

    let sent = publication.drain();
    assert_eq!(sent.len(), 1);
    let decoded = ilink3::decode(&sent[0]).unwrap();
    assert!(matches!(
        decoded.body,
        Ilink3Body::Sequence {
            keep_alive_lapsed: false,
            ..
        }
    ));
}

/// A receive-side keepalive lapse sends a Lapsed Sequence warning first and
/// only Terminates on a second consecutive lapse.
#[test]
fn ilink3_receive_lapse_warns_then_terminates() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = RecordingHandler::default();

    let mut sequence = SequenceState::fresh();
    sequence.uuid = 21;
    let mut session = Ilink3Session::new(key(), 500, 5_000, sequence, 2500);
    session.state.fsm = fixgate_session::ilink3::Ilink3SessionState::Established;
    session.state.next_send_deadline_ms = 10_000;
    session.state.next_receive_deadline_ms = 500;

    assert!(session.poll(500, &mut publication, &mut store, &mut handler).unwrap());
    let sent = publication.drain();
    assert_eq!(sent.len(), 1);
    let decoded = ilink3::decode(&sent[0]).unwrap();
    assert!(matches!(
        decoded.body,
        Ilink3Body::Sequence {
            keep_alive_lapsed: true,
            ..
        }
    ));
    assert!(handler.disconnects.is_empty());

    assert!(session
        .poll(1_000, &mut publication, &mut store, &mut handler)
        .unwrap());
    let sent = publication.drain();
    assert_eq!(sent.len(), 1);
    let decoded = ilink3::decode(&sent[0]).unwrap();
    assert!(matches!(decoded.body, Ilink3Body::Terminate { .. }));
    assert_eq!(handler.disconnects, vec![DisconnectReason::Timeout]);
}

/// SentNegotiate retransmits the Negotiate exactly once on timeout, then
/// fails the session on a second timeout.
#[test]
fn ilink3_handshake_retransmits_once_then_fails() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = RecordingHandler::default();

    let mut session = Ilink3Session::new(key(), 500, 1_000, SequenceState::fresh(), 2500);
    session
        .negotiate(
            5,
            AsciiString::try_from("FIRM01").unwrap(),
            AsciiString::try_from("SESS01").unwrap(),
            0,
            &mut publication,
            &mut store,
        )
        .unwrap();
    publication.drain();
    assert_eq!(session.state.fsm, fixgate_session::ilink3::Ilink3SessionState::SentNegotiate);

    assert!(session.poll(1_000, &mut publication, &mut store, &mut handler).unwrap());
    assert_eq!(publication.drain().len(), 1, "must resend Negotiate once");
    assert!(session.state.negotiate_retransmitted);
    assert_eq!(session.state.fsm, fixgate_session::ilink3::Ilink3SessionState::SentNegotiate);

    assert!(session.poll(2_000, &mut publication, &mut store, &mut handler).unwrap());
    assert_eq!(session.state.fsm, fixgate_session::ilink3::Ilink3SessionState::Unbound);
    assert_eq!(handler.disconnects, vec![DisconnectReason::Timeout]);
}

/// A Terminate carrying the wrong uuid is still answered with a
/// local-uuid Terminate, and the mismatch is surfaced to the application.
#[test]
fn ilink3_terminate_with_wrong_uuid_surfaces_error() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = RecordingHandler::default();

    let mut sequence = SequenceState::fresh();
    sequence.uuid = 99;
    let mut session = Ilink3Session::new(key(), 500, 5_000, sequence, 2500);
    session.state.fsm = fixgate_session::ilink3::Ilink3SessionState::Established;

    let terminate = ilink3::Ilink3Frame {
        header: ilink3::SbeHeader {
            block_length: 0,
            template_id: ilink3::TEMPLATE_TERMINATE,
            schema_id: ilink3::SCHEMA_ID,
            version: ilink3::SCHEMA_VERSION,
        },
        body: Ilink3Body::Terminate {
            uuid: 123,
            reason_code: 9,
            reason: AsciiString::new(),
        },
    };
    session
        .on_frame_in(terminate, 2_000, &mut publication, &mut store, &mut handler)
        .unwrap();

    assert_eq!(handler.errors.len(), 1);
    assert!(handler.errors[0].contains("123"));
    let sent = publication.drain();
    assert_eq!(sent.len(), 1);
    let decoded = ilink3::decode(&sent[0]).unwrap();
    assert!(matches!(decoded.body, Ilink3Body::Terminate { uuid: 99, .. }));
}

/// A second concurrent NotApplied while a retransmit is already in flight
/// is rejected rather than starting a second replay.
#[test]
fn ilink3_concurrent_not_applied_is_rejected() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = RecordingHandler::default();

    let mut sequence = SequenceState::fresh();
    sequence.uuid = 31;
    let mut session = Ilink3Session::new(key(), 500, 5_000, sequence, 2500);
    session.state.fsm = fixgate_session::ilink3::Ilink3SessionState::Established;
    session.retransmit.enqueue_gap(1, 10);
    session.retransmit.next_request();
    assert!(session.retransmit.is_awaiting());

    let not_applied = ilink3::Ilink3Frame {
        header: ilink3::SbeHeader {
            block_length: 0,
            template_id: ilink3::TEMPLATE_NOT_APPLIED,
            schema_id: ilink3::SCHEMA_ID,
            version: ilink3::SCHEMA_VERSION,
        },
        body: Ilink3Body::NotApplied {
            uuid: 31,
            from_seq_no: 20,
            msg_count: 5,
        },
    };
    session
        .on_frame_in(not_applied, 2_000, &mut publication, &mut store, &mut handler)
        .unwrap();

    assert_eq!(handler.errors.len(), 1);
    assert!(handler.errors[0].contains("already draining"));
    assert!(publication.drain().is_empty(), "no gap-fill Sequence should be sent for the rejected resolution");
}

/// Gap detection on business (Application) messages now uses the wire's
/// own seq_no instead of a fabricated local counter.
#[test]
fn ilink3_application_gap_uses_wire_seq_no() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = RecordingHandler::default();

    let mut sequence = SequenceState::fresh();
    sequence.uuid = 41;
    sequence.next_recv_seq_no = 1;
    let mut session = Ilink3Session::new(key(), 500, 5_000, sequence, 2500);
    session.state.fsm = fixgate_session::ilink3::Ilink3SessionState::Established;

    let business = ilink3::Ilink3Frame {
        header: ilink3::SbeHeader {
            block_length: 0,
            template_id: 77,
            schema_id: ilink3::SCHEMA_ID,
            version: ilink3::SCHEMA_VERSION,
        },
        body: Ilink3Body::Application {
            template_id: 77,
            seq_no: 5,
            raw: vec![1, 2, 3],
        },
    };
    session
        .on_frame_in(business, 2_000, &mut publication, &mut store, &mut handler)
        .unwrap();

    assert_eq!(
        session.state.fsm,
        fixgate_session::ilink3::Ilink3SessionState::AwaitingRetransmit,
        "a forward gap on a business message must be detected from its own wire seq_no"
    );
    let batch = session.retransmit.next_request().unwrap();
    assert_eq!(batch.from_seq_no, 1);
    assert_eq!(batch.count, 4);
}
