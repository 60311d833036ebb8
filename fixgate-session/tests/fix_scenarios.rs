use fixgate_core::{AsciiString, CompositeKey};
use fixgate_codec::fix::{self, FixBody};
use fixgate_session::{
    application::NullHandler,
    fix::FixSession,
    sequence_state::SequenceState,
    InMemorySequenceStore, LoopbackPublication,
};

fn key() -> CompositeKey {
    CompositeKey::new(
        AsciiString::try_from("INITIATOR").unwrap(),
        AsciiString::try_from("ACCEPTOR").unwrap(),
    )
}

fn begin_string() -> AsciiString {
    AsciiString::try_from("FIX.4.4").unwrap()
}

/// Scenario 7: initiator sends Logon(seq=1, reset=true), acceptor replies
/// Logon(seq=1); both land ACTIVE.
#[test]
fn fix_happy_path_logon() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = NullHandler;

    let mut initiator = FixSession::new(key(), begin_string(), true, 30_000, SequenceState::fresh());
    initiator.initiate(1_000, true, &mut publication, &mut store).unwrap();

    let sent = publication.drain();
    assert_eq!(sent.len(), 1);
    let (logon_out, _) = fix::decode(&sent[0]).unwrap().unwrap();
    assert!(matches!(logon_out.body, FixBody::Logon { reset_seq_num_flag: true, .. }));
    assert_eq!(logon_out.header.msg_seq_num, 1);

    let mut acceptor_store = InMemorySequenceStore::new();
    let mut acceptor = FixSession::new(
        key().reverse(),
        begin_string(),
        false,
        30_000,
        SequenceState::fresh(),
    );
    acceptor
        .on_frame_in(logon_out, 1_100, &mut publication, &mut acceptor_store, &mut handler)
        .unwrap();

    let acceptor_reply = publication.drain();
    assert_eq!(acceptor_reply.len(), 1);
    let (logon_reply, _) = fix::decode(&acceptor_reply[0]).unwrap().unwrap();
    assert!(matches!(logon_reply.body, FixBody::Logon { .. }));

    initiator
        .on_frame_in(logon_reply, 1_200, &mut publication, &mut store, &mut handler)
        .unwrap();

    assert!(initiator.state.is_active());
    assert!(acceptor.state.is_active());
}

/// Scenario 10: ACTIVE with next_recv=5; inbound seq=3, no PossDup → local
/// sends Logout(MsgSeqNumTooLow) and disconnects.
#[test]
fn fix_low_seq_without_poss_dup_is_fatal() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = NullHandler;

    let mut sequence = SequenceState::fresh();
    sequence.next_recv_seq_no = 5;
    sequence.next_sent_seq_no = 5;
    let mut session = FixSession::new(key(), begin_string(), true, 30_000, sequence);
    session.state.fsm = fixgate_session::fix::FixSessionState::Active;

    let stale = fix::FixFrame {
        header: fix::FixHeader {
            begin_string: begin_string(),
            msg_type: AsciiString::try_from("0").unwrap(),
            sender_comp_id: AsciiString::try_from("ACCEPTOR").unwrap(),
            target_comp_id: AsciiString::try_from("INITIATOR").unwrap(),
            msg_seq_num: 3,
            sending_time: AsciiString::try_from("0").unwrap(),
            poss_dup_flag: false,
            orig_sending_time: None,
        },
        body: FixBody::Heartbeat { test_req_id: None },
    };

    session
        .on_frame_in(stale, 2_000, &mut publication, &mut store, &mut handler)
        .unwrap();

    assert_eq!(session.state.fsm, fixgate_session::fix::FixSessionState::AwaitingLogout);
    let sent = publication.drain();
    assert_eq!(sent.len(), 1);
    let (logout, _) = fix::decode(&sent[0]).unwrap().unwrap();
    assert!(matches!(logout.body, FixBody::Logout { .. }));
}

/// Scenario 9 (partial): a gap triggers a ResendRequest spanning exactly the
/// missing range.
#[test]
fn fix_gap_triggers_resend_request() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = NullHandler;

    let mut sequence = SequenceState::fresh();
    sequence.next_recv_seq_no = 5;
    sequence.next_sent_seq_no = 5;
    let mut session = FixSession::new(key(), begin_string(), true, 30_000, sequence);
    session.state.fsm = fixgate_session::fix::FixSessionState::Active;

    let ahead = fix::FixFrame {
        header: fix::FixHeader {
            begin_string: begin_string(),
            msg_type: AsciiString::try_from("0").unwrap(),
            sender_comp_id: AsciiString::try_from("ACCEPTOR").unwrap(),
            target_comp_id: AsciiString::try_from("INITIATOR").unwrap(),
            msg_seq_num: 8,
            sending_time: AsciiString::try_from("0").unwrap(),
            poss_dup_flag: false,
            orig_sending_time: None,
        },
        body: FixBody::Heartbeat { test_req_id: None },
    };

    session
        .on_frame_in(ahead, 2_000, &mut publication, &mut store, &mut handler)
        .unwrap();

    let sent = publication.drain();
    assert_eq!(sent.len(), 1);
    let (resend, _) = fix::decode(&sent[0]).unwrap().unwrap();
    assert_eq!(
        resend.body,
        FixBody::ResendRequest {
            begin_seq_no: 5,
            end_seq_no: 7
        }
    );
    assert_eq!(session.state.resend_range, Some(5..=7));
}

/// Scenario 8: AWAITING_LOGOUT (reached via a fatal low-seq Logout) that
/// never gets the counterparty's Logout reply disconnects once the
/// heartbeat-interval timeout elapses, rather than being polled forever.
#[test]
fn fix_awaiting_logout_disconnects_on_timeout() {
    let mut store = InMemorySequenceStore::new();
    let mut publication = LoopbackPublication::new(4096);
    let mut handler = NullHandler;

    let mut sequence = SequenceState::fresh();
    sequence.next_recv_seq_no = 5;
    sequence.next_sent_seq_no = 5;
    let mut session = FixSession::new(key(), begin_string(), true, 1_000, sequence);
    session.state.fsm = fixgate_session::fix::FixSessionState::Active;

    let stale = fix::FixFrame {
        header: fix::FixHeader {
            begin_string: begin_string(),
            msg_type: AsciiString::try_from("0").unwrap(),
            sender_comp_id: AsciiString::try_from("ACCEPTOR").unwrap(),
            target_comp_id: AsciiString::try_from("INITIATOR").unwrap(),
            msg_seq_num: 3,
            sending_time: AsciiString::try_from("0").unwrap(),
            poss_dup_flag: false,
            orig_sending_time: None,
        },
        body: FixBody::Heartbeat { test_req_id: None },
    };
    session
        .on_frame_in(stale, 2_000, &mut publication, &mut store, &mut handler)
        .unwrap();
    publication.drain();
    assert_eq!(session.state.fsm, fixgate_session::fix::FixSessionState::AwaitingLogout);

    assert!(!session.poll(2_500, &mut publication, &mut store, &mut handler).unwrap());
    assert_eq!(session.state.fsm, fixgate_session::fix::FixSessionState::AwaitingLogout);

    assert!(session.poll(3_000, &mut publication, &mut store, &mut handler).unwrap());
    assert_eq!(session.state.fsm, fixgate_session::fix::FixSessionState::Disconnected);
}
