//! ILink3 session state machine: negotiate/establish handshake, dual-timer
//! keepalive, gap detection and retransmission via [`RetransmitEngine`],
//! graceful terminate.
//!
//! There is no teacher module for this protocol family (the teacher is a
//! FIX-only gateway); the state shape and `poll`/`on_frame_in` split mirror
//! `fix::session::FixSession` so the two protocol families read as siblings,
//! per §9's "protocol family is a separate variant, they do not share a
//! state enum" design note.

use fixgate_core::{AsciiString, CompositeKey};
use fixgate_codec::ilink3::{Ilink3Body, Ilink3Frame, SbeHeader, SCHEMA_ID, SCHEMA_VERSION};
use tracing::{debug, instrument, warn};

use crate::{
    application::{ApplicationHandler, DisconnectReason, NotAppliedResolution},
    error::SessionError,
    ilink3::state::{Ilink3SessionState, Ilink3State},
    publication::Publication,
    retransmit::{RetransmitEngine, RetransmitError},
    sequence_store::SequenceStore,
};

pub struct Ilink3Session {
    pub key: CompositeKey,
    pub state: Ilink3State,
    pub retransmit: RetransmitEngine,
}

enum BusinessSeqOutcome {
    Accept,
    Duplicate,
    Gap,
}

impl Ilink3Session {
    pub fn new(
        key: CompositeKey,
        keep_alive_interval_ms: u64,
        negotiate_timeout_ms: u64,
        sequence: crate::sequence_state::SequenceState,
        retransmit_batch_max: u32,
    ) -> Ilink3Session {
        Ilink3Session {
            key,
            state: Ilink3State::new(keep_alive_interval_ms, negotiate_timeout_ms, sequence),
            retransmit: RetransmitEngine::new(retransmit_batch_max),
        }
    }

    fn frame(&self, body: Ilink3Body) -> Ilink3Frame {
        Ilink3Frame {
            header: SbeHeader {
                block_length: 0,
                template_id: 0,
                schema_id: SCHEMA_ID,
                version: SCHEMA_VERSION,
            },
            body,
        }
    }

    /// Persists the advanced sequence number and the raw frame *before*
    /// claiming and committing the publication slot, so a crash between
    /// commit and persistence can never cause a message the peer already
    /// saw to be replayed as if it were new on restart.
    fn send<P: Publication, S: SequenceStore>(
        &mut self,
        body: Ilink3Body,
        now_ms: i64,
        publication: &mut P,
        store: &mut S,
    ) -> Result<bool, SessionError> {
        let frame = self.frame(body);
        let bytes = fixgate_codec::ilink3::encode(&frame);
        let seq_no = self.state.sequence.next_sent_seq_no;
        store.store_raw(&self.key, seq_no, &bytes)?;
        self.state.sequence.next_sent_seq_no = seq_no + 1;
        store.save(&self.key, self.state.sequence)?;

        let Some(mut slot) = publication.try_claim(bytes.len()) else {
            self.state.sequence.next_sent_seq_no = seq_no;
            store.save(&self.key, self.state.sequence)?;
            return Ok(false);
        };
        slot.bytes_mut().copy_from_slice(&bytes);
        slot.commit();
        self.state.next_send_deadline_ms = now_ms + self.state.keep_alive_interval_ms as i64;
        Ok(true)
    }

    #[instrument(skip(self, publication, store), fields(key = %self.key))]
    pub fn negotiate<P: Publication, S: SequenceStore>(
        &mut self,
        uuid: u64,
        firm_id: AsciiString,
        session_id: AsciiString,
        now_ms: i64,
        publication: &mut P,
        store: &mut S,
    ) -> Result<(), SessionError> {
        self.state.sequence.reset_epoch(uuid);
        self.state.firm_id = firm_id.clone();
        self.state.session_id = session_id.clone();
        self.send(
            Ilink3Body::Negotiate {
                uuid,
                request_timestamp: now_ms as u64,
                session_id,
                firm_id,
            },
            now_ms,
            publication,
            store,
        )?;
        self.state.fsm = Ilink3SessionState::SentNegotiate;
        self.state.negotiate_retransmitted = false;
        self.state.handshake_deadline_ms = now_ms + self.state.negotiate_timeout_ms as i64;
        Ok(())
    }

    /// Sends `Establish` once `NegotiationResponse` has landed the session
    /// in `Negotiated`, reusing the `session_id` recorded by `negotiate`.
    #[instrument(skip(self, publication, store), fields(key = %self.key))]
    pub fn establish<P: Publication, S: SequenceStore>(
        &mut self,
        now_ms: i64,
        publication: &mut P,
        store: &mut S,
    ) -> Result<(), SessionError> {
        let session_id = self.state.session_id.clone();
        self.send(
            Ilink3Body::Establish {
                uuid: self.state.sequence.uuid,
                request_timestamp: now_ms as u64,
                keepalive_interval_ms: self.state.keep_alive_interval_ms as u32,
                session_id,
            },
            now_ms,
            publication,
            store,
        )?;
        self.state.fsm = Ilink3SessionState::SentEstablish;
        self.state.establish_retransmitted = false;
        self.state.handshake_deadline_ms = now_ms + self.state.negotiate_timeout_ms as i64;
        Ok(())
    }

    #[instrument(skip_all, fields(key = %self.key))]
    pub fn on_frame_in<P: Publication, S: SequenceStore, A: ApplicationHandler>(
        &mut self,
        frame: Ilink3Frame,
        now_ms: i64,
        publication: &mut P,
        store: &mut S,
        app: &mut A,
    ) -> Result<(), SessionError> {
        self.state.next_receive_deadline_ms = now_ms + self.state.keep_alive_interval_ms as i64;
        self.state.lapsed_warning_sent = false;

        match frame.body {
            Ilink3Body::NegotiationResponse { uuid, next_seq_no, .. } => {
                self.state.sequence.uuid = uuid;
                self.state.sequence.next_sent_seq_no = self.state.sequence.next_sent_seq_no.max(next_seq_no);
                self.state.fsm = Ilink3SessionState::Negotiated;
                debug!("negotiated");
            }
            Ilink3Body::NegotiationReject { reason, .. } => {
                warn!(reason, "negotiate rejected");
                self.state.fsm = Ilink3SessionState::Unbound;
                app.on_disconnect(&self.key, DisconnectReason::ProtocolViolation);
            }
            Ilink3Body::EstablishmentAck {
                next_seq_no,
                ..
            } => {
                if next_seq_no > self.state.sequence.next_recv_seq_no {
                    self.retransmit
                        .enqueue_gap(self.state.sequence.next_recv_seq_no, next_seq_no - 1);
                    self.state.fsm = Ilink3SessionState::AwaitingRetransmit;
                } else {
                    self.state.fsm = Ilink3SessionState::Established;
                }
                app.on_session_ready(&self.key);
            }
            Ilink3Body::EstablishmentReject { reason, reject_reason, .. } => {
                let _ = reason;
                warn!(reject_reason, "establish rejected");
                self.state.fsm = Ilink3SessionState::Unbound;
                app.on_disconnect(&self.key, DisconnectReason::ProtocolViolation);
            }
            Ilink3Body::Sequence { next_seq_no, keep_alive_lapsed, .. } => {
                self.on_sequence(next_seq_no, now_ms, publication, store)?;
                if keep_alive_lapsed {
                    self.send(
                        Ilink3Body::Sequence {
                            uuid: self.state.sequence.uuid,
                            next_seq_no: self.state.sequence.next_sent_seq_no,
                            keep_alive_lapsed: false,
                        },
                        now_ms,
                        publication,
                        store,
                    )?;
                }
            }
            Ilink3Body::Terminate { uuid, reason_code, .. } => {
                debug!(reason_code, "peer terminated");
                if uuid != self.state.sequence.uuid {
                    app.on_session_error(&self.key, &SessionError::InvalidUuid(uuid));
                }
                if self.state.fsm != Ilink3SessionState::Unbinding {
                    self.send(
                        Ilink3Body::Terminate {
                            uuid: self.state.sequence.uuid,
                            reason_code: 0,
                            reason: AsciiString::new(),
                        },
                        now_ms,
                        publication,
                        store,
                    )?;
                }
                self.state.fsm = Ilink3SessionState::Unbound;
                app.on_disconnect(&self.key, DisconnectReason::Terminated);
            }
            Ilink3Body::NotApplied { from_seq_no, msg_count, .. } => {
                if self.retransmit.is_awaiting() {
                    app.on_session_error(&self.key, &SessionError::Retransmit(RetransmitError::IllegalState));
                } else {
                    match app.on_not_applied(&self.key, from_seq_no, msg_count) {
                        NotAppliedResolution::GapFill => {
                            self.send(
                                Ilink3Body::Sequence {
                                    uuid: self.state.sequence.uuid,
                                    next_seq_no: from_seq_no + msg_count as u64,
                                    keep_alive_lapsed: false,
                                },
                                now_ms,
                                publication,
                                store,
                            )?;
                            self.state.sequence.next_sent_seq_no =
                                self.state.sequence.next_sent_seq_no.max(from_seq_no + msg_count as u64);
                        }
                        NotAppliedResolution::Retransmit => {
                            let raw = store.fetch_raw_range(&self.key, from_seq_no..=from_seq_no + msg_count as u64 - 1)?;
                            for (_, bytes) in raw {
                                if let Some(mut slot) = publication.try_claim(bytes.len()) {
                                    slot.bytes_mut().copy_from_slice(&bytes);
                                    slot.commit();
                                }
                            }
                        }
                    }
                }
            }
            Ilink3Body::RetransmitRequest { .. } => {
                // Peer is requesting messages from us; servicing that is
                // symmetric to `on_not_applied`'s Retransmit path and is
                // handled at the engine layer, which owns the raw log for
                // both directions.
            }
            Ilink3Body::Retransmission { from_seq_no, msg_count, .. } => {
                debug!(from_seq_no, msg_count, "retransmission accepted");
            }
            Ilink3Body::RetransmitReject { reject_reason, from_seq_no, .. } => {
                if let Some(batch) = self.retransmit.on_rejected() {
                    app.on_retransmit_reject(&self.key, reject_reason, from_seq_no, batch.count);
                }
                if self.retransmit.next_request().is_none() && !self.retransmit.is_awaiting() {
                    self.state.fsm = Ilink3SessionState::Established;
                }
            }
            Ilink3Body::Application { template_id, seq_no, raw } => match self.handle_business_seq(seq_no, store)? {
                BusinessSeqOutcome::Accept => app.on_message(&self.key, seq_no, template_id as u32, &raw),
                BusinessSeqOutcome::Duplicate | BusinessSeqOutcome::Gap => {}
            },
            Ilink3Body::Negotiate { .. } | Ilink3Body::Establish { .. } => {
                // Acceptor-role handling of inbound handshake requests is
                // symmetric to the initiator path above and is driven by
                // the engine/registry, not by this struct directly.
            }
        }
        Ok(())
    }

    fn on_sequence<P: Publication, S: SequenceStore>(
        &mut self,
        next_seq_no: u64,
        now_ms: i64,
        publication: &mut P,
        store: &mut S,
    ) -> Result<(), SessionError> {
        if self.retransmit.is_awaiting() && next_seq_no == self.retransmit.fill_seq_no() {
            self.retransmit.on_message_filled(next_seq_no - 1);
            if !self.retransmit.is_awaiting() && self.retransmit.next_request().is_none() {
                self.state.fsm = Ilink3SessionState::Established;
            }
            return Ok(());
        }

        if next_seq_no < self.state.sequence.next_recv_seq_no {
            self.send(
                Ilink3Body::Terminate {
                    uuid: self.state.sequence.uuid,
                    reason_code: 1,
                    reason: AsciiString::try_from("sequence regression").expect("ascii"),
                },
                now_ms,
                publication,
                store,
            )?;
            self.state.fsm = Ilink3SessionState::Unbinding;
            return Ok(());
        }
        if next_seq_no > self.state.sequence.next_recv_seq_no {
            self.retransmit
                .enqueue_gap(self.state.sequence.next_recv_seq_no, next_seq_no - 1);
            self.state.fsm = Ilink3SessionState::AwaitingRetransmit;
        }
        self.state.sequence.next_recv_seq_no = self.state.sequence.next_recv_seq_no.max(next_seq_no);
        store.save(&self.key, self.state.sequence)?;
        Ok(())
    }

    /// Gap-checks a business message against the wire's own `seq_no`
    /// (rather than local state), mirroring [`Ilink3Session::on_sequence`]:
    /// a forward gap enqueues a retransmit and parks the session in
    /// `AwaitingRetransmit` instead of applying the message immediately.
    fn handle_business_seq<S: SequenceStore>(&mut self, seq_no: u64, store: &mut S) -> Result<BusinessSeqOutcome, SessionError> {
        if self.retransmit.is_awaiting() && seq_no + 1 == self.retransmit.fill_seq_no() {
            self.retransmit.on_message_filled(seq_no);
            if !self.retransmit.is_awaiting() && self.retransmit.next_request().is_none() {
                self.state.fsm = Ilink3SessionState::Established;
            }
            self.state.sequence.next_recv_seq_no = self.state.sequence.next_recv_seq_no.max(seq_no + 1);
            store.save(&self.key, self.state.sequence)?;
            return Ok(BusinessSeqOutcome::Accept);
        }

        if seq_no < self.state.sequence.next_recv_seq_no {
            return Ok(BusinessSeqOutcome::Duplicate);
        }

        let gap = seq_no > self.state.sequence.next_recv_seq_no;
        if gap {
            self.retransmit
                .enqueue_gap(self.state.sequence.next_recv_seq_no, seq_no - 1);
            self.state.fsm = Ilink3SessionState::AwaitingRetransmit;
        }
        self.state.sequence.next_recv_seq_no = self.state.sequence.next_recv_seq_no.max(seq_no + 1);
        store.save(&self.key, self.state.sequence)?;
        Ok(if gap { BusinessSeqOutcome::Gap } else { BusinessSeqOutcome::Accept })
    }

    /// Advances the dual keepalive timers and issues any retransmit request
    /// still queued once established; retries the handshake once on a
    /// timeout while `SentNegotiate`/`SentEstablish`, failing the session on
    /// a second. Returns `true` iff any work was done.
    pub fn poll<P: Publication, S: SequenceStore, A: ApplicationHandler>(
        &mut self,
        now_ms: i64,
        publication: &mut P,
        store: &mut S,
        app: &mut A,
    ) -> Result<bool, SessionError> {
        match self.state.fsm {
            Ilink3SessionState::SentNegotiate | Ilink3SessionState::SentEstablish => {
                self.poll_handshake(now_ms, publication, store, app)
            }
            Ilink3SessionState::Established | Ilink3SessionState::AwaitingRetransmit => {
                self.poll_established(now_ms, publication, store, app)
            }
            _ => Ok(false),
        }
    }

    fn poll_handshake<P: Publication, S: SequenceStore, A: ApplicationHandler>(
        &mut self,
        now_ms: i64,
        publication: &mut P,
        store: &mut S,
        app: &mut A,
    ) -> Result<bool, SessionError> {
        if now_ms < self.state.handshake_deadline_ms {
            return Ok(false);
        }

        match self.state.fsm {
            Ilink3SessionState::SentNegotiate if !self.state.negotiate_retransmitted => {
                self.state.negotiate_retransmitted = true;
                self.state.handshake_deadline_ms = now_ms + self.state.negotiate_timeout_ms as i64;
                let uuid = self.state.sequence.uuid;
                let session_id = self.state.session_id.clone();
                let firm_id = self.state.firm_id.clone();
                self.send(
                    Ilink3Body::Negotiate {
                        uuid,
                        request_timestamp: now_ms as u64,
                        session_id,
                        firm_id,
                    },
                    now_ms,
                    publication,
                    store,
                )?;
            }
            Ilink3SessionState::SentEstablish if !self.state.establish_retransmitted => {
                self.state.establish_retransmitted = true;
                self.state.handshake_deadline_ms = now_ms + self.state.negotiate_timeout_ms as i64;
                let session_id = self.state.session_id.clone();
                self.send(
                    Ilink3Body::Establish {
                        uuid: self.state.sequence.uuid,
                        request_timestamp: now_ms as u64,
                        keepalive_interval_ms: self.state.keep_alive_interval_ms as u32,
                        session_id,
                    },
                    now_ms,
                    publication,
                    store,
                )?;
            }
            _ => {
                warn!("handshake timed out twice, giving up");
                self.state.fsm = Ilink3SessionState::Unbound;
                app.on_disconnect(&self.key, DisconnectReason::Timeout);
            }
        }
        Ok(true)
    }

    fn poll_established<P: Publication, S: SequenceStore, A: ApplicationHandler>(
        &mut self,
        now_ms: i64,
        publication: &mut P,
        store: &mut S,
        app: &mut A,
    ) -> Result<bool, SessionError> {
        let mut progressed = false;

        if let Some(batch) = self.retransmit.next_request() {
            self.send(
                Ilink3Body::RetransmitRequest {
                    uuid: self.state.sequence.uuid,
                    last_uuid: self.state.sequence.last_uuid,
                    from_seq_no: batch.from_seq_no,
                    msg_count: batch.count,
                },
                now_ms,
                publication,
                store,
            )?;
            progressed = true;
        }

        if now_ms >= self.state.next_send_deadline_ms {
            self.send(
                Ilink3Body::Sequence {
                    uuid: self.state.sequence.uuid,
                    next_seq_no: self.state.sequence.next_sent_seq_no,
                    keep_alive_lapsed: false,
                },
                now_ms,
                publication,
                store,
            )?;
            progressed = true;
        }

        if now_ms >= self.state.next_receive_deadline_ms {
            if !self.state.lapsed_warning_sent {
                self.state.lapsed_warning_sent = true;
                self.state.next_receive_deadline_ms = now_ms + self.state.keep_alive_interval_ms as i64;
                self.send(
                    Ilink3Body::Sequence {
                        uuid: self.state.sequence.uuid,
                        next_seq_no: self.state.sequence.next_sent_seq_no,
                        keep_alive_lapsed: true,
                    },
                    now_ms,
                    publication,
                    store,
                )?;
            } else {
                self.send(
                    Ilink3Body::Terminate {
                        uuid: self.state.sequence.uuid,
                        reason_code: 2,
                        reason: AsciiString::try_from("keepalive lapsed").expect("ascii"),
                    },
                    now_ms,
                    publication,
                    store,
                )?;
                self.state.fsm = Ilink3SessionState::Unbound;
                app.on_disconnect(&self.key, DisconnectReason::Timeout);
            }
            progressed = true;
        }

        Ok(progressed)
    }
}
