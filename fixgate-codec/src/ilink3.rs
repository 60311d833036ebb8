//! Simple Binary Encoding (SBE)-lite codec for the ILink3 session layer.
//!
//! Real ILink3 deployments generate this codec from CME's SBE schema XML;
//! that generator is out of scope here; this module hand-encodes just the
//! fixed 8-byte SBE header plus the twelve session-administration templates
//! the framer drives its state machine with. Business (application) message
//! templates are passed through as an opaque [`Ilink3Body::Application`]
//! payload.

use fixgate_core::AsciiString;

pub const SCHEMA_ID: u16 = 1;
pub const SCHEMA_VERSION: u16 = 1;
pub const HEADER_LEN: usize = 8;

pub const TEMPLATE_NEGOTIATE: u16 = 500;
pub const TEMPLATE_NEGOTIATION_RESPONSE: u16 = 501;
pub const TEMPLATE_NEGOTIATION_REJECT: u16 = 502;
pub const TEMPLATE_ESTABLISH: u16 = 503;
pub const TEMPLATE_ESTABLISHMENT_ACK: u16 = 504;
pub const TEMPLATE_ESTABLISHMENT_REJECT: u16 = 505;
pub const TEMPLATE_SEQUENCE: u16 = 506;
pub const TEMPLATE_TERMINATE: u16 = 507;
pub const TEMPLATE_RETRANSMIT_REQUEST: u16 = 508;
pub const TEMPLATE_RETRANSMISSION: u16 = 509;
pub const TEMPLATE_RETRANSMIT_REJECT: u16 = 510;
pub const TEMPLATE_NOT_APPLIED: u16 = 513;

/// Fixed 8-byte SBE message header: `block_length`, `template_id`,
/// `schema_id`, `version`, all little-endian `u16`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SbeHeader {
    pub block_length: u16,
    pub template_id: u16,
    pub schema_id: u16,
    pub version: u16,
}

impl SbeHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.block_length.to_le_bytes());
        out.extend_from_slice(&self.template_id.to_le_bytes());
        out.extend_from_slice(&self.schema_id.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<SbeHeader, Ilink3CodecError> {
        if buf.len() < HEADER_LEN {
            return Err(Ilink3CodecError::Incomplete);
        }
        Ok(SbeHeader {
            block_length: u16::from_le_bytes([buf[0], buf[1]]),
            template_id: u16::from_le_bytes([buf[2], buf[3]]),
            schema_id: u16::from_le_bytes([buf[4], buf[5]]),
            version: u16::from_le_bytes([buf[6], buf[7]]),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ilink3Body {
    Negotiate {
        uuid: u64,
        request_timestamp: u64,
        session_id: AsciiString,
        firm_id: AsciiString,
    },
    NegotiationResponse {
        uuid: u64,
        request_timestamp: u64,
        next_seq_no: u64,
    },
    NegotiationReject {
        uuid: u64,
        request_timestamp: u64,
        reject_reason: u16,
        reason: AsciiString,
    },
    Establish {
        uuid: u64,
        request_timestamp: u64,
        keepalive_interval_ms: u32,
        session_id: AsciiString,
    },
    EstablishmentAck {
        uuid: u64,
        request_timestamp: u64,
        next_seq_no: u64,
        keepalive_interval_ms: u32,
    },
    EstablishmentReject {
        uuid: u64,
        request_timestamp: u64,
        reject_reason: u16,
        reason: AsciiString,
    },
    Sequence {
        uuid: u64,
        next_seq_no: u64,
        /// `KeepAliveLapsed` enum on the wire (`NotLapsed` = 0, `Lapsed` =
        /// 1): set on the first Sequence sent after a receive-deadline
        /// lapse, so the peer can recognize and must-reply to it.
        keep_alive_lapsed: bool,
    },
    Terminate {
        uuid: u64,
        reason_code: u16,
        reason: AsciiString,
    },
    RetransmitRequest {
        uuid: u64,
        last_uuid: u64,
        from_seq_no: u64,
        msg_count: u32,
    },
    Retransmission {
        uuid: u64,
        last_uuid: u64,
        from_seq_no: u64,
        msg_count: u32,
    },
    RetransmitReject {
        uuid: u64,
        last_uuid: u64,
        from_seq_no: u64,
        reject_reason: u16,
    },
    NotApplied {
        uuid: u64,
        from_seq_no: u64,
        msg_count: u32,
    },
    /// Any non-session template: passed through untouched, except for the
    /// leading `seq_no` every business template carries so the framer can
    /// gap-check it without understanding the payload.
    Application { template_id: u16, seq_no: u64, raw: Vec<u8> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ilink3Frame {
    pub header: SbeHeader,
    pub body: Ilink3Body,
}

#[derive(Debug, thiserror::Error)]
pub enum Ilink3CodecError {
    #[error("frame incomplete, need more bytes")]
    Incomplete,
    #[error("unsupported schema id {0}")]
    UnsupportedSchema(u16),
    #[error("var-length field truncated")]
    TruncatedVarData,
    #[error("field is not ASCII")]
    NotAscii(#[from] fixgate_core::ascii::AsciiError),
}

fn write_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

fn write_var_ascii(out: &mut Vec<u8>, value: &AsciiString) {
    write_u16(out, value.len() as u16);
    out.extend_from_slice(value.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn u64(&mut self) -> Result<u64, Ilink3CodecError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + 8)
            .ok_or(Ilink3CodecError::Incomplete)?;
        self.pos += 8;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, Ilink3CodecError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + 4)
            .ok_or(Ilink3CodecError::Incomplete)?;
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn u16(&mut self) -> Result<u16, Ilink3CodecError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + 2)
            .ok_or(Ilink3CodecError::Incomplete)?;
        self.pos += 2;
        Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn u8(&mut self) -> Result<u8, Ilink3CodecError> {
        let byte = *self.buf.get(self.pos).ok_or(Ilink3CodecError::Incomplete)?;
        self.pos += 1;
        Ok(byte)
    }

    fn var_ascii(&mut self) -> Result<AsciiString, Ilink3CodecError> {
        let len = self.u16()? as usize;
        let bytes = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or(Ilink3CodecError::TruncatedVarData)?
            .to_vec();
        self.pos += len;
        Ok(AsciiString::from_ascii(bytes)?)
    }
}

/// Encodes `frame`, computing `block_length` from the body's fixed fields
/// (the header's `block_length` field is overwritten to match).
pub fn encode(frame: &Ilink3Frame) -> Vec<u8> {
    let mut fixed = Vec::new();
    let mut var = Vec::new();
    let template_id = encode_body(&mut fixed, &mut var, &frame.body);

    let header = SbeHeader {
        block_length: fixed.len() as u16,
        template_id,
        schema_id: frame.header.schema_id,
        version: frame.header.version,
    };

    let mut out = Vec::with_capacity(HEADER_LEN + fixed.len() + var.len());
    header.encode(&mut out);
    out.extend_from_slice(&fixed);
    out.extend_from_slice(&var);
    out
}

fn encode_body(fixed: &mut Vec<u8>, var: &mut Vec<u8>, body: &Ilink3Body) -> u16 {
    match body {
        Ilink3Body::Negotiate {
            uuid,
            request_timestamp,
            session_id,
            firm_id,
        } => {
            write_u64(fixed, *uuid);
            write_u64(fixed, *request_timestamp);
            write_var_ascii(var, session_id);
            write_var_ascii(var, firm_id);
            TEMPLATE_NEGOTIATE
        }
        Ilink3Body::NegotiationResponse {
            uuid,
            request_timestamp,
            next_seq_no,
        } => {
            write_u64(fixed, *uuid);
            write_u64(fixed, *request_timestamp);
            write_u64(fixed, *next_seq_no);
            TEMPLATE_NEGOTIATION_RESPONSE
        }
        Ilink3Body::NegotiationReject {
            uuid,
            request_timestamp,
            reject_reason,
            reason,
        } => {
            write_u64(fixed, *uuid);
            write_u64(fixed, *request_timestamp);
            write_u16(fixed, *reject_reason);
            write_var_ascii(var, reason);
            TEMPLATE_NEGOTIATION_REJECT
        }
        Ilink3Body::Establish {
            uuid,
            request_timestamp,
            keepalive_interval_ms,
            session_id,
        } => {
            write_u64(fixed, *uuid);
            write_u64(fixed, *request_timestamp);
            write_u32(fixed, *keepalive_interval_ms);
            write_var_ascii(var, session_id);
            TEMPLATE_ESTABLISH
        }
        Ilink3Body::EstablishmentAck {
            uuid,
            request_timestamp,
            next_seq_no,
            keepalive_interval_ms,
        } => {
            write_u64(fixed, *uuid);
            write_u64(fixed, *request_timestamp);
            write_u64(fixed, *next_seq_no);
            write_u32(fixed, *keepalive_interval_ms);
            TEMPLATE_ESTABLISHMENT_ACK
        }
        Ilink3Body::EstablishmentReject {
            uuid,
            request_timestamp,
            reject_reason,
            reason,
        } => {
            write_u64(fixed, *uuid);
            write_u64(fixed, *request_timestamp);
            write_u16(fixed, *reject_reason);
            write_var_ascii(var, reason);
            TEMPLATE_ESTABLISHMENT_REJECT
        }
        Ilink3Body::Sequence {
            uuid,
            next_seq_no,
            keep_alive_lapsed,
        } => {
            write_u64(fixed, *uuid);
            write_u64(fixed, *next_seq_no);
            write_u8(fixed, *keep_alive_lapsed as u8);
            TEMPLATE_SEQUENCE
        }
        Ilink3Body::Terminate {
            uuid,
            reason_code,
            reason,
        } => {
            write_u64(fixed, *uuid);
            write_u16(fixed, *reason_code);
            write_var_ascii(var, reason);
            TEMPLATE_TERMINATE
        }
        Ilink3Body::RetransmitRequest {
            uuid,
            last_uuid,
            from_seq_no,
            msg_count,
        } => {
            write_u64(fixed, *uuid);
            write_u64(fixed, *last_uuid);
            write_u64(fixed, *from_seq_no);
            write_u32(fixed, *msg_count);
            TEMPLATE_RETRANSMIT_REQUEST
        }
        Ilink3Body::Retransmission {
            uuid,
            last_uuid,
            from_seq_no,
            msg_count,
        } => {
            write_u64(fixed, *uuid);
            write_u64(fixed, *last_uuid);
            write_u64(fixed, *from_seq_no);
            write_u32(fixed, *msg_count);
            TEMPLATE_RETRANSMISSION
        }
        Ilink3Body::RetransmitReject {
            uuid,
            last_uuid,
            from_seq_no,
            reject_reason,
        } => {
            write_u64(fixed, *uuid);
            write_u64(fixed, *last_uuid);
            write_u64(fixed, *from_seq_no);
            write_u16(fixed, *reject_reason);
            TEMPLATE_RETRANSMIT_REJECT
        }
        Ilink3Body::NotApplied {
            uuid,
            from_seq_no,
            msg_count,
        } => {
            write_u64(fixed, *uuid);
            write_u64(fixed, *from_seq_no);
            write_u32(fixed, *msg_count);
            TEMPLATE_NOT_APPLIED
        }
        Ilink3Body::Application { template_id, seq_no, raw } => {
            write_u64(fixed, *seq_no);
            fixed.extend_from_slice(raw);
            *template_id
        }
    }
}

/// Decodes one frame. `total_len` (header + fixed block + var data) must be
/// known up front by the caller (the transport framing below this codec is
/// length-prefixed at a lower layer; see `fixgate-session`'s publication
/// adapter), so unlike [`crate::fix::decode`] this takes exactly one frame's
/// bytes rather than scanning a stream buffer.
pub fn decode(buf: &[u8]) -> Result<Ilink3Frame, Ilink3CodecError> {
    let header = SbeHeader::decode(buf)?;
    if header.schema_id != SCHEMA_ID {
        return Err(Ilink3CodecError::UnsupportedSchema(header.schema_id));
    }
    let body_buf = buf.get(HEADER_LEN..).ok_or(Ilink3CodecError::Incomplete)?;
    let mut r = Reader::new(body_buf);

    let body = match header.template_id {
        TEMPLATE_NEGOTIATE => {
            let uuid = r.u64()?;
            let request_timestamp = r.u64()?;
            let session_id = r.var_ascii()?;
            let firm_id = r.var_ascii()?;
            Ilink3Body::Negotiate {
                uuid,
                request_timestamp,
                session_id,
                firm_id,
            }
        }
        TEMPLATE_NEGOTIATION_RESPONSE => Ilink3Body::NegotiationResponse {
            uuid: r.u64()?,
            request_timestamp: r.u64()?,
            next_seq_no: r.u64()?,
        },
        TEMPLATE_NEGOTIATION_REJECT => {
            let uuid = r.u64()?;
            let request_timestamp = r.u64()?;
            let reject_reason = r.u16()?;
            let reason = r.var_ascii()?;
            Ilink3Body::NegotiationReject {
                uuid,
                request_timestamp,
                reject_reason,
                reason,
            }
        }
        TEMPLATE_ESTABLISH => {
            let uuid = r.u64()?;
            let request_timestamp = r.u64()?;
            let keepalive_interval_ms = r.u32()?;
            let session_id = r.var_ascii()?;
            Ilink3Body::Establish {
                uuid,
                request_timestamp,
                keepalive_interval_ms,
                session_id,
            }
        }
        TEMPLATE_ESTABLISHMENT_ACK => Ilink3Body::EstablishmentAck {
            uuid: r.u64()?,
            request_timestamp: r.u64()?,
            next_seq_no: r.u64()?,
            keepalive_interval_ms: r.u32()?,
        },
        TEMPLATE_ESTABLISHMENT_REJECT => {
            let uuid = r.u64()?;
            let request_timestamp = r.u64()?;
            let reject_reason = r.u16()?;
            let reason = r.var_ascii()?;
            Ilink3Body::EstablishmentReject {
                uuid,
                request_timestamp,
                reject_reason,
                reason,
            }
        }
        TEMPLATE_SEQUENCE => Ilink3Body::Sequence {
            uuid: r.u64()?,
            next_seq_no: r.u64()?,
            keep_alive_lapsed: r.u8()? != 0,
        },
        TEMPLATE_TERMINATE => {
            let uuid = r.u64()?;
            let reason_code = r.u16()?;
            let reason = r.var_ascii()?;
            Ilink3Body::Terminate {
                uuid,
                reason_code,
                reason,
            }
        }
        TEMPLATE_RETRANSMIT_REQUEST => Ilink3Body::RetransmitRequest {
            uuid: r.u64()?,
            last_uuid: r.u64()?,
            from_seq_no: r.u64()?,
            msg_count: r.u32()?,
        },
        TEMPLATE_RETRANSMISSION => Ilink3Body::Retransmission {
            uuid: r.u64()?,
            last_uuid: r.u64()?,
            from_seq_no: r.u64()?,
            msg_count: r.u32()?,
        },
        TEMPLATE_RETRANSMIT_REJECT => Ilink3Body::RetransmitReject {
            uuid: r.u64()?,
            last_uuid: r.u64()?,
            from_seq_no: r.u64()?,
            reject_reason: r.u16()?,
        },
        TEMPLATE_NOT_APPLIED => Ilink3Body::NotApplied {
            uuid: r.u64()?,
            from_seq_no: r.u64()?,
            msg_count: r.u32()?,
        },
        other => {
            let seq_no = r.u64()?;
            let raw_len = (header.block_length as usize).saturating_sub(8);
            let raw = body_buf
                .get(r.pos..r.pos + raw_len)
                .ok_or(Ilink3CodecError::Incomplete)?
                .to_vec();
            Ilink3Body::Application {
                template_id: other,
                seq_no,
                raw,
            }
        }
    };

    Ok(Ilink3Frame { header, body })
}
