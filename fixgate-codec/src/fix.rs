//! Tag=value FIX 4.2/4.4/5.0 frame codec.
//!
//! This is intentionally narrow: it understands exactly the header/trailer
//! fields and the seven session-administration message types the session
//! layer needs to drive logon/heartbeat/gap-detection/logout (see the SOH
//! field list below). Any other `MsgType` is passed through as an opaque
//! [`FixBody::Application`] payload so a caller's own business-message
//! dictionary can sit on top without this crate generating code for it.

use std::fmt;

use fixgate_core::AsciiString;

pub const SOH: u8 = 0x01;

/// Standard FIX header fields this codec understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixHeader {
    pub begin_string: AsciiString,
    pub msg_type: AsciiString,
    pub sender_comp_id: AsciiString,
    pub target_comp_id: AsciiString,
    pub msg_seq_num: u64,
    pub sending_time: AsciiString,
    pub poss_dup_flag: bool,
    pub orig_sending_time: Option<AsciiString>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FixBody {
    Logon {
        encrypt_method: u32,
        heart_bt_int: u32,
        reset_seq_num_flag: bool,
        username: Option<AsciiString>,
        password: Option<AsciiString>,
    },
    Logout {
        text: Option<AsciiString>,
    },
    Heartbeat {
        test_req_id: Option<AsciiString>,
    },
    TestRequest {
        test_req_id: AsciiString,
    },
    ResendRequest {
        begin_seq_no: u64,
        end_seq_no: u64,
    },
    Reject {
        ref_seq_num: u64,
        ref_tag_id: Option<u32>,
        session_reject_reason: Option<u32>,
        text: Option<AsciiString>,
    },
    SequenceReset {
        gap_fill_flag: bool,
        new_seq_no: u64,
    },
    /// Any other `MsgType`: raw, already tag=value-encoded body fields
    /// (excluding header/trailer), passed through untouched.
    Application { msg_type: AsciiString, raw_fields: Vec<u8> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixFrame {
    pub header: FixHeader,
    pub body: FixBody,
}

#[derive(Debug, thiserror::Error)]
pub enum FixCodecError {
    #[error("frame incomplete, need more bytes")]
    Incomplete,
    #[error("checksum mismatch: expected {expected:03}, got {actual:03}")]
    BadChecksum { expected: u32, actual: u32 },
    #[error("missing required tag {0}")]
    MissingTag(u32),
    #[error("malformed tag=value pair at offset {0}")]
    Malformed(usize),
    #[error("non-ascii field value")]
    NotAscii(#[from] fixgate_core::ascii::AsciiError),
    #[error("invalid integer field for tag {tag}: {value}")]
    InvalidInt { tag: u32, value: String },
    #[error("buffer too small to encode frame: needed {needed}, available {available}")]
    InsufficientSpace { needed: usize, available: usize },
}

fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| acc + b as u32) % 256
}

struct FieldWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> FieldWriter<'a> {
    fn tag_str(&mut self, tag: u32, value: &str) {
        let mut tag_buf = itoa::Buffer::new();
        self.buf.extend_from_slice(tag_buf.format(tag).as_bytes());
        self.buf.push(b'=');
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(SOH);
    }

    fn tag_int(&mut self, tag: u32, value: u64) {
        let mut tag_buf = itoa::Buffer::new();
        self.buf.extend_from_slice(tag_buf.format(tag).as_bytes());
        self.buf.push(b'=');
        let mut val_buf = itoa::Buffer::new();
        self.buf.extend_from_slice(val_buf.format(value).as_bytes());
        self.buf.push(SOH);
    }

    fn tag_bool(&mut self, tag: u32, value: bool) {
        self.tag_str(tag, if value { "Y" } else { "N" });
    }
}

/// Encodes `frame` as a complete FIX message, filling in `BodyLength<9>` and
/// `CheckSum<10>`.
pub fn encode(frame: &FixFrame) -> Vec<u8> {
    let mut body = Vec::new();
    {
        let mut w = FieldWriter { buf: &mut body };
        w.tag_str(35, frame.header.msg_type.as_str());
        w.tag_str(49, frame.header.sender_comp_id.as_str());
        w.tag_str(56, frame.header.target_comp_id.as_str());
        w.tag_int(34, frame.header.msg_seq_num);
        w.tag_str(52, frame.header.sending_time.as_str());
        if frame.header.poss_dup_flag {
            w.tag_bool(43, true);
        }
        if let Some(orig) = &frame.header.orig_sending_time {
            w.tag_str(122, orig.as_str());
        }
    }
    {
        let mut w = FieldWriter { buf: &mut body };
        encode_body(&mut w, &frame.body);
    }

    let mut out = Vec::with_capacity(body.len() + 32);
    {
        let mut w = FieldWriter { buf: &mut out };
        w.tag_str(8, frame.header.begin_string.as_str());
        w.tag_int(9, body.len() as u64);
    }
    out.extend_from_slice(&body);
    let sum = checksum(&out);
    {
        let mut w = FieldWriter { buf: &mut out };
        let mut fmt_buf = itoa::Buffer::new();
        let digits = fmt_buf.format(sum);
        let padded = format!("{:0>3}", digits);
        w.tag_str(10, &padded);
    }
    out
}

fn encode_body(w: &mut FieldWriter<'_>, body: &FixBody) {
    match body {
        FixBody::Logon {
            encrypt_method,
            heart_bt_int,
            reset_seq_num_flag,
            username,
            password,
        } => {
            w.tag_int(98, *encrypt_method as u64);
            w.tag_int(108, *heart_bt_int as u64);
            if *reset_seq_num_flag {
                w.tag_bool(141, true);
            }
            if let Some(username) = username {
                w.tag_str(553, username.as_str());
            }
            if let Some(password) = password {
                w.tag_str(554, password.as_str());
            }
        }
        FixBody::Logout { text } => {
            if let Some(text) = text {
                w.tag_str(58, text.as_str());
            }
        }
        FixBody::Heartbeat { test_req_id } => {
            if let Some(id) = test_req_id {
                w.tag_str(112, id.as_str());
            }
        }
        FixBody::TestRequest { test_req_id } => {
            w.tag_str(112, test_req_id.as_str());
        }
        FixBody::ResendRequest {
            begin_seq_no,
            end_seq_no,
        } => {
            w.tag_int(7, *begin_seq_no);
            w.tag_int(16, *end_seq_no);
        }
        FixBody::Reject {
            ref_seq_num,
            ref_tag_id,
            session_reject_reason,
            text,
        } => {
            w.tag_int(45, *ref_seq_num);
            if let Some(tag) = ref_tag_id {
                w.tag_int(371, *tag as u64);
            }
            if let Some(reason) = session_reject_reason {
                w.tag_int(373, *reason as u64);
            }
            if let Some(text) = text {
                w.tag_str(58, text.as_str());
            }
        }
        FixBody::SequenceReset {
            gap_fill_flag,
            new_seq_no,
        } => {
            if *gap_fill_flag {
                w.tag_bool(123, true);
            }
            w.tag_int(36, *new_seq_no);
        }
        FixBody::Application { raw_fields, .. } => {
            w.buf.extend_from_slice(raw_fields);
        }
    }
}

/// Parses one complete frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet contain a full frame (the
/// caller should read more bytes and retry); advances past the consumed
/// bytes by returning how many were used.
pub fn decode(buf: &[u8]) -> Result<Option<(FixFrame, usize)>, FixCodecError> {
    let Some(begin_pos) = memchr::memmem::find(buf, b"8=") else {
        return Ok(None);
    };
    let buf = &buf[begin_pos..];

    let Some(body_len_tag_pos) = memchr::memmem::find(buf, b"\x019=") else {
        return Ok(None);
    };
    let body_len_value_start = body_len_tag_pos + 3;
    let Some(body_len_soh) = memchr::memchr(SOH, &buf[body_len_value_start..]) else {
        return Ok(None);
    };
    let body_len_str = std::str::from_utf8(&buf[body_len_value_start..body_len_value_start + body_len_soh])
        .map_err(|_| FixCodecError::Malformed(body_len_value_start))?;
    let body_len: usize = body_len_str
        .parse()
        .map_err(|_| FixCodecError::InvalidInt {
            tag: 9,
            value: body_len_str.to_owned(),
        })?;

    let body_start = body_len_value_start + body_len_soh + 1;
    let checksum_start = body_start + body_len;
    let frame_needed = checksum_start + "10=000\x01".len();
    if buf.len() < frame_needed {
        return Ok(None);
    }

    let computed = checksum(&buf[..checksum_start]);
    let mut fields = TagValueIter::new(&buf[checksum_start..]);
    let (tag, value) = fields.next().ok_or(FixCodecError::Incomplete)??;
    if tag != 10 {
        return Err(FixCodecError::Malformed(checksum_start));
    }
    let actual: u32 = std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FixCodecError::Malformed(checksum_start))?;
    if actual != computed {
        return Err(FixCodecError::BadChecksum {
            expected: computed,
            actual,
        });
    }
    let consumed = checksum_start + fields.offset();

    let header_and_body = &buf[..checksum_start];
    let frame = parse_fields(header_and_body)?;
    Ok(Some((frame, begin_pos + consumed)))
}

struct TagValueIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TagValueIter<'a> {
    fn new(buf: &'a [u8]) -> TagValueIter<'a> {
        TagValueIter { buf, pos: 0 }
    }

    fn offset(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for TagValueIter<'a> {
    type Item = Result<(u32, &'a [u8]), FixCodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let rest = &self.buf[self.pos..];
        let eq = memchr::memchr(b'=', rest)?;
        let tag_str = std::str::from_utf8(&rest[..eq]).ok()?;
        let tag: u32 = tag_str.parse().ok()?;
        let value_start = eq + 1;
        let soh = memchr::memchr(SOH, &rest[value_start..])?;
        let value = &rest[value_start..value_start + soh];
        self.pos += value_start + soh + 1;
        Some(Ok((tag, value)))
    }
}

fn ascii_field(value: &[u8]) -> Result<AsciiString, FixCodecError> {
    Ok(AsciiString::from_ascii(value.to_vec())?)
}

fn parse_u64(tag: u32, value: &[u8]) -> Result<u64, FixCodecError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FixCodecError::InvalidInt {
            tag,
            value: String::from_utf8_lossy(value).into_owned(),
        })
}

fn parse_fields(buf: &[u8]) -> Result<FixFrame, FixCodecError> {
    let mut begin_string = None;
    let mut msg_type: Option<AsciiString> = None;
    let mut sender_comp_id = None;
    let mut target_comp_id = None;
    let mut msg_seq_num = None;
    let mut sending_time = None;
    let mut poss_dup_flag = false;
    let mut orig_sending_time = None;
    let mut body_fields: Vec<u8> = Vec::new();

    for field in TagValueIter::new(buf) {
        let (tag, value) = field?;
        match tag {
            8 => begin_string = Some(ascii_field(value)?),
            9 => {} // body length, recomputed on encode
            35 => msg_type = Some(ascii_field(value)?),
            49 => sender_comp_id = Some(ascii_field(value)?),
            56 => target_comp_id = Some(ascii_field(value)?),
            34 => msg_seq_num = Some(parse_u64(34, value)?),
            52 => sending_time = Some(ascii_field(value)?),
            43 => poss_dup_flag = value == b"Y",
            122 => orig_sending_time = Some(ascii_field(value)?),
            _ => {
                let mut w = FieldWriter { buf: &mut body_fields };
                w.tag_str(tag, std::str::from_utf8(value).unwrap_or(""));
            }
        }
    }

    let begin_string = begin_string.ok_or(FixCodecError::MissingTag(8))?;
    let msg_type = msg_type.ok_or(FixCodecError::MissingTag(35))?;
    let sender_comp_id = sender_comp_id.ok_or(FixCodecError::MissingTag(49))?;
    let target_comp_id = target_comp_id.ok_or(FixCodecError::MissingTag(56))?;
    let msg_seq_num = msg_seq_num.ok_or(FixCodecError::MissingTag(34))?;
    let sending_time = sending_time.ok_or(FixCodecError::MissingTag(52))?;

    let header = FixHeader {
        begin_string,
        msg_type: msg_type.clone(),
        sender_comp_id,
        target_comp_id,
        msg_seq_num,
        sending_time,
        poss_dup_flag,
        orig_sending_time,
    };

    let body = decode_body(msg_type.as_str(), buf)?;
    let body = body.unwrap_or(FixBody::Application {
        msg_type,
        raw_fields: body_fields,
    });

    Ok(FixFrame { header, body })
}

fn decode_body(msg_type: &str, buf: &[u8]) -> Result<Option<FixBody>, FixCodecError> {
    let mut fields_by_tag = |wanted: u32| -> Option<&[u8]> {
        TagValueIter::new(buf)
            .filter_map(|r| r.ok())
            .find(|(tag, _)| *tag == wanted)
            .map(|(_, v)| v)
    };

    Ok(Some(match msg_type {
        "A" => FixBody::Logon {
            encrypt_method: fields_by_tag(98)
                .map(|v| parse_u64(98, v))
                .transpose()?
                .unwrap_or(0) as u32,
            heart_bt_int: fields_by_tag(108)
                .map(|v| parse_u64(108, v))
                .transpose()?
                .unwrap_or(30) as u32,
            reset_seq_num_flag: fields_by_tag(141) == Some(b"Y"),
            username: fields_by_tag(553).map(ascii_field).transpose()?,
            password: fields_by_tag(554).map(ascii_field).transpose()?,
        },
        "5" => FixBody::Logout {
            text: fields_by_tag(58).map(ascii_field).transpose()?,
        },
        "0" => FixBody::Heartbeat {
            test_req_id: fields_by_tag(112).map(ascii_field).transpose()?,
        },
        "1" => FixBody::TestRequest {
            test_req_id: ascii_field(fields_by_tag(112).ok_or(FixCodecError::MissingTag(112))?)?,
        },
        "2" => FixBody::ResendRequest {
            begin_seq_no: parse_u64(7, fields_by_tag(7).ok_or(FixCodecError::MissingTag(7))?)?,
            end_seq_no: parse_u64(16, fields_by_tag(16).ok_or(FixCodecError::MissingTag(16))?)?,
        },
        "3" => FixBody::Reject {
            ref_seq_num: parse_u64(45, fields_by_tag(45).ok_or(FixCodecError::MissingTag(45))?)?,
            ref_tag_id: fields_by_tag(371)
                .map(|v| parse_u64(371, v))
                .transpose()?
                .map(|v| v as u32),
            session_reject_reason: fields_by_tag(373)
                .map(|v| parse_u64(373, v))
                .transpose()?
                .map(|v| v as u32),
            text: fields_by_tag(58).map(ascii_field).transpose()?,
        },
        "4" => FixBody::SequenceReset {
            gap_fill_flag: fields_by_tag(123) == Some(b"Y"),
            new_seq_no: parse_u64(36, fields_by_tag(36).ok_or(FixCodecError::MissingTag(36))?)?,
        },
        _ => return Ok(None),
    }))
}

impl fmt::Display for FixFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}<{}> seq={}",
            self.header.sender_comp_id, self.header.msg_type, self.header.msg_seq_num
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(seq: u64) -> FixHeader {
        FixHeader {
            begin_string: AsciiString::try_from("FIX.4.4").unwrap(),
            msg_type: AsciiString::try_from("0").unwrap(),
            sender_comp_id: AsciiString::try_from("SNDR").unwrap(),
            target_comp_id: AsciiString::try_from("TRGT").unwrap(),
            msg_seq_num: seq,
            sending_time: AsciiString::try_from("20260101-00:00:00").unwrap(),
            poss_dup_flag: false,
            orig_sending_time: None,
        }
    }

    #[test]
    fn round_trips_heartbeat() {
        let frame = FixFrame {
            header: header(42),
            body: FixBody::Heartbeat {
                test_req_id: Some(AsciiString::try_from("abc").unwrap()),
            },
        };
        let encoded = encode(&frame);
        let (decoded, consumed) = decode(&encoded).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.header.msg_seq_num, 42);
        assert_eq!(decoded.body, frame.body);
    }

    #[test]
    fn round_trips_logon_with_reset() {
        let mut h = header(1);
        h.msg_type = AsciiString::try_from("A").unwrap();
        let frame = FixFrame {
            header: h,
            body: FixBody::Logon {
                encrypt_method: 0,
                heart_bt_int: 30,
                reset_seq_num_flag: true,
                username: None,
                password: None,
            },
        };
        let encoded = encode(&frame);
        let (decoded, _) = decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.body, frame.body);
    }

    #[test]
    fn rejects_bad_checksum() {
        let frame = FixFrame {
            header: header(1),
            body: FixBody::Heartbeat { test_req_id: None },
        };
        let mut encoded = encode(&frame);
        let len = encoded.len();
        encoded[len - 4] = b'9';
        let err = decode(&encoded).unwrap_err();
        assert!(matches!(err, FixCodecError::BadChecksum { .. }));
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let frame = FixFrame {
            header: header(1),
            body: FixBody::Heartbeat { test_req_id: None },
        };
        let encoded = encode(&frame);
        assert_eq!(decode(&encoded[..encoded.len() - 5]).unwrap(), None);
    }

    #[test]
    fn unknown_msg_type_passes_through_as_application() {
        let mut h = header(7);
        h.msg_type = AsciiString::try_from("D").unwrap();
        let frame = FixFrame {
            header: h,
            body: FixBody::Application {
                msg_type: AsciiString::try_from("D").unwrap(),
                raw_fields: b"11=ORDER1\x01".to_vec(),
            },
        };
        let encoded = encode(&frame);
        let (decoded, _) = decode(&encoded).unwrap().unwrap();
        match decoded.body {
            FixBody::Application { msg_type, raw_fields } => {
                assert_eq!(msg_type, "D");
                assert!(raw_fields.windows(3).any(|w| w == b"11="));
            }
            other => panic!("expected Application, got {other:?}"),
        }
    }
}
