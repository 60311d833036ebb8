use std::fmt;

use crate::ascii::{AsciiError, AsciiString};

/// Identifies a logical FIX session across reconnections.
///
/// Equality and hashing are component-wise byte equality (derived), which is
/// what the [`SessionRegistry`](crate) and the [`SequenceStore`](crate) key
/// their maps on.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CompositeKey {
    sender_comp_id: AsciiString,
    sender_sub_id: Option<AsciiString>,
    sender_location_id: Option<AsciiString>,
    target_comp_id: AsciiString,
}

impl CompositeKey {
    pub fn new(sender_comp_id: AsciiString, target_comp_id: AsciiString) -> CompositeKey {
        CompositeKey {
            sender_comp_id,
            sender_sub_id: None,
            sender_location_id: None,
            target_comp_id,
        }
    }

    pub fn with_sender_sub_id(mut self, sender_sub_id: AsciiString) -> CompositeKey {
        self.sender_sub_id = Some(sender_sub_id);
        self
    }

    pub fn with_sender_location_id(mut self, sender_location_id: AsciiString) -> CompositeKey {
        self.sender_location_id = Some(sender_location_id);
        self
    }

    pub fn sender_comp_id(&self) -> &AsciiString {
        &self.sender_comp_id
    }

    pub fn sender_sub_id(&self) -> Option<&AsciiString> {
        self.sender_sub_id.as_ref()
    }

    pub fn sender_location_id(&self) -> Option<&AsciiString> {
        self.sender_location_id.as_ref()
    }

    pub fn target_comp_id(&self) -> &AsciiString {
        &self.target_comp_id
    }

    /// Swaps sender and target, used when deriving the key under which an
    /// *inbound* message's session should be looked up.
    pub fn reverse(self) -> CompositeKey {
        CompositeKey {
            sender_comp_id: self.target_comp_id,
            sender_sub_id: self.sender_sub_id,
            sender_location_id: self.sender_location_id,
            target_comp_id: self.sender_comp_id,
        }
    }

    /// Total encoded size in bytes, including length-prefix and presence
    /// header overhead. Used by callers to size their buffer before calling
    /// [`CompositeKey::encode`].
    pub fn encoded_len(&self) -> usize {
        const PRESENCE_HEADER: usize = 1;
        const LEN_PREFIX: usize = 2;
        let mut len = PRESENCE_HEADER + LEN_PREFIX + self.sender_comp_id.len();
        len += LEN_PREFIX + self.target_comp_id.len();
        if let Some(sub_id) = &self.sender_sub_id {
            len += LEN_PREFIX + sub_id.len();
        }
        if let Some(location_id) = &self.sender_location_id {
            len += LEN_PREFIX + location_id.len();
        }
        len
    }

    /// Encodes this key into `buf`, returning the number of bytes written.
    ///
    /// Layout: `presence_flags: u8`, then `sender_comp_id`, `sender_sub_id`
    /// (if present), `sender_location_id` (if present), `target_comp_id`,
    /// each as `len: u16 little-endian` followed by that many ASCII bytes.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, CompositeKeyError> {
        let needed = self.encoded_len();
        if buf.len() < needed {
            return Err(CompositeKeyError::InsufficientSpace {
                needed,
                available: buf.len(),
            });
        }

        let mut flags = 0u8;
        if self.sender_sub_id.is_some() {
            flags |= FLAG_SENDER_SUB_ID;
        }
        if self.sender_location_id.is_some() {
            flags |= FLAG_SENDER_LOCATION_ID;
        }

        let mut offset = 0;
        buf[offset] = flags;
        offset += 1;
        offset += write_component(&mut buf[offset..], &self.sender_comp_id);
        if let Some(sub_id) = &self.sender_sub_id {
            offset += write_component(&mut buf[offset..], sub_id);
        }
        if let Some(location_id) = &self.sender_location_id {
            offset += write_component(&mut buf[offset..], location_id);
        }
        offset += write_component(&mut buf[offset..], &self.target_comp_id);
        Ok(offset)
    }

    /// Decodes a key previously produced by [`CompositeKey::encode`].
    pub fn decode(buf: &[u8]) -> Result<CompositeKey, CompositeKeyError> {
        let mut offset = 0;
        let flags = *buf.get(offset).ok_or(CompositeKeyError::Truncated)?;
        offset += 1;

        let (sender_comp_id, advance) = read_component(&buf[offset..])?;
        offset += advance;

        let sender_sub_id = if flags & FLAG_SENDER_SUB_ID != 0 {
            let (value, advance) = read_component(&buf[offset..])?;
            offset += advance;
            Some(value)
        } else {
            None
        };

        let sender_location_id = if flags & FLAG_SENDER_LOCATION_ID != 0 {
            let (value, advance) = read_component(&buf[offset..])?;
            offset += advance;
            Some(value)
        } else {
            None
        };

        let (target_comp_id, _advance) = read_component(&buf[offset..])?;

        Ok(CompositeKey {
            sender_comp_id,
            sender_sub_id,
            sender_location_id,
            target_comp_id,
        })
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.sender_comp_id, self.target_comp_id)?;
        if let Some(sub_id) = &self.sender_sub_id {
            write!(f, " (sub={sub_id})")?;
        }
        if let Some(location_id) = &self.sender_location_id {
            write!(f, " (loc={location_id})")?;
        }
        Ok(())
    }
}

const FLAG_SENDER_SUB_ID: u8 = 0b01;
const FLAG_SENDER_LOCATION_ID: u8 = 0b10;

fn write_component(buf: &mut [u8], value: &AsciiString) -> usize {
    let len = value.len() as u16;
    buf[0..2].copy_from_slice(&len.to_le_bytes());
    buf[2..2 + value.len()].copy_from_slice(value.as_bytes());
    2 + value.len()
}

fn read_component(buf: &[u8]) -> Result<(AsciiString, usize), CompositeKeyError> {
    if buf.len() < 2 {
        return Err(CompositeKeyError::Truncated);
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let data = buf
        .get(2..2 + len)
        .ok_or(CompositeKeyError::Truncated)?
        .to_vec();
    let value = AsciiString::from_ascii(data)?;
    Ok((value, 2 + len))
}

#[derive(Debug, thiserror::Error)]
pub enum CompositeKeyError {
    #[error("buffer too small to encode composite key: needed {needed}, available {available}")]
    InsufficientSpace { needed: usize, available: usize },
    #[error("composite key buffer truncated")]
    Truncated,
    #[error("composite key component is not ASCII: {0}")]
    NotAscii(#[from] AsciiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(sender: &str, target: &str) -> CompositeKey {
        CompositeKey::new(
            AsciiString::try_from(sender).unwrap(),
            AsciiString::try_from(target).unwrap(),
        )
    }

    #[test]
    fn round_trips_minimal_key() {
        let k = key("SENDER", "TARGET");
        let mut buf = vec![0u8; k.encoded_len()];
        let written = k.encode(&mut buf).unwrap();
        assert_eq!(written, buf.len());
        let decoded = CompositeKey::decode(&buf).unwrap();
        assert_eq!(decoded, k);
    }

    #[test]
    fn round_trips_full_key() {
        let k = key("SENDER", "TARGET")
            .with_sender_sub_id(AsciiString::try_from("SUB1").unwrap())
            .with_sender_location_id(AsciiString::try_from("LOC1").unwrap());
        let mut buf = vec![0u8; k.encoded_len()];
        k.encode(&mut buf).unwrap();
        let decoded = CompositeKey::decode(&buf).unwrap();
        assert_eq!(decoded, k);
        assert_eq!(decoded.sender_sub_id().unwrap(), "SUB1");
    }

    #[test]
    fn encode_fails_when_buffer_too_small() {
        let k = key("SENDER", "TARGET");
        let mut buf = vec![0u8; k.encoded_len() - 1];
        let err = k.encode(&mut buf).unwrap_err();
        assert!(matches!(err, CompositeKeyError::InsufficientSpace { .. }));
        // The buffer must not have been partially written into on failure.
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn reverse_swaps_sender_and_target() {
        let k = key("A", "B");
        let reversed = k.clone().reverse();
        assert_eq!(reversed.sender_comp_id(), k.target_comp_id());
        assert_eq!(reversed.target_comp_id(), k.sender_comp_id());
    }
}
