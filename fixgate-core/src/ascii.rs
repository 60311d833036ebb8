use std::{borrow, fmt, mem, ops};

/// An owned, validated ASCII byte string.
///
/// Used throughout the gateway for wire-level identifiers (CompTIDs,
/// usernames, TestReqIDs, ...) where allocating a `String` and re-validating
/// UTF-8 on every access would be wasteful: FIX and ILink3 payloads are
/// ASCII by construction, so validation happens once at the edge.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AsciiString(Vec<u8>);

/// Borrowed counterpart of [`AsciiString`], analogous to `str`/`String`.
#[derive(Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct AsciiStr([u8]);

#[derive(Debug, thiserror::Error)]
#[error("unexpected byte {value:#04x} at index {idx}")]
pub struct AsciiError {
    idx: usize,
    value: u8,
}

fn validate(buf: &[u8]) -> Result<(), AsciiError> {
    for (idx, &value) in buf.iter().enumerate() {
        if !value.is_ascii() {
            return Err(AsciiError { idx, value });
        }
    }
    Ok(())
}

impl AsciiStr {
    pub fn from_ascii(buf: &[u8]) -> Result<&AsciiStr, AsciiError> {
        validate(buf)?;
        Ok(unsafe { AsciiStr::from_ascii_unchecked(buf) })
    }

    /// # Safety
    /// `buf` must contain only ASCII bytes.
    pub unsafe fn from_ascii_unchecked(buf: &[u8]) -> &AsciiStr {
        // SAFETY: `&AsciiStr` and `&[u8]` share layout (repr(transparent)).
        unsafe { mem::transmute(buf) }
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: ASCII is always valid UTF-8.
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AsciiStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl fmt::Debug for AsciiStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsciiStr({self})")
    }
}

impl ToOwned for AsciiStr {
    type Owned = AsciiString;

    fn to_owned(&self) -> AsciiString {
        unsafe { AsciiString::from_ascii_unchecked(self.as_bytes().to_owned()) }
    }
}

impl PartialEq<str> for AsciiStr {
    fn eq(&self, other: &str) -> bool {
        self.0 == *other.as_bytes()
    }
}

impl PartialEq<&str> for AsciiStr {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other.as_bytes()
    }
}

impl AsciiString {
    pub fn new() -> AsciiString {
        AsciiString(Vec::new())
    }

    pub fn from_ascii(buf: Vec<u8>) -> Result<AsciiString, AsciiError> {
        validate(&buf)?;
        Ok(AsciiString(buf))
    }

    /// # Safety
    /// `buf` must contain only ASCII bytes.
    pub unsafe fn from_ascii_unchecked(buf: Vec<u8>) -> AsciiString {
        AsciiString(buf)
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: ASCII is always valid UTF-8.
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AsciiString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl fmt::Debug for AsciiString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsciiString({self})")
    }
}

impl ops::Deref for AsciiString {
    type Target = AsciiStr;

    fn deref(&self) -> &AsciiStr {
        unsafe { AsciiStr::from_ascii_unchecked(&self.0) }
    }
}

impl borrow::Borrow<AsciiStr> for AsciiString {
    fn borrow(&self) -> &AsciiStr {
        self
    }
}

impl AsRef<[u8]> for AsciiString {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&AsciiStr> for AsciiString {
    fn from(value: &AsciiStr) -> AsciiString {
        value.to_owned()
    }
}

impl TryFrom<&str> for AsciiString {
    type Error = AsciiError;

    fn try_from(value: &str) -> Result<AsciiString, AsciiError> {
        AsciiString::from_ascii(value.as_bytes().to_owned())
    }
}

impl TryFrom<String> for AsciiString {
    type Error = AsciiError;

    fn try_from(value: String) -> Result<AsciiString, AsciiError> {
        AsciiString::from_ascii(value.into_bytes())
    }
}

impl PartialEq<str> for AsciiString {
    fn eq(&self, other: &str) -> bool {
        self.0 == *other.as_bytes()
    }
}

impl PartialEq<&str> for AsciiString {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other.as_bytes()
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use super::AsciiString;
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for AsciiString {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(self.as_str())
        }
    }

    impl<'de> Deserialize<'de> for AsciiString {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<AsciiString, D::Error> {
            let s = String::deserialize(deserializer)?;
            AsciiString::try_from(s).map_err(de::Error::custom)
        }
    }
}
