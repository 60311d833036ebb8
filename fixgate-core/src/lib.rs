//! Leaf types shared by the codec and session layers of the gateway:
//! an injectable [`Clock`], a validated [`AsciiString`]/[`AsciiStr`] pair,
//! and the [`CompositeKey`] that identifies a logical session across
//! reconnections.

pub mod ascii;
pub mod clock;
pub mod composite_key;

pub use ascii::{AsciiStr, AsciiString};
pub use clock::{Clock, SystemClock, TestClock};
pub use composite_key::{CompositeKey, CompositeKeyError};
