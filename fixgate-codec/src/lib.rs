//! Wire codecs for the two session protocols the gateway speaks.
//!
//! Each submodule is a narrow, hand-written codec covering exactly the
//! session-administration message set the framer needs to drive its state
//! machine (see [`fix`] and [`ilink3`]); any other message type is passed
//! through as an opaque payload so a caller's own business-message
//! dictionary can sit on top without this crate generating code for it.

pub mod fix;
pub mod ilink3;
