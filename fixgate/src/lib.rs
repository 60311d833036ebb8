//! Facade crate re-exporting the gateway's layers behind feature gates,
//! mirroring the teacher's `easyfix` facade (`codegen`/`dictionary`/
//! `session` features composing the underlying crates).

pub use fixgate_core as core;
pub use fixgate_codec as codec;

#[cfg(feature = "session")]
pub use fixgate_session as session;
