//! Session layer for the FIX and ILink3 protocol families: logon/negotiate
//! handshakes, heartbeating/keepalive, sequence policing, gap detection and
//! retransmission, graceful termination, and durable reconnection.
//!
//! Built as a cooperative, single-threaded poll loop (§5 of the design
//! notes this crate was built against) rather than an async runtime: every
//! session exposes `poll(now_ms) -> progress` and there are no suspension
//! points inside it. `fixgate-codec` supplies the wire formats;
//! `fixgate-core` supplies the shared leaf types (clock, ASCII strings,
//! composite key).

pub mod application;
pub mod engine;
pub mod error;
pub mod fix;
pub mod ilink3;
pub mod publication;
pub mod registry;
pub mod retransmit;
pub mod sequence_state;
pub mod sequence_store;
pub mod settings;

pub use application::{ApplicationHandler, DisconnectReason, NotAppliedResolution, NullHandler};
pub use error::{RegistryError, RetransmitError, SequenceStoreError, SessionError};
pub use fix::FixSession;
pub use ilink3::Ilink3Session;
pub use publication::{ClaimedSlot, LoopbackPublication, Publication};
pub use registry::{ConnectionId, SessionHandle, SessionRegistry};
pub use retransmit::RetransmitEngine;
pub use sequence_state::SequenceState;
pub use sequence_store::{FileSequenceStore, InMemorySequenceStore, SequenceStore};
pub use settings::{EngineSettings, SessionSettings};
