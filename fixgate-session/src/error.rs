use fixgate_core::CompositeKeyError;

/// Errors raised by a single session's state machine.
///
/// Mirrors the teacher's split of `Error`/`SessionError` into a focused
/// per-layer enum rather than one catch-all type.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),
    #[error("timed out waiting for peer reply: {0}")]
    Timeout(String),
    #[error("transport closed unexpectedly")]
    TransportFault,
    #[error("peer terminated with unexpected uuid {0}")]
    InvalidUuid(u64),
    #[error(transparent)]
    CompositeKey(#[from] CompositeKeyError),
    #[error(transparent)]
    Fix(#[from] fixgate_codec::fix::FixCodecError),
    #[error(transparent)]
    Ilink3(#[from] fixgate_codec::ilink3::Ilink3CodecError),
    #[error(transparent)]
    SequenceStore(#[from] crate::error::SequenceStoreError),
    #[error(transparent)]
    Retransmit(#[from] crate::error::RetransmitError),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no session registered for this connection")]
    UnknownSession,
    #[error("a session is already bound for this key and host profile")]
    DuplicateConnection,
    #[error("session is still active; disconnect or logout it first")]
    SessionActive,
}

#[derive(Debug, thiserror::Error)]
pub enum SequenceStoreError {
    #[error("i/o error persisting sequence state: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    CompositeKey(#[from] CompositeKeyError),
    #[error("sequence file is corrupt or truncated")]
    Corrupt,
}

#[derive(Debug, thiserror::Error)]
pub enum RetransmitError {
    #[error("a retransmit request is already in flight for this session")]
    AlreadyInFlight,
    #[error("a NotApplied resolution is already draining for this session")]
    IllegalState,
}
