//! Deserializable session configuration, mirroring the shape (if not the
//! exact field set) of the teacher's `Settings`/`SessionSettings` split: one
//! struct of defaults shared by every session on an engine, one struct of
//! per-session overrides.

use std::path::PathBuf;

#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub heartbeat_interval_ms: u64,
    pub keep_alive_interval_ms: u64,
    pub reply_timeout_ms: u64,
    pub negotiate_timeout_ms: u64,
    pub retransmit_batch_max: u32,
    pub reasonable_transmission_time_ms: u64,
    pub sending_time_window_ms: u64,
    pub log_file_dir: PathBuf,
}

/// ILink3 caps `keep_alive_interval_ms` below this; CME's published bound.
pub const KEEP_ALIVE_INTERVAL_MAX_MS: u64 = 30_000;

impl Default for EngineSettings {
    fn default() -> EngineSettings {
        EngineSettings {
            heartbeat_interval_ms: 30_000,
            keep_alive_interval_ms: 5_000,
            reply_timeout_ms: 5_000,
            negotiate_timeout_ms: 10_000,
            retransmit_batch_max: 2_500,
            reasonable_transmission_time_ms: 2_000,
            sending_time_window_ms: 60_000,
            log_file_dir: PathBuf::from("./sequence-store"),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, Default)]
pub struct SessionSettings {
    pub reset_seq_num: bool,
    pub re_establish_last_connection: bool,
    pub use_backup_host: bool,
    pub check_comp_id: bool,
    pub verify_logout: bool,
}
