/// Per-session sequence bookkeeping, persisted by the [`crate::sequence_store`].
///
/// `uuid`/`last_uuid` are only meaningful for ILink3 sessions (FIX sessions
/// leave them at zero); `sequence_index` is only bumped by FIX sequence
/// resets. Both protocols share one struct because the Sequence Store keys
/// and persists them identically.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequenceState {
    pub next_sent_seq_no: u64,
    pub next_recv_seq_no: u64,
    pub sequence_index: u32,
    pub uuid: u64,
    pub last_uuid: u64,
}

impl SequenceState {
    pub fn fresh() -> SequenceState {
        SequenceState {
            next_sent_seq_no: 1,
            next_recv_seq_no: 1,
            sequence_index: 0,
            uuid: 0,
            last_uuid: 0,
        }
    }

    /// Byte length of [`SequenceState::encode`]'s output. Fixed-width, so
    /// the file-backed store can read it without a length prefix.
    pub const ENCODED_LEN: usize = 8 * 4 + 4;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.next_sent_seq_no.to_le_bytes());
        out.extend_from_slice(&self.next_recv_seq_no.to_le_bytes());
        out.extend_from_slice(&self.sequence_index.to_le_bytes());
        out.extend_from_slice(&self.uuid.to_le_bytes());
        out.extend_from_slice(&self.last_uuid.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Option<SequenceState> {
        if buf.len() < SequenceState::ENCODED_LEN {
            return None;
        }
        let next_sent_seq_no = u64::from_le_bytes(buf[0..8].try_into().ok()?);
        let next_recv_seq_no = u64::from_le_bytes(buf[8..16].try_into().ok()?);
        let sequence_index = u32::from_le_bytes(buf[16..20].try_into().ok()?);
        let uuid = u64::from_le_bytes(buf[20..28].try_into().ok()?);
        let last_uuid = u64::from_le_bytes(buf[28..36].try_into().ok()?);
        Some(SequenceState {
            next_sent_seq_no,
            next_recv_seq_no,
            sequence_index,
            uuid,
            last_uuid,
        })
    }

    /// Advances to a new `sequence_index`/`uuid` epoch, as happens on a FIX
    /// `ResetSeqNumFlag` logon or an ILink3 reconnect with a fresh uuid.
    pub fn reset_epoch(&mut self, new_uuid: u64) {
        self.last_uuid = self.uuid;
        self.uuid = new_uuid;
        self.sequence_index += 1;
        self.next_sent_seq_no = 1;
        self.next_recv_seq_no = 1;
    }
}
