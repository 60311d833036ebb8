//! Durable key→[`SequenceState`] storage, plus a raw-message replay
//! side-table used by FIX resend fulfilment and ILink3 NotApplied/Retransmit
//! resolution.
//!
//! Grounded on the teacher's `MessagesStorage` trait and its
//! `NullStorage`/`InMemoryStorage` pair: [`InMemorySequenceStore`] plays the
//! same role as `InMemoryStorage`, and [`FileSequenceStore`] generalizes it
//! to a crash-safe on-disk representation the teacher didn't need (its
//! transport already assumed an external durable log).

use std::{
    collections::{BTreeMap, HashMap},
    hash::{Hash, Hasher},
    io,
    ops::RangeInclusive,
    path::{Path, PathBuf},
};

use fixgate_core::CompositeKey;

use crate::{error::SequenceStoreError, sequence_state::SequenceState};

pub trait SequenceStore {
    fn load(&self, key: &CompositeKey) -> Result<Option<SequenceState>, SequenceStoreError>;
    fn save(&mut self, key: &CompositeKey, state: SequenceState) -> Result<(), SequenceStoreError>;
    fn reset(&mut self, key: &CompositeKey) -> Result<(), SequenceStoreError>;

    fn store_raw(&mut self, key: &CompositeKey, seq_no: u64, bytes: &[u8]) -> Result<(), SequenceStoreError>;
    fn fetch_raw_range(
        &self,
        key: &CompositeKey,
        range: RangeInclusive<u64>,
    ) -> Result<Vec<(u64, Vec<u8>)>, SequenceStoreError>;
}

/// In-process store for tests and the bundled demo. No persistence across
/// restart.
#[derive(Default)]
pub struct InMemorySequenceStore {
    states: HashMap<CompositeKey, SequenceState>,
    raw: HashMap<CompositeKey, BTreeMap<u64, Vec<u8>>>,
}

impl InMemorySequenceStore {
    pub fn new() -> InMemorySequenceStore {
        InMemorySequenceStore::default()
    }
}

impl SequenceStore for InMemorySequenceStore {
    fn load(&self, key: &CompositeKey) -> Result<Option<SequenceState>, SequenceStoreError> {
        Ok(self.states.get(key).copied())
    }

    fn save(&mut self, key: &CompositeKey, state: SequenceState) -> Result<(), SequenceStoreError> {
        self.states.insert(key.clone(), state);
        Ok(())
    }

    fn reset(&mut self, key: &CompositeKey) -> Result<(), SequenceStoreError> {
        self.states.remove(key);
        self.raw.remove(key);
        Ok(())
    }

    fn store_raw(&mut self, key: &CompositeKey, seq_no: u64, bytes: &[u8]) -> Result<(), SequenceStoreError> {
        self.raw
            .entry(key.clone())
            .or_default()
            .insert(seq_no, bytes.to_vec());
        Ok(())
    }

    fn fetch_raw_range(
        &self,
        key: &CompositeKey,
        range: RangeInclusive<u64>,
    ) -> Result<Vec<(u64, Vec<u8>)>, SequenceStoreError> {
        Ok(self
            .raw
            .get(key)
            .map(|m| {
                m.range(range)
                    .map(|(seq, bytes)| (*seq, bytes.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// One file per `hash(CompositeKey)` under `dir`. Each file's content is a
/// length-prefixed `CompositeKey` encoding followed by the fixed-width
/// [`SequenceState`] fields. Writes land in a `.tmp` sibling, then
/// `fs::rename` over the final path, so a crash mid-write never corrupts
/// the previously committed state.
pub struct FileSequenceStore {
    dir: PathBuf,
    raw_dir: PathBuf,
}

impl FileSequenceStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<FileSequenceStore, SequenceStoreError> {
        let dir = dir.into();
        let raw_dir = dir.join("raw");
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(&raw_dir)?;
        Ok(FileSequenceStore { dir, raw_dir })
    }

    fn path_for(&self, key: &CompositeKey) -> PathBuf {
        self.dir.join(format!("{:016x}.seq", hash_key(key)))
    }

    fn raw_path_for(&self, key: &CompositeKey) -> PathBuf {
        self.raw_dir.join(format!("{:016x}.log", hash_key(key)))
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)
    }
}

fn hash_key(key: &CompositeKey) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn encode_keyed_state(key: &CompositeKey, state: SequenceState) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + key.encoded_len() + SequenceState::ENCODED_LEN);
    let key_len = key.encoded_len() as u16;
    buf.extend_from_slice(&key_len.to_le_bytes());
    let mut key_buf = vec![0u8; key.encoded_len()];
    key.encode(&mut key_buf).expect("buffer sized from encoded_len");
    buf.extend_from_slice(&key_buf);
    state.encode(&mut buf);
    buf
}

fn decode_keyed_state(buf: &[u8]) -> Result<(CompositeKey, SequenceState), SequenceStoreError> {
    if buf.len() < 2 {
        return Err(SequenceStoreError::Corrupt);
    }
    let key_len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let key_buf = buf.get(2..2 + key_len).ok_or(SequenceStoreError::Corrupt)?;
    let key = CompositeKey::decode(key_buf)?;
    let state_buf = &buf[2 + key_len..];
    let state = SequenceState::decode(state_buf).ok_or(SequenceStoreError::Corrupt)?;
    Ok((key, state))
}

impl SequenceStore for FileSequenceStore {
    fn load(&self, key: &CompositeKey) -> Result<Option<SequenceState>, SequenceStoreError> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(decode_keyed_state(&bytes)?.1)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&mut self, key: &CompositeKey, state: SequenceState) -> Result<(), SequenceStoreError> {
        let bytes = encode_keyed_state(key, state);
        FileSequenceStore::write_atomic(&self.path_for(key), &bytes)?;
        Ok(())
    }

    fn reset(&mut self, key: &CompositeKey) -> Result<(), SequenceStoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) | Err(_) => {}
        }
        match std::fs::remove_file(self.raw_path_for(key)) {
            Ok(()) | Err(_) => {}
        }
        Ok(())
    }

    fn store_raw(&mut self, key: &CompositeKey, seq_no: u64, bytes: &[u8]) -> Result<(), SequenceStoreError> {
        use std::io::Write;
        let path = self.raw_path_for(key);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(&seq_no.to_le_bytes())?;
        file.write_all(&(bytes.len() as u32).to_le_bytes())?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn fetch_raw_range(
        &self,
        key: &CompositeKey,
        range: RangeInclusive<u64>,
    ) -> Result<Vec<(u64, Vec<u8>)>, SequenceStoreError> {
        let path = self.raw_path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut out = Vec::new();
        let mut pos = 0;
        while pos + 12 <= bytes.len() {
            let seq_no = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
            let len = u32::from_le_bytes(bytes[pos + 8..pos + 12].try_into().unwrap()) as usize;
            pos += 12;
            let payload = bytes.get(pos..pos + len).ok_or(SequenceStoreError::Corrupt)?;
            if range.contains(&seq_no) {
                out.push((seq_no, payload.to_vec()));
            }
            pos += len;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixgate_core::AsciiString;

    fn key() -> CompositeKey {
        CompositeKey::new(
            AsciiString::try_from("SNDR").unwrap(),
            AsciiString::try_from("TRGT").unwrap(),
        )
    }

    #[test]
    fn in_memory_round_trips() {
        let mut store = InMemorySequenceStore::new();
        let k = key();
        assert_eq!(store.load(&k).unwrap(), None);
        let state = SequenceState::fresh();
        store.save(&k, state).unwrap();
        assert_eq!(store.load(&k).unwrap(), Some(state));
        store.reset(&k).unwrap();
        assert_eq!(store.load(&k).unwrap(), None);
    }

    #[test]
    fn in_memory_raw_range_is_ordered_and_bounded() {
        let mut store = InMemorySequenceStore::new();
        let k = key();
        for seq in 1..=10u64 {
            store.store_raw(&k, seq, format!("msg{seq}").as_bytes()).unwrap();
        }
        let range = store.fetch_raw_range(&k, 3..=5).unwrap();
        assert_eq!(range.iter().map(|(s, _)| *s).collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("fixgate-seqstore-test-{:x}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let k = key();
        {
            let mut store = FileSequenceStore::open(&dir).unwrap();
            store
                .save(
                    &k,
                    SequenceState {
                        next_sent_seq_no: 5,
                        next_recv_seq_no: 6,
                        sequence_index: 1,
                        uuid: 9,
                        last_uuid: 0,
                    },
                )
                .unwrap();
            store.store_raw(&k, 1, b"hello").unwrap();
        }
        {
            let store = FileSequenceStore::open(&dir).unwrap();
            let state = store.load(&k).unwrap().unwrap();
            assert_eq!(state.next_sent_seq_no, 5);
            let raw = store.fetch_raw_range(&k, 1..=1).unwrap();
            assert_eq!(raw, vec![(1, b"hello".to_vec())]);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
