use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::atomic::atomic_write;
use crate::error::{IoContext, Result};

/// Both counters are masked to 56 bits, reserving the top byte
/// (`spec.md` §4.2: "masked to 56 bits to reserve headroom").
pub const SEQ_MASK: u64 = (1u64 << 56) - 1;

macro_rules! seq_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            pub fn zero() -> Self {
                $name(0)
            }

            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

seq_newtype!(CommitCount);
seq_newtype!(TxSeq);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqState {
    pub commit_count: CommitCount,
    pub tx_seq: TxSeq,
}

/// Owns the single 16-byte `meta/seq` file (`spec.md` §4.2/§6): two 56-bit
/// little-endian counters, `commitCount` then `txSeq`. Every mutation goes
/// through `inner`, a single process-wide mutex, matching §5's "Sequence
/// counters: guarded by a single mutex around the on-disk 16-byte file."
pub struct SequenceAllocator {
    file: PathBuf,
    inner: Mutex<SeqState>,
}

impl SequenceAllocator {
    pub fn open(file: impl Into<PathBuf>) -> Result<Self> {
        let file = file.into();
        let state = read_or_init(&file)?;
        Ok(SequenceAllocator { file, inner: Mutex::new(state) })
    }

    pub fn current(&self) -> SeqState {
        *self.inner.lock().unwrap()
    }

    pub fn next_tx_seq(&self) -> Result<TxSeq> {
        let mut guard = self.inner.lock().unwrap();
        let next = TxSeq((guard.tx_seq.0 + 1) & SEQ_MASK);
        guard.tx_seq = next;
        persist(&self.file, *guard)?;
        tracing::debug!(tx_seq = next.0, "allocated txSeq");
        Ok(next)
    }

    pub fn next_commit_count(&self) -> Result<CommitCount> {
        let mut guard = self.inner.lock().unwrap();
        let next = CommitCount((guard.commit_count.0 + 1) & SEQ_MASK);
        guard.commit_count = next;
        persist(&self.file, *guard)?;
        tracing::debug!(commit_count = next.0, "allocated commitCount");
        Ok(next)
    }

    /// Used only by startup recovery (`spec.md` §4.3 step 3): raises the
    /// persisted counters to at least `commit_count`/`tx_seq` without
    /// otherwise disturbing monotonicity.
    pub fn reconcile(&self, commit_count: CommitCount, tx_seq: TxSeq) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let changed = commit_count > guard.commit_count || tx_seq > guard.tx_seq;
        guard.commit_count = guard.commit_count.max(commit_count);
        guard.tx_seq = guard.tx_seq.max(tx_seq);
        if changed {
            persist(&self.file, *guard)?;
            tracing::warn!(
                commit_count = guard.commit_count.0,
                tx_seq = guard.tx_seq.0,
                "reconciled sequence state during recovery"
            );
        }
        Ok(())
    }
}

fn read_or_init(path: &Path) -> Result<SeqState> {
    match File::open(path) {
        Ok(mut f) => {
            let mut buf = [0u8; 16];
            f.read_exact(&mut buf).ctx(path)?;
            Ok(decode(&buf))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let state = SeqState { commit_count: CommitCount::zero(), tx_seq: TxSeq::zero() };
            persist(path, state)?;
            Ok(state)
        }
        Err(e) => Err(e).ctx(path),
    }
}

fn decode(buf: &[u8; 16]) -> SeqState {
    let commit_count = u64::from_le_bytes(buf[0..8].try_into().unwrap()) & SEQ_MASK;
    let tx_seq = u64::from_le_bytes(buf[8..16].try_into().unwrap()) & SEQ_MASK;
    SeqState { commit_count: CommitCount(commit_count), tx_seq: TxSeq(tx_seq) }
}

fn encode(state: SeqState) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[0..8].copy_from_slice(&state.commit_count.0.to_le_bytes());
    buf[8..16].copy_from_slice(&state.tx_seq.0.to_le_bytes());
    buf
}

fn persist(path: &Path, state: SeqState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ctx(parent)?;
    }
    atomic_write(path, &encode(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = SequenceAllocator::open(dir.path().join("seq")).unwrap();
        assert_eq!(alloc.next_tx_seq().unwrap().0, 1);
        assert_eq!(alloc.next_tx_seq().unwrap().0, 2);
        assert_eq!(alloc.next_commit_count().unwrap().0, 1);
        assert_eq!(alloc.next_tx_seq().unwrap().0, 3);
        assert_eq!(alloc.current().commit_count.0, 1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seq");
        {
            let alloc = SequenceAllocator::open(&path).unwrap();
            alloc.next_tx_seq().unwrap();
            alloc.next_commit_count().unwrap();
        }
        let reopened = SequenceAllocator::open(&path).unwrap();
        assert_eq!(reopened.current().tx_seq.0, 1);
        assert_eq!(reopened.current().commit_count.0, 1);
    }

    #[test]
    fn reconcile_only_raises() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = SequenceAllocator::open(dir.path().join("seq")).unwrap();
        alloc.next_commit_count().unwrap();
        alloc.reconcile(CommitCount(5), TxSeq(2)).unwrap();
        assert_eq!(alloc.current().commit_count.0, 5);
        alloc.reconcile(CommitCount(1), TxSeq(1)).unwrap();
        assert_eq!(alloc.current().commit_count.0, 5, "reconcile must never lower the counter");
    }
}
