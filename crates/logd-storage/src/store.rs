use std::fs;
use std::io::{BufRead, BufReader};
use std::sync::Mutex;

use crate::atomic::{atomic_rename, atomic_write, write_pending};
use crate::error::{Error, IoContext, Result};
use crate::model::{
    DiffFileRecord, SnapshotFileRecord, TransactionLogEntryRecord, TransactionStateRecord,
    TransactionStatus,
};
use crate::path::{PathLayout, VirtualPath};
use crate::sequence::{CommitCount, SequenceAllocator, TxSeq};

/// The append-only, file-backed diff store (`spec.md` §4). Owns the path
/// layout, the sequence allocator, and a single mutex serializing appends
/// to `meta/transactions.log` -- every other write is independent per
/// virtual path and needs no cross-path coordination.
pub struct Storage {
    layout: PathLayout,
    sequence: SequenceAllocator,
    log_lock: Mutex<()>,
}

impl Storage {
    /// Opens (creating if absent) a store rooted at `root`, then runs
    /// startup recovery (`spec.md` §4.3).
    pub fn open(root: impl Into<std::path::PathBuf>) -> Result<Self> {
        let layout = PathLayout::new(root);
        fs::create_dir_all(layout.root()).ctx(layout.root())?;
        fs::create_dir_all(layout.paths_root()).ctx(layout.paths_root())?;
        fs::create_dir_all(layout.meta_dir()).ctx(layout.meta_dir())?;
        fs::create_dir_all(layout.transactions_dir()).ctx(layout.transactions_dir())?;
        let sequence = SequenceAllocator::open(layout.seq_file())?;
        let storage = Storage { layout, sequence, log_lock: Mutex::new(()) };
        storage.recover()?;
        Ok(storage)
    }

    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }

    pub fn sequence(&self) -> &SequenceAllocator {
        &self.sequence
    }

    // -- diff files -------------------------------------------------------

    /// Writes a fully-formed `{txSeq}.pending` file for `path`. Returns the
    /// txSeq used so the caller (the transaction coordinator) can rename it
    /// on commit.
    pub fn write_diff_pending(
        &self,
        path: &VirtualPath,
        tx_seq: TxSeq,
        timestamp: i64,
        diff_body: &str,
    ) -> Result<()> {
        let record = DiffFileRecord { path: path.as_str().to_string(), timestamp, diff: diff_body.to_string() };
        let body = serde_json::to_vec(&record)
            .map_err(|e| Error::Corrupt { path: self.pending_file(path, tx_seq), reason: e.to_string() })?;
        write_pending(&self.pending_file(path, tx_seq), &body)
    }

    /// Renames `{txSeq}.pending` to `{commitCount}-{txSeq}.diff`, the final
    /// step of a committed write (`spec.md` §4.3/§5).
    pub fn rename_pending_to_diff(
        &self,
        path: &VirtualPath,
        tx_seq: TxSeq,
        commit_count: CommitCount,
    ) -> Result<()> {
        atomic_rename(&self.pending_file(path, tx_seq), &self.diff_file(path, commit_count, tx_seq))
    }

    /// Removes an orphaned `{txSeq}.pending` file left behind by an aborted
    /// or never-completed transaction.
    pub fn remove_pending(&self, path: &VirtualPath, tx_seq: TxSeq) -> Result<()> {
        let file = self.pending_file(path, tx_seq);
        match fs::remove_file(&file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).ctx(file),
        }
    }

    /// Inverse of `rename_pending_to_diff`, used to unwind a partially
    /// completed commit when a later rename in the same batch fails
    /// (`spec.md` §4.4 step 2: "if any rename fails, unwind by renaming
    /// completed ones back to `.pending`").
    pub fn rename_diff_to_pending(
        &self,
        path: &VirtualPath,
        commit_count: CommitCount,
        tx_seq: TxSeq,
    ) -> Result<()> {
        atomic_rename(&self.diff_file(path, commit_count, tx_seq), &self.pending_file(path, tx_seq))
    }

    /// Lists every committed diff for `path` in ascending commit order.
    pub fn list_diffs(&self, path: &VirtualPath) -> Result<Vec<(CommitCount, TxSeq)>> {
        let dir = self.layout.paths_dir(path);
        let mut out = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e).ctx(dir),
        };
        for entry in entries {
            let entry = entry.ctx(&dir)?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stripped) = name.strip_suffix(".diff") {
                if let Some((commit, tx)) = stripped.split_once('-') {
                    if let (Ok(commit), Ok(tx)) = (commit.parse::<u64>(), tx.parse::<u64>()) {
                        out.push((CommitCount(commit), TxSeq(tx)));
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn read_diff(
        &self,
        path: &VirtualPath,
        commit_count: CommitCount,
        tx_seq: TxSeq,
    ) -> Result<DiffFileRecord> {
        let file = self.diff_file(path, commit_count, tx_seq);
        let bytes = fs::read(&file).ctx(&file)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Corrupt { path: file, reason: e.to_string() })
    }

    fn pending_file(&self, path: &VirtualPath, tx_seq: TxSeq) -> std::path::PathBuf {
        self.layout.paths_dir(path).join(format!("{tx_seq}.pending"))
    }

    fn diff_file(&self, path: &VirtualPath, commit_count: CommitCount, tx_seq: TxSeq) -> std::path::PathBuf {
        self.layout.paths_dir(path).join(format!("{commit_count}-{tx_seq}.diff"))
    }

    // -- snapshots ----------------------------------------------------------

    pub fn write_snapshot(&self, path: &VirtualPath, commit_count: CommitCount, timestamp: i64, state: &str) -> Result<()> {
        let record = SnapshotFileRecord { commit_count: commit_count.get(), timestamp, state: state.to_string() };
        let file = self.snapshot_file(path, commit_count);
        let body = serde_json::to_vec(&record).map_err(|e| Error::Corrupt { path: file.clone(), reason: e.to_string() })?;
        atomic_write(&file, &body)
    }

    pub fn read_snapshot(&self, path: &VirtualPath, commit_count: CommitCount) -> Result<SnapshotFileRecord> {
        let file = self.snapshot_file(path, commit_count);
        let bytes = fs::read(&file).ctx(&file)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Corrupt { path: file, reason: e.to_string() })
    }

    /// Returns the snapshot with the greatest `commit_count <= max_commit_count`,
    /// if any (`spec.md` §4.4's snapshot-accelerated reconstruction).
    pub fn find_nearest_snapshot(
        &self,
        path: &VirtualPath,
        max_commit_count: CommitCount,
    ) -> Result<Option<SnapshotFileRecord>> {
        let dir = self.layout.snapshots_dir(path);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).ctx(dir),
        };
        let mut best: Option<CommitCount> = None;
        for entry in entries {
            let entry = entry.ctx(&dir)?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stripped) = name.strip_suffix(".snapshot") {
                if let Ok(commit) = stripped.parse::<u64>() {
                    let commit = CommitCount(commit);
                    if commit <= max_commit_count && best.map(|b| commit > b).unwrap_or(true) {
                        best = Some(commit);
                    }
                }
            }
        }
        match best {
            Some(commit) => Ok(Some(self.read_snapshot(path, commit)?)),
            None => Ok(None),
        }
    }

    fn snapshot_file(&self, path: &VirtualPath, commit_count: CommitCount) -> std::path::PathBuf {
        self.layout.snapshots_dir(path).join(format!("{commit_count}.snapshot"))
    }

    // -- transaction log ------------------------------------------------

    /// Appends one line to `meta/transactions.log`. Serialized by
    /// `log_lock` so concurrent commits never interleave partial lines.
    pub fn append_transaction_log(&self, entry: &TransactionLogEntryRecord) -> Result<()> {
        let _guard = self.log_lock.lock().unwrap();
        let file = self.layout.transaction_log_file();
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).ctx(parent)?;
        }
        let mut line = serde_json::to_vec(entry)
            .map_err(|e| Error::Corrupt { path: file.clone(), reason: e.to_string() })?;
        line.push(b'\n');
        use std::io::Write;
        let mut f = fs::OpenOptions::new().create(true).append(true).open(&file).ctx(&file)?;
        f.write_all(&line).ctx(&file)?;
        f.sync_all().ctx(&file)?;
        Ok(())
    }

    /// Linear scan for the log entry at `commit_count`. The log is small
    /// relative to path data and read only at recovery/lookup time, so this
    /// favors simplicity over an index (`spec.md` §4.3 leaves indexing
    /// unspecified).
    pub fn transaction_log_lookup(&self, commit_count: CommitCount) -> Result<Option<TransactionLogEntryRecord>> {
        for entry in self.read_transaction_log()? {
            if entry.commit_count == commit_count.get() {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub fn read_transaction_log(&self) -> Result<Vec<TransactionLogEntryRecord>> {
        let file = self.layout.transaction_log_file();
        let f = match fs::File::open(&file) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).ctx(file),
        };
        let reader = BufReader::new(f);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line.ctx(&file)?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TransactionLogEntryRecord = serde_json::from_str(&line)
                .map_err(|e| Error::Corrupt { path: file.clone(), reason: e.to_string() })?;
            out.push(entry);
        }
        Ok(out)
    }

    // -- transaction state ------------------------------------------------

    pub fn write_transaction_state(&self, record: &TransactionStateRecord) -> Result<()> {
        let file = self.transaction_state_file(&record.transaction_id);
        let body = serde_json::to_vec(record).map_err(|e| Error::Corrupt { path: file.clone(), reason: e.to_string() })?;
        atomic_write(&file, &body)
    }

    pub fn read_transaction_state(&self, transaction_id: &str) -> Result<TransactionStateRecord> {
        let file = self.transaction_state_file(transaction_id);
        let bytes = match fs::read(&file) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::TransactionStateNotFound(transaction_id.to_string()))
            }
            Err(e) => return Err(e).ctx(file),
        };
        serde_json::from_slice(&bytes).map_err(|e| Error::Corrupt { path: file, reason: e.to_string() })
    }

    pub fn delete_transaction_state(&self, transaction_id: &str) -> Result<()> {
        let file = self.transaction_state_file(transaction_id);
        match fs::remove_file(&file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).ctx(file),
        }
    }

    pub fn list_transaction_states(&self) -> Result<Vec<TransactionStateRecord>> {
        let dir = self.layout.transactions_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).ctx(dir),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.ctx(&dir)?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(".json") {
                let bytes = fs::read(entry.path()).ctx(entry.path())?;
                let record: TransactionStateRecord = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Corrupt { path: entry.path(), reason: e.to_string() })?;
                out.push(record);
            }
        }
        Ok(out)
    }

    fn transaction_state_file(&self, transaction_id: &str) -> std::path::PathBuf {
        self.layout.transactions_dir().join(format!("{transaction_id}.json"))
    }

    // -- startup recovery -------------------------------------------------

    /// `spec.md` §4.3's three-step recovery, run once at `open`:
    ///
    /// 1. Every log entry's diffs must already be `.diff` files; a
    ///    matching `.pending` file left behind by a crash mid-rename is
    ///    completed (renamed into place) rather than discarded, because
    ///    the log already recorded the commit as real.
    /// 2. Any persisted transaction state not reflected in the log belongs
    ///    to a transaction that never finished committing. Since this is a
    ///    single-process store and every restart is a cold start, such
    ///    transactions cannot still have a live coordinator waiting on
    ///    them, so they are demoted: their pending diff files are removed
    ///    and the state file deleted.
    /// 3. Any `.diff` file whose commitCount never appears in the log is
    ///    suspect (a rename that completed without a log append). It is
    ///    demoted back to `.pending` so a future transaction can reclaim
    ///    or discard it, and the sequence counters are reconciled upward
    ///    to at least the highest commitCount/txSeq observed on disk so
    ///    allocation never reuses a number that already appears in a
    ///    filename.
    fn recover(&self) -> Result<()> {
        let log = self.read_transaction_log()?;
        let mut max_commit = CommitCount::zero();
        let mut max_tx_seq = TxSeq::zero();

        for entry in &log {
            max_commit = max_commit.max(CommitCount(entry.commit_count));
            for write in &entry.writes {
                max_tx_seq = max_tx_seq.max(TxSeq(write.tx_seq));
                let path = VirtualPath::parse(&write.virtual_path)?;
                let pending = self.pending_file(&path, TxSeq(write.tx_seq));
                let committed = self.diff_file(&path, CommitCount(entry.commit_count), TxSeq(write.tx_seq));
                if pending.exists() && !committed.exists() {
                    tracing::warn!(path = %path, commit_count = entry.commit_count, "completing interrupted commit rename");
                    atomic_rename(&pending, &committed)?;
                }
            }
        }

        let committed_ids: std::collections::HashSet<&str> =
            log.iter().map(|e| e.transaction_id.as_str()).collect();
        for state in self.list_transaction_states()? {
            if state.status == TransactionStatus::Pending && !committed_ids.contains(state.transaction_id.as_str()) {
                tracing::warn!(transaction_id = %state.transaction_id, "demoting orphaned transaction on startup");
                for tx_entry in &state.entries {
                    let path = VirtualPath::parse(&tx_entry.virtual_path)?;
                    let tx_seq: u64 = tx_entry
                        .pending_file
                        .strip_suffix(".pending")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0);
                    self.remove_pending(&path, TxSeq(tx_seq))?;
                }
                self.delete_transaction_state(&state.transaction_id)?;
            }
        }

        self.demote_unlogged_diffs(&log, &mut max_commit, &mut max_tx_seq)?;
        self.sequence.reconcile(max_commit, max_tx_seq)?;
        Ok(())
    }

    fn demote_unlogged_diffs(
        &self,
        log: &[TransactionLogEntryRecord],
        max_commit: &mut CommitCount,
        max_tx_seq: &mut TxSeq,
    ) -> Result<()> {
        let logged_commits: std::collections::HashSet<u64> = log.iter().map(|e| e.commit_count).collect();
        let dir = self.layout.paths_root();
        if !dir.exists() {
            return Ok(());
        }
        for entry in walk_dirs(&dir)? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stripped) = name.strip_suffix(".diff") {
                if let Some((commit, tx)) = stripped.split_once('-') {
                    if let (Ok(commit), Ok(tx)) = (commit.parse::<u64>(), tx.parse::<u64>()) {
                        *max_commit = (*max_commit).max(CommitCount(commit));
                        *max_tx_seq = (*max_tx_seq).max(TxSeq(tx));
                        if !logged_commits.contains(&commit) {
                            let demoted = entry.path().with_file_name(format!("{tx}.pending"));
                            tracing::warn!(file = %entry.path().display(), "demoting unlogged diff file");
                            atomic_rename(&entry.path(), &demoted)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn walk_dirs(root: &std::path::Path) -> Result<Vec<fs::DirEntry>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).ctx(&dir)? {
            let entry = entry.ctx(&dir)?;
            let file_type = entry.file_type().ctx(entry.path())?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else {
                out.push(entry);
            }
        }
    }
    Ok(out)
}
