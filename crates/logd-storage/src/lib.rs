//! Path layout, sequence allocation, and the append-only diff/snapshot/
//! transaction-log store that backs LogD. Operates entirely on
//! already-encoded text; tree semantics live in `logd-core`/`logd-wire`.

mod atomic;
mod error;
mod model;
mod path;
mod sequence;
mod store;

pub use error::{Error, Result};
pub use model::{
    DiffFileRecord, SnapshotFileRecord, TransactionLogEntryRecord, TransactionStateRecord,
    TransactionStatus, TransactionWriteRecord, TxEntryRecord,
};
pub use path::{PathLayout, VirtualPath};
pub use sequence::{CommitCount, SeqState, SequenceAllocator, TxSeq};
pub use store::Storage;
