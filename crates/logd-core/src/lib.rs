//! Tree & diff kernel: the in-memory tagged-union tree LogD's diffs operate
//! on, and the `patch`/`diff` functions that give diffs their meaning.
//!
//! Everything outside this crate treats a [`Node`] as an opaque, clonable
//! value; the textual encode/parse codec, schema validation, and
//! Go-struct-reflection mapping a production deployment would also have are
//! out of scope here and live behind the [`logd-wire`](../logd_wire)
//! interface instead.

pub mod diff;
pub mod error;
pub mod node;
pub mod patch;
pub mod tag;

pub use diff::diff;
pub use error::{Error, PathSegment, PathTrace, Result};
pub use node::{CommentBody, FieldKey, Node, NumberValue, ObjectValue, StringValue, Value};
pub use patch::patch;
pub use tag::{Tag, TagComponent};
