//! The wire-format interface `spec.md` §1 leaves external: a `TreeCodec`
//! trait and one concrete JSON-backed implementation.

mod codec;
mod error;
mod json;

pub use codec::TreeCodec;
pub use error::{Error, Result};
pub use json::JsonTreeCodec;
