//! Typed, length-delimited binary values for the pipelink protocol.
//!
//! A [`Tlv`] is a self-describing tree node: either a leaf carrying opaque
//! bytes or a parent carrying child nodes grouped by child type. Every node
//! encodes as:
//! - A 1-byte header: parent flag in the high bit, 7-bit type code below it
//! - A 4-byte little-endian value length
//! - The value: raw payload for a leaf, concatenated child encodings for a
//!   parent
//!
//! Decoding is strict: lengths are bounds-checked before anything is copied,
//! at every recursion level.

pub mod error;
pub mod node;

pub use error::{Result, TlvError};
pub use node::{Tlv, HEADER_SIZE, MAX_NESTING_DEPTH, PARENT_FLAG, TYPE_MASK};
