//! Length-prefixed message framing for pipelink.
//!
//! Every message on the stream is framed as a 4-byte little-endian payload
//! length followed by that many payload bytes. There is no magic prefix,
//! no version field, and no checksum; the stream is a pure concatenation
//! of frames. No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, LEN_PREFIX_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
