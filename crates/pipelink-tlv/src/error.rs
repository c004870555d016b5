/// Errors that can occur constructing, encoding, or decoding TLV nodes.
#[derive(Debug, thiserror::Error)]
pub enum TlvError {
    /// The type code does not fit in the 7-bit type space.
    #[error("type code {0:#04x} exceeds the 7-bit type space")]
    InvalidType(u8),

    /// The node's encoded size would not fit in a u32.
    #[error("encoded size exceeds u32 range")]
    Oversize,

    /// A child was appended to a leaf node.
    #[error("node {type_code:#04x} is a leaf and cannot hold children")]
    NotParent { type_code: u8 },

    /// A payload accessor was called on a parent node.
    #[error("node {type_code:#04x} is a parent and has no payload")]
    NotLeaf { type_code: u8 },

    /// The input ended before the announced value did.
    #[error("truncated input ({available} bytes, need {needed})")]
    Truncated { needed: usize, available: usize },

    /// The input nests deeper than the decoder allows.
    #[error("nesting depth exceeds {max} levels")]
    DepthExceeded { max: usize },

    /// A typed accessor found a payload of the wrong width.
    #[error("payload is {actual} bytes, accessor needs {expected}")]
    Width { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, TlvError>;
