/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] pipelink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] pipelink_frame::FrameError),

    /// TLV construction or decoding error.
    #[error("tlv error: {0}")]
    Tlv(#[from] pipelink_tlv::TlvError),

    /// The handshake frame was missing or malformed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// `connect` was called on a channel that is already connected.
    #[error("channel is already connected")]
    AlreadyConnected,

    /// `connect` was called on a channel that has been closed.
    #[error("channel has been closed")]
    Closed,

    /// The channel is not active; no I/O was attempted.
    #[error("channel is not active")]
    Inactive,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
