//! Protocol message and child type codes.
//!
//! Codes occupy the 7-bit TLV type space; the high bit of the wire header
//! byte is the parent flag, not part of the code. The set below is
//! exhaustive for the current protocol — roles treat anything else as
//! unrecognized.

/// Host → listener: unsolicited callback carrying a data child.
pub const CALLBACK: u8 = 0x20;

/// Listener ⇄ host: metadata request and its response.
pub const METADATA_REQUEST: u8 = 0x21;

/// Listener ⇄ host: outbound-data request and its response.
pub const OUTBOUND_REQUEST: u8 = 0x22;

/// Listener → host: freshly received upstream data, no response expected.
pub const NEW_DATA_PUSH: u8 = 0x23;

/// Command → host: execution result payload.
pub const RESULT: u8 = 0x30;

/// Command → host: execution configuration (parent node).
pub const CONFIG: u8 = 0x31;

/// Command → host: execution error payload.
pub const ERROR_REPORT: u8 = 0x32;

/// Command → host: execution finished successfully, no payload.
pub const RETURN_SUCCESS: u8 = 0x33;

/// Command → host: execution failed, no payload.
pub const RETURN_FAILED: u8 = 0x34;

/// Host → command: new data payload for the running execution.
pub const NEW_DATA: u8 = 0x39;

/// Host → command: stop the running execution.
pub const STOP: u8 = 0x3F;

/// Child: request command selector (one byte).
pub const CHILD_SELECTOR: u8 = 0x01;

/// Child: request sequence number (4-byte little-endian integer).
pub const CHILD_SEQUENCE: u8 = 0x02;

/// Child of [`CONFIG`]: stop-wait interval in milliseconds (4-byte
/// little-endian integer).
pub const CHILD_STOP_WAIT: u8 = 0x03;

/// Child: data payload of a callback or a response.
pub const CHILD_DATA: u8 = 0x04;

/// Child of [`CONFIG`]: ongoing-result flag (one byte, boolean).
pub const CHILD_ONGOING: u8 = 0x01;

/// Selector payload requesting a fetch.
pub const SELECTOR_FETCH: u8 = 0x01;

/// Returns a human-readable name for a message type code.
pub fn message_name(code: u8) -> &'static str {
    match code {
        CALLBACK => "CALLBACK",
        METADATA_REQUEST => "METADATA_REQUEST",
        OUTBOUND_REQUEST => "OUTBOUND_REQUEST",
        NEW_DATA_PUSH => "NEW_DATA_PUSH",
        RESULT => "RESULT",
        CONFIG => "CONFIG",
        ERROR_REPORT => "ERROR_REPORT",
        RETURN_SUCCESS => "RETURN_SUCCESS",
        RETURN_FAILED => "RETURN_FAILED",
        NEW_DATA => "NEW_DATA",
        STOP => "STOP",
        _ => "UNKNOWN",
    }
}

/// Returns true for the listener request codes that carry a sequence
/// number and expect a correlated response.
pub fn is_correlated_request(code: u8) -> bool {
    matches!(code, METADATA_REQUEST | OUTBOUND_REQUEST)
}
