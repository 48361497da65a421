use thiserror::Error;

/// Codec-level failures. These are always recoverable — a single malformed
/// frame must never raise into the session read loop (§4.2 "Failure
/// semantics").
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame shorter than header length ({len} bytes)")]
    ShortFrame { len: usize },

    #[error("payload looked like JSON but failed to parse: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("malformed widget-update record: {hex}")]
    MalformedWidgetUpdate { hex: String },
}
