//! Domain error types (§7). `thiserror` at every module boundary — callers
//! branch on the failure kind (`main`'s exit code, the supervisor's
//! reconnect-vs-fatal decision), so a typed enum carries more than a
//! string would.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect: {0}")]
    ConnectFailed(String),
    #[error("authentication failed")]
    AuthFailed,
    #[error("timed out waiting for a response")]
    Timeout,
    #[error("the session is closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(#[from] eviqo_protocol::ProtocolError),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command for pin {pin} on device {device_id} was rejected")]
    Rejected { device_id: String, pin: String },
    #[error("no widget registered for pin {0}")]
    UnknownPin(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}
