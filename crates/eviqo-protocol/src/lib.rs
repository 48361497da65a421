//! Binary frame codec for the vendor EV-charger WebSocket protocol.
//!
//! This crate is intentionally small (only `serde`/`serde_json`/`thiserror`).
//! It owns:
//! - the frame header shapes and opcode table (§4.1)
//! - widget-update / command payload encoding (§3, §4.1)

mod error;
mod frame;
mod opcode;
mod widget;

pub use error::ProtocolError;
pub use frame::{Codec, DecodedFrame, DecodedPayload, Direction, Payload};
pub use opcode::Opcode;
pub use widget::{encode_command, parse_widget_update, WidgetUpdate};
