//! Widget-update and command payload shapes (§3, §4.1).
//!
//! Both share the record `deviceId \0 "vw" \0 pin \0 value`. The `"vw"`
//! literal marks the record as a virtual-write; `pin` is the charger's
//! runtime id for the widget, not the widget's database id.

use crate::error::ProtocolError;
use crate::frame::{Codec, Payload};

const VIRTUAL_WRITE_MARKER: &str = "vw";

/// A parsed widget-update record. `widget_id` holds the `pin` field —
/// named to match `parseWidgetUpdate`'s documented output shape in §8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetUpdate {
    pub device_id: String,
    pub widget_id: String,
    pub widget_value: String,
}

/// Parse a `deviceId\0"vw"\0pin\0value` record. Malformed records return a
/// `MalformedWidgetUpdate` carrying a hex dump for diagnostics — callers
/// (the session read loop) log and drop these, they must never panic or
/// bubble up as a fatal error (§4.2).
pub fn parse_widget_update(bytes: &[u8]) -> Result<WidgetUpdate, ProtocolError> {
    let malformed = || ProtocolError::MalformedWidgetUpdate { hex: to_hex(bytes) };

    let text = std::str::from_utf8(bytes).map_err(|_| malformed())?;
    let mut fields = text.split('\0');

    let device_id = fields.next().ok_or_else(malformed)?;
    let marker = fields.next().ok_or_else(malformed)?;
    let pin = fields.next().ok_or_else(malformed)?;
    let value = fields.next().ok_or_else(malformed)?;

    if marker != VIRTUAL_WRITE_MARKER {
        return Err(malformed());
    }

    Ok(WidgetUpdate {
        device_id: device_id.to_string(),
        widget_id: pin.to_string(),
        widget_value: value.to_string(),
    })
}

/// Encode an outbound command frame (opcode `0x14`, no trailing NUL).
pub fn encode_command(device_id: &str, pin: &str, value: &str, msg_id: u16, codec: &Codec) -> Vec<u8> {
    let payload = format!("{device_id}\0{VIRTUAL_WRITE_MARKER}\0{pin}\0{value}");
    codec.encode_frame(crate::opcode::Opcode::WIDGET_WRITE_OR_UPDATE, msg_id, Payload::Text(&payload))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_golden_widget_update() {
        let update = parse_widget_update(b"89349\0vw\05\0241.29").unwrap();
        assert_eq!(update.device_id, "89349");
        assert_eq!(update.widget_id, "5");
        assert_eq!(update.widget_value, "241.29");
    }

    #[test]
    fn rejects_missing_marker() {
        let err = parse_widget_update(b"89349\0xx\05\0241.29").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedWidgetUpdate { .. }));
    }

    #[test]
    fn rejects_truncated_record() {
        let err = parse_widget_update(b"89349\0vw").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedWidgetUpdate { .. }));
    }

    #[test]
    fn encode_command_has_no_trailing_nul() {
        let codec = Codec::compact();
        let frame = encode_command("51627", "3", "32", 0x00BB, &codec);
        assert!(!frame.ends_with(&[0u8]));
    }
}
