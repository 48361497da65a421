//! Opcodes observed on the vendor WebSocket (`wss://app.eviqo.io/dashws`).

/// First header byte. Values not listed here are passed through as
/// [`Opcode::Unknown`] rather than rejected — the vendor service has been
/// observed to use opcodes this client never sends or needs to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// LOGIN (outbound)
    Login,
    /// DEVICE_PAGE (outbound)
    DevicePage,
    /// KEEPALIVE (outbound) / ack (inbound)
    Keepalive,
    /// Outbound write / inbound widget update (directional disambiguation
    /// is the caller's job — see [`crate::frame::decode_frame`]).
    WidgetWriteOrUpdate,
    /// User-driven widget update (inbound only)
    WidgetUpdateUserDriven,
    /// DEVICE_QUERY (outbound)
    DeviceQuery,
    /// INIT (outbound, optional)
    Init,
    /// DEVICE_NUMBER (outbound)
    DeviceNumber,
    /// Anything else.
    Unknown(u8),
}

impl Opcode {
    pub const LOGIN: u8 = 0x02;
    pub const DEVICE_PAGE: u8 = 0x04;
    pub const KEEPALIVE: u8 = 0x06;
    pub const WIDGET_WRITE_OR_UPDATE: u8 = 0x14;
    pub const WIDGET_UPDATE_USER_DRIVEN: u8 = 0x19;
    pub const DEVICE_QUERY: u8 = 0x1B;
    pub const INIT: u8 = 0x30;
    pub const DEVICE_NUMBER: u8 = 0x49;

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::LOGIN => Opcode::Login,
            Self::DEVICE_PAGE => Opcode::DevicePage,
            Self::KEEPALIVE => Opcode::Keepalive,
            Self::WIDGET_WRITE_OR_UPDATE => Opcode::WidgetWriteOrUpdate,
            Self::WIDGET_UPDATE_USER_DRIVEN => Opcode::WidgetUpdateUserDriven,
            Self::DEVICE_QUERY => Opcode::DeviceQuery,
            Self::INIT => Opcode::Init,
            Self::DEVICE_NUMBER => Opcode::DeviceNumber,
            other => Opcode::Unknown(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            Opcode::Login => Self::LOGIN,
            Opcode::DevicePage => Self::DEVICE_PAGE,
            Opcode::Keepalive => Self::KEEPALIVE,
            Opcode::WidgetWriteOrUpdate => Self::WIDGET_WRITE_OR_UPDATE,
            Opcode::WidgetUpdateUserDriven => Self::WIDGET_UPDATE_USER_DRIVEN,
            Opcode::DeviceQuery => Self::DEVICE_QUERY,
            Opcode::Init => Self::INIT,
            Opcode::DeviceNumber => Self::DEVICE_NUMBER,
            Opcode::Unknown(b) => *b,
        }
    }

    /// True for the two opcodes that classify as the widget-update family
    /// when inbound (§4.1). `0x14` is ambiguous — it is also the outbound
    /// write opcode — so this is only meaningful for frames read off the
    /// socket, never for frames this client builds itself.
    pub fn is_widget_update_family(&self) -> bool {
        matches!(self.as_byte(), Self::WIDGET_WRITE_OR_UPDATE | Self::WIDGET_UPDATE_USER_DRIVEN)
    }
}
