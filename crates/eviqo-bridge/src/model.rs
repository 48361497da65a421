//! Wire-shaped types decoded from DEVICE_QUERY and DEVICE_PAGE responses
//! (§3). Fields the bridge never reads are still accepted — `#[serde(default)]`
//! everywhere optional, no `deny_unknown_fields` — since the vendor page is
//! a living document, not a contract.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct HardwareInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub build: String,
}

/// One entry from the DEVICE_QUERY response.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    #[serde(rename = "deviceId")]
    pub device_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "productName")]
    pub product_name: String,
    #[serde(default, rename = "hardwareInfo")]
    pub hardware_info: Option<HardwareInfo>,
}

/// Response envelope for DEVICE_QUERY (`{docType:"DEVICE", ...}` response).
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceQueryResponse {
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Visualization {
    #[serde(default)]
    pub value: String,
}

/// One telemetry/control channel ("widget" / "stream") on a device.
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayDataStream {
    pub id: i64,
    pub pin: String,
    pub name: String,
    #[serde(default)]
    pub visualization: Visualization,
    #[serde(default)]
    pub units: Option<String>,
}

impl Default for Visualization {
    fn default() -> Self {
        Self { value: String::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Module {
    #[serde(default, rename = "displayDataStreams")]
    pub display_data_streams: Vec<DisplayDataStream>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Widget {
    #[serde(default)]
    pub modules: Vec<Module>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dashboard {
    #[serde(default)]
    pub widgets: Vec<Widget>,
}

/// The full DEVICE_PAGE response for one device.
#[derive(Debug, Clone, Deserialize)]
pub struct DevicePage {
    pub dashboard: Dashboard,
}

impl DevicePage {
    /// Flatten `dashboard -> widgets[] -> modules[] -> displayDataStreams[]`
    /// into a single iterator, the shape [`crate::registry::WidgetRegistry`]
    /// is built from.
    pub fn streams(&self) -> impl Iterator<Item = &DisplayDataStream> {
        self.dashboard
            .widgets
            .iter()
            .flat_map(|w| w.modules.iter())
            .flat_map(|m| m.display_data_streams.iter())
    }
}
