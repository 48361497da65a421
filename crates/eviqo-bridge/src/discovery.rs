//! Home Assistant MQTT discovery (§4.4). Discovery documents are built as
//! plain `serde_json::Value`s — see DESIGN.md for why this crate does not
//! reach for a generated-entity-type discovery crate.

use serde_json::{json, Value};

use crate::registry::{WidgetEntry, WidgetRegistry};

pub const DEFAULT_CURRENT_MAX: f64 = 48.0;

pub struct WidgetMapping {
    pub widget_name: &'static str,
    pub topic_id: Option<&'static str>,
    pub device_class: Option<&'static str>,
    pub unit: Option<&'static str>,
}

/// Streams whose `name` is listed here get a `sensor` discovery document.
pub static WIDGET_MAPPINGS: &[WidgetMapping] = &[
    WidgetMapping { widget_name: "Status", topic_id: Some("status"), device_class: None, unit: None },
    WidgetMapping { widget_name: "Voltage", topic_id: Some("voltage"), device_class: Some("voltage"), unit: Some("V") },
    WidgetMapping { widget_name: "Current", topic_id: Some("current"), device_class: Some("current"), unit: Some("A") },
    WidgetMapping { widget_name: "Power", topic_id: Some("power"), device_class: Some("power"), unit: Some("W") },
    WidgetMapping { widget_name: "Energy", topic_id: Some("energy"), device_class: Some("energy"), unit: Some("kWh") },
    WidgetMapping { widget_name: "Temperature", topic_id: Some("temperature"), device_class: Some("temperature"), unit: Some("°C") },
];

/// Streams whose `name` is listed here additionally get a `number` entity
/// and a command topic (§4.4, §4.5's "Direct" command class).
pub static CONTROLLABLE_WIDGETS: &[&str] = &["Current"];

fn mapping_for(name: &str) -> Option<&'static WidgetMapping> {
    WIDGET_MAPPINGS.iter().find(|m| m.widget_name == name)
}

/// §4.4's `entityId` rule: the mapping's `topic_id`, else the widget name
/// slugified.
pub fn entity_id(name: &str) -> String {
    match mapping_for(name).and_then(|m| m.topic_id) {
        Some(id) => id.to_string(),
        None => slugify(name),
    }
}

fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

pub fn discovery_topic(discovery_prefix: &str, component: &str, device_id: i64, entity_id: &str) -> String {
    format!("{discovery_prefix}/{component}/eviqo_{device_id}/{entity_id}/config")
}

pub fn state_topic(topic_prefix: &str, device_id: i64, entity_id: &str) -> String {
    format!("{topic_prefix}/{device_id}/{entity_id}/state")
}

pub fn command_topic(topic_prefix: &str, device_id: i64, entity_id: &str) -> String {
    format!("{topic_prefix}/{device_id}/{entity_id}/set")
}

pub fn availability_topic(topic_prefix: &str, device_id: i64) -> String {
    format!("{topic_prefix}/{device_id}/status")
}

/// `Status` raw values `{"0","1","2","3"}` -> human-readable state (§4.4).
pub fn status_to_human(raw: &str) -> &'static str {
    match raw {
        "0" => "unplugged",
        "1" => "plugged",
        "2" => "charging",
        "3" => "stopped",
        _ => "unknown",
    }
}

/// `Status == "2"` drives the companion `charging/state` topic.
pub fn status_is_charging(raw: &str) -> bool {
    raw == "2"
}

fn device_block(device_id: i64, device_name: &str) -> Value {
    json!({
        "identifiers": [format!("eviqo_{device_id}")],
        "name": device_name,
        "manufacturer": "eviqo",
    })
}

/// One (topic, payload, retain) publish the bridge should make.
pub struct Publish {
    pub topic: String,
    pub payload: Value,
    pub retain: bool,
}

/// Build every discovery document for one device's widget registry, plus
/// the connectivity binary_sensor and charging switch documents that are
/// always published regardless of what the registry contains.
pub fn build_discovery(
    discovery_prefix: &str,
    topic_prefix: &str,
    device_id: i64,
    device_name: &str,
    registry: &WidgetRegistry,
) -> Vec<Publish> {
    let mut publishes = Vec::new();
    let device = device_block(device_id, device_name);
    let availability = availability_topic(topic_prefix, device_id);

    for entry in registry.values() {
        let Some(mapping) = mapping_for(&entry.name) else { continue };
        let id = entity_id(&entry.name);
        let state = state_topic(topic_prefix, device_id, &id);

        let mut sensor = json!({
            "name": entry.name,
            "unique_id": format!("eviqo_{device_id}_{id}"),
            "state_topic": state,
            "availability_topic": availability,
            "device": device,
        });
        if let Some(device_class) = mapping.device_class {
            sensor["device_class"] = json!(device_class);
        }
        if let Some(unit) = mapping.unit {
            sensor["unit_of_measurement"] = json!(unit);
        }
        publishes.push(Publish {
            topic: discovery_topic(discovery_prefix, "sensor", device_id, &id),
            payload: sensor,
            retain: true,
        });

        if CONTROLLABLE_WIDGETS.contains(&entry.name.as_str()) {
            let command = command_topic(topic_prefix, device_id, &id);
            let max = current_max(registry);
            let number = json!({
                "name": entry.name,
                "unique_id": format!("eviqo_{device_id}_{id}_control"),
                "state_topic": state,
                "command_topic": command,
                "availability_topic": availability,
                "device_class": "current",
                "unit_of_measurement": "A",
                "min": 0,
                "max": max,
                "step": 1,
                "mode": "slider",
                "device": device,
            });
            publishes.push(Publish {
                topic: discovery_topic(discovery_prefix, "number", device_id, &id),
                payload: number,
                retain: true,
            });
        }
    }

    let connectivity_state = state_topic(topic_prefix, device_id, "connectivity");
    publishes.push(Publish {
        topic: discovery_topic(discovery_prefix, "binary_sensor", device_id, "connectivity"),
        payload: json!({
            "name": "Connectivity",
            "unique_id": format!("eviqo_{device_id}_connectivity"),
            "state_topic": connectivity_state,
            "device_class": "connectivity",
            "payload_on": "ON",
            "payload_off": "OFF",
            "availability_topic": availability,
            "device": device,
        }),
        retain: true,
    });

    let charging_state = state_topic(topic_prefix, device_id, "charging");
    let charging_command = command_topic(topic_prefix, device_id, "charging");
    publishes.push(Publish {
        topic: discovery_topic(discovery_prefix, "switch", device_id, "charging"),
        payload: json!({
            "name": "Charging",
            "unique_id": format!("eviqo_{device_id}_charging"),
            "state_topic": charging_state,
            "command_topic": charging_command,
            "payload_on": "ON",
            "payload_off": "OFF",
            "availability_topic": availability,
            "device": device,
        }),
        retain: true,
    });

    publishes
}

/// §4.4's `Current` number-entity maximum: the `Current max` widget's value
/// if present and > 0, else [`DEFAULT_CURRENT_MAX`].
pub fn current_max(registry: &WidgetRegistry) -> f64 {
    registry
        .by_name("Current max")
        .and_then(|entry: &WidgetEntry| entry.value.parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .unwrap_or(DEFAULT_CURRENT_MAX)
}

/// Every discovery topic this bridge has ever published for a device,
/// including the legacy pre-switch `binary_sensor` charging spelling, for
/// `--remove-discovery` (§4.4's retain policy / §8's removal property).
pub fn all_discovery_topics(discovery_prefix: &str, topic_prefix: &str, device_id: i64, registry: &WidgetRegistry) -> Vec<String> {
    let _ = topic_prefix;
    let mut topics = Vec::new();

    for entry in registry.values() {
        let Some(_mapping) = mapping_for(&entry.name) else { continue };
        let id = entity_id(&entry.name);
        topics.push(discovery_topic(discovery_prefix, "sensor", device_id, &id));
        if CONTROLLABLE_WIDGETS.contains(&entry.name.as_str()) {
            topics.push(discovery_topic(discovery_prefix, "number", device_id, &id));
        }
    }

    topics.push(discovery_topic(discovery_prefix, "binary_sensor", device_id, "connectivity"));
    topics.push(discovery_topic(discovery_prefix, "switch", device_id, "charging"));
    // Legacy spelling, from before Charging was moved from a binary_sensor
    // to a switch entity.
    topics.push(discovery_topic(discovery_prefix, "binary_sensor", device_id, "charging"));

    topics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dashboard, DevicePage, DisplayDataStream, Module, Visualization, Widget};

    fn page_with(streams: Vec<DisplayDataStream>) -> DevicePage {
        DevicePage {
            dashboard: Dashboard {
                widgets: vec![Widget { modules: vec![Module { display_data_streams: streams }] }],
            },
        }
    }

    fn stream(id: i64, pin: &str, name: &str, value: &str) -> DisplayDataStream {
        DisplayDataStream {
            id,
            pin: pin.to_string(),
            name: name.to_string(),
            visualization: Visualization { value: value.to_string() },
            units: None,
        }
    }

    #[test]
    fn status_translation_and_switch_mirroring() {
        assert_eq!(status_to_human("2"), "charging");
        assert!(status_is_charging("2"));
        assert_eq!(status_to_human("1"), "plugged");
        assert!(!status_is_charging("1"));
    }

    #[test]
    fn current_max_falls_back_to_default() {
        let page = page_with(vec![stream(1, "3", "Current", "32")]);
        let registry = WidgetRegistry::from_page(1, &page);
        assert_eq!(current_max(&registry), DEFAULT_CURRENT_MAX);
    }

    #[test]
    fn current_max_uses_widget_when_positive() {
        let page = page_with(vec![
            stream(1, "3", "Current", "32"),
            stream(2, "4", "Current max", "40"),
        ]);
        let registry = WidgetRegistry::from_page(1, &page);
        assert_eq!(current_max(&registry), 40.0);
    }

    #[test]
    fn entity_id_falls_back_to_slug() {
        assert_eq!(entity_id("Status"), "status");
        assert_eq!(entity_id("Odd  Name!!"), "odd_name");
    }

    #[test]
    fn removal_includes_legacy_binary_sensor_topic() {
        let page = page_with(vec![stream(1, "3", "Current", "32")]);
        let registry = WidgetRegistry::from_page(42, &page);
        let topics = all_discovery_topics("homeassistant", "eviqo", 42, &registry);
        assert!(topics.contains(&"homeassistant/binary_sensor/eviqo_42/charging/config".to_string()));
        assert!(topics.contains(&"homeassistant/switch/eviqo_42/charging/config".to_string()));
    }
}
