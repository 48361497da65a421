//! Per-device widget registry (§4.3): maps from the device page's
//! `displayDataStreams` into lookups by database id, by name, and by pin
//! (the id used in outbound commands and inbound widget updates).

use std::collections::HashMap;

use tracing::warn;

use crate::model::{DevicePage, DisplayDataStream};

#[derive(Debug, Clone)]
pub struct WidgetEntry {
    pub id: i64,
    pub pin: String,
    pub name: String,
    pub value: String,
    pub units: Option<String>,
}

impl From<&DisplayDataStream> for WidgetEntry {
    fn from(stream: &DisplayDataStream) -> Self {
        Self {
            id: stream.id,
            pin: stream.pin.clone(),
            name: stream.name.clone(),
            value: stream.visualization.value.clone(),
            units: stream.units.clone(),
        }
    }
}

/// Lookup tables for one device's widgets. Duplicate pins or names are
/// tolerated: the last stream wins and a warning is logged, since the
/// vendor page has been observed to occasionally repeat entries (§4.3).
#[derive(Debug, Clone, Default)]
pub struct WidgetRegistry {
    by_id: HashMap<i64, WidgetEntry>,
    by_name: HashMap<String, WidgetEntry>,
    by_pin: HashMap<String, WidgetEntry>,
}

impl WidgetRegistry {
    pub fn from_page(device_id: i64, page: &DevicePage) -> Self {
        let mut registry = Self::default();

        for stream in page.streams() {
            let entry = WidgetEntry::from(stream);

            if registry.by_id.contains_key(&entry.id) {
                warn!(device_id, widget_id = entry.id, "duplicate widget id, last wins");
            }
            if registry.by_name.contains_key(&entry.name) {
                warn!(device_id, widget_name = %entry.name, "duplicate widget name, last wins");
            }
            if registry.by_pin.contains_key(&entry.pin) {
                warn!(device_id, widget_pin = %entry.pin, "duplicate widget pin, last wins");
            }

            registry.by_id.insert(entry.id, entry.clone());
            registry.by_name.insert(entry.name.clone(), entry.clone());
            registry.by_pin.insert(entry.pin.clone(), entry);
        }

        registry
    }

    pub fn by_id(&self, id: i64) -> Option<&WidgetEntry> {
        self.by_id.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&WidgetEntry> {
        self.by_name.get(name)
    }

    pub fn by_pin(&self, pin: &str) -> Option<&WidgetEntry> {
        self.by_pin.get(pin)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Apply an inbound widget update, updating the cached value in all
    /// three maps. Returns the updated entry's current state, or `None` if
    /// the pin is unknown (caller logs and drops it, §4.3 edge case).
    pub fn apply_update(&mut self, pin: &str, value: &str) -> Option<WidgetEntry> {
        let entry = self.by_pin.get(pin)?.clone();
        let mut updated = entry;
        updated.value = value.to_string();

        self.by_id.insert(updated.id, updated.clone());
        self.by_name.insert(updated.name.clone(), updated.clone());
        self.by_pin.insert(updated.pin.clone(), updated.clone());

        Some(updated)
    }

    pub fn values(&self) -> impl Iterator<Item = &WidgetEntry> {
        self.by_id.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dashboard, Module, Visualization, Widget};

    fn page_with_streams(streams: Vec<DisplayDataStream>) -> DevicePage {
        DevicePage {
            dashboard: Dashboard {
                widgets: vec![Widget {
                    modules: vec![Module { display_data_streams: streams }],
                }],
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
    fn builds_one_entry_per_distinct_pin_and_id() {
        let page = page_with_streams(vec![
            stream(1, "3", "Status", "1"),
            stream(2, "5", "Current", "32"),
            stream(3, "15", "Charging", "0"),
        ]);
        let registry = WidgetRegistry::from_page(89349, &page);
        assert_eq!(registry.len(), 3);
        assert!(registry.by_pin("3").is_some());
        assert!(registry.by_pin("5").is_some());
        assert!(registry.by_pin("15").is_some());
    }

    #[test]
    fn duplicate_pin_keeps_last_entry() {
        let page = page_with_streams(vec![
            stream(1, "3", "Status", "1"),
            stream(2, "3", "Status2", "2"),
        ]);
        let registry = WidgetRegistry::from_page(89349, &page);
        assert_eq!(registry.len(), 2);
        let entry = registry.by_pin("3").unwrap();
        assert_eq!(entry.id, 2);
        assert_eq!(entry.name, "Status2");
    }

    #[test]
    fn apply_update_refreshes_all_maps() {
        let page = page_with_streams(vec![stream(1, "5", "Current", "32")]);
        let mut registry = WidgetRegistry::from_page(89349, &page);
        let updated = registry.apply_update("5", "48").unwrap();
        assert_eq!(updated.value, "48");
        assert_eq!(registry.by_id(1).unwrap().value, "48");
        assert_eq!(registry.by_name("Current").unwrap().value, "48");
    }

    #[test]
    fn apply_update_on_unknown_pin_returns_none() {
        let page = page_with_streams(vec![stream(1, "5", "Current", "32")]);
        let mut registry = WidgetRegistry::from_page(89349, &page);
        assert!(registry.apply_update("99", "1").is_none());
    }
}
