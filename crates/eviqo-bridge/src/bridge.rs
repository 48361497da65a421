//! The bridge / supervisor (§4.5): composition, lifecycle, command routing,
//! telemetry routing, status tracking, reconnection. `BridgeState` is
//! touched only from this module's own task, per §5's "Shared resources"
//! rule — mirroring the teacher's `DaemonState` fields being owned by the
//! task that owns the corresponding I/O endpoint.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::discovery::{self, Publish};
use crate::error::{CommandError, SessionError};
use crate::model::Device;
use crate::mqtt::{InboundPublish, Mqtt};
use crate::registry::WidgetRegistry;
use crate::session::{SessionClient, SessionEvent, SessionState};

const RECONNECT_DELAY: Duration = Duration::from_secs(30);
const CHARGING_PIN: &str = "15";
const CHARGING_SEQUENCE_GAP: Duration = Duration::from_millis(250);

/// Forward command map (command topic -> (deviceId, pin)), reverse map
/// ((deviceId, pin) -> state topic), and the per-device status cache (§3).
#[derive(Default)]
pub struct BridgeState {
    devices: Vec<Device>,
    registries: HashMap<i64, WidgetRegistry>,
    device_status: HashMap<i64, String>,
    command_topics: HashMap<String, (i64, String)>,
    state_topics: HashMap<(i64, String), String>,
    charging_command_topics: HashMap<String, i64>,
    charging_state_topics: HashMap<i64, String>,
}

pub struct Bridge {
    config: Config,
    mqtt: Mqtt,
    mqtt_inbound: mpsc::UnboundedReceiver<InboundPublish>,
    session: SessionClient,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
    state: BridgeState,
    shutdown: tokio::sync::Notify,
}

impl Bridge {
    pub async fn connect(config: Config) -> Result<Self, SessionError> {
        let bridge_status_topic = config.bridge_status_topic();
        let (mqtt, mqtt_inbound) = Mqtt::connect(&config.mqtt_url, &bridge_status_topic)
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        mqtt.publish(&bridge_status_topic, "online", true).await;

        let (events_tx, session_events) = mpsc::unbounded_channel();
        let session = SessionClient::new(events_tx);

        Ok(Self {
            config,
            mqtt,
            mqtt_inbound,
            session,
            session_events,
            state: BridgeState::default(),
            shutdown: tokio::sync::Notify::new(),
        })
    }

    /// Run the handshake, publish discovery/initial state for every device,
    /// subscribe command topics, and mark devices online (§4.5's "Start").
    async fn handshake_and_setup(&mut self) -> Result<(), SessionError> {
        let pages = self.session.connect(&self.config.email, &self.config.password).await?;

        self.state = BridgeState::default();

        for (device, page) in pages {
            let registry = WidgetRegistry::from_page(device.device_id, &page);
            self.publish_discovery_and_subscribe(&device, &registry).await;
            self.state.registries.insert(device.device_id, registry);
            self.state.devices.push(device);
        }

        Ok(())
    }

    async fn publish_discovery_and_subscribe(&mut self, device: &Device, registry: &WidgetRegistry) {
        let device_id = device.device_id;
        let publishes: Vec<Publish> = discovery::build_discovery(
            &self.config.discovery_prefix,
            &self.config.topic_prefix,
            device_id,
            &device.name,
            registry,
        );
        for publish in publishes {
            self.mqtt.publish_json(&publish.topic, &publish.payload, publish.retain).await;
        }

        let availability = discovery::availability_topic(&self.config.topic_prefix, device_id);
        self.mqtt.publish(&availability, "online", true).await;

        for entry in registry.values() {
            let id = discovery::entity_id(&entry.name);
            let state_topic = discovery::state_topic(&self.config.topic_prefix, device_id, &id);
            let initial_value = Self::display_value(&entry.name, &entry.value);
            self.mqtt.publish(&state_topic, initial_value, true).await;
            self.state.state_topics.insert((device_id, entry.pin.clone()), state_topic);

            if discovery::CONTROLLABLE_WIDGETS.contains(&entry.name.as_str()) {
                let command_topic = discovery::command_topic(&self.config.topic_prefix, device_id, &id);
                self.mqtt.subscribe(&command_topic).await;
                self.state.command_topics.insert(command_topic, (device_id, entry.pin.clone()));
            }
        }

        // Only expose the charging switch if pin "15" is actually present —
        // §9's Open Question resolution: refuse rather than write to an
        // unknown pin.
        if registry.by_pin(CHARGING_PIN).is_some() {
            let charging_command = discovery::command_topic(&self.config.topic_prefix, device_id, "charging");
            self.mqtt.subscribe(&charging_command).await;
            self.state.charging_command_topics.insert(charging_command, device_id);
            let charging_state = discovery::state_topic(&self.config.topic_prefix, device_id, "charging");
            self.state.charging_state_topics.insert(device_id, charging_state);
        } else {
            let err = CommandError::UnknownPin(CHARGING_PIN.to_string());
            warn!(device_id, error = %err, "charging switch disabled");
        }

        if let Some(status_entry) = registry.by_name("Status") {
            self.state.device_status.insert(device_id, status_entry.value.clone());
            self.publish_status_mirror(device_id, &status_entry.value).await;
        }
    }

    /// The `Status` stream is published as its human-readable translation
    /// (§4.4's value transform); every other stream is published raw.
    fn display_value(widget_name: &str, raw_value: &str) -> String {
        if widget_name == "Status" {
            discovery::status_to_human(raw_value).to_string()
        } else {
            raw_value.to_string()
        }
    }

    async fn publish_status_mirror(&self, device_id: i64, raw_status: &str) {
        if let Some(charging_topic) = self.state.charging_state_topics.get(&device_id) {
            let payload = if discovery::status_is_charging(raw_status) { "ON" } else { "OFF" };
            self.mqtt.publish(charging_topic, payload, false).await;
        }
    }

    /// The supervised loop (§4.5): pump session/MQTT events until shutdown,
    /// reconnecting the session with a fixed 30s backoff on any
    /// unrecoverable error. Also drives two timers off `Config`: a
    /// `EVIQO_POLL_INTERVAL` defensive re-fetch of each device's page (in
    /// case a push update was dropped) and, when
    /// `EVIQO_WS_RECONNECT_INTERVAL` is set, a periodic forced re-handshake
    /// so the session doesn't sit on one connection indefinitely.
    pub async fn run(mut self) {
        if let Err(err) = self.handshake_and_setup().await {
            warn!(error = %err, "initial handshake failed");
            self.schedule_reconnect().await;
        }

        let mut poll_ticker = tokio::time::interval(self.config.poll_interval);
        poll_ticker.tick().await;
        let mut reconnect_ticker = self.config.ws_reconnect_interval.map(tokio::time::interval);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    self.shutdown_sequence().await;
                    return;
                }
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown_sequence().await;
                    return;
                }
                event = self.session_events.recv() => {
                    match event {
                        Some(event) => self.handle_session_event(event).await,
                        None => return,
                    }
                }
                publish = self.mqtt_inbound.recv() => {
                    match publish {
                        Some(publish) => self.handle_mqtt_publish(publish).await,
                        None => return,
                    }
                }
                _ = poll_ticker.tick() => {
                    self.poll_devices().await;
                }
                _ = Self::tick_optional(&mut reconnect_ticker) => {
                    self.force_reconnect().await;
                }
            }
        }
    }

    async fn tick_optional(ticker: &mut Option<tokio::time::Interval>) {
        match ticker {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Defensive re-fetch of every known device's page, applying each
    /// stream's current value through the normal widget-update path so any
    /// drift from a missed push update self-heals.
    async fn poll_devices(&mut self) {
        let device_ids: Vec<i64> = self.state.devices.iter().map(|d| d.device_id).collect();
        for device_id in device_ids {
            match self.session.fetch_device_page(device_id).await {
                Ok(page) => {
                    for stream in page.streams() {
                        self.handle_widget_update(&device_id.to_string(), &stream.pin, &stream.visualization.value).await;
                    }
                }
                Err(err) => warn!(device_id, error = %err, "periodic poll failed"),
            }
        }
    }

    async fn force_reconnect(&mut self) {
        info!("forced periodic reconnect, re-handshaking");
        self.mark_all_offline().await;
        self.session.close().await;
        if let Err(err) = self.handshake_and_setup().await {
            warn!(error = %err, "forced reconnect handshake failed, will retry");
            self.schedule_reconnect().await;
        }
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::WidgetUpdate { device_id, pin, value } => {
                self.handle_widget_update(&device_id, &pin, &value).await;
            }
            SessionEvent::CommandSent { device_id, pin, value } => {
                self.handle_command_sent(&device_id, &pin, &value).await;
            }
            SessionEvent::StateChanged(SessionState::Error) => {
                warn!("session entered Error state, reconnecting");
                self.mark_all_offline().await;
                self.session.close().await;
                self.schedule_reconnect().await;
            }
            SessionEvent::StateChanged(_) => {}
        }
    }

    async fn handle_widget_update(&mut self, device_id_str: &str, pin: &str, value: &str) {
        let Ok(device_id) = device_id_str.parse::<i64>() else { return };
        let Some(registry) = self.state.registries.get_mut(&device_id) else { return };
        let Some(entry) = registry.apply_update(pin, value) else {
            warn!(device_id, pin, "widget update for unknown pin, dropping");
            return;
        };

        if let Some(state_topic) = self.state.state_topics.get(&(device_id, pin.to_string())) {
            let display_value = Self::display_value(&entry.name, value);
            self.mqtt.publish(state_topic, display_value, false).await;
        }

        if entry.name == "Status" {
            self.state.device_status.insert(device_id, value.to_string());
            self.publish_status_mirror(device_id, value).await;
        }
    }

    async fn handle_command_sent(&self, device_id_str: &str, pin: &str, value: &str) {
        let Ok(device_id) = device_id_str.parse::<i64>() else { return };
        if let Some(state_topic) = self.state.state_topics.get(&(device_id, pin.to_string())) {
            self.mqtt.publish(state_topic, value.to_string(), false).await;
        }
    }

    async fn handle_mqtt_publish(&mut self, publish: InboundPublish) {
        if let Some(device_id) = self.state.charging_command_topics.get(&publish.topic).copied() {
            self.route_charging_command(device_id, publish.payload.trim()).await;
            return;
        }

        if let Some((device_id, pin)) = self.state.command_topics.get(&publish.topic).cloned() {
            let value = publish.payload.trim().to_string();
            if let Err(err) = self.session.send_command(&device_id.to_string(), &pin, &value) {
                warn!(device_id, pin, error = %err, "failed to send command");
            }
        }
    }

    async fn route_charging_command(&mut self, device_id: i64, payload: &str) {
        let status = self.state.device_status.get(&device_id).cloned().unwrap_or_default();
        let sequence = charging_sequence(payload, &status);
        match sequence {
            ChargingSequence::Reject => {
                let err = CommandError::Rejected { device_id: device_id.to_string(), pin: CHARGING_PIN.to_string() };
                warn!(device_id, error = %err, "charging command rejected");
            }
            ChargingSequence::Ignore => warn!(device_id, payload, status, "charging command ignored for current status"),
            ChargingSequence::NoOp => {}
            ChargingSequence::Steps { steps, gap_before } => {
                for (index, value) in steps.iter().enumerate() {
                    if gap_before == Some(index) {
                        tokio::time::sleep(CHARGING_SEQUENCE_GAP).await;
                    }
                    if let Err(err) = self.session.send_command(&device_id.to_string(), CHARGING_PIN, value) {
                        warn!(device_id, error = %err, "charging sequence command failed");
                        break;
                    }
                }
            }
        }
    }

    async fn mark_all_offline(&self) {
        for device in &self.state.devices {
            let availability = discovery::availability_topic(&self.config.topic_prefix, device.device_id);
            self.mqtt.publish(&availability, "offline", true).await;
            if let Some(charging_topic) = self.state.charging_state_topics.get(&device.device_id) {
                self.mqtt.publish(charging_topic, "OFF", true).await;
            }
        }
    }

    async fn schedule_reconnect(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = self.shutdown.notified() => return,
        }
        if let Err(err) = self.handshake_and_setup().await {
            warn!(error = %err, "reconnect handshake failed, will retry");
        } else {
            info!("reconnected");
        }
    }

    async fn shutdown_sequence(&mut self) {
        info!("shutting down");
        self.mark_all_offline().await;
        self.mqtt.publish(&self.config.bridge_status_topic(), "offline", true).await;
        self.session.close().await;
    }
}

enum ChargingSequence {
    Reject,
    Ignore,
    NoOp,
    /// `gap_before` is the index (if any) of the one step that must wait
    /// `CHARGING_SEQUENCE_GAP` before being sent — only the stopped→on
    /// sequence has a documented gap, between its 2nd and 3rd commands.
    Steps { steps: Vec<&'static str>, gap_before: Option<usize> },
}

impl ChargingSequence {
    fn steps(steps: Vec<&'static str>) -> Self {
        Self::Steps { steps, gap_before: None }
    }
}

/// §4.5's charging-switch routing table.
fn charging_sequence(target: &str, current_status: &str) -> ChargingSequence {
    match (target, current_status) {
        ("OFF", "2") => ChargingSequence::steps(vec!["3", "0"]),
        ("OFF", _) => ChargingSequence::Ignore,
        ("ON", "0") => ChargingSequence::Reject,
        ("ON", "2") => ChargingSequence::NoOp,
        ("ON", "1") => ChargingSequence::steps(vec!["2", "0"]),
        ("ON", "3") => ChargingSequence::Steps { steps: vec!["1", "0", "2", "0"], gap_before: Some(2) },
        _ => ChargingSequence::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugged_to_on_sends_two_commands_with_no_gap() {
        match charging_sequence("ON", "1") {
            ChargingSequence::Steps { steps, gap_before } => {
                assert_eq!(steps, vec!["2", "0"]);
                assert_eq!(gap_before, None);
            }
            _ => panic!("expected Steps"),
        }
    }

    #[test]
    fn stopped_to_on_sends_four_commands_with_gap_before_third() {
        match charging_sequence("ON", "3") {
            ChargingSequence::Steps { steps, gap_before } => {
                assert_eq!(steps, vec!["1", "0", "2", "0"]);
                assert_eq!(gap_before, Some(2));
            }
            _ => panic!("expected Steps"),
        }
    }

    #[test]
    fn unplugged_to_on_is_rejected() {
        assert!(matches!(charging_sequence("ON", "0"), ChargingSequence::Reject));
    }

    #[test]
    fn charging_to_off_sends_two_commands_with_no_gap() {
        match charging_sequence("OFF", "2") {
            ChargingSequence::Steps { steps, gap_before } => {
                assert_eq!(steps, vec!["3", "0"]);
                assert_eq!(gap_before, None);
            }
            _ => panic!("expected Steps"),
        }
    }

    #[test]
    fn already_charging_to_on_is_a_noop() {
        assert!(matches!(charging_sequence("ON", "2"), ChargingSequence::NoOp));
    }

    #[test]
    fn non_charging_to_off_is_ignored() {
        assert!(matches!(charging_sequence("OFF", "1"), ChargingSequence::Ignore));
    }
}
