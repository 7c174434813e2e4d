//! Application state management

use anyhow::Result;
use chord_core::{
    ChordError, Command, Device, DeviceId, DeviceSpec, Engine, Event, MarkupRenderer, Mode,
    Selection, SelectionOption,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::info;

use crate::config::Config;
use crate::transport::ChannelTransport;

/// Everything pushed to WebSocket clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum DaemonEvent {
    /// Command for a live device
    #[serde(rename = "command")]
    Command { device: DeviceId, command: Command },
    /// Aggregated event delivered to a subscription
    #[serde(rename = "event")]
    Event { subscription: String, event: Event },
    #[serde(rename = "device_joined")]
    DeviceJoined(Device),
    #[serde(rename = "device_left")]
    DeviceLeft { id: String },
}

/// Shared application state
pub struct AppState {
    /// Selection engine; every operation runs under this lock
    pub engine: Mutex<Engine>,
    /// Configuration
    pub config: Config,
    /// Event broadcast for WebSocket clients
    pub events: broadcast::Sender<DaemonEvent>,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let spec = match &config.spec.path {
            Some(path) => DeviceSpec::from_file(Path::new(path))?,
            None => {
                info!("No device spec configured, starting with an empty registry");
                DeviceSpec::default()
            }
        };
        let index = spec.index()?;

        let (events, _) = broadcast::channel(256);
        let transport = ChannelTransport::new(events.clone());
        let mut engine = Engine::new(index, Box::new(MarkupRenderer::new()), Box::new(transport));
        engine.set_default_option(SelectionOption::with_time_range_ms(
            config.selection.time_range_ms,
        ));
        if !config.emulators.counts.is_empty() {
            engine.set_emulated_devices(&config.emulators.counts, config.emulators.keep_live);
        }

        Ok(Arc::new(Self {
            engine: Mutex::new(engine),
            config,
            events,
        }))
    }

    /// Subscribe to daemon events
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.events.subscribe()
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.engine.lock().await.registry().devices().to_vec()
    }

    pub async fn get_device(&self, id: &str) -> Option<Device> {
        self.engine
            .lock()
            .await
            .registry()
            .find_by_id(&DeviceId::from(id))
            .cloned()
    }

    /// Register a live or emulated device; a random id is used when none is given
    pub async fn join_device(
        &self,
        id: Option<DeviceId>,
        device_type: &str,
        name: Option<&str>,
        live: bool,
    ) -> Result<Device, ChordError> {
        let mut engine = self.engine.lock().await;
        let id = if live {
            let id = id.unwrap_or_else(DeviceId::random);
            engine.device_joined(id.clone(), device_type, name)?;
            id
        } else {
            engine.add_emulated_device(id, device_type, name)?
        };
        let device = engine
            .registry()
            .find_by_id(&id)
            .cloned()
            .ok_or(ChordError::UnknownDevice(id))?;
        drop(engine);

        let _ = self.events.send(DaemonEvent::DeviceJoined(device.clone()));
        Ok(device)
    }

    pub async fn leave_device(&self, id: &DeviceId) -> bool {
        let left = self.engine.lock().await.device_left(id);
        if left {
            let _ = self.events.send(DaemonEvent::DeviceLeft { id: id.to_string() });
        }
        left
    }

    /// Deliver a raw occurrence; returns how many callbacks ran
    pub async fn trigger(
        &self,
        id: &DeviceId,
        event_type: &str,
        value: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<usize, ChordError> {
        let mut engine = self.engine.lock().await;
        if !engine.registry().contains(id) {
            return Err(ChordError::UnknownDevice(id.clone()));
        }
        Ok(engine.trigger_at(id, event_type, value, timestamp.unwrap_or_else(Utc::now)))
    }

    /// Listen on a selection and push its events to WebSocket clients
    pub async fn subscribe_selection(
        &self,
        selector: &str,
        mode: Mode,
        option: Option<SelectionOption>,
        event_type: &str,
    ) -> Result<Selection, ChordError> {
        let mut engine = self.engine.lock().await;
        let mut selection = engine.try_select(selector)?;
        selection.set_mode(mode);
        if let Some(option) = option {
            selection.set_option(option);
        }

        let events = self.events.clone();
        let subscription = selection.id().to_string();
        selection.on(&mut engine, event_type, move |_, event| {
            let _ = events.send(DaemonEvent::Event {
                subscription: subscription.clone(),
                event: event.clone(),
            });
        });
        info!(
            subscription = %selection.id(),
            selector = %selector,
            event = %event_type,
            "Subscription added"
        );
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpecConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SPEC: &str = r#"{
        "deviceCapabilities": {
            "moto360": {
                "showable": { "size": "small" },
                "shakable": { "on": ["shake"] }
            },
            "nexus5": {
                "showable": { "size": "normal" },
                "shakable": { "on": ["shake"] }
            }
        },
        "devices": {
            "moto360": { "type": "watch", "name": "moto360", "joint": "wrist" },
            "nexus5": { "type": "phone", "name": "nexus5" }
        }
    }"#;

    fn state() -> (Arc<AppState>, NamedTempFile) {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(SPEC.as_bytes()).unwrap();
        let config = Config {
            spec: SpecConfig {
                path: Some(file.path().display().to_string()),
            },
            ..Default::default()
        };
        (AppState::new(config).unwrap(), file)
    }

    #[tokio::test]
    async fn test_spec_devices_are_loaded() {
        let (state, _file) = state();
        let ids: Vec<String> = state.devices().await.into_iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec!["moto360", "nexus5"]);
        assert!(state.get_device("nexus5").await.is_some());
        assert!(state.get_device("nexus6").await.is_none());
    }

    #[tokio::test]
    async fn test_join_publishes_and_commands_reach_channel() {
        let (state, _file) = state();
        let mut rx = state.subscribe();

        let device = state
            .join_device(Some(DeviceId::from("p1")), "phone", Some("pixel"), true)
            .await
            .unwrap();
        assert!(device.live);
        assert!(matches!(rx.recv().await.unwrap(), DaemonEvent::DeviceJoined(_)));

        state
            .subscribe_selection("#pixel", Mode::Default, None, "shake")
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            DaemonEvent::Command { device, command } => {
                assert_eq!(device, DeviceId::from("p1"));
                assert_eq!(command.verb(), "on");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let fired = state
            .trigger(&DeviceId::from("p1"), "shake", Some("hard".to_string()), None)
            .await
            .unwrap();
        assert_eq!(fired, 1);
        match rx.recv().await.unwrap() {
            DaemonEvent::Event { event, .. } => assert_eq!(event.value(), Some("hard")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_errors() {
        let (state, _file) = state();
        let err = state
            .join_device(Some(DeviceId::from("nexus5")), "phone", None, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), chord_core::ErrorKind::DuplicateDeviceId);

        let err = state
            .trigger(&DeviceId::from("ghost"), "shake", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), chord_core::ErrorKind::UnknownDevice);

        let err = state
            .subscribe_selection(".showable[", Mode::All, None, "shake")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), chord_core::ErrorKind::InvalidSelector);

        assert!(state.leave_device(&DeviceId::from("moto360")).await);
        assert!(!state.leave_device(&DeviceId::from("moto360")).await);
    }
}
