//! Transport that publishes device commands to WebSocket clients

use chord_core::{Command, DeviceId, Transport};
use tokio::sync::broadcast;
use tracing::trace;

use crate::state::DaemonEvent;

/// Forwards every command onto the daemon's event channel
///
/// Device proxies connected over `/ws` pick up the commands addressed to
/// their devices. Sending never blocks; with no subscriber the command is
/// dropped.
pub struct ChannelTransport {
    events: broadcast::Sender<DaemonEvent>,
}

impl ChannelTransport {
    pub fn new(events: broadcast::Sender<DaemonEvent>) -> Self {
        Self { events }
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, device: &DeviceId, command: Command) {
        trace!(device = %device, verb = command.verb(), "Publishing command");
        let _ = self.events.send(DaemonEvent::Command {
            device: device.clone(),
            command,
        });
    }
}
