//! Transport boundary to live devices
//!
//! Commands are fire-and-forget: the engine never waits for an answer and
//! nothing is retried here.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::device::DeviceId;
use crate::ui::UiGroup;

/// What a `show` command carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShowPayload {
    /// Panel markup for phones and tablets
    Markup(String),
    /// Element groups for card UIs (watch, glass)
    Cards(Vec<UiGroup>),
}

/// A command sent to a live device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "camelCase")]
pub enum Command {
    /// Start forwarding an input event
    On { event: String },
    Show { content: ShowPayload },
    Play { media: String },
    Call { callee: String },
    Wakeup,
    Reset,
    StartApp { app: String },
    KillApp { app: String },
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::On { .. } => "on",
            Self::Show { .. } => "show",
            Self::Play { .. } => "play",
            Self::Call { .. } => "call",
            Self::Wakeup => "wakeup",
            Self::Reset => "reset",
            Self::StartApp { .. } => "startApp",
            Self::KillApp { .. } => "killApp",
        }
    }
}

/// Delivers commands to live devices
pub trait Transport: Send {
    fn send(&mut self, device: &DeviceId, command: Command);
}

/// Transport for engines without live devices
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&mut self, device: &DeviceId, command: Command) {
        trace!(device = %device, verb = command.verb(), "Dropping command");
    }
}
