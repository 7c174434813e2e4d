//! Device types: identity, class, and capability records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ChordError;
use crate::ui::UiGroup;

/// Unique identifier for a device while it is present in the registry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a short random id for emulated devices added without one
    pub fn random() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(simple[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of device classes the engine knows how to address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Phone,
    Watch,
    Glass,
    Tablet,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Watch => "watch",
            Self::Glass => "glass",
            Self::Tablet => "tablet",
        }
    }

    /// Watches and glass present UI as navigable cards instead of a page
    pub fn uses_cards(&self) -> bool {
        matches!(self, Self::Watch | Self::Glass)
    }
}

impl FromStr for DeviceClass {
    type Err = ChordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "phone" => Ok(Self::Phone),
            "watch" => Ok(Self::Watch),
            "glass" => Ok(Self::Glass),
            "tablet" => Ok(Self::Tablet),
            other => Err(ChordError::UnknownDeviceType(other.to_string())),
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One capability of a device: its attributes and the events it can raise
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Attribute name to scalar value (e.g. `size = "small"`)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Input events this capability can emit
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on: Vec<String>,
}

impl Capability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_events(mut self, events: &[&str]) -> Self {
        self.on = events.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Per-device capability record
pub type CapabilityRecord = BTreeMap<String, Capability>;

/// A device known to the engine, physical (`live`) or emulated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    #[serde(rename = "type")]
    pub class: DeviceClass,
    pub name: String,
    #[serde(default)]
    pub fullname: Option<String>,
    /// Body attachment point (e.g. "wrist")
    #[serde(default)]
    pub joint: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    /// Whether this is a physical device on the network
    pub live: bool,
    pub capability: CapabilityRecord,
    /// UI element groups currently hosted by the device
    #[serde(default)]
    pub ui: Vec<UiGroup>,
    /// Selection that last drove this device
    #[serde(default)]
    pub selection_id: Option<String>,
}

impl Device {
    pub fn new(id: DeviceId, class: DeviceClass, name: impl Into<String>) -> Self {
        Self {
            id,
            class,
            name: name.into(),
            fullname: None,
            joint: None,
            os: None,
            live: false,
            capability: CapabilityRecord::new(),
            ui: Vec::new(),
            selection_id: None,
        }
    }

    pub fn with_capability(mut self, name: &str, capability: Capability) -> Self {
        self.capability.insert(name.to_string(), capability);
        self
    }

    pub fn with_joint(mut self, joint: &str) -> Self {
        self.joint = Some(joint.to_string());
        self
    }

    /// Clone this device as a template for a new one
    pub fn clone_as(&self, id: DeviceId, name: Option<&str>, live: bool) -> Self {
        let mut device = self.clone();
        device.id = id;
        if let Some(name) = name {
            device.name = name.to_lowercase();
        }
        device.live = live;
        device.ui.clear();
        device.selection_id = None;
        device
    }

    /// Look up a device-level property by selector key
    pub fn property(&self, key: &str) -> Option<&str> {
        match key {
            "name" => Some(self.name.as_str()),
            "type" => Some(self.class.as_str()),
            "joint" => self.joint.as_deref(),
            "os" => self.os.as_deref(),
            _ => None,
        }
    }

    /// Whether the device has a capability
    pub fn is(&self, capability: &str) -> bool {
        self.capability.contains_key(capability)
    }

    /// Whether the device currently hosts any UI
    pub fn has_ui(&self) -> bool {
        !self.ui.is_empty()
    }

    /// `showable.size`, used when placing images and control panels
    pub fn screen_size(&self) -> Option<&str> {
        self.capability.get("showable").and_then(|c| c.attr("size"))
    }
}
