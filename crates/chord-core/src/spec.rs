//! Device spec file: capability tables and the device list
//!
//! ```json
//! {
//!   "deviceCapabilities": {
//!     "moto360": { "showable": { "size": "small", "shape": "round" },
//!                  "touchable": { "on": ["tap", "tap:button", "swipeLeft"] } }
//!   },
//!   "devices": {
//!     "moto360": { "type": "watch", "name": "moto360", "joint": "wrist" }
//!   }
//! }
//! ```
//!
//! Capabilities are keyed by the same key as the device entry. Loading
//! produces one template per device type, the capability list, and the
//! action to capability index.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

use crate::device::{Capability, CapabilityRecord, Device, DeviceClass, DeviceId};
use crate::error::{ChordError, Result};

/// One entry of the device list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    #[serde(rename = "type")]
    pub device_type: String,
    pub name: String,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub joint: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    /// Device id; the entry key is used when absent
    #[serde(default)]
    pub id: Option<String>,
}

/// Raw spec file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSpec {
    #[serde(default, rename = "deviceCapabilities")]
    pub device_capabilities: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceEntry>,
    /// Named UI layouts (id to markup)
    #[serde(default)]
    pub layouts: HashMap<String, String>,
}

impl DeviceSpec {
    /// Load a spec file; `.toml` files are read as TOML, anything else as JSON
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let spec = if is_toml {
            Self::from_toml(&content)?
        } else {
            Self::from_json(&content)?
        };
        info!(
            path = %path.display(),
            devices = spec.devices.len(),
            "Loaded device spec"
        );
        Ok(spec)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Build devices, templates, and indexes from the raw spec
    pub fn index(&self) -> Result<SpecIndex> {
        let mut index = SpecIndex {
            layouts: self.layouts.clone(),
            ..Default::default()
        };

        for (key, entry) in &self.devices {
            let class: DeviceClass = entry.device_type.parse()?;
            let id = DeviceId::new(entry.id.clone().unwrap_or_else(|| key.clone()));

            let mut device = Device::new(id, class, entry.name.to_lowercase());
            device.fullname = entry.fullname.clone();
            device.joint = entry.joint.as_deref().map(str::to_lowercase);
            device.os = entry.os.as_deref().map(str::to_lowercase);
            device.capability = match self.device_capabilities.get(key) {
                Some(caps) => parse_capabilities(key, caps),
                None => {
                    warn!(device = %key, "Device has no capability table");
                    CapabilityRecord::new()
                }
            };

            for (cap_name, capability) in &device.capability {
                if !cap_name.contains('.') && !index.capability_list.contains(cap_name) {
                    index.capability_list.push(cap_name.clone());
                }
                for action in &capability.on {
                    index.action_index.insert(action.clone(), cap_name.clone());
                }
            }

            index.templates.entry(class).or_insert_with(|| device.clone());
            index.devices.push(device);
        }

        Ok(index)
    }
}

fn parse_capabilities(device: &str, caps: &BTreeMap<String, Value>) -> CapabilityRecord {
    let mut record = CapabilityRecord::new();
    for (name, value) in caps {
        let mut capability = Capability::new();
        // Non-object entries (e.g. `true`) only declare the capability
        if let Value::Object(attrs) = value {
            for (attr, v) in attrs {
                if attr == "on" {
                    capability.on = v
                        .as_array()
                        .map(|events| {
                            events
                                .iter()
                                .filter_map(|e| e.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default();
                } else if let Some(scalar) = scalar_to_string(v) {
                    // Selectors are lower-cased before compiling
                    capability
                        .attributes
                        .insert(attr.to_lowercase(), scalar.to_lowercase());
                } else {
                    warn!(device = %device, capability = %name, attribute = %attr, "Ignoring non-scalar attribute");
                }
            }
        }
        record.insert(name.clone(), capability);
    }
    record
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Everything derived from a spec at setup
#[derive(Debug, Clone, Default)]
pub struct SpecIndex {
    /// First device of each type, cloned to create new devices
    pub templates: HashMap<DeviceClass, Device>,
    /// Capability names in first-seen order
    pub capability_list: Vec<String>,
    /// Action (event name) to owning capability
    pub action_index: BTreeMap<String, String>,
    /// Devices in spec order
    pub devices: Vec<Device>,
    pub layouts: HashMap<String, String>,
}

impl SpecIndex {
    /// Clone a type template into a new device
    pub fn create_device(
        &self,
        id: DeviceId,
        device_type: &str,
        name: Option<&str>,
        live: bool,
    ) -> Result<Device> {
        let class: DeviceClass = device_type.parse()?;
        let template = self
            .templates
            .get(&class)
            .ok_or_else(|| ChordError::UnknownDeviceType(device_type.to_string()))?;
        Ok(template.clone_as(id, name, live))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    pub(crate) const SAMPLE_SPEC: &str = r#"{
        "deviceCapabilities": {
            "glass": {
                "showable": { "size": "small", "shape": "rect" },
                "speakable": {},
                "touchable": { "on": ["tap", "swipeLeft", "swipeRight"] }
            },
            "moto360": {
                "showable": { "size": "small", "shape": "round" },
                "touchable": { "on": ["tap", "tap:button", "swipeLeft"] },
                "shakable": { "on": ["shake"] }
            },
            "nexus5": {
                "showable": { "size": "normal", "pixels": 1080 },
                "touchable": { "on": ["tap", "tap:button"] },
                "shakable": { "on": ["shake"] },
                "speakable": {},
                "callable": true
            },
            "nexus9": {
                "showable": { "size": "large" },
                "touchable": { "on": ["tap", "tap:button"] },
                "speakable": {}
            }
        },
        "devices": {
            "glass": { "type": "glass", "name": "Glass", "joint": "head" },
            "moto360": { "type": "watch", "name": "moto360", "joint": "Wrist", "os": "Android" },
            "nexus5": { "type": "phone", "name": "nexus5", "joint": "hand", "os": "android" },
            "nexus9": { "type": "tablet", "name": "nexus9", "os": "android" }
        },
        "layouts": {
            "controller": "<button value=\"prev\">Prev</button><button value=\"next\">Next</button>"
        }
    }"#;

    #[test]
    fn test_index_from_json() {
        let index = DeviceSpec::from_json(SAMPLE_SPEC).unwrap().index().unwrap();

        assert_eq!(index.devices.len(), 4);
        assert_eq!(index.templates.len(), 4);
        assert_eq!(
            index.capability_list,
            vec!["showable", "speakable", "touchable", "shakable", "callable"]
        );
        assert_eq!(index.action_index["shake"], "shakable");
        assert_eq!(index.action_index["tap:button"], "touchable");
        assert!(index.layouts.contains_key("controller"));

        let watch = &index.templates[&DeviceClass::Watch];
        assert_eq!(watch.joint.as_deref(), Some("wrist"));
        assert_eq!(watch.os.as_deref(), Some("android"));
        assert_eq!(watch.capability["touchable"].on.len(), 3);

        let phone = &index.templates[&DeviceClass::Phone];
        assert_eq!(phone.capability["showable"].attr("pixels"), Some("1080"));
        assert!(phone.is("callable"));
    }

    #[test]
    fn test_attribute_values_lowercased_at_load() {
        let spec = r#"{
            "deviceCapabilities": {
                "tab": { "showable": { "Size": "Large", "shape": "Rect" } }
            },
            "devices": { "tab": { "type": "tablet", "name": "Tab" } }
        }"#;
        let index = DeviceSpec::from_json(spec).unwrap().index().unwrap();
        let showable = &index.templates[&DeviceClass::Tablet].capability["showable"];
        assert_eq!(showable.attr("size"), Some("large"));
        assert_eq!(showable.attr("shape"), Some("rect"));
    }

    #[test]
    fn test_unknown_device_type() {
        let spec = r#"{"devices": {"t": {"type": "toaster", "name": "t"}}}"#;
        let err = DeviceSpec::from_json(spec).unwrap().index().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownDeviceType);
    }

    #[test]
    fn test_create_device_from_template() {
        let index = DeviceSpec::from_json(SAMPLE_SPEC).unwrap().index().unwrap();
        let device = index
            .create_device(DeviceId::from("watch7"), "watch", Some("Gear"), true)
            .unwrap();
        assert_eq!(device.id.as_str(), "watch7");
        assert_eq!(device.name, "gear");
        assert!(device.live);
        assert!(device.is("shakable"));
        assert!(index
            .create_device(DeviceId::from("x"), "toaster", None, false)
            .is_err());
    }

    #[test]
    fn test_from_file_json_and_toml() {
        let mut json = NamedTempFile::with_suffix(".json").unwrap();
        json.write_all(SAMPLE_SPEC.as_bytes()).unwrap();
        let spec = DeviceSpec::from_file(json.path()).unwrap();
        assert_eq!(spec.devices.len(), 4);

        let toml = r#"
[deviceCapabilities.pixel.showable]
size = "normal"

[deviceCapabilities.pixel.touchable]
on = ["tap"]

[devices.pixel]
type = "phone"
name = "pixel"
"#;
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        file.write_all(toml.as_bytes()).unwrap();
        let index = DeviceSpec::from_file(file.path()).unwrap().index().unwrap();
        assert_eq!(index.devices[0].screen_size(), Some("normal"));
        assert_eq!(index.action_index["tap"], "touchable");
    }
}
