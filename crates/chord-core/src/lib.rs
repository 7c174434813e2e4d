//! Chord Core - device selection and cross-device coordination
//!
//! This crate provides the selection and coordination core for Chord:
//! - Selector compiler and matcher for CSS-like device queries
//! - Device registry and device spec loading
//! - Selections with `default`, `all`, and `combine` fan-out modes
//! - Event correlation across the members of a selection
//! - Combine-mode UI distribution and selector suggestion
//! - Renderer and transport boundaries, owned by the [`Engine`]

pub mod combine;
pub mod device;
pub mod engine;
pub mod error;
pub mod event;
pub mod matcher;
pub mod registry;
pub mod selection;
pub mod selector;
pub mod spec;
pub mod suggest;
pub mod transport;
pub mod ui;

pub use device::{Capability, CapabilityRecord, Device, DeviceClass, DeviceId};
pub use engine::{Callback, Engine};
pub use error::{ChordError, ErrorKind, Result};
pub use event::{Event, EventManager, TAP_BUTTON};
pub use registry::DeviceRegistry;
pub use selection::{Exclusion, Mode, Selection, SelectionOption};
pub use selector::{Constraint, Group, Query, Selector, TargetKey};
pub use spec::{DeviceSpec, SpecIndex};
pub use suggest::Suggestion;
pub use transport::{Command, NullTransport, ShowPayload, Transport};
pub use ui::{MarkupRenderer, Renderer, UiContent, UiGroup, UiItem};
