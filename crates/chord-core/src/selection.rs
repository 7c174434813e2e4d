//! Selections: mode-bound handles to a set of matched devices
//!
//! A selection holds device ids, never devices. Every operation resolves the
//! ids against the engine's registry at dispatch time, and members that have
//! left the registry are skipped.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::device::{Device, DeviceId};
use crate::engine::Engine;
use crate::error::ChordError;
use crate::event::{Event, EventManager};
use crate::selector::Selector;
use crate::ui::UiContent;

/// Fan-out discipline of a selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Pick one member
    #[default]
    Default,
    /// Broadcast, and synchronize input across members
    All,
    /// Treat the members as one composite device
    Combine,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "all" => Ok(Self::All),
            "combine" => Ok(Self::Combine),
            other => Err(format!("unknown selection mode: {}", other)),
        }
    }
}

/// Selection options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionOption {
    /// Correlation window in milliseconds
    #[serde(default = "default_time_range_ms", rename = "timeRange")]
    pub time_range_ms: u64,
}

fn default_time_range_ms() -> u64 {
    1000
}

impl Default for SelectionOption {
    fn default() -> Self {
        Self {
            time_range_ms: default_time_range_ms(),
        }
    }
}

impl SelectionOption {
    pub fn with_time_range_ms(time_range_ms: u64) -> Self {
        Self { time_range_ms }
    }

    pub fn time_range(&self) -> Duration {
        Duration::milliseconds(self.time_range_ms as i64)
    }
}

/// Something to remove from a selection with [`Selection::not`]
#[derive(Debug, Clone, Copy)]
pub enum Exclusion<'a> {
    Device(&'a DeviceId),
    Selection(&'a Selection),
    Selector(&'a str),
}

impl<'a> From<&'a DeviceId> for Exclusion<'a> {
    fn from(id: &'a DeviceId) -> Self {
        Self::Device(id)
    }
}

impl<'a> From<&'a Selection> for Exclusion<'a> {
    fn from(selection: &'a Selection) -> Self {
        Self::Selection(selection)
    }
}

impl<'a> From<&'a str> for Exclusion<'a> {
    fn from(selector: &'a str) -> Self {
        Self::Selector(selector)
    }
}

/// An ordered set of device ids bound to a mode
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    id: String,
    selector: Option<String>,
    members: Vec<DeviceId>,
    mode: Mode,
    option: SelectionOption,
}

impl Selection {
    pub fn new(selector: Option<String>, members: Vec<DeviceId>) -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self {
            id: simple[..10].to_string(),
            selector,
            members,
            mode: Mode::default(),
            option: SelectionOption::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The selector string this selection was built from, if any
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn device_ids(&self) -> &[DeviceId] {
        &self.members
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.members.contains(id)
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn option(&self) -> SelectionOption {
        self.option
    }

    pub fn set_mode(&mut self, mode: Mode) -> &mut Self {
        self.mode = mode;
        self
    }

    pub fn set_option(&mut self, option: SelectionOption) -> &mut Self {
        self.option = option;
        self
    }

    /// Switch to `all` mode, optionally replacing the options
    pub fn all(&mut self, option: Option<SelectionOption>) -> &mut Self {
        self.set_mode(Mode::All);
        if let Some(option) = option {
            self.set_option(option);
        }
        self
    }

    /// Switch to `combine` mode, optionally replacing the options
    pub fn combine(&mut self, option: Option<SelectionOption>) -> &mut Self {
        self.set_mode(Mode::Combine);
        if let Some(option) = option {
            self.set_option(option);
        }
        self
    }

    /// Concatenate another selection's members; duplicates are kept
    pub fn append(&mut self, other: &Selection) -> &mut Self {
        self.members.extend(other.members.iter().cloned());
        self
    }

    /// Remove members by device, by another selection, or by selector
    ///
    /// Only this selection changes; the registry is untouched.
    pub fn not<'a>(&mut self, engine: &mut Engine, exclusion: impl Into<Exclusion<'a>>) -> &mut Self {
        match exclusion.into() {
            Exclusion::Device(id) => self.remove_member(id),
            Exclusion::Selection(other) => {
                for id in other.device_ids() {
                    self.remove_member(id);
                }
            }
            Exclusion::Selector(selector) => match Selector::compile(selector) {
                Ok(selector) => {
                    let excluded = engine.registry().query(&selector);
                    for id in &excluded {
                        self.remove_member(id);
                    }
                }
                Err(e) => engine.report(e),
            },
        }
        self
    }

    fn remove_member(&mut self, id: &DeviceId) {
        if let Some(idx) = self.members.iter().position(|m| m == id) {
            self.members.remove(idx);
        }
    }

    /// Run a function over this selection
    pub fn run<F: FnOnce(&mut Self)>(&mut self, f: F) -> &mut Self {
        f(self);
        self
    }

    /// Comma-joined names of the members still present
    pub fn device_names(&self, engine: &Engine) -> String {
        engine
            .devices_of(&self.members)
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Members currently hosting the UI element with the given id
    pub fn device_hosting_ui(&self, engine: &Engine, element_id: &str) -> Selection {
        let hosting = engine
            .devices_of(&self.members)
            .into_iter()
            .filter(|d| d.ui.iter().any(|g| g.contains(element_id)))
            .map(|d| d.id.clone())
            .collect();
        Selection::new(None, hosting)
    }

    /// Change an attribute of a shown element and re-show it where it lives
    pub fn update_ui_attr(
        &mut self,
        engine: &mut Engine,
        element_id: &str,
        attr: &str,
        value: &str,
    ) -> &mut Self {
        let hosting = self.device_hosting_ui(engine, element_id);
        for id in hosting.device_ids() {
            engine.update_device_ui(id, element_id, attr, value);
        }
        self
    }

    /// Members still present in the registry, reporting when there are none
    fn present_members(&self, engine: &mut Engine, action: &str) -> Option<Vec<DeviceId>> {
        let members = engine.present(&self.members);
        if members.is_empty() {
            engine.report(ChordError::no_device(action));
            return None;
        }
        Some(members)
    }

    /// Show markup on the selection
    pub fn show(&mut self, engine: &mut Engine, markup: &str) -> &mut Self {
        self.show_with(engine, markup, |_| {})
    }

    /// Show markup, calling `shown` for every device that received content
    pub fn show_with<F>(&mut self, engine: &mut Engine, markup: &str, mut shown: F) -> &mut Self
    where
        F: FnMut(&Device),
    {
        let Some(members) = self.present_members(engine, "show") else {
            return self;
        };
        let content = engine.decompose(markup);

        let targets: Vec<(DeviceId, UiContent)> = match self.mode {
            Mode::Default => engine
                .pick_one(&members)
                .map(|id| vec![(id, content)])
                .unwrap_or_default(),
            Mode::All => members
                .into_iter()
                .map(|id| (id, content.clone()))
                .collect(),
            Mode::Combine => engine.place_combined(&members, &content),
        };

        for (id, content) in targets {
            if let Some(device) = engine.show_device(&id, &content, Some(self.id.as_str())) {
                shown(&device);
            }
        }
        self
    }

    /// Play media
    pub fn play(&mut self, engine: &mut Engine, media: &str) -> &mut Self {
        let Some(members) = self.present_members(engine, "play") else {
            return self;
        };
        for id in self.fan_out(engine, members) {
            engine.play_device(&id, media, Some(self.id.as_str()));
        }
        self
    }

    /// Place a call from one member, whatever the mode
    pub fn call(&mut self, engine: &mut Engine, callee: &str) -> &mut Self {
        self.call_with(engine, callee, |_| {})
    }

    pub fn call_with<F>(&mut self, engine: &mut Engine, callee: &str, mut placed: F) -> &mut Self
    where
        F: FnMut(&Device),
    {
        let Some(members) = self.present_members(engine, "call") else {
            return self;
        };
        if let Some(id) = engine.pick_one(&members) {
            if let Some(device) = engine.call_device(&id, callee, Some(self.id.as_str())) {
                placed(&device);
            }
        }
        self
    }

    /// Wake members up
    pub fn wakeup(&mut self, engine: &mut Engine) -> &mut Self {
        let Some(members) = self.present_members(engine, "wakeup") else {
            return self;
        };
        for id in self.fan_out(engine, members) {
            engine.wakeup_device(&id);
        }
        self
    }

    /// Start an app; in `combine` mode it goes to the first normal-size screen
    pub fn start_app(&mut self, engine: &mut Engine, app: &str) -> &mut Self {
        let Some(members) = self.present_members(engine, "startApp") else {
            return self;
        };
        let targets = match self.mode {
            Mode::Combine => engine
                .devices_of(&members)
                .into_iter()
                .find(|d| d.screen_size() == Some("normal"))
                .map(|d| vec![d.id.clone()])
                .unwrap_or_default(),
            _ => self.fan_out(engine, members),
        };

        if targets.is_empty() {
            engine.report(ChordError::no_device("startApp"));
            return self;
        }
        for id in targets {
            engine.start_app_device(&id, app, Some(self.id.as_str()));
        }
        self
    }

    pub fn kill_app(&mut self, engine: &mut Engine, app: &str) -> &mut Self {
        let Some(members) = self.present_members(engine, "killApp") else {
            return self;
        };
        for id in self.fan_out(engine, members) {
            engine.kill_app_device(&id, app);
        }
        self
    }

    /// One member in `default` / `combine`, everyone in `all`
    fn fan_out(&self, engine: &mut Engine, members: Vec<DeviceId>) -> Vec<DeviceId> {
        match self.mode {
            Mode::All => members,
            Mode::Default | Mode::Combine => engine.pick_one(&members).into_iter().collect(),
        }
    }

    /// Listen for an event on the members
    ///
    /// The registration snapshots the members present now; devices added to
    /// the selection later are not listened to. In `combine` mode only members
    /// owning the capability behind the event's action (`tap` in `tap:button`)
    /// are attached, but the correlation window still spans every member.
    pub fn on<F>(&mut self, engine: &mut Engine, event_type: &str, callback: F) -> &mut Self
    where
        F: FnMut(&mut Engine, &Event) + Send + 'static,
    {
        let Some(members) = self.present_members(engine, event_type) else {
            return self;
        };

        let targets = match self.mode {
            Mode::Default | Mode::All => members.clone(),
            Mode::Combine => {
                let action = event_type.split(':').next().unwrap_or(event_type);
                let Some(capability) = engine.capability_for_action(action).map(str::to_string)
                else {
                    engine.report(ChordError::UnknownCapability(action.to_string()));
                    return self;
                };
                engine
                    .devices_of(&members)
                    .into_iter()
                    .filter(|d| d.is(&capability))
                    .map(|d| d.id.clone())
                    .collect()
            }
        };
        if targets.is_empty() {
            debug!(selection = %self.id, event = %event_type, "No member can raise this event");
            return self;
        }

        let mut snapshot = self.clone();
        snapshot.members = members;
        let manager = EventManager::new(snapshot, event_type);
        engine.attach_manager(manager, &targets, Box::new(callback));

        info!(
            selection = %self.id,
            event = %event_type,
            mode = ?self.mode,
            devices = targets.len(),
            "Listening"
        );
        self
    }
}
