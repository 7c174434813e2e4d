//! The engine: registry, spec index, listeners, and the two boundaries
//!
//! One `Engine` is built per session and passed by `&mut` to every selection
//! operation. Everything runs on the caller's thread; listeners fire
//! synchronously from [`Engine::trigger`].

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info, warn};

use crate::combine;
use crate::device::{Device, DeviceId};
use crate::error::{ChordError, Result};
use crate::event::{Event, EventManager};
use crate::registry::DeviceRegistry;
use crate::selection::{Selection, SelectionOption};
use crate::selector::Selector;
use crate::spec::SpecIndex;
use crate::suggest::{self, Suggestion};
use crate::transport::{Command, ShowPayload, Transport};
use crate::ui::{Renderer, UiContent};

/// Listener callback; receives the engine so it can act on selections
pub type Callback = Box<dyn FnMut(&mut Engine, &Event) + Send>;

/// Diagnostics kept for [`Engine::take_diagnostics`]
const MAX_DIAGNOSTICS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Listener {
    /// Attached straight to one device
    Direct(u64),
    /// Owned by an event manager
    Managed(u64),
}

struct ManagedCallback {
    manager: EventManager,
    callback: Callback,
}

pub struct Engine {
    registry: DeviceRegistry,
    index: SpecIndex,
    renderer: Box<dyn Renderer>,
    transport: Box<dyn Transport>,
    rng: StdRng,
    diagnostics: VecDeque<ChordError>,
    default_option: SelectionOption,
    listeners: HashMap<(DeviceId, String), Vec<Listener>>,
    handlers: HashMap<u64, Callback>,
    managers: HashMap<u64, ManagedCallback>,
    next_id: u64,
}

impl Engine {
    /// Build an engine whose registry starts with the spec's devices
    pub fn new(
        index: SpecIndex,
        renderer: Box<dyn Renderer>,
        transport: Box<dyn Transport>,
    ) -> Self {
        info!(
            devices = index.devices.len(),
            capabilities = index.capability_list.len(),
            "Engine ready"
        );
        Self {
            registry: DeviceRegistry::from_devices(index.devices.clone()),
            index,
            renderer,
            transport,
            rng: StdRng::from_entropy(),
            diagnostics: VecDeque::new(),
            default_option: SelectionOption::default(),
            listeners: HashMap::new(),
            handlers: HashMap::new(),
            managers: HashMap::new(),
            next_id: 0,
        }
    }

    /// Make default-mode choices reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn capability_list(&self) -> &[String] {
        &self.index.capability_list
    }

    /// Capability owning an action (`tap` → `touchable`)
    pub fn capability_for_action(&self, action: &str) -> Option<&str> {
        self.index.action_index.get(action).map(String::as_str)
    }

    /// Options given to selections created from now on
    pub fn set_default_option(&mut self, option: SelectionOption) {
        self.default_option = option;
    }

    /// Log a recoverable error and keep it for later inspection
    pub fn report(&mut self, error: ChordError) {
        warn!(kind = ?error.kind(), "{}", error);
        if self.diagnostics.len() == MAX_DIAGNOSTICS {
            self.diagnostics.pop_front();
        }
        self.diagnostics.push_back(error);
    }

    /// Drain the errors reported since the last call
    pub fn take_diagnostics(&mut self) -> Vec<ChordError> {
        self.diagnostics.drain(..).collect()
    }

    /// Select the devices matching a selector
    ///
    /// An invalid selector is reported and yields an empty selection.
    pub fn select(&mut self, selector: &str) -> Selection {
        match self.try_select(selector) {
            Ok(selection) => selection,
            Err(e) => {
                self.report(e);
                self.selection(Some(selector.to_string()), Vec::new())
            }
        }
    }

    /// Like [`Engine::select`] but returns compile errors
    pub fn try_select(&mut self, selector: &str) -> Result<Selection> {
        let compiled = Selector::compile(selector)?;
        let unknown: Vec<String> = compiled
            .capability_names()
            .into_iter()
            .filter(|name| !self.index.capability_list.iter().any(|c| c == name))
            .map(str::to_string)
            .collect();
        for name in unknown {
            self.report(ChordError::UnknownCapability(name));
        }

        let members = self.registry.query(&compiled);
        debug!(selector = %selector, devices = members.len(), "Selected");
        Ok(self.selection(Some(selector.to_string()), members))
    }

    /// Every device, in `default` mode
    pub fn select_all(&mut self) -> Selection {
        let members = self.registry.query(&Selector::everything());
        self.selection(Some("all".to_string()), members)
    }

    /// Every device, in `all` mode
    pub fn all(&mut self, option: Option<SelectionOption>) -> Selection {
        let mut selection = self.select_all();
        selection.all(option);
        selection
    }

    /// Every device, in `combine` mode
    pub fn combine(&mut self, option: Option<SelectionOption>) -> Selection {
        let mut selection = self.select_all();
        selection.combine(option);
        selection
    }

    pub fn find_by_id(&self, id: &DeviceId) -> Selection {
        let members = self
            .registry
            .find_by_id(id)
            .map(|d| vec![d.id.clone()])
            .unwrap_or_default();
        self.selection(None, members)
    }

    pub fn find_by_joint(&self, joint: &str) -> Selection {
        self.selection(None, self.registry.find_by_joint(joint))
    }

    pub fn find_by_type(&self, device_type: &str) -> Selection {
        self.selection(None, self.registry.find_by_type(device_type))
    }

    fn selection(&self, selector: Option<String>, members: Vec<DeviceId>) -> Selection {
        let mut selection = Selection::new(selector, members);
        selection.set_option(self.default_option);
        selection
    }

    /// Selectors that would pick `include` and avoid `exclude`
    pub fn suggest_selectors(&self, include: &[DeviceId], exclude: &[DeviceId]) -> Vec<Suggestion> {
        suggest::suggest(&self.registry, &self.index.capability_list, include, exclude)
    }

    /// Clone the type's template into a new, unregistered device
    pub fn create_device(
        &self,
        id: DeviceId,
        device_type: &str,
        name: Option<&str>,
        live: bool,
    ) -> Result<Device> {
        self.index.create_device(id, device_type, name, live)
    }

    /// Register a live device announced by the transport
    pub fn device_joined(
        &mut self,
        id: DeviceId,
        device_type: &str,
        name: Option<&str>,
    ) -> Result<()> {
        let device = self.create_device(id, device_type, name, true)?;
        if let Err(e) = self.registry.add(device) {
            warn!("{}", e);
            return Err(e);
        }
        Ok(())
    }

    /// Drop a device and every listener attached to it
    pub fn device_left(&mut self, id: &DeviceId) -> bool {
        if self.registry.remove(id).is_none() {
            debug!(device = %id, "Unknown device left");
            return false;
        }
        self.listeners.retain(|(device, _), _| device != id);
        self.prune_callbacks();
        info!(device = %id, "Device left");
        true
    }

    /// Add an emulated device in front of the list; a random id is used when none is given
    pub fn add_emulated_device(
        &mut self,
        id: Option<DeviceId>,
        device_type: &str,
        name: Option<&str>,
    ) -> Result<DeviceId> {
        let id = id.unwrap_or_else(DeviceId::random);
        let device = self.create_device(id.clone(), device_type, name, false)?;
        self.registry.add(device)?;
        Ok(id)
    }

    /// Replace the emulators with `count` devices per type, named `<type><n>`
    ///
    /// With `keep_live` the live devices stay in front; otherwise the list is
    /// rebuilt from emulators only.
    pub fn set_emulated_devices(&mut self, counts: &BTreeMap<String, usize>, keep_live: bool) {
        let mut devices: Vec<Device> = if keep_live {
            self.registry
                .devices()
                .iter()
                .filter(|d| d.live)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        for (device_type, count) in counts {
            for n in 0..*count {
                let id = format!("{}{}", device_type, n);
                if devices.iter().any(|d| d.id.as_str() == id) {
                    self.report(ChordError::DuplicateDeviceId(DeviceId::new(id)));
                    continue;
                }
                match self.create_device(DeviceId::new(id.clone()), device_type, Some(&id), false) {
                    Ok(device) => devices.push(device),
                    Err(e) => {
                        self.report(e);
                        break;
                    }
                }
            }
        }

        info!(devices = devices.len(), keep_live, "Emulated devices set");
        self.registry = DeviceRegistry::from_devices(devices);
        let registry = &self.registry;
        self.listeners.retain(|(device, _), _| registry.contains(device));
        self.prune_callbacks();
    }

    /// Clear the UI on every device
    pub fn reset_devices(&mut self) {
        let ids: Vec<DeviceId> = self.registry.devices().iter().rev().map(|d| d.id.clone()).collect();
        for id in ids {
            let Some(device) = self.registry.find_by_id_mut(&id) else {
                continue;
            };
            device.ui.clear();
            device.selection_id = None;
            let device = device.clone();
            self.renderer.show_ui(&device, "");
            if device.live {
                self.transport.send(&id, Command::Reset);
            }
        }
        debug!("Devices reset");
    }

    pub fn load_layouts(&mut self, layouts: HashMap<String, String>) {
        self.index.layouts = layouts;
    }

    pub fn get_layout_by_id(&self, id: &str) -> Option<&str> {
        self.index.layouts.get(id).map(String::as_str)
    }

    /// Put content on a device; returns the updated device
    pub fn show_device(
        &mut self,
        id: &DeviceId,
        content: &UiContent,
        selection_id: Option<&str>,
    ) -> Option<Device> {
        let markup: String = content.groups.iter().map(|g| self.renderer.render(g)).collect();
        let panel = self.renderer.render_panel(&markup, content);

        let Some(device) = self.registry.find_by_id_mut(id) else {
            debug!(device = %id, "Skipping show on a departed device");
            return None;
        };
        device.ui = content.groups.clone();
        device.selection_id = selection_id.map(str::to_string);
        let device = device.clone();

        self.wakeup_device(id);
        if device.class.uses_cards() {
            let first_card = content
                .groups
                .first()
                .map(|g| self.renderer.render(g))
                .unwrap_or_default();
            self.renderer.show_ui(&device, &first_card);
        } else {
            self.renderer.show_ui(&device, &panel);
        }

        if device.live {
            let payload = if device.class.uses_cards() {
                ShowPayload::Cards(content.groups.clone())
            } else {
                ShowPayload::Markup(panel)
            };
            self.transport.send(id, Command::Show { content: payload });
        }
        debug!(device = %id, groups = content.groups.len(), "Shown");
        Some(device)
    }

    /// Change one attribute of a hosted element and show the result again
    pub fn update_device_ui(&mut self, id: &DeviceId, element_id: &str, attr: &str, value: &str) {
        let Some(device) = self.registry.find_by_id_mut(id) else {
            return;
        };
        let updated = device
            .ui
            .iter_mut()
            .any(|group| group.update_attr(element_id, attr, value));
        if !updated {
            debug!(device = %id, element = %element_id, attr = %attr, "Nothing to update");
            return;
        }
        let content = UiContent::new(device.ui.clone());
        let selection_id = device.selection_id.clone();
        self.show_device(id, &content, selection_id.as_deref());
    }

    pub fn play_device(&mut self, id: &DeviceId, media: &str, selection_id: Option<&str>) {
        if self.mark_driven(id, selection_id).is_none() {
            return;
        }
        self.wakeup_device(id);
        self.send_live(id, Command::Play {
            media: media.to_string(),
        });
    }

    /// Place a call; returns the calling device
    pub fn call_device(
        &mut self,
        id: &DeviceId,
        callee: &str,
        selection_id: Option<&str>,
    ) -> Option<Device> {
        let device = self.mark_driven(id, selection_id)?;
        self.wakeup_device(id);
        self.send_live(id, Command::Call {
            callee: callee.to_string(),
        });
        Some(device)
    }

    pub fn wakeup_device(&mut self, id: &DeviceId) {
        self.send_live(id, Command::Wakeup);
    }

    pub fn start_app_device(&mut self, id: &DeviceId, app: &str, selection_id: Option<&str>) {
        if self.mark_driven(id, selection_id).is_none() {
            return;
        }
        info!(device = %id, app = %app, "Starting app");
        self.send_live(id, Command::StartApp {
            app: app.to_string(),
        });
    }

    pub fn kill_app_device(&mut self, id: &DeviceId, app: &str) {
        info!(device = %id, app = %app, "Killing app");
        self.send_live(id, Command::KillApp {
            app: app.to_string(),
        });
    }

    /// Record which selection drives a device
    fn mark_driven(&mut self, id: &DeviceId, selection_id: Option<&str>) -> Option<Device> {
        let device = self.registry.find_by_id_mut(id)?;
        if selection_id.is_some() {
            device.selection_id = selection_id.map(str::to_string);
        }
        Some(device.clone())
    }

    /// Send to a device if it is live; emulated devices get nothing
    fn send_live(&mut self, id: &DeviceId, command: Command) {
        if self.registry.find_by_id(id).is_some_and(|d| d.live) {
            self.transport.send(id, command);
        }
    }

    /// Devices for the ids still present, in the given order
    pub fn devices_of(&self, ids: &[DeviceId]) -> Vec<&Device> {
        ids.iter().filter_map(|id| self.registry.find_by_id(id)).collect()
    }

    pub(crate) fn present(&self, ids: &[DeviceId]) -> Vec<DeviceId> {
        ids.iter()
            .filter(|id| self.registry.contains(id))
            .cloned()
            .collect()
    }

    /// Pick one member, uniformly among live ones when there are any
    pub(crate) fn pick_one(&mut self, ids: &[DeviceId]) -> Option<DeviceId> {
        let present = self.devices_of(ids);
        let live: Vec<DeviceId> = present.iter().filter(|d| d.live).map(|d| d.id.clone()).collect();
        let pool = if live.is_empty() {
            present.iter().map(|d| d.id.clone()).collect()
        } else {
            live
        };
        pool.choose(&mut self.rng).cloned()
    }

    pub fn decompose(&self, markup: &str) -> UiContent {
        self.renderer.decompose(markup)
    }

    pub(crate) fn place_combined(&self, ids: &[DeviceId], content: &UiContent) -> Vec<(DeviceId, UiContent)> {
        combine::place(&self.devices_of(ids), content)
    }

    /// Register a manager's callback on each target device
    pub(crate) fn attach_manager(&mut self, manager: EventManager, targets: &[DeviceId], callback: Callback) {
        let id = self.next_listener_id();
        let event_type = manager.event_type().to_string();
        for device in targets {
            self.add_listener(device, &event_type, Listener::Managed(id));
        }
        self.managers.insert(id, ManagedCallback { manager, callback });
    }

    /// Listen to one device directly; these run before any manager's listeners
    pub fn on_device<F>(&mut self, device: &DeviceId, event_type: &str, callback: F)
    where
        F: FnMut(&mut Engine, &Event) + Send + 'static,
    {
        if !self.registry.contains(device) {
            self.report(ChordError::UnknownDevice(device.clone()));
            return;
        }
        let id = self.next_listener_id();
        self.add_listener(device, event_type, Listener::Direct(id));
        self.handlers.insert(id, Box::new(callback));
    }

    fn next_listener_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Append a listener; the first one for an event turns it on at a live device
    fn add_listener(&mut self, device: &DeviceId, event_type: &str, listener: Listener) {
        let entry = self
            .listeners
            .entry((device.clone(), event_type.to_string()))
            .or_default();
        let first = entry.is_empty();
        entry.push(listener);
        if first {
            self.send_live(device, Command::On {
                event: event_type.to_string(),
            });
        }
    }

    /// Drop callbacks no listener points at any more
    fn prune_callbacks(&mut self) {
        let listeners = &self.listeners;
        let referenced = |target: Listener| listeners.values().any(|l| l.contains(&target));
        self.handlers.retain(|id, _| referenced(Listener::Direct(*id)));
        self.managers.retain(|id, _| referenced(Listener::Managed(*id)));
    }

    fn is_referenced(&self, target: Listener) -> bool {
        self.listeners.values().any(|l| l.contains(&target))
    }

    /// Direct listeners first, then managers by how many devices they span
    fn priority(&self, listener: Listener) -> usize {
        match listener {
            Listener::Direct(_) => 0,
            Listener::Managed(id) => self
                .managers
                .get(&id)
                .map_or(usize::MAX, |m| m.manager.device_num()),
        }
    }

    /// Deliver a raw occurrence from a device, timestamped now
    pub fn trigger(&mut self, device: &DeviceId, event_type: &str, value: Option<String>) -> usize {
        self.trigger_at(device, event_type, value, Utc::now())
    }

    /// Deliver a raw occurrence; returns how many callbacks ran
    pub fn trigger_at(
        &mut self,
        device: &DeviceId,
        event_type: &str,
        value: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> usize {
        if !self.registry.contains(device) {
            self.report(ChordError::UnknownDevice(device.clone()));
            return 0;
        }
        self.renderer.apply_visual(device, event_type);
        let occurrence = Event::single(device.clone(), event_type, value, timestamp);

        let key = (device.clone(), event_type.to_string());
        let Some(listeners) = self.listeners.get(&key) else {
            debug!(device = %device, event = %event_type, "No listener");
            return 0;
        };
        // Snapshot: callbacks may add or remove listeners
        let mut ordered: Vec<(usize, Listener)> = listeners
            .iter()
            .map(|l| (self.priority(*l), *l))
            .collect();
        ordered.sort_by_key(|(priority, _)| *priority);

        let mut fired = 0;
        for (_, listener) in ordered {
            match listener {
                Listener::Direct(id) => {
                    let Some(mut handler) = self.handlers.remove(&id) else {
                        continue;
                    };
                    handler(self, &occurrence);
                    fired += 1;
                    if self.is_referenced(listener) {
                        self.handlers.insert(id, handler);
                    }
                }
                Listener::Managed(id) => {
                    let Some(mut managed) = self.managers.remove(&id) else {
                        continue;
                    };
                    if let Some(event) = managed.manager.record(&occurrence) {
                        (managed.callback)(self, &event);
                        fired += 1;
                    }
                    if self.is_referenced(listener) {
                        self.managers.insert(id, managed);
                    }
                }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::selection::Mode;
    use crate::spec::tests::SAMPLE_SPEC;
    use crate::spec::DeviceSpec;
    use crate::ui::{MarkupRenderer, UiGroup};
    use chrono::{Duration, TimeZone};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingTransport(Arc<Mutex<Vec<(DeviceId, Command)>>>);

    impl RecordingTransport {
        fn sent(&self) -> Vec<(DeviceId, Command)> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, device: &DeviceId, command: Command) {
            self.0.lock().unwrap().push((device.clone(), command));
        }
    }

    fn engine() -> (Engine, RecordingTransport) {
        let index = DeviceSpec::from_json(SAMPLE_SPEC).unwrap().index().unwrap();
        let transport = RecordingTransport::default();
        let engine = Engine::new(
            index,
            Box::new(MarkupRenderer::new()),
            Box::new(transport.clone()),
        )
        .with_seed(7);
        (engine, transport)
    }

    fn id(id: &str) -> DeviceId {
        DeviceId::from(id)
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 6, 1, 12, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn kinds(engine: &mut Engine) -> Vec<ErrorKind> {
        engine.take_diagnostics().iter().map(ChordError::kind).collect()
    }

    #[test]
    fn test_select_exact_set() {
        let (mut engine, _) = engine();
        let selection = engine.select(r#".showable[size="small"]"#);
        assert_eq!(selection.device_ids(), &[id("glass"), id("moto360")]);
        assert_eq!(selection.selector(), Some(r#".showable[size="small"]"#));
        assert!(engine.take_diagnostics().is_empty());
    }

    #[test]
    fn test_invalid_and_unknown_selectors_are_reported() {
        let (mut engine, _) = engine();
        assert!(engine.select(".showable[size=").is_empty());
        assert_eq!(kinds(&mut engine), vec![ErrorKind::InvalidSelector]);

        assert!(engine.select(".flyable").is_empty());
        assert_eq!(kinds(&mut engine), vec![ErrorKind::UnknownCapability]);

        let err = engine.try_select("#").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSelector);
    }

    #[test]
    fn test_default_mode_prefers_live_devices() {
        let (mut engine, _) = engine();
        engine.device_joined(id("p1"), "phone", Some("pixel")).unwrap();
        engine.device_joined(id("p2"), "phone", Some("pixel")).unwrap();

        let mut selection = engine.select(":phone");
        assert_eq!(selection.device_ids(), &[id("p2"), id("p1"), id("nexus5")]);

        let mut chosen = Vec::new();
        for _ in 0..50 {
            selection.call_with(&mut engine, "5551234", |d| chosen.push(d.id.clone()));
        }
        assert_eq!(chosen.len(), 50);
        assert!(chosen.iter().all(|c| c == &id("p1") || c == &id("p2")));
        assert!(chosen.contains(&id("p1")) && chosen.contains(&id("p2")));
    }

    #[test]
    fn test_departed_member_is_skipped() {
        let (mut engine, _) = engine();
        let mut selection = engine.select(".showable");
        selection.all(None);
        assert!(engine.device_left(&id("nexus9")));
        assert!(!engine.device_left(&id("nexus9")));

        let mut shown = Vec::new();
        selection.show_with(&mut engine, "<p>hi</p>", |d| shown.push(d.id.clone()));
        assert_eq!(shown, vec![id("glass"), id("moto360"), id("nexus5")]);
        assert_eq!(selection.size(), 4);
        assert!(engine.take_diagnostics().is_empty());
    }

    #[test]
    fn test_not_with_selector_leaves_registry_alone() {
        let (mut engine, _) = engine();
        let mut selection = engine.select_all();
        selection.not(&mut engine, ":watch");
        assert_eq!(selection.device_ids(), &[id("glass"), id("nexus5"), id("nexus9")]);
        assert_eq!(engine.registry().len(), 4);

        let phones = engine.find_by_type("phone");
        selection.not(&mut engine, &phones).not(&mut engine, &id("glass"));
        assert_eq!(selection.device_ids(), &[id("nexus9")]);
    }

    #[test]
    fn test_empty_selection_reports_no_device() {
        let (mut engine, transport) = engine();
        let mut selection = engine.select("none");
        selection.show(&mut engine, "<p>hi</p>").play(&mut engine, "a.mp3");
        assert_eq!(
            kinds(&mut engine),
            vec![ErrorKind::NoDeviceAvailable, ErrorKind::NoDeviceAvailable]
        );
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_listener_priority() {
        let (mut engine, _) = engine();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut pair = engine.select("#moto360,#nexus5");
        let l = log.clone();
        pair.all(None).on(&mut engine, "shake", move |_, _| l.lock().unwrap().push("all"));
        let l = log.clone();
        pair.set_mode(Mode::Default)
            .on(&mut engine, "shake", move |_, _| l.lock().unwrap().push("default"));
        let l = log.clone();
        engine.on_device(&id("nexus5"), "shake", move |_, _| l.lock().unwrap().push("direct"));

        assert_eq!(engine.trigger_at(&id("moto360"), "shake", None, at(0)), 1);
        assert_eq!(engine.trigger_at(&id("nexus5"), "shake", None, at(100)), 3);
        assert_eq!(*log.lock().unwrap(), vec!["default", "direct", "default", "all"]);
    }

    #[test]
    fn test_equal_priority_listeners_fire_in_registration_order() {
        let (mut engine, _) = engine();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut phone = engine.select("#nexus5");
        let l = log.clone();
        phone.on(&mut engine, "tap", move |_, _| l.lock().unwrap().push("default 1"));
        let l = log.clone();
        engine.on_device(&id("nexus5"), "tap", move |_, _| l.lock().unwrap().push("direct 1"));
        let l = log.clone();
        phone.on(&mut engine, "tap", move |_, _| l.lock().unwrap().push("default 2"));
        let l = log.clone();
        engine.on_device(&id("nexus5"), "tap", move |_, _| l.lock().unwrap().push("direct 2"));

        assert_eq!(engine.trigger_at(&id("nexus5"), "tap", None, at(0)), 4);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["direct 1", "direct 2", "default 1", "default 2"]
        );
    }

    #[test]
    fn test_all_mode_window_through_engine() {
        let (mut engine, _) = engine();
        let values = Arc::new(Mutex::new(Vec::new()));
        let v = values.clone();
        engine
            .select(".shakable")
            .all(None)
            .on(&mut engine, "shake", move |_, e| v.lock().unwrap().push(e.values().to_vec()));

        engine.trigger_at(&id("moto360"), "shake", Some("1".into()), at(0));
        engine.trigger_at(&id("nexus5"), "shake", Some("2".into()), at(1500));
        assert!(values.lock().unwrap().is_empty());

        engine.trigger_at(&id("moto360"), "shake", Some("3".into()), at(2400));
        assert_eq!(
            *values.lock().unwrap(),
            vec![vec![Some("3".to_string()), Some("2".to_string())]]
        );
    }

    #[test]
    fn test_combine_on_routes_through_capability() {
        let (mut engine, _) = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut everything = engine.combine(None);
        let s = seen.clone();
        everything.on(&mut engine, "shake", move |_, e| {
            s.lock().unwrap().push((e.devices().size(), e.value().map(str::to_string)))
        });
        let s = seen.clone();
        everything.on(&mut engine, "tap:button", move |_, e| {
            s.lock().unwrap().push((e.devices().size(), e.value().map(str::to_string)))
        });

        // glass and nexus9 cannot shake, so the window over all four never fills
        engine.trigger_at(&id("moto360"), "shake", None, at(0));
        assert_eq!(engine.trigger_at(&id("nexus5"), "shake", Some("hard".into()), at(10)), 0);
        assert_eq!(engine.trigger_at(&id("glass"), "shake", None, at(15)), 0);
        assert!(seen.lock().unwrap().is_empty());

        // tap:button fires at once
        engine.trigger_at(&id("nexus9"), "tap:button", Some("next".into()), at(20));
        assert_eq!(*seen.lock().unwrap(), vec![(4, Some("next".to_string()))]);

        everything.on(&mut engine, "wave", |_, _| {});
        assert_eq!(kinds(&mut engine), vec![ErrorKind::UnknownCapability]);
    }

    #[test]
    fn test_first_listener_turns_event_on_at_live_device() {
        let (mut engine, transport) = engine();
        engine.device_joined(id("p1"), "phone", Some("pixel")).unwrap();

        let mut phones = engine.select(":phone");
        phones.all(None).on(&mut engine, "shake", |_, _| {});
        phones.on(&mut engine, "shake", |_, _| {});

        let on: Vec<_> = transport
            .sent()
            .into_iter()
            .filter(|(_, c)| matches!(c, Command::On { .. }))
            .collect();
        assert_eq!(
            on,
            vec![(id("p1"), Command::On { event: "shake".to_string() })]
        );
    }

    #[test]
    fn test_combine_show_places_image_then_remainder() {
        let (mut engine, _) = engine();
        let markup = r#"<button>a</button><img src="x.jpg"/><button>b</button>"#;
        let mut everything = engine.combine(None);
        everything.show(&mut engine, markup);

        let ui_tags = |engine: &Engine, device: &str| -> Vec<String> {
            engine
                .registry()
                .find_by_id(&id(device))
                .unwrap()
                .ui
                .iter()
                .map(|g| g.tag.clone())
                .collect()
        };
        assert_eq!(ui_tags(&engine, "nexus5"), vec!["IMG"]);
        assert_eq!(ui_tags(&engine, "glass"), vec!["BUTTON", "BUTTON"]);
        assert!(ui_tags(&engine, "moto360").is_empty());
        assert!(ui_tags(&engine, "nexus9").is_empty());

        // occupied devices are skipped the next time
        everything.show(&mut engine, markup);
        assert_eq!(ui_tags(&engine, "nexus9"), vec!["IMG"]);
        assert_eq!(ui_tags(&engine, "moto360"), vec!["BUTTON", "BUTTON"]);

        engine.reset_devices();
        assert!(engine.registry().devices().iter().all(|d| !d.has_ui()));
    }

    #[test]
    fn test_show_sends_panel_or_cards_to_live_devices() {
        let (mut engine, transport) = engine();
        engine.device_joined(id("p1"), "phone", Some("pixel")).unwrap();
        engine.device_joined(id("w1"), "watch", Some("gear")).unwrap();

        let mut live = engine.select("#pixel,#gear");
        live.all(None).show(&mut engine, r#"<button value="ok">OK</button>"#);

        let shows: Vec<_> = transport
            .sent()
            .into_iter()
            .filter_map(|(d, c)| match c {
                Command::Show { content } => Some((d, content)),
                _ => None,
            })
            .collect();
        assert_eq!(shows.len(), 2);
        for (device, content) in shows {
            match content {
                ShowPayload::Markup(markup) => {
                    assert_eq!(device, id("p1"));
                    assert!(markup.starts_with("<div id=\"rootPanel\">"));
                }
                ShowPayload::Cards(groups) => {
                    assert_eq!(device, id("w1"));
                    assert_eq!(groups[0].tag, "BUTTON");
                }
            }
        }
        // a show wakes the device first
        assert_eq!(transport.sent()[0].1, Command::Wakeup);
    }

    #[test]
    fn test_update_ui_attr_reshows_hosting_device() {
        let (mut engine, transport) = engine();
        engine.device_joined(id("p1"), "phone", Some("pixel")).unwrap();
        let mut selection = engine.select("#pixel,#nexus9");
        selection.show(&mut engine, r#"<img id="view" src="1.jpg"/>"#);

        let hosting = selection.device_hosting_ui(&engine, "view");
        assert_eq!(hosting.device_ids(), &[id("p1")]);

        let before = transport.sent().len();
        selection.update_ui_attr(&mut engine, "view", "src", "2.jpg");
        let device = engine.registry().find_by_id(&id("p1")).unwrap();
        assert_eq!(device.ui[0].members[0].src.as_deref(), Some("2.jpg"));
        assert!(transport.sent().len() > before);
    }

    #[test]
    fn test_start_app_in_combine_goes_to_normal_screen() {
        let (mut engine, transport) = engine();
        engine.device_joined(id("p1"), "phone", Some("pixel")).unwrap();
        let mut selection = engine.select("#gear,#pixel");
        assert_eq!(selection.size(), 1);
        selection.combine(None).start_app(&mut engine, "slideshow");
        assert!(transport.sent().contains(&(
            id("p1"),
            Command::StartApp {
                app: "slideshow".to_string()
            }
        )));

        let mut watches = engine.select(":watch");
        watches.combine(None).start_app(&mut engine, "slideshow");
        assert_eq!(kinds(&mut engine), vec![ErrorKind::NoDeviceAvailable]);
    }

    #[test]
    fn test_device_lifecycle() {
        let (mut engine, _) = engine();
        engine.device_joined(id("p1"), "phone", None).unwrap();
        let err = engine.device_joined(id("p1"), "watch", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateDeviceId);
        assert!(engine.device_joined(id("t"), "toaster", None).is_err());

        let added = engine.add_emulated_device(None, "tablet", Some("Tab")).unwrap();
        assert_eq!(engine.registry().devices()[0].id, added);
        assert_eq!(engine.registry().devices()[0].name, "tab");
        assert_eq!(engine.registry().devices()[1].id, id("p1"));

        let counts = BTreeMap::from([("watch".to_string(), 2)]);
        engine.set_emulated_devices(&counts, true);
        let ids: Vec<_> = engine.registry().devices().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "watch0", "watch1"]);

        engine.set_emulated_devices(&counts, false);
        assert_eq!(engine.registry().len(), 2);
        assert!(engine.registry().devices().iter().all(|d| !d.live));
    }

    #[test]
    fn test_departed_device_loses_listeners() {
        let (mut engine, _) = engine();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        engine.on_device(&id("moto360"), "tap", move |_, _| *c.lock().unwrap() += 1);
        assert_eq!(engine.trigger(&id("moto360"), "tap", None), 1);

        engine.device_left(&id("moto360"));
        assert_eq!(engine.trigger(&id("moto360"), "tap", None), 0);
        assert_eq!(kinds(&mut engine), vec![ErrorKind::UnknownDevice]);
        assert!(engine.handlers.is_empty());
    }

    #[test]
    fn test_callback_can_drive_selections() {
        let (mut engine, _) = engine();
        let mut watch = engine.select(":watch");
        watch.on(&mut engine, "tap", |engine, event| {
            let value = event.value().unwrap_or("none").to_string();
            engine.select(":tablet").show(engine, &value);
        });
        engine.trigger(&id("moto360"), "tap", Some("hello".into()));

        let tablet = engine.registry().find_by_id(&id("nexus9")).unwrap();
        assert_eq!(tablet.ui, vec![UiGroup::text("hello")]);
    }

    #[test]
    fn test_layouts_and_suggestions() {
        let (mut engine, _) = engine();
        assert!(engine.get_layout_by_id("controller").is_some());
        assert!(engine.get_layout_by_id("missing").is_none());
        engine.load_layouts(HashMap::from([("x".to_string(), "<p>x</p>".to_string())]));
        assert_eq!(engine.get_layout_by_id("x"), Some("<p>x</p>"));

        let suggestions = engine.suggest_selectors(&[id("nexus9")], &[]);
        assert_eq!(suggestions[0].matched, vec![id("nexus9")]);
        assert!(suggestions.last().unwrap().selector.contains("nexus9"));
    }
}
