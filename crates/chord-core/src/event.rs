//! Events and the per-selection event correlation state
//!
//! Raw occurrences arrive one device at a time. An [`EventManager`] turns them
//! into the logical events its selection's mode calls for:
//! - `default`: every occurrence is passed through as is
//! - `all`: fires once every member has reported within the time window
//! - `combine`: like `all`, but `tap:button` fires immediately
//!
//! The window is only evaluated when an occurrence arrives; nothing expires
//! on a timer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::device::DeviceId;
use crate::selection::{Mode, Selection};

/// Event type that bypasses the window in `combine` mode
pub const TAP_BUTTON: &str = "tap:button";

/// An immutable event delivered to callbacks
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    devices: Selection,
    event_type: String,
    timestamp: DateTime<Utc>,
    values: Vec<Option<String>>,
}

impl Event {
    /// A single-device event
    pub fn single(
        device: DeviceId,
        event_type: &str,
        value: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            devices: Selection::new(None, vec![device]),
            event_type: event_type.to_string(),
            timestamp,
            values: vec![value.filter(|v| !v.is_empty())],
        }
    }

    /// A multi-device event carrying one value per slot
    pub fn aggregate(
        devices: Selection,
        event_type: &str,
        values: Vec<Option<String>>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            devices,
            event_type: event_type.to_string(),
            timestamp,
            values,
        }
    }

    /// Devices the event spans, carrying the originating mode
    pub fn devices(&self) -> &Selection {
        &self.devices
    }

    /// The device, when the event spans exactly one
    pub fn device(&self) -> Option<&DeviceId> {
        match self.devices.device_ids() {
            [device] => Some(device),
            _ => None,
        }
    }

    pub fn is_single(&self) -> bool {
        self.devices.size() == 1
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    /// The value, when the event carries exactly one
    pub fn value(&self) -> Option<&str> {
        match self.values.as_slice() {
            [value] => value.as_deref(),
            _ => None,
        }
    }
}

/// Correlation state for one (selection, event type, callback) registration
///
/// Slots are fixed at construction: devices added to the selection later are
/// not tracked.
#[derive(Debug, Clone)]
pub struct EventManager {
    selection: Selection,
    event_type: String,
    device_ids: Vec<DeviceId>,
    timestamps: Vec<Option<DateTime<Utc>>>,
    values: Vec<Option<String>>,
}

impl EventManager {
    pub fn new(selection: Selection, event_type: &str) -> Self {
        let device_ids = selection.device_ids().to_vec();
        let slots = device_ids.len();
        Self {
            selection,
            event_type: event_type.to_string(),
            device_ids,
            timestamps: vec![None; slots],
            values: vec![None; slots],
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn device_ids(&self) -> &[DeviceId] {
        &self.device_ids
    }

    /// How many devices this manager spans; orders handlers on a device
    pub fn device_num(&self) -> usize {
        match self.selection.mode() {
            Mode::Default => 1,
            Mode::All | Mode::Combine => self.selection.size(),
        }
    }

    /// Record an occurrence and return the logical event to deliver, if any
    pub fn record(&mut self, occurrence: &Event) -> Option<Event> {
        match self.selection.mode() {
            Mode::Default => Some(occurrence.clone()),
            Mode::All => self
                .check_window(occurrence)
                .then(|| self.aggregated(self.values.clone(), occurrence.timestamp())),
            Mode::Combine => {
                let in_window = self.check_window(occurrence);
                (in_window || occurrence.event_type() == TAP_BUTTON)
                    .then(|| self.aggregated(occurrence.values().to_vec(), occurrence.timestamp()))
            }
        }
    }

    /// Fill the reporting device's slot, then test every slot against the window
    fn check_window(&mut self, occurrence: &Event) -> bool {
        let Some(device) = occurrence.device() else {
            return false;
        };
        let Some(idx) = self.device_ids.iter().position(|id| id == device) else {
            return false;
        };
        self.timestamps[idx] = Some(occurrence.timestamp());
        self.values[idx] = occurrence.value().map(str::to_string);

        let mut earliest: Option<DateTime<Utc>> = None;
        let mut latest: Option<DateTime<Utc>> = None;
        for slot in &self.timestamps {
            let Some(t) = *slot else {
                return false;
            };
            earliest = Some(earliest.map_or(t, |e| e.min(t)));
            latest = Some(latest.map_or(t, |l| l.max(t)));
        }

        match (earliest, latest) {
            (Some(earliest), Some(latest)) => {
                latest - earliest <= self.selection.option().time_range()
            }
            _ => false,
        }
    }

    fn aggregated(&self, values: Vec<Option<String>>, timestamp: DateTime<Utc>) -> Event {
        Event::aggregate(self.selection.clone(), &self.event_type, values, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::SelectionOption;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 6, 1, 12, 0, 0).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(ms)
    }

    fn manager(mode: Mode, ids: &[&str], event_type: &str) -> EventManager {
        let mut selection = Selection::new(None, ids.iter().map(|id| DeviceId::from(*id)).collect());
        selection.set_mode(mode);
        EventManager::new(selection, event_type)
    }

    fn occurrence(device: &str, event_type: &str, value: Option<&str>, ms: i64) -> Event {
        Event::single(DeviceId::from(device), event_type, value.map(str::to_string), at(ms))
    }

    #[test]
    fn test_default_mode_passes_through() {
        let mut m = manager(Mode::Default, &["a", "b"], "shake");
        let fired = m.record(&occurrence("b", "shake", Some("x"), 0)).unwrap();
        assert!(fired.is_single());
        assert_eq!(fired.device(), Some(&DeviceId::from("b")));
        assert_eq!(fired.value(), Some("x"));
        assert_eq!(m.device_num(), 1);
    }

    #[test]
    fn test_all_mode_outside_window_does_not_fire() {
        let mut m = manager(Mode::All, &["a", "b"], "shake");
        assert!(m.record(&occurrence("a", "shake", None, 0)).is_none());
        assert!(m.record(&occurrence("b", "shake", None, 1500)).is_none());
    }

    #[test]
    fn test_all_mode_inside_window_fires_with_slot_values() {
        let mut m = manager(Mode::All, &["a", "b"], "shake");
        assert!(m.record(&occurrence("b", "shake", Some("vb"), 0)).is_none());
        let fired = m.record(&occurrence("a", "shake", Some("va"), 900)).unwrap();

        assert_eq!(fired.devices().size(), 2);
        assert_eq!(fired.devices().mode(), Mode::All);
        assert_eq!(
            fired.values(),
            &[Some("va".to_string()), Some("vb".to_string())]
        );
        assert_eq!(fired.timestamp(), at(900));
        assert_eq!(m.device_num(), 2);
    }

    #[test]
    fn test_all_mode_late_device_can_complete_later() {
        let mut m = manager(Mode::All, &["a", "b"], "shake");
        m.record(&occurrence("a", "shake", None, 0));
        assert!(m.record(&occurrence("b", "shake", None, 1500)).is_none());
        // a fresh occurrence from a brings the window back together
        assert!(m.record(&occurrence("a", "shake", None, 2000)).is_some());
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let mut m = manager(Mode::All, &["a", "b"], "shake");
        m.record(&occurrence("a", "shake", None, 0));
        assert!(m.record(&occurrence("b", "shake", None, 1000)).is_some());
    }

    #[test]
    fn test_custom_time_range() {
        let mut selection = Selection::new(None, vec![DeviceId::from("a"), DeviceId::from("b")]);
        selection.all(Some(SelectionOption::with_time_range_ms(200)));
        let mut m = EventManager::new(selection, "shake");
        m.record(&occurrence("a", "shake", None, 0));
        assert!(m.record(&occurrence("b", "shake", None, 300)).is_none());
    }

    #[test]
    fn test_unknown_device_is_ignored() {
        let mut m = manager(Mode::All, &["a"], "shake");
        assert!(m.record(&occurrence("zzz", "shake", None, 0)).is_none());
    }

    #[test]
    fn test_combine_tap_button_bypasses_window() {
        let mut m = manager(Mode::Combine, &["a", "b", "c"], TAP_BUTTON);
        let fired = m
            .record(&occurrence("c", TAP_BUTTON, Some("next"), 0))
            .unwrap();
        assert_eq!(fired.devices().size(), 3);
        assert_eq!(fired.values(), &[Some("next".to_string())]);
        assert_eq!(fired.value(), Some("next"));
    }

    #[test]
    fn test_combine_other_events_wait_for_window() {
        let mut m = manager(Mode::Combine, &["a", "b"], "shake");
        assert!(m.record(&occurrence("a", "shake", Some("1"), 0)).is_none());
        let fired = m.record(&occurrence("b", "shake", Some("2"), 10)).unwrap();
        assert_eq!(fired.values(), &[Some("2".to_string())]);
    }

    #[test]
    fn test_empty_value_is_none() {
        let event = occurrence("a", "tap", Some(""), 0);
        assert_eq!(event.value(), None);
        assert_eq!(event.values(), &[None]);
    }
}
