//! Evaluates compiled selectors against device capability records

use crate::device::Device;
use crate::selector::{Constraint, Constraints, Group, Query, Selector, TargetKey};

impl Constraint {
    /// Whether a stored value satisfies this constraint; a missing value never does
    pub fn holds(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match self {
            Self::And(values) => values.iter().all(|v| v == actual),
            Self::Or(values) => values.iter().any(|v| v == actual),
            Self::Exact(value) => value == actual,
        }
    }
}

/// Whether a device satisfies a query
pub fn matches(device: &Device, query: &Query) -> bool {
    match query {
        Query::And(groups) => groups.iter().all(|g| group_matches(device, g)),
        Query::Or(groups) => groups.iter().any(|g| group_matches(device, g)),
    }
}

/// Whether a device satisfies every target key of a group
pub fn group_matches(device: &Device, group: &Group) -> bool {
    group
        .targets()
        .all(|(key, constraints)| target_matches(device, key, constraints))
}

fn target_matches(device: &Device, key: &TargetKey, constraints: &Constraints) -> bool {
    match key {
        TargetKey::Wildcard => constraints
            .iter()
            .all(|(property, c)| c.holds(device.property(property))),
        TargetKey::Capability(name) => match device.capability.get(name) {
            Some(capability) => constraints
                .iter()
                .all(|(attr, c)| c.holds(capability.attr(attr))),
            None => false,
        },
    }
}

impl Selector {
    /// Whether a device is selected
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            Self::Nothing => false,
            Self::Query(query) => matches(device, query),
        }
    }
}
