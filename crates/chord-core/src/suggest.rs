//! Selector suggestion for a hand-picked set of devices
//!
//! Candidates come from properties every picked device shares, then from
//! capabilities every picked device has (with the attribute values they
//! agree on). Candidates are ranked by how many devices they match, fewest
//! first, and a name-list selector is always offered last.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::device::{Device, DeviceId};
use crate::registry::DeviceRegistry;
use crate::selector::Selector;

/// Properties tried for the `*` candidate; names are left to the fallback
const SHARED_PROPERTIES: [&str; 3] = ["type", "joint", "os"];

/// A candidate selector and the devices it selects right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub selector: String,
    pub matched: Vec<DeviceId>,
}

/// Suggest selectors covering `include` and none of `exclude`
pub fn suggest(
    registry: &DeviceRegistry,
    capability_list: &[String],
    include: &[DeviceId],
    exclude: &[DeviceId],
) -> Vec<Suggestion> {
    let selected: Vec<&Device> = registry
        .devices()
        .iter()
        .filter(|d| include.contains(&d.id))
        .collect();
    if selected.is_empty() {
        return Vec::new();
    }

    let mut candidates = vec![property_selector(&selected)];
    for capability in capability_list {
        if selected.iter().all(|d| d.is(capability)) {
            candidates.push(capability_selector(&selected, capability));
        }
    }

    let mut suggestions: Vec<Suggestion> = candidates
        .into_iter()
        .filter_map(|selector| evaluate(registry, selector))
        .filter(|s| !s.matched.iter().any(|id| exclude.contains(id)))
        .collect();
    // Stable: equal coverage keeps generation order
    suggestions.sort_by_key(|s| s.matched.len());

    let names: Vec<&str> = selected.iter().map(|d| d.name.as_str()).collect();
    let fallback = format!("*{}", attribute("name", &names));
    if let Some(suggestion) = evaluate(registry, fallback) {
        suggestions.push(suggestion);
    }
    suggestions
}

fn evaluate(registry: &DeviceRegistry, selector: String) -> Option<Suggestion> {
    match Selector::compile(&selector) {
        Ok(compiled) => Some(Suggestion {
            matched: registry.query(&compiled),
            selector,
        }),
        Err(e) => {
            debug!(selector = %selector, error = %e, "Dropping suggestion");
            None
        }
    }
}

/// `:type[joint="..."]` or `*[type="a,b"][os="..."]`
fn property_selector(selected: &[&Device]) -> String {
    let mut shared: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for prop in SHARED_PROPERTIES {
        let values: Option<Vec<&str>> = selected.iter().map(|d| d.property(prop)).collect();
        if let Some(values) = values {
            let mut unique: Vec<&str> = Vec::new();
            for v in values {
                if !unique.contains(&v) {
                    unique.push(v);
                }
            }
            shared.insert(prop, unique);
        }
    }

    let single_type = match shared.get("type") {
        Some(types) if types.len() == 1 => Some(types[0]),
        _ => None,
    };
    let mut selector = match single_type {
        Some(device_type) => {
            shared.remove("type");
            format!(":{}", device_type)
        }
        None => "*".to_string(),
    };
    for (prop, values) in &shared {
        selector.push_str(&attribute(prop, values));
    }
    selector
}

/// `.capability[attr="value"]` with the attributes all devices agree on
fn capability_selector(selected: &[&Device], capability: &str) -> String {
    let mut selector = format!(".{}", capability);
    let Some(first) = selected.first().and_then(|d| d.capability.get(capability)) else {
        return selector;
    };
    for (key, value) in &first.attributes {
        let agreed = selected
            .iter()
            .all(|d| d.capability.get(capability).and_then(|c| c.attr(key)) == Some(value.as_str()));
        if agreed {
            selector.push_str(&attribute(key, &[value.as_str()]));
        }
    }
    selector
}

fn attribute(key: &str, values: &[&str]) -> String {
    format!("[{}=\"{}\"]", key, values.join(","))
}
