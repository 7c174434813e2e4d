//! Combine-mode UI distribution
//!
//! Two independent first-fit scans over the members in order:
//! 1. the first image group goes to the first free device whose screen is
//!    not small
//! 2. everything else goes to the first device still free after step 1
//!
//! A device is free when it hosts no UI. At most two devices receive content.

use tracing::debug;

use crate::device::{Device, DeviceId};
use crate::ui::{UiContent, UiGroup};

/// Assign content groups to devices, in member order
pub fn place(devices: &[&Device], content: &UiContent) -> Vec<(DeviceId, UiContent)> {
    let mut placements = Vec::new();
    let mut taken: Vec<&DeviceId> = Vec::new();
    let is_free = |d: &Device, taken: &[&DeviceId]| !d.has_ui() && !taken.contains(&&d.id);

    let image_idx = content.groups.iter().position(UiGroup::is_image);
    let mut placed_image = None;
    if let Some(idx) = image_idx {
        let target = devices.iter().find(|d| {
            is_free(d, &taken) && d.is("showable") && d.screen_size() != Some("small")
        });
        match target {
            Some(device) => {
                placements.push((
                    device.id.clone(),
                    UiContent::new(vec![content.groups[idx].clone()]),
                ));
                taken.push(&device.id);
                placed_image = Some(idx);
            }
            None => debug!("No free large screen for the image, keeping it with the rest"),
        }
    }

    let remainder: Vec<UiGroup> = content
        .groups
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != placed_image)
        .map(|(_, g)| g.clone())
        .collect();
    if remainder.is_empty() {
        return placements;
    }

    match devices.iter().find(|d| is_free(d, &taken)) {
        Some(device) => placements.push((device.id.clone(), UiContent::new(remainder))),
        None => debug!(groups = remainder.len(), "No free device for the remaining UI"),
    }
    placements
}
