//! Adapter (physical device) enumeration and selection.
//!
//! Selection is preference-first: the caller names a vendor substring and
//! the first suitable adapter whose description contains it wins. When no
//! adapter matches, selection falls back to the highest-scored suitable
//! adapter and logs a warning, so a missing preferred GPU never blocks
//! startup but never goes unnoticed either.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Queue family indices required for rendering and presentation.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueFamilies {
    /// Family supporting graphics operations.
    pub graphics: Option<u32>,
    /// Family supporting presentation to the surface.
    pub present: Option<u32>,
}

impl QueueFamilies {
    /// True when both required families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Returns the distinct family indices, for device queue creation.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics {
            families.push(graphics);
        }
        if let Some(present) = self.present {
            if !families.contains(&present) {
                families.push(present);
            }
        }
        families
    }
}

/// A selected adapter: the handle plus everything device creation needs.
#[derive(Clone)]
pub struct AdapterInfo {
    /// Physical device handle.
    pub handle: vk::PhysicalDevice,
    /// Device properties (name, type, limits, API version).
    pub properties: vk::PhysicalDeviceProperties,
    /// Queue families found on this adapter.
    pub queue_families: QueueFamilies,
    /// Whether this adapter matched the caller's vendor preference.
    pub vendor_match: bool,
}

impl AdapterInfo {
    /// Returns the adapter description string.
    pub fn name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("unknown adapter")
        }
    }

    /// Returns the adapter's supported API version.
    #[inline]
    pub fn api_version(&self) -> u32 {
        self.properties.api_version
    }

    fn kind_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "discrete",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual",
            vk::PhysicalDeviceType::CPU => "software",
            _ => "other",
        }
    }
}

impl std::fmt::Debug for AdapterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterInfo")
            .field("name", &self.name())
            .field("kind", &self.kind_name())
            .field("vendor_match", &self.vendor_match)
            .finish()
    }
}

/// Case-insensitive substring match against an adapter description.
pub fn vendor_matches(description: &str, preferred: &str) -> bool {
    if preferred.is_empty() {
        return false;
    }
    description
        .to_ascii_lowercase()
        .contains(&preferred.to_ascii_lowercase())
}

/// Rates an adapter; higher is better. Used only when no adapter matches
/// the vendor preference.
pub fn score_adapter(properties: &vk::PhysicalDeviceProperties) -> u32 {
    let kind = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };
    kind + properties.limits.max_image_dimension2_d
}

/// Picks an entry from `(description, score)` candidates.
///
/// Returns the index of the first candidate matching `preferred`, with a
/// vendor-match flag; otherwise the index of the highest-scored candidate
/// with the flag cleared. `None` only when `candidates` is empty.
pub fn choose_among(candidates: &[(String, u32)], preferred: Option<&str>) -> Option<(usize, bool)> {
    if candidates.is_empty() {
        return None;
    }

    if let Some(preferred) = preferred {
        for (i, (description, _)) in candidates.iter().enumerate() {
            if vendor_matches(description, preferred) {
                return Some((i, true));
            }
        }
    }

    let best = candidates
        .iter()
        .enumerate()
        .max_by_key(|(_, (_, score))| *score)
        .map(|(i, _)| i)?;

    Some((best, false))
}

/// Enumerates adapters and selects one.
///
/// An adapter is suitable when it exposes graphics and present queue
/// families for `surface` and supports at least `min_api_version`. Among
/// suitable adapters, the vendor preference decides as described on
/// [`choose_among`]; a preference miss logs a warning because downstream
/// device creation binds to exactly the adapter returned here.
pub fn select_adapter(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
    preferred_vendor: Option<&str>,
    min_api_version: u32,
) -> RhiResult<AdapterInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        warn!("no Vulkan-capable adapters present");
        return Err(RhiError::NoSuitableAdapter);
    }

    info!("enumerated {} adapter(s)", devices.len());

    let mut suitable: Vec<AdapterInfo> = Vec::new();
    for device in devices {
        match probe_adapter(instance, device, surface, surface_loader, min_api_version) {
            Some(info) => suitable.push(info),
            None => continue,
        }
    }

    if suitable.is_empty() {
        warn!("no adapter satisfies the renderer's requirements");
        return Err(RhiError::NoSuitableAdapter);
    }

    let candidates: Vec<(String, u32)> = suitable
        .iter()
        .map(|info| (info.name().to_owned(), score_adapter(&info.properties)))
        .collect();

    // Non-empty list established above.
    let (index, vendor_match) = choose_among(&candidates, preferred_vendor)
        .expect("candidate list cannot be empty here");

    if !vendor_match {
        if let Some(preferred) = preferred_vendor {
            warn!(
                "no adapter matches vendor preference '{}', falling back to '{}'",
                preferred, candidates[index].0
            );
        }
    }

    let mut selected = suitable.swap_remove(index);
    selected.vendor_match = vendor_match;

    info!(
        "selected adapter '{}' ({}, API {}.{})",
        selected.name(),
        selected.kind_name(),
        vk::api_version_major(selected.api_version()),
        vk::api_version_minor(selected.api_version()),
    );

    Ok(selected)
}

/// Checks a single adapter against the renderer's requirements.
fn probe_adapter(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
    min_api_version: u32,
) -> Option<AdapterInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };

    let name = unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("unknown")
    };

    if properties.api_version < min_api_version {
        debug!(
            "adapter '{}' skipped: API {}.{} below required {}.{}",
            name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_major(min_api_version),
            vk::api_version_minor(min_api_version),
        );
        return None;
    }

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!(
            "adapter '{}' skipped: graphics={}, present={}",
            name,
            queue_families.graphics.is_some(),
            queue_families.present.is_some()
        );
        return None;
    }

    Some(AdapterInfo {
        handle: device,
        properties,
        queue_families,
        vendor_match: false,
    })
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilies {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilies::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        if indices.graphics.is_none()
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics = Some(i);
        }

        if indices.present.is_none() {
            let supported = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, i, surface)
                    .unwrap_or(false)
            };
            if supported {
                indices.present = Some(i);
            }
        }

        if indices.is_complete() {
            break;
        }
    }

    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_families_completeness() {
        let mut families = QueueFamilies::default();
        assert!(!families.is_complete());

        families.graphics = Some(0);
        assert!(!families.is_complete());

        families.present = Some(0);
        assert!(families.is_complete());
    }

    #[test]
    fn unique_families_dedupes_shared_index() {
        let shared = QueueFamilies {
            graphics: Some(0),
            present: Some(0),
        };
        assert_eq!(shared.unique(), vec![0]);

        let split = QueueFamilies {
            graphics: Some(0),
            present: Some(2),
        };
        assert_eq!(split.unique(), vec![0, 2]);
    }

    #[test]
    fn vendor_match_is_case_insensitive() {
        assert!(vendor_matches("NVIDIA GeForce RTX 4070", "nvidia"));
        assert!(vendor_matches("AMD Radeon RX 7800", "Radeon"));
        assert!(!vendor_matches("Intel Arc A770", "NVIDIA"));
        assert!(!vendor_matches("NVIDIA GeForce", ""));
    }

    #[test]
    fn score_prefers_discrete_adapters() {
        let mut discrete = vk::PhysicalDeviceProperties::default();
        discrete.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;

        let mut integrated = vk::PhysicalDeviceProperties::default();
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        integrated.limits.max_image_dimension2_d = 4096;

        assert!(score_adapter(&discrete) > score_adapter(&integrated));
    }

    #[test]
    fn choose_among_prefers_vendor_match() {
        let candidates = vec![
            ("Intel Arc A770".to_owned(), 5_000),
            ("NVIDIA GeForce RTX 4070".to_owned(), 1_000),
        ];
        let (index, matched) = choose_among(&candidates, Some("NVIDIA")).unwrap();
        assert_eq!(index, 1);
        assert!(matched);
    }

    #[test]
    fn choose_among_falls_back_to_best_score() {
        // The vendor-preference miss must still yield a usable adapter.
        let candidates = vec![
            ("Intel Arc A770".to_owned(), 1_000),
            ("AMD Radeon RX 7800".to_owned(), 10_000),
        ];
        let (index, matched) = choose_among(&candidates, Some("NVIDIA")).unwrap();
        assert_eq!(index, 1);
        assert!(!matched);
    }

    #[test]
    fn choose_among_without_preference_uses_score() {
        let candidates = vec![
            ("A".to_owned(), 10),
            ("B".to_owned(), 30),
            ("C".to_owned(), 20),
        ];
        let (index, matched) = choose_among(&candidates, None).unwrap();
        assert_eq!(index, 1);
        assert!(!matched);
    }

    #[test]
    fn choose_among_empty_is_none() {
        assert!(choose_among(&[], Some("NVIDIA")).is_none());
    }
}
