//! Vulkan instance creation and API-level negotiation.
//!
//! Device capability is negotiated the same way the original explicit-API
//! loop works: an ordered candidate list of API levels is probed from the
//! most capable downward, and the first level the loader supports wins.
//! Exhausting the list is fatal; there is no retry, since a missing or
//! outdated driver is not a transient condition.

use std::ffi::CStr;

use ash::{vk, Entry};
use tracing::{error, info, warn};

use crate::error::{RhiError, RhiResult};

/// Candidate API levels, most capable first.
///
/// 1.2 is the floor: the frame fence is a timeline semaphore, which is core
/// in 1.2.
pub const API_LEVEL_CANDIDATES: [u32; 2] = [vk::API_VERSION_1_3, vk::API_VERSION_1_2];

/// The Khronos validation layer name.
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Picks the highest candidate level the loader supports.
///
/// Returns `None` when every candidate exceeds `supported`.
pub fn negotiate_api_level(supported: u32) -> Option<u32> {
    API_LEVEL_CANDIDATES
        .iter()
        .copied()
        .find(|&candidate| candidate <= supported)
}

/// Vulkan instance wrapper.
///
/// Owns the entry loader, the instance handle, the negotiated API level and
/// the optional validation-layer debug messenger. Dropping the instance
/// destroys the messenger and the instance, in that order.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    api_level: u32,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates the instance at the highest supported candidate API level.
    ///
    /// With `enable_validation` the Khronos validation layer and a debug
    /// messenger are attached when available; a requested-but-missing layer
    /// only logs a warning.
    pub fn new(enable_validation: bool) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let supported = unsafe { entry.try_enumerate_instance_version()? }
            .unwrap_or(vk::API_VERSION_1_0);

        let api_level = negotiate_api_level(supported).ok_or_else(|| {
            error!(
                "loader supports only Vulkan {}.{}, need at least 1.2",
                vk::api_version_major(supported),
                vk::api_version_minor(supported)
            );
            RhiError::NoSupportedApiLevel {
                major: vk::api_version_major(supported),
                minor: vk::api_version_minor(supported),
            }
        })?;

        let validation = enable_validation && validation_layer_available(&entry)?;
        if enable_validation && !validation {
            warn!("validation layer requested but not available");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"trigon")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"trigon")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(api_level);

        let mut extensions = surface_extensions();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers: Vec<*const i8> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "instance created at API level {}.{} (loader supports {}.{})",
            vk::api_version_major(api_level),
            vk::api_version_minor(api_level),
            vk::api_version_major(supported),
            vk::api_version_minor(supported)
        );

        let (debug_utils, debug_messenger) = if validation {
            let utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = create_debug_messenger(&utils)?;
            info!("validation layer enabled");
            (Some(utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            api_level,
            debug_utils,
            debug_messenger,
        })
    }

    /// Returns the instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the entry loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns the negotiated API level.
    #[inline]
    pub fn api_level(&self) -> u32 {
        self.api_level
    }

    /// Returns whether the validation layer is active.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("instance destroyed");
    }
}

/// Instance extensions needed to present to a window surface.
fn surface_extensions() -> Vec<*const i8> {
    let mut extensions = vec![ash::khr::surface::NAME.as_ptr()];

    #[cfg(target_os = "windows")]
    extensions.push(ash::khr::win32_surface::NAME.as_ptr());

    #[cfg(target_os = "linux")]
    {
        extensions.push(ash::khr::xlib_surface::NAME.as_ptr());
        extensions.push(ash::khr::wayland_surface::NAME.as_ptr());
    }

    #[cfg(target_os = "macos")]
    extensions.push(ash::ext::metal_surface::NAME.as_ptr());

    extensions
}

fn validation_layer_available(entry: &Entry) -> RhiResult<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    let wanted = VALIDATION_LAYER.to_bytes_with_nul();

    Ok(layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name.to_bytes_with_nul() == wanted
    }))
}

fn create_debug_messenger(
    utils: &ash::ext::debug_utils::Instance,
) -> RhiResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    Ok(unsafe { utils.create_debug_utils_messenger(&create_info, None)? })
}

/// Validation-layer callback; routes messages into tracing.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }

    let data = &*callback_data;
    let message = if data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        CStr::from_ptr(data.p_message).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {}", message);
    } else {
        warn!("[vulkan] {}", message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_prefers_highest_candidate() {
        assert_eq!(
            negotiate_api_level(vk::API_VERSION_1_3),
            Some(vk::API_VERSION_1_3)
        );
        // A loader newer than every candidate still yields the top candidate.
        let future = vk::make_api_version(0, 1, 4, 0);
        assert_eq!(negotiate_api_level(future), Some(vk::API_VERSION_1_3));
    }

    #[test]
    fn negotiate_falls_back_in_order() {
        assert_eq!(
            negotiate_api_level(vk::API_VERSION_1_2),
            Some(vk::API_VERSION_1_2)
        );
        let v12_patch = vk::make_api_version(0, 1, 2, 198);
        assert_eq!(negotiate_api_level(v12_patch), Some(vk::API_VERSION_1_2));
    }

    #[test]
    fn negotiate_fails_when_list_exhausted() {
        assert_eq!(negotiate_api_level(vk::API_VERSION_1_1), None);
        assert_eq!(negotiate_api_level(vk::API_VERSION_1_0), None);
    }

    #[test]
    fn candidates_are_strictly_descending() {
        for pair in API_LEVEL_CANDIDATES.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }

    #[test]
    fn surface_extensions_include_base_surface() {
        let extensions = surface_extensions();
        assert!(!extensions.is_empty());
        let first = unsafe { CStr::from_ptr(extensions[0]) };
        assert_eq!(first, ash::khr::surface::NAME);
    }
}
