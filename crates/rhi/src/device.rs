//! Logical device and queue management.
//!
//! The device is created from the adapter that selection actually returned;
//! there is no silent fallback to a driver default. The device owns every
//! other GPU object transitively and is the last thing destroyed, after a
//! full idle wait.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::adapter::{AdapterInfo, QueueFamilies};
use crate::error::RhiResult;
use crate::instance::Instance;

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] =
    &[ash::khr::swapchain::NAME, ash::khr::dynamic_rendering::NAME];

/// Logical device wrapper.
///
/// Shared across the GPU object wrappers via `Arc`; the allocator is behind
/// a `Mutex`. Dropping the device waits for the GPU to go idle first.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    dynamic_rendering: ash::khr::dynamic_rendering::Device,
    allocator: Mutex<Allocator>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilies,
}

impl Device {
    /// Creates the logical device on the selected adapter.
    ///
    /// Enables the swapchain and dynamic-rendering extensions, timeline
    /// semaphores (the frame fence), and initializes the memory allocator.
    pub fn new(instance: &Instance, adapter: &AdapterInfo) -> RhiResult<Arc<Self>> {
        let queue_families = adapter.queue_families;
        let unique_families = queue_families.unique();
        let priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        debug!("creating queues for families {:?}", unique_families);

        // The frame fence is a timeline semaphore (core 1.2); rendering uses
        // the dynamic-rendering extension so no render passes are needed.
        let mut timeline_features =
            vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let mut dynamic_rendering_features =
            vk::PhysicalDeviceDynamicRenderingFeatures::default().dynamic_rendering(true);

        let extension_names: Vec<*const i8> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut timeline_features)
            .push_next(&mut dynamic_rendering_features);

        let device = unsafe {
            instance
                .handle()
                .create_device(adapter.handle, &create_info, None)?
        };

        info!(
            "logical device created on '{}' with {} extension(s)",
            adapter.name(),
            DEVICE_EXTENSIONS.len()
        );

        // Selection guarantees both families exist.
        let graphics_family = queue_families.graphics.expect("selection requires graphics");
        let present_family = queue_families.present.expect("selection requires present");

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "queues retrieved (graphics family {}, present family {})",
            graphics_family, present_family
        );

        let dynamic_rendering =
            ash::khr::dynamic_rendering::Device::new(instance.handle(), &device);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: adapter.handle,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: adapter.handle,
            dynamic_rendering,
            allocator: Mutex::new(allocator),
            graphics_queue,
            present_queue,
            queue_families,
        }))
    }

    /// Returns the logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the dynamic-rendering extension loader.
    #[inline]
    pub fn dynamic_rendering(&self) -> &ash::khr::dynamic_rendering::Device {
        &self.dynamic_rendering
    }

    /// Returns the graphics queue.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilies {
        &self.queue_families
    }

    /// Returns the memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Blocks until all queues are idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits to the graphics queue.
    ///
    /// # Safety
    ///
    /// Command buffers must be fully recorded (closed) and the submission's
    /// synchronization must be arranged by the caller.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        self.device
            .queue_submit(self.graphics_queue, submit_infos, fence)?;
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("device_wait_idle failed during drop: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        info!("logical device destroyed");
    }
}

// Safety: the raw handles are plain identifiers and the allocator is behind
// a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_extensions_cover_present_and_rendering() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::dynamic_rendering::NAME));
    }

    #[test]
    fn device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
