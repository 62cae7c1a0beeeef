//! Swapchain creation, acquisition, and presentation.
//!
//! The design targets a fixed two-buffer rotation presented with a sync
//! interval of 1: the present mode is always FIFO (vsync, guaranteed by the
//! spec), and every frame clears the whole target so no content carries
//! over between presents.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// Number of back-buffers requested; clamped to what the surface allows.
pub const BACK_BUFFER_COUNT: u32 = 2;

/// Surface support queried from the adapter.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Queries capabilities, formats, and present modes for the surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// True when the surface exposes at least one format and present mode.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// The acquired back-buffer for the current frame.
#[derive(Clone, Copy, Debug)]
pub struct AcquiredImage {
    /// Back-buffer index; always within `[0, image_count)`.
    pub index: u32,
    /// True when the swapchain still works but no longer matches the
    /// surface exactly.
    pub suboptimal: bool,
}

/// Swapchain wrapper.
///
/// Owns the swapchain handle and its images; render-target views live in
/// [`crate::target::RenderTargetTable`], slot-aligned with the image order
/// here.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Creates a swapchain for the surface.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        Self::create(instance, device, surface, width, height, vk::SwapchainKHR::null())
    }

    fn create(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<Self> {
        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader =
            ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let support =
            SurfaceSupport::query(device.physical_device(), surface, &surface_loader)?;
        if !support.is_adequate() {
            return Err(RhiError::Swapchain(
                "surface exposes no formats or present modes".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = fixed_present_mode();
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = clamp_image_count(
            BACK_BUFFER_COUNT,
            support.capabilities.min_image_count,
            support.capabilities.max_image_count,
        );

        info!(
            "creating swapchain: {}x{}, {:?}, {:?}, {} buffer(s)",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let families = device.queue_families();
        let graphics = families.graphics.expect("selection requires graphics");
        let present = families.present.expect("selection requires present");
        let family_indices = [graphics, present];

        let (sharing_mode, family_slice) = if graphics != present {
            (vk::SharingMode::CONCURRENT, family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_slice)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
        let images = unsafe { loader.get_swapchain_images(swapchain)? };

        info!("swapchain created with {} image(s)", images.len());

        Ok(Self {
            device,
            loader,
            swapchain,
            images,
            format: surface_format.format,
            color_space: surface_format.color_space,
            extent,
        })
    }

    /// Recreates the swapchain for a new surface size.
    ///
    /// The caller must guarantee no recorded work still references the old
    /// back-buffers; the frame synchronizer's wait-before-reuse rule covers
    /// this, plus an idle wait here for the presentation engine.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        self.device.wait_idle()?;

        info!("recreating swapchain at {}x{}", width, height);

        let old_handle = self.swapchain;
        let mut fresh = Self::create(
            instance,
            self.device.clone(),
            surface,
            width,
            height,
            old_handle,
        )?;

        unsafe {
            self.loader.destroy_swapchain(old_handle, None);
        }

        self.swapchain = fresh.swapchain;
        self.images = std::mem::take(&mut fresh.images);
        self.format = fresh.format;
        self.color_space = fresh.color_space;
        self.extent = fresh.extent;

        // Disarm the temporary so its Drop does not destroy the handle we
        // just took ownership of.
        fresh.swapchain = vk::SwapchainKHR::null();

        Ok(())
    }

    /// Acquires the next back-buffer, signaling `semaphore` when it is
    /// ready. Enforces the index invariant before returning.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<AcquiredImage> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                let index = check_image_index(index, self.images.len() as u32)?;
                Ok(AcquiredImage { index, suboptimal })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("swapchain out of date during acquire");
                Err(RhiError::SwapchainOutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Presents back-buffer `index`, waiting on `wait_semaphore`.
    ///
    /// Returns `true` when the swapchain should be recreated.
    pub fn present(
        &self,
        queue: vk::Queue,
        index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<bool> {
        let swapchains = [self.swapchain];
        let indices = [index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("swapchain out of date during present");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the swapchain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the swapchain color space.
    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    /// Returns the swapchain extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the number of back-buffers.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Returns the back-buffer images, in slot order.
    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.loader.destroy_swapchain(self.swapchain, None);
            }
            info!(
                "swapchain destroyed ({}x{}, {} image(s))",
                self.extent.width,
                self.extent.height,
                self.images.len()
            );
        }
    }
}

/// Enforces the back-buffer index invariant.
pub fn check_image_index(index: u32, count: u32) -> RhiResult<u32> {
    if index < count {
        Ok(index)
    } else {
        Err(RhiError::Swapchain(format!(
            "acquired back-buffer index {} outside [0, {})",
            index, count
        )))
    }
}

/// The present mode is not negotiated: FIFO corresponds to the fixed sync
/// interval of 1 this design presents with, and the Vulkan spec guarantees
/// its availability.
pub fn fixed_present_mode() -> vk::PresentModeKHR {
    vk::PresentModeKHR::FIFO
}

/// Picks the surface format, preferring an 8-bit BGRA UNORM target.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM
            && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    if let Some(&format) = preferred {
        return format;
    }

    let srgb = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB
            && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    if let Some(&format) = srgb {
        return format;
    }

    warn!("using first available surface format {:?}", formats[0].format);
    formats[0]
}

/// Clamps the requested buffer count into the surface's supported range.
/// `max == 0` means unlimited.
pub fn clamp_image_count(requested: u32, min: u32, max: u32) -> u32 {
    let count = requested.max(min);
    if max > 0 {
        count.min(max)
    } else {
        count
    }
}

/// Resolves the swapchain extent from the surface capabilities.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_mode_is_always_fifo() {
        assert_eq!(fixed_present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn image_index_invariant() {
        assert_eq!(check_image_index(0, 2).unwrap(), 0);
        assert_eq!(check_image_index(1, 2).unwrap(), 1);
        assert!(check_image_index(2, 2).is_err());
    }

    #[test]
    fn image_count_respects_surface_range() {
        // Exactly two buffers when the surface allows it.
        assert_eq!(clamp_image_count(BACK_BUFFER_COUNT, 1, 3), 2);
        assert_eq!(clamp_image_count(BACK_BUFFER_COUNT, 2, 0), 2);
        // Raised to the surface minimum.
        assert_eq!(clamp_image_count(BACK_BUFFER_COUNT, 3, 8), 3);
        // Capped by the surface maximum.
        assert_eq!(clamp_image_count(4, 1, 3), 3);
    }

    #[test]
    fn surface_format_prefers_bgra_unorm() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn surface_format_falls_back_to_srgb_then_first() {
        let srgb_only = vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&srgb_only).format,
            vk::Format::B8G8R8A8_SRGB
        );

        let exotic = vec![vk::SurfaceFormatKHR {
            format: vk::Format::A2B10G10R10_UNORM_PACK32,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&exotic).format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );
    }

    #[test]
    fn extent_uses_surface_value_when_fixed() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 640, 480);
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn extent_clamps_when_surface_is_flexible() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 200,
                height: 200,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let clamped = choose_extent(&capabilities, 4000, 100);
        assert_eq!((clamped.width, clamped.height), (2000, 200));

        let in_range = choose_extent(&capabilities, 1280, 720);
        assert_eq!((in_range.width, in_range.height), (1280, 720));
    }

    #[test]
    fn support_adequacy() {
        let adequate = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let inadequate = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: Vec::new(),
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(!inadequate.is_adequate());
    }
}
