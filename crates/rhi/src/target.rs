//! Render-target views for the swapchain back-buffers.
//!
//! The table is the descriptor-heap analog: one color view per back-buffer,
//! created once at a fixed slot. The view used for back-buffer `i` is
//! always the view created at slot `i`, independent of frame number, and
//! out-of-range lookups are rejected rather than silently wrapped.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::barrier::{image_transition, ImageTransition, ResourceState};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::swapchain::Swapchain;

/// A single back-buffer with its view and tracked state.
///
/// The image itself is owned by the swapchain; the view is owned by the
/// enclosing [`RenderTargetTable`]. The state field is the value-typed
/// state machine the per-frame barriers are computed from.
pub struct SwapTarget {
    image: vk::Image,
    view: vk::ImageView,
    state: ResourceState,
}

impl SwapTarget {
    fn new(image: vk::Image, view: vk::ImageView) -> Self {
        Self {
            image,
            view,
            state: ResourceState::Undefined,
        }
    }

    /// Returns the back-buffer image handle.
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Returns the render-target view.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Returns the tracked state.
    #[inline]
    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Computes the barrier from the tracked state into `next` and commits
    /// the new state.
    pub fn transition_to(&mut self, next: ResourceState) -> RhiResult<ImageTransition> {
        let transition = image_transition(self.image, self.state, next)?;
        self.state = next;
        Ok(transition)
    }
}

/// Validates a back-buffer slot index against the table size.
pub fn check_slot(index: usize, len: usize) -> RhiResult<usize> {
    if index < len {
        Ok(index)
    } else {
        Err(RhiError::InvalidState(format!(
            "back-buffer slot {} out of range (table holds {})",
            index, len
        )))
    }
}

/// The per-back-buffer view table.
pub struct RenderTargetTable {
    device: Arc<Device>,
    targets: Vec<SwapTarget>,
}

impl RenderTargetTable {
    /// Creates one render-target view per swapchain image, slot-aligned
    /// with the swapchain's image order.
    pub fn for_swapchain(device: Arc<Device>, swapchain: &Swapchain) -> RhiResult<Self> {
        let targets = Self::create_targets(&device, swapchain)?;
        Ok(Self { device, targets })
    }

    fn create_targets(device: &Arc<Device>, swapchain: &Swapchain) -> RhiResult<Vec<SwapTarget>> {
        let format = swapchain.format();
        let mut targets = Vec::with_capacity(swapchain.image_count() as usize);

        for (i, &image) in swapchain.images().iter().enumerate() {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            let view = unsafe {
                device
                    .handle()
                    .create_image_view(&create_info, None)
                    .map_err(|e| {
                        RhiError::Swapchain(format!(
                            "failed to create render-target view {}: {:?}",
                            i, e
                        ))
                    })?
            };

            targets.push(SwapTarget::new(image, view));
        }

        debug!("created {} render-target view(s)", targets.len());

        Ok(targets)
    }

    /// Destroys all views and empties the table.
    ///
    /// Views must go before the back-buffers they reference, so swapchain
    /// recreation clears the table first and rebuilds it afterwards.
    pub fn clear(&mut self) {
        for target in &self.targets {
            unsafe {
                self.device.handle().destroy_image_view(target.view, None);
            }
        }
        self.targets.clear();
    }

    /// Repopulates the table for a recreated swapchain. Fresh targets start
    /// in the undefined state again.
    pub fn rebuild(&mut self, swapchain: &Swapchain) -> RhiResult<()> {
        self.clear();
        self.targets = Self::create_targets(&self.device, swapchain)?;
        Ok(())
    }

    /// Number of back-buffer slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// True when the table holds no targets.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Returns the target at `slot`, rejecting out-of-range indices.
    pub fn get(&self, slot: usize) -> RhiResult<&SwapTarget> {
        let slot = check_slot(slot, self.targets.len())?;
        Ok(&self.targets[slot])
    }

    /// Mutable variant of [`get`](Self::get), for state transitions.
    pub fn get_mut(&mut self, slot: usize) -> RhiResult<&mut SwapTarget> {
        let slot = check_slot(slot, self.targets.len())?;
        Ok(&mut self.targets[slot])
    }
}

impl Drop for RenderTargetTable {
    fn drop(&mut self) {
        let count = self.targets.len();
        self.clear();
        debug!("destroyed {} render-target view(s)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn fake_target(id: u64) -> SwapTarget {
        SwapTarget::new(vk::Image::from_raw(id), vk::ImageView::from_raw(id + 100))
    }

    #[test]
    fn slot_check_accepts_in_range() {
        assert_eq!(check_slot(0, 2).unwrap(), 0);
        assert_eq!(check_slot(1, 2).unwrap(), 1);
    }

    #[test]
    fn slot_check_rejects_out_of_range() {
        assert!(check_slot(2, 2).is_err());
        assert!(check_slot(0, 0).is_err());
    }

    #[test]
    fn target_starts_undefined() {
        let target = fake_target(1);
        assert_eq!(target.state(), ResourceState::Undefined);
    }

    #[test]
    fn view_is_stable_across_frames() {
        // The slot-to-view association must not depend on how many frames
        // have been recorded.
        let mut target = fake_target(7);
        let view = target.view();

        for _ in 0..3 {
            target.transition_to(ResourceState::RenderTarget).unwrap();
            target.transition_to(ResourceState::Present).unwrap();
            assert_eq!(target.view(), view);
        }
    }

    #[test]
    fn frame_pairs_transitions_in_order() {
        // Each simulated frame records exactly one transition into the
        // render-target state followed by one back to presentable.
        let mut target = fake_target(3);
        let mut recorded: Vec<(ResourceState, ResourceState)> = Vec::new();

        for _ in 0..2 {
            let open = target.transition_to(ResourceState::RenderTarget).unwrap();
            recorded.push((open.from, open.to));
            let close = target.transition_to(ResourceState::Present).unwrap();
            recorded.push((close.from, close.to));
        }

        assert_eq!(
            recorded,
            vec![
                (ResourceState::Undefined, ResourceState::RenderTarget),
                (ResourceState::RenderTarget, ResourceState::Present),
                (ResourceState::Present, ResourceState::RenderTarget),
                (ResourceState::RenderTarget, ResourceState::Present),
            ]
        );
    }

    #[test]
    fn state_oscillates_after_first_frame() {
        let mut target = fake_target(9);
        target.transition_to(ResourceState::RenderTarget).unwrap();
        target.transition_to(ResourceState::Present).unwrap();

        let reopen = target.transition_to(ResourceState::RenderTarget).unwrap();
        assert_eq!(reopen.from, ResourceState::Present);
        assert_eq!(target.state(), ResourceState::RenderTarget);
    }

    #[test]
    fn double_open_is_rejected() {
        let mut target = fake_target(5);
        target.transition_to(ResourceState::RenderTarget).unwrap();
        assert!(target.transition_to(ResourceState::RenderTarget).is_err());
    }
}
