//! Resource states and layout-transition barriers.
//!
//! Back-buffers oscillate between presentable and render-target states
//! every frame. Instead of spelling out before/after layouts at each call
//! site, every target tracks its current [`ResourceState`] and barriers are
//! computed from the tracked state, so a frame cannot record a transition
//! whose source state is stale.

use ash::vk;

use crate::error::{RhiError, RhiResult};

/// State of a swapchain back-buffer, as declared to the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    /// Initial state after (re)creation; contents undefined.
    Undefined,
    /// Handed to the presentation engine.
    Present,
    /// Bound as a color render target.
    RenderTarget,
}

impl ResourceState {
    /// The image layout this state corresponds to.
    pub fn layout(self) -> vk::ImageLayout {
        match self {
            ResourceState::Undefined => vk::ImageLayout::UNDEFINED,
            ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
            ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }

    /// Access mask for prior work when this state is the transition source.
    pub fn src_access(self) -> vk::AccessFlags {
        match self {
            ResourceState::Undefined | ResourceState::Present => vk::AccessFlags::empty(),
            ResourceState::RenderTarget => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        }
    }

    /// Access mask for subsequent work when this state is the destination.
    pub fn dst_access(self) -> vk::AccessFlags {
        match self {
            ResourceState::Undefined | ResourceState::Present => vk::AccessFlags::empty(),
            ResourceState::RenderTarget => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        }
    }

    /// Pipeline stage to wait on when this state is the transition source.
    pub fn src_stage(self) -> vk::PipelineStageFlags {
        match self {
            ResourceState::Undefined | ResourceState::Present => {
                vk::PipelineStageFlags::TOP_OF_PIPE
            }
            ResourceState::RenderTarget => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        }
    }

    /// Pipeline stage gated on the transition when this state is the
    /// destination.
    pub fn dst_stage(self) -> vk::PipelineStageFlags {
        match self {
            ResourceState::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
            ResourceState::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            ResourceState::RenderTarget => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        }
    }
}

/// A computed state transition, ready to record.
#[derive(Clone)]
pub struct ImageTransition {
    /// The transition this barrier declares.
    pub from: ResourceState,
    /// The state the resource enters.
    pub to: ResourceState,
    /// Stages whose prior work must complete.
    pub src_stage: vk::PipelineStageFlags,
    /// Stages that must wait for the transition.
    pub dst_stage: vk::PipelineStageFlags,
    /// The barrier itself.
    pub barrier: vk::ImageMemoryBarrier<'static>,
}

/// Computes a layout-transition barrier between two tracked states.
///
/// A transition into the same state is rejected: the per-frame protocol
/// pairs exactly one presentable-to-render-target transition with one in
/// the opposite direction, and a no-op barrier means a bookkeeping bug.
pub fn image_transition(
    image: vk::Image,
    from: ResourceState,
    to: ResourceState,
) -> RhiResult<ImageTransition> {
    if from == to {
        return Err(RhiError::InvalidState(format!(
            "no-op resource transition ({:?} -> {:?})",
            from, to
        )));
    }

    let subresource_range = vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    let barrier = vk::ImageMemoryBarrier::default()
        .src_access_mask(from.src_access())
        .dst_access_mask(to.dst_access())
        .old_layout(from.layout())
        .new_layout(to.layout())
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range);

    Ok(ImageTransition {
        from,
        to,
        src_stage: from.src_stage(),
        dst_stage: to.dst_stage(),
        barrier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn fake_image() -> vk::Image {
        vk::Image::from_raw(0xbeef)
    }

    #[test]
    fn layouts_map_one_to_one() {
        assert_eq!(
            ResourceState::Undefined.layout(),
            vk::ImageLayout::UNDEFINED
        );
        assert_eq!(
            ResourceState::Present.layout(),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(
            ResourceState::RenderTarget.layout(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn present_to_render_target_transition() {
        let t = image_transition(fake_image(), ResourceState::Present, ResourceState::RenderTarget)
            .unwrap();
        assert_eq!(t.barrier.old_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(
            t.barrier.new_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(t.barrier.src_access_mask, vk::AccessFlags::empty());
        assert_eq!(
            t.barrier.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
    }

    #[test]
    fn render_target_to_present_transition() {
        let t = image_transition(fake_image(), ResourceState::RenderTarget, ResourceState::Present)
            .unwrap();
        assert_eq!(
            t.barrier.old_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(t.barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(
            t.barrier.src_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(t.src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn first_use_leaves_undefined() {
        let t = image_transition(
            fake_image(),
            ResourceState::Undefined,
            ResourceState::RenderTarget,
        )
        .unwrap();
        assert_eq!(t.barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(t.barrier.src_access_mask, vk::AccessFlags::empty());
    }

    #[test]
    fn no_op_transition_is_rejected() {
        let result = image_transition(fake_image(), ResourceState::Present, ResourceState::Present);
        assert!(matches!(result, Err(RhiError::InvalidState(_))));
    }

    #[test]
    fn queue_ownership_is_never_transferred() {
        let t = image_transition(fake_image(), ResourceState::Present, ResourceState::RenderTarget)
            .unwrap();
        assert_eq!(t.barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(t.barrier.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }
}
