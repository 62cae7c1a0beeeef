//! Command pool and command buffer recording.
//!
//! The pool owns the backing memory (the allocator in explicit-API terms);
//! the command buffer is a recording handle reset and reused every frame.
//! Neither may be reset while the GPU can still read recorded commands;
//! the frame synchronizer's fence wait is what makes the reset safe.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::barrier::ImageTransition;
use crate::device::Device;
use crate::error::RhiResult;

/// Command pool bound to one queue family.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Creates a pool whose buffers can be reset individually.
    pub fn new(device: Arc<Device>, queue_family: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        debug!("command pool created for queue family {}", queue_family);

        Ok(Self {
            device,
            pool,
            queue_family,
        })
    }

    /// Returns the pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Returns the owning queue family.
    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocates one primary command buffer.
    pub fn allocate_primary(&self) -> RhiResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(buffers[0])
    }

    /// Resets the pool, returning every allocated buffer to its initial
    /// state. The GPU must not be reading any of them.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!("command pool destroyed (queue family {})", self.queue_family);
    }
}

/// Recording handle over a primary command buffer.
///
/// The raw handle is owned by the pool; this wrapper only records. The
/// frame synchronizer tracks whether the buffer is recording, closed, or
/// submitted; this type just exposes the operations.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocates a command buffer from `pool`.
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let buffer = pool.allocate_primary()?;
        Ok(Self { device, buffer })
    }

    /// Returns the raw handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Begins recording for a single submission.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    /// Finalizes recording; the buffer may then be submitted but not
    /// recorded into.
    pub fn end(&self) -> RhiResult<()> {
        unsafe { self.device.handle().end_command_buffer(self.buffer)? };
        Ok(())
    }

    /// Records a tracked-state layout transition.
    pub fn transition(&self, transition: &ImageTransition) {
        let barriers = [transition.barrier];
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                transition.src_stage,
                transition.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        }
    }

    /// Begins rendering to the given color attachment, clearing it.
    pub fn begin_rendering(
        &self,
        view: vk::ImageView,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            });

        let color_attachments = [color_attachment];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);

        unsafe {
            self.device
                .dynamic_rendering()
                .cmd_begin_rendering(self.buffer, &rendering_info);
        }
    }

    /// Ends the current rendering scope.
    pub fn end_rendering(&self) {
        unsafe {
            self.device
                .dynamic_rendering()
                .cmd_end_rendering(self.buffer);
        }
    }

    /// Binds a graphics pipeline.
    pub fn bind_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    /// Binds the vertex buffer at binding zero.
    pub fn bind_vertex_buffer(&self, buffer: vk::Buffer) {
        let buffers = [buffer];
        let offsets = [0u64];
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, 0, &buffers, &offsets);
        }
    }

    /// Binds a 16-bit index buffer.
    pub fn bind_index_buffer(&self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.buffer, buffer, 0, vk::IndexType::UINT16);
        }
    }

    /// Sets the full-target viewport and scissor.
    pub fn set_viewport_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(&viewport));
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(&scissor));
        }
    }

    /// Issues an indexed draw.
    pub fn draw_indexed(&self, index_count: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_draw_indexed(self.buffer, index_count, 1, 0, 0, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_types_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandPool>();
        assert_send::<CommandBuffer>();
    }
}
