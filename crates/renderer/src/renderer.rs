//! Renderer setup and the per-frame loop.
//!
//! Setup runs the ordered stage sequence from [`crate::setup`], failing
//! fatally with a stage-specific exit code. Steady state is a single loop:
//! acquire the back-buffer, record the frame, submit, wait for the fence,
//! present, reset. One frame is in flight at a time; the fence wait is the
//! rule that makes every reset safe.

use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use glam::Vec3;
use tracing::{debug, info, warn};

use trigon_platform::{Surface, Window};
use trigon_rhi::adapter::select_adapter;
use trigon_rhi::barrier::ResourceState;
use trigon_rhi::buffer::{Buffer, BufferKind};
use trigon_rhi::command::{CommandBuffer, CommandPool};
use trigon_rhi::device::Device;
use trigon_rhi::instance::Instance;
use trigon_rhi::pipeline::{ensure_target_compatible, GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use trigon_rhi::shader::{Shader, ShaderStage};
use trigon_rhi::swapchain::Swapchain;
use trigon_rhi::sync::{Semaphore, TimelineFence};
use trigon_rhi::target::RenderTargetTable;
use trigon_rhi::vertex::ColorVertex;
use trigon_rhi::{RhiError, RhiResult};

use crate::frame::FrameContext;
use crate::setup::{SetupError, SetupStage};

/// Every frame clears to this color before the draw.
const CLEAR_COLOR: [f32; 4] = [0.0, 1.0, 0.0, 1.0];

/// Vendor substring preferred during adapter selection, unless overridden
/// by `TRIGON_GPU_VENDOR`.
const DEFAULT_VENDOR_PREFERENCE: &str = "NVIDIA";

const TRIANGLE_VERTICES: [ColorVertex; 3] = [
    ColorVertex::new(Vec3::new(0.0, -0.5, 0.0), Vec3::new(1.0, 0.0, 0.0)),
    ColorVertex::new(Vec3::new(0.5, 0.5, 0.0), Vec3::new(0.0, 1.0, 0.0)),
    ColorVertex::new(Vec3::new(-0.5, 0.5, 0.0), Vec3::new(0.0, 0.0, 1.0)),
];

const TRIANGLE_INDICES: [u16; 3] = [0, 1, 2];

fn vendor_preference() -> String {
    std::env::var("TRIGON_GPU_VENDOR").unwrap_or_else(|_| DEFAULT_VENDOR_PREFERENCE.to_string())
}

fn shader_path(file: &str) -> PathBuf {
    let dir = std::env::var("TRIGON_SHADER_DIR").unwrap_or_else(|_| "shaders".to_string());
    PathBuf::from(dir).join(file)
}

/// The renderer: owns the whole GPU object tree and drives the frame loop.
///
/// Field order is drop order: everything created from the device precedes
/// it, the surface precedes the instance.
pub struct Renderer {
    frame: FrameContext,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    pipeline: Pipeline,
    _pipeline_layout: PipelineLayout,
    present_semaphores: Vec<Semaphore>,
    targets: RenderTargetTable,
    swapchain: Swapchain,
    surface: Surface,
    device: Arc<Device>,
    instance: Instance,
    extent_hint: (u32, u32),
    needs_recreate: bool,
}

impl Renderer {
    /// Runs the full setup sequence against the given window.
    pub fn new(window: &Window) -> Result<Self, SetupError> {
        let instance = Instance::new(cfg!(debug_assertions))
            .map_err(|e| SetupError::new(SetupStage::Instance, e))?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| SetupError::new(SetupStage::Surface, e))?;

        let preference = vendor_preference();
        let adapter = select_adapter(
            instance.handle(),
            surface.handle(),
            surface.loader(),
            Some(preference.as_str()),
            vk::API_VERSION_1_2,
        )
        .map_err(|e| SetupError::new(SetupStage::Adapter, e))?;

        let device = Device::new(&instance, &adapter)
            .map_err(|e| SetupError::new(SetupStage::Device, e))?;

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            window.width(),
            window.height(),
        )
        .map_err(|e| SetupError::new(SetupStage::Swapchain, e))?;

        let targets = RenderTargetTable::for_swapchain(device.clone(), &swapchain)
            .map_err(|e| SetupError::new(SetupStage::RenderTargets, e))?;

        let graphics_family = device
            .queue_families()
            .graphics
            .expect("selection requires graphics");
        let pool = CommandPool::new(device.clone(), graphics_family)
            .map_err(|e| SetupError::new(SetupStage::CommandPool, e))?;

        let command_buffer = CommandBuffer::new(device.clone(), &pool)
            .map_err(|e| SetupError::new(SetupStage::CommandBuffer, e))?;

        let (acquire_semaphore, fence, present_semaphores) =
            create_sync_objects(&device, swapchain.image_count())
                .map_err(|e| SetupError::new(SetupStage::FrameSync, e))?;

        let vertex_buffer = Buffer::new_with_data(
            device.clone(),
            BufferKind::Vertex,
            bytemuck::cast_slice(&TRIANGLE_VERTICES),
        )
        .map_err(|e| SetupError::new(SetupStage::VertexBuffer, e))?;

        let index_buffer = Buffer::new_with_data(
            device.clone(),
            BufferKind::Index,
            bytemuck::cast_slice(&TRIANGLE_INDICES),
        )
        .map_err(|e| SetupError::new(SetupStage::IndexBuffer, e))?;

        let vertex_shader = Shader::from_spirv_file(
            device.clone(),
            &shader_path("triangle.vert.spv"),
            ShaderStage::Vertex,
            "main",
        )
        .map_err(|e| SetupError::new(SetupStage::VertexShader, e))?;

        let fragment_shader = Shader::from_spirv_file(
            device.clone(),
            &shader_path("triangle.frag.spv"),
            ShaderStage::Fragment,
            "main",
        )
        .map_err(|e| SetupError::new(SetupStage::FragmentShader, e))?;

        let pipeline_layout = PipelineLayout::new(device.clone())
            .map_err(|e| SetupError::new(SetupStage::PipelineLayout, e))?;

        let pipeline = build_pipeline(
            &device,
            &pipeline_layout,
            &vertex_shader,
            &fragment_shader,
            swapchain.format(),
        )
        .map_err(|e| SetupError::new(SetupStage::Pipeline, e))?;

        info!(
            "renderer ready: {} back-buffer(s), {} vertices, {} indices",
            swapchain.image_count(),
            TRIANGLE_VERTICES.len(),
            TRIANGLE_INDICES.len()
        );

        Ok(Self {
            frame: FrameContext::from_parts(pool, command_buffer, acquire_semaphore, fence),
            vertex_buffer,
            index_buffer,
            index_count: TRIANGLE_INDICES.len() as u32,
            pipeline,
            _pipeline_layout: pipeline_layout,
            present_semaphores,
            targets,
            swapchain,
            surface,
            device,
            instance,
            extent_hint: (window.width(), window.height()),
            needs_recreate: false,
        })
    }

    /// Records, submits, synchronizes, and presents one frame.
    pub fn render_frame(&mut self) -> RhiResult<()> {
        if self.needs_recreate {
            self.recreate_swapchain()?;
            self.needs_recreate = false;
        }

        let (width, height) = self.extent_hint;
        if width == 0 || height == 0 {
            // Minimized; nothing to present.
            return Ok(());
        }

        // Acquire the current back-buffer index.
        let acquired = match self
            .swapchain
            .acquire_next_image(self.frame.acquire_semaphore().handle())
        {
            Ok(acquired) => acquired,
            Err(RhiError::SwapchainOutOfDate) => {
                self.needs_recreate = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let slot = acquired.index as usize;

        // Record.
        self.frame.begin()?;
        self.record_frame(slot)?;
        self.frame.close()?;

        // Submit, signaling the present semaphore and the fence target.
        let render_finished = self.present_semaphores[slot].handle();
        self.frame.submit(&self.device, render_finished)?;

        // The CPU may not touch the command pool again until the GPU has
        // reached the target it just signed up for.
        self.frame.wait_for_gpu()?;

        // Present the finished back-buffer.
        let suboptimal =
            self.swapchain
                .present(self.device.present_queue(), acquired.index, render_finished)?;
        if suboptimal || acquired.suboptimal {
            self.needs_recreate = true;
        }

        self.frame.finish()?;

        Ok(())
    }

    /// Records the frame's commands for back-buffer `slot`.
    ///
    /// Exactly one transition into the render-target state and one back to
    /// presentable, in that order, around the clear and the draw.
    fn record_frame(&mut self, slot: usize) -> RhiResult<()> {
        let cmd = self.frame.command_buffer();
        let extent = self.swapchain.extent();
        let target = self.targets.get_mut(slot)?;

        let open = target.transition_to(ResourceState::RenderTarget)?;
        cmd.transition(&open);

        cmd.begin_rendering(target.view(), extent, CLEAR_COLOR);
        cmd.set_viewport_scissor(extent);
        cmd.bind_graphics_pipeline(self.pipeline.handle());
        cmd.bind_vertex_buffer(self.vertex_buffer.handle());
        cmd.bind_index_buffer(self.index_buffer.handle());
        cmd.draw_indexed(self.index_count);
        cmd.end_rendering();

        let close = target.transition_to(ResourceState::Present)?;
        cmd.transition(&close);

        Ok(())
    }

    /// Notes a new surface size; the swapchain is recreated on the next
    /// frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.extent_hint = (width, height);
        self.needs_recreate = true;
    }

    fn recreate_swapchain(&mut self) -> RhiResult<()> {
        let (width, height) = self.extent_hint;
        if width == 0 || height == 0 {
            return Ok(());
        }

        debug!("recreating swapchain at {}x{}", width, height);
        self.device.wait_idle()?;

        // Views reference the old back-buffers; they go first.
        self.targets.clear();
        self.swapchain
            .recreate(&self.instance, self.surface.handle(), width, height)?;
        self.targets.rebuild(&self.swapchain)?;

        // The presentation engine may still hold the old semaphores.
        self.present_semaphores.clear();
        for _ in 0..self.swapchain.image_count() {
            self.present_semaphores.push(Semaphore::new(self.device.clone())?);
        }

        // The swapchain format is fixed by the surface, but a changed
        // format would silently invalidate the pipeline; fail loudly.
        if let Err(e) =
            ensure_target_compatible(self.pipeline.color_format(), self.swapchain.format())
        {
            warn!("swapchain format changed across recreation");
            return Err(e);
        }

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("wait_idle failed during renderer teardown: {:?}", e);
        }
    }
}

fn create_sync_objects(
    device: &Arc<Device>,
    image_count: u32,
) -> RhiResult<(Semaphore, TimelineFence, Vec<Semaphore>)> {
    let acquire = Semaphore::new(device.clone())?;
    let fence = TimelineFence::new(device.clone())?;
    let mut present = Vec::with_capacity(image_count as usize);
    for _ in 0..image_count {
        present.push(Semaphore::new(device.clone())?);
    }
    Ok((acquire, fence, present))
}

fn build_pipeline(
    device: &Arc<Device>,
    layout: &PipelineLayout,
    vertex_shader: &Shader,
    fragment_shader: &Shader,
    target_format: vk::Format,
) -> RhiResult<Pipeline> {
    let pipeline = GraphicsPipelineBuilder::new()
        .vertex_shader(vertex_shader)
        .fragment_shader(fragment_shader)
        .vertex_binding(ColorVertex::binding_description())
        .vertex_attributes(&ColorVertex::attribute_descriptions())
        .color_format(target_format)
        .build(device.clone(), layout)?;

    // The builder was fed the swapchain format directly, but the pairing is
    // still checked as a unit so a refactor cannot split them silently.
    ensure_target_compatible(pipeline.color_format(), target_format)?;

    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_data_is_consistent() {
        // Indices must address real vertices and the upload size must match
        // the vertex stride exactly.
        for &index in &TRIANGLE_INDICES {
            assert!((index as usize) < TRIANGLE_VERTICES.len());
        }

        let bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE_VERTICES);
        assert_eq!(
            bytes.len(),
            TRIANGLE_VERTICES.len() * std::mem::size_of::<ColorVertex>()
        );
    }

    #[test]
    fn clear_color_is_opaque_green() {
        assert_eq!(CLEAR_COLOR, [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn vendor_preference_defaults_to_nvidia() {
        if std::env::var("TRIGON_GPU_VENDOR").is_err() {
            assert_eq!(vendor_preference(), "NVIDIA");
        }
    }

    #[test]
    fn shader_paths_resolve_under_shader_dir() {
        if std::env::var("TRIGON_SHADER_DIR").is_err() {
            assert_eq!(
                shader_path("triangle.vert.spv"),
                PathBuf::from("shaders").join("triangle.vert.spv")
            );
        }
    }
}
