//! Startup stages and the process exit-code table.
//!
//! Every distinct setup step that can fail maps to a unique, stable exit
//! code. Operators and harnesses key off these codes, so the table is part
//! of the observable contract: codes follow setup order and never change
//! meaning between releases.

use thiserror::Error;

/// Setup steps, in the order the renderer performs them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupStage {
    Instance,
    Surface,
    Adapter,
    Device,
    Swapchain,
    RenderTargets,
    CommandPool,
    CommandBuffer,
    FrameSync,
    VertexBuffer,
    IndexBuffer,
    VertexShader,
    FragmentShader,
    PipelineLayout,
    Pipeline,
}

/// All stages, in setup (and exit-code) order.
pub const SETUP_STAGES: [SetupStage; 15] = [
    SetupStage::Instance,
    SetupStage::Surface,
    SetupStage::Adapter,
    SetupStage::Device,
    SetupStage::Swapchain,
    SetupStage::RenderTargets,
    SetupStage::CommandPool,
    SetupStage::CommandBuffer,
    SetupStage::FrameSync,
    SetupStage::VertexBuffer,
    SetupStage::IndexBuffer,
    SetupStage::VertexShader,
    SetupStage::FragmentShader,
    SetupStage::PipelineLayout,
    SetupStage::Pipeline,
];

impl SetupStage {
    /// The process exit code reported when this stage fails.
    pub fn exit_code(self) -> i32 {
        match self {
            SetupStage::Instance => 1,
            SetupStage::Surface => 2,
            SetupStage::Adapter => 3,
            SetupStage::Device => 4,
            SetupStage::Swapchain => 5,
            SetupStage::RenderTargets => 6,
            SetupStage::CommandPool => 7,
            SetupStage::CommandBuffer => 8,
            SetupStage::FrameSync => 9,
            SetupStage::VertexBuffer => 10,
            SetupStage::IndexBuffer => 11,
            SetupStage::VertexShader => 12,
            SetupStage::FragmentShader => 13,
            SetupStage::PipelineLayout => 14,
            SetupStage::Pipeline => 15,
        }
    }

    /// Human-readable step name for logs.
    pub fn describe(self) -> &'static str {
        match self {
            SetupStage::Instance => "instance creation",
            SetupStage::Surface => "surface creation",
            SetupStage::Adapter => "adapter selection",
            SetupStage::Device => "device creation",
            SetupStage::Swapchain => "swapchain creation",
            SetupStage::RenderTargets => "render-target view creation",
            SetupStage::CommandPool => "command pool creation",
            SetupStage::CommandBuffer => "command buffer allocation",
            SetupStage::FrameSync => "frame synchronization setup",
            SetupStage::VertexBuffer => "vertex buffer upload",
            SetupStage::IndexBuffer => "index buffer upload",
            SetupStage::VertexShader => "vertex shader load",
            SetupStage::FragmentShader => "fragment shader load",
            SetupStage::PipelineLayout => "pipeline layout creation",
            SetupStage::Pipeline => "pipeline creation",
        }
    }
}

impl std::fmt::Display for SetupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// A fatal setup failure: the stage that failed plus its cause.
///
/// These indicate missing or incompatible hardware, drivers, or assets,
/// never transience, so there is no retry path.
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct SetupError {
    stage: SetupStage,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl SetupError {
    pub fn new(
        stage: SetupStage,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            stage,
            source: Box::new(source),
        }
    }

    /// The stage that failed.
    pub fn stage(&self) -> SetupStage {
        self.stage
    }

    /// The exit code the process should terminate with.
    pub fn exit_code(&self) -> i32 {
        self.stage.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_setup_order() {
        // The table is an observable contract: codes are 1..=15 in the
        // order setup runs.
        for (i, stage) in SETUP_STAGES.iter().enumerate() {
            assert_eq!(stage.exit_code(), (i + 1) as i32);
        }
    }

    #[test]
    fn exit_codes_are_unique() {
        let mut codes: Vec<i32> = SETUP_STAGES.iter().map(|s| s.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), SETUP_STAGES.len());
    }

    #[test]
    fn exit_codes_never_collide_with_success() {
        for stage in SETUP_STAGES {
            assert!(stage.exit_code() > 0);
        }
    }

    #[test]
    fn setup_error_carries_stage_and_code() {
        let err = SetupError::new(
            SetupStage::Swapchain,
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        assert_eq!(err.stage(), SetupStage::Swapchain);
        assert_eq!(err.exit_code(), 5);
        assert!(err.to_string().contains("swapchain creation"));
    }
}
