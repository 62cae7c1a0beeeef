//! Per-frame state machine and frame resources.
//!
//! A frame's command resources move through a fixed cycle:
//!
//! ```text
//! Idle -> Recording -> Closed -> Submitted -> (WaitingOnFence | Ready) -> Idle
//! ```
//!
//! The transition out of `Submitted` depends on the fence: when the GPU's
//! completed value has already reached the issued target the frame goes
//! straight to `Ready`, otherwise it waits. The pool and command buffer are
//! reset only from `Ready`; the CPU never reuses resources the GPU may
//! still be executing. This is the producer/consumer handoff the whole
//! renderer hinges on: the CPU owns the frame's resources between `Ready`
//! and `Submitted`, the GPU borrows them from `Submitted` until the fence
//! reaches the target.

use ash::vk;
use thiserror::Error;
use tracing::trace;

use trigon_rhi::command::{CommandBuffer, CommandPool};
use trigon_rhi::device::Device;
use trigon_rhi::sync::{Semaphore, TimelineFence};
use trigon_rhi::{RhiError, RhiResult};

/// Where the current frame is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FramePhase {
    /// No recording in progress; resources are free for the CPU.
    #[default]
    Idle,
    /// The command buffer is open for recording.
    Recording,
    /// Recording finalized; nothing further may be recorded.
    Closed,
    /// Handed to the queue; the GPU owns the recorded commands.
    Submitted,
    /// The GPU has not reached the issued fence target yet.
    WaitingOnFence,
    /// The fence target is complete; resources may be reset and the image
    /// presented.
    Ready,
}

/// An operation was attempted from the wrong phase.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot {operation} from {phase:?}")]
pub struct PhaseError {
    phase: FramePhase,
    operation: &'static str,
}

impl FramePhase {
    /// `Idle -> Recording`, entered when the pool and buffer are reset.
    pub fn begin_recording(self) -> Result<FramePhase, PhaseError> {
        match self {
            FramePhase::Idle => Ok(FramePhase::Recording),
            phase => Err(PhaseError {
                phase,
                operation: "begin recording",
            }),
        }
    }

    /// `Recording -> Closed`, the explicit finalize before submission.
    pub fn close(self) -> Result<FramePhase, PhaseError> {
        match self {
            FramePhase::Recording => Ok(FramePhase::Closed),
            phase => Err(PhaseError {
                phase,
                operation: "close",
            }),
        }
    }

    /// `Closed -> Submitted`, paired with issuing the fence target.
    pub fn submit(self) -> Result<FramePhase, PhaseError> {
        match self {
            FramePhase::Closed => Ok(FramePhase::Submitted),
            phase => Err(PhaseError {
                phase,
                operation: "submit",
            }),
        }
    }

    /// `Submitted -> WaitingOnFence | Ready`, depending on whether the
    /// completed value has reached the target.
    pub fn observe_fence(self, completed: u64, target: u64) -> Result<FramePhase, PhaseError> {
        match self {
            FramePhase::Submitted => {
                if completed >= target {
                    Ok(FramePhase::Ready)
                } else {
                    Ok(FramePhase::WaitingOnFence)
                }
            }
            phase => Err(PhaseError {
                phase,
                operation: "observe fence",
            }),
        }
    }

    /// `WaitingOnFence -> Ready`, once the blocking wait returns.
    pub fn wait_complete(self) -> Result<FramePhase, PhaseError> {
        match self {
            FramePhase::WaitingOnFence => Ok(FramePhase::Ready),
            phase => Err(PhaseError {
                phase,
                operation: "complete wait",
            }),
        }
    }

    /// `Ready -> Idle`, after present and resource reset.
    pub fn finish(self) -> Result<FramePhase, PhaseError> {
        match self {
            FramePhase::Ready => Ok(FramePhase::Idle),
            phase => Err(PhaseError {
                phase,
                operation: "finish",
            }),
        }
    }
}

fn phase_error(e: PhaseError) -> RhiError {
    RhiError::InvalidState(e.to_string())
}

/// The single in-flight frame's resources and phase.
pub struct FrameContext {
    pool: CommandPool,
    command_buffer: CommandBuffer,
    acquire_semaphore: Semaphore,
    fence: TimelineFence,
    phase: FramePhase,
}

impl FrameContext {
    /// Assembles a frame context from already-created resources.
    ///
    /// The pieces are created individually by the setup sequence so each
    /// step reports its own failure stage.
    pub fn from_parts(
        pool: CommandPool,
        command_buffer: CommandBuffer,
        acquire_semaphore: Semaphore,
        fence: TimelineFence,
    ) -> Self {
        Self {
            pool,
            command_buffer,
            acquire_semaphore,
            fence,
            phase: FramePhase::Idle,
        }
    }

    /// Returns the command buffer for recording.
    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    /// Returns the semaphore signaled when the acquired image is ready.
    #[inline]
    pub fn acquire_semaphore(&self) -> &Semaphore {
        &self.acquire_semaphore
    }

    /// Returns the frame fence.
    #[inline]
    pub fn fence(&self) -> &TimelineFence {
        &self.fence
    }

    /// Returns the current phase.
    #[inline]
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Resets the pool (and with it the command buffer) and opens the
    /// buffer for recording.
    ///
    /// Safe only because the previous cycle's fence wait has completed;
    /// the reset always yields a recording buffer, whatever was recorded
    /// before.
    pub fn begin(&mut self) -> RhiResult<()> {
        let next = self.phase.begin_recording().map_err(phase_error)?;
        self.pool.reset()?;
        self.command_buffer.begin()?;
        self.phase = next;
        Ok(())
    }

    /// Finalizes the command buffer.
    pub fn close(&mut self) -> RhiResult<()> {
        let next = self.phase.close().map_err(phase_error)?;
        self.command_buffer.end()?;
        self.phase = next;
        Ok(())
    }

    /// Submits the closed command buffer to the graphics queue.
    ///
    /// The submission waits on the acquire semaphore at the color-output
    /// stage, signals `render_finished` for the presentation engine, and
    /// signals the fence with a freshly issued target. Returns the target.
    pub fn submit(&mut self, device: &Device, render_finished: vk::Semaphore) -> RhiResult<u64> {
        let next = self.phase.submit().map_err(phase_error)?;
        let target = self.fence.issue_target();

        let wait_semaphores = [self.acquire_semaphore.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffer.handle()];
        let signal_semaphores = [render_finished, self.fence.handle()];
        // Binary semaphore slots ignore their timeline value.
        let signal_values = [0u64, target];
        let wait_values = [0u64];

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            device.submit_graphics(&[submit_info], vk::Fence::null())?;
        }

        trace!("submitted frame, fence target {}", target);
        self.phase = next;
        Ok(target)
    }

    /// Drives `Submitted` through the fence to `Ready`, blocking only when
    /// the GPU has not reached the issued target.
    pub fn wait_for_gpu(&mut self) -> RhiResult<()> {
        let completed = self.fence.completed_value()?;
        let target = self.fence.last_issued();

        self.phase = self
            .phase
            .observe_fence(completed, target)
            .map_err(phase_error)?;

        if self.phase == FramePhase::WaitingOnFence {
            trace!(
                "fence at {} of {}, blocking until the GPU catches up",
                completed,
                target
            );
            self.fence.wait(target, u64::MAX)?;
            self.phase = self.phase.wait_complete().map_err(phase_error)?;
        }

        Ok(())
    }

    /// Completes the cycle and returns the frame to `Idle`.
    pub fn finish(&mut self) -> RhiResult<()> {
        self.phase = self.phase.finish().map_err(phase_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_transitions_in_order() {
        let phase = FramePhase::Idle;
        let phase = phase.begin_recording().unwrap();
        assert_eq!(phase, FramePhase::Recording);
        let phase = phase.close().unwrap();
        assert_eq!(phase, FramePhase::Closed);
        let phase = phase.submit().unwrap();
        assert_eq!(phase, FramePhase::Submitted);
        let phase = phase.observe_fence(1, 1).unwrap();
        assert_eq!(phase, FramePhase::Ready);
        let phase = phase.finish().unwrap();
        assert_eq!(phase, FramePhase::Idle);
    }

    #[test]
    fn lagging_fence_routes_through_wait() {
        // Completed value lags the target by exactly one: the frame must
        // block, then an external signal completes the wait.
        let phase = FramePhase::Submitted;
        let phase = phase.observe_fence(41, 42).unwrap();
        assert_eq!(phase, FramePhase::WaitingOnFence);

        // The GPU reaches the target; the wait returns.
        let phase = phase.wait_complete().unwrap();
        assert_eq!(phase, FramePhase::Ready);
        assert_eq!(phase.finish().unwrap(), FramePhase::Idle);
    }

    #[test]
    fn completed_fence_skips_the_wait() {
        let phase = FramePhase::Submitted;
        assert_eq!(phase.observe_fence(42, 42).unwrap(), FramePhase::Ready);
        assert_eq!(phase.observe_fence(43, 42).unwrap(), FramePhase::Ready);
    }

    #[test]
    fn reset_always_reaches_recording() {
        // However many cycles have run, Idle -> Recording always holds
        // after the reset path.
        let mut phase = FramePhase::Idle;
        for _ in 0..3 {
            phase = phase.begin_recording().unwrap();
            assert_eq!(phase, FramePhase::Recording);
            phase = phase.close().unwrap();
            phase = phase.submit().unwrap();
            phase = phase.observe_fence(0, 0).unwrap();
            phase = phase.finish().unwrap();
        }
        assert_eq!(phase, FramePhase::Idle);
    }

    #[test]
    fn out_of_order_operations_are_rejected() {
        assert!(FramePhase::Idle.close().is_err());
        assert!(FramePhase::Idle.submit().is_err());
        assert!(FramePhase::Recording.submit().is_err());
        assert!(FramePhase::Recording.begin_recording().is_err());
        assert!(FramePhase::Closed.close().is_err());
        assert!(FramePhase::Submitted.begin_recording().is_err());
        assert!(FramePhase::Ready.observe_fence(0, 0).is_err());
        assert!(FramePhase::Idle.finish().is_err());
    }

    #[test]
    fn wait_complete_only_from_waiting() {
        assert!(FramePhase::Submitted.wait_complete().is_err());
        assert!(FramePhase::Ready.wait_complete().is_err());
        assert_eq!(
            FramePhase::WaitingOnFence.wait_complete().unwrap(),
            FramePhase::Ready
        );
    }

    #[test]
    fn phase_error_names_the_operation() {
        let err = FramePhase::Idle.close().unwrap_err();
        assert!(err.to_string().contains("close"));
        assert!(err.to_string().contains("Idle"));
    }
}
