//! CPU-GPU and GPU-GPU synchronization primitives.
//!
//! The frame fence is a timeline semaphore: a monotonically increasing
//! 64-bit counter with two views. The CPU issues target values (one per
//! submission, strictly increasing by one) and the GPU raises the completed
//! value as submissions retire. The completed value never decreases, and
//! the CPU blocks only when the counter has not yet reached the target it
//! is about to reuse resources behind.
//!
//! Binary [`Semaphore`]s handle the GPU-GPU edges (acquire-to-render,
//! render-to-present) that the presentation engine requires.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Binary semaphore for queue-to-queue ordering.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled binary semaphore.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        debug!("created binary semaphore");
        Ok(Self { device, semaphore })
    }

    /// Returns the semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("destroyed binary semaphore");
    }
}

/// Pure bookkeeping for the submission counter.
///
/// Targets start at zero and increase by exactly one per issue; a completed
/// value satisfies the timeline once it reaches the last issued target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubmissionTimeline {
    last_issued: u64,
}

impl SubmissionTimeline {
    pub fn new() -> Self {
        Self { last_issued: 0 }
    }

    /// Issues the next target value.
    pub fn issue(&mut self) -> u64 {
        self.last_issued += 1;
        self.last_issued
    }

    /// The most recently issued target; zero before the first issue.
    #[inline]
    pub fn last_issued(&self) -> u64 {
        self.last_issued
    }

    /// Whether a completed value satisfies the last issued target.
    #[inline]
    pub fn is_reached(&self, completed: u64) -> bool {
        completed >= self.last_issued
    }
}

/// Timeline-semaphore fence for CPU-GPU synchronization.
pub struct TimelineFence {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
    timeline: SubmissionTimeline,
}

impl TimelineFence {
    /// Creates a timeline semaphore with an initial value of zero.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        debug!("created timeline fence");

        Ok(Self {
            device,
            semaphore,
            timeline: SubmissionTimeline::new(),
        })
    }

    /// Returns the semaphore handle, for submission signal lists.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Issues the target value for the next submission.
    ///
    /// The caller must actually signal this value in the submission it is
    /// issued for, or a later wait will never return.
    pub fn issue_target(&mut self) -> u64 {
        self.timeline.issue()
    }

    /// The most recently issued target value.
    #[inline]
    pub fn last_issued(&self) -> u64 {
        self.timeline.last_issued()
    }

    /// Reads the counter value the GPU has completed up to.
    pub fn completed_value(&self) -> RhiResult<u64> {
        let value = unsafe { self.device.handle().get_semaphore_counter_value(self.semaphore)? };
        Ok(value)
    }

    /// Blocks until the counter reaches `value`.
    pub fn wait(&self, value: u64, timeout: u64) -> RhiResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        unsafe { self.device.handle().wait_semaphores(&wait_info, timeout)? };
        Ok(())
    }

    /// Blocks until the last issued target is complete, skipping the OS
    /// wait when the GPU already reached it.
    ///
    /// Returns `true` when a blocking wait was actually performed.
    pub fn wait_for_issued(&self) -> RhiResult<bool> {
        let completed = self.completed_value()?;
        if self.timeline.is_reached(completed) {
            return Ok(false);
        }
        self.wait(self.timeline.last_issued(), u64::MAX)?;
        Ok(true)
    }
}

impl Drop for TimelineFence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("destroyed timeline fence");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_increase_by_exactly_one() {
        let mut timeline = SubmissionTimeline::new();
        assert_eq!(timeline.last_issued(), 0);

        let issued: Vec<u64> = (0..5).map(|_| timeline.issue()).collect();
        assert_eq!(issued, vec![1, 2, 3, 4, 5]);
        for pair in issued.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
    }

    #[test]
    fn completed_value_gates_the_target() {
        let mut timeline = SubmissionTimeline::new();
        let target = timeline.issue();

        // Completed lags the target by one: not reached, the CPU must wait.
        assert!(!timeline.is_reached(target - 1));
        // The GPU catches up: reached, the wait path may proceed.
        assert!(timeline.is_reached(target));
        // A completed value past the target also satisfies it.
        assert!(timeline.is_reached(target + 1));
    }

    #[test]
    fn fresh_timeline_is_trivially_reached() {
        // Nothing issued yet; completed value zero satisfies the timeline,
        // so the first frame never blocks.
        let timeline = SubmissionTimeline::new();
        assert!(timeline.is_reached(0));
    }

    #[test]
    fn lag_then_signal_scenario() {
        // Simulates the GPU completing one frame behind the CPU, then an
        // external signal raising the counter to the issued target.
        let mut timeline = SubmissionTimeline::new();
        let mut gpu_completed = 0u64;

        for _ in 0..3 {
            let target = timeline.issue();
            assert_eq!(gpu_completed, target - 1);
            assert!(!timeline.is_reached(gpu_completed));

            // The GPU retires the submission.
            gpu_completed = target;
            assert!(timeline.is_reached(gpu_completed));
        }
    }
}
