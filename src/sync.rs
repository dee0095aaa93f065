//! Per-frame synchronization primitives and frame-ring arithmetic.

use ash::vk;

use crate::context::Context;
use crate::error::{RenderError, RenderResult};

/// Synchronization objects for one frame-in-flight ring slot.
///
/// Exactly one `FrameSync` is live per ring slot. The fence must be
/// CPU-waited before the slot's command buffer is re-recorded.
pub struct FrameSync {
    /// Signaled when the swapchain image for this frame is available.
    pub image_available: vk::Semaphore,
    /// Signaled when rendering for this frame is complete.
    pub render_finished: vk::Semaphore,
    /// Signaled when the GPU has finished executing this frame's submission.
    pub in_flight: vk::Fence,
}

/// Owns the ring of [`FrameSync`] triples, one per frame in flight.
pub struct SyncManager {
    frames: Vec<FrameSync>,
}

impl SyncManager {
    /// Create sync objects for every ring slot. Fences start signaled so the
    /// first wait on each slot returns immediately.
    pub fn new(context: &Context) -> RenderResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let mut frames = Vec::with_capacity(context.frames_in_flight());
        for i in 0..context.frames_in_flight() {
            let image_available = unsafe {
                context.device.create_semaphore(&semaphore_info, None)
            }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "Failed to create image available semaphore: {:?}",
                    e
                ))
            })?;
            context
                .markers
                .set_object_name(image_available, &format!("image_available[{}]", i));

            let render_finished = unsafe {
                context.device.create_semaphore(&semaphore_info, None)
            }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "Failed to create render finished semaphore: {:?}",
                    e
                ))
            })?;
            context
                .markers
                .set_object_name(render_finished, &format!("render_finished[{}]", i));

            let in_flight =
                unsafe { context.device.create_fence(&fence_info, None) }.map_err(|e| {
                    RenderError::ResourceCreationFailed(format!(
                        "Failed to create in-flight fence: {:?}",
                        e
                    ))
                })?;
            context
                .markers
                .set_object_name(in_flight, &format!("in_flight[{}]", i));

            frames.push(FrameSync {
                image_available,
                render_finished,
                in_flight,
            });
        }

        Ok(Self { frames })
    }

    /// Get the sync objects for a ring slot.
    pub fn frame(&self, index: usize) -> &FrameSync {
        &self.frames[index]
    }

    /// Block until the GPU has finished the oldest submission on this ring
    /// slot. Unbounded timeout: in the steady-state loop there is nothing
    /// useful to do until the slot is free.
    pub fn wait_for_frame(&self, context: &Context, index: usize) -> RenderResult<()> {
        let fence = self.frames[index].in_flight;
        unsafe {
            context
                .device
                .wait_for_fences(&[fence], true, u64::MAX)
        }
        .map_err(|e| RenderError::Internal(format!("Failed to wait for in-flight fence: {:?}", e)))
    }

    /// Mark the slot's fence not-done before re-submitting.
    pub fn reset_fence(&self, context: &Context, index: usize) -> RenderResult<()> {
        let fence = self.frames[index].in_flight;
        unsafe { context.device.reset_fences(&[fence]) }
            .map_err(|e| RenderError::Internal(format!("Failed to reset in-flight fence: {:?}", e)))
    }

    /// Destroy all sync objects. The device must be idle.
    pub fn destroy(&mut self, context: &Context) {
        unsafe {
            for frame in self.frames.drain(..) {
                context.device.destroy_semaphore(frame.image_available, None);
                context.device.destroy_semaphore(frame.render_finished, None);
                context.device.destroy_fence(frame.in_flight, None);
            }
        }
    }
}

/// Ring-index arithmetic for frames in flight.
///
/// Isolated from the GPU types so the frame state machine is testable: the
/// renderer advances the clock only after a successful present, and a frame
/// skipped due to an out-of-date swapchain leaves the index unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClock {
    current: usize,
    frames_in_flight: usize,
}

impl FrameClock {
    /// Create a clock over `frames_in_flight` ring slots, starting at 0.
    pub fn new(frames_in_flight: usize) -> Self {
        debug_assert!(frames_in_flight > 0);
        Self {
            current: 0,
            frames_in_flight,
        }
    }

    /// Current ring slot.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Number of ring slots.
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Advance to the next ring slot after a presented frame.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames_in_flight;
    }

    /// Ring slot used by the previous frame.
    ///
    /// This is the slot the auto-exposure pass reads for temporal smoothing:
    /// the average-luminance compute for slot `N mod F` always reads slot
    /// `(N - 1) mod F` and never aliases the two roles.
    pub fn previous(&self) -> usize {
        previous_slot(self.current, self.frames_in_flight)
    }
}

/// Ring slot preceding `slot` in a ring of `frames_in_flight` slots.
pub fn previous_slot(slot: usize, frames_in_flight: usize) -> usize {
    (slot + frames_in_flight - 1) % frames_in_flight
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_clock_wraps() {
        let mut clock = FrameClock::new(3);
        assert_eq!(clock.current(), 0);
        clock.advance();
        clock.advance();
        clock.advance();
        assert_eq!(clock.current(), 0);
    }

    #[test]
    fn test_skipped_frame_does_not_advance() {
        // An out-of-date acquire aborts the frame before submission; the
        // renderer simply never calls advance(), so the slot is reused.
        let mut clock = FrameClock::new(3);
        clock.advance();
        let before = clock.current();
        // ... acquire fails, no submit, no present ...
        assert_eq!(clock.current(), before);
    }

    #[rstest]
    #[case(0, 3, 2)]
    #[case(1, 3, 0)]
    #[case(2, 3, 1)]
    #[case(0, 2, 1)]
    #[case(1, 2, 0)]
    fn test_previous_slot(#[case] slot: usize, #[case] frames: usize, #[case] expected: usize) {
        assert_eq!(previous_slot(slot, frames), expected);
    }

    #[test]
    fn test_previous_never_aliases_current() {
        for frames in 2..=4 {
            let mut clock = FrameClock::new(frames);
            for _ in 0..frames * 3 {
                assert_ne!(clock.current(), clock.previous());
                clock.advance();
            }
        }
    }
}
