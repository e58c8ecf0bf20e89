//! Frame synchronization primitives.
//!
//! Two frames may be in flight at once. Each slot owns an acquire semaphore,
//! a render-finished semaphore and a fence signaled when that slot's work
//! retires. A separate per-image table remembers which slot fence last
//! rendered to each swapchain image, so an image handed back early by the
//! presentation engine is never overwritten while still referenced.
//!
//! The compute simulation runs on its own queue and alternates with graphics
//! through a dedicated semaphore pair.

use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use ash::vk;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

fn create_semaphore(ctx: &DeviceContext) -> RenderResult<vk::Semaphore> {
    let info = vk::SemaphoreCreateInfo::default();
    unsafe {
        ctx.device()
            .create_semaphore(&info, None)
            .map_err(RenderError::SyncCreationFailed)
    }
}

fn create_fence(ctx: &DeviceContext, signaled: bool) -> RenderResult<vk::Fence> {
    let info = vk::FenceCreateInfo {
        flags: if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        },
        ..Default::default()
    };
    unsafe {
        ctx.device()
            .create_fence(&info, None)
            .map_err(RenderError::SyncCreationFailed)
    }
}

/// Synchronization objects for one in-flight slot.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    fn new(ctx: &DeviceContext) -> RenderResult<Self> {
        Ok(Self {
            image_available: create_semaphore(ctx)?,
            render_finished: create_semaphore(ctx)?,
            // Signaled so the first wait on each slot passes immediately.
            in_flight: create_fence(ctx, true)?,
        })
    }

    fn destroy(&mut self, ctx: &DeviceContext) {
        unsafe {
            ctx.device().destroy_semaphore(self.image_available, None);
            ctx.device().destroy_semaphore(self.render_finished, None);
            ctx.device().destroy_fence(self.in_flight, None);
        }
        self.image_available = vk::Semaphore::null();
        self.render_finished = vk::Semaphore::null();
        self.in_flight = vk::Fence::null();
    }
}

pub struct SyncSet {
    frames: Vec<FrameSync>,
    images_in_flight: Vec<vk::Fence>,
    current_slot: usize,
}

impl SyncSet {
    pub fn new(ctx: &DeviceContext, image_count: usize) -> RenderResult<Self> {
        let frames = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::new(ctx))
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(Self {
            frames,
            images_in_flight: vec![vk::Fence::null(); image_count],
            current_slot: 0,
        })
    }

    pub fn current(&self) -> &FrameSync {
        &self.frames[self.current_slot]
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Block until the current slot's previous submission has retired.
    pub fn wait_current(&self, ctx: &DeviceContext) -> RenderResult<()> {
        unsafe {
            ctx.device()
                .wait_for_fences(&[self.current().in_flight], true, u64::MAX)
                .map_err(RenderError::DeviceWaitFailed)
        }
    }

    /// If another slot's submission still targets `image_index`, wait for it,
    /// then claim the image for the current slot.
    pub fn gate_image(&mut self, ctx: &DeviceContext, image_index: usize) -> RenderResult<()> {
        let fence = self.images_in_flight[image_index];
        if fence != vk::Fence::null() {
            unsafe {
                ctx.device()
                    .wait_for_fences(&[fence], true, u64::MAX)
                    .map_err(RenderError::DeviceWaitFailed)?;
            }
        }
        self.images_in_flight[image_index] = self.current().in_flight;
        Ok(())
    }

    /// Reset the current fence. Only called once submission is certain, so an
    /// early-out path can never deadlock on an unsignalable fence.
    pub fn reset_current(&self, ctx: &DeviceContext) -> RenderResult<()> {
        unsafe {
            ctx.device()
                .reset_fences(&[self.current().in_flight])
                .map_err(RenderError::SubmitFailed)
        }
    }

    pub fn advance(&mut self) {
        self.current_slot = (self.current_slot + 1) % MAX_FRAMES_IN_FLIGHT;
    }

    /// Resize the per-image fence table after a swapchain recreation. Stale
    /// claims are dropped; the device was idle during the recreate.
    pub fn reset_image_table(&mut self, image_count: usize) {
        self.images_in_flight = vec![vk::Fence::null(); image_count];
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        for frame in &mut self.frames {
            frame.destroy(ctx);
        }
        self.frames.clear();
        self.images_in_flight.clear();
    }
}

/// Semaphore pair alternating the compute and graphics queues.
///
/// Graphics waits on `compute_finished` before reading particle positions;
/// the next compute submission waits on `graphics_finished` before writing
/// them. The pair starts with `graphics_finished` signaled by an empty
/// submit, otherwise the first compute wait would never return.
pub struct ComputeGraphicsSync {
    pub compute_finished: vk::Semaphore,
    pub graphics_finished: vk::Semaphore,
}

impl ComputeGraphicsSync {
    pub fn new(ctx: &DeviceContext) -> RenderResult<Self> {
        let sync = Self {
            compute_finished: create_semaphore(ctx)?,
            graphics_finished: create_semaphore(ctx)?,
        };

        let submit = vk::SubmitInfo {
            signal_semaphore_count: 1,
            p_signal_semaphores: &sync.graphics_finished,
            ..Default::default()
        };
        unsafe {
            ctx.device()
                .queue_submit(ctx.graphics_queue(), &[submit], vk::Fence::null())
                .map_err(RenderError::SubmitFailed)?;
            ctx.device()
                .queue_wait_idle(ctx.graphics_queue())
                .map_err(RenderError::SubmitFailed)?;
        }
        Ok(sync)
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        unsafe {
            ctx.device().destroy_semaphore(self.compute_finished, None);
            ctx.device().destroy_semaphore(self.graphics_finished, None);
        }
        self.compute_finished = vk::Semaphore::null();
        self.graphics_finished = vk::Semaphore::null();
    }
}
