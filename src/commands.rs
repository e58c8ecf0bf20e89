//! Command pools and command sequences.
//!
//! A command sequence is the recorded, replayable unit referencing one
//! pipeline, binding set and render target generation. Sequences are
//! freed and reallocated whenever any of those change.

use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use ash::vk;

pub struct CommandPool {
    pool: vk::CommandPool,
}

impl CommandPool {
    pub fn new(ctx: &DeviceContext, family: u32) -> RenderResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            queue_family_index: family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = unsafe {
            ctx.device()
                .create_command_pool(&pool_info, None)
                .map_err(RenderError::CommandBufferCreationFailed)?
        };
        Ok(Self { pool })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        unsafe {
            if self.pool != vk::CommandPool::null() {
                ctx.device().destroy_command_pool(self.pool, None);
                self.pool = vk::CommandPool::null();
            }
        }
    }
}

/// A set of primary command buffers, one per presentable image (or exactly
/// one for offscreen and compute work).
pub struct CommandSequence {
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandSequence {
    pub fn allocate(ctx: &DeviceContext, pool: &CommandPool, count: usize) -> RenderResult<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            command_pool: pool.handle(),
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        let buffers = unsafe {
            ctx.device()
                .allocate_command_buffers(&alloc_info)
                .map_err(RenderError::CommandBufferCreationFailed)?
        };
        Ok(Self { buffers })
    }

    /// Free and reallocate. Content depends on the just-recreated pipeline and
    /// render target, so a full re-record must follow.
    pub fn recreate(
        &mut self,
        ctx: &DeviceContext,
        pool: &CommandPool,
        count: usize,
    ) -> RenderResult<()> {
        self.free(ctx, pool);
        *self = Self::allocate(ctx, pool, count)?;
        Ok(())
    }

    pub fn free(&mut self, ctx: &DeviceContext, pool: &CommandPool) {
        if !self.buffers.is_empty() {
            unsafe {
                ctx.device().free_command_buffers(pool.handle(), &self.buffers);
            }
            self.buffers.clear();
        }
    }

    pub fn buffer(&self, index: usize) -> vk::CommandBuffer {
        self.buffers[index]
    }

    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Begin recording buffer `index`, resetting any prior content.
    pub fn begin(&self, ctx: &DeviceContext, index: usize) -> RenderResult<vk::CommandBuffer> {
        let cmd = self.buffer(index);
        unsafe {
            ctx.device()
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(RenderError::CommandBufferCreationFailed)?;
            let begin_info = vk::CommandBufferBeginInfo::default();
            ctx.device()
                .begin_command_buffer(cmd, &begin_info)
                .map_err(RenderError::CommandBufferCreationFailed)?;
        }
        Ok(cmd)
    }

    pub fn end(&self, ctx: &DeviceContext, index: usize) -> RenderResult<()> {
        unsafe {
            ctx.device()
                .end_command_buffer(self.buffer(index))
                .map_err(RenderError::CommandBufferCreationFailed)
        }
    }
}

/// Record and synchronously submit a one-shot command buffer.
///
/// Used for staging uploads at construction time; blocks on queue idle, so
/// never call it from the per-frame path.
pub fn submit_one_time(
    ctx: &DeviceContext,
    pool: &CommandPool,
    queue: vk::Queue,
    record: impl FnOnce(vk::CommandBuffer),
) -> RenderResult<()> {
    unsafe {
        let alloc_info = vk::CommandBufferAllocateInfo {
            command_pool: pool.handle(),
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = ctx
            .device()
            .allocate_command_buffers(&alloc_info)
            .map_err(RenderError::CommandBufferCreationFailed)?[0];

        let begin_info = vk::CommandBufferBeginInfo {
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        ctx.device()
            .begin_command_buffer(cmd, &begin_info)
            .map_err(RenderError::CommandBufferCreationFailed)?;

        record(cmd);

        ctx.device()
            .end_command_buffer(cmd)
            .map_err(RenderError::CommandBufferCreationFailed)?;

        let submit_info = vk::SubmitInfo {
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        ctx.device()
            .queue_submit(queue, &[submit_info], vk::Fence::null())
            .map_err(RenderError::SubmitFailed)?;
        ctx.device()
            .queue_wait_idle(queue)
            .map_err(RenderError::SubmitFailed)?;

        ctx.device().free_command_buffers(pool.handle(), &[cmd]);
        Ok(())
    }
}
