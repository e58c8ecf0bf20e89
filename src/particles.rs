//! GPU particle simulation.
//!
//! Particles live in one device-local storage buffer that doubles as the
//! vertex buffer for the point draw. Each simulation step records two
//! dispatches, force then integrate, with a buffer barrier between them so
//! the integrate pass sees finished velocity writes. Queue-level ordering
//! against the graphics pass is handled by the orchestrator's semaphore pair.

use crate::buffer::GpuBuffer;
use crate::commands::CommandPool;
use crate::context::DeviceContext;
use crate::error::RenderResult;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use gpu_allocator::MemoryLocation;

pub const WORKGROUP_SIZE: u32 = 256;
pub const DEFAULT_PARTICLE_COUNT: u32 = 16384;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Particle {
    pub position: Vec4,
    pub velocity: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SimParams {
    pub attractor: Vec4,
    pub delta_time: f32,
    pub particle_count: u32,
    pub _pad: [u32; 2],
}

pub fn vertex_binding_description() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Particle>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

pub fn vertex_attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32A32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32A32_SFLOAT,
            offset: 16,
        },
    ]
}

/// Number of workgroups covering `particle_count` invocations.
pub fn dispatch_group_count(particle_count: u32) -> u32 {
    particle_count.div_ceil(WORKGROUP_SIZE)
}

/// Deterministic initial cloud above the ground plane.
pub fn seed_particles(count: u32) -> Vec<Particle> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut next = move || {
        // xorshift64*
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        (state.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 40) as f32 / 16_777_216.0
    };
    (0..count)
        .map(|_| {
            let x = (next() - 0.5) * 6.0;
            let y = 2.0 + next() * 4.0;
            let z = (next() - 0.5) * 6.0;
            Particle {
                position: Vec4::new(x, y, z, 1.0),
                velocity: Vec4::new(0.0, 0.0, 0.0, 0.0),
            }
        })
        .collect()
}

pub struct ParticleSystem {
    storage: GpuBuffer,
    sim_uniform: GpuBuffer,
    count: u32,
    paused: bool,
}

impl ParticleSystem {
    pub fn new(
        ctx: &DeviceContext,
        transfer_pool: &CommandPool,
        count: u32,
    ) -> RenderResult<Self> {
        let seed = seed_particles(count);
        let storage = GpuBuffer::new_device_local(
            ctx,
            transfer_pool,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&seed),
            "particle storage",
        )?;
        let sim_uniform = GpuBuffer::new(
            ctx,
            std::mem::size_of::<SimParams>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            "particle sim params",
        )?;
        Ok(Self {
            storage,
            sim_uniform,
            count,
            paused: false,
        })
    }

    pub fn storage_buffer(&self) -> vk::Buffer {
        self.storage.handle()
    }

    pub fn storage_size(&self) -> u64 {
        self.storage.size()
    }

    pub fn sim_uniform_buffer(&self) -> vk::Buffer {
        self.sim_uniform.handle()
    }

    pub fn sim_uniform_size(&self) -> u64 {
        self.sim_uniform.size()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Upload this step's parameters. A paused simulation freezes time but
    /// keeps dispatching, so the frame structure never changes shape.
    pub fn update_params(&mut self, delta_time: f32, elapsed: f32) {
        let t = elapsed * 0.5;
        let params = SimParams {
            attractor: Vec4::new(t.cos() * 2.5, 3.0, t.sin() * 2.5, 18.0),
            delta_time: if self.paused { 0.0 } else { delta_time },
            particle_count: self.count,
            _pad: [0; 2],
        };
        self.sim_uniform.write(0, bytemuck::bytes_of(&params));
    }

    /// Record both simulation dispatches into `cmd`.
    pub fn record_compute(
        &self,
        ctx: &DeviceContext,
        cmd: vk::CommandBuffer,
        force_pipeline: vk::Pipeline,
        integrate_pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        let groups = dispatch_group_count(self.count);
        unsafe {
            let device = ctx.device();
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                &[set],
                &[],
            );

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, force_pipeline);
            device.cmd_dispatch(cmd, groups, 1, 1);

            // Velocity writes must land before the integrate pass reads them.
            let barrier = vk::BufferMemoryBarrier {
                src_access_mask: vk::AccessFlags::SHADER_WRITE,
                dst_access_mask: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                buffer: self.storage.handle(),
                offset: 0,
                size: vk::WHOLE_SIZE,
                ..Default::default()
            };
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, integrate_pipeline);
            device.cmd_dispatch(cmd, groups, 1, 1);
        }
    }

    /// Record the point draw. Assumes the particle pipeline and graphics
    /// descriptor set are already bound.
    pub fn record_draw(&self, ctx: &DeviceContext, cmd: vk::CommandBuffer) {
        unsafe {
            ctx.device()
                .cmd_bind_vertex_buffers(cmd, 0, &[self.storage.handle()], &[0]);
            ctx.device().cmd_draw(cmd, self.count, 1, 0, 0);
        }
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        self.storage.destroy(ctx);
        self.sim_uniform.destroy(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_count_covers_every_particle_exactly() {
        assert_eq!(dispatch_group_count(1), 1);
        assert_eq!(dispatch_group_count(WORKGROUP_SIZE), 1);
        assert_eq!(dispatch_group_count(WORKGROUP_SIZE + 1), 2);
        assert_eq!(dispatch_group_count(DEFAULT_PARTICLE_COUNT), 64);
    }

    #[test]
    fn particle_layout_matches_the_shader_struct() {
        assert_eq!(std::mem::size_of::<Particle>(), 32);
        let attrs = vertex_attribute_descriptions();
        assert_eq!(attrs[1].offset as usize, std::mem::offset_of!(Particle, velocity));
    }

    #[test]
    fn seed_is_deterministic_and_above_ground() {
        let a = seed_particles(128);
        let b = seed_particles(128);
        assert_eq!(a.len(), 128);
        for (pa, pb) in a.iter().zip(&b) {
            assert_eq!(pa.position, pb.position);
            assert!(pa.position.y >= 0.0);
            assert_eq!(pa.velocity, Vec4::ZERO);
        }
    }

    #[test]
    fn sim_params_struct_is_sixteen_byte_aligned() {
        assert_eq!(std::mem::size_of::<SimParams>() % 16, 0);
    }
}
