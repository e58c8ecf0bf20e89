//! Descriptor layouts, pool and binding sets.
//!
//! Graphics binding sets come one per presentable image so a set is never
//! rewritten while a frame reading it is in flight. The compute simulation
//! uses a single set since dispatches are serialized by semaphores. On a
//! recreate the pool is rebuilt at the new image count and every set
//! reallocated and rewritten; partial updates across a surface recreation are
//! never attempted.

use crate::buffer::UniformRing;
use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use ash::vk;

pub struct DescriptorLayouts {
    graphics: vk::DescriptorSetLayout,
    compute: vk::DescriptorSetLayout,
}

impl DescriptorLayouts {
    pub fn new(ctx: &DeviceContext) -> RenderResult<Self> {
        let graphics_bindings = [
            vk::DescriptorSetLayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            },
            vk::DescriptorSetLayoutBinding {
                binding: 1,
                descriptor_type: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            },
            vk::DescriptorSetLayoutBinding {
                binding: 2,
                descriptor_type: vk::DescriptorType::SAMPLER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            },
        ];
        let graphics = create_layout(ctx, &graphics_bindings)?;

        let compute_bindings = [
            vk::DescriptorSetLayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                ..Default::default()
            },
            vk::DescriptorSetLayoutBinding {
                binding: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                ..Default::default()
            },
        ];
        let compute = create_layout(ctx, &compute_bindings)?;

        Ok(Self { graphics, compute })
    }

    pub fn graphics(&self) -> vk::DescriptorSetLayout {
        self.graphics
    }

    pub fn compute(&self) -> vk::DescriptorSetLayout {
        self.compute
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        unsafe {
            if self.graphics != vk::DescriptorSetLayout::null() {
                ctx.device().destroy_descriptor_set_layout(self.graphics, None);
                self.graphics = vk::DescriptorSetLayout::null();
            }
            if self.compute != vk::DescriptorSetLayout::null() {
                ctx.device().destroy_descriptor_set_layout(self.compute, None);
                self.compute = vk::DescriptorSetLayout::null();
            }
        }
    }
}

fn create_layout(
    ctx: &DeviceContext,
    bindings: &[vk::DescriptorSetLayoutBinding],
) -> RenderResult<vk::DescriptorSetLayout> {
    let layout_info = vk::DescriptorSetLayoutCreateInfo {
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    unsafe {
        ctx.device()
            .create_descriptor_set_layout(&layout_info, None)
            .map_err(RenderError::DescriptorCreationFailed)
    }
}

/// Pool sizes for `image_count` graphics sets plus the compute set.
pub fn pool_sizes(image_count: u32) -> [vk::DescriptorPoolSize; 4] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: image_count + 1,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: image_count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: image_count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 1,
        },
    ]
}

fn create_pool(ctx: &DeviceContext, image_count: usize) -> RenderResult<vk::DescriptorPool> {
    let sizes = pool_sizes(image_count as u32);
    let pool_info = vk::DescriptorPoolCreateInfo {
        max_sets: image_count as u32 + 1,
        pool_size_count: sizes.len() as u32,
        p_pool_sizes: sizes.as_ptr(),
        ..Default::default()
    };
    unsafe {
        ctx.device()
            .create_descriptor_pool(&pool_info, None)
            .map_err(RenderError::DescriptorCreationFailed)
    }
}

pub struct BindingSets {
    pool: vk::DescriptorPool,
    graphics_sets: Vec<vk::DescriptorSet>,
    compute_set: vk::DescriptorSet,
    generation: u64,
}

impl BindingSets {
    pub fn new(
        ctx: &DeviceContext,
        layouts: &DescriptorLayouts,
        image_count: usize,
    ) -> RenderResult<Self> {
        let pool = create_pool(ctx, image_count)?;
        let mut sets = Self {
            pool,
            graphics_sets: Vec::new(),
            compute_set: vk::DescriptorSet::null(),
            generation: 0,
        };
        sets.allocate(ctx, layouts, image_count)?;
        Ok(sets)
    }

    fn allocate(
        &mut self,
        ctx: &DeviceContext,
        layouts: &DescriptorLayouts,
        image_count: usize,
    ) -> RenderResult<()> {
        let graphics_layouts = vec![layouts.graphics(); image_count];
        let alloc_info = vk::DescriptorSetAllocateInfo {
            descriptor_pool: self.pool,
            descriptor_set_count: image_count as u32,
            p_set_layouts: graphics_layouts.as_ptr(),
            ..Default::default()
        };
        self.graphics_sets = unsafe {
            ctx.device()
                .allocate_descriptor_sets(&alloc_info)
                .map_err(RenderError::DescriptorCreationFailed)?
        };

        let compute_layout = layouts.compute();
        let alloc_info = vk::DescriptorSetAllocateInfo {
            descriptor_pool: self.pool,
            descriptor_set_count: 1,
            p_set_layouts: &compute_layout,
            ..Default::default()
        };
        self.compute_set = unsafe {
            ctx.device()
                .allocate_descriptor_sets(&alloc_info)
                .map_err(RenderError::DescriptorCreationFailed)?[0]
        };
        Ok(())
    }

    /// Replace the pool and reallocate every set. The pool is rebuilt rather
    /// than reset because its capacity is sized to the image count, which a
    /// surface recreate may have changed. Callers must rewrite all sets
    /// afterwards.
    pub fn recreate(
        &mut self,
        ctx: &DeviceContext,
        layouts: &DescriptorLayouts,
        image_count: usize,
    ) -> RenderResult<()> {
        unsafe {
            ctx.device().destroy_descriptor_pool(self.pool, None);
        }
        // Leave no dangling handle behind if the rebuild fails.
        self.pool = vk::DescriptorPool::null();
        self.pool = create_pool(ctx, image_count)?;
        self.graphics_sets.clear();
        self.compute_set = vk::DescriptorSet::null();
        self.allocate(ctx, layouts, image_count)?;
        self.generation += 1;
        Ok(())
    }

    /// Point one graphics set at its uniform copy and the shadow map.
    pub fn write_graphics(
        &self,
        ctx: &DeviceContext,
        image_index: usize,
        uniforms: &UniformRing,
        shadow_view: vk::ImageView,
        shadow_sampler: vk::Sampler,
    ) {
        let set = self.graphics_sets[image_index];
        let buffer_info = vk::DescriptorBufferInfo {
            buffer: uniforms.buffer(image_index),
            offset: 0,
            range: uniforms.stride(),
        };
        let image_info = vk::DescriptorImageInfo {
            image_view: shadow_view,
            image_layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            ..Default::default()
        };
        let sampler_info = vk::DescriptorImageInfo {
            sampler: shadow_sampler,
            ..Default::default()
        };

        let writes = [
            vk::WriteDescriptorSet {
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &buffer_info,
                ..Default::default()
            },
            vk::WriteDescriptorSet {
                dst_set: set,
                dst_binding: 1,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::SAMPLED_IMAGE,
                p_image_info: &image_info,
                ..Default::default()
            },
            vk::WriteDescriptorSet {
                dst_set: set,
                dst_binding: 2,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::SAMPLER,
                p_image_info: &sampler_info,
                ..Default::default()
            },
        ];
        unsafe { ctx.device().update_descriptor_sets(&writes, &[]) };
    }

    /// Point the compute set at the particle storage and simulation uniform.
    pub fn write_compute(
        &self,
        ctx: &DeviceContext,
        particle_buffer: vk::Buffer,
        particle_buffer_size: u64,
        sim_uniform: vk::Buffer,
        sim_uniform_size: u64,
    ) {
        let storage_info = vk::DescriptorBufferInfo {
            buffer: particle_buffer,
            offset: 0,
            range: particle_buffer_size,
        };
        let uniform_info = vk::DescriptorBufferInfo {
            buffer: sim_uniform,
            offset: 0,
            range: sim_uniform_size,
        };
        let writes = [
            vk::WriteDescriptorSet {
                dst_set: self.compute_set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                p_buffer_info: &storage_info,
                ..Default::default()
            },
            vk::WriteDescriptorSet {
                dst_set: self.compute_set,
                dst_binding: 1,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &uniform_info,
                ..Default::default()
            },
        ];
        unsafe { ctx.device().update_descriptor_sets(&writes, &[]) };
    }

    pub fn graphics_set(&self, image_index: usize) -> vk::DescriptorSet {
        self.graphics_sets[image_index]
    }

    pub fn compute_set(&self) -> vk::DescriptorSet {
        self.compute_set
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        unsafe {
            if self.pool != vk::DescriptorPool::null() {
                ctx.device().destroy_descriptor_pool(self.pool, None);
                self.pool = vk::DescriptorPool::null();
            }
        }
        self.graphics_sets.clear();
        self.compute_set = vk::DescriptorSet::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_covers_one_graphics_set_per_image_plus_compute() {
        let sizes = pool_sizes(3);
        let uniforms = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER)
            .unwrap();
        // Three per-image frame uniforms plus the simulation uniform.
        assert_eq!(uniforms.descriptor_count, 4);
        let storage = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::STORAGE_BUFFER)
            .unwrap();
        assert_eq!(storage.descriptor_count, 1);
    }

    #[test]
    fn pool_capacity_follows_a_changed_image_count() {
        // A recreate may raise the swapchain image count; the pool the sets
        // are reallocated from must be sized for the new count, not the one
        // at construction time.
        for count in [2u32, 3, 4] {
            let sizes = pool_sizes(count);
            for ty in [vk::DescriptorType::SAMPLED_IMAGE, vk::DescriptorType::SAMPLER] {
                let size = sizes.iter().find(|s| s.ty == ty).unwrap();
                assert_eq!(size.descriptor_count, count);
            }
            let uniforms = sizes
                .iter()
                .find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER)
                .unwrap();
            assert_eq!(uniforms.descriptor_count, count + 1);
        }
    }
}
