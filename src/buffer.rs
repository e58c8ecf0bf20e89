//! GPU buffer and image allocations.
//!
//! Vertex, index and storage buffers live in device-local memory and are
//! filled through a staging upload. Uniform buffers stay host-visible and
//! come in a ring of one copy per presentable image, so the CPU can write
//! frame K+1 while the GPU still reads frame K.

use crate::commands::{submit_one_time, CommandPool};
use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

/// Concurrent sharing whenever more than one queue family accesses the
/// buffer; the family list is ignored for the exclusive case.
fn sharing_mode(families: &[u32]) -> vk::SharingMode {
    if families.len() > 1 {
        vk::SharingMode::CONCURRENT
    } else {
        vk::SharingMode::EXCLUSIVE
    }
}

/// A buffer plus its memory allocation.
pub struct GpuBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

impl GpuBuffer {
    pub fn new(
        ctx: &DeviceContext,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> RenderResult<Self> {
        // Buffers move between the transfer, compute and graphics queues
        // without ownership-transfer barriers, so on hardware with dedicated
        // families they must be concurrently shared.
        let families = ctx.families().buffer_access_families();
        unsafe {
            let buffer_info = vk::BufferCreateInfo {
                size,
                usage,
                sharing_mode: sharing_mode(&families),
                queue_family_index_count: families.len() as u32,
                p_queue_family_indices: families.as_ptr(),
                ..Default::default()
            };
            let buffer = ctx
                .device()
                .create_buffer(&buffer_info, None)
                .map_err(|e| RenderError::BufferCreationFailed(e.to_string()))?;

            let requirements = ctx.device().get_buffer_memory_requirements(buffer);
            let allocation = ctx
                .allocator()
                .lock()
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| RenderError::AllocationFailed(e.to_string()))?;

            ctx.device()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| RenderError::BufferCreationFailed(e.to_string()))?;

            Ok(Self {
                buffer,
                allocation: Some(allocation),
                size,
            })
        }
    }

    /// Device-local buffer filled from `data` through a staging copy on the
    /// transfer queue.
    pub fn new_device_local(
        ctx: &DeviceContext,
        transfer_pool: &CommandPool,
        usage: vk::BufferUsageFlags,
        data: &[u8],
        name: &str,
    ) -> RenderResult<Self> {
        let size = data.len() as u64;
        let mut staging = Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging",
        )?;
        staging.write(0, data);

        let buffer = Self::new(
            ctx,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )?;

        submit_one_time(ctx, transfer_pool, ctx.transfer_queue(), |cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe {
                ctx.device()
                    .cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
            }
        })?;

        staging.destroy(ctx);
        Ok(buffer)
    }

    /// Write into a host-visible allocation. No-op past the end of the buffer.
    pub fn write(&mut self, offset: usize, data: &[u8]) {
        if let Some(allocation) = self.allocation.as_mut() {
            if let Some(mapped) = allocation.mapped_slice_mut() {
                let end = offset + data.len();
                if end <= mapped.len() {
                    mapped[offset..end].copy_from_slice(data);
                }
            }
        }
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        unsafe {
            if self.buffer != vk::Buffer::null() {
                ctx.device().destroy_buffer(self.buffer, None);
                self.buffer = vk::Buffer::null();
            }
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = ctx.allocator().lock().free(allocation);
        }
    }
}

/// One uniform buffer per presentable image.
///
/// Slices are never shared between images: the frame protocol guarantees an
/// image's fence has signaled before its copy is rewritten.
pub struct UniformRing {
    buffers: Vec<GpuBuffer>,
    stride: u64,
}

impl UniformRing {
    pub fn new(ctx: &DeviceContext, count: usize, stride: u64, name: &str) -> RenderResult<Self> {
        let buffers = (0..count)
            .map(|_| {
                GpuBuffer::new(
                    ctx,
                    stride,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                    name,
                )
            })
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(Self { buffers, stride })
    }

    /// Drop all copies and rebuild for a (possibly changed) image count.
    pub fn recreate(&mut self, ctx: &DeviceContext, count: usize, name: &str) -> RenderResult<()> {
        let stride = self.stride;
        self.destroy(ctx);
        *self = Self::new(ctx, count, stride, name)?;
        Ok(())
    }

    pub fn write(&mut self, image_index: usize, data: &[u8]) {
        self.buffers[image_index].write(0, data);
    }

    pub fn buffer(&self, image_index: usize) -> vk::Buffer {
        self.buffers[image_index].handle()
    }

    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        for buffer in &mut self.buffers {
            buffer.destroy(ctx);
        }
        self.buffers.clear();
    }
}

/// An image plus its memory allocation and default view.
pub struct AllocatedImage {
    image: vk::Image,
    allocation: Option<Allocation>,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl AllocatedImage {
    /// Depth attachment, optionally usable as a sampled shadow map.
    pub fn new_depth(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        format: vk::Format,
        sampled: bool,
        name: &str,
    ) -> RenderResult<Self> {
        let mut usage = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        if sampled {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        Self::new(ctx, extent, format, usage, vk::ImageAspectFlags::DEPTH, name)
    }

    pub fn new(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        name: &str,
    ) -> RenderResult<Self> {
        unsafe {
            let image_info = vk::ImageCreateInfo {
                image_type: vk::ImageType::TYPE_2D,
                extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
                mip_levels: 1,
                array_layers: 1,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                initial_layout: vk::ImageLayout::UNDEFINED,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                samples: vk::SampleCountFlags::TYPE_1,
                ..Default::default()
            };
            let image = ctx
                .device()
                .create_image(&image_info, None)
                .map_err(|e| RenderError::ImageCreationFailed(e.to_string()))?;

            let requirements = ctx.device().get_image_memory_requirements(image);
            let allocation = ctx
                .allocator()
                .lock()
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| RenderError::AllocationFailed(e.to_string()))?;

            ctx.device()
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(|e| RenderError::ImageCreationFailed(e.to_string()))?;

            let view_info = vk::ImageViewCreateInfo {
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = ctx
                .device()
                .create_image_view(&view_info, None)
                .map_err(|e| RenderError::ImageCreationFailed(e.to_string()))?;

            Ok(Self {
                image,
                allocation: Some(allocation),
                view,
                format,
                extent,
            })
        }
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        unsafe {
            if self.view != vk::ImageView::null() {
                ctx.device().destroy_image_view(self.view, None);
                self.view = vk::ImageView::null();
            }
            if self.image != vk::Image::null() {
                ctx.device().destroy_image(self.image, None);
                self.image = vk::Image::null();
            }
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = ctx.allocator().lock().free(allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_shared_when_queue_families_differ() {
        // A dedicated-family device uploads on transfer, simulates on compute
        // and draws on graphics from the same buffer.
        assert_eq!(sharing_mode(&[0, 1, 2]), vk::SharingMode::CONCURRENT);
        assert_eq!(sharing_mode(&[0, 1]), vk::SharingMode::CONCURRENT);
        assert_eq!(sharing_mode(&[0]), vk::SharingMode::EXCLUSIVE);
    }
}
