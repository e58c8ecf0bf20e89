//! Meshes, vertex layout and per-draw material constants.

use crate::buffer::GpuBuffer;
use crate::commands::CommandPool;
use crate::context::DeviceContext;
use crate::error::RenderResult;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
        ]
    }
}

/// Per-draw constants pushed before each mesh.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PushConstants {
    pub model: Mat4,
    pub base_color: Vec4,
}

impl PushConstants {
    pub const SIZE: u32 = std::mem::size_of::<PushConstants>() as u32;
}

/// An indexed mesh in device-local memory.
pub struct Mesh {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
}

impl Mesh {
    pub fn new(
        ctx: &DeviceContext,
        transfer_pool: &CommandPool,
        vertices: &[Vertex],
        indices: &[u32],
        name: &str,
    ) -> RenderResult<Self> {
        let vertex_buffer = GpuBuffer::new_device_local(
            ctx,
            transfer_pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(vertices),
            name,
        )?;
        let index_buffer = GpuBuffer::new_device_local(
            ctx,
            transfer_pool,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(indices),
            name,
        )?;
        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }

    pub fn bind(&self, ctx: &DeviceContext, cmd: vk::CommandBuffer) {
        unsafe {
            ctx.device()
                .cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle()], &[0]);
            ctx.device().cmd_bind_index_buffer(
                cmd,
                self.index_buffer.handle(),
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        self.vertex_buffer.destroy(ctx);
        self.index_buffer.destroy(ctx);
    }
}

/// Axis-aligned unit cube centered on the origin, with face normals.
pub fn cube_mesh_data(half_extent: f32) -> (Vec<Vertex>, Vec<u32>) {
    let h = half_extent;
    let faces: [([f32; 3], [[f32; 3]; 4]); 6] = [
        (
            [0.0, 0.0, 1.0],
            [[-h, -h, h], [h, -h, h], [h, h, h], [-h, h, h]],
        ),
        (
            [0.0, 0.0, -1.0],
            [[h, -h, -h], [-h, -h, -h], [-h, h, -h], [h, h, -h]],
        ),
        (
            [1.0, 0.0, 0.0],
            [[h, -h, h], [h, -h, -h], [h, h, -h], [h, h, h]],
        ),
        (
            [-1.0, 0.0, 0.0],
            [[-h, -h, -h], [-h, -h, h], [-h, h, h], [-h, h, -h]],
        ),
        (
            [0.0, 1.0, 0.0],
            [[-h, h, h], [h, h, h], [h, h, -h], [-h, h, -h]],
        ),
        (
            [0.0, -1.0, 0.0],
            [[-h, -h, -h], [h, -h, -h], [h, -h, h], [-h, -h, h]],
        ),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, corners) in faces {
        let base = vertices.len() as u32;
        for position in corners {
            vertices.push(Vertex { position, normal });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// Flat ground plane in the XZ plane at y = 0.
pub fn plane_mesh_data(half_extent: f32) -> (Vec<Vertex>, Vec<u32>) {
    let h = half_extent;
    let normal = [0.0, 1.0, 0.0];
    let vertices = vec![
        Vertex {
            position: [-h, 0.0, -h],
            normal,
        },
        Vertex {
            position: [h, 0.0, -h],
            normal,
        },
        Vertex {
            position: [h, 0.0, h],
            normal,
        },
        Vertex {
            position: [-h, 0.0, h],
            normal,
        },
    ];
    let indices = vec![0, 2, 1, 0, 3, 2];
    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_attribute_offsets() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].offset as usize, std::mem::offset_of!(Vertex, normal));
    }

    #[test]
    fn push_constants_fit_the_minimum_guaranteed_range() {
        // 128 bytes is the smallest maxPushConstantsSize any device reports.
        assert!(PushConstants::SIZE <= 128);
        assert_eq!(PushConstants::SIZE % 16, 0);
    }

    #[test]
    fn cube_has_one_normal_per_face_corner() {
        let (vertices, indices) = cube_mesh_data(0.5);
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn plane_winding_is_counter_clockwise_from_above() {
        let (vertices, indices) = plane_mesh_data(10.0);
        assert_eq!(vertices.len(), 4);
        assert_eq!(indices.len(), 6);
        // All normals point up.
        assert!(vertices.iter().all(|v| v.normal == [0.0, 1.0, 0.0]));
    }
}
