//! Render pass recording.
//!
//! Recording is split from the orchestrator so each pass is a plain function
//! of the resources it touches. Both passes set viewport and scissor
//! themselves since those are dynamic pipeline state.

use crate::context::DeviceContext;
use crate::particles::ParticleSystem;
use crate::pipeline::Pipeline;
use crate::render_target::RenderTarget;
use crate::resources::{Mesh, PushConstants};
use ash::vk;

/// Depth bias applied while rendering the shadow map, tunable at runtime.
#[derive(Debug, Clone, Copy)]
pub struct DepthBias {
    pub constant: f32,
    pub slope: f32,
}

impl Default for DepthBias {
    fn default() -> Self {
        Self {
            constant: 1.25,
            slope: 1.75,
        }
    }
}

/// One mesh draw with its per-draw constants.
pub struct DrawItem<'a> {
    pub mesh: &'a Mesh,
    pub push: PushConstants,
}

fn set_viewport_scissor(ctx: &DeviceContext, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    unsafe {
        ctx.device().cmd_set_viewport(cmd, 0, &[viewport]);
        ctx.device().cmd_set_scissor(cmd, 0, &[scissor]);
    }
}

fn draw_meshes(
    ctx: &DeviceContext,
    cmd: vk::CommandBuffer,
    layout: vk::PipelineLayout,
    items: &[DrawItem<'_>],
) {
    for item in items {
        item.mesh.bind(ctx, cmd);
        unsafe {
            ctx.device().cmd_push_constants(
                cmd,
                layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&item.push),
            );
            ctx.device()
                .cmd_draw_indexed(cmd, item.mesh.index_count(), 1, 0, 0, 0);
        }
    }
}

/// Depth-only pass into the shadow map.
pub fn record_shadow_pass(
    ctx: &DeviceContext,
    cmd: vk::CommandBuffer,
    target: &RenderTarget,
    pipeline: &Pipeline,
    set: vk::DescriptorSet,
    items: &[DrawItem<'_>],
    bias: DepthBias,
) {
    let clear = [vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        },
    }];
    let begin_info = vk::RenderPassBeginInfo {
        render_pass: target.render_pass(),
        framebuffer: target.framebuffer(0),
        render_area: vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent(),
        },
        clear_value_count: clear.len() as u32,
        p_clear_values: clear.as_ptr(),
        ..Default::default()
    };

    unsafe {
        let device = ctx.device();
        device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
        set_viewport_scissor(ctx, cmd, target.extent());
        device.cmd_set_depth_bias(cmd, bias.constant, 0.0, bias.slope);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            pipeline.layout(),
            0,
            &[set],
            &[],
        );
        draw_meshes(ctx, cmd, pipeline.layout(), items);
        device.cmd_end_render_pass(cmd);
    }
}

/// Lit geometry plus the particle point cloud into one swapchain image.
#[allow(clippy::too_many_arguments)]
pub fn record_scene_pass(
    ctx: &DeviceContext,
    cmd: vk::CommandBuffer,
    target: &RenderTarget,
    image_index: usize,
    scene_pipeline: &Pipeline,
    particle_pipeline: &Pipeline,
    set: vk::DescriptorSet,
    items: &[DrawItem<'_>],
    particles: &ParticleSystem,
) {
    let clears = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.015, 0.02, 0.035, 1.0],
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];
    let begin_info = vk::RenderPassBeginInfo {
        render_pass: target.render_pass(),
        framebuffer: target.framebuffer(image_index),
        render_area: vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent(),
        },
        clear_value_count: clears.len() as u32,
        p_clear_values: clears.as_ptr(),
        ..Default::default()
    };

    unsafe {
        let device = ctx.device();
        device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, scene_pipeline.handle());
        set_viewport_scissor(ctx, cmd, target.extent());
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            scene_pipeline.layout(),
            0,
            &[set],
            &[],
        );
        draw_meshes(ctx, cmd, scene_pipeline.layout(), items);

        device.cmd_bind_pipeline(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            particle_pipeline.handle(),
        );
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            particle_pipeline.layout(),
            0,
            &[set],
            &[],
        );
        particles.record_draw(ctx, cmd);

        device.cmd_end_render_pass(cmd);
    }
}
