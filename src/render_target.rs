//! Render targets: a render pass plus the framebuffers that feed it.
//!
//! Two kinds exist. The scene target draws into the swapchain images with a
//! private depth attachment, one framebuffer per image. The shadow target is
//! an offscreen depth-only map at a fixed resolution, sampled by the scene
//! pass, with a single framebuffer.
//!
//! On recreation the previous render pass is retired rather than destroyed,
//! because command sequences referencing it may still be in flight until the
//! next device-idle point. `cleanup_old` reclaims it afterwards.

use crate::buffer::AllocatedImage;
use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use crate::swapchain::Swapchain;
use ash::vk;

pub const SHADOW_MAP_SIZE: u32 = 2048;
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Color into the swapchain plus a private depth attachment.
    Scene,
    /// Depth-only offscreen map, sampled later in the frame.
    ShadowDepth,
}

pub struct RenderTarget {
    kind: TargetKind,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    depth_images: Vec<AllocatedImage>,
    extent: vk::Extent2D,
    generation: u64,
    old_render_pass: Option<vk::RenderPass>,
}

impl RenderTarget {
    pub fn new_scene(ctx: &DeviceContext, swapchain: &Swapchain) -> RenderResult<Self> {
        let render_pass = create_scene_render_pass(ctx, swapchain.format())?;
        let (framebuffers, depth_images) =
            create_scene_framebuffers(ctx, render_pass, swapchain)?;
        Ok(Self {
            kind: TargetKind::Scene,
            render_pass,
            framebuffers,
            depth_images,
            extent: swapchain.extent(),
            generation: 0,
            old_render_pass: None,
        })
    }

    pub fn new_shadow(ctx: &DeviceContext) -> RenderResult<Self> {
        let extent = vk::Extent2D {
            width: SHADOW_MAP_SIZE,
            height: SHADOW_MAP_SIZE,
        };
        let render_pass = create_shadow_render_pass(ctx)?;
        let (framebuffers, depth_images) = create_shadow_framebuffer(ctx, render_pass, extent)?;
        Ok(Self {
            kind: TargetKind::ShadowDepth,
            render_pass,
            framebuffers,
            depth_images,
            extent,
            generation: 0,
            old_render_pass: None,
        })
    }

    /// Rebuild against the current swapchain.
    ///
    /// The shadow target's resolution is independent of the window, but its
    /// render pass still cycles so every target generation stays in step with
    /// the surface generation.
    pub fn recreate(&mut self, ctx: &DeviceContext, swapchain: &Swapchain) -> RenderResult<()> {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { ctx.device().destroy_framebuffer(framebuffer, None) };
        }
        for mut image in self.depth_images.drain(..) {
            image.destroy(ctx);
        }
        self.cleanup_old(ctx);
        self.old_render_pass = Some(self.render_pass);

        match self.kind {
            TargetKind::Scene => {
                self.render_pass = create_scene_render_pass(ctx, swapchain.format())?;
                let (framebuffers, depth_images) =
                    create_scene_framebuffers(ctx, self.render_pass, swapchain)?;
                self.framebuffers = framebuffers;
                self.depth_images = depth_images;
                self.extent = swapchain.extent();
            }
            TargetKind::ShadowDepth => {
                self.render_pass = create_shadow_render_pass(ctx)?;
                let (framebuffers, depth_images) =
                    create_shadow_framebuffer(ctx, self.render_pass, self.extent)?;
                self.framebuffers = framebuffers;
                self.depth_images = depth_images;
            }
        }

        self.generation += 1;
        Ok(())
    }

    /// Destroy the retired render pass. Only call after a device-idle point.
    pub fn cleanup_old(&mut self, ctx: &DeviceContext) {
        if let Some(old) = self.old_render_pass.take() {
            unsafe { ctx.device().destroy_render_pass(old, None) };
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, image_index: usize) -> vk::Framebuffer {
        match self.kind {
            TargetKind::Scene => self.framebuffers[image_index],
            TargetKind::ShadowDepth => self.framebuffers[0],
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// View of the depth attachment. For the shadow target this is the map
    /// the scene pass samples.
    pub fn depth_view(&self, index: usize) -> vk::ImageView {
        match self.kind {
            TargetKind::Scene => self.depth_images[index].view(),
            TargetKind::ShadowDepth => self.depth_images[0].view(),
        }
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                ctx.device().destroy_framebuffer(framebuffer, None);
            }
            for mut image in self.depth_images.drain(..) {
                image.destroy(ctx);
            }
            self.cleanup_old(ctx);
            if self.render_pass != vk::RenderPass::null() {
                ctx.device().destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
        }
    }
}

fn create_scene_render_pass(
    ctx: &DeviceContext,
    color_format: vk::Format,
) -> RenderResult<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            // The overlay pass runs after this one and transitions to
            // PRESENT_SRC itself.
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: DEPTH_FORMAT,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];

    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };

    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };

    let render_pass_info = vk::RenderPassCreateInfo {
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };

    unsafe {
        ctx.device()
            .create_render_pass(&render_pass_info, None)
            .map_err(RenderError::RenderPassCreationFailed)
    }
}

fn create_shadow_render_pass(ctx: &DeviceContext) -> RenderResult<vk::RenderPass> {
    let attachment = vk::AttachmentDescription {
        format: DEPTH_FORMAT,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        // Leaves the map ready for sampling without a manual barrier.
        final_layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ..Default::default()
    };

    let depth_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 0,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };

    let dependencies = [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access_mask: vk::AccessFlags::SHADER_READ,
            dst_stage_mask: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            dst_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::BY_REGION,
            ..Default::default()
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
            dst_access_mask: vk::AccessFlags::SHADER_READ,
            dependency_flags: vk::DependencyFlags::BY_REGION,
            ..Default::default()
        },
    ];

    let render_pass_info = vk::RenderPassCreateInfo {
        attachment_count: 1,
        p_attachments: &attachment,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: dependencies.len() as u32,
        p_dependencies: dependencies.as_ptr(),
        ..Default::default()
    };

    unsafe {
        ctx.device()
            .create_render_pass(&render_pass_info, None)
            .map_err(RenderError::RenderPassCreationFailed)
    }
}

fn create_scene_framebuffers(
    ctx: &DeviceContext,
    render_pass: vk::RenderPass,
    swapchain: &Swapchain,
) -> RenderResult<(Vec<vk::Framebuffer>, Vec<AllocatedImage>)> {
    let extent = swapchain.extent();
    let mut framebuffers = Vec::with_capacity(swapchain.num_images());
    let mut depth_images = Vec::with_capacity(swapchain.num_images());

    for index in 0..swapchain.num_images() {
        let depth = AllocatedImage::new_depth(ctx, extent, DEPTH_FORMAT, false, "scene depth")?;
        let attachments = [swapchain.image_view(index), depth.view()];
        let framebuffer_info = vk::FramebufferCreateInfo {
            render_pass,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        let framebuffer = unsafe {
            ctx.device()
                .create_framebuffer(&framebuffer_info, None)
                .map_err(RenderError::FramebufferCreationFailed)?
        };
        framebuffers.push(framebuffer);
        depth_images.push(depth);
    }

    Ok((framebuffers, depth_images))
}

fn create_shadow_framebuffer(
    ctx: &DeviceContext,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> RenderResult<(Vec<vk::Framebuffer>, Vec<AllocatedImage>)> {
    let depth = AllocatedImage::new_depth(ctx, extent, DEPTH_FORMAT, true, "shadow map")?;
    let attachments = [depth.view()];
    let framebuffer_info = vk::FramebufferCreateInfo {
        render_pass,
        attachment_count: 1,
        p_attachments: attachments.as_ptr(),
        width: extent.width,
        height: extent.height,
        layers: 1,
        ..Default::default()
    };
    let framebuffer = unsafe {
        ctx.device()
            .create_framebuffer(&framebuffer_info, None)
            .map_err(RenderError::FramebufferCreationFailed)?
    };
    Ok((vec![framebuffer], vec![depth]))
}

/// Sampler used to read the shadow map with hardware depth comparison.
pub fn create_shadow_sampler(ctx: &DeviceContext) -> RenderResult<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo {
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::NEAREST,
        address_mode_u: vk::SamplerAddressMode::CLAMP_TO_BORDER,
        address_mode_v: vk::SamplerAddressMode::CLAMP_TO_BORDER,
        address_mode_w: vk::SamplerAddressMode::CLAMP_TO_BORDER,
        border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
        compare_enable: vk::TRUE,
        compare_op: vk::CompareOp::LESS_OR_EQUAL,
        ..Default::default()
    };
    unsafe {
        ctx.device()
            .create_sampler(&sampler_info, None)
            .map_err(|e| RenderError::ImageCreationFailed(e.to_string()))
    }
}
