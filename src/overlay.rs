//! egui overlay rendered in its own pass after the scene.
//!
//! The overlay pass loads the scene's color output and performs the final
//! transition to PRESENT_SRC, so the scene render pass never needs to know
//! whether an overlay exists. The renderer and its allocator borrow device
//! handles; `destroy` must run before the device context is dropped.

use crate::commands::CommandPool;
use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use crate::particles;
use crate::passes::DepthBias;
use crate::swapchain::Swapchain;
use ash::vk;
use egui_ash_renderer::{Options, Renderer};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use std::sync::{Arc, Mutex};
use winit::event::WindowEvent;
use winit::window::Window;

/// State edited through the overlay each frame.
pub struct OverlayState {
    pub depth_bias: DepthBias,
    pub particles_paused: bool,
    pub frame_counter: u64,
    pub surface_generation: u64,
    pub fps: f32,
}

impl Default for OverlayState {
    fn default() -> Self {
        Self {
            depth_bias: DepthBias::default(),
            particles_paused: false,
            frame_counter: 0,
            surface_generation: 0,
            fps: 0.0,
        }
    }
}

pub struct EguiOverlay {
    egui_ctx: egui::Context,
    winit_state: egui_winit::State,
    renderer: Option<Renderer>,
    allocator: Option<Arc<Mutex<Allocator>>>,
    paint_jobs: Vec<egui::ClippedPrimitive>,
    textures_delta: egui::TexturesDelta,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

impl EguiOverlay {
    pub fn new(
        ctx: &DeviceContext,
        window: &Window,
        swapchain: &Swapchain,
    ) -> RenderResult<Self> {
        let egui_ctx = egui::Context::default();
        let winit_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
        );

        let render_pass = create_overlay_render_pass(ctx, swapchain.format())?;
        let framebuffers = create_overlay_framebuffers(ctx, render_pass, swapchain)?;

        // egui-ash-renderer wants its own allocator behind a std mutex.
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: ctx.instance().clone(),
            device: ctx.device().clone(),
            physical_device: ctx.physical_device(),
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| RenderError::OverlayFailed(e.to_string()))?;
        let allocator = Arc::new(Mutex::new(allocator));

        let renderer = Renderer::with_gpu_allocator(
            allocator.clone(),
            ctx.device().clone(),
            render_pass,
            Options {
                srgb_framebuffer: true,
                ..Default::default()
            },
        )
        .map_err(|e| RenderError::OverlayFailed(e.to_string()))?;

        Ok(Self {
            egui_ctx,
            winit_state,
            renderer: Some(renderer),
            allocator: Some(allocator),
            paint_jobs: Vec::new(),
            textures_delta: egui::TexturesDelta::default(),
            render_pass,
            framebuffers,
        })
    }

    /// Forward a window event; returns true when egui consumed it.
    pub fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.winit_state.on_window_event(window, event).consumed
    }

    /// Run the UI for this frame and cache its paint data.
    pub fn run(&mut self, window: &Window, state: &mut OverlayState) {
        let raw_input = self.winit_state.take_egui_input(window);
        self.egui_ctx.begin_frame(raw_input);

        egui::Window::new("Engine")
            .default_width(240.0)
            .show(&self.egui_ctx, |ui| {
                ui.label(format!("fps: {:.1}", state.fps));
                ui.label(format!("frame: {}", state.frame_counter));
                ui.label(format!("surface generation: {}", state.surface_generation));
                ui.separator();
                ui.label("shadow depth bias");
                ui.add(
                    egui::Slider::new(&mut state.depth_bias.constant, 0.0..=4.0).text("constant"),
                );
                ui.add(egui::Slider::new(&mut state.depth_bias.slope, 0.0..=4.0).text("slope"));
                ui.separator();
                ui.checkbox(&mut state.particles_paused, "pause particles");
                ui.label(format!("{} particles", particles::DEFAULT_PARTICLE_COUNT));
            });

        let full_output = self.egui_ctx.end_frame();
        self.winit_state
            .handle_platform_output(window, full_output.platform_output);
        self.paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        self.textures_delta = full_output.textures_delta;
    }

    /// Record the overlay pass into `cmd` for one swapchain image.
    pub fn record(
        &mut self,
        ctx: &DeviceContext,
        cmd: vk::CommandBuffer,
        image_index: usize,
        extent: vk::Extent2D,
        graphics_pool: &CommandPool,
    ) -> RenderResult<()> {
        let begin_info = vk::RenderPassBeginInfo {
            render_pass: self.render_pass,
            framebuffer: self.framebuffers[image_index],
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            ..Default::default()
        };

        unsafe {
            ctx.device()
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }

        if let Some(renderer) = self.renderer.as_mut() {
            let set: Vec<_> = self.textures_delta.set.drain(..).collect();
            renderer
                .set_textures(ctx.graphics_queue(), graphics_pool.handle(), &set)
                .map_err(|e| RenderError::OverlayFailed(e.to_string()))?;
            renderer
                .cmd_draw(cmd, extent, self.egui_ctx.pixels_per_point(), &self.paint_jobs)
                .map_err(|e| RenderError::OverlayFailed(e.to_string()))?;
        }

        unsafe {
            ctx.device().cmd_end_render_pass(cmd);
        }

        if let Some(renderer) = self.renderer.as_mut() {
            let free: Vec<_> = self.textures_delta.free.drain(..).collect();
            renderer
                .free_textures(&free)
                .map_err(|e| RenderError::OverlayFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Rebuild against a recreated swapchain. Runs last in the cascade.
    pub fn recreate(&mut self, ctx: &DeviceContext, swapchain: &Swapchain) -> RenderResult<()> {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                ctx.device().destroy_framebuffer(framebuffer, None);
            }
            ctx.device().destroy_render_pass(self.render_pass, None);
        }
        self.render_pass = create_overlay_render_pass(ctx, swapchain.format())?;
        self.framebuffers = create_overlay_framebuffers(ctx, self.render_pass, swapchain)?;
        if let Some(renderer) = self.renderer.as_mut() {
            renderer
                .set_render_pass(self.render_pass)
                .map_err(|e| RenderError::OverlayFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Release GPU resources while the device is still alive.
    pub fn destroy(&mut self, ctx: &DeviceContext) {
        let _ = ctx.wait_idle();
        // Renderer before allocator; it holds allocations.
        self.renderer = None;
        self.allocator = None;
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                ctx.device().destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                ctx.device().destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
        }
    }
}

fn create_overlay_render_pass(
    ctx: &DeviceContext,
    format: vk::Format,
) -> RenderResult<vk::RenderPass> {
    let attachment = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::LOAD,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        ..Default::default()
    };
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let render_pass_info = vk::RenderPassCreateInfo {
        attachment_count: 1,
        p_attachments: &attachment,
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

fn create_overlay_framebuffers(
    ctx: &DeviceContext,
    render_pass: vk::RenderPass,
    swapchain: &Swapchain,
) -> RenderResult<Vec<vk::Framebuffer>> {
    let extent = swapchain.extent();
    (0..swapchain.num_images())
        .map(|index| {
            let view = swapchain.image_view(index);
            let framebuffer_info = vk::FramebufferCreateInfo {
                render_pass,
                attachment_count: 1,
                p_attachments: &view,
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            unsafe {
                ctx.device()
                    .create_framebuffer(&framebuffer_info, None)
                    .map_err(RenderError::FramebufferCreationFailed)
            }
        })
        .collect()
}
