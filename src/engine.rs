//! The frame orchestrator.
//!
//! Owns every GPU resource and drives the per-frame protocol: wait on the
//! slot fence, acquire, gate the image, update per-frame data, record, submit
//! compute then graphics, present, advance. Any stale-surface report routes
//! through exactly one recreate cascade, which rebuilds the dependent
//! resources in dependency order and ends by destroying the retired
//! swapchain generation.

use crate::buffer::UniformRing;
use crate::commands::{CommandPool, CommandSequence};
use crate::context::{DebugOptions, DeviceContext};
use crate::descriptor::{BindingSets, DescriptorLayouts};
use crate::error::{RenderError, RenderResult};
use crate::frame::{AcquireOutcome, FrameProtocol, FrameStep, PresentOutcome};
use crate::overlay::{EguiOverlay, OverlayState};
use crate::particles::{ParticleSystem, DEFAULT_PARTICLE_COUNT};
use crate::passes::{self, DrawItem};
use crate::pipeline::{ComputePipeline, Pipeline, PipelineKind};
use crate::render_target::{self, RenderTarget};
use crate::resources::{self, Mesh, PushConstants};
use crate::scene::{FrameUniform, SceneState};
use crate::swapchain::Swapchain;
use crate::sync::{ComputeGraphicsSync, SyncSet, MAX_FRAMES_IN_FLIGHT};
use crate::window::Window;
use ash::vk;
use glam::{Mat4, Vec3, Vec4};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub particle_count: u32,
    pub debug: DebugOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            vsync: true,
            particle_count: DEFAULT_PARTICLE_COUNT,
            debug: DebugOptions::default(),
        }
    }
}

pub struct Engine {
    swapchain: Swapchain,
    scene_target: RenderTarget,
    shadow_target: RenderTarget,
    shadow_sampler: vk::Sampler,
    layouts: DescriptorLayouts,
    binding_sets: BindingSets,
    scene_pipeline: Pipeline,
    shadow_pipeline: Pipeline,
    particle_pipeline: Pipeline,
    force_pipeline: ComputePipeline,
    integrate_pipeline: ComputePipeline,
    graphics_pool: CommandPool,
    compute_pool: CommandPool,
    transfer_pool: CommandPool,
    graphics_cmds: CommandSequence,
    compute_cmds: CommandSequence,
    sync: SyncSet,
    compute_sync: ComputeGraphicsSync,
    protocol: FrameProtocol,
    uniforms: UniformRing,
    particles: ParticleSystem,
    floor: Mesh,
    cube: Mesh,
    scene: SceneState,
    overlay: EguiOverlay,
    overlay_state: OverlayState,
    last_frame: Instant,
    // Declared last so every component above can be destroyed against it
    // before it drops.
    ctx: DeviceContext,
}

impl Engine {
    pub fn new(window: &Window, config: &EngineConfig) -> RenderResult<Self> {
        let ctx = DeviceContext::new(window.window(), config.debug)?;
        let (width, height) = window.framebuffer_size();

        let swapchain = Swapchain::new(&ctx, width, height, config.vsync)?;
        let image_count = swapchain.num_images();

        let scene_target = RenderTarget::new_scene(&ctx, &swapchain)?;
        let shadow_target = RenderTarget::new_shadow(&ctx)?;
        let shadow_sampler = render_target::create_shadow_sampler(&ctx)?;

        let layouts = DescriptorLayouts::new(&ctx)?;
        let binding_sets = BindingSets::new(&ctx, &layouts, image_count)?;

        let scene_pipeline = Pipeline::new(
            &ctx,
            PipelineKind::Scene,
            layouts.graphics(),
            scene_target.render_pass(),
        )?;
        let shadow_pipeline = Pipeline::new(
            &ctx,
            PipelineKind::Shadow,
            layouts.graphics(),
            shadow_target.render_pass(),
        )?;
        let particle_pipeline = Pipeline::new(
            &ctx,
            PipelineKind::Particle,
            layouts.graphics(),
            scene_target.render_pass(),
        )?;
        let force_pipeline = ComputePipeline::new(&ctx, layouts.compute(), "cs_force")?;
        let integrate_pipeline = ComputePipeline::new(&ctx, layouts.compute(), "cs_integrate")?;

        let families = ctx.families();
        let graphics_pool = CommandPool::new(&ctx, families.graphics)?;
        let compute_pool = CommandPool::new(&ctx, families.compute)?;
        let transfer_pool = CommandPool::new(&ctx, families.transfer)?;

        let graphics_cmds = CommandSequence::allocate(&ctx, &graphics_pool, image_count)?;
        let compute_cmds = CommandSequence::allocate(&ctx, &compute_pool, MAX_FRAMES_IN_FLIGHT)?;

        let sync = SyncSet::new(&ctx, image_count)?;
        let compute_sync = ComputeGraphicsSync::new(&ctx)?;

        let uniforms = UniformRing::new(&ctx, image_count, FrameUniform::SIZE, "frame uniforms")?;
        let particles = ParticleSystem::new(&ctx, &transfer_pool, config.particle_count)?;

        let (floor_vertices, floor_indices) = resources::plane_mesh_data(10.0);
        let floor = Mesh::new(&ctx, &transfer_pool, &floor_vertices, &floor_indices, "floor")?;
        let (cube_vertices, cube_indices) = resources::cube_mesh_data(0.75);
        let cube = Mesh::new(&ctx, &transfer_pool, &cube_vertices, &cube_indices, "cube")?;

        for index in 0..image_count {
            binding_sets.write_graphics(
                &ctx,
                index,
                &uniforms,
                shadow_target.depth_view(0),
                shadow_sampler,
            );
        }
        binding_sets.write_compute(
            &ctx,
            particles.storage_buffer(),
            particles.storage_size(),
            particles.sim_uniform_buffer(),
            particles.sim_uniform_size(),
        );

        let overlay = EguiOverlay::new(&ctx, window.window(), &swapchain)?;

        log::info!(
            "Engine ready: {} swapchain images, {} particles",
            image_count,
            config.particle_count
        );

        Ok(Self {
            swapchain,
            scene_target,
            shadow_target,
            shadow_sampler,
            layouts,
            binding_sets,
            scene_pipeline,
            shadow_pipeline,
            particle_pipeline,
            force_pipeline,
            integrate_pipeline,
            graphics_pool,
            compute_pool,
            transfer_pool,
            graphics_cmds,
            compute_cmds,
            sync,
            compute_sync,
            protocol: FrameProtocol::new(MAX_FRAMES_IN_FLIGHT),
            uniforms,
            particles,
            floor,
            cube,
            scene: SceneState::new(),
            overlay,
            overlay_state: OverlayState::default(),
            last_frame: Instant::now(),
            ctx,
        })
    }

    /// Forward a window event to the overlay. Returns true when consumed.
    pub fn on_window_event(
        &mut self,
        window: &winit::window::Window,
        event: &winit::event::WindowEvent,
    ) -> bool {
        self.overlay.on_window_event(window, event)
    }

    /// Render one frame, or run the recreate cascade when the surface is
    /// stale. Returns only fatal errors.
    pub fn draw_frame(&mut self, window: &mut Window) -> RenderResult<()> {
        if window.was_resized() {
            self.protocol.note_resize();
            window.clear_resize_flag();
        }

        let (width, height) = window.framebuffer_size();
        match self.protocol.begin(window.is_zero_sized()) {
            FrameStep::SkipZeroSized => return Ok(()),
            FrameStep::Recreate => return self.recreate_surface(width, height),
            FrameStep::Proceed => {}
        }

        self.sync.wait_current(&self.ctx)?;

        let (image_index, suboptimal) =
            match self.swapchain.acquire_next(self.sync.current().image_available) {
                Ok(pair) => pair,
                Err(RenderError::SurfaceStale) => {
                    self.protocol.on_acquire(AcquireOutcome::OutOfDate);
                    return self.recreate_surface(width, height);
                }
                Err(e) => return Err(e),
            };
        self.protocol.on_acquire(AcquireOutcome::Success {
            image_index,
            suboptimal,
        });
        let image_index = image_index as usize;

        self.sync.gate_image(&self.ctx, image_index)?;

        let delta_time = self.advance_time();
        self.scene.advance(delta_time);
        let aspect = width as f32 / height.max(1) as f32;
        let uniform = self.scene.frame_uniform(aspect);
        self.uniforms.write(image_index, bytemuck::bytes_of(&uniform));

        self.particles
            .set_paused(self.overlay_state.particles_paused);
        self.particles.update_params(delta_time, self.scene.elapsed);

        self.overlay_state.frame_counter = self.protocol.frame_counter();
        self.overlay_state.surface_generation = self.protocol.surface_generation();
        self.overlay.run(window.window(), &mut self.overlay_state);

        self.record_compute()?;
        self.record_graphics(image_index)?;
        self.protocol.on_recorded();

        self.submit_compute()?;
        self.submit_graphics(image_index)?;
        self.protocol.on_submitted();

        let stale = self.swapchain.present(
            self.ctx.present_queue(),
            image_index as u32,
            self.sync.current().render_finished,
        )?;
        self.sync.advance();
        let step = self.protocol.on_presented(if stale {
            PresentOutcome::OutOfDate
        } else {
            PresentOutcome::Success
        });

        if self.protocol.frame_counter() % 120 == 0 {
            log::debug!(
                "frame {} (surface generation {}, {:.1} fps)",
                self.protocol.frame_counter(),
                self.protocol.surface_generation(),
                self.overlay_state.fps
            );
        }

        if step == FrameStep::Recreate {
            self.recreate_surface(width, height)?;
        }
        Ok(())
    }

    fn advance_time(&mut self) -> f32 {
        let now = Instant::now();
        let delta = now.duration_since(self.last_frame).as_secs_f32().min(0.1);
        self.last_frame = now;
        if delta > 0.0 {
            let instantaneous = 1.0 / delta;
            self.overlay_state.fps = if self.overlay_state.fps == 0.0 {
                instantaneous
            } else {
                self.overlay_state.fps * 0.95 + instantaneous * 0.05
            };
        }
        delta
    }

    fn draw_items(&self) -> [DrawItem<'_>; 3] {
        let spin = Mat4::from_rotation_y(self.scene.elapsed * 0.8);
        [
            DrawItem {
                mesh: &self.floor,
                push: PushConstants {
                    model: Mat4::IDENTITY,
                    base_color: Vec4::new(0.55, 0.55, 0.58, 1.0),
                },
            },
            DrawItem {
                mesh: &self.cube,
                push: PushConstants {
                    model: Mat4::from_translation(Vec3::new(-1.8, 0.75, 0.0)) * spin,
                    base_color: Vec4::new(0.8, 0.25, 0.2, 1.0),
                },
            },
            DrawItem {
                mesh: &self.cube,
                push: PushConstants {
                    model: Mat4::from_translation(Vec3::new(1.6, 1.1, 1.2))
                        * Mat4::from_scale(Vec3::splat(1.4)),
                    base_color: Vec4::new(0.2, 0.45, 0.85, 1.0),
                },
            },
        ]
    }

    fn record_compute(&mut self) -> RenderResult<()> {
        let slot = self.sync.current_slot();
        let cmd = self.compute_cmds.begin(&self.ctx, slot)?;
        self.particles.record_compute(
            &self.ctx,
            cmd,
            self.force_pipeline.handle(),
            self.integrate_pipeline.handle(),
            self.force_pipeline.layout(),
            self.binding_sets.compute_set(),
        );
        self.compute_cmds.end(&self.ctx, slot)
    }

    fn record_graphics(&mut self, image_index: usize) -> RenderResult<()> {
        let cmd = self.graphics_cmds.begin(&self.ctx, image_index)?;
        let items = self.draw_items();
        let set = self.binding_sets.graphics_set(image_index);

        passes::record_shadow_pass(
            &self.ctx,
            cmd,
            &self.shadow_target,
            &self.shadow_pipeline,
            set,
            &items,
            self.overlay_state.depth_bias,
        );
        passes::record_scene_pass(
            &self.ctx,
            cmd,
            &self.scene_target,
            image_index,
            &self.scene_pipeline,
            &self.particle_pipeline,
            set,
            &items,
            &self.particles,
        );
        self.overlay.record(
            &self.ctx,
            cmd,
            image_index,
            self.swapchain.extent(),
            &self.graphics_pool,
        )?;

        self.graphics_cmds.end(&self.ctx, image_index)
    }

    /// Submit the simulation step. Waits for the previous graphics pass to
    /// finish reading particle positions before overwriting them.
    fn submit_compute(&self) -> RenderResult<()> {
        let slot = self.sync.current_slot();
        let cmd = self.compute_cmds.buffer(slot);
        let wait_stage = vk::PipelineStageFlags::COMPUTE_SHADER;
        let submit = vk::SubmitInfo {
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.compute_sync.graphics_finished,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &self.compute_sync.compute_finished,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device()
                .queue_submit(self.ctx.compute_queue(), &[submit], vk::Fence::null())
                .map_err(RenderError::SubmitFailed)
        }
    }

    /// Submit the graphics work. The fence is reset here, after the compute
    /// submission succeeded, so no early-out can leave it unsignalable.
    fn submit_graphics(&self, image_index: usize) -> RenderResult<()> {
        let cmd = self.graphics_cmds.buffer(image_index);
        let current = self.sync.current();

        let wait_semaphores = [current.image_available, self.compute_sync.compute_finished];
        let wait_stages = [
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::VERTEX_INPUT,
        ];
        let signal_semaphores = [current.render_finished, self.compute_sync.graphics_finished];

        self.sync.reset_current(&self.ctx)?;

        let submit = vk::SubmitInfo {
            wait_semaphore_count: wait_semaphores.len() as u32,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: signal_semaphores.len() as u32,
            p_signal_semaphores: signal_semaphores.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device()
                .queue_submit(self.ctx.graphics_queue(), &[submit], current.in_flight)
                .map_err(RenderError::SubmitFailed)
        }
    }

    /// The recreate cascade, in dependency order: swapchain, render targets,
    /// pipelines, uniforms, binding sets, command sequences, overlay. Ends by
    /// destroying retired generations; the device is idle throughout.
    fn recreate_surface(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            // No drawable area; frames skip until the window regains one.
            self.protocol.defer_recreate();
            return Ok(());
        }

        log::info!("Recreating surface at {}x{}", width, height);
        self.ctx.wait_idle()?;

        self.swapchain.recreate(&self.ctx, width, height)?;
        let image_count = self.swapchain.num_images();

        self.scene_target.recreate(&self.ctx, &self.swapchain)?;
        self.shadow_target.recreate(&self.ctx, &self.swapchain)?;

        self.scene_pipeline
            .recreate(&self.ctx, self.scene_target.render_pass())?;
        self.shadow_pipeline
            .recreate(&self.ctx, self.shadow_target.render_pass())?;
        self.particle_pipeline
            .recreate(&self.ctx, self.scene_target.render_pass())?;

        self.uniforms
            .recreate(&self.ctx, image_count, "frame uniforms")?;

        self.binding_sets
            .recreate(&self.ctx, &self.layouts, image_count)?;
        for index in 0..image_count {
            self.binding_sets.write_graphics(
                &self.ctx,
                index,
                &self.uniforms,
                self.shadow_target.depth_view(0),
                self.shadow_sampler,
            );
        }
        self.binding_sets.write_compute(
            &self.ctx,
            self.particles.storage_buffer(),
            self.particles.storage_size(),
            self.particles.sim_uniform_buffer(),
            self.particles.sim_uniform_size(),
        );

        self.graphics_cmds
            .recreate(&self.ctx, &self.graphics_pool, image_count)?;
        self.sync.reset_image_table(image_count);

        self.overlay.recreate(&self.ctx, &self.swapchain)?;

        // Device-idle since the top of the cascade; retired handles are safe
        // to destroy now.
        self.swapchain.cleanup_old(&self.ctx);
        self.scene_target.cleanup_old(&self.ctx);
        self.shadow_target.cleanup_old(&self.ctx);

        self.protocol.on_recreated();

        // Every dependent component must have followed the surface to the
        // same generation; a mismatch means a stale handle survived.
        let generation = self.swapchain.generation();
        debug_assert_eq!(generation, self.protocol.surface_generation());
        debug_assert_eq!(generation, self.scene_target.generation());
        debug_assert_eq!(generation, self.shadow_target.generation());
        debug_assert_eq!(generation, self.scene_pipeline.generation());
        debug_assert_eq!(generation, self.shadow_pipeline.generation());
        debug_assert_eq!(generation, self.particle_pipeline.generation());
        debug_assert_eq!(generation, self.binding_sets.generation());
        // Per-image resources must have followed a changed image count too.
        debug_assert_eq!(self.graphics_cmds.count(), image_count);
        debug_assert_eq!(self.uniforms.count(), image_count);
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.ctx.wait_idle();
        let ctx = &self.ctx;

        self.overlay.destroy(ctx);
        self.floor.destroy(ctx);
        self.cube.destroy(ctx);
        self.particles.destroy(ctx);
        self.uniforms.destroy(ctx);
        self.compute_sync.destroy(ctx);
        self.sync.destroy(ctx);
        self.graphics_cmds.free(ctx, &self.graphics_pool);
        self.compute_cmds.free(ctx, &self.compute_pool);
        self.graphics_pool.destroy(ctx);
        self.compute_pool.destroy(ctx);
        self.transfer_pool.destroy(ctx);
        self.force_pipeline.destroy(ctx);
        self.integrate_pipeline.destroy(ctx);
        self.scene_pipeline.destroy(ctx);
        self.shadow_pipeline.destroy(ctx);
        self.particle_pipeline.destroy(ctx);
        self.binding_sets.destroy(ctx);
        self.layouts.destroy(ctx);
        unsafe {
            ctx.device().destroy_sampler(self.shadow_sampler, None);
        }
        self.scene_target.destroy(ctx);
        self.shadow_target.destroy(ctx);
        self.swapchain.destroy(ctx);
        // DeviceContext drops last by field order.
    }
}
