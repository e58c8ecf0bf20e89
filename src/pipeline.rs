//! Graphics and compute pipeline construction.
//!
//! Graphics pipelines come in three closed variants built by one constructor,
//! so the state differences between them live in a single match instead of
//! three divergent builders. Viewport and scissor are dynamic; the shadow
//! variant also makes depth bias dynamic so the UI can tune it without a
//! pipeline rebuild.

use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use crate::particles;
use crate::resources::{PushConstants, Vertex};
use crate::shaders::{self, ShaderStage};
use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// Lit scene geometry into the swapchain target.
    Scene,
    /// Depth-only pass into the shadow map, with dynamic depth bias.
    Shadow,
    /// Particle points into the swapchain target.
    Particle,
}

pub struct Pipeline {
    kind: PipelineKind,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    generation: u64,
}

impl Pipeline {
    pub fn new(
        ctx: &DeviceContext,
        kind: PipelineKind,
        set_layout: vk::DescriptorSetLayout,
        render_pass: vk::RenderPass,
    ) -> RenderResult<Self> {
        let layout = create_graphics_layout(ctx, kind, set_layout)?;
        let pipeline = create_graphics_pipeline(ctx, kind, layout, render_pass)?;
        Ok(Self {
            kind,
            pipeline,
            layout,
            generation: 0,
        })
    }

    /// Rebuild against a recreated render pass. The layout is unaffected by
    /// surface changes and survives.
    pub fn recreate(&mut self, ctx: &DeviceContext, render_pass: vk::RenderPass) -> RenderResult<()> {
        unsafe { ctx.device().destroy_pipeline(self.pipeline, None) };
        self.pipeline = create_graphics_pipeline(ctx, self.kind, self.layout, render_pass)?;
        self.generation += 1;
        Ok(())
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                ctx.device().destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                ctx.device().destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
        }
    }
}

/// Compute pipeline for one simulation entry point.
pub struct ComputePipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl ComputePipeline {
    pub fn new(
        ctx: &DeviceContext,
        set_layout: vk::DescriptorSetLayout,
        entry_point: &str,
    ) -> RenderResult<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo {
            set_layout_count: 1,
            p_set_layouts: &set_layout,
            ..Default::default()
        };
        let layout = unsafe {
            ctx.device()
                .create_pipeline_layout(&layout_info, None)
                .map_err(|e| RenderError::PipelineCreationFailed(e.to_string()))?
        };

        let module = shaders::create_shader_module(
            ctx,
            shaders::PARTICLES_SIM_WGSL,
            ShaderStage::Compute,
            entry_point,
        )?;
        let entry = std::ffi::CString::new(entry_point)
            .map_err(|e| RenderError::PipelineCreationFailed(e.to_string()))?;

        let stage = vk::PipelineShaderStageCreateInfo {
            stage: vk::ShaderStageFlags::COMPUTE,
            module,
            p_name: entry.as_ptr(),
            ..Default::default()
        };
        let pipeline_info = vk::ComputePipelineCreateInfo {
            stage,
            layout,
            ..Default::default()
        };

        let result = unsafe {
            ctx.device()
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        unsafe { ctx.device().destroy_shader_module(module, None) };
        let pipeline = result
            .map_err(|(_, e)| RenderError::PipelineCreationFailed(e.to_string()))?[0];

        Ok(Self { pipeline, layout })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                ctx.device().destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                ctx.device().destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
        }
    }
}

fn create_graphics_layout(
    ctx: &DeviceContext,
    kind: PipelineKind,
    set_layout: vk::DescriptorSetLayout,
) -> RenderResult<vk::PipelineLayout> {
    let push_range = vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        offset: 0,
        size: PushConstants::SIZE,
    };
    let uses_push = matches!(kind, PipelineKind::Scene | PipelineKind::Shadow);

    let layout_info = vk::PipelineLayoutCreateInfo {
        set_layout_count: 1,
        p_set_layouts: &set_layout,
        push_constant_range_count: if uses_push { 1 } else { 0 },
        p_push_constant_ranges: if uses_push {
            &push_range
        } else {
            std::ptr::null()
        },
        ..Default::default()
    };
    unsafe {
        ctx.device()
            .create_pipeline_layout(&layout_info, None)
            .map_err(|e| RenderError::PipelineCreationFailed(e.to_string()))
    }
}

fn create_graphics_pipeline(
    ctx: &DeviceContext,
    kind: PipelineKind,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
) -> RenderResult<vk::Pipeline> {
    let (vertex_source, has_fragment) = match kind {
        PipelineKind::Scene => (shaders::SCENE_WGSL, true),
        PipelineKind::Shadow => (shaders::SHADOW_WGSL, false),
        PipelineKind::Particle => (shaders::PARTICLES_DRAW_WGSL, true),
    };

    let vertex_module =
        shaders::create_shader_module(ctx, vertex_source, ShaderStage::Vertex, "vs_main")?;
    let fragment_module = if has_fragment {
        match shaders::create_shader_module(ctx, vertex_source, ShaderStage::Fragment, "fs_main") {
            Ok(module) => Some(module),
            Err(e) => {
                unsafe { ctx.device().destroy_shader_module(vertex_module, None) };
                return Err(e);
            }
        }
    } else {
        None
    };

    let mut stages = vec![vk::PipelineShaderStageCreateInfo {
        stage: vk::ShaderStageFlags::VERTEX,
        module: vertex_module,
        p_name: c"vs_main".as_ptr(),
        ..Default::default()
    }];
    if let Some(module) = fragment_module {
        stages.push(vk::PipelineShaderStageCreateInfo {
            stage: vk::ShaderStageFlags::FRAGMENT,
            module,
            p_name: c"fs_main".as_ptr(),
            ..Default::default()
        });
    }

    let (binding, attributes) = match kind {
        PipelineKind::Scene | PipelineKind::Shadow => (
            Vertex::binding_description(),
            Vertex::attribute_descriptions().to_vec(),
        ),
        PipelineKind::Particle => (
            particles::vertex_binding_description(),
            particles::vertex_attribute_descriptions().to_vec(),
        ),
    };
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
        ..Default::default()
    };

    let topology = match kind {
        PipelineKind::Particle => vk::PrimitiveTopology::POINT_LIST,
        _ => vk::PrimitiveTopology::TRIANGLE_LIST,
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        topology,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    };

    // Viewport and scissor are dynamic; counts still have to be declared.
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };

    let rasterization = vk::PipelineRasterizationStateCreateInfo {
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: match kind {
            PipelineKind::Scene => vk::CullModeFlags::BACK,
            // Front-face culling in the shadow pass trades peter-panning
            // for acne that the depth bias then removes.
            PipelineKind::Shadow => vk::CullModeFlags::FRONT,
            PipelineKind::Particle => vk::CullModeFlags::NONE,
        },
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        depth_bias_enable: if kind == PipelineKind::Shadow {
            vk::TRUE
        } else {
            vk::FALSE
        },
        line_width: 1.0,
        ..Default::default()
    };

    let multisample = vk::PipelineMultisampleStateCreateInfo {
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        depth_test_enable: vk::TRUE,
        depth_write_enable: if kind == PipelineKind::Particle {
            vk::FALSE
        } else {
            vk::TRUE
        },
        depth_compare_op: vk::CompareOp::LESS,
        ..Default::default()
    };

    let color_attachment = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::FALSE,
        color_write_mask: vk::ColorComponentFlags::RGBA,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        attachment_count: if kind == PipelineKind::Shadow { 0 } else { 1 },
        p_attachments: &color_attachment,
        ..Default::default()
    };

    let mut dynamic_states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    if kind == PipelineKind::Shadow {
        dynamic_states.push(vk::DynamicState::DEPTH_BIAS);
    }
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        dynamic_state_count: dynamic_states.len() as u32,
        p_dynamic_states: dynamic_states.as_ptr(),
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &rasterization,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    let result = unsafe {
        ctx.device()
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    unsafe {
        ctx.device().destroy_shader_module(vertex_module, None);
        if let Some(module) = fragment_module {
            ctx.device().destroy_shader_module(module, None);
        }
    }

    let pipelines =
        result.map_err(|(_, e)| RenderError::PipelineCreationFailed(e.to_string()))?;
    Ok(pipelines[0])
}
