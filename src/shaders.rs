//! WGSL shader sources and runtime SPIR-V compilation through naga.

use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use ash::vk;

pub const SCENE_WGSL: &str = include_str!("shaders/scene.wgsl");
pub const SHADOW_WGSL: &str = include_str!("shaders/shadow.wgsl");
pub const PARTICLES_DRAW_WGSL: &str = include_str!("shaders/particles_draw.wgsl");
pub const PARTICLES_SIM_WGSL: &str = include_str!("shaders/particles_sim.wgsl");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// Compile one entry point of a WGSL source to SPIR-V.
pub fn compile_wgsl(source: &str, stage: ShaderStage, entry_point: &str) -> RenderResult<Vec<u32>> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| RenderError::ShaderCompilationFailed(format!("WGSL parse error: {e}")))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator
        .validate(&module)
        .map_err(|e| RenderError::ShaderCompilationFailed(format!("Validation error: {e}")))?;

    let naga_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
        ShaderStage::Compute => naga::ShaderStage::Compute,
    };

    module
        .entry_points
        .iter()
        .position(|ep| ep.name == entry_point && ep.stage == naga_stage)
        .ok_or_else(|| {
            RenderError::ShaderCompilationFailed(format!(
                "Entry point '{}' not found for stage {:?}",
                entry_point, stage
            ))
        })?;

    let options = naga::back::spv::Options {
        lang_version: (1, 3),
        flags: naga::back::spv::WriterFlags::empty(),
        capabilities: None,
        bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
        binding_map: Default::default(),
        debug_info: None,
        zero_initialize_workgroup_memory: naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
    };
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: naga_stage,
        entry_point: entry_point.to_string(),
    };

    naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| RenderError::ShaderCompilationFailed(format!("SPIR-V generation error: {e}")))
}

/// Compile and wrap into a Vulkan shader module.
pub fn create_shader_module(
    ctx: &DeviceContext,
    source: &str,
    stage: ShaderStage,
    entry_point: &str,
) -> RenderResult<vk::ShaderModule> {
    let spv = compile_wgsl(source, stage, entry_point)?;
    let create_info = vk::ShaderModuleCreateInfo {
        code_size: spv.len() * std::mem::size_of::<u32>(),
        p_code: spv.as_ptr(),
        ..Default::default()
    };
    unsafe {
        ctx.device()
            .create_shader_module(&create_info, None)
            .map_err(|e| {
                RenderError::ShaderCompilationFailed(format!(
                    "Failed to create shader module: {e:?}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_shader_compiles_for_both_stages() {
        assert!(compile_wgsl(SCENE_WGSL, ShaderStage::Vertex, "vs_main").is_ok());
        assert!(compile_wgsl(SCENE_WGSL, ShaderStage::Fragment, "fs_main").is_ok());
    }

    #[test]
    fn shadow_shader_is_vertex_only() {
        assert!(compile_wgsl(SHADOW_WGSL, ShaderStage::Vertex, "vs_main").is_ok());
        assert!(compile_wgsl(SHADOW_WGSL, ShaderStage::Fragment, "fs_main").is_err());
    }

    #[test]
    fn simulation_shader_has_both_compute_entry_points() {
        assert!(compile_wgsl(PARTICLES_SIM_WGSL, ShaderStage::Compute, "cs_force").is_ok());
        assert!(compile_wgsl(PARTICLES_SIM_WGSL, ShaderStage::Compute, "cs_integrate").is_ok());
    }

    #[test]
    fn unknown_entry_point_is_rejected() {
        let err = compile_wgsl(SCENE_WGSL, ShaderStage::Vertex, "nope").unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompilationFailed(_)));
    }

    #[test]
    fn particle_draw_shader_compiles() {
        assert!(compile_wgsl(PARTICLES_DRAW_WGSL, ShaderStage::Vertex, "vs_main").is_ok());
        assert!(compile_wgsl(PARTICLES_DRAW_WGSL, ShaderStage::Fragment, "fs_main").is_ok());
    }
}
