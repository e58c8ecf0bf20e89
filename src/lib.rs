//! Real-time Vulkan renderer demonstrating shadow mapping and a GPU-driven
//! particle simulation.
//!
//! The interesting part is not the rendering itself but the resource
//! lifecycle around it: the swapchain sits at the root of a dependency chain
//! (render targets, pipelines, binding sets, command sequences) that must be
//! rebuilt in order whenever the presentation surface goes stale, while up to
//! two frames remain in flight.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod frame;
pub mod overlay;
pub mod particles;
pub mod passes;
pub mod pipeline;
pub mod render_target;
pub mod resources;
pub mod scene;
pub mod shaders;
pub mod swapchain;
pub mod sync;
pub mod window;

pub use context::{DebugOptions, ValidationMode};
pub use engine::{Engine, EngineConfig};
pub use error::{RenderError, RenderResult};
