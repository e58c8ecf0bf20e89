//! Engine error taxonomy.
//!
//! Errors split into two families: recoverable surface conditions that the
//! frame orchestrator answers with a recreate cascade, and fatal resource
//! errors that unwind to the entry point.

use ash::vk;
use thiserror::Error;

/// Engine error type.
///
/// `SurfaceStale` is the only recoverable variant: the presentation surface
/// no longer matches the window and the recreate cascade must run before the
/// next frame. Everything else indicates a misconfiguration or missing
/// capability that will not change within the process lifetime.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The surface is out of date or suboptimal; run the recreate cascade
    /// and retry the frame. Never fatal.
    #[error("presentation surface is stale and must be recreated")]
    SurfaceStale,

    #[error("failed to initialize Vulkan: {0}")]
    InitializationFailed(String),
    #[error("failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("no suitable physical device: {0}")]
    NoSuitableDevice(String),
    #[error("failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("failed to acquire next image: {0}")]
    AcquireImageFailed(vk::Result),
    #[error("failed to present: {0}")]
    PresentFailed(vk::Result),
    #[error("failed to allocate memory: {0}")]
    AllocationFailed(String),
    #[error("failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("failed to create image: {0}")]
    ImageCreationFailed(String),
    #[error("failed to create render pass: {0}")]
    RenderPassCreationFailed(vk::Result),
    #[error("failed to create framebuffer: {0}")]
    FramebufferCreationFailed(vk::Result),
    #[error("failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("failed to compile shader: {0}")]
    ShaderCompilationFailed(String),
    #[error("failed to create descriptor pool or sets: {0}")]
    DescriptorCreationFailed(vk::Result),
    #[error("failed to allocate command buffers: {0}")]
    CommandBufferCreationFailed(vk::Result),
    #[error("failed to create synchronization object: {0}")]
    SyncCreationFailed(vk::Result),
    #[error("queue submission failed: {0}")]
    SubmitFailed(vk::Result),
    #[error("device wait failed: {0}")]
    DeviceWaitFailed(vk::Result),
    #[error("overlay error: {0}")]
    OverlayFailed(String),
}

impl RenderError {
    /// True for conditions answered by the recreate cascade rather than
    /// propagated as failures.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::SurfaceStale)
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_stale_is_the_only_recoverable_variant() {
        assert!(RenderError::SurfaceStale.is_recoverable());
        assert!(!RenderError::InitializationFailed("x".into()).is_recoverable());
        assert!(!RenderError::AcquireImageFailed(vk::Result::ERROR_DEVICE_LOST).is_recoverable());
        assert!(!RenderError::SyncCreationFailed(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
            .is_recoverable());
    }
}
