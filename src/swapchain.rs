//! Presentation surface (swapchain) lifecycle.
//!
//! The swapchain is the root of the recreate graph. Recreation keeps the
//! previous generation alive as a retired handle so in-flight presents can
//! complete; `cleanup_old` drops it once a device-idle wait has guaranteed no
//! GPU work references it.

use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use ash::khr::swapchain;
use ash::vk;

/// One retired swapchain generation, kept alive until `cleanup_old`.
struct Retired {
    swapchain: vk::SwapchainKHR,
    image_views: Vec<vk::ImageView>,
}

/// The rotating set of presentable images and their views.
pub struct Swapchain {
    swapchain_fn: swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    vsync: bool,
    generation: u64,
    retired: Option<Retired>,
}

impl Swapchain {
    pub fn new(ctx: &DeviceContext, width: u32, height: u32, vsync: bool) -> RenderResult<Self> {
        let swapchain_fn = swapchain::Device::new(ctx.instance(), ctx.device());
        let mut this = Self {
            swapchain_fn,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            vsync,
            generation: 0,
            retired: None,
        };
        this.build(ctx, width, height, vk::SwapchainKHR::null())?;
        Ok(this)
    }

    fn build(
        &mut self,
        ctx: &DeviceContext,
        width: u32,
        height: u32,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<()> {
        unsafe {
            let capabilities = ctx.surface_capabilities()?;

            let formats = ctx
                .surface_fn()
                .get_physical_device_surface_formats(ctx.physical_device(), ctx.surface())
                .map_err(|e| RenderError::SwapchainCreationFailed(e.to_string()))?;
            let present_modes = ctx
                .surface_fn()
                .get_physical_device_surface_present_modes(ctx.physical_device(), ctx.surface())
                .map_err(|e| RenderError::SwapchainCreationFailed(e.to_string()))?;

            if formats.is_empty() || present_modes.is_empty() {
                return Err(RenderError::SwapchainCreationFailed(
                    "surface reports no formats or present modes".into(),
                ));
            }

            let format = choose_surface_format(&formats);
            let present_mode = choose_present_mode(&present_modes, self.vsync);
            let extent = choose_extent(&capabilities, width, height);
            let image_count = choose_image_count(&capabilities);

            let families = ctx.families();
            let family_indices = [families.graphics, families.present];
            let (sharing_mode, family_slice) = if families.graphics != families.present {
                (vk::SharingMode::CONCURRENT, &family_indices[..])
            } else {
                (vk::SharingMode::EXCLUSIVE, &[][..])
            };

            let swapchain_info = vk::SwapchainCreateInfoKHR {
                surface: ctx.surface(),
                min_image_count: image_count,
                image_format: format.format,
                image_color_space: format.color_space,
                image_extent: extent,
                image_array_layers: 1,
                image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                image_sharing_mode: sharing_mode,
                queue_family_index_count: family_slice.len() as u32,
                p_queue_family_indices: family_slice.as_ptr(),
                pre_transform: capabilities.current_transform,
                composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                present_mode,
                clipped: vk::TRUE,
                old_swapchain,
                ..Default::default()
            };

            self.swapchain = self
                .swapchain_fn
                .create_swapchain(&swapchain_info, None)
                .map_err(|e| RenderError::SwapchainCreationFailed(e.to_string()))?;

            self.images = self
                .swapchain_fn
                .get_swapchain_images(self.swapchain)
                .map_err(|e| RenderError::SwapchainCreationFailed(e.to_string()))?;
            self.format = format.format;
            self.extent = extent;

            self.image_views = self
                .images
                .iter()
                .map(|&image| {
                    let view_info = vk::ImageViewCreateInfo {
                        image,
                        view_type: vk::ImageViewType::TYPE_2D,
                        format: format.format,
                        components: vk::ComponentMapping::default(),
                        subresource_range: vk::ImageSubresourceRange {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: 0,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: 1,
                        },
                        ..Default::default()
                    };
                    ctx.device().create_image_view(&view_info, None)
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| RenderError::SwapchainCreationFailed(e.to_string()))?;

            log::info!(
                "Swapchain generation {}: {}x{}, {:?}, {} images",
                self.generation,
                extent.width,
                extent.height,
                self.format,
                self.images.len()
            );

            Ok(())
        }
    }

    /// Acquire the next drawable image, signaling `semaphore` on completion.
    ///
    /// Returns `(image_index, suboptimal)`. An out-of-date surface maps to the
    /// recoverable [`RenderError::SurfaceStale`]; the caller must run the
    /// recreate cascade and must not advance its frame counter.
    pub fn acquire_next(&self, semaphore: vk::Semaphore) -> RenderResult<(u32, bool)> {
        unsafe {
            match self.swapchain_fn.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            ) {
                Ok(pair) => Ok(pair),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SurfaceStale),
                Err(e) => Err(RenderError::AcquireImageFailed(e)),
            }
        }
    }

    /// Queue `image_index` for display once `wait_semaphore` signals.
    ///
    /// Returns `true` when the surface should be recreated (suboptimal or
    /// out of date). Both are recreate triggers, never failures.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RenderResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR {
            wait_semaphore_count: 1,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            swapchain_count: 1,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: image_indices.as_ptr(),
            ..Default::default()
        };

        unsafe {
            match self.swapchain_fn.queue_present(queue, &present_info) {
                Ok(suboptimal) => Ok(suboptimal),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
                Err(e) => Err(RenderError::PresentFailed(e)),
            }
        }
    }

    /// Rebuild against the current surface capabilities.
    ///
    /// The outgoing generation is retired, not destroyed: in-flight presents
    /// may still reference it. Call [`Swapchain::cleanup_old`] at the end of
    /// the cascade, after a device-idle wait.
    pub fn recreate(&mut self, ctx: &DeviceContext, width: u32, height: u32) -> RenderResult<()> {
        // A prior retired generation, if any, is already past its idle wait.
        self.cleanup_old(ctx);

        let old = Retired {
            swapchain: self.swapchain,
            image_views: std::mem::take(&mut self.image_views),
        };
        self.generation += 1;

        let result = self.build(ctx, width, height, old.swapchain);
        self.retired = Some(old);
        result
    }

    /// Destroy the retired generation. Only sound after a device-idle wait.
    pub fn cleanup_old(&mut self, ctx: &DeviceContext) {
        if let Some(old) = self.retired.take() {
            unsafe {
                for view in old.image_views {
                    ctx.device().destroy_image_view(view, None);
                }
                self.swapchain_fn.destroy_swapchain(old.swapchain, None);
            }
            log::debug!("Retired swapchain generation destroyed");
        }
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        self.cleanup_old(ctx);
        unsafe {
            for &view in &self.image_views {
                ctx.device().destroy_image_view(view, None);
            }
            self.image_views.clear();
            if self.swapchain != vk::SwapchainKHR::null() {
                self.swapchain_fn.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Monotonic generation counter, bumped on every recreate.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Prefer B8G8R8A8_SRGB with a nonlinear-sRGB color space.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(formats[0])
}

/// FIFO when vsync is requested (always available), otherwise MAILBOX with a
/// FIFO fallback.
fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    modes
        .iter()
        .copied()
        .find(|&m| m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the surface's fixed extent when it reports one, else clamp the
/// requested framebuffer size into the supported range.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum when one exists.
fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_format_prefers_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn present_mode_honors_vsync() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&modes, false),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_current_when_fixed() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn extent_clamps_when_unconstrained() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!((extent.width, extent.height), (2000, 100));
    }

    #[test]
    fn image_count_is_min_plus_one_with_cap() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capped), 2);

        let uncapped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&uncapped), 3);
    }
}
