//! Device and queue context.
//!
//! Owns the Vulkan instance, surface, logical device and the four typed
//! queues (graphics, compute, transfer, present). Exactly one instance exists
//! per process; every other component borrows it and never outlives it.

use crate::error::{RenderError, RenderResult};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_void, CStr};
use std::sync::Arc;

const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// How much of the validation layer's output to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// No validation layer at all.
    #[default]
    Off,
    /// Validation enabled, warnings and errors logged.
    WarningsOnly,
    /// Validation enabled, everything down to verbose logged.
    Full,
}

/// Debug-layer policy handed in by the entry point.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugOptions {
    pub validation: ValidationMode,
    /// Terminate the process on the first validation error. Warnings never
    /// affect control flow regardless of this flag.
    pub exit_on_error: bool,
}

/// Queue family indices resolved during device selection.
///
/// Compute and transfer prefer dedicated families; both fall back to the
/// graphics family when the hardware exposes nothing dedicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    /// Deduplicated family indices, for device queue creation.
    pub fn unique(&self) -> Vec<u32> {
        let mut all = vec![self.graphics, self.present, self.compute, self.transfer];
        all.sort_unstable();
        all.dedup();
        all
    }

    /// Deduplicated families that touch buffer contents: transfer uploads,
    /// compute dispatches and graphics reads. Buffers used from more than one
    /// of these need concurrent sharing, since no ownership-transfer barriers
    /// are recorded anywhere.
    pub fn buffer_access_families(&self) -> Vec<u32> {
        let mut all = vec![self.graphics, self.compute, self.transfer];
        all.sort_unstable();
        all.dedup();
        all
    }
}

/// Picks queue families from the raw family properties.
///
/// `surface_support` reports whether a family can present to the target
/// surface. Returns `None` when no family supports both graphics and present.
pub(crate) fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    surface_support: impl Fn(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics_present = None;
    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && surface_support(index) {
            graphics_present = Some(index);
            break;
        }
    }
    let graphics = graphics_present?;

    let dedicated_compute = families.iter().enumerate().find_map(|(index, family)| {
        let flags = family.queue_flags;
        (flags.contains(vk::QueueFlags::COMPUTE) && !flags.contains(vk::QueueFlags::GRAPHICS))
            .then_some(index as u32)
    });

    let dedicated_transfer = families.iter().enumerate().find_map(|(index, family)| {
        let flags = family.queue_flags;
        (flags.contains(vk::QueueFlags::TRANSFER)
            && !flags.contains(vk::QueueFlags::GRAPHICS)
            && !flags.contains(vk::QueueFlags::COMPUTE))
        .then_some(index as u32)
    });

    Some(QueueFamilies {
        graphics,
        present: graphics,
        compute: dedicated_compute.unwrap_or(graphics),
        transfer: dedicated_transfer.unwrap_or(graphics),
    })
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if data.is_null() || (*data).p_message.is_null() {
        "<no message>".into()
    } else {
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan] {}", message);
        if !user_data.is_null() {
            let options = &*(user_data as *const DebugOptions);
            if options.exit_on_error {
                std::process::exit(1);
            }
        }
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[vulkan] {}", message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::info!("[vulkan] {}", message);
    } else {
        log::debug!("[vulkan] {}", message);
    }

    vk::FALSE
}

/// The process-wide Vulkan context.
pub struct DeviceContext {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    // Referenced by the messenger callback for the process lifetime.
    _debug_options: Box<DebugOptions>,
    surface_fn: surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    families: QueueFamilies,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    transfer_queue: vk::Queue,
    present_queue: vk::Queue,
    allocator: Option<Arc<Mutex<Allocator>>>,
}

impl DeviceContext {
    pub fn new(
        window: &winit::window::Window,
        debug_options: DebugOptions,
    ) -> RenderResult<Self> {
        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;

            let debug_options = Box::new(debug_options);
            let with_validation = debug_options.validation != ValidationMode::Off;

            let app_name = CStr::from_bytes_with_nul(b"Render Engine\0").unwrap();
            let app_info = vk::ApplicationInfo {
                p_application_name: app_name.as_ptr(),
                application_version: vk::make_api_version(0, 1, 0, 0),
                p_engine_name: app_name.as_ptr(),
                engine_version: vk::make_api_version(0, 1, 0, 0),
                api_version: vk::API_VERSION_1_2,
                ..Default::default()
            };

            let display_handle = window
                .display_handle()
                .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;
            let window_handle = window
                .window_handle()
                .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;

            let mut extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
                .map_err(|e| RenderError::InitializationFailed(e.to_string()))?
                .to_vec();
            if with_validation {
                extensions.push(debug_utils::NAME.as_ptr());
            }

            let layers = if with_validation {
                vec![VALIDATION_LAYER.as_ptr()]
            } else {
                Vec::new()
            };

            let min_severity = match debug_options.validation {
                ValidationMode::Full => {
                    vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                }
                _ => {
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                }
            };

            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT {
                message_severity: min_severity,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                p_user_data: debug_options.as_ref() as *const DebugOptions as *mut c_void,
                ..Default::default()
            };

            let instance_info = vk::InstanceCreateInfo {
                p_application_info: &app_info,
                enabled_extension_count: extensions.len() as u32,
                pp_enabled_extension_names: extensions.as_ptr(),
                enabled_layer_count: layers.len() as u32,
                pp_enabled_layer_names: layers.as_ptr(),
                ..Default::default()
            };

            let instance = entry
                .create_instance(&instance_info, None)
                .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;

            let debug_messenger = if with_validation {
                let loader = debug_utils::Instance::new(&entry, &instance);
                let messenger = loader
                    .create_debug_utils_messenger(&messenger_info, None)
                    .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;
                Some((loader, messenger))
            } else {
                None
            };

            let surface_fn = surface::Instance::new(&entry, &instance);
            let surface = ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| RenderError::SurfaceCreationFailed(e.to_string()))?;

            let (physical_device, families) =
                pick_physical_device(&instance, &surface_fn, surface)?;

            if families.compute == families.graphics {
                log::info!("No dedicated compute family; sharing graphics family {}", families.graphics);
            }
            if families.transfer == families.graphics {
                log::info!("No dedicated transfer family; sharing graphics family {}", families.graphics);
            }

            let queue_priorities = [1.0f32];
            let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
                .unique()
                .into_iter()
                .map(|family| vk::DeviceQueueCreateInfo {
                    queue_family_index: family,
                    queue_count: 1,
                    p_queue_priorities: queue_priorities.as_ptr(),
                    ..Default::default()
                })
                .collect();

            let device_extensions = [swapchain::NAME.as_ptr()];
            let device_features = vk::PhysicalDeviceFeatures {
                sampler_anisotropy: vk::TRUE,
                ..Default::default()
            };

            let device_info = vk::DeviceCreateInfo {
                queue_create_info_count: queue_infos.len() as u32,
                p_queue_create_infos: queue_infos.as_ptr(),
                enabled_extension_count: device_extensions.len() as u32,
                pp_enabled_extension_names: device_extensions.as_ptr(),
                p_enabled_features: &device_features,
                ..Default::default()
            };

            let device = instance
                .create_device(physical_device, &device_info, None)
                .map_err(|e| RenderError::DeviceCreationFailed(e.to_string()))?;

            let graphics_queue = device.get_device_queue(families.graphics, 0);
            let compute_queue = device.get_device_queue(families.compute, 0);
            let transfer_queue = device.get_device_queue(families.transfer, 0);
            let present_queue = device.get_device_queue(families.present, 0);

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;

            log::info!(
                "Device context ready (graphics family {}, compute family {}, transfer family {})",
                families.graphics,
                families.compute,
                families.transfer
            );

            Ok(Self {
                _entry: entry,
                instance,
                debug_messenger,
                _debug_options: debug_options,
                surface_fn,
                surface,
                physical_device,
                device,
                families,
                graphics_queue,
                compute_queue,
                transfer_queue,
                present_queue,
                allocator: Some(Arc::new(Mutex::new(allocator))),
            })
        }
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn surface_fn(&self) -> &surface::Instance {
        &self.surface_fn
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn allocator(&self) -> Arc<Mutex<Allocator>> {
        self.allocator
            .clone()
            .expect("Allocator already torn down")
    }

    /// Full host/device barrier. Gates every teardown in the recreate cascade.
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(RenderError::DeviceWaitFailed)
        }
    }

    pub fn surface_capabilities(&self) -> RenderResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_fn
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(|e| RenderError::SwapchainCreationFailed(e.to_string()))
        }
    }
}

fn pick_physical_device(
    instance: &ash::Instance,
    surface_fn: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> RenderResult<(vk::PhysicalDevice, QueueFamilies)> {
    unsafe {
        let physical_devices = instance
            .enumerate_physical_devices()
            .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;

        for physical_device in physical_devices {
            let family_props =
                instance.get_physical_device_queue_family_properties(physical_device);
            let families = select_queue_families(&family_props, |index| {
                surface_fn
                    .get_physical_device_surface_support(physical_device, index, surface)
                    .unwrap_or(false)
            });
            if let Some(families) = families {
                let props = instance.get_physical_device_properties(physical_device);
                let name = CStr::from_ptr(props.device_name.as_ptr());
                log::info!("Selected physical device: {}", name.to_string_lossy());
                return Ok((physical_device, families));
            }
        }

        Err(RenderError::NoSuitableDevice(
            "no device exposes a graphics queue family that can present".into(),
        ))
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            drop(self.allocator.take());
            self.device.destroy_device(None);
            self.surface_fn.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_dedicated_compute_and_transfer_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];

        let selected = select_queue_families(&families, |_| true).unwrap();
        assert_eq!(selected.graphics, 0);
        assert_eq!(selected.present, 0);
        assert_eq!(selected.compute, 1);
        assert_eq!(selected.transfer, 2);
    }

    #[test]
    fn falls_back_to_graphics_family_when_nothing_dedicated() {
        let families =
            [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];

        let selected = select_queue_families(&families, |_| true).unwrap();
        assert_eq!(selected.compute, selected.graphics);
        assert_eq!(selected.transfer, selected.graphics);
    }

    #[test]
    fn rejects_devices_that_cannot_present() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(select_queue_families(&families, |_| false).is_none());
    }

    #[test]
    fn unique_deduplicates_shared_families() {
        let families = QueueFamilies {
            graphics: 0,
            present: 0,
            compute: 1,
            transfer: 0,
        };
        assert_eq!(families.unique(), vec![0, 1]);
    }

    #[test]
    fn buffer_access_families_span_every_family_that_touches_buffers() {
        let split = QueueFamilies {
            graphics: 0,
            present: 0,
            compute: 1,
            transfer: 2,
        };
        assert_eq!(split.buffer_access_families(), vec![0, 1, 2]);

        let shared = QueueFamilies {
            graphics: 0,
            present: 0,
            compute: 0,
            transfer: 0,
        };
        assert_eq!(shared.buffer_access_families(), vec![0]);
    }
}
