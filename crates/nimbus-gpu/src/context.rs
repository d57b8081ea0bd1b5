//! Headless Vulkan device for offscreen cloud rendering.

use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::error::{GpuError, Result};
use crate::memory::GpuAllocator;
use crate::scratch_pool::{FormatSupport, VulkanScratchPool};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance, device and allocator without a surface.
pub struct GpuContext {
    // Entry must outlive the instance
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    allocator: Arc<Mutex<GpuAllocator>>,
    queue_family: u32,
    queue: vk::Queue,
}

impl GpuContext {
    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn allocator(&self) -> &Arc<Mutex<GpuAllocator>> {
        &self.allocator
    }

    /// Graphics queue and its family index.
    pub fn queue(&self) -> (vk::Queue, u32) {
        (self.queue, self.queue_family)
    }

    /// Create a scratch pool sharing this context's allocator.
    ///
    /// Release every target of the pool before dropping the context.
    pub fn scratch_pool(&self) -> VulkanScratchPool {
        let support = unsafe { FormatSupport::query(&self.instance, self.physical_device) };
        VulkanScratchPool::new(self.device.clone(), self.allocator.clone(), support)
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Allocator memory must go before the device
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for a [`GpuContext`].
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Nimbus".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    #[must_use]
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    pub fn build(self) -> Result<GpuContext> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation)? };

        let Some((physical_device, queue_family)) = (unsafe { select_physical_device(&instance)? })
        else {
            unsafe { instance.destroy_instance(None) };
            return Err(GpuError::NoSuitableDevice);
        };

        let device = match unsafe { create_device(&instance, physical_device, queue_family) } {
            Ok(device) => Arc::new(device),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        let name = unsafe { instance.get_physical_device_properties(physical_device) }
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!("Selected GPU: {name}");

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device,
            allocator: Arc::new(Mutex::new(allocator)),
            queue_family,
            queue,
        })
    }
}

/// # Safety
/// The entry must be a valid Vulkan entry point.
unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Nimbus")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    let mut layer_names = Vec::new();
    if enable_validation {
        let available = unsafe { entry.enumerate_instance_layer_properties()? };
        let found = available
            .iter()
            .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
        if found {
            layer_names.push(VALIDATION_LAYER.as_ptr());
        } else {
            tracing::warn!("Validation layer {VALIDATION_LAYER:?} not available");
        }
    }

    #[cfg(target_os = "macos")]
    let (create_flags, extension_names) = (
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR,
        vec![ash::khr::portability_enumeration::NAME.as_ptr()],
    );
    #[cfg(not(target_os = "macos"))]
    let (create_flags, extension_names) = (vk::InstanceCreateFlags::empty(), Vec::new());

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    Ok(unsafe { entry.create_instance(&create_info, None)? })
}

/// Pick the highest scoring device with a graphics queue.
///
/// # Safety
/// The instance must be valid.
unsafe fn select_physical_device(
    instance: &ash::Instance,
) -> Result<Option<(vk::PhysicalDevice, u32)>> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    let best = devices
        .into_iter()
        .filter_map(|device| {
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };
            let family = families
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;
            let properties = unsafe { instance.get_physical_device_properties(device) };
            let score = match properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                _ => 0,
            };
            Some((score, device, u32::try_from(family).ok()?))
        })
        .max_by_key(|(score, _, _)| *score)
        .map(|(_, device, family)| (device, family));

    Ok(best)
}

/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let device_create_info =
        vk::DeviceCreateInfo::default().queue_create_infos(std::slice::from_ref(&queue_info));

    Ok(unsafe { instance.create_device(physical_device, &device_create_info, None)? })
}
