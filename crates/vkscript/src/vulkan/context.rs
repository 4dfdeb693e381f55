//! Vulkan context management
//!
//! A [`Context`] owns the loader entry, instance, physical device
//! choice, logical device, queue, command buffer, and fence a script
//! runs against. It is created either from scratch (enabling exactly
//! what a script's requirements ask for) or around an externally
//! provided device, in which case the function tables are loaded
//! through the caller's `vkGetInstanceProcAddr`.

use std::ffi::{CStr, CString};

use ash::{vk, Device, Entry, Instance};
use thiserror::Error;

use crate::requirements::{ExtFeatureSet, ExtFeatureStruct, Requirements};

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No device satisfies the script's requirements
    #[error("Missing required feature or extension: {0}")]
    MissingFeature(String),

    /// No suitable memory type found for an allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// The framebuffer format is not renderable on this device
    #[error("Unsupported framebuffer format: {0}")]
    UnsupportedFormat(String),

    /// An external shader tool failed
    #[error("Shader build failed: {0}")]
    ShaderBuild(String),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// A device created by the caller rather than the executor
///
/// Function tables are resolved per context through
/// `get_instance_proc_addr`; device-level entry points resolve through
/// the `vkGetDeviceProcAddr` obtained from it.
#[derive(Clone, Copy)]
pub struct ExternalDevice {
    /// Loader entry point used to resolve every function table
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    /// The caller's instance
    pub instance: vk::Instance,
    /// The physical device the device was created from
    pub physical_device: vk::PhysicalDevice,
    /// Queue family the executor may submit to
    pub queue_family: u32,
    /// The caller's device
    pub device: vk::Device,
}

/// Owns the Vulkan objects shared by every script run
pub struct Context {
    // dropped in declaration order: pools before the device, the device
    // before the instance
    fence: vk::Fence,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    queue: vk::Queue,
    queue_family: u32,
    device: Device,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    properties: vk::PhysicalDeviceProperties,
    instance: Instance,
    #[allow(dead_code)]
    entry: Entry,
    owns_device: bool,
}

impl Context {
    /// Create a context satisfying `requirements`, loading the system
    /// Vulkan loader and picking the first suitable physical device
    pub fn new(requirements: &Requirements) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e:?}"))
        })?;

        let app_name = CString::new("vkscript").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&app_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let create_info = vk::InstanceCreateInfo::builder().application_info(&app_info);
        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Self::finish_creation(entry, instance, requirements)
    }

    fn finish_creation(
        entry: Entry,
        instance: Instance,
        requirements: &Requirements,
    ) -> VulkanResult<Self> {
        let selection = Self::select_physical_device(&instance, requirements);
        let (physical_device, queue_family) = match selection {
            Ok(found) => found,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let device = match Self::create_device(
            &instance,
            physical_device,
            queue_family,
            requirements,
        ) {
            Ok(device) => device,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        Self::finish_common(entry, instance, physical_device, queue_family, device, true)
    }

    /// Wrap an externally created device
    ///
    /// The instance and device handles stay owned by the caller; only
    /// the command pool and fence created here are destroyed on drop.
    pub fn from_external(external: &ExternalDevice) -> VulkanResult<Self> {
        let static_fn = vk::StaticFn {
            get_instance_proc_addr: external.get_instance_proc_addr,
        };
        let entry = unsafe { Entry::from_static_fn(static_fn) };
        let instance = unsafe { Instance::load(entry.static_fn(), external.instance) };
        let device = unsafe { Device::load(instance.fp_v1_0(), external.device) };
        Self::finish_common(
            entry,
            instance,
            external.physical_device,
            external.queue_family,
            device,
            false,
        )
    }

    fn finish_common(
        entry: Entry,
        instance: Instance,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        device: Device,
        owns_device: bool,
    ) -> VulkanResult<Self> {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!("[CONTEXT] Using GPU: {}", unsafe {
            CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy()
        });

        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let command_pool = unsafe {
            device
                .create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe {
            device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?[0]
        };

        let fence = unsafe {
            device
                .create_fence(&vk::FenceCreateInfo::builder(), None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            fence,
            command_pool,
            command_buffer,
            queue,
            queue_family,
            device,
            physical_device,
            memory_properties,
            properties,
            instance,
            entry,
            owns_device,
        })
    }

    fn select_physical_device(
        instance: &Instance,
        requirements: &Requirements,
    ) -> VulkanResult<(vk::PhysicalDevice, u32)> {
        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };
        if devices.is_empty() {
            return Err(VulkanError::InitializationFailed(
                "No Vulkan devices found".to_owned(),
            ));
        }

        for device in devices {
            let Some(queue_family) = Self::find_queue_family(instance, device) else {
                continue;
            };
            if requirements.check(instance, device) {
                return Ok((device, queue_family));
            }
        }

        Err(VulkanError::MissingFeature(
            "no device satisfies the script requirements".to_owned(),
        ))
    }

    fn find_queue_family(instance: &Instance, device: vk::PhysicalDevice) -> Option<u32> {
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        families.iter().position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
    }

    fn create_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        requirements: &Requirements,
    ) -> VulkanResult<Device> {
        let queue_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&[1.0])
            .build();
        let queue_infos = [queue_info];

        let extension_names: Vec<CString> = requirements
            .extensions()
            .iter()
            .map(|e| CString::new(e.as_str()))
            .collect::<Result<_, _>>()
            .map_err(|_| {
                VulkanError::InitializationFailed(
                    "extension name contains a NUL byte".to_owned(),
                )
            })?;
        let extension_ptrs: Vec<*const i8> =
            extension_names.iter().map(|e| e.as_ptr()).collect();

        let features = requirements.to_device_features();

        let mut storage_16bit = build_16bit_storage(requirements.ext_features());
        let mut storage_8bit = build_8bit_storage(requirements.ext_features());
        let mut float16_int8 = build_float16_int8(requirements.ext_features());
        let mut variable_pointers = build_variable_pointers(requirements.ext_features());
        let mut multiview = build_multiview(requirements.ext_features());
        let mut atomic_int64 = build_atomic_int64(requirements.ext_features());

        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);
        let wants =
            |kind: ExtFeatureStruct| requirements.ext_features().iter().any(|s| s.kind == kind);
        if wants(ExtFeatureStruct::Storage16Bit) {
            create_info = create_info.push_next(&mut storage_16bit);
        }
        if wants(ExtFeatureStruct::Storage8Bit) {
            create_info = create_info.push_next(&mut storage_8bit);
        }
        if wants(ExtFeatureStruct::Float16Int8) {
            create_info = create_info.push_next(&mut float16_int8);
        }
        if wants(ExtFeatureStruct::VariablePointers) {
            create_info = create_info.push_next(&mut variable_pointers);
        }
        if wants(ExtFeatureStruct::Multiview) {
            create_info = create_info.push_next(&mut multiview);
        }
        if wants(ExtFeatureStruct::ShaderAtomicInt64) {
            create_info = create_info.push_next(&mut atomic_int64);
        }

        unsafe {
            instance
                .create_device(physical_device, &create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// The device function table
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The instance function table
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The selected physical device
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Memory properties of the physical device
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Device limits (alignment, granularity)
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.limits
    }

    /// The queue the executor submits to
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Queue family of [`Self::queue`]
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// The single primary command buffer scripts record into
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// The fence used for every submission
    pub fn fence(&self) -> vk::Fence {
        self.fence
    }

    /// Whether the device was injected by the caller
    pub fn is_external(&self) -> bool {
        !self.owns_device
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.command_pool, None);
            if self.owns_device {
                self.device.destroy_device(None);
                self.instance.destroy_instance(None);
            }
        }
    }
}

fn enabled(sets: &[ExtFeatureSet], kind: ExtFeatureStruct, field: usize) -> vk::Bool32 {
    let requested = sets
        .iter()
        .find(|s| s.kind == kind)
        .map(|s| s.enabled.get(field).copied().unwrap_or(false))
        .unwrap_or(false);
    if requested {
        vk::TRUE
    } else {
        vk::FALSE
    }
}

fn build_16bit_storage(sets: &[ExtFeatureSet]) -> vk::PhysicalDevice16BitStorageFeatures {
    let kind = ExtFeatureStruct::Storage16Bit;
    vk::PhysicalDevice16BitStorageFeatures::builder()
        .storage_buffer16_bit_access(enabled(sets, kind, 0) != 0)
        .uniform_and_storage_buffer16_bit_access(enabled(sets, kind, 1) != 0)
        .storage_push_constant16(enabled(sets, kind, 2) != 0)
        .storage_input_output16(enabled(sets, kind, 3) != 0)
        .build()
}

fn build_8bit_storage(sets: &[ExtFeatureSet]) -> vk::PhysicalDevice8BitStorageFeatures {
    let kind = ExtFeatureStruct::Storage8Bit;
    vk::PhysicalDevice8BitStorageFeatures::builder()
        .storage_buffer8_bit_access(enabled(sets, kind, 0) != 0)
        .uniform_and_storage_buffer8_bit_access(enabled(sets, kind, 1) != 0)
        .storage_push_constant8(enabled(sets, kind, 2) != 0)
        .build()
}

fn build_float16_int8(sets: &[ExtFeatureSet]) -> vk::PhysicalDeviceShaderFloat16Int8Features {
    let kind = ExtFeatureStruct::Float16Int8;
    vk::PhysicalDeviceShaderFloat16Int8Features::builder()
        .shader_float16(enabled(sets, kind, 0) != 0)
        .shader_int8(enabled(sets, kind, 1) != 0)
        .build()
}

fn build_variable_pointers(
    sets: &[ExtFeatureSet],
) -> vk::PhysicalDeviceVariablePointersFeatures {
    let kind = ExtFeatureStruct::VariablePointers;
    vk::PhysicalDeviceVariablePointersFeatures::builder()
        .variable_pointers_storage_buffer(enabled(sets, kind, 0) != 0)
        .variable_pointers(enabled(sets, kind, 1) != 0)
        .build()
}

fn build_multiview(sets: &[ExtFeatureSet]) -> vk::PhysicalDeviceMultiviewFeatures {
    let kind = ExtFeatureStruct::Multiview;
    vk::PhysicalDeviceMultiviewFeatures::builder()
        .multiview(enabled(sets, kind, 0) != 0)
        .multiview_geometry_shader(enabled(sets, kind, 1) != 0)
        .multiview_tessellation_shader(enabled(sets, kind, 2) != 0)
        .build()
}

fn build_atomic_int64(sets: &[ExtFeatureSet]) -> vk::PhysicalDeviceShaderAtomicInt64Features {
    let kind = ExtFeatureStruct::ShaderAtomicInt64;
    vk::PhysicalDeviceShaderAtomicInt64Features::builder()
        .shader_buffer_int64_atomics(enabled(sets, kind, 0) != 0)
        .shader_shared_int64_atomics(enabled(sets, kind, 1) != 0)
        .build()
}
