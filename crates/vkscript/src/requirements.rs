//! Device requirements declared by a script's `[require]` section
//!
//! A requirement is either a base device feature (a field of
//! `VkPhysicalDeviceFeatures`), a feature belonging to a known
//! feature-bearing extension struct (which implies the extension), or a
//! raw extension name. The executor compares requirement sets to decide
//! whether a device can be reused across scripts and checks them against
//! a physical device before running.

use ash::vk;

macro_rules! base_features {
    ($( $name:literal => $field:ident ),* $(,)?) => {
        /// Script-visible names of every base device feature, in
        /// `VkPhysicalDeviceFeatures` field order
        pub const BASE_FEATURE_NAMES: &[&str] = &[$( $name ),*];

        fn base_feature_index(name: &str) -> Option<usize> {
            BASE_FEATURE_NAMES.iter().position(|n| *n == name)
        }

        fn read_base_feature(features: &vk::PhysicalDeviceFeatures, index: usize) -> bool {
            let values = [$( features.$field ),*];
            values[index] != 0
        }

        fn write_base_feature(features: &mut vk::PhysicalDeviceFeatures, index: usize) {
            let fields: &mut [&mut vk::Bool32] = &mut [$( &mut features.$field ),*];
            *fields[index] = vk::TRUE;
        }
    };
}

base_features! {
    "robustBufferAccess" => robust_buffer_access,
    "fullDrawIndexUint32" => full_draw_index_uint32,
    "imageCubeArray" => image_cube_array,
    "independentBlend" => independent_blend,
    "geometryShader" => geometry_shader,
    "tessellationShader" => tessellation_shader,
    "sampleRateShading" => sample_rate_shading,
    "dualSrcBlend" => dual_src_blend,
    "logicOp" => logic_op,
    "multiDrawIndirect" => multi_draw_indirect,
    "drawIndirectFirstInstance" => draw_indirect_first_instance,
    "depthClamp" => depth_clamp,
    "depthBiasClamp" => depth_bias_clamp,
    "fillModeNonSolid" => fill_mode_non_solid,
    "depthBounds" => depth_bounds,
    "wideLines" => wide_lines,
    "largePoints" => large_points,
    "alphaToOne" => alpha_to_one,
    "multiViewport" => multi_viewport,
    "samplerAnisotropy" => sampler_anisotropy,
    "textureCompressionETC2" => texture_compression_etc2,
    "textureCompressionASTC_LDR" => texture_compression_astc_ldr,
    "textureCompressionBC" => texture_compression_bc,
    "occlusionQueryPrecise" => occlusion_query_precise,
    "pipelineStatisticsQuery" => pipeline_statistics_query,
    "vertexPipelineStoresAndAtomics" => vertex_pipeline_stores_and_atomics,
    "fragmentStoresAndAtomics" => fragment_stores_and_atomics,
    "shaderTessellationAndGeometryPointSize" => shader_tessellation_and_geometry_point_size,
    "shaderImageGatherExtended" => shader_image_gather_extended,
    "shaderStorageImageExtendedFormats" => shader_storage_image_extended_formats,
    "shaderStorageImageMultisample" => shader_storage_image_multisample,
    "shaderStorageImageReadWithoutFormat" => shader_storage_image_read_without_format,
    "shaderStorageImageWriteWithoutFormat" => shader_storage_image_write_without_format,
    "shaderUniformBufferArrayDynamicIndexing" => shader_uniform_buffer_array_dynamic_indexing,
    "shaderSampledImageArrayDynamicIndexing" => shader_sampled_image_array_dynamic_indexing,
    "shaderStorageBufferArrayDynamicIndexing" => shader_storage_buffer_array_dynamic_indexing,
    "shaderStorageImageArrayDynamicIndexing" => shader_storage_image_array_dynamic_indexing,
    "shaderClipDistance" => shader_clip_distance,
    "shaderCullDistance" => shader_cull_distance,
    "shaderFloat64" => shader_float64,
    "shaderInt64" => shader_int64,
    "shaderInt16" => shader_int16,
    "shaderResourceResidency" => shader_resource_residency,
    "shaderResourceMinLod" => shader_resource_min_lod,
    "sparseBinding" => sparse_binding,
    "sparseResidencyBuffer" => sparse_residency_buffer,
    "sparseResidencyImage2D" => sparse_residency_image2_d,
    "sparseResidencyImage3D" => sparse_residency_image3_d,
    "sparseResidency2Samples" => sparse_residency2_samples,
    "sparseResidency4Samples" => sparse_residency4_samples,
    "sparseResidency8Samples" => sparse_residency8_samples,
    "sparseResidency16Samples" => sparse_residency16_samples,
    "sparseResidencyAliased" => sparse_residency_aliased,
    "variableMultisampleRate" => variable_multisample_rate,
    "inheritedQueries" => inherited_queries,
}

const N_BASE_FEATURES: usize = BASE_FEATURE_NAMES.len();

/// Identity of a known feature-bearing extension struct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtFeatureStruct {
    /// `VkPhysicalDevice16BitStorageFeatures`
    Storage16Bit,
    /// `VkPhysicalDevice8BitStorageFeatures`
    Storage8Bit,
    /// `VkPhysicalDeviceShaderFloat16Int8Features`
    Float16Int8,
    /// `VkPhysicalDeviceVariablePointersFeatures`
    VariablePointers,
    /// `VkPhysicalDeviceMultiviewFeatures`
    Multiview,
    /// `VkPhysicalDeviceShaderAtomicInt64Features`
    ShaderAtomicInt64,
}

struct ExtFeatureDesc {
    kind: ExtFeatureStruct,
    extension: &'static str,
    fields: &'static [&'static str],
}

/// Registry of feature structs scripts can request fields of. Extending
/// the runner with a new struct means one row here plus one arm in
/// `chain_features` / `read_ext_feature`.
static EXT_FEATURES: &[ExtFeatureDesc] = &[
    ExtFeatureDesc {
        kind: ExtFeatureStruct::Storage16Bit,
        extension: "VK_KHR_16bit_storage",
        fields: &[
            "storageBuffer16BitAccess",
            "uniformAndStorageBuffer16BitAccess",
            "storagePushConstant16",
            "storageInputOutput16",
        ],
    },
    ExtFeatureDesc {
        kind: ExtFeatureStruct::Storage8Bit,
        extension: "VK_KHR_8bit_storage",
        fields: &[
            "storageBuffer8BitAccess",
            "uniformAndStorageBuffer8BitAccess",
            "storagePushConstant8",
        ],
    },
    ExtFeatureDesc {
        kind: ExtFeatureStruct::Float16Int8,
        extension: "VK_KHR_shader_float16_int8",
        fields: &["shaderFloat16", "shaderInt8"],
    },
    ExtFeatureDesc {
        kind: ExtFeatureStruct::VariablePointers,
        extension: "VK_KHR_variable_pointers",
        fields: &["variablePointersStorageBuffer", "variablePointers"],
    },
    ExtFeatureDesc {
        kind: ExtFeatureStruct::Multiview,
        extension: "VK_KHR_multiview",
        fields: &[
            "multiview",
            "multiviewGeometryShader",
            "multiviewTessellationShader",
        ],
    },
    ExtFeatureDesc {
        kind: ExtFeatureStruct::ShaderAtomicInt64,
        extension: "VK_KHR_shader_atomic_int64",
        fields: &["shaderBufferInt64Atomics", "shaderSharedInt64Atomics"],
    },
];

fn ext_feature_lookup(name: &str) -> Option<(&'static ExtFeatureDesc, usize)> {
    EXT_FEATURES.iter().find_map(|desc| {
        desc.fields
            .iter()
            .position(|f| *f == name)
            .map(|idx| (desc, idx))
    })
}

/// Requested fields of one extension feature struct
#[derive(Debug, Clone, PartialEq)]
pub struct ExtFeatureSet {
    /// Which struct the fields belong to
    pub kind: ExtFeatureStruct,
    /// One flag per field of the struct, in registry order
    pub enabled: Vec<bool>,
}

/// The features and extensions a script demands of a device
#[derive(Debug, Clone, PartialEq)]
pub struct Requirements {
    base: [bool; N_BASE_FEATURES],
    extensions: Vec<String>,
    ext_features: Vec<ExtFeatureSet>,
}

impl Requirements {
    /// An empty requirement set
    pub fn new() -> Self {
        Self {
            base: [false; N_BASE_FEATURES],
            extensions: Vec::new(),
            ext_features: Vec::new(),
        }
    }

    /// Add a requirement by name
    ///
    /// Known extension-feature names enable both the owning extension
    /// and the feature; known base-feature names set the feature; any
    /// other name is recorded as a raw extension. Re-adding is
    /// idempotent.
    pub fn add(&mut self, name: &str) {
        if let Some((desc, field_idx)) = ext_feature_lookup(name) {
            self.add_extension(desc.extension);
            let index = match self.ext_features.iter().position(|s| s.kind == desc.kind) {
                Some(index) => index,
                None => {
                    self.ext_features.push(ExtFeatureSet {
                        kind: desc.kind,
                        enabled: vec![false; desc.fields.len()],
                    });
                    self.ext_features.len() - 1
                }
            };
            self.ext_features[index].enabled[field_idx] = true;
        } else if let Some(idx) = base_feature_index(name) {
            self.base[idx] = true;
        } else {
            self.add_extension(name);
        }
    }

    fn add_extension(&mut self, name: &str) {
        if !self.extensions.iter().any(|e| e == name) {
            self.extensions.push(name.to_owned());
        }
    }

    /// Extension names in insertion order
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Requested extension feature structs in insertion order
    pub fn ext_features(&self) -> &[ExtFeatureSet] {
        &self.ext_features
    }

    /// Names of the enabled base features
    pub fn base_feature_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        BASE_FEATURE_NAMES
            .iter()
            .enumerate()
            .filter(|&(i, _)| self.base[i])
            .map(|(_, n)| *n)
    }

    /// The base-feature struct to create a device with
    pub fn to_device_features(&self) -> vk::PhysicalDeviceFeatures {
        let mut features = vk::PhysicalDeviceFeatures::default();
        for i in 0..N_BASE_FEATURES {
            if self.base[i] {
                write_base_feature(&mut features, i);
            }
        }
        features
    }

    /// Verify that `physical_device` satisfies every requirement
    ///
    /// Checks base features, enumerates device extensions, and, when
    /// extension features were requested, queries them through
    /// `vkGetPhysicalDeviceFeatures2`.
    pub fn check(
        &self,
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> bool {
        let features = unsafe { instance.get_physical_device_features(physical_device) };
        for i in 0..N_BASE_FEATURES {
            if self.base[i] && !read_base_feature(&features, i) {
                log::info!(
                    "[REQUIRE] Missing base feature: {}",
                    BASE_FEATURE_NAMES[i]
                );
                return false;
            }
        }

        let available = match unsafe {
            instance.enumerate_device_extension_properties(physical_device)
        } {
            Ok(props) => props,
            Err(_) => return false,
        };
        for ext in &self.extensions {
            let found = available.iter().any(|prop| {
                let name = unsafe {
                    std::ffi::CStr::from_ptr(prop.extension_name.as_ptr())
                };
                name.to_str().map(|n| n == ext).unwrap_or(false)
            });
            if !found {
                log::info!("[REQUIRE] Missing device extension: {ext}");
                return false;
            }
        }

        if self.ext_features.is_empty() {
            return true;
        }

        let mut storage_16bit = vk::PhysicalDevice16BitStorageFeatures::default();
        let mut storage_8bit = vk::PhysicalDevice8BitStorageFeatures::default();
        let mut float16_int8 = vk::PhysicalDeviceShaderFloat16Int8Features::default();
        let mut variable_pointers = vk::PhysicalDeviceVariablePointersFeatures::default();
        let mut multiview = vk::PhysicalDeviceMultiviewFeatures::default();
        let mut atomic_int64 = vk::PhysicalDeviceShaderAtomicInt64Features::default();

        let mut features2 = vk::PhysicalDeviceFeatures2::builder();
        let wants = |kind: ExtFeatureStruct| self.ext_features.iter().any(|s| s.kind == kind);
        if wants(ExtFeatureStruct::Storage16Bit) {
            features2 = features2.push_next(&mut storage_16bit);
        }
        if wants(ExtFeatureStruct::Storage8Bit) {
            features2 = features2.push_next(&mut storage_8bit);
        }
        if wants(ExtFeatureStruct::Float16Int8) {
            features2 = features2.push_next(&mut float16_int8);
        }
        if wants(ExtFeatureStruct::VariablePointers) {
            features2 = features2.push_next(&mut variable_pointers);
        }
        if wants(ExtFeatureStruct::Multiview) {
            features2 = features2.push_next(&mut multiview);
        }
        if wants(ExtFeatureStruct::ShaderAtomicInt64) {
            features2 = features2.push_next(&mut atomic_int64);
        }
        let mut features2 = features2.build();
        unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };

        for set in &self.ext_features {
            let actual: Vec<vk::Bool32> = match set.kind {
                ExtFeatureStruct::Storage16Bit => vec![
                    storage_16bit.storage_buffer16_bit_access,
                    storage_16bit.uniform_and_storage_buffer16_bit_access,
                    storage_16bit.storage_push_constant16,
                    storage_16bit.storage_input_output16,
                ],
                ExtFeatureStruct::Storage8Bit => vec![
                    storage_8bit.storage_buffer8_bit_access,
                    storage_8bit.uniform_and_storage_buffer8_bit_access,
                    storage_8bit.storage_push_constant8,
                ],
                ExtFeatureStruct::Float16Int8 => {
                    vec![float16_int8.shader_float16, float16_int8.shader_int8]
                }
                ExtFeatureStruct::VariablePointers => vec![
                    variable_pointers.variable_pointers_storage_buffer,
                    variable_pointers.variable_pointers,
                ],
                ExtFeatureStruct::Multiview => vec![
                    multiview.multiview,
                    multiview.multiview_geometry_shader,
                    multiview.multiview_tessellation_shader,
                ],
                ExtFeatureStruct::ShaderAtomicInt64 => vec![
                    atomic_int64.shader_buffer_int64_atomics,
                    atomic_int64.shader_shared_int64_atomics,
                ],
            };
            for (requested, &present) in set.enabled.iter().zip(&actual) {
                if *requested && present == 0 {
                    log::info!("[REQUIRE] Missing extension feature in {:?}", set.kind);
                    return false;
                }
            }
        }

        true
    }
}

impl Default for Requirements {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_with_copy() {
        let mut r = Requirements::new();
        r.add("geometryShader");
        r.add("VK_KHR_storage_buffer_storage_class");
        r.add("shaderFloat16");
        let copy = r.clone();
        assert_eq!(r, copy);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut a = Requirements::new();
        a.add("VK_KHR_multi_draw");
        a.add("VK_KHR_multi_draw");
        let mut b = Requirements::new();
        b.add("VK_KHR_multi_draw");
        assert_eq!(a, b);
        assert_eq!(a.extensions().len(), 1);
    }

    #[test]
    fn test_extension_order_matters() {
        let mut a = Requirements::new();
        a.add("VK_KHR_a");
        a.add("VK_KHR_b");
        let mut b = Requirements::new();
        b.add("VK_KHR_b");
        b.add("VK_KHR_a");
        assert_ne!(a, b);
    }

    #[test]
    fn test_base_feature_order_is_bytewise() {
        let mut a = Requirements::new();
        a.add("geometryShader");
        a.add("shaderInt64");
        let mut b = Requirements::new();
        b.add("shaderInt64");
        b.add("geometryShader");
        assert_eq!(a, b);
    }

    #[test]
    fn test_ext_feature_implies_extension() {
        let mut r = Requirements::new();
        r.add("shaderInt8");
        assert_eq!(r.extensions(), ["VK_KHR_shader_float16_int8"]);
        assert_eq!(r.ext_features().len(), 1);
        assert_eq!(r.ext_features()[0].kind, ExtFeatureStruct::Float16Int8);
        assert_eq!(r.ext_features()[0].enabled, [false, true]);
    }

    #[test]
    fn test_base_feature_sets_device_struct() {
        let mut r = Requirements::new();
        r.add("tessellationShader");
        let features = r.to_device_features();
        assert_eq!(features.tessellation_shader, vk::TRUE);
        assert_eq!(features.geometry_shader, vk::FALSE);
        assert_eq!(r.base_feature_names().collect::<Vec<_>>(), ["tessellationShader"]);
    }
}
