//! Pipeline state keys
//!
//! Every draw or dispatch in a script refers to a fully specified
//! pipeline state. The key mirrors the fields of the Vulkan create-info
//! structs as a typed property bag so that `[test]` lines like
//! `depthTestEnable true` or `front.passOp VK_STENCIL_OP_REPLACE` can be
//! applied by name, and so that structurally equal states can share one
//! GPU pipeline.

use ash::vk;

use crate::script::{ShaderStage, N_STAGES};

/// Pipeline bind point a key describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    /// A graphics pipeline
    #[default]
    Graphics,
    /// A compute pipeline
    Compute,
}

/// Where a graphics pipeline's vertices come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySource {
    /// The implicit rectangle vertex buffer of `draw rect`
    #[default]
    Rectangle,
    /// The script's `[vertex data]` section
    VertexData,
}

/// Kind of a named pipeline property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Boolean property (`true`, `false`, or an integer)
    Bool,
    /// Integer property; accepts `|`-separated Vulkan enum names
    Int,
    /// Float property
    Float,
}

/// A typed value assigned to a named property
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    /// Boolean value
    Bool(bool),
    /// Integer or enum value
    Int(i64),
    /// Float value
    Float(f32),
}

macro_rules! prop_type {
    (Bool) => { bool };
    (Int) => { i64 };
    (Float) => { f32 };
}

macro_rules! define_key {
    ($( $name:literal => $field:ident : $kind:tt = $default:expr ),* $(,)?) => {
        /// A fully specified graphics or compute pipeline description
        ///
        /// Equality is deep-structural; two keys compare equal exactly
        /// when they would produce identical pipelines.
        #[derive(Debug, Clone, PartialEq)]
        pub struct PipelineKey {
            /// Graphics or compute
            pub ty: KeyType,
            /// Vertex source for graphics keys
            pub source: KeySource,
            entry_points: [Option<String>; N_STAGES],
            $( pub(crate) $field: prop_type!($kind), )*
        }

        impl Default for PipelineKey {
            fn default() -> Self {
                Self {
                    ty: KeyType::default(),
                    source: KeySource::default(),
                    entry_points: Default::default(),
                    $( $field: $default, )*
                }
            }
        }

        impl PipelineKey {
            /// Kind of the property called `name`, if it exists
            pub fn lookup(name: &str) -> Option<PropertyKind> {
                match name {
                    $( $name => Some(PropertyKind::$kind), )*
                    _ => None,
                }
            }

            /// Assign a value to the property called `name`
            ///
            /// Returns `false` when the property does not exist or the
            /// value kind does not match.
            pub fn set(&mut self, name: &str, value: PropertyValue) -> bool {
                match name {
                    $(
                        $name => match value {
                            PropertyValue::$kind(v) => {
                                self.$field = v;
                                true
                            }
                            _ => false,
                        },
                    )*
                    _ => false,
                }
            }

            /// Read the property called `name`
            pub fn get(&self, name: &str) -> Option<PropertyValue> {
                match name {
                    $( $name => Some(PropertyValue::$kind(self.$field)), )*
                    _ => None,
                }
            }
        }
    };
}

define_key! {
    // input assembly
    "topology" => topology: Int = i64::from(vk::PrimitiveTopology::TRIANGLE_LIST.as_raw()),
    "primitiveRestartEnable" => primitive_restart_enable: Bool = false,
    // tessellation
    "patchControlPoints" => patch_control_points: Int = 3,
    // rasterization
    "depthClampEnable" => depth_clamp_enable: Bool = false,
    "rasterizerDiscardEnable" => rasterizer_discard_enable: Bool = false,
    "polygonMode" => polygon_mode: Int = 0,
    "cullMode" => cull_mode: Int = 0,
    "frontFace" => front_face: Int = 0,
    "depthBiasEnable" => depth_bias_enable: Bool = false,
    "depthBiasConstantFactor" => depth_bias_constant_factor: Float = 0.0,
    "depthBiasClamp" => depth_bias_clamp: Float = 0.0,
    "depthBiasSlopeFactor" => depth_bias_slope_factor: Float = 0.0,
    "lineWidth" => line_width: Float = 1.0,
    // depth/stencil
    "depthTestEnable" => depth_test_enable: Bool = false,
    "depthWriteEnable" => depth_write_enable: Bool = false,
    "depthCompareOp" => depth_compare_op: Int = i64::from(vk::CompareOp::LESS.as_raw()),
    "depthBoundsTestEnable" => depth_bounds_test_enable: Bool = false,
    "stencilTestEnable" => stencil_test_enable: Bool = false,
    "front.failOp" => front_fail_op: Int = 0,
    "front.passOp" => front_pass_op: Int = 0,
    "front.depthFailOp" => front_depth_fail_op: Int = 0,
    "front.compareOp" => front_compare_op: Int = i64::from(vk::CompareOp::ALWAYS.as_raw()),
    "front.compareMask" => front_compare_mask: Int = 0xffff_ffff,
    "front.writeMask" => front_write_mask: Int = 0xffff_ffff,
    "front.reference" => front_reference: Int = 0,
    "back.failOp" => back_fail_op: Int = 0,
    "back.passOp" => back_pass_op: Int = 0,
    "back.depthFailOp" => back_depth_fail_op: Int = 0,
    "back.compareOp" => back_compare_op: Int = i64::from(vk::CompareOp::ALWAYS.as_raw()),
    "back.compareMask" => back_compare_mask: Int = 0xffff_ffff,
    "back.writeMask" => back_write_mask: Int = 0xffff_ffff,
    "back.reference" => back_reference: Int = 0,
    "minDepthBounds" => min_depth_bounds: Float = 0.0,
    "maxDepthBounds" => max_depth_bounds: Float = 1.0,
    // color blend
    "logicOpEnable" => logic_op_enable: Bool = false,
    "logicOp" => logic_op: Int = i64::from(vk::LogicOp::COPY.as_raw()),
    "blendEnable" => blend_enable: Bool = false,
    "srcColorBlendFactor" => src_color_blend_factor: Int = i64::from(vk::BlendFactor::ONE.as_raw()),
    "dstColorBlendFactor" => dst_color_blend_factor: Int = 0,
    "colorBlendOp" => color_blend_op: Int = 0,
    "srcAlphaBlendFactor" => src_alpha_blend_factor: Int = i64::from(vk::BlendFactor::ONE.as_raw()),
    "dstAlphaBlendFactor" => dst_alpha_blend_factor: Int = 0,
    "alphaBlendOp" => alpha_blend_op: Int = 0,
    "colorWriteMask" => color_write_mask: Int = 0xf,
}

impl PipelineKey {
    /// Key with API-legal defaults (triangle-list topology, depth test
    /// off, write mask RGBA)
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry point name for `stage`
    pub fn entry_point(&self, stage: ShaderStage) -> &str {
        self.entry_points[stage as usize]
            .as_deref()
            .unwrap_or("main")
    }

    /// Override the entry point name for `stage`
    pub fn set_entry_point(&mut self, stage: ShaderStage, name: &str) {
        self.entry_points[stage as usize] = Some(name.to_owned());
    }

    /// The topology as a Vulkan enum
    pub fn vk_topology(&self) -> vk::PrimitiveTopology {
        vk::PrimitiveTopology::from_raw(self.topology as i32)
    }

    /// Patch size used with `PATCH_LIST` topology
    pub fn patch_control_points(&self) -> u32 {
        self.patch_control_points as u32
    }

    /// Populate the input-assembly create info from the key
    pub fn input_assembly_state(&self) -> vk::PipelineInputAssemblyStateCreateInfo {
        vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.vk_topology())
            .primitive_restart_enable(self.primitive_restart_enable)
            .build()
    }

    /// Populate the tessellation create info from the key
    pub fn tessellation_state(&self) -> vk::PipelineTessellationStateCreateInfo {
        vk::PipelineTessellationStateCreateInfo::builder()
            .patch_control_points(self.patch_control_points as u32)
            .build()
    }

    /// Populate the rasterization create info from the key
    pub fn rasterization_state(&self) -> vk::PipelineRasterizationStateCreateInfo {
        vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(self.depth_clamp_enable)
            .rasterizer_discard_enable(self.rasterizer_discard_enable)
            .polygon_mode(vk::PolygonMode::from_raw(self.polygon_mode as i32))
            .cull_mode(vk::CullModeFlags::from_raw(self.cull_mode as u32))
            .front_face(vk::FrontFace::from_raw(self.front_face as i32))
            .depth_bias_enable(self.depth_bias_enable)
            .depth_bias_constant_factor(self.depth_bias_constant_factor)
            .depth_bias_clamp(self.depth_bias_clamp)
            .depth_bias_slope_factor(self.depth_bias_slope_factor)
            .line_width(self.line_width)
            .build()
    }

    fn stencil_op_state(
        fail: i64,
        pass: i64,
        depth_fail: i64,
        compare: i64,
        compare_mask: i64,
        write_mask: i64,
        reference: i64,
    ) -> vk::StencilOpState {
        vk::StencilOpState::builder()
            .fail_op(vk::StencilOp::from_raw(fail as i32))
            .pass_op(vk::StencilOp::from_raw(pass as i32))
            .depth_fail_op(vk::StencilOp::from_raw(depth_fail as i32))
            .compare_op(vk::CompareOp::from_raw(compare as i32))
            .compare_mask(compare_mask as u32)
            .write_mask(write_mask as u32)
            .reference(reference as u32)
            .build()
    }

    /// Populate the depth/stencil create info from the key
    pub fn depth_stencil_state(&self) -> vk::PipelineDepthStencilStateCreateInfo {
        vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(self.depth_test_enable)
            .depth_write_enable(self.depth_write_enable)
            .depth_compare_op(vk::CompareOp::from_raw(self.depth_compare_op as i32))
            .depth_bounds_test_enable(self.depth_bounds_test_enable)
            .stencil_test_enable(self.stencil_test_enable)
            .front(Self::stencil_op_state(
                self.front_fail_op,
                self.front_pass_op,
                self.front_depth_fail_op,
                self.front_compare_op,
                self.front_compare_mask,
                self.front_write_mask,
                self.front_reference,
            ))
            .back(Self::stencil_op_state(
                self.back_fail_op,
                self.back_pass_op,
                self.back_depth_fail_op,
                self.back_compare_op,
                self.back_compare_mask,
                self.back_write_mask,
                self.back_reference,
            ))
            .min_depth_bounds(self.min_depth_bounds)
            .max_depth_bounds(self.max_depth_bounds)
            .build()
    }

    /// Populate the single color-blend attachment state from the key
    pub fn color_blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(self.blend_enable)
            .src_color_blend_factor(vk::BlendFactor::from_raw(self.src_color_blend_factor as i32))
            .dst_color_blend_factor(vk::BlendFactor::from_raw(self.dst_color_blend_factor as i32))
            .color_blend_op(vk::BlendOp::from_raw(self.color_blend_op as i32))
            .src_alpha_blend_factor(vk::BlendFactor::from_raw(self.src_alpha_blend_factor as i32))
            .dst_alpha_blend_factor(vk::BlendFactor::from_raw(self.dst_alpha_blend_factor as i32))
            .alpha_blend_op(vk::BlendOp::from_raw(self.alpha_blend_op as i32))
            .color_write_mask(vk::ColorComponentFlags::from_raw(self.color_write_mask as u32))
            .build()
    }

    /// Whether the key enables logic ops on the blend state
    pub fn logic_op_state(&self) -> (bool, vk::LogicOp) {
        (self.logic_op_enable, vk::LogicOp::from_raw(self.logic_op as i32))
    }
}

/// Vulkan enum constants scripts may name as property values
static VK_ENUMS: &[(&str, i64)] = &[
    ("VK_PRIMITIVE_TOPOLOGY_POINT_LIST", 0),
    ("VK_PRIMITIVE_TOPOLOGY_LINE_LIST", 1),
    ("VK_PRIMITIVE_TOPOLOGY_LINE_STRIP", 2),
    ("VK_PRIMITIVE_TOPOLOGY_TRIANGLE_LIST", 3),
    ("VK_PRIMITIVE_TOPOLOGY_TRIANGLE_STRIP", 4),
    ("VK_PRIMITIVE_TOPOLOGY_TRIANGLE_FAN", 5),
    ("VK_PRIMITIVE_TOPOLOGY_LINE_LIST_WITH_ADJACENCY", 6),
    ("VK_PRIMITIVE_TOPOLOGY_LINE_STRIP_WITH_ADJACENCY", 7),
    ("VK_PRIMITIVE_TOPOLOGY_TRIANGLE_LIST_WITH_ADJACENCY", 8),
    ("VK_PRIMITIVE_TOPOLOGY_TRIANGLE_STRIP_WITH_ADJACENCY", 9),
    ("VK_PRIMITIVE_TOPOLOGY_PATCH_LIST", 10),
    ("VK_POLYGON_MODE_FILL", 0),
    ("VK_POLYGON_MODE_LINE", 1),
    ("VK_POLYGON_MODE_POINT", 2),
    ("VK_CULL_MODE_NONE", 0),
    ("VK_CULL_MODE_FRONT_BIT", 1),
    ("VK_CULL_MODE_BACK_BIT", 2),
    ("VK_CULL_MODE_FRONT_AND_BACK", 3),
    ("VK_FRONT_FACE_COUNTER_CLOCKWISE", 0),
    ("VK_FRONT_FACE_CLOCKWISE", 1),
    ("VK_COMPARE_OP_NEVER", 0),
    ("VK_COMPARE_OP_LESS", 1),
    ("VK_COMPARE_OP_EQUAL", 2),
    ("VK_COMPARE_OP_LESS_OR_EQUAL", 3),
    ("VK_COMPARE_OP_GREATER", 4),
    ("VK_COMPARE_OP_NOT_EQUAL", 5),
    ("VK_COMPARE_OP_GREATER_OR_EQUAL", 6),
    ("VK_COMPARE_OP_ALWAYS", 7),
    ("VK_STENCIL_OP_KEEP", 0),
    ("VK_STENCIL_OP_ZERO", 1),
    ("VK_STENCIL_OP_REPLACE", 2),
    ("VK_STENCIL_OP_INCREMENT_AND_CLAMP", 3),
    ("VK_STENCIL_OP_DECREMENT_AND_CLAMP", 4),
    ("VK_STENCIL_OP_INVERT", 5),
    ("VK_STENCIL_OP_INCREMENT_AND_WRAP", 6),
    ("VK_STENCIL_OP_DECREMENT_AND_WRAP", 7),
    ("VK_LOGIC_OP_CLEAR", 0),
    ("VK_LOGIC_OP_AND", 1),
    ("VK_LOGIC_OP_AND_REVERSE", 2),
    ("VK_LOGIC_OP_COPY", 3),
    ("VK_LOGIC_OP_AND_INVERTED", 4),
    ("VK_LOGIC_OP_NO_OP", 5),
    ("VK_LOGIC_OP_XOR", 6),
    ("VK_LOGIC_OP_OR", 7),
    ("VK_LOGIC_OP_NOR", 8),
    ("VK_LOGIC_OP_EQUIVALENT", 9),
    ("VK_LOGIC_OP_INVERT", 10),
    ("VK_LOGIC_OP_OR_REVERSE", 11),
    ("VK_LOGIC_OP_COPY_INVERTED", 12),
    ("VK_LOGIC_OP_OR_INVERTED", 13),
    ("VK_LOGIC_OP_NAND", 14),
    ("VK_LOGIC_OP_SET", 15),
    ("VK_BLEND_FACTOR_ZERO", 0),
    ("VK_BLEND_FACTOR_ONE", 1),
    ("VK_BLEND_FACTOR_SRC_COLOR", 2),
    ("VK_BLEND_FACTOR_ONE_MINUS_SRC_COLOR", 3),
    ("VK_BLEND_FACTOR_DST_COLOR", 4),
    ("VK_BLEND_FACTOR_ONE_MINUS_DST_COLOR", 5),
    ("VK_BLEND_FACTOR_SRC_ALPHA", 6),
    ("VK_BLEND_FACTOR_ONE_MINUS_SRC_ALPHA", 7),
    ("VK_BLEND_FACTOR_DST_ALPHA", 8),
    ("VK_BLEND_FACTOR_ONE_MINUS_DST_ALPHA", 9),
    ("VK_BLEND_FACTOR_CONSTANT_COLOR", 10),
    ("VK_BLEND_FACTOR_ONE_MINUS_CONSTANT_COLOR", 11),
    ("VK_BLEND_FACTOR_CONSTANT_ALPHA", 12),
    ("VK_BLEND_FACTOR_ONE_MINUS_CONSTANT_ALPHA", 13),
    ("VK_BLEND_FACTOR_SRC_ALPHA_SATURATE", 14),
    ("VK_BLEND_FACTOR_SRC1_COLOR", 15),
    ("VK_BLEND_FACTOR_ONE_MINUS_SRC1_COLOR", 16),
    ("VK_BLEND_FACTOR_SRC1_ALPHA", 17),
    ("VK_BLEND_FACTOR_ONE_MINUS_SRC1_ALPHA", 18),
    ("VK_BLEND_OP_ADD", 0),
    ("VK_BLEND_OP_SUBTRACT", 1),
    ("VK_BLEND_OP_REVERSE_SUBTRACT", 2),
    ("VK_BLEND_OP_MIN", 3),
    ("VK_BLEND_OP_MAX", 4),
    ("VK_COLOR_COMPONENT_R_BIT", 1),
    ("VK_COLOR_COMPONENT_G_BIT", 2),
    ("VK_COLOR_COMPONENT_B_BIT", 4),
    ("VK_COLOR_COMPONENT_A_BIT", 8),
];

/// Resolve a Vulkan enum constant referenced by name in a script
pub fn lookup_enum(name: &str) -> Option<i64> {
    VK_ENUMS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_api_legal() {
        let key = PipelineKey::new();
        assert_eq!(key.vk_topology(), vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(key.patch_control_points(), 3);
        assert_eq!(key.get("depthTestEnable"), Some(PropertyValue::Bool(false)));
        assert_eq!(key.get("lineWidth"), Some(PropertyValue::Float(1.0)));
        assert_eq!(key.get("colorWriteMask"), Some(PropertyValue::Int(0xf)));
    }

    #[test]
    fn test_set_and_deep_equality() {
        let mut a = PipelineKey::new();
        let b = PipelineKey::new();
        assert_eq!(a, b);

        assert!(a.set("depthTestEnable", PropertyValue::Bool(true)));
        assert_ne!(a, b);

        let mut c = b.clone();
        assert!(c.set("depthTestEnable", PropertyValue::Bool(true)));
        assert_eq!(a, c);
    }

    #[test]
    fn test_unknown_property_and_kind_mismatch() {
        let mut key = PipelineKey::new();
        assert_eq!(PipelineKey::lookup("bogusProperty"), None);
        assert!(!key.set("bogusProperty", PropertyValue::Bool(true)));
        // depthBiasClamp is a float property
        assert_eq!(PipelineKey::lookup("depthBiasClamp"), Some(PropertyKind::Float));
        assert!(!key.set("depthBiasClamp", PropertyValue::Int(1)));
        assert!(key.set("depthBiasClamp", PropertyValue::Float(0.5)));
    }

    #[test]
    fn test_entry_points_are_deep_copied() {
        let mut a = PipelineKey::new();
        assert_eq!(a.entry_point(ShaderStage::Fragment), "main");
        a.set_entry_point(ShaderStage::Fragment, "frag_main");
        let b = a.clone();
        assert_eq!(b.entry_point(ShaderStage::Fragment), "frag_main");
        assert_eq!(a, b);
        a.set_entry_point(ShaderStage::Fragment, "other");
        assert_ne!(a, b);
        assert_eq!(b.entry_point(ShaderStage::Fragment), "frag_main");
    }

    #[test]
    fn test_enum_lookup() {
        assert_eq!(lookup_enum("VK_PRIMITIVE_TOPOLOGY_PATCH_LIST"), Some(10));
        assert_eq!(lookup_enum("VK_BLEND_FACTOR_ONE_MINUS_SRC_ALPHA"), Some(7));
        assert_eq!(lookup_enum("VK_NOT_AN_ENUM"), None);
    }

    #[test]
    fn test_stencil_properties_reach_create_info() {
        let mut key = PipelineKey::new();
        assert!(key.set("front.passOp", PropertyValue::Int(2)));
        assert!(key.set("front.reference", PropertyValue::Int(0x80)));
        let ds = key.depth_stencil_state();
        assert_eq!(ds.front.pass_op, vk::StencilOp::REPLACE);
        assert_eq!(ds.front.reference, 0x80);
        assert_eq!(ds.back.pass_op, vk::StencilOp::KEEP);
    }
}
