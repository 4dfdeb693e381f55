//! Parsed script intermediate representation
//!
//! A [`Script`] is the read-only result of parsing one test file: the
//! shader sources per stage, the table of unique pipeline keys, the
//! flat command list, the declared buffers, optional vertex/index data,
//! the window format, and the device requirements.

pub mod command;
pub mod parser;
pub mod source;
pub mod stream;

use ash::vk;

pub use command::{Command, CommandOp, SsboCompare};

use crate::format::Format;
use crate::pipeline_key::PipelineKey;
use crate::requirements::Requirements;

/// Number of shader stages a script can populate
pub const N_STAGES: usize = 6;

/// Pipeline shader stage, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    /// Vertex shader
    Vertex = 0,
    /// Tessellation control shader
    TessCtrl = 1,
    /// Tessellation evaluation shader
    TessEval = 2,
    /// Geometry shader
    Geometry = 3,
    /// Fragment shader
    Fragment = 4,
    /// Compute shader
    Compute = 5,
}

impl ShaderStage {
    /// All stages in pipeline order
    pub fn all() -> [Self; N_STAGES] {
        [
            Self::Vertex,
            Self::TessCtrl,
            Self::TessEval,
            Self::Geometry,
            Self::Fragment,
            Self::Compute,
        ]
    }

    /// Stage name as used in section headers and entry-point commands
    pub fn section_name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::TessCtrl => "tessellation control",
            Self::TessEval => "tessellation evaluation",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }

    /// The Vulkan stage bit for this stage
    pub fn vk_flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::TessCtrl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            Self::TessEval => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// Stage name understood by the external GLSL compiler
    pub fn tool_name(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::TessCtrl => "tesc",
            Self::TessEval => "tese",
            Self::Geometry => "geom",
            Self::Fragment => "frag",
            Self::Compute => "comp",
        }
    }
}

/// How a shader section's bytes are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    /// GLSL source to be compiled externally
    Glsl,
    /// SPIR-V assembly to be assembled externally
    SpirvText,
    /// A ready SPIR-V binary
    SpirvBinary,
}

/// One shader source attached to a stage
#[derive(Debug, Clone)]
pub struct Shader {
    /// Interpretation of `bytes`
    pub source_type: SourceType,
    /// The raw section payload
    pub bytes: Vec<u8>,
}

/// Whether a buffer is a uniform or storage buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Uniform buffer object
    Ubo,
    /// Shader storage buffer object
    Ssbo,
}

impl BufferKind {
    /// The matching Vulkan descriptor type
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::Ubo => vk::DescriptorType::UNIFORM_BUFFER,
            Self::Ssbo => vk::DescriptorType::STORAGE_BUFFER,
        }
    }
}

/// A buffer a script declares or writes
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    /// UBO or SSBO; a (set, binding, array index) triple has one kind
    pub kind: BufferKind,
    /// Descriptor set number
    pub desc_set: u32,
    /// Binding number within the set
    pub binding: u32,
    /// Element within the binding's descriptor array
    pub array_index: u32,
    /// Required size in bytes, grown as the script writes to it
    pub size: usize,
}

/// One attribute of the `[vertex data]` section
#[derive(Debug, Clone)]
pub struct VertexAttrib {
    /// Shader input location
    pub location: u32,
    /// Attribute format
    pub format: &'static Format,
    /// Byte offset within a vertex
    pub offset: u32,
}

/// Parsed `[vertex data]` contents
#[derive(Debug, Clone)]
pub struct VertexData {
    /// Bytes between consecutive vertices
    pub stride: u32,
    /// Attribute declarations from the header line
    pub attribs: Vec<VertexAttrib>,
    /// Packed vertex bytes
    pub raw: Vec<u8>,
}

impl VertexData {
    /// Number of vertices in the data
    pub fn n_vertices(&self) -> u32 {
        if self.stride == 0 {
            0
        } else {
            (self.raw.len() / self.stride as usize) as u32
        }
    }
}

/// Size and formats of the framebuffer a script renders to
#[derive(Debug, Clone)]
pub struct WindowFormat {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Color attachment format
    pub color_format: &'static Format,
    /// Optional depth/stencil attachment format
    pub depth_stencil_format: Option<&'static Format>,
}

impl Default for WindowFormat {
    fn default() -> Self {
        Self {
            width: 250,
            height: 250,
            color_format: Format::default_color(),
            depth_stencil_format: None,
        }
    }
}

impl PartialEq for WindowFormat {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.color_format.vk_format == other.color_format.vk_format
            && self.depth_stencil_format.map(|f| f.vk_format)
                == other.depth_stencil_format.map(|f| f.vk_format)
    }
}

/// The parsed, immutable representation of one test script
#[derive(Debug)]
pub struct Script {
    pub(crate) filename: String,
    pub(crate) stages: [Vec<Shader>; N_STAGES],
    pub(crate) pipeline_keys: Vec<PipelineKey>,
    pub(crate) commands: Vec<Command>,
    pub(crate) buffers: Vec<BufferDescriptor>,
    pub(crate) vertex_data: Option<VertexData>,
    pub(crate) indices: Vec<u16>,
    pub(crate) window_format: WindowFormat,
    pub(crate) requirements: Requirements,
}

impl Script {
    /// Provenance of the script (file path or a synthetic name)
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Shaders attached to `stage`, in declaration order
    pub fn shaders_for(&self, stage: ShaderStage) -> &[Shader] {
        &self.stages[stage as usize]
    }

    /// Whether any stage has at least one shader
    pub fn has_shaders(&self) -> bool {
        self.stages.iter().any(|s| !s.is_empty())
    }

    /// The deduplicated pipeline key table
    pub fn pipeline_keys(&self) -> &[PipelineKey] {
        &self.pipeline_keys
    }

    /// The key at `index`; indices are stable for the script's lifetime
    pub fn pipeline_key(&self, index: usize) -> &PipelineKey {
        &self.pipeline_keys[index]
    }

    /// The command sequence in program order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Declared buffers, sorted by (descriptor set, binding)
    pub fn buffers(&self) -> &[BufferDescriptor] {
        &self.buffers
    }

    /// The `[vertex data]` section, if present
    pub fn vertex_data(&self) -> Option<&VertexData> {
        self.vertex_data.as_ref()
    }

    /// The `[indices]` section contents
    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    /// The framebuffer the script renders to
    pub fn window_format(&self) -> &WindowFormat {
        &self.window_format
    }

    /// Device features and extensions the script demands
    pub fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    /// Smallest push-constant range covering every `uniform` command
    pub fn push_constant_size(&self) -> usize {
        self.commands
            .iter()
            .filter_map(|c| match &c.op {
                CommandOp::SetPushConstant { offset, data } => Some(offset + data.len()),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }
}
