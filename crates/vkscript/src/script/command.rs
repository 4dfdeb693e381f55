//! The imperative commands of a `[test]` section
//!
//! Each line of the `[test]` section either mutates parser state or
//! appends one [`Command`]. The execution engine dispatches over the
//! [`CommandOp`] sum type; every variant owns its payload.

use crate::layout::Tolerance;
use crate::script::BufferKind;

/// Comparison operator of a `probe ssbo` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsboCompare {
    /// `==`
    Equal,
    /// `~=` (tolerance-based)
    FuzzyEqual,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `>=`
    GreaterEqual,
    /// `>`
    Greater,
    /// `<=`
    LessEqual,
}

impl SsboCompare {
    /// Parse the operator token of a `probe ssbo` command
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "==" => Some(Self::Equal),
            "~=" => Some(Self::FuzzyEqual),
            "!=" => Some(Self::NotEqual),
            "<" => Some(Self::Less),
            ">=" => Some(Self::GreaterEqual),
            ">" => Some(Self::Greater),
            "<=" => Some(Self::LessEqual),
            _ => None,
        }
    }

    /// The operator's spelling, for diagnostics
    pub fn token(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::FuzzyEqual => "~=",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::GreaterEqual => ">=",
            Self::Greater => ">",
            Self::LessEqual => "<=",
        }
    }
}

/// One executable command
#[derive(Debug, Clone)]
pub struct Command {
    /// Line the command's first token appeared on, for diagnostics
    pub line_num: usize,
    /// The operation to perform
    pub op: CommandOp,
}

/// The operation of one command
#[derive(Debug, Clone)]
pub enum CommandOp {
    /// Draw a screen-space rectangle with the implicit vertex buffer
    DrawRect {
        /// Index into the script's pipeline key table
        key_index: usize,
        /// Left edge in NDC
        x: f32,
        /// Top edge in NDC
        y: f32,
        /// Width in NDC
        w: f32,
        /// Height in NDC
        h: f32,
    },
    /// Draw from the `[vertex data]` section
    DrawArrays {
        /// Index into the script's pipeline key table
        key_index: usize,
        /// Use the `[indices]` section
        indexed: bool,
        /// First vertex (or index) to draw
        first_vertex: u32,
        /// Number of vertices (or indices) to draw
        vertex_count: u32,
        /// Number of instances
        instance_count: u32,
    },
    /// Dispatch the compute pipeline
    DispatchCompute {
        /// Index into the script's pipeline key table
        key_index: usize,
        /// Workgroup counts
        x: u32,
        /// Workgroup counts
        y: u32,
        /// Workgroup counts
        z: u32,
    },
    /// Compare a rectangle of the color attachment against a color
    ProbeRect {
        /// 3 for `rgb`, 4 for `rgba`; the framebuffer read is always
        /// format-sized
        n_components: u32,
        /// Left edge in pixels
        x: u32,
        /// Top edge in pixels
        y: u32,
        /// Width in pixels
        w: u32,
        /// Height in pixels
        h: u32,
        /// Expected channel values
        expected: [f64; 4],
        /// Tolerance active when the probe was parsed
        tolerance: Tolerance,
    },
    /// Compare stored elements of an SSBO
    ProbeSsbo {
        /// Descriptor set of the buffer
        desc_set: u32,
        /// Binding of the buffer
        binding: u32,
        /// Element within the binding's descriptor array
        array_index: u32,
        /// Comparison operator
        comparison: SsboCompare,
        /// Byte offset of the first element
        offset: usize,
        /// Element type
        ty: crate::layout::DataType,
        /// Layout the expected bytes were packed with
        layout: crate::layout::Layout,
        /// Expected elements, laid out like the buffer contents
        expected: Vec<u8>,
        /// Number of elements in `expected`
        n_elements: usize,
        /// Tolerance active when the probe was parsed
        tolerance: Tolerance,
    },
    /// Write bytes into a UBO or SSBO
    SetBufferSubdata {
        /// UBO or SSBO
        kind: BufferKind,
        /// Descriptor set of the buffer
        desc_set: u32,
        /// Binding of the buffer
        binding: u32,
        /// Element within the binding's descriptor array
        array_index: u32,
        /// Byte offset of the write
        offset: usize,
        /// Laid-out bytes to write
        data: Vec<u8>,
    },
    /// Update a push-constant range
    SetPushConstant {
        /// Byte offset of the write
        offset: usize,
        /// Laid-out bytes to write
        data: Vec<u8>,
    },
    /// Clear the framebuffer with the recorded clear values
    Clear {
        /// Color clear value
        color: [f32; 4],
        /// Depth clear value
        depth: f32,
        /// Stencil clear value
        stencil: u32,
    },
}
