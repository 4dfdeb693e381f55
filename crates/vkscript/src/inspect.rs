//! Final-state inspection data passed to the inspect callback

use crate::format::Format;
use crate::script::BufferKind;

/// Contents of one test buffer after the command sequence completed
pub struct InspectBuffer {
    /// Whether the buffer was declared as a UBO or SSBO
    pub kind: BufferKind,
    /// Descriptor set the buffer is bound to
    pub desc_set: u32,
    /// Binding number within the set
    pub binding: u32,
    /// Element within the binding's descriptor array
    pub array_index: u32,
    /// Final bytes of the buffer
    pub data: Vec<u8>,
}

/// Snapshot of the framebuffer and every buffer at the end of a script
pub struct InspectData {
    /// Framebuffer width in pixels
    pub width: u32,
    /// Framebuffer height in pixels
    pub height: u32,
    /// Bytes between the starts of consecutive rows in `pixels`
    pub stride: usize,
    /// Color attachment format
    pub format: &'static Format,
    /// Raw framebuffer contents, `height` rows of `stride` bytes
    pub pixels: Vec<u8>,
    /// Final contents of every declared buffer
    pub buffers: Vec<InspectBuffer>,
}
