//! Vulkan context, memory, and framebuffer management
//!
//! Everything here is per-context state: one loader entry, one instance
//! function table, and one device function table owned by the
//! [`Context`], with no process-global state. The [`Window`] is the
//! offscreen framebuffer scripts render into, and the allocator handles
//! the memory-type selection and flush/invalidate rules the execution
//! engine relies on.

pub mod allocator;
pub mod context;
pub mod window;

pub use allocator::{BufferBlock, DeviceBuffer};
pub use context::{Context, ExternalDevice, VulkanError, VulkanResult};
pub use window::Window;
