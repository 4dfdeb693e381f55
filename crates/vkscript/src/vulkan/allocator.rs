//! Buffer and image memory management
//!
//! Test buffers are small and short-lived, so every buffer a run needs
//! is packed into one allocation: per-buffer offsets honor both the
//! buffer's own alignment requirement and `bufferImageGranularity`, the
//! memory type is the lowest set bit of the ANDed type masks that
//! carries the requested property flags, and the whole allocation stays
//! persistently mapped. Flush/invalidate are no-ops on host-coherent
//! memory and whole-allocation ranges otherwise.

use ash::{vk, Device};

use crate::vulkan::context::{Context, VulkanError, VulkanResult};

/// Select a memory type for `type_bits` carrying `flags`
///
/// Scans from the lowest set bit upward and returns the first matching
/// index.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    for i in 0..memory_properties.memory_type_count {
        if (type_bits & (1 << i)) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(flags)
        {
            return Ok(i);
        }
    }
    Err(VulkanError::NoSuitableMemoryType)
}

fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Size and usage of one buffer in a [`BufferBlock`]
#[derive(Debug, Clone, Copy)]
pub struct BufferSpec {
    /// Buffer size in bytes
    pub size: usize,
    /// Usage flags for the buffer
    pub usage: vk::BufferUsageFlags,
}

/// Several buffers backed by a single mapped allocation
pub struct BufferBlock {
    device: Device,
    memory: vk::DeviceMemory,
    buffers: Vec<vk::Buffer>,
    offsets: Vec<vk::DeviceSize>,
    sizes: Vec<usize>,
    mapped: *mut u8,
    coherent: bool,
}

impl BufferBlock {
    /// Create and bind every buffer in `specs`, allocating once
    ///
    /// The memory type must carry `HOST_VISIBLE` in addition to
    /// `extra_flags`; the allocation is mapped for the block's lifetime.
    pub fn new(
        context: &Context,
        specs: &[BufferSpec],
        extra_flags: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let device = context.device().clone();
        let granularity = context.limits().buffer_image_granularity.max(1);

        let mut buffers = Vec::with_capacity(specs.len());
        let mut offsets = Vec::with_capacity(specs.len());
        let mut type_bits = !0u32;
        let mut total: vk::DeviceSize = 0;

        for spec in specs {
            let info = vk::BufferCreateInfo::builder()
                .size(spec.size.max(1) as vk::DeviceSize)
                .usage(spec.usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            let buffer = match unsafe { device.create_buffer(&info, None) } {
                Ok(buffer) => buffer,
                Err(e) => {
                    Self::destroy_partial(&device, &buffers);
                    return Err(VulkanError::Api(e));
                }
            };
            let reqs = unsafe { device.get_buffer_memory_requirements(buffer) };
            let offset = align_up(total, reqs.alignment.max(granularity));
            total = offset + reqs.size;
            type_bits &= reqs.memory_type_bits;
            buffers.push(buffer);
            offsets.push(offset);
        }

        let flags = vk::MemoryPropertyFlags::HOST_VISIBLE | extra_flags;
        let memory_type_index =
            match find_memory_type(context.memory_properties(), type_bits, flags) {
                Ok(index) => index,
                Err(e) => {
                    Self::destroy_partial(&device, &buffers);
                    return Err(e);
                }
            };
        let coherent = context.memory_properties().memory_types
            [memory_type_index as usize]
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(total.max(1))
            .memory_type_index(memory_type_index);
        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                Self::destroy_partial(&device, &buffers);
                return Err(VulkanError::Api(e));
            }
        };

        for (buffer, offset) in buffers.iter().zip(&offsets) {
            if let Err(e) = unsafe { device.bind_buffer_memory(*buffer, memory, *offset) } {
                Self::destroy_partial(&device, &buffers);
                unsafe { device.free_memory(memory, None) };
                return Err(VulkanError::Api(e));
            }
        }

        let mapped = match unsafe {
            device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        } {
            Ok(ptr) => ptr.cast::<u8>(),
            Err(e) => {
                Self::destroy_partial(&device, &buffers);
                unsafe { device.free_memory(memory, None) };
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            device,
            memory,
            buffers,
            offsets,
            sizes: specs.iter().map(|s| s.size).collect(),
            mapped,
            coherent,
        })
    }

    fn destroy_partial(device: &Device, buffers: &[vk::Buffer]) {
        for buffer in buffers {
            unsafe { device.destroy_buffer(*buffer, None) };
        }
    }

    /// Number of buffers in the block
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the block holds no buffers
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Handle of buffer `index`
    pub fn buffer(&self, index: usize) -> vk::Buffer {
        self.buffers[index]
    }

    /// Size of buffer `index` in bytes
    pub fn size(&self, index: usize) -> usize {
        self.sizes[index]
    }

    /// Copy `data` into buffer `index` starting at `offset`
    pub fn write(&self, index: usize, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.sizes[index]);
        unsafe {
            let dst = self.mapped.add(self.offsets[index] as usize + offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
    }

    /// The mapped contents of buffer `index`
    pub fn read(&self, index: usize) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(
                self.mapped.add(self.offsets[index] as usize),
                self.sizes[index],
            )
        }
    }

    /// Make host writes visible to the device; no-op on coherent memory
    pub fn flush(&self) -> VulkanResult<()> {
        if self.coherent {
            return Ok(());
        }
        let range = vk::MappedMemoryRange::builder()
            .memory(self.memory)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build();
        unsafe {
            self.device
                .flush_mapped_memory_ranges(&[range])
                .map_err(VulkanError::Api)
        }
    }

    /// Make device writes visible to the host; no-op on coherent memory
    pub fn invalidate(&self) -> VulkanResult<()> {
        if self.coherent {
            return Ok(());
        }
        let range = vk::MappedMemoryRange::builder()
            .memory(self.memory)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build();
        unsafe {
            self.device
                .invalidate_mapped_memory_ranges(&[range])
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for BufferBlock {
    fn drop(&mut self) {
        unsafe {
            self.device.unmap_memory(self.memory);
            for buffer in &self.buffers {
                self.device.destroy_buffer(*buffer, None);
            }
            self.device.free_memory(self.memory, None);
        }
    }
}

/// A single host-visible buffer with its own allocation
pub struct DeviceBuffer {
    block: BufferBlock,
}

impl DeviceBuffer {
    /// Create a mapped buffer of `size` bytes
    pub fn new(
        context: &Context,
        size: usize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let block = BufferBlock::new(
            context,
            &[BufferSpec { size, usage }],
            vk::MemoryPropertyFlags::empty(),
        )?;
        Ok(Self { block })
    }

    /// Create a mapped buffer filled with `data`
    pub fn with_data(
        context: &Context,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let buffer = Self::new(context, data.len(), usage)?;
        buffer.block.write(0, 0, data);
        buffer.block.flush()?;
        Ok(buffer)
    }

    /// The buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.block.buffer(0)
    }

    /// The mapped contents
    pub fn read(&self) -> &[u8] {
        self.block.read(0)
    }

    /// Make device writes visible to the host
    pub fn invalidate(&self) -> VulkanResult<()> {
        self.block.invalidate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &property_flags) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = property_flags;
        }
        props
    }

    #[test]
    fn test_find_memory_type_scans_low_bits_first() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        let index =
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_find_memory_type_respects_type_bits() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        let index =
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(index, 1);
        assert!(find_memory_type(&props, 0b100, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
    }
}

/// Bind `images` to a single new device-local allocation
///
/// Offsets honor each image's alignment requirement and
/// `bufferImageGranularity`. Returns the memory; the caller frees it
/// after destroying the images.
pub fn allocate_image_memory(
    context: &Context,
    images: &[vk::Image],
) -> VulkanResult<vk::DeviceMemory> {
    let device = context.device();
    let granularity = context.limits().buffer_image_granularity.max(1);

    let mut offsets = Vec::with_capacity(images.len());
    let mut type_bits = !0u32;
    let mut total: vk::DeviceSize = 0;
    for image in images {
        let reqs = unsafe { device.get_image_memory_requirements(*image) };
        let offset = align_up(total, reqs.alignment.max(granularity));
        total = offset + reqs.size;
        type_bits &= reqs.memory_type_bits;
        offsets.push(offset);
    }

    let memory_type_index = find_memory_type(
        context.memory_properties(),
        type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(total.max(1))
        .memory_type_index(memory_type_index);
    let memory = unsafe {
        device
            .allocate_memory(&alloc_info, None)
            .map_err(VulkanError::Api)?
    };

    for (image, offset) in images.iter().zip(&offsets) {
        if let Err(e) = unsafe { device.bind_image_memory(*image, memory, *offset) } {
            unsafe { device.free_memory(memory, None) };
            return Err(VulkanError::Api(e));
        }
    }
    Ok(memory)
}
