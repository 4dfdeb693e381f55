//! Offscreen framebuffer management
//!
//! Scripts render into an offscreen color attachment (plus an optional
//! depth/stencil attachment) rather than an OS window. Two render
//! passes are pre-built per window, differing only in load op and
//! initial layout: the first render of a script may discard whatever
//! the attachment held, while every later render must load the existing
//! contents so draws accumulate across probes.

use ash::{vk, Device};

use crate::format::{Channel, Format};
use crate::script::WindowFormat;
use crate::vulkan::allocator::{allocate_image_memory, DeviceBuffer};
use crate::vulkan::context::{Context, VulkanError, VulkanResult};

/// Aspect flags covered by a depth/stencil format
pub fn depth_stencil_aspect(format: &Format) -> vk::ImageAspectFlags {
    let mut aspect = vk::ImageAspectFlags::empty();
    for part in format.parts {
        match part.channel {
            Channel::D => aspect |= vk::ImageAspectFlags::DEPTH,
            Channel::S => aspect |= vk::ImageAspectFlags::STENCIL,
            _ => {}
        }
    }
    aspect
}

/// The framebuffer resources for one window format
pub struct Window {
    device: Device,
    format: WindowFormat,
    color_image: vk::Image,
    color_view: vk::ImageView,
    depth_image: Option<vk::Image>,
    depth_view: Option<vk::ImageView>,
    image_memory: vk::DeviceMemory,
    render_pass_first: vk::RenderPass,
    render_pass_load: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    readback: DeviceBuffer,
}

impl Window {
    /// Create the framebuffer for `format`
    ///
    /// Fails with [`VulkanError::UnsupportedFormat`] when the device
    /// cannot render to the requested formats; the executor turns that
    /// into a skip.
    pub fn new(context: &Context, format: &WindowFormat) -> VulkanResult<Self> {
        Self::check_format_support(context, format)?;

        let device = context.device().clone();

        let color_image = Self::create_image(
            &device,
            format,
            format.color_format.vk_format,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
        )?;

        let depth_image = match format.depth_stencil_format {
            Some(ds) => {
                match Self::create_image(
                    &device,
                    format,
                    ds.vk_format,
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                        | vk::ImageUsageFlags::TRANSFER_DST,
                ) {
                    Ok(image) => Some(image),
                    Err(e) => {
                        unsafe { device.destroy_image(color_image, None) };
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        let mut images = vec![color_image];
        images.extend(depth_image);
        let image_memory = match allocate_image_memory(context, &images) {
            Ok(memory) => memory,
            Err(e) => {
                for image in images {
                    unsafe { device.destroy_image(image, None) };
                }
                return Err(e);
            }
        };

        // from here on failures are propagated without retrying; the
        // partially built window is torn down by hand
        let built = Self::finish(context, format, color_image, depth_image, image_memory);
        if built.is_err() {
            unsafe {
                for image in [Some(color_image), depth_image].into_iter().flatten() {
                    device.destroy_image(image, None);
                }
                device.free_memory(image_memory, None);
            }
        }
        built
    }

    fn finish(
        context: &Context,
        format: &WindowFormat,
        color_image: vk::Image,
        depth_image: Option<vk::Image>,
        image_memory: vk::DeviceMemory,
    ) -> VulkanResult<Self> {
        let device = context.device().clone();

        let color_view = Self::create_view(
            &device,
            color_image,
            format.color_format.vk_format,
            vk::ImageAspectFlags::COLOR,
        )?;
        let depth_view = match (depth_image, format.depth_stencil_format) {
            (Some(image), Some(ds)) => {
                let view = Self::create_view(
                    &device,
                    image,
                    ds.vk_format,
                    depth_stencil_aspect(ds),
                );
                match view {
                    Ok(view) => Some(view),
                    Err(e) => {
                        unsafe { device.destroy_image_view(color_view, None) };
                        return Err(e);
                    }
                }
            }
            _ => None,
        };

        let render_pass_first = Self::create_render_pass(&device, format, true)?;
        let render_pass_load = Self::create_render_pass(&device, format, false)?;

        let mut attachments = vec![color_view];
        attachments.extend(depth_view);
        let fb_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass_first)
            .attachments(&attachments)
            .width(format.width)
            .height(format.height)
            .layers(1);
        let framebuffer = unsafe {
            device
                .create_framebuffer(&fb_info, None)
                .map_err(VulkanError::Api)?
        };

        let readback_size =
            format.width as usize * format.height as usize * format.color_format.size();
        let readback =
            DeviceBuffer::new(context, readback_size, vk::BufferUsageFlags::TRANSFER_DST)?;

        Ok(Self {
            device,
            format: format.clone(),
            color_image,
            color_view,
            depth_image,
            depth_view,
            image_memory,
            render_pass_first,
            render_pass_load,
            framebuffer,
            readback,
        })
    }

    fn check_format_support(context: &Context, format: &WindowFormat) -> VulkanResult<()> {
        let color_props = unsafe {
            context.instance().get_physical_device_format_properties(
                context.physical_device(),
                format.color_format.vk_format,
            )
        };
        let needed =
            vk::FormatFeatureFlags::COLOR_ATTACHMENT | vk::FormatFeatureFlags::BLIT_SRC;
        if !color_props.optimal_tiling_features.contains(needed) {
            return Err(VulkanError::UnsupportedFormat(
                format.color_format.name.to_owned(),
            ));
        }
        if let Some(ds) = format.depth_stencil_format {
            let ds_props = unsafe {
                context.instance().get_physical_device_format_properties(
                    context.physical_device(),
                    ds.vk_format,
                )
            };
            if !ds_props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            {
                return Err(VulkanError::UnsupportedFormat(ds.name.to_owned()));
            }
        }
        Ok(())
    }

    fn create_image(
        device: &Device,
        format: &WindowFormat,
        vk_format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> VulkanResult<vk::Image> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format)
            .extent(vk::Extent3D {
                width: format.width,
                height: format.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        unsafe { device.create_image(&info, None).map_err(VulkanError::Api) }
    }

    fn create_view(
        device: &Device,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build(),
            );
        unsafe {
            device
                .create_image_view(&info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn create_render_pass(
        device: &Device,
        format: &WindowFormat,
        first: bool,
    ) -> VulkanResult<vk::RenderPass> {
        let (load_op, color_initial, ds_initial) = if first {
            (
                vk::AttachmentLoadOp::DONT_CARE,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::UNDEFINED,
            )
        } else {
            (
                vk::AttachmentLoadOp::LOAD,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )
        };

        let mut attachments = vec![vk::AttachmentDescription::builder()
            .format(format.color_format.vk_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(color_initial)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()];
        if let Some(ds) = format.depth_stencil_format {
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(ds.vk_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(load_op)
                    .stencil_store_op(vk::AttachmentStoreOp::STORE)
                    .initial_layout(ds_initial)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build(),
            );
        }

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if format.depth_stencil_format.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass.build()];

        // serialize attachment writes against the transfer reads the
        // probe readback performs before and after the pass
        let dependencies = [
            vk::SubpassDependency::builder()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::TRANSFER)
                .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .build(),
            vk::SubpassDependency::builder()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                .build(),
        ];

        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        unsafe {
            device
                .create_render_pass(&info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// The window format this framebuffer was built for
    pub fn format(&self) -> &WindowFormat {
        &self.format
    }

    /// The color attachment image
    pub fn color_image(&self) -> vk::Image {
        self.color_image
    }

    /// The depth/stencil attachment image, if any
    pub fn depth_image(&self) -> Option<vk::Image> {
        self.depth_image
    }

    /// The framebuffer covering the attachments
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Select the render pass for the next begin
    ///
    /// `first` means nothing has been rendered yet, so the attachments
    /// may be discarded on load.
    pub fn render_pass(&self, first: bool) -> vk::RenderPass {
        if first {
            self.render_pass_first
        } else {
            self.render_pass_load
        }
    }

    /// The host-visible buffer probe readbacks copy into
    pub fn readback(&self) -> &DeviceBuffer {
        &self.readback
    }

    /// Bytes per row in the readback buffer
    pub fn row_stride(&self) -> usize {
        self.format.width as usize * self.format.color_format.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_stencil_aspects() {
        let depth = Format::lookup_by_name("D32_SFLOAT").unwrap();
        assert_eq!(depth_stencil_aspect(depth), vk::ImageAspectFlags::DEPTH);

        let stencil = Format::lookup_by_name("S8_UINT").unwrap();
        assert_eq!(depth_stencil_aspect(stencil), vk::ImageAspectFlags::STENCIL);

        let both = Format::lookup_by_name("D24_UNORM_S8_UINT").unwrap();
        assert_eq!(
            depth_stencil_aspect(both),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
            self.device.destroy_render_pass(self.render_pass_first, None);
            self.device.destroy_render_pass(self.render_pass_load, None);
            if let Some(view) = self.depth_view {
                self.device.destroy_image_view(view, None);
            }
            self.device.destroy_image_view(self.color_view, None);
            if let Some(image) = self.depth_image {
                self.device.destroy_image(image, None);
            }
            self.device.destroy_image(self.color_image, None);
            self.device.free_memory(self.image_memory, None);
        }
    }
}
