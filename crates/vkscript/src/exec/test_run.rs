//! The per-script command interpreter
//!
//! A [`TestRun`] owns everything that lives only while one script
//! executes: the UBO/SSBO backing memory, descriptor sets, vertex and
//! index buffers, and the per-command scratch buffers. It drives the
//! render-pass state machine — draws open a pass, probes and dispatches
//! close it, and the next begin loads the existing attachment contents —
//! and records every command into the context's single command buffer,
//! synchronizing with a fence whenever the host needs to observe device
//! writes.
//!
//! Probe mismatches are reported and recorded but never abort the run:
//! the command loop continues so every mismatch in the script is
//! diagnosed.

use ash::vk;

use crate::config::Config;
use crate::format::{Format, FormatMode};
use crate::inspect::{InspectBuffer, InspectData};
use crate::pipeline::PipelineSet;
use crate::ppm;
use crate::script::{BufferKind, Command, CommandOp, Script, SsboCompare};
use crate::vulkan::allocator::BufferSpec;
use crate::vulkan::window::depth_stencil_aspect;
use crate::vulkan::{BufferBlock, Context, DeviceBuffer, VulkanResult, Window};

/// Interpreter state for one script execution
pub struct TestRun<'a> {
    context: &'a Context,
    window: &'a Window,
    script: &'a Script,
    pipelines: &'a PipelineSet,
    config: &'a mut Config,

    buffers: Option<BufferBlock>,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    vertex_buffer: Option<DeviceBuffer>,
    index_buffer: Option<DeviceBuffer>,
    scratch: Vec<DeviceBuffer>,

    recording: bool,
    in_render_pass: bool,
    rendered: bool,
    push_data: Vec<u8>,
    push_dirty: bool,
    bound_pipeline: Option<usize>,
    graphics_sets_bound: bool,
    compute_sets_bound: bool,
    failed: bool,
}

impl<'a> TestRun<'a> {
    /// Allocate the per-run resources for `script`
    pub fn new(
        context: &'a Context,
        window: &'a Window,
        script: &'a Script,
        pipelines: &'a PipelineSet,
        config: &'a mut Config,
    ) -> VulkanResult<Self> {
        let mut run = Self {
            context,
            window,
            script,
            pipelines,
            config,
            buffers: None,
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
            vertex_buffer: None,
            index_buffer: None,
            scratch: Vec::new(),
            recording: false,
            in_render_pass: false,
            rendered: false,
            push_data: Vec::new(),
            push_dirty: false,
            bound_pipeline: None,
            graphics_sets_bound: false,
            compute_sets_bound: false,
            failed: false,
        };
        run.create_buffers()?;
        run.create_descriptor_sets()?;
        run.create_vertex_buffers()?;
        Ok(run)
    }

    fn create_buffers(&mut self) -> VulkanResult<()> {
        if self.script.buffers().is_empty() {
            return Ok(());
        }
        let specs: Vec<BufferSpec> = self
            .script
            .buffers()
            .iter()
            .map(|b| BufferSpec {
                size: b.size.max(1),
                usage: match b.kind {
                    BufferKind::Ubo => vk::BufferUsageFlags::UNIFORM_BUFFER,
                    BufferKind::Ssbo => vk::BufferUsageFlags::STORAGE_BUFFER,
                },
            })
            .collect();
        self.buffers = Some(BufferBlock::new(
            self.context,
            &specs,
            vk::MemoryPropertyFlags::empty(),
        )?);
        Ok(())
    }

    fn create_descriptor_sets(&mut self) -> VulkanResult<()> {
        let layouts = self.pipelines.set_layouts();
        if layouts.is_empty() {
            return Ok(());
        }
        let device = self.context.device();

        let mut n_ubos = 0u32;
        let mut n_ssbos = 0u32;
        for buffer in self.script.buffers() {
            match buffer.kind {
                BufferKind::Ubo => n_ubos += buffer.array_index + 1,
                BufferKind::Ssbo => n_ssbos += buffer.array_index + 1,
            }
        }
        let mut pool_sizes = Vec::new();
        if n_ubos > 0 {
            pool_sizes.push(
                vk::DescriptorPoolSize::builder()
                    .ty(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(n_ubos)
                    .build(),
            );
        }
        if n_ssbos > 0 {
            pool_sizes.push(
                vk::DescriptorPoolSize::builder()
                    .ty(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(n_ssbos)
                    .build(),
            );
        }
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(layouts.len() as u32)
            .pool_sizes(&pool_sizes);
        self.descriptor_pool = unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(crate::vulkan::VulkanError::Api)?
        };

        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(layouts);
        self.descriptor_sets = unsafe {
            device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(crate::vulkan::VulkanError::Api)?
        };

        let Some(block) = self.buffers.as_ref() else {
            return Ok(());
        };
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = (0..block.len())
            .map(|i| {
                vk::DescriptorBufferInfo::builder()
                    .buffer(block.buffer(i))
                    .offset(0)
                    .range(vk::WHOLE_SIZE)
                    .build()
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = self
            .script
            .buffers()
            .iter()
            .enumerate()
            .map(|(i, buffer)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(self.descriptor_sets[buffer.desc_set as usize])
                    .dst_binding(buffer.binding)
                    .dst_array_element(buffer.array_index)
                    .descriptor_type(buffer.kind.descriptor_type())
                    .buffer_info(std::slice::from_ref(&buffer_infos[i]))
                    .build()
            })
            .collect();
        unsafe { device.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    fn create_vertex_buffers(&mut self) -> VulkanResult<()> {
        if let Some(data) = self.script.vertex_data() {
            if !data.raw.is_empty() {
                self.vertex_buffer = Some(DeviceBuffer::with_data(
                    self.context,
                    &data.raw,
                    vk::BufferUsageFlags::VERTEX_BUFFER,
                )?);
            }
        }
        if !self.script.indices().is_empty() {
            self.index_buffer = Some(DeviceBuffer::with_data(
                self.context,
                bytemuck::cast_slice(self.script.indices()),
                vk::BufferUsageFlags::INDEX_BUFFER,
            )?);
        }
        Ok(())
    }

    /// Execute every command, then deliver the final framebuffer and
    /// buffer contents. Returns whether every probe matched.
    pub fn run(mut self) -> VulkanResult<bool> {
        let commands = self.script.commands();
        for command in commands {
            self.execute(command)?;
        }
        self.finalize()?;
        Ok(!self.failed)
    }

    fn execute(&mut self, command: &Command) -> VulkanResult<()> {
        match &command.op {
            CommandOp::Clear { color, depth, stencil } => {
                self.clear(*color, *depth, *stencil)
            }
            CommandOp::SetPushConstant { offset, data } => {
                if self.push_data.len() < offset + data.len() {
                    self.push_data.resize(offset + data.len(), 0);
                }
                self.push_data[*offset..offset + data.len()].copy_from_slice(data);
                self.push_dirty = true;
                Ok(())
            }
            CommandOp::SetBufferSubdata {
                kind,
                desc_set,
                binding,
                array_index,
                offset,
                data,
            } => {
                let Some(index) = self.find_buffer(*kind, *desc_set, *binding, *array_index)
                else {
                    self.report(command.line_num, "write to an undeclared buffer");
                    return Ok(());
                };
                if let Some(block) = &self.buffers {
                    block.write(index, *offset, data);
                    block.flush()?;
                }
                Ok(())
            }
            CommandOp::DrawRect { key_index, x, y, w, h } => {
                self.draw_rect(*key_index, *x, *y, *w, *h)
            }
            CommandOp::DrawArrays {
                key_index,
                indexed,
                first_vertex,
                vertex_count,
                instance_count,
            } => self.draw_arrays(
                command.line_num,
                *key_index,
                *indexed,
                *first_vertex,
                *vertex_count,
                *instance_count,
            ),
            CommandOp::DispatchCompute { key_index, x, y, z } => {
                self.dispatch(*key_index, *x, *y, *z)
            }
            CommandOp::ProbeRect {
                n_components,
                x,
                y,
                w,
                h,
                expected,
                tolerance,
            } => self.probe_rect(*n_components, *x, *y, *w, *h, expected, tolerance),
            CommandOp::ProbeSsbo {
                desc_set,
                binding,
                array_index,
                comparison,
                offset,
                ty,
                layout,
                expected,
                n_elements,
                tolerance,
            } => self.probe_ssbo(
                command.line_num,
                *desc_set,
                *binding,
                *array_index,
                *comparison,
                *offset,
                *ty,
                *layout,
                expected,
                *n_elements,
                tolerance,
            ),
        }
    }

    fn find_buffer(
        &self,
        kind: BufferKind,
        desc_set: u32,
        binding: u32,
        array_index: u32,
    ) -> Option<usize> {
        self.script.buffers().iter().position(|b| {
            b.kind == kind
                && b.desc_set == desc_set
                && b.binding == binding
                && b.array_index == array_index
        })
    }

    // ----- recording state machine -----

    fn begin_recording(&mut self) -> VulkanResult<()> {
        if self.recording {
            return Ok(());
        }
        let info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            self.context
                .device()
                .begin_command_buffer(self.context.command_buffer(), &info)
                .map_err(crate::vulkan::VulkanError::Api)?;
        }
        self.recording = true;
        Ok(())
    }

    fn begin_render_pass(&mut self) -> VulkanResult<()> {
        if self.in_render_pass {
            return Ok(());
        }
        self.begin_recording()?;
        let format = self.window.format();
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.window.render_pass(!self.rendered))
            .framebuffer(self.window.framebuffer())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: format.width,
                    height: format.height,
                },
            });
        unsafe {
            self.context.device().cmd_begin_render_pass(
                self.context.command_buffer(),
                &info,
                vk::SubpassContents::INLINE,
            );
        }
        self.in_render_pass = true;
        self.rendered = true;
        Ok(())
    }

    fn end_render_pass(&mut self) {
        if self.in_render_pass {
            unsafe {
                self.context
                    .device()
                    .cmd_end_render_pass(self.context.command_buffer());
            }
            self.in_render_pass = false;
        }
    }

    fn submit_and_wait(&mut self) -> VulkanResult<()> {
        self.end_render_pass();
        if !self.recording {
            return Ok(());
        }
        let device = self.context.device();
        let command_buffers = [self.context.command_buffer()];
        unsafe {
            device
                .end_command_buffer(command_buffers[0])
                .map_err(crate::vulkan::VulkanError::Api)?;
            let submit = vk::SubmitInfo::builder()
                .command_buffers(&command_buffers)
                .build();
            device
                .queue_submit(self.context.queue(), &[submit], self.context.fence())
                .map_err(crate::vulkan::VulkanError::Api)?;
            device
                .wait_for_fences(&[self.context.fence()], true, u64::MAX)
                .map_err(crate::vulkan::VulkanError::Api)?;
            device
                .reset_fences(&[self.context.fence()])
                .map_err(crate::vulkan::VulkanError::Api)?;
        }
        self.recording = false;
        self.bound_pipeline = None;
        self.graphics_sets_bound = false;
        self.compute_sets_bound = false;
        self.push_dirty = !self.push_data.is_empty();
        Ok(())
    }

    fn flush_push_constants(&mut self) {
        if !self.push_dirty || self.push_data.is_empty() {
            return;
        }
        unsafe {
            self.context.device().cmd_push_constants(
                self.context.command_buffer(),
                self.pipelines.layout(),
                self.pipelines.stage_flags(),
                0,
                &self.push_data,
            );
        }
        self.push_dirty = false;
    }

    fn flush_graphics_state(&mut self, key_index: usize) -> VulkanResult<()> {
        self.begin_render_pass()?;
        let device = self.context.device();
        let cb = self.context.command_buffer();
        if self.bound_pipeline != Some(key_index) {
            unsafe {
                device.cmd_bind_pipeline(
                    cb,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipelines.pipeline(key_index),
                );
            }
            self.bound_pipeline = Some(key_index);
        }
        if !self.graphics_sets_bound && !self.descriptor_sets.is_empty() {
            unsafe {
                device.cmd_bind_descriptor_sets(
                    cb,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipelines.layout(),
                    0,
                    &self.descriptor_sets,
                    &[],
                );
            }
            self.graphics_sets_bound = true;
        }
        self.flush_push_constants();
        Ok(())
    }

    fn flush_compute_state(&mut self, key_index: usize) -> VulkanResult<()> {
        self.end_render_pass();
        self.begin_recording()?;
        let device = self.context.device();
        let cb = self.context.command_buffer();
        if self.bound_pipeline != Some(key_index) {
            unsafe {
                device.cmd_bind_pipeline(
                    cb,
                    vk::PipelineBindPoint::COMPUTE,
                    self.pipelines.pipeline(key_index),
                );
            }
            self.bound_pipeline = Some(key_index);
        }
        if !self.compute_sets_bound && !self.descriptor_sets.is_empty() {
            unsafe {
                device.cmd_bind_descriptor_sets(
                    cb,
                    vk::PipelineBindPoint::COMPUTE,
                    self.pipelines.layout(),
                    0,
                    &self.descriptor_sets,
                    &[],
                );
            }
            self.compute_sets_bound = true;
        }
        self.flush_push_constants();
        Ok(())
    }

    fn image_barrier(
        &self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build(),
            )
            .build();
        unsafe {
            self.context.device().cmd_pipeline_barrier(
                self.context.command_buffer(),
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    // ----- command implementations -----

    fn clear(&mut self, color: [f32; 4], depth: f32, stencil: u32) -> VulkanResult<()> {
        let format = self.window.format();
        if self.in_render_pass {
            let mut clears = vec![vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    color: clear_color_value(format.color_format, color),
                },
            }];
            if let Some(ds) = format.depth_stencil_format {
                clears.push(vk::ClearAttachment {
                    aspect_mask: depth_stencil_aspect(ds),
                    color_attachment: 0,
                    clear_value: vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
                    },
                });
            }
            let rects = [vk::ClearRect {
                rect: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: vk::Extent2D {
                        width: format.width,
                        height: format.height,
                    },
                },
                base_array_layer: 0,
                layer_count: 1,
            }];
            unsafe {
                self.context.device().cmd_clear_attachments(
                    self.context.command_buffer(),
                    &clears,
                    &rects,
                );
            }
            return Ok(());
        }

        // outside a render pass the attachments are cleared at image
        // level through transient transfer transitions
        self.begin_recording()?;
        let color_old = if self.rendered {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::UNDEFINED
        };
        self.image_barrier(
            self.window.color_image(),
            vk::ImageAspectFlags::COLOR,
            color_old,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::TRANSFER,
        );
        let clear_value = clear_color_value(format.color_format, color);
        let range = vk::ImageSubresourceRange::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(1)
            .layer_count(1)
            .build();
        unsafe {
            self.context.device().cmd_clear_color_image(
                self.context.command_buffer(),
                self.window.color_image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value,
                &[range],
            );
        }
        self.image_barrier(
            self.window.color_image(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        );

        if let (Some(image), Some(ds)) = (self.window.depth_image(), format.depth_stencil_format)
        {
            let aspect = depth_stencil_aspect(ds);
            let ds_old = if self.rendered {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::UNDEFINED
            };
            self.image_barrier(
                image,
                aspect,
                ds_old,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                vk::PipelineStageFlags::TRANSFER,
            );
            let ds_range = vk::ImageSubresourceRange::builder()
                .aspect_mask(aspect)
                .level_count(1)
                .layer_count(1)
                .build();
            let ds_value = vk::ClearDepthStencilValue { depth, stencil };
            unsafe {
                self.context.device().cmd_clear_depth_stencil_image(
                    self.context.command_buffer(),
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &ds_value,
                    &[ds_range],
                );
            }
            self.image_barrier(
                image,
                aspect,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            );
        }

        // the attachments now hold defined contents, so the next render
        // pass must load rather than discard them
        self.rendered = true;
        Ok(())
    }

    fn draw_rect(
        &mut self,
        key_index: usize,
        x: f32,
        y: f32,
        w: f32,
        h: f32,
    ) -> VulkanResult<()> {
        // two triangles as a four-vertex strip
        let vertices: [f32; 12] = [
            x,
            y,
            0.0,
            x + w,
            y,
            0.0,
            x,
            y + h,
            0.0,
            x + w,
            y + h,
            0.0,
        ];
        let buffer = DeviceBuffer::with_data(
            self.context,
            bytemuck::cast_slice(&vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        self.flush_graphics_state(key_index)?;
        unsafe {
            let device = self.context.device();
            let cb = self.context.command_buffer();
            device.cmd_bind_vertex_buffers(cb, 0, &[buffer.handle()], &[0]);
            device.cmd_draw(cb, 4, 1, 0, 0);
        }
        self.scratch.push(buffer);
        Ok(())
    }

    fn draw_arrays(
        &mut self,
        line_num: usize,
        key_index: usize,
        indexed: bool,
        first_vertex: u32,
        vertex_count: u32,
        instance_count: u32,
    ) -> VulkanResult<()> {
        let Some(vertex_buffer) = &self.vertex_buffer else {
            self.report(line_num, "draw arrays used without vertex data");
            return Ok(());
        };
        let vertex_handle = vertex_buffer.handle();
        let index_handle = if indexed {
            match &self.index_buffer {
                Some(buffer) => Some(buffer.handle()),
                None => {
                    self.report(line_num, "indexed draw used without an [indices] section");
                    return Ok(());
                }
            }
        } else {
            None
        };

        self.flush_graphics_state(key_index)?;
        unsafe {
            let device = self.context.device();
            let cb = self.context.command_buffer();
            device.cmd_bind_vertex_buffers(cb, 0, &[vertex_handle], &[0]);
            match index_handle {
                Some(handle) => {
                    device.cmd_bind_index_buffer(cb, handle, 0, vk::IndexType::UINT16);
                    device.cmd_draw_indexed(
                        cb,
                        vertex_count,
                        instance_count,
                        first_vertex,
                        0,
                        0,
                    );
                }
                None => device.cmd_draw(cb, vertex_count, instance_count, first_vertex, 0),
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, key_index: usize, x: u32, y: u32, z: u32) -> VulkanResult<()> {
        self.flush_compute_state(key_index)?;
        unsafe {
            self.context
                .device()
                .cmd_dispatch(self.context.command_buffer(), x, y, z);
        }
        Ok(())
    }

    /// Copy the color attachment into the readback buffer and wait for
    /// the copy, leaving the attachment ready for further rendering
    fn read_framebuffer(&mut self) -> VulkanResult<()> {
        self.end_render_pass();
        self.begin_recording()?;

        let old_layout = if self.rendered {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::UNDEFINED
        };
        self.image_barrier(
            self.window.color_image(),
            vk::ImageAspectFlags::COLOR,
            old_layout,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::TRANSFER,
        );

        let format = self.window.format();
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build(),
            )
            .image_extent(vk::Extent3D {
                width: format.width,
                height: format.height,
                depth: 1,
            })
            .build();
        unsafe {
            self.context.device().cmd_copy_image_to_buffer(
                self.context.command_buffer(),
                self.window.color_image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.window.readback().handle(),
                &[region],
            );
            let buffer_barrier = vk::BufferMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(self.window.readback().handle())
                .offset(0)
                .size(vk::WHOLE_SIZE)
                .build();
            self.context.device().cmd_pipeline_barrier(
                self.context.command_buffer(),
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[buffer_barrier],
                &[],
            );
        }
        self.image_barrier(
            self.window.color_image(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::TRANSFER_READ,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        );
        self.rendered = true;

        self.submit_and_wait()?;
        self.window.readback().invalidate()?;
        Ok(())
    }

    fn probe_rect(
        &mut self,
        n_components: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        expected: &[f64; 4],
        tolerance: &crate::layout::Tolerance,
    ) -> VulkanResult<()> {
        self.read_framebuffer()?;

        let format = self.window.format();
        let pixel_size = format.color_format.size();
        let stride = self.window.row_stride();
        let data = self.window.readback().read();

        let x_end = (x + w).min(format.width);
        let y_end = (y + h).min(format.height);
        'probe: for py in y..y_end {
            for px in x..x_end {
                let offset = py as usize * stride + px as usize * pixel_size;
                let observed = format.color_format.load_pixel(&data[offset..]);
                for c in 0..n_components as usize {
                    if !tolerance.equal(c, observed[c], expected[c]) {
                        self.failed = true;
                        let n = n_components as usize;
                        self.config.error(&format_probe_mismatch(
                            px,
                            py,
                            &expected[..n],
                            &observed[..n],
                        ));
                        break 'probe;
                    }
                }
            }
        }
        Ok(())
    }

    fn probe_ssbo(
        &mut self,
        line_num: usize,
        desc_set: u32,
        binding: u32,
        array_index: u32,
        comparison: SsboCompare,
        offset: usize,
        ty: crate::layout::DataType,
        layout: crate::layout::Layout,
        expected: &[u8],
        n_elements: usize,
        tolerance: &crate::layout::Tolerance,
    ) -> VulkanResult<()> {
        let Some(index) = self.find_buffer(BufferKind::Ssbo, desc_set, binding, array_index)
        else {
            self.report(
                line_num,
                &format!("probe ssbo: no ssbo at {desc_set}:{binding}"),
            );
            return Ok(());
        };

        // make device writes visible to the host before comparing
        if self.recording || self.in_render_pass {
            self.end_render_pass();
            unsafe {
                let barrier = vk::MemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                    .dst_access_mask(vk::AccessFlags::HOST_READ)
                    .build();
                self.context.device().cmd_pipeline_barrier(
                    self.context.command_buffer(),
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::PipelineStageFlags::HOST,
                    vk::DependencyFlags::empty(),
                    &[barrier],
                    &[],
                    &[],
                );
            }
            self.submit_and_wait()?;
        }
        let data = match &self.buffers {
            Some(block) => {
                block.invalidate()?;
                block.read(index).to_vec()
            }
            None => {
                self.report(line_num, "probe ssbo: buffer storage was never created");
                return Ok(());
            }
        };

        let stride = layout.array_stride(ty);
        let offsets = layout.component_offsets(ty);
        'probe: for element in 0..n_elements {
            for (c, component_offset) in offsets.iter().enumerate() {
                let observed_offset = offset + element * stride + component_offset;
                if observed_offset + ty.scalar.size() > data.len() {
                    self.report(line_num, "probe ssbo: offset out of range");
                    break 'probe;
                }
                let observed = ty.scalar.load_f64(&data[observed_offset..]);
                let reference =
                    ty.scalar.load_f64(&expected[element * stride + component_offset..]);
                let matched = match comparison {
                    SsboCompare::Equal => observed == reference,
                    SsboCompare::FuzzyEqual => tolerance.equal(c, observed, reference),
                    SsboCompare::NotEqual => observed != reference,
                    SsboCompare::Less => observed < reference,
                    SsboCompare::GreaterEqual => observed >= reference,
                    SsboCompare::Greater => observed > reference,
                    SsboCompare::LessEqual => observed <= reference,
                };
                if !matched {
                    self.report(
                        line_num,
                        &format!(
                            "SSBO probe failed at element {element}, component {c}: \
                             observed {observed} {} expected {reference}",
                            comparison.token()
                        ),
                    );
                    break 'probe;
                }
            }
        }
        Ok(())
    }

    fn report(&mut self, line_num: usize, message: &str) {
        self.failed = true;
        self.config
            .error(&format!("{}:{line_num}: {message}", self.script.filename()));
    }

    fn finalize(&mut self) -> VulkanResult<()> {
        self.read_framebuffer()?;

        let format = self.window.format();
        let pixels = self.window.readback().read().to_vec();
        let buffers = match &self.buffers {
            Some(block) => {
                block.invalidate()?;
                self.script
                    .buffers()
                    .iter()
                    .enumerate()
                    .map(|(i, b)| InspectBuffer {
                        kind: b.kind,
                        desc_set: b.desc_set,
                        binding: b.binding,
                        array_index: b.array_index,
                        data: block.read(i).to_vec(),
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        let data = InspectData {
            width: format.width,
            height: format.height,
            stride: self.window.row_stride(),
            format: format.color_format,
            pixels,
            buffers,
        };
        self.config.sink.inspect(&data);

        if let Some(path) = self.config.image_filename.clone() {
            if let Err(e) = ppm::write_ppm(
                &path,
                data.width,
                data.height,
                data.stride,
                data.format,
                &data.pixels,
            ) {
                self.report(0, &format!("failed to write {}: {e}", path.display()));
            }
        }
        Ok(())
    }
}

impl Drop for TestRun<'_> {
    fn drop(&mut self) {
        unsafe {
            let _ = self.context.device().device_wait_idle();
            if self.descriptor_pool != vk::DescriptorPool::null() {
                self.context
                    .device()
                    .destroy_descriptor_pool(self.descriptor_pool, None);
            }
        }
    }
}

fn clear_color_value(format: &Format, color: [f32; 4]) -> vk::ClearColorValue {
    match format.parts[0].mode {
        FormatMode::UInt => vk::ClearColorValue {
            uint32: color.map(|c| c as u32),
        },
        FormatMode::SInt => vk::ClearColorValue {
            int32: color.map(|c| c as i32),
        },
        _ => vk::ClearColorValue { float32: color },
    }
}

fn format_probe_mismatch(x: u32, y: u32, expected: &[f64], observed: &[f64]) -> String {
    let fmt = |values: &[f64]| {
        values
            .iter()
            .map(|v| format!("{v}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "Probe color at ({x},{y})\n  Expected: {}\n  Observed: {}",
        fmt(expected),
        fmt(observed)
    )
}
