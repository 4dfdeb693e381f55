//! Pipeline construction and caching
//!
//! One [`PipelineSet`] is built per script: the shader modules (via the
//! external tools), the descriptor-set layouts implied by the script's
//! buffers, a pipeline layout with the union push-constant range, and
//! one Vulkan pipeline per unique pipeline key. When a script produces
//! two or more graphics pipelines the first is created with
//! `ALLOW_DERIVATIVES` and seeds the rest as derivative pipelines.

pub mod shader_build;

use std::ffi::CString;

use ash::{vk, Device};

pub use shader_build::{build_stage, ShaderBuildError};

use crate::pipeline_key::{KeySource, KeyType, PipelineKey};
use crate::script::{Script, ShaderStage, N_STAGES};
use crate::vulkan::{Context, VulkanError, VulkanResult, Window};

/// The GPU pipelines and layouts for one script
///
/// `pipelines[i]` corresponds to `script.pipeline_keys()[i]`, so a
/// command's key index looks its pipeline up in O(1).
pub struct PipelineSet {
    device: Device,
    modules: [Option<vk::ShaderModule>; N_STAGES],
    set_layouts: Vec<vk::DescriptorSetLayout>,
    layout: vk::PipelineLayout,
    pipelines: Vec<vk::Pipeline>,
    stage_flags: vk::ShaderStageFlags,
}

impl PipelineSet {
    /// Build every pipeline the script needs
    pub fn build(
        context: &Context,
        window: &Window,
        script: &Script,
        show_disassembly: bool,
    ) -> VulkanResult<Self> {
        let device = context.device().clone();
        let mut set = Self {
            device,
            modules: [None; N_STAGES],
            set_layouts: Vec::new(),
            layout: vk::PipelineLayout::null(),
            pipelines: Vec::new(),
            stage_flags: vk::ShaderStageFlags::empty(),
        };
        match set.build_inner(context, window, script, show_disassembly) {
            Ok(()) => Ok(set),
            Err(e) => Err(e),
        }
    }

    fn build_inner(
        &mut self,
        _context: &Context,
        window: &Window,
        script: &Script,
        show_disassembly: bool,
    ) -> VulkanResult<()> {
        for stage in ShaderStage::all() {
            let shaders = script.shaders_for(stage);
            if shaders.is_empty() {
                continue;
            }
            log::debug!(
                "[PIPELINE] Building {} shader from {} source(s)",
                stage.section_name(),
                shaders.len()
            );
            let spirv = build_stage(stage, shaders, show_disassembly)
                .map_err(|e| VulkanError::ShaderBuild(e.to_string()))?;
            self.modules[stage as usize] = Some(self.create_module(&spirv)?);
            self.stage_flags |= stage.vk_flags();
        }

        self.create_set_layouts(script)?;
        self.create_pipeline_layout(script)?;
        self.create_pipelines(window, script)?;
        Ok(())
    }

    fn create_module(&self, spirv: &[u8]) -> VulkanResult<vk::ShaderModule> {
        if spirv.len() % 4 != 0 {
            return Err(VulkanError::InitializationFailed(
                "SPIR-V size is not a multiple of four bytes".to_owned(),
            ));
        }
        let words: Vec<u32> = spirv
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        let info = vk::ShaderModuleCreateInfo::builder().code(&words);
        unsafe {
            self.device
                .create_shader_module(&info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn create_set_layouts(&mut self, script: &Script) -> VulkanResult<()> {
        let n_sets = script
            .buffers()
            .iter()
            .map(|b| b.desc_set + 1)
            .max()
            .unwrap_or(0);
        for set in 0..n_sets {
            let mut bindings: Vec<vk::DescriptorSetLayoutBinding> = Vec::new();
            for buffer in script.buffers().iter().filter(|b| b.desc_set == set) {
                match bindings.iter_mut().find(|b| b.binding == buffer.binding) {
                    Some(existing) => {
                        existing.descriptor_count =
                            existing.descriptor_count.max(buffer.array_index + 1);
                    }
                    None => bindings.push(
                        vk::DescriptorSetLayoutBinding::builder()
                            .binding(buffer.binding)
                            .descriptor_type(buffer.kind.descriptor_type())
                            .descriptor_count(buffer.array_index + 1)
                            .stage_flags(self.stage_flags)
                            .build(),
                    ),
                }
            }
            let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
            let layout = unsafe {
                self.device
                    .create_descriptor_set_layout(&info, None)
                    .map_err(VulkanError::Api)?
            };
            self.set_layouts.push(layout);
        }
        Ok(())
    }

    fn create_pipeline_layout(&mut self, script: &Script) -> VulkanResult<()> {
        let push_size = script.push_constant_size();
        let push_ranges = [vk::PushConstantRange {
            stage_flags: self.stage_flags,
            offset: 0,
            size: push_size as u32,
        }];
        let mut info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&self.set_layouts);
        if push_size > 0 {
            info = info.push_constant_ranges(&push_ranges);
        }
        self.layout = unsafe {
            self.device
                .create_pipeline_layout(&info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(())
    }

    fn create_pipelines(&mut self, window: &Window, script: &Script) -> VulkanResult<()> {
        let n_graphics = script
            .pipeline_keys()
            .iter()
            .filter(|k| k.ty == KeyType::Graphics)
            .count();
        let mut first_graphics: Option<vk::Pipeline> = None;

        for key in script.pipeline_keys() {
            let pipeline = match key.ty {
                KeyType::Compute => self.create_compute_pipeline(key)?,
                KeyType::Graphics => {
                    let (flags, base) = if n_graphics < 2 {
                        (vk::PipelineCreateFlags::empty(), vk::Pipeline::null())
                    } else {
                        match first_graphics {
                            None => (
                                vk::PipelineCreateFlags::ALLOW_DERIVATIVES,
                                vk::Pipeline::null(),
                            ),
                            Some(base) => (vk::PipelineCreateFlags::DERIVATIVE, base),
                        }
                    };
                    let pipeline =
                        self.create_graphics_pipeline(window, script, key, flags, base)?;
                    first_graphics.get_or_insert(pipeline);
                    pipeline
                }
            };
            self.pipelines.push(pipeline);
        }
        Ok(())
    }

    fn stage_infos(
        &self,
        key: &PipelineKey,
        entry_names: &mut Vec<CString>,
    ) -> VulkanResult<Vec<vk::PipelineShaderStageCreateInfo>> {
        let mut stages = Vec::new();
        for stage in ShaderStage::all() {
            if stage == ShaderStage::Compute {
                continue;
            }
            let Some(module) = self.modules[stage as usize] else {
                continue;
            };
            entry_names.push(entry_point_name(key, stage)?);
            stages.push((stage, module));
        }
        let infos = stages
            .iter()
            .zip(entry_names.iter())
            .map(|(&(stage, module), name)| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.vk_flags())
                    .module(module)
                    .name(name)
                    .build()
            })
            .collect();
        Ok(infos)
    }

    fn create_graphics_pipeline(
        &self,
        window: &Window,
        script: &Script,
        key: &PipelineKey,
        flags: vk::PipelineCreateFlags,
        base: vk::Pipeline,
    ) -> VulkanResult<vk::Pipeline> {
        let mut entry_names = Vec::new();
        let stages = self.stage_infos(key, &mut entry_names)?;

        // vertex input depends on whether the key draws the implicit
        // rectangle or the script's vertex data
        let mut bindings = Vec::new();
        let mut attributes = Vec::new();
        match key.source {
            KeySource::Rectangle => {
                bindings.push(
                    vk::VertexInputBindingDescription::builder()
                        .binding(0)
                        .stride(12)
                        .input_rate(vk::VertexInputRate::VERTEX)
                        .build(),
                );
                attributes.push(
                    vk::VertexInputAttributeDescription::builder()
                        .location(0)
                        .binding(0)
                        .format(vk::Format::R32G32B32_SFLOAT)
                        .offset(0)
                        .build(),
                );
            }
            KeySource::VertexData => {
                let data = script.vertex_data().ok_or_else(|| {
                    VulkanError::InitializationFailed(
                        "draw arrays used without a [vertex data] section".to_owned(),
                    )
                })?;
                bindings.push(
                    vk::VertexInputBindingDescription::builder()
                        .binding(0)
                        .stride(data.stride)
                        .input_rate(vk::VertexInputRate::VERTEX)
                        .build(),
                );
                for attrib in &data.attribs {
                    attributes.push(
                        vk::VertexInputAttributeDescription::builder()
                            .location(attrib.location)
                            .binding(0)
                            .format(attrib.format.vk_format)
                            .offset(attrib.offset)
                            .build(),
                    );
                }
            }
        }
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = key.input_assembly_state();
        let tessellation = key.tessellation_state();

        let format = window.format();
        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: format.width as f32,
            height: format.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: format.width,
                height: format.height,
            },
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization = key.rasterization_state();
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = key.depth_stencil_state();

        let blend_attachments = [key.color_blend_attachment()];
        let (logic_op_enable, logic_op) = key.logic_op_state();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(logic_op_enable)
            .logic_op(logic_op)
            .attachments(&blend_attachments);

        let has_tessellation = self.modules[ShaderStage::TessCtrl as usize].is_some()
            || self.modules[ShaderStage::TessEval as usize].is_some();

        let mut info = vk::GraphicsPipelineCreateInfo::builder()
            .flags(flags)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .layout(self.layout)
            .render_pass(window.render_pass(true))
            .subpass(0)
            .base_pipeline_handle(base)
            .base_pipeline_index(-1);
        if has_tessellation {
            info = info.tessellation_state(&tessellation);
        }

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info.build()], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };
        Ok(pipelines[0])
    }

    fn create_compute_pipeline(&self, key: &PipelineKey) -> VulkanResult<vk::Pipeline> {
        let module = self.modules[ShaderStage::Compute as usize].ok_or_else(|| {
            VulkanError::InitializationFailed(
                "compute dispatch used without a compute shader".to_owned(),
            )
        })?;
        let entry = entry_point_name(key, ShaderStage::Compute)?;
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry)
            .build();
        let info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(self.layout);
        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[info.build()], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };
        Ok(pipelines[0])
    }

    /// The pipeline for key index `index`
    pub fn pipeline(&self, index: usize) -> vk::Pipeline {
        self.pipelines[index]
    }

    /// The pipeline layout shared by every pipeline of the script
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Descriptor-set layouts indexed by set number
    pub fn set_layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.set_layouts
    }

    /// Union of the stages that have shaders
    pub fn stage_flags(&self) -> vk::ShaderStageFlags {
        self.stage_flags
    }
}

/// A stage's entry-point name as the NUL-terminated string the create
/// info wants
///
/// Scripts can put any non-whitespace bytes in an `entrypoint` command,
/// including an interior NUL, so the conversion is fallible.
fn entry_point_name(key: &PipelineKey, stage: ShaderStage) -> VulkanResult<CString> {
    CString::new(key.entry_point(stage)).map_err(|_| {
        VulkanError::InitializationFailed(format!(
            "entry point for the {} stage contains a NUL byte",
            stage.section_name()
        ))
    })
}

impl Drop for PipelineSet {
    fn drop(&mut self) {
        unsafe {
            for pipeline in &self.pipelines {
                self.device.destroy_pipeline(*pipeline, None);
            }
            if self.layout != vk::PipelineLayout::null() {
                self.device.destroy_pipeline_layout(self.layout, None);
            }
            for layout in &self.set_layouts {
                self.device.destroy_descriptor_set_layout(*layout, None);
            }
            for module in self.modules.into_iter().flatten() {
                self.device.destroy_shader_module(module, None);
            }
        }
    }
}
