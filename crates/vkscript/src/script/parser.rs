//! The script parser
//!
//! Turns a [`Source`] into a [`Script`]. The format is line-oriented
//! and section-gated: `[name]` headers switch sections, `\` joins
//! continuation lines, and registered tokens are substituted before a
//! logical line is processed. Every error carries the file name and the
//! line the offending logical line started on.

use thiserror::Error;

use crate::format::Format;
use crate::layout::{DataType, Layout, MatrixMajor, LayoutStd, ScalarType, Tolerance};
use crate::pipeline_key::{lookup_enum, KeySource, KeyType, PipelineKey, PropertyKind, PropertyValue};
use crate::requirements::Requirements;
use crate::script::source::Source;
use crate::script::stream::{decode_hex_words, substitute_tokens, LineReader};
use crate::script::{
    BufferDescriptor, BufferKind, Command, CommandOp, Script, Shader, ShaderStage, SourceType,
    SsboCompare, VertexAttrib, VertexData, WindowFormat, N_STAGES,
};

/// Errors produced while loading a script
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The source could not be read at all
    #[error("{filename}: {source}")]
    Io {
        /// Name of the script
        filename: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },
    /// The script text is malformed
    #[error("{filename}:{line}: {message}")]
    Parse {
        /// Name of the script
        filename: String,
        /// 1-based line the offending logical line starts on
        line: usize,
        /// What went wrong
        message: String,
    },
}

/// A prebuilt SPIR-V module that copies vertex input location 0 to the
/// position built-in, injected by `[vertex shader passthrough]`
const PASSTHROUGH_VERTEX_SPIRV: [u32; 69] = [
    0x0723_0203, // magic
    0x0001_0000, // version 1.0
    0x0000_0000, // generator
    12,          // id bound
    0x0000_0000, // schema
    0x0002_0011, 1, // OpCapability Shader
    0x0003_000e, 0, 1, // OpMemoryModel Logical GLSL450
    0x0007_000f, 0, 1, 0x6e69_616d, 0x0000_0000, 2, 3, // OpEntryPoint Vertex %1 "main" %2 %3
    0x0004_0047, 2, 11, 0, // OpDecorate %2 BuiltIn Position
    0x0004_0047, 3, 30, 0, // OpDecorate %3 Location 0
    0x0002_0013, 4, // %4 = OpTypeVoid
    0x0003_0021, 5, 4, // %5 = OpTypeFunction %4
    0x0003_0016, 6, 32, // %6 = OpTypeFloat 32
    0x0004_0017, 7, 6, 4, // %7 = OpTypeVector %6 4
    0x0004_0020, 8, 3, 7, // %8 = OpTypePointer Output %7
    0x0004_0020, 9, 1, 7, // %9 = OpTypePointer Input %7
    0x0004_003b, 8, 2, 3, // %2 = OpVariable %8 Output
    0x0004_003b, 9, 3, 1, // %3 = OpVariable %9 Input
    0x0005_0036, 4, 1, 0, 5, // %1 = OpFunction %4 None %5
    0x0002_00f8, 10, // %10 = OpLabel
    0x0004_003d, 7, 11, 3, // %11 = OpLoad %7 %3
    0x0003_003e, 2, 11, // OpStore %2 %11
    0x0001_00fd, // OpReturn
    0x0001_0038, // OpFunctionEnd
];

fn passthrough_vertex_bytes() -> Vec<u8> {
    PASSTHROUGH_VERTEX_SPIRV
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Comment,
    Require,
    Shader(ShaderStage, SourceType),
    VertexData,
    Indices,
    Test,
}

/// Parse a script source into its intermediate representation
pub fn parse(source: &Source) -> Result<Script, ScriptError> {
    let filename = source.filename();
    let contents = source.read_contents().map_err(|e| ScriptError::Io {
        filename: filename.clone(),
        source: e,
    })?;

    let mut parser = Parser::new(filename);
    let mut reader = LineReader::new(&contents);
    while let Some(line) = reader.next_logical() {
        let text = substitute_tokens(&line.text, source.replacements())
            .map_err(|message| parser.error(line.line_num, message))?;
        parser.process_line(&text, line.line_num)?;
    }
    parser.finish()
}

struct Parser {
    filename: String,

    stages: [Vec<Shader>; N_STAGES],
    pipeline_keys: Vec<PipelineKey>,
    commands: Vec<Command>,
    buffers: Vec<BufferDescriptor>,
    indices: Vec<u16>,
    window_format: WindowFormat,
    requirements: Requirements,

    section: Section,
    section_line: usize,
    seen_section: bool,
    shader_buf: String,

    vertex_attribs: Vec<VertexAttrib>,
    vertex_stride: u32,
    vertex_raw: Vec<u8>,
    seen_vertex_header: bool,
    seen_vertex_section: bool,

    current_key: PipelineKey,
    tolerance: Tolerance,
    clear_color: [f32; 4],
    clear_depth: f32,
    clear_stencil: u32,
    push_layout: Layout,
    ubo_layout: Layout,
    ssbo_layout: Layout,
}

impl Parser {
    fn new(filename: String) -> Self {
        Self {
            filename,
            stages: Default::default(),
            pipeline_keys: Vec::new(),
            commands: Vec::new(),
            buffers: Vec::new(),
            indices: Vec::new(),
            window_format: WindowFormat::default(),
            requirements: Requirements::new(),
            section: Section::None,
            section_line: 0,
            seen_section: false,
            shader_buf: String::new(),
            vertex_attribs: Vec::new(),
            vertex_stride: 0,
            vertex_raw: Vec::new(),
            seen_vertex_header: false,
            seen_vertex_section: false,
            current_key: PipelineKey::new(),
            tolerance: Tolerance::default(),
            clear_color: [0.0; 4],
            clear_depth: 1.0,
            clear_stencil: 0,
            push_layout: Layout { std: LayoutStd::Std430, major: MatrixMajor::Column },
            ubo_layout: Layout { std: LayoutStd::Std140, major: MatrixMajor::Column },
            ssbo_layout: Layout { std: LayoutStd::Std430, major: MatrixMajor::Column },
        }
    }

    fn error(&self, line: usize, message: impl Into<String>) -> ScriptError {
        ScriptError::Parse {
            filename: self.filename.clone(),
            line,
            message: message.into(),
        }
    }

    fn process_line(&mut self, text: &str, line_num: usize) -> Result<(), ScriptError> {
        let trimmed = text.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            self.end_section()?;
            return self.begin_section(&trimmed[1..trimmed.len() - 1], line_num);
        }

        match self.section {
            Section::Shader(..) => {
                self.shader_buf.push_str(text);
                self.shader_buf.push('\n');
                return Ok(());
            }
            Section::Comment => return Ok(()),
            _ => {}
        }

        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(());
        }

        match self.section {
            Section::None => Err(self.error(line_num, "command before the first section")),
            Section::Require => self.process_require(trimmed, line_num),
            Section::VertexData => self.process_vertex_data(trimmed, line_num),
            Section::Indices => self.process_indices(trimmed, line_num),
            Section::Test => self.process_test(trimmed, line_num),
            Section::Comment | Section::Shader(..) => unreachable!(),
        }
    }

    fn begin_section(&mut self, name: &str, line_num: usize) -> Result<(), ScriptError> {
        self.section_line = line_num;
        self.section = match name {
            "comment" => Section::Comment,
            "require" => {
                if self.seen_section {
                    return Err(
                        self.error(line_num, "[require] must be the first section")
                    );
                }
                Section::Require
            }
            "test" => Section::Test,
            "indices" => Section::Indices,
            "vertex data" => {
                if self.seen_vertex_section {
                    return Err(self.error(line_num, "duplicate [vertex data] section"));
                }
                self.seen_vertex_section = true;
                Section::VertexData
            }
            "vertex shader passthrough" => {
                self.add_shader(
                    ShaderStage::Vertex,
                    SourceType::SpirvBinary,
                    passthrough_vertex_bytes(),
                    line_num,
                )?;
                Section::Comment
            }
            _ => match Self::shader_section(name) {
                Some((stage, source_type)) => Section::Shader(stage, source_type),
                None => {
                    return Err(self.error(line_num, format!("unknown section \"[{name}]\"")))
                }
            },
        };
        if name != "comment" {
            self.seen_section = true;
        }
        Ok(())
    }

    fn shader_section(name: &str) -> Option<(ShaderStage, SourceType)> {
        for stage in ShaderStage::all() {
            let Some(rest) = name.strip_prefix(stage.section_name()) else {
                continue;
            };
            match rest {
                " shader" => return Some((stage, SourceType::Glsl)),
                " shader spirv" => return Some((stage, SourceType::SpirvText)),
                " shader binary" => return Some((stage, SourceType::SpirvBinary)),
                _ => continue,
            }
        }
        None
    }

    fn end_section(&mut self) -> Result<(), ScriptError> {
        if let Section::Shader(stage, source_type) = self.section {
            let body = std::mem::take(&mut self.shader_buf);
            let bytes = match source_type {
                SourceType::SpirvBinary => decode_hex_words(&body)
                    .map_err(|message| self.error(self.section_line, message))?,
                _ => body.into_bytes(),
            };
            self.add_shader(stage, source_type, bytes, self.section_line)?;
        }
        Ok(())
    }

    fn add_shader(
        &mut self,
        stage: ShaderStage,
        source_type: SourceType,
        bytes: Vec<u8>,
        line_num: usize,
    ) -> Result<(), ScriptError> {
        let shaders = &self.stages[stage as usize];
        let exclusive = source_type != SourceType::Glsl
            || shaders.iter().any(|s| s.source_type != SourceType::Glsl);
        if exclusive && !shaders.is_empty() {
            return Err(self.error(
                line_num,
                format!("duplicate shader for {} stage", stage.section_name()),
            ));
        }
        self.stages[stage as usize].push(Shader { source_type, bytes });
        Ok(())
    }

    fn finish(mut self) -> Result<Script, ScriptError> {
        self.end_section()?;
        if self.seen_vertex_section && !self.seen_vertex_header {
            return Err(self.error(self.section_line, "[vertex data] section has no header"));
        }
        self.buffers
            .sort_by_key(|b| (b.desc_set, b.binding, b.array_index));
        let vertex_data = if self.seen_vertex_section {
            Some(VertexData {
                stride: self.vertex_stride,
                attribs: std::mem::take(&mut self.vertex_attribs),
                raw: std::mem::take(&mut self.vertex_raw),
            })
        } else {
            None
        };
        Ok(Script {
            filename: self.filename,
            stages: self.stages,
            pipeline_keys: self.pipeline_keys,
            commands: self.commands,
            buffers: self.buffers,
            vertex_data,
            indices: self.indices,
            window_format: self.window_format,
            requirements: self.requirements,
        })
    }

    // ----- [require] -----

    fn process_require(&mut self, line: &str, line_num: usize) -> Result<(), ScriptError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["framebuffer", name] => {
                self.window_format.color_format = self.lookup_format(name, line_num)?;
            }
            ["depthstencil", name] => {
                self.window_format.depth_stencil_format =
                    Some(self.lookup_format(name, line_num)?);
            }
            ["fbsize", width, height] => {
                let width = parse_u32(width).map_err(|m| self.error(line_num, m))?;
                let height = parse_u32(height).map_err(|m| self.error(line_num, m))?;
                if width == 0 || height == 0 {
                    return Err(self.error(line_num, "fbsize dimensions must be positive"));
                }
                self.window_format.width = width;
                self.window_format.height = height;
            }
            [name]
                if name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                self.requirements.add(name);
            }
            _ => {
                return Err(self.error(line_num, format!("invalid require line \"{line}\"")));
            }
        }
        Ok(())
    }

    fn lookup_format(
        &self,
        name: &str,
        line_num: usize,
    ) -> Result<&'static Format, ScriptError> {
        Format::lookup_by_name(name)
            .ok_or_else(|| self.error(line_num, format!("unknown format \"{name}\"")))
    }

    // ----- [vertex data] -----

    fn process_vertex_data(&mut self, line: &str, line_num: usize) -> Result<(), ScriptError> {
        if !self.seen_vertex_header {
            self.seen_vertex_header = true;
            let mut offset = 0u32;
            for token in line.split_whitespace() {
                let (location, format_name) = token.split_once('/').ok_or_else(|| {
                    self.error(
                        line_num,
                        format!("expected location/format, got \"{token}\""),
                    )
                })?;
                let location = parse_u32(location).map_err(|m| self.error(line_num, m))?;
                let format = self.lookup_format(format_name, line_num)?;
                self.vertex_attribs.push(VertexAttrib {
                    location,
                    format,
                    offset,
                });
                offset += format.size() as u32;
            }
            self.vertex_stride = offset;
            return Ok(());
        }

        let values: Vec<f64> = line
            .split_whitespace()
            .map(|t| parse_f64(t).map_err(|m| self.error(line_num, m)))
            .collect::<Result<_, _>>()?;
        let n_parts: usize = self.vertex_attribs.iter().map(|a| a.format.parts.len()).sum();
        if values.len() != n_parts {
            return Err(self.error(
                line_num,
                format!("expected {n_parts} values per vertex, got {}", values.len()),
            ));
        }
        let mut vertex = vec![0u8; self.vertex_stride as usize];
        let mut consumed = 0;
        for attrib in &self.vertex_attribs {
            let n = attrib.format.parts.len();
            attrib.format.store_element(
                &values[consumed..consumed + n],
                &mut vertex[attrib.offset as usize..],
            );
            consumed += n;
        }
        self.vertex_raw.extend_from_slice(&vertex);
        Ok(())
    }

    // ----- [indices] -----

    fn process_indices(&mut self, line: &str, line_num: usize) -> Result<(), ScriptError> {
        for token in line.split_whitespace() {
            let index: u16 = token
                .parse()
                .map_err(|_| self.error(line_num, format!("invalid index \"{token}\"")))?;
            self.indices.push(index);
        }
        Ok(())
    }

    // ----- [test] -----

    fn process_test(&mut self, line: &str, line_num: usize) -> Result<(), ScriptError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        match tokens.as_slice() {
            ["patch", "parameter", "vertices", count] => {
                let count = parse_u32(count).map_err(|m| self.error(line_num, m))?;
                self.current_key
                    .set("patchControlPoints", PropertyValue::Int(i64::from(count)));
                Ok(())
            }
            ["clear", "color", r, g, b, a] => {
                let mut color = [0.0f32; 4];
                for (slot, token) in color.iter_mut().zip([r, g, b, a]) {
                    *slot = parse_f32(token).map_err(|m| self.error(line_num, m))?;
                }
                self.clear_color = color;
                Ok(())
            }
            ["clear", "depth", depth] => {
                self.clear_depth = parse_f32(depth).map_err(|m| self.error(line_num, m))?;
                Ok(())
            }
            ["clear", "stencil", stencil] => {
                self.clear_stencil = parse_u32(stencil).map_err(|m| self.error(line_num, m))?;
                Ok(())
            }
            ["clear"] => {
                self.push_command(
                    line_num,
                    CommandOp::Clear {
                        color: self.clear_color,
                        depth: self.clear_depth,
                        stencil: self.clear_stencil,
                    },
                );
                Ok(())
            }
            ["ssbo", ..] => self.process_ssbo(&tokens, line_num),
            ["tolerance", ..] => self.process_tolerance(&tokens[1..], line_num),
            ["probe", "ssbo", ..] => self.process_probe_ssbo(&tokens, line_num),
            ["probe", ..] | ["relative", "probe", ..] => {
                self.process_probe_rect(line, line_num)
            }
            ["draw", "arrays", ..] => self.process_draw_arrays(&tokens[2..], line_num),
            ["compute", x, y, z] => {
                let x = parse_u32(x).map_err(|m| self.error(line_num, m))?;
                let y = parse_u32(y).map_err(|m| self.error(line_num, m))?;
                let z = parse_u32(z).map_err(|m| self.error(line_num, m))?;
                let mut key = self.current_key.clone();
                key.ty = KeyType::Compute;
                let key_index = self.add_key(key);
                self.push_command(line_num, CommandOp::DispatchCompute { key_index, x, y, z });
                Ok(())
            }
            ["uniform", "ubo", ..] => self.process_uniform_ubo(&tokens, line_num),
            ["uniform", ty, offset, values @ ..] => {
                let ty = self.parse_type(ty, line_num)?;
                let offset = parse_usize(offset).map_err(|m| self.error(line_num, m))?;
                let (data, _) = self
                    .pack_values(ty, self.push_layout, values)
                    .map_err(|m| self.error(line_num, m))?;
                self.push_command(line_num, CommandOp::SetPushConstant { offset, data });
                Ok(())
            }
            ["draw", "rect", ..] => self.process_draw_rect(&tokens[2..], line_num),
            _ => {
                if self.process_entrypoint(&tokens)? {
                    return Ok(());
                }
                self.process_property(line, &tokens, line_num)
            }
        }
    }

    fn push_command(&mut self, line_num: usize, op: CommandOp) {
        self.commands.push(Command { line_num, op });
    }

    fn add_key(&mut self, key: PipelineKey) -> usize {
        match self.pipeline_keys.iter().position(|k| *k == key) {
            Some(index) => index,
            None => {
                self.pipeline_keys.push(key);
                self.pipeline_keys.len() - 1
            }
        }
    }

    fn parse_type(&self, token: &str, line_num: usize) -> Result<DataType, ScriptError> {
        DataType::from_name(token)
            .ok_or_else(|| self.error(line_num, format!("unknown type \"{token}\"")))
    }

    /// Lay out whitespace-separated value literals as consecutive array
    /// elements of `ty`, returning the bytes and the element count
    fn pack_values(
        &self,
        ty: DataType,
        layout: Layout,
        tokens: &[&str],
    ) -> Result<(Vec<u8>, usize), String> {
        let comps = ty.components();
        if tokens.is_empty() || tokens.len() % comps != 0 {
            return Err(format!(
                "expected a multiple of {comps} values, got {}",
                tokens.len()
            ));
        }
        let n_elements = tokens.len() / comps;
        let stride = layout.array_stride(ty);
        let mut data = vec![0u8; (n_elements - 1) * stride + layout.size(ty)];
        let offsets = layout.component_offsets(ty);
        for element in 0..n_elements {
            for (c, offset) in offsets.iter().enumerate() {
                let token = tokens[element * comps + c];
                write_scalar(ty.scalar, token, &mut data[element * stride + offset..])?;
            }
        }
        Ok((data, n_elements))
    }

    fn ensure_buffer(
        &mut self,
        kind: BufferKind,
        desc_set: u32,
        binding: u32,
        array_index: u32,
        min_size: usize,
        line_num: usize,
    ) -> Result<(), ScriptError> {
        let existing = self.buffers.iter().position(|b| {
            b.desc_set == desc_set && b.binding == binding && b.array_index == array_index
        });
        match existing {
            Some(index) => {
                if self.buffers[index].kind != kind {
                    return Err(self.error(
                        line_num,
                        format!("buffer {desc_set}:{binding} used with two different types"),
                    ));
                }
                self.buffers[index].size = self.buffers[index].size.max(min_size);
            }
            None => self.buffers.push(BufferDescriptor {
                kind,
                desc_set,
                binding,
                array_index,
                size: min_size,
            }),
        }
        Ok(())
    }

    fn process_ssbo(&mut self, tokens: &[&str], line_num: usize) -> Result<(), ScriptError> {
        match tokens {
            ["ssbo", buf, "subdata", ty, offset, values @ ..] => {
                let (desc_set, binding, array_index) =
                    parse_buffer_ref(buf).map_err(|m| self.error(line_num, m))?;
                let ty = self.parse_type(ty, line_num)?;
                let offset = parse_usize(offset).map_err(|m| self.error(line_num, m))?;
                let (data, _) = self
                    .pack_values(ty, self.ssbo_layout, values)
                    .map_err(|m| self.error(line_num, m))?;
                self.ensure_buffer(
                    BufferKind::Ssbo,
                    desc_set,
                    binding,
                    array_index,
                    offset + data.len(),
                    line_num,
                )?;
                self.push_command(
                    line_num,
                    CommandOp::SetBufferSubdata {
                        kind: BufferKind::Ssbo,
                        desc_set,
                        binding,
                        array_index,
                        offset,
                        data,
                    },
                );
                Ok(())
            }
            ["ssbo", buf, size] => {
                let (desc_set, binding, array_index) =
                    parse_buffer_ref(buf).map_err(|m| self.error(line_num, m))?;
                let size = parse_usize(size).map_err(|m| self.error(line_num, m))?;
                self.ensure_buffer(
                    BufferKind::Ssbo,
                    desc_set,
                    binding,
                    array_index,
                    size,
                    line_num,
                )
            }
            _ => Err(self.error(line_num, "invalid ssbo command")),
        }
    }

    fn process_uniform_ubo(
        &mut self,
        tokens: &[&str],
        line_num: usize,
    ) -> Result<(), ScriptError> {
        match tokens {
            ["uniform", "ubo", buf, ty, offset, values @ ..] => {
                let (desc_set, binding, array_index) =
                    parse_buffer_ref(buf).map_err(|m| self.error(line_num, m))?;
                let ty = self.parse_type(ty, line_num)?;
                let offset = parse_usize(offset).map_err(|m| self.error(line_num, m))?;
                let (data, _) = self
                    .pack_values(ty, self.ubo_layout, values)
                    .map_err(|m| self.error(line_num, m))?;
                self.ensure_buffer(
                    BufferKind::Ubo,
                    desc_set,
                    binding,
                    array_index,
                    offset + data.len(),
                    line_num,
                )?;
                self.push_command(
                    line_num,
                    CommandOp::SetBufferSubdata {
                        kind: BufferKind::Ubo,
                        desc_set,
                        binding,
                        array_index,
                        offset,
                        data,
                    },
                );
                Ok(())
            }
            _ => Err(self.error(line_num, "invalid uniform ubo command")),
        }
    }

    fn process_tolerance(&mut self, tokens: &[&str], line_num: usize) -> Result<(), ScriptError> {
        if tokens.len() != 1 && tokens.len() != 4 {
            return Err(self.error(line_num, "tolerance takes 1 or 4 values"));
        }
        let is_percent = tokens[0].ends_with('%');
        let mut values = [0.0f64; 4];
        for (i, token) in tokens.iter().enumerate() {
            let stripped = match token.strip_suffix('%') {
                Some(s) => {
                    if !is_percent {
                        return Err(self.error(line_num, "mixed percent and absolute tolerance"));
                    }
                    s
                }
                None => {
                    if is_percent {
                        return Err(self.error(line_num, "mixed percent and absolute tolerance"));
                    }
                    token
                }
            };
            let value = parse_f64(stripped).map_err(|m| self.error(line_num, m))?;
            if value < 0.0 {
                return Err(self.error(line_num, "tolerance must be non-negative"));
            }
            values[i] = value;
        }
        if tokens.len() == 1 {
            values = [values[0]; 4];
        }
        self.tolerance = Tolerance { values, is_percent };
        Ok(())
    }

    fn process_entrypoint(&mut self, tokens: &[&str]) -> Result<bool, ScriptError> {
        for stage in ShaderStage::all() {
            let words: Vec<&str> = stage.section_name().split(' ').collect();
            if tokens.len() == words.len() + 2
                && tokens[..words.len()] == words[..]
                && tokens[words.len()] == "entrypoint"
            {
                let name = tokens[tokens.len() - 1];
                self.current_key.set_entry_point(stage, name);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn process_probe_ssbo(&mut self, tokens: &[&str], line_num: usize) -> Result<(), ScriptError> {
        match tokens {
            ["probe", "ssbo", ty, buf, offset, op, values @ ..] => {
                let ty = self.parse_type(ty, line_num)?;
                let (desc_set, binding, array_index) =
                    parse_buffer_ref(buf).map_err(|m| self.error(line_num, m))?;
                let offset = parse_usize(offset).map_err(|m| self.error(line_num, m))?;
                let comparison = SsboCompare::from_token(op).ok_or_else(|| {
                    self.error(line_num, format!("unknown comparison \"{op}\""))
                })?;
                let (expected, n_elements) = self
                    .pack_values(ty, self.ssbo_layout, values)
                    .map_err(|m| self.error(line_num, m))?;
                self.push_command(
                    line_num,
                    CommandOp::ProbeSsbo {
                        desc_set,
                        binding,
                        array_index,
                        comparison,
                        offset,
                        ty,
                        layout: self.ssbo_layout,
                        expected,
                        n_elements,
                        tolerance: self.tolerance,
                    },
                );
                Ok(())
            }
            _ => Err(self.error(line_num, "invalid probe ssbo command")),
        }
    }

    fn process_probe_rect(&mut self, line: &str, line_num: usize) -> Result<(), ScriptError> {
        // parens and commas in probe argument lists are neutral separators
        let cleaned: String = line
            .chars()
            .map(|c| if matches!(c, '(' | ')' | ',') { ' ' } else { c })
            .collect();
        let mut tokens = cleaned.split_whitespace();

        let mut token = tokens.next().unwrap_or("");
        let relative = token == "relative";
        if relative {
            token = tokens.next().unwrap_or("");
        }
        if token != "probe" {
            return Err(self.error(line_num, "invalid probe command"));
        }

        token = tokens.next().unwrap_or("");
        let region = match token {
            "rect" | "all" => {
                let region = token;
                token = tokens.next().unwrap_or("");
                region
            }
            _ => "pixel",
        };
        let n_components: u32 = match token {
            "rgb" => 3,
            "rgba" => 4,
            _ => return Err(self.error(line_num, "probe expects rgb or rgba")),
        };

        let args: Vec<f64> = tokens
            .map(|t| parse_f64(t).map_err(|m| self.error(line_num, m)))
            .collect::<Result<_, _>>()?;

        let n_coords = match region {
            "all" => 0,
            "rect" => 4,
            _ => 2,
        };
        if args.len() != n_coords + n_components as usize {
            return Err(self.error(line_num, "wrong number of probe arguments"));
        }

        let width = f64::from(self.window_format.width);
        let height = f64::from(self.window_format.height);
        let (x, y, w, h) = match region {
            "all" => (0.0, 0.0, width, height),
            "rect" => (args[0], args[1], args[2], args[3]),
            _ => (args[0], args[1], 1.0, 1.0),
        };
        let (x, y, w, h) = match (relative, region) {
            (true, "rect") => (x * width, y * height, w * width, h * height),
            (true, "pixel") => (x * width, y * height, w, h),
            _ => (x, y, w, h),
        };

        let mut expected = [0.0, 0.0, 0.0, 1.0];
        expected[..n_components as usize]
            .copy_from_slice(&args[n_coords..n_coords + n_components as usize]);

        let to_px = |v: f64| v.max(0.0) as u32;
        self.push_command(
            line_num,
            CommandOp::ProbeRect {
                n_components,
                x: to_px(x),
                y: to_px(y),
                w: to_px(w),
                h: to_px(h),
                expected,
                tolerance: self.tolerance,
            },
        );
        Ok(())
    }

    fn process_draw_arrays(&mut self, tokens: &[&str], line_num: usize) -> Result<(), ScriptError> {
        let mut rest = tokens;
        let mut instanced = false;
        let mut indexed = false;
        loop {
            match rest.first() {
                Some(&"instanced") => {
                    instanced = true;
                    rest = &rest[1..];
                }
                Some(&"indexed") => {
                    indexed = true;
                    rest = &rest[1..];
                }
                _ => break,
            }
        }
        let (topology_name, first, count, instance_count) = match rest {
            [topo, first, count] => (*topo, *first, *count, None),
            [topo, first, count, instances] if instanced => {
                (*topo, *first, *count, Some(*instances))
            }
            _ => return Err(self.error(line_num, "invalid draw arrays command")),
        };

        let topology = lookup_enum(topology_name)
            .or_else(|| lookup_enum(&format!("VK_PRIMITIVE_TOPOLOGY_{topology_name}")))
            .ok_or_else(|| {
                self.error(line_num, format!("unknown topology \"{topology_name}\""))
            })?;
        let first_vertex = parse_u32(first).map_err(|m| self.error(line_num, m))?;
        let vertex_count = parse_u32(count).map_err(|m| self.error(line_num, m))?;
        let instance_count = match instance_count {
            Some(token) => parse_u32(token).map_err(|m| self.error(line_num, m))?,
            None => 1,
        };

        let mut key = self.current_key.clone();
        key.ty = KeyType::Graphics;
        key.source = KeySource::VertexData;
        key.set("topology", PropertyValue::Int(topology));
        let key_index = self.add_key(key);
        self.push_command(
            line_num,
            CommandOp::DrawArrays {
                key_index,
                indexed,
                first_vertex,
                vertex_count,
                instance_count,
            },
        );
        Ok(())
    }

    fn process_draw_rect(&mut self, tokens: &[&str], line_num: usize) -> Result<(), ScriptError> {
        let mut rest = tokens;
        let mut ortho = false;
        let mut patch = false;
        loop {
            match rest.first() {
                Some(&"ortho") => {
                    ortho = true;
                    rest = &rest[1..];
                }
                Some(&"patch") => {
                    patch = true;
                    rest = &rest[1..];
                }
                _ => break,
            }
        }
        let [x, y, w, h] = rest else {
            return Err(self.error(line_num, "invalid draw rect command"));
        };
        let mut x = parse_f32(x).map_err(|m| self.error(line_num, m))?;
        let mut y = parse_f32(y).map_err(|m| self.error(line_num, m))?;
        let mut w = parse_f32(w).map_err(|m| self.error(line_num, m))?;
        let mut h = parse_f32(h).map_err(|m| self.error(line_num, m))?;

        if ortho {
            // remap pixel coordinates to normalized device coordinates
            let win_w = self.window_format.width as f32;
            let win_h = self.window_format.height as f32;
            x = x * 2.0 / win_w - 1.0;
            y = y * 2.0 / win_h - 1.0;
            w = w * 2.0 / win_w;
            h = h * 2.0 / win_h;
        }

        let mut key = self.current_key.clone();
        key.ty = KeyType::Graphics;
        key.source = KeySource::Rectangle;
        if patch {
            key.set(
                "topology",
                PropertyValue::Int(i64::from(ash::vk::PrimitiveTopology::PATCH_LIST.as_raw())),
            );
            key.set("patchControlPoints", PropertyValue::Int(4));
        } else {
            key.set(
                "topology",
                PropertyValue::Int(i64::from(
                    ash::vk::PrimitiveTopology::TRIANGLE_STRIP.as_raw(),
                )),
            );
        }
        let key_index = self.add_key(key);
        self.push_command(line_num, CommandOp::DrawRect { key_index, x, y, w, h });
        Ok(())
    }

    fn process_property(
        &mut self,
        line: &str,
        tokens: &[&str],
        line_num: usize,
    ) -> Result<(), ScriptError> {
        let (name, value_tokens) = match tokens.split_first() {
            Some((name, rest)) if !rest.is_empty() => (*name, rest),
            _ => {
                return Err(self.error(line_num, format!("invalid test command \"{line}\"")))
            }
        };
        let kind = match PipelineKey::lookup(name) {
            Some(kind) => kind,
            None => {
                return Err(self.error(line_num, format!("invalid test command \"{line}\"")))
            }
        };
        let value = match kind {
            PropertyKind::Bool => {
                let [token] = value_tokens else {
                    return Err(self.error(line_num, format!("invalid value for \"{name}\"")));
                };
                let value = match *token {
                    "true" => true,
                    "false" => false,
                    other => parse_i64(other)
                        .map_err(|m| self.error(line_num, m))?
                        != 0,
                };
                PropertyValue::Bool(value)
            }
            PropertyKind::Float => {
                let [token] = value_tokens else {
                    return Err(self.error(line_num, format!("invalid value for \"{name}\"")));
                };
                PropertyValue::Float(parse_f32(token).map_err(|m| self.error(line_num, m))?)
            }
            PropertyKind::Int => {
                let joined = value_tokens.join(" ");
                let mut value = 0i64;
                for part in joined.split('|') {
                    let part = part.trim();
                    let v = match parse_i64(part) {
                        Ok(v) => v,
                        Err(_) => lookup_enum(part).ok_or_else(|| {
                            self.error(line_num, format!("unknown enum \"{part}\""))
                        })?,
                    };
                    value |= v;
                }
                PropertyValue::Int(value)
            }
        };
        if !self.current_key.set(name, value) {
            return Err(self.error(line_num, format!("invalid value for \"{name}\"")));
        }
        Ok(())
    }
}

// ----- literal parsing helpers (locale independent) -----

/// Parse a `binding`, `set:binding`, or `set:binding:array` reference;
/// the set and array index default to 0
fn parse_buffer_ref(token: &str) -> Result<(u32, u32, u32), String> {
    let parts: Vec<&str> = token.split(':').collect();
    match parts.as_slice() {
        [binding] => Ok((0, parse_u32(binding)?, 0)),
        [set, binding] => Ok((parse_u32(set)?, parse_u32(binding)?, 0)),
        [set, binding, array] => {
            Ok((parse_u32(set)?, parse_u32(binding)?, parse_u32(array)?))
        }
        _ => Err(format!("invalid buffer reference \"{token}\"")),
    }
}

fn parse_u32(token: &str) -> Result<u32, String> {
    let parsed = match token.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => token.parse(),
    };
    parsed.map_err(|_| format!("invalid number \"{token}\""))
}

fn parse_usize(token: &str) -> Result<usize, String> {
    parse_u32(token).map(|v| v as usize)
}

fn parse_i64(token: &str) -> Result<i64, String> {
    let parsed = match token.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => match token.strip_prefix("-0x") {
            Some(hex) => i64::from_str_radix(hex, 16).map(|v| -v),
            None => token.parse(),
        },
    };
    parsed.map_err(|_| format!("invalid number \"{token}\""))
}

fn parse_u64(token: &str) -> Result<u64, String> {
    let parsed = match token.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => token.parse(),
    };
    parsed.map_err(|_| format!("invalid number \"{token}\""))
}

fn parse_f32(token: &str) -> Result<f32, String> {
    token
        .parse()
        .map_err(|_| format!("invalid number \"{token}\""))
}

fn parse_f64(token: &str) -> Result<f64, String> {
    token
        .parse()
        .map_err(|_| format!("invalid number \"{token}\""))
}

fn write_scalar(scalar: ScalarType, token: &str, out: &mut [u8]) -> Result<(), String> {
    match scalar {
        ScalarType::Int8 => out[..1].copy_from_slice(&(parse_i64(token)? as i8).to_le_bytes()),
        ScalarType::UInt8 => out[..1].copy_from_slice(&(parse_u64(token)? as u8).to_le_bytes()),
        ScalarType::Int16 => out[..2].copy_from_slice(&(parse_i64(token)? as i16).to_le_bytes()),
        ScalarType::UInt16 => out[..2].copy_from_slice(&(parse_u64(token)? as u16).to_le_bytes()),
        ScalarType::Int32 => out[..4].copy_from_slice(&(parse_i64(token)? as i32).to_le_bytes()),
        ScalarType::UInt32 => out[..4].copy_from_slice(&(parse_u64(token)? as u32).to_le_bytes()),
        ScalarType::Int64 => out[..8].copy_from_slice(&parse_i64(token)?.to_le_bytes()),
        ScalarType::UInt64 => out[..8].copy_from_slice(&parse_u64(token)?.to_le_bytes()),
        ScalarType::Float => out[..4].copy_from_slice(&parse_f32(token)?.to_le_bytes()),
        ScalarType::Double => out[..8].copy_from_slice(&parse_f64(token)?.to_le_bytes()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(text: &str) -> Script {
        parse(&Source::from_string(text)).unwrap()
    }

    fn parse_err(text: &str) -> ScriptError {
        parse(&Source::from_string(text)).unwrap_err()
    }

    #[test]
    fn test_command_line_numbers_respect_continuations() {
        let script = parse_str(
            "[test]\n\
             clear\n\
             uniform vec4 0 \\\n\
             1 2 \\\n\
             3 4\n\
             clear\n\
             # comment\n\
             \n\
             clear \\\n\
             \n",
        );
        let lines: Vec<usize> = script.commands().iter().map(|c| c.line_num).collect();
        assert_eq!(lines, [2, 3, 6, 9]);
    }

    #[test]
    fn test_require_must_be_first_section() {
        let err = parse_err("[comment]\nwhatever\n[test]\nclear\n[require]\nfbsize 4 4\n");
        match err {
            ScriptError::Parse { line, message, .. } => {
                assert_eq!(line, 5);
                assert!(message.contains("[require] must be the first section"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_require_after_comment_only_is_fine() {
        let script = parse_str("[comment]\nblah\n[require]\nfbsize 8 2\n");
        assert_eq!(script.window_format().width, 8);
        assert_eq!(script.window_format().height, 2);
    }

    #[test]
    fn test_pipeline_key_dedup() {
        let script = parse_str(
            "[test]\n\
             draw rect 0 0 1 1\n\
             draw rect 0 0 1 1\n\
             draw rect 0 0 1 1\n",
        );
        assert_eq!(script.pipeline_keys().len(), 1);
        for command in script.commands() {
            match command.op {
                CommandOp::DrawRect { key_index, .. } => assert_eq!(key_index, 0),
                _ => panic!("unexpected command"),
            }
        }
    }

    #[test]
    fn test_distinct_keys_not_deduplicated() {
        let script = parse_str(
            "[test]\n\
             draw rect 0 0 1 1\n\
             depthTestEnable true\n\
             draw rect 0 0 1 1\n",
        );
        assert_eq!(script.pipeline_keys().len(), 2);
    }

    #[test]
    fn test_token_replacement_in_require() {
        let mut source = Source::from_string("[require]\nfbsize @W @W\n");
        source.add_token_replacement("@W", "4");
        let script = parse(&source).unwrap();
        assert_eq!(script.window_format().width, 4);
        assert_eq!(script.window_format().height, 4);
    }

    #[test]
    fn test_token_recursion_fails() {
        let mut source = Source::from_string("[require]\nfbsize @W @W\n");
        source.add_token_replacement("@W", "@W@W");
        assert!(parse(&source).is_err());
    }

    #[test]
    fn test_buffers_sorted_by_set_then_binding() {
        let script = parse_str(
            "[test]\n\
             ssbo 1:0 64\n\
             uniform ubo 0:2 vec4 0 1 2 3 4\n",
        );
        let buffers = script.buffers();
        assert_eq!(buffers.len(), 2);
        assert_eq!((buffers[0].desc_set, buffers[0].binding), (0, 2));
        assert_eq!((buffers[1].desc_set, buffers[1].binding), (1, 0));
        assert_eq!(buffers[0].kind, BufferKind::Ubo);
        assert_eq!(buffers[1].kind, BufferKind::Ssbo);
    }

    #[test]
    fn test_buffer_kind_conflict_is_an_error() {
        let err = parse_err("[test]\nssbo 0:1 64\nuniform ubo 0:1 float 0 1\n");
        match err {
            ScriptError::Parse { message, .. } => {
                assert!(message.contains("two different types"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_ssbo_subdata_grows_declared_size() {
        let script = parse_str("[test]\nssbo 0:0 4\nssbo 0:0 subdata vec4 32 1 2 3 4\n");
        assert_eq!(script.buffers()[0].size, 48);
    }

    #[test]
    fn test_uniform_push_constant_layout() {
        let script = parse_str("[test]\nuniform mat2 8 1 2 3 4\n");
        match &script.commands()[0].op {
            CommandOp::SetPushConstant { offset, data } => {
                assert_eq!(*offset, 8);
                // std430 mat2: two vec2 columns, stride 8
                assert_eq!(data.len(), 16);
                let floats: Vec<f32> = data
                    .chunks(4)
                    .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                assert_eq!(floats, [1.0, 2.0, 3.0, 4.0]);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(script.push_constant_size(), 24);
    }

    #[test]
    fn test_ubo_layout_is_std140() {
        let script = parse_str("[test]\nuniform ubo 0:0 float 0 1 2\n");
        match &script.commands()[0].op {
            CommandOp::SetBufferSubdata { data, .. } => {
                // two std140 array elements with stride 16
                assert_eq!(data.len(), 20);
                assert_eq!(f32::from_le_bytes(data[0..4].try_into().unwrap()), 1.0);
                assert_eq!(data[4..16], [0; 12]);
                assert_eq!(f32::from_le_bytes(data[16..20].try_into().unwrap()), 2.0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_probe_all_plain_values() {
        let script = parse_str("[require]\nfbsize 4 4\n[test]\nprobe all rgba 1 0 0 1\n");
        match &script.commands()[0].op {
            CommandOp::ProbeRect { n_components, x, y, w, h, expected, .. } => {
                assert_eq!(*n_components, 4);
                assert_eq!((*x, *y, *w, *h), (0, 0, 4, 4));
                assert_eq!(*expected, [1.0, 0.0, 0.0, 1.0]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_probe_rect_with_parens() {
        let script = parse_str("[test]\nprobe rect rgb (1, 2, 3, 4) (0.5, 0.25, 0.125)\n");
        match &script.commands()[0].op {
            CommandOp::ProbeRect { n_components, x, y, w, h, expected, .. } => {
                assert_eq!(*n_components, 3);
                assert_eq!((*x, *y, *w, *h), (1, 2, 3, 4));
                assert_eq!(expected[..3], [0.5, 0.25, 0.125]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_relative_probe_scales_by_window() {
        let script = parse_str(
            "[require]\nfbsize 200 100\n[test]\nrelative probe rect rgb (0.5, 0.25, 0.5, 0.5) (0, 1, 0)\n",
        );
        match &script.commands()[0].op {
            CommandOp::ProbeRect { x, y, w, h, .. } => {
                assert_eq!((*x, *y, *w, *h), (100, 25, 100, 50));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_probe_ssbo_command() {
        let script = parse_str("[test]\nssbo 0:1 32\nprobe ssbo vec2 0:1 8 ~= 1 2 3 4\n");
        match &script.commands()[0].op {
            CommandOp::ProbeSsbo {
                binding,
                comparison,
                offset,
                n_elements,
                expected,
                ..
            } => {
                assert_eq!(*binding, 1);
                assert_eq!(*comparison, SsboCompare::FuzzyEqual);
                assert_eq!(*offset, 8);
                assert_eq!(*n_elements, 2);
                // std430 vec2 stride is 8, so two elements pack tightly
                assert_eq!(expected.len(), 16);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_tolerance_percent() {
        let script = parse_str("[test]\ntolerance 1% 2% 3% 4%\nprobe all rgba 0 0 0 0\n");
        match &script.commands()[0].op {
            CommandOp::ProbeRect { tolerance, .. } => {
                assert!(tolerance.is_percent);
                assert_eq!(tolerance.values, [1.0, 2.0, 3.0, 4.0]);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(parse(&Source::from_string("[test]\ntolerance 1% 2 3 4\n")).is_err());
        assert!(parse(&Source::from_string("[test]\ntolerance -1\n")).is_err());
    }

    #[test]
    fn test_draw_rect_ortho_remaps_to_ndc() {
        let script = parse_str("[require]\nfbsize 4 4\n[test]\ndraw rect ortho 0 0 4 4\n");
        match &script.commands()[0].op {
            CommandOp::DrawRect { x, y, w, h, .. } => {
                assert_eq!((*x, *y), (-1.0, -1.0));
                assert_eq!((*w, *h), (2.0, 2.0));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_draw_rect_patch_topology() {
        let script = parse_str("[test]\ndraw rect patch 0 0 1 1\n");
        let key = script.pipeline_key(0);
        assert_eq!(key.vk_topology(), ash::vk::PrimitiveTopology::PATCH_LIST);
        assert_eq!(key.patch_control_points(), 4);
    }

    #[test]
    fn test_draw_arrays_topology_and_flags() {
        let script = parse_str(
            "[test]\ndraw arrays instanced indexed TRIANGLE_LIST 0 6 4\n",
        );
        match &script.commands()[0].op {
            CommandOp::DrawArrays {
                indexed,
                first_vertex,
                vertex_count,
                instance_count,
                ..
            } => {
                assert!(*indexed);
                assert_eq!(*first_vertex, 0);
                assert_eq!(*vertex_count, 6);
                assert_eq!(*instance_count, 4);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(
            script.pipeline_key(0).vk_topology(),
            ash::vk::PrimitiveTopology::TRIANGLE_LIST
        );
    }

    #[test]
    fn test_compute_dispatch_key_type() {
        let script = parse_str("[test]\ncompute 4 5 6\n");
        assert_eq!(script.pipeline_key(0).ty, KeyType::Compute);
        match &script.commands()[0].op {
            CommandOp::DispatchCompute { x, y, z, .. } => {
                assert_eq!((*x, *y, *z), (4, 5, 6));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_property_assignment_with_enums() {
        let script = parse_str(
            "[test]\n\
             cullMode VK_CULL_MODE_FRONT_BIT | VK_CULL_MODE_BACK_BIT\n\
             depthTestEnable true\n\
             lineWidth 2.5\n\
             draw rect 0 0 1 1\n",
        );
        let key = script.pipeline_key(0);
        assert_eq!(key.get("cullMode"), Some(PropertyValue::Int(3)));
        assert_eq!(key.get("depthTestEnable"), Some(PropertyValue::Bool(true)));
        assert_eq!(key.get("lineWidth"), Some(PropertyValue::Float(2.5)));
    }

    #[test]
    fn test_unknown_property_is_an_error() {
        let err = parse_err("[test]\nnotAProperty 1\n");
        match err {
            ScriptError::Parse { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("invalid test command"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_entrypoint_commands() {
        let script = parse_str(
            "[test]\n\
             fragment entrypoint frag_main\n\
             tessellation control entrypoint ctrl\n\
             draw rect 0 0 1 1\n",
        );
        let key = script.pipeline_key(0);
        assert_eq!(key.entry_point(ShaderStage::Fragment), "frag_main");
        assert_eq!(key.entry_point(ShaderStage::TessCtrl), "ctrl");
        assert_eq!(key.entry_point(ShaderStage::Vertex), "main");
    }

    #[test]
    fn test_shader_section_payload_verbatim() {
        let script = parse_str(
            "[fragment shader]\n\
             #version 450\n\
             void main() {}\n\
             [test]\nclear\n",
        );
        let shaders = script.shaders_for(ShaderStage::Fragment);
        assert_eq!(shaders.len(), 1);
        assert_eq!(shaders[0].source_type, SourceType::Glsl);
        assert_eq!(
            std::str::from_utf8(&shaders[0].bytes).unwrap(),
            "#version 450\nvoid main() {}\n"
        );
    }

    #[test]
    fn test_glsl_sources_link_but_spirv_is_exclusive() {
        let script = parse_str(
            "[fragment shader]\nvoid a() {}\n[fragment shader]\nvoid b() {}\n",
        );
        assert_eq!(script.shaders_for(ShaderStage::Fragment).len(), 2);

        assert!(parse(&Source::from_string(
            "[fragment shader]\nvoid a() {}\n[fragment shader spirv]\nOpNop\n"
        ))
        .is_err());
    }

    #[test]
    fn test_binary_shader_decodes_hex() {
        let script = parse_str("[compute shader binary]\n07230203 00010000\n");
        let shaders = script.shaders_for(ShaderStage::Compute);
        assert_eq!(shaders[0].source_type, SourceType::SpirvBinary);
        assert_eq!(shaders[0].bytes[..4], [0x03, 0x02, 0x23, 0x07]);

        assert!(parse(&Source::from_string("[compute shader binary]\nzz\n")).is_err());
    }

    #[test]
    fn test_vertex_passthrough_injects_spirv() {
        let script = parse_str("[vertex shader passthrough]\n[test]\nclear\n");
        let shaders = script.shaders_for(ShaderStage::Vertex);
        assert_eq!(shaders.len(), 1);
        assert_eq!(shaders[0].source_type, SourceType::SpirvBinary);
        // SPIR-V magic in little-endian byte order
        assert_eq!(shaders[0].bytes[..4], [0x03, 0x02, 0x23, 0x07]);
    }

    #[test]
    fn test_vertex_data_section() {
        let script = parse_str(
            "[vertex data]\n\
             0/R32G32_SFLOAT 1/R8G8B8A8_UNORM\n\
             # a comment\n\
             -1 -1  255 0 0 255\n\
             1 -1  0 255 0 255\n",
        );
        let data = script.vertex_data().unwrap();
        assert_eq!(data.stride, 12);
        assert_eq!(data.attribs.len(), 2);
        assert_eq!(data.attribs[1].offset, 8);
        assert_eq!(data.n_vertices(), 2);
        assert_eq!(
            f32::from_le_bytes(data.raw[0..4].try_into().unwrap()),
            -1.0
        );
        assert_eq!(data.raw[8..12], [255, 0, 0, 255]);
    }

    #[test]
    fn test_indices_section() {
        let script = parse_str("[indices]\n0 1 2\n2 1 3\n");
        assert_eq!(script.indices(), [0, 1, 2, 2, 1, 3]);
    }

    #[test]
    fn test_requirements_from_require_section() {
        let script = parse_str(
            "[require]\n\
             geometryShader\n\
             shaderInt8\n\
             VK_KHR_storage_buffer_storage_class\n\
             framebuffer R8G8B8A8_UNORM\n\
             depthstencil D32_SFLOAT\n",
        );
        let reqs = script.requirements();
        assert_eq!(
            reqs.base_feature_names().collect::<Vec<_>>(),
            ["geometryShader"]
        );
        assert_eq!(
            reqs.extensions(),
            [
                "VK_KHR_shader_float16_int8",
                "VK_KHR_storage_buffer_storage_class"
            ]
        );
        assert_eq!(
            script.window_format().color_format.name,
            "R8G8B8A8_UNORM"
        );
        assert_eq!(
            script.window_format().depth_stencil_format.unwrap().name,
            "D32_SFLOAT"
        );
    }

    #[test]
    fn test_unknown_framebuffer_format() {
        let err = parse_err("[require]\nframebuffer R1G1B1_UNORM\n");
        match err {
            ScriptError::Parse { message, .. } => assert!(message.contains("unknown format")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
