//! External shader tool invocation
//!
//! GLSL sources are compiled and SPIR-V assembly is assembled by
//! spawning the external tools (`glslangValidator`, `spirv-as`) as
//! child processes; the optional disassembly pass pipes the result
//! through `spirv-dis`. Tool names can be overridden through the
//! `VKSCRIPT_GLSLANG`, `VKSCRIPT_SPIRV_AS`, and `VKSCRIPT_SPIRV_DIS`
//! environment variables.

use std::io::Write;
use std::process::Command;

use thiserror::Error;

use crate::script::{Shader, ShaderStage, SourceType};

/// Failure to produce a SPIR-V blob from a shader section
#[derive(Error, Debug)]
pub enum ShaderBuildError {
    /// The tool could not be spawned or its files written
    #[error("failed to run {tool}: {source}")]
    Io {
        /// Tool that failed
        tool: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The tool ran and reported an error
    #[error("{tool} failed:\n{output}")]
    ToolFailed {
        /// Tool that failed
        tool: String,
        /// Combined stdout and stderr of the tool
        output: String,
    },
}

fn tool_name(env_var: &str, default: &str) -> String {
    std::env::var(env_var).unwrap_or_else(|_| default.to_owned())
}

fn io_err(tool: &str) -> impl Fn(std::io::Error) -> ShaderBuildError + '_ {
    move |source| ShaderBuildError::Io {
        tool: tool.to_owned(),
        source,
    }
}

/// Build the SPIR-V blob for one stage of a script
///
/// GLSL sources of the stage are concatenated and handed to the
/// external compiler; SPIR-V assembly goes through the assembler;
/// binary sections are returned unchanged. With `show_disassembly` the
/// resulting module is disassembled and logged.
pub fn build_stage(
    stage: ShaderStage,
    shaders: &[Shader],
    show_disassembly: bool,
) -> Result<Vec<u8>, ShaderBuildError> {
    let source_type = shaders[0].source_type;
    let spirv = match source_type {
        SourceType::SpirvBinary => shaders[0].bytes.clone(),
        SourceType::Glsl => {
            let mut source = Vec::new();
            for shader in shaders {
                source.extend_from_slice(&shader.bytes);
            }
            compile_glsl(stage, &source)?
        }
        SourceType::SpirvText => assemble_spirv(&shaders[0].bytes)?,
    };

    if show_disassembly {
        disassemble(stage, &spirv)?;
    }
    Ok(spirv)
}

fn compile_glsl(stage: ShaderStage, source: &[u8]) -> Result<Vec<u8>, ShaderBuildError> {
    let tool = tool_name("VKSCRIPT_GLSLANG", "glslangValidator");
    let err = io_err(&tool);

    let mut source_file = tempfile::NamedTempFile::new().map_err(&err)?;
    source_file.write_all(source).map_err(&err)?;
    source_file.flush().map_err(&err)?;
    let output_file = tempfile::NamedTempFile::new().map_err(&err)?;

    let output = Command::new(&tool)
        .arg("-V")
        .arg("-S")
        .arg(stage.tool_name())
        .arg("-o")
        .arg(output_file.path())
        .arg(source_file.path())
        .output()
        .map_err(&err)?;
    if !output.status.success() {
        return Err(ShaderBuildError::ToolFailed {
            tool: tool.clone(),
            output: collect_output(&output),
        });
    }

    std::fs::read(output_file.path()).map_err(&err)
}

fn assemble_spirv(source: &[u8]) -> Result<Vec<u8>, ShaderBuildError> {
    let tool = tool_name("VKSCRIPT_SPIRV_AS", "spirv-as");
    let err = io_err(&tool);

    let mut source_file = tempfile::NamedTempFile::new().map_err(&err)?;
    source_file.write_all(source).map_err(&err)?;
    source_file.flush().map_err(&err)?;
    let output_file = tempfile::NamedTempFile::new().map_err(&err)?;

    let output = Command::new(&tool)
        .arg("-o")
        .arg(output_file.path())
        .arg(source_file.path())
        .output()
        .map_err(&err)?;
    if !output.status.success() {
        return Err(ShaderBuildError::ToolFailed {
            tool: tool.clone(),
            output: collect_output(&output),
        });
    }

    std::fs::read(output_file.path()).map_err(&err)
}

fn disassemble(stage: ShaderStage, spirv: &[u8]) -> Result<(), ShaderBuildError> {
    let tool = tool_name("VKSCRIPT_SPIRV_DIS", "spirv-dis");
    let err = io_err(&tool);

    let mut spirv_file = tempfile::NamedTempFile::new().map_err(&err)?;
    spirv_file.write_all(spirv).map_err(&err)?;
    spirv_file.flush().map_err(&err)?;

    let output = Command::new(&tool)
        .arg(spirv_file.path())
        .output()
        .map_err(&err)?;
    if !output.status.success() {
        return Err(ShaderBuildError::ToolFailed {
            tool: tool.clone(),
            output: collect_output(&output),
        });
    }

    log::info!(
        "[SHADER] {} disassembly:\n{}",
        stage.section_name(),
        String::from_utf8_lossy(&output.stdout)
    );
    Ok(())
}

fn collect_output(output: &std::process::Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_sections_pass_through_unchanged() {
        let shader = Shader {
            source_type: SourceType::SpirvBinary,
            bytes: vec![0x03, 0x02, 0x23, 0x07, 1, 0, 0, 0],
        };
        let spirv = build_stage(ShaderStage::Fragment, &[shader.clone()], false).unwrap();
        assert_eq!(spirv, shader.bytes);
    }

    #[test]
    fn test_missing_tool_reports_launch_failure() {
        std::env::set_var("VKSCRIPT_SPIRV_AS", "/nonexistent/spirv-as");
        let shader = Shader {
            source_type: SourceType::SpirvText,
            bytes: b"OpNop\n".to_vec(),
        };
        let err = build_stage(ShaderStage::Vertex, &[shader], false).unwrap_err();
        std::env::remove_var("VKSCRIPT_SPIRV_AS");
        assert!(matches!(err, ShaderBuildError::Io { .. }));
    }
}
