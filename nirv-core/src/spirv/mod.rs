//! SPIR-V code generation backend.
//!
//! [`compile`] lowers one [`Shader`] into a SPIR-V module with a single
//! `main` entry point. Lowering is a single forward walk:
//!
//! 1. scan the shader for the builtins and system values it touches and
//!    derive stage capabilities and the memory model,
//! 2. declare global variables and resource bindings,
//! 3. emit the body of `main` block by block with structured merges,
//! 4. emit the entry point, execution modes, capabilities and extensions,
//!    then assemble.

mod alu;
mod cf;
mod context;
mod entry;
mod intrinsics;
mod tex;
mod types;
mod values;

#[cfg(test)]
mod caps_tests;
#[cfg(test)]
mod cf_tests;
#[cfg(test)]
mod memory_tests;

use log::debug;
use rspirv::binary::Assemble;

use crate::error::Result;
use crate::interface::ShaderInterface;
use crate::ir::{Shader, Stage};
use crate::options::CompileOptions;
use context::Ctx;
use entry::StageUsage;

/// A compiled SPIR-V module.
#[derive(Debug, Clone)]
pub struct SpirvShader {
    pub words: Vec<u32>,
    /// Word offset of the `OutputVertices` literal of a tessellation control
    /// shader, so a driver can patch it without recompiling. 0 for other stages.
    pub tcs_vertices_out_word: u32,
    interface: ShaderInterface,
}

impl SpirvShader {
    /// Summary of what the module declares.
    pub fn interface(&self) -> &ShaderInterface {
        &self.interface
    }

    /// The module as little-endian bytes, as written to a `.spv` file.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

/// Lower `shader` to SPIR-V.
pub fn compile(shader: &Shader, options: &CompileOptions) -> Result<SpirvShader> {
    options.validate()?;
    debug!(
        "compiling {:?} shader{} for SPIR-V {}",
        shader.stage(),
        shader.name.as_deref().map(|n| format!(" '{}'", n)).unwrap_or_default(),
        options.spirv_version
    );

    let mut ctx = Ctx::new(shader, options);
    let usage = StageUsage::scan(shader);
    ctx.emit_stage_capabilities(&usage);
    ctx.emit_memory_model()?;

    ctx.emit_variables()?;
    ctx.emit_workgroup_size_spec_consts();

    let main = ctx.emit_main()?;
    ctx.emit_entry_point(main, &usage);
    ctx.emit_capabilities();

    let interface = ShaderInterface {
        execution_model: format!("{:?}", entry::execution_model(ctx.stage)),
        spirv_version: options.spirv_version.to_string(),
        capabilities: ctx.capabilities().map(|c| format!("{:?}", c)).collect(),
        extensions: ctx.extensions().map(str::to_string).collect(),
        interface_variables: ctx.interface.len(),
        word_count: 0,
    };

    let words = ctx.builder.module().assemble();
    let tcs_vertices_out_word = if shader.stage() == Stage::TessControl {
        entry::find_output_vertices_word(&words)
    } else {
        0
    };
    debug!("emitted {} words", words.len());

    Ok(SpirvShader {
        interface: ShaderInterface {
            word_count: words.len(),
            ..interface
        },
        words,
        tcs_vertices_out_word,
    })
}
