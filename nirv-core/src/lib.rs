//! Structured SSA shader IR to SPIR-V.
//!
//! Build a [`Shader`] with [`ir::builder::ShaderBuilder`] (or deserialize one
//! from JSON) and hand it to [`compile`] together with [`CompileOptions`]:
//!
//! ```ignore
//! let mut b = ShaderBuilder::new(StageInfo::compute([1, 1, 1]));
//! // ...
//! let spirv = nirv_core::compile(&b.finish()?, &CompileOptions::default())?;
//! ```

pub mod error;
pub mod interface;
pub mod ir;
pub mod options;
pub mod spirv;

#[cfg(test)]
mod options_tests;

pub use error::{CompilerError, Result};
pub use interface::ShaderInterface;
pub use ir::Shader;
pub use options::{CompileOptions, SpirvVersion};
pub use spirv::{SpirvShader, compile};
