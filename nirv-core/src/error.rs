//! Error types for the SPIR-V backend.
//!
//! Only conditions a caller can act on are reported through [`CompilerError`].
//! Broken input invariants (double SSA writes, jumps outside loops, ops that
//! should have been lowered upstream) panic with a `BUG:` prefix instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("SPIR-V lowering error: {0}")]
    SpirvError(String),

    #[error("SPIR-V builder error: {0}")]
    BuilderError(#[from] rspirv::dr::Error),

    #[error("Invalid compile options: {0}")]
    InvalidOptions(String),
}

pub type Result<T> = std::result::Result<T, CompilerError>;

/// Build a [`CompilerError::SpirvError`] from a format string.
#[macro_export]
macro_rules! err_spirv {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::SpirvError(format!($($arg)*))
    };
}

/// Return early with a [`CompilerError::SpirvError`].
#[macro_export]
macro_rules! bail_spirv {
    ($($arg:tt)*) => {
        return Err($crate::err_spirv!($($arg)*))
    };
}
