//! Shader interface summary for JSON output.
//!
//! Describes what a compiled module declares: its execution model, the
//! capabilities and extensions it requires and the size of its entry point
//! interface.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderInterface {
    /// SPIR-V execution model of `main` (`Vertex`, `Fragment`, `GLCompute`, ...).
    pub execution_model: String,
    /// Target SPIR-V version, `major.minor`.
    pub spirv_version: String,
    /// Declared capabilities, in the order they were first required.
    pub capabilities: Vec<String>,
    pub extensions: Vec<String>,
    /// Number of variables listed on `OpEntryPoint`.
    pub interface_variables: usize,
    /// Size of the module in 32-bit words.
    pub word_count: usize,
}

impl ShaderInterface {
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c == name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
