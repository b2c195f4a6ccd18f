//! Compilation options.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CompilerError, Result};

/// Target SPIR-V version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpirvVersion {
    pub major: u8,
    pub minor: u8,
}

impl SpirvVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        SpirvVersion { major, minor }
    }

    pub fn at_least(self, major: u8, minor: u8) -> bool {
        self >= SpirvVersion::new(major, minor)
    }
}

impl Default for SpirvVersion {
    fn default() -> Self {
        SpirvVersion::new(1, 5)
    }
}

impl fmt::Display for SpirvVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SpirvVersion {
    type Err = CompilerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CompilerError::InvalidOptions(format!("malformed SPIR-V version '{}'", s));
        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        let major = major.trim().parse().map_err(|_| invalid())?;
        let minor = minor.trim().parse().map_err(|_| invalid())?;
        Ok(SpirvVersion { major, minor })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub spirv_version: SpirvVersion,
    /// List every global the entry point touches, not only inputs and
    /// outputs. Derived from the version when unset.
    pub interface_listing: Option<bool>,
    /// The host runs with the Vulkan memory model.
    pub vulkan_memory_model: bool,
    /// The host supports sparse residency queries.
    pub sparse_residency: bool,
    /// Give implicit-lod sampling outside fragment shaders an explicit lod of 0.
    pub explicit_lod: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            spirv_version: SpirvVersion::default(),
            interface_listing: None,
            vulkan_memory_model: false,
            sparse_residency: false,
            explicit_lod: true,
        }
    }
}

impl CompileOptions {
    pub fn with_version(major: u8, minor: u8) -> Self {
        CompileOptions {
            spirv_version: SpirvVersion::new(major, minor),
            ..Default::default()
        }
    }

    /// Whether the entry point must list all global variables (SPIR-V 1.4+).
    pub fn interface_listing(&self) -> bool {
        self.interface_listing.unwrap_or(self.spirv_version.at_least(1, 4))
    }

    pub fn validate(&self) -> Result<()> {
        let v = self.spirv_version;
        if v.major != 1 || v.minor > 6 {
            return Err(CompilerError::InvalidOptions(format!(
                "unsupported SPIR-V version {} (expected 1.0 to 1.6)",
                v
            )));
        }
        if self.interface_listing == Some(false) && v.at_least(1, 4) {
            return Err(CompilerError::InvalidOptions(format!(
                "SPIR-V {} requires every referenced global in the entry point interface",
                v
            )));
        }
        Ok(())
    }
}
