use crate::error::CompilerError;
use crate::options::*;

#[test]
fn test_defaults() {
    let opts = CompileOptions::default();
    assert_eq!(opts.spirv_version, SpirvVersion::new(1, 5));
    assert!(opts.explicit_lod);
    assert!(!opts.sparse_residency);
    assert!(opts.interface_listing());
    assert!(opts.validate().is_ok());
}

#[test]
fn test_interface_listing_follows_version() {
    assert!(!CompileOptions::with_version(1, 3).interface_listing());
    assert!(CompileOptions::with_version(1, 4).interface_listing());

    let forced = CompileOptions {
        interface_listing: Some(true),
        ..CompileOptions::with_version(1, 0)
    };
    assert!(forced.interface_listing());
}

#[test]
fn test_version_parsing() {
    assert_eq!("1.3".parse::<SpirvVersion>().unwrap(), SpirvVersion::new(1, 3));
    assert!(matches!("13".parse::<SpirvVersion>(), Err(CompilerError::InvalidOptions(_))));
    assert!(matches!("1.x".parse::<SpirvVersion>(), Err(CompilerError::InvalidOptions(_))));
    assert_eq!(SpirvVersion::new(1, 6).to_string(), "1.6");
}

#[test]
fn test_validate_rejects_unknown_versions() {
    assert!(CompileOptions::with_version(2, 0).validate().is_err());
    assert!(CompileOptions::with_version(1, 7).validate().is_err());
    assert!(CompileOptions::with_version(1, 0).validate().is_ok());
}

#[test]
fn test_validate_rejects_disabled_listing_on_new_versions() {
    let opts = CompileOptions {
        interface_listing: Some(false),
        ..CompileOptions::with_version(1, 5)
    };
    assert!(matches!(opts.validate(), Err(CompilerError::InvalidOptions(_))));
}

#[test]
fn test_options_deserialize_with_defaults() {
    let opts: CompileOptions =
        serde_json::from_str(r#"{ "spirv_version": { "major": 1, "minor": 2 }, "sparse_residency": true }"#).unwrap();
    assert_eq!(opts.spirv_version, SpirvVersion::new(1, 2));
    assert!(opts.sparse_residency);
    assert!(opts.explicit_lod);
    assert_eq!(opts.interface_listing, None);
}
