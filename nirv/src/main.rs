use clap::{Parser, Subcommand};
use log::info;
use nirv_core::ir::Shader;
use nirv_core::options::{CompileOptions, SpirvVersion};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Times the execution of a closure and prints the elapsed time if verbose.
fn time<T, F: FnOnce() -> T>(name: &str, verbose: bool, f: F) -> T {
    let start = Instant::now();
    let result = f();
    if verbose {
        let elapsed = start.elapsed().as_millis();
        eprintln!("{}: {}ms", name, elapsed);
    }
    result
}

#[derive(Parser)]
#[command(name = "nirv")]
#[command(about = "Lowers structured SSA shader IR (JSON) to SPIR-V", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the options file.
#[derive(clap::Args)]
struct OptionArgs {
    /// JSON file holding a full options record
    #[arg(long, value_name = "FILE")]
    options: Option<PathBuf>,

    /// Target SPIR-V version, e.g. 1.3
    #[arg(long, value_name = "X.Y")]
    spirv_version: Option<SpirvVersion>,

    /// Declare the Vulkan memory model
    #[arg(long)]
    vulkan_memory_model: bool,

    /// The host supports sparse residency
    #[arg(long)]
    sparse: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a shader to SPIR-V
    Compile {
        /// Input shader (JSON)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file (defaults to input name with .spv extension)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        #[command(flatten)]
        options: OptionArgs,

        /// Also write the interface summary as JSON
        #[arg(long, value_name = "FILE")]
        interface: Option<PathBuf>,

        /// Print verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Compile a shader and discard the output
    Check {
        /// Input shader (JSON)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[command(flatten)]
        options: OptionArgs,

        /// Print verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Debug, Error)]
enum DriverError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Compilation error: {0}")]
    CompilationError(#[from] nirv_core::error::CompilerError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn main() -> Result<(), DriverError> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            input,
            output,
            options,
            interface,
            verbose,
        } => {
            compile_file(input, output, options, interface, verbose)?;
        }
        Commands::Check {
            input,
            options,
            verbose,
        } => {
            check_file(input, options, verbose)?;
        }
    }

    Ok(())
}

fn load_options(args: &OptionArgs) -> Result<CompileOptions, DriverError> {
    let mut options = match &args.options {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => CompileOptions::default(),
    };
    if let Some(version) = args.spirv_version {
        options.spirv_version = version;
    }
    if args.vulkan_memory_model {
        options.vulkan_memory_model = true;
    }
    if args.sparse {
        options.sparse_residency = true;
    }
    Ok(options)
}

fn load_shader(input: &Path) -> Result<Shader, DriverError> {
    let source = fs::read_to_string(input)?;
    Ok(serde_json::from_str(&source)?)
}

fn compile_file(
    input: PathBuf,
    output: Option<PathBuf>,
    option_args: OptionArgs,
    interface_path: Option<PathBuf>,
    verbose: bool,
) -> Result<(), DriverError> {
    if verbose {
        info!("Compiling {}...", input.display());
    }

    let options = load_options(&option_args)?;
    let shader = time("parse", verbose, || load_shader(&input))?;
    let spirv = time("lower", verbose, || nirv_core::compile(&shader, &options))?;

    let output_path = output.unwrap_or_else(|| {
        let mut path = input.clone();
        path.set_extension("spv");
        path
    });
    fs::write(&output_path, spirv.to_bytes())?;

    if let Some(path) = interface_path {
        fs::write(&path, spirv.interface().to_json()?)?;
        if verbose {
            info!("Wrote interface to {}", path.display());
        }
    }

    if verbose {
        info!("Successfully compiled to {}", output_path.display());
        info!("Generated {} words of SPIR-V", spirv.words.len());
    }

    Ok(())
}

fn check_file(input: PathBuf, option_args: OptionArgs, verbose: bool) -> Result<(), DriverError> {
    if verbose {
        info!("Checking {}...", input.display());
    }

    let options = load_options(&option_args)?;
    let shader = time("parse", verbose, || load_shader(&input))?;
    time("lower", verbose, || nirv_core::compile(&shader, &options))?;

    if verbose {
        info!("{} is valid", input.display());
    }

    Ok(())
}
