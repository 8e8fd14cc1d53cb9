//! Vesta command-line tool
//!
//! Loads program images into an isolate and exposes the engine's mirrors,
//! code generator and breakpoint resolution from the shell.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;
use simple_logger::SimpleLogger;

#[derive(Parser)]
#[command(name = "vesta")]
#[command(about = "Vesta VM engine toolkit", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the libraries, classes and members of a program image
    Inspect {
        /// Program image (JSON)
        image: PathBuf,
        /// Include the core library
        #[arg(long)]
        core: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Compile a flow graph against a program image and print the code
    Compile {
        /// Program image (JSON)
        image: PathBuf,
        /// Flow graph (JSON)
        graph: PathBuf,
        /// Isolate options (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Compile for this function instead of the one named in the graph,
        /// written `name` or `Class.name`
        #[arg(short, long)]
        function: Option<String>,
        /// Library the function is looked up in (defaults to the root library)
        #[arg(long)]
        library: Option<String>,
        /// Set a breakpoint before compiling, written `url:line`
        #[arg(short, long = "break", value_name = "URL:LINE")]
        breakpoints: Vec<String>,
        /// Print JSON instead of a listing
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let level: LevelFilter = level
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid log level: {}", level))?;
    SimpleLogger::new().with_level(level).init()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Inspect { image, core, json } => {
            commands::inspect::execute(commands::inspect::InspectArgs { image, core, json })
        }

        Commands::Compile {
            image,
            graph,
            config,
            function,
            library,
            breakpoints,
            json,
        } => commands::compile::execute(commands::compile::CompileArgs {
            image,
            graph,
            config,
            function,
            library,
            breakpoints,
            json,
        }),
    }
}
