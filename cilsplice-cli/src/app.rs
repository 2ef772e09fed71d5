use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// cilsplice - splice hook call sites into compiled module images
#[derive(Debug, Parser)]
#[command(name = "cilsplice", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Display module overview: name, version, dependencies, and table counts.
    Info {
        /// Path to the module image file.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },

    /// Apply a splice plan to a module image.
    Patch {
        /// Path to the module image file.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Output path; the input file is overwritten in place when omitted.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Directory to probe for declared dependency images; repeatable.
        /// When given, all declared dependencies must resolve before patching.
        #[arg(short, long = "search-dir", value_name = "DIR")]
        search_dir: Vec<PathBuf>,

        /// Path to the splice plan file.
        #[arg(short, long, value_name = "FILE")]
        plan: PathBuf,

        /// Full name of the hook container type.
        #[arg(long, default_value = "Loader.Hooks")]
        container: String,

        /// Full name of the type carrying the hook router field.
        #[arg(long, default_value = "Game.Core")]
        router_type: String,

        /// Name of the static field holding the hook router instance.
        #[arg(long, default_value = "hooks")]
        router_field: String,
    },
}
