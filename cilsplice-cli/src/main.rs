mod app;
mod commands;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // info+ on stderr; --verbose enables debug; RUST_LOG overrides
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_module("cilsplice", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    match &cli.command {
        Command::Info { path } => commands::info::run(path),
        Command::Patch {
            path,
            output,
            search_dir,
            plan,
            container,
            router_type,
            router_field,
        } => commands::patch::run(&commands::patch::PatchOptions {
            path: path.clone(),
            output: output.clone(),
            search_dirs: search_dir.clone(),
            plan: plan.clone(),
            container: container.clone(),
            router_type: router_type.clone(),
            router_field: router_field.clone(),
        }),
    }
}
