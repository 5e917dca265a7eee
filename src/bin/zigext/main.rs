//! zigext CLI - build Zig sources into Python extension modules

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use zigext::error::BridgeError;
use zigext::util::diagnostic::emit;
use zigext::util::GlobalContext;

fn main() {
    let cli = Cli::parse();
    let color = !cli.no_color;

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            match e.downcast_ref::<BridgeError>() {
                Some(err) => emit(err, color),
                None => eprintln!("error: {:#}", e),
            }
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    // Set up logging; RUST_LOG wins when set
    let default = if cli.verbose { "zigext=debug" } else { "zigext=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color)
        .with_target(false)
        .without_time()
        .init();

    let mut gctx = GlobalContext::new()?;
    gctx.set_verbose(cli.verbose);
    gctx.set_color(!cli.no_color);

    // Execute command
    match cli.command {
        Commands::Build(args) => commands::build::execute(args, &gctx),
        Commands::Plan(args) => commands::plan::execute(args, &gctx),
        Commands::Toolchain(args) => commands::toolchain::execute(args, &gctx),
        Commands::Cache(args) => commands::cache::execute(args, &gctx),
        Commands::Completions(args) => commands::completions::execute(args).map(|()| 0),
    }
}
