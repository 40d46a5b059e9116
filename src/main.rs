//! fpdprog - SPI-NOR field-programmable device updater
//!
//! Talks to a memory-mapped SPI controller (exposed through UIO) to
//! identify the attached NOR part, then programs, erases, and inspects
//! the firmware image and metadata regions a device carries on it.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let result = match cli.command {
        Commands::Program {
            device,
            regions,
            input,
            select,
            force,
            no_verify,
        } => commands::program::run_program(&device.uio, &regions, &input, &select, force, no_verify),
        Commands::Erase { device, regions } => commands::erase::run_erase(&device.uio, &regions),
        Commands::Info { device } => commands::info::run_info(&device.uio),
        Commands::Version {
            device,
            regions,
            input,
            select,
        } => commands::version::run_version(&device.uio, &regions, input.as_deref(), &select),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
