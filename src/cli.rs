//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
pub fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser)]
#[command(name = "fpdprog")]
#[command(author, version, about = "SPI-NOR field-programmable device updater", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// How to reach the SPI controller registers
#[derive(clap::Args, Debug, Clone)]
pub struct DeviceArgs {
    /// UIO device mapping the SPI controller register block (e.g. /dev/uio0)
    #[arg(short, long)]
    pub uio: PathBuf,
}

/// Where the image and metadata regions live on flash
#[derive(clap::Args, Debug, Clone)]
pub struct RegionArgs {
    /// Byte offset of the firmware image region (hex or decimal)
    #[arg(long, value_parser = parse_hex_u32)]
    pub image_offset: u32,

    /// Size of the firmware image region
    #[arg(long, value_parser = parse_hex_u32)]
    pub image_size: u32,

    /// Byte offset of the metadata region
    #[arg(long, value_parser = parse_hex_u32)]
    pub mdata_offset: u32,

    /// Size of the metadata region
    #[arg(long, value_parser = parse_hex_u32)]
    pub mdata_size: u32,
}

/// Which image of a bundle to use
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SelectArgs {
    /// Card product ID to match against the image's compatibility entries
    #[arg(long)]
    pub pid: Option<String>,

    /// FPD name to match
    #[arg(long)]
    pub name: Option<String>,

    /// Vendor marker: a second name token that must also appear in the
    /// image's name list
    #[arg(long)]
    pub vendor_marker: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Program a firmware image onto the device
    Program {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        regions: RegionArgs,

        /// Image file (single image or multi-image bundle)
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        select: SelectArgs,

        /// Program even when the running version is not older
        #[arg(long)]
        force: bool,

        /// Skip the post-program readback comparison
        #[arg(long)]
        no_verify: bool,
    },

    /// Erase the device's metadata and image regions
    Erase {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        regions: RegionArgs,
    },

    /// Identify the flash part behind the controller
    Info {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Show running and packaged firmware versions
    Version {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        regions: RegionArgs,

        /// Image file to report the packaged version of
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[command(flatten)]
        select: SelectArgs,
    },
}
