//! Version command implementation

use crate::cli::{RegionArgs, SelectArgs};
use crate::commands::{open_transport, select_from_file, CommandResult};
use fpdprog_core::image;
use fpdprog_core::protocol;
use fpdprog_core::updater::{self, DeviceLayout};
use std::fs;
use std::path::Path;

pub fn run_version(
    uio: &Path,
    regions: &RegionArgs,
    input: Option<&Path>,
    select: &SelectArgs,
) -> CommandResult {
    let mut transport = open_transport(uio)?;
    let model = protocol::probe(&mut transport)?;

    let layout = DeviceLayout {
        image_offset: regions.image_offset,
        image_size: regions.image_size,
        mdata_offset: regions.mdata_offset,
        mdata_size: regions.mdata_size,
    };

    match updater::running_version(&mut transport, model, &layout)? {
        Some(running) => println!("Running:  {}", running),
        None => println!("Running:  none (device is unprogrammed)"),
    }

    if let Some(input) = input {
        let bytes = fs::read(input)?;
        let image_bytes = select_from_file(&bytes, select)?;
        println!("Packaged: {}", image::packaged_version(image_bytes)?);
    }
    Ok(())
}
