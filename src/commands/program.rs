//! Program command implementation

use crate::cli::{RegionArgs, SelectArgs};
use crate::commands::{open_transport, select_from_file, CommandResult, PercentBar};
use fpdprog_core::image;
use fpdprog_core::protocol;
use fpdprog_core::updater::{self, DeviceLayout, ProgramOptions};
use std::fs;
use std::path::Path;

pub fn run_program(
    uio: &Path,
    regions: &RegionArgs,
    input: &Path,
    select: &SelectArgs,
    force: bool,
    no_verify: bool,
) -> CommandResult {
    let bytes = fs::read(input)?;
    let image_bytes = select_from_file(&bytes, select)?;
    let packaged = image::packaged_version(image_bytes)?;
    println!("Image packages firmware {}", packaged);

    let mut transport = open_transport(uio)?;
    let model = protocol::probe(&mut transport)?;
    println!("Found: {} {} ({} bytes)", model.vendor, model.name, model.capacity);

    let layout = DeviceLayout {
        image_offset: regions.image_offset,
        image_size: regions.image_size,
        mdata_offset: regions.mdata_offset,
        mdata_size: regions.mdata_size,
    };
    let opts = ProgramOptions {
        force,
        verify: !no_verify,
    };

    let mut bar = PercentBar::new("Programming");
    updater::program_device(&mut transport, model, &layout, image_bytes, opts, &mut bar)?;
    bar.finish("Program complete");

    println!("Device now carries firmware {}", packaged);
    Ok(())
}
