//! Erase command implementation

use crate::cli::RegionArgs;
use crate::commands::{open_transport, CommandResult, PercentBar};
use fpdprog_core::protocol;
use fpdprog_core::updater::{self, DeviceLayout};
use std::path::Path;

pub fn run_erase(uio: &Path, regions: &RegionArgs) -> CommandResult {
    let mut transport = open_transport(uio)?;
    let model = protocol::probe(&mut transport)?;
    println!("Found: {} {} ({} bytes)", model.vendor, model.name, model.capacity);

    let layout = DeviceLayout {
        image_offset: regions.image_offset,
        image_size: regions.image_size,
        mdata_offset: regions.mdata_offset,
        mdata_size: regions.mdata_size,
    };

    let mut bar = PercentBar::new("Erasing");
    updater::erase_device(&mut transport, model, &layout, &mut bar)?;
    bar.finish("Erase complete");
    Ok(())
}
