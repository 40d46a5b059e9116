//! Command implementations

pub mod erase;
pub mod info;
pub mod program;
pub mod version;

use crate::cli::SelectArgs;
use fpdprog_core::flash::ProgressReport;
use fpdprog_core::image::{self, SelectionCriteria};
use fpdprog_core::regs::{Transport, UioMap, REG_BLOCK_LEN};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Map the controller's register block through a UIO device
pub fn open_transport(uio: &Path) -> Result<Transport<UioMap>, Box<dyn std::error::Error>> {
    let map = UioMap::open(uio, REG_BLOCK_LEN)?;
    Ok(Transport::new(map))
}

/// Pick the image to operate on from a file's contents
///
/// Exactly one image must match the criteria; a single-image file with no
/// criteria passes through, and an undiscriminated bundle fails with the
/// candidate list.
pub fn select_from_file<'a>(
    bytes: &'a [u8],
    select: &SelectArgs,
) -> Result<&'a [u8], Box<dyn std::error::Error>> {
    let members = image::images(bytes)?;
    let criteria = SelectionCriteria {
        pid: select.pid.as_deref(),
        name: select.name.as_deref(),
        vendor_marker: select.vendor_marker.as_deref(),
    };
    let (chosen, _) = image::select_image(&members, &criteria)?;
    Ok(chosen)
}

/// Progress bar over the engine's overall percentage
pub struct PercentBar {
    bar: ProgressBar,
}

impl PercentBar {
    pub fn new(label: &'static str) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message(label);
        Self { bar }
    }

    pub fn finish(self, message: &'static str) {
        self.bar.set_position(100);
        self.bar.finish_with_message(message);
    }
}

impl ProgressReport for PercentBar {
    fn report(&mut self, percent: u8) {
        self.bar.set_position(u64::from(percent));
    }
}
