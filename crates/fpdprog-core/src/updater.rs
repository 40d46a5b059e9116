//! Device update flow: version gating and ordered region programming
//!
//! A device carries two flash regions: the firmware image and a copy of
//! the image's metadata block. The metadata copy is what reports the
//! running version, so it is erased first and reprogrammed last; a power
//! cut mid-update leaves the device looking unprogrammed rather than
//! claiming a version it does not run.

use crate::chip::FlashModel;
use crate::error::{Error, Result};
use crate::flash::{self, NoProgress, ProgressReport};
use crate::image::{self, FpdVersion, Metadata};
use crate::protocol;
use crate::regs::{RegisterAccess, Transport};
use log::{info, warn};

/// Where the image and its metadata copy live on flash
#[derive(Debug, Clone, Copy)]
pub struct DeviceLayout {
    /// Byte offset of the firmware image region
    pub image_offset: u32,
    /// Size of the firmware image region
    pub image_size: u32,
    /// Byte offset of the metadata region
    pub mdata_offset: u32,
    /// Size of the metadata region
    pub mdata_size: u32,
}

/// Knobs for [`program_device`]
#[derive(Debug, Clone, Copy)]
pub struct ProgramOptions {
    /// Program even when the running version is not older than the
    /// packaged one
    pub force: bool,
    /// Read back and compare after programming
    pub verify: bool,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        Self {
            force: false,
            verify: true,
        }
    }
}

/// Version of the firmware currently on the device, if any
///
/// Reads the on-flash metadata region and decodes it. An erased or
/// unparseable region means the device has no (intact) firmware and
/// reports `None`.
pub fn running_version<R: RegisterAccess>(
    t: &mut Transport<R>,
    model: &FlashModel,
    layout: &DeviceLayout,
) -> Result<Option<FpdVersion>> {
    let mut mdata = vec![0u8; layout.mdata_size as usize];
    protocol::read(t, model, layout.mdata_offset, &mut mdata)?;
    if mdata.iter().all(|b| *b == flash::ERASED_VALUE) {
        return Ok(None);
    }
    match image::parse_metadata(&mdata) {
        Ok(metadata) => Ok(Some(metadata.fpd_version())),
        Err(e) => {
            warn!("on-flash metadata is unreadable, treating device as unprogrammed: {e}");
            Ok(None)
        }
    }
}

fn check_layout(model: &FlashModel, layout: &DeviceLayout, payload_len: usize) -> Result<()> {
    if payload_len as u32 > layout.image_size {
        return Err(Error::InvalidArgument(format!(
            "firmware payload ({} bytes) does not fit the {} byte image region",
            payload_len, layout.image_size
        )));
    }
    for (name, off, size) in [
        ("image", layout.image_offset, layout.image_size),
        ("metadata", layout.mdata_offset, layout.mdata_size),
    ] {
        match off.checked_add(size) {
            Some(end) if end <= model.capacity => {}
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "{} region 0x{:X}+0x{:X} exceeds the {} byte flash",
                    name, off, size, model.capacity
                )))
            }
        }
    }
    Ok(())
}

/// Program a firmware image onto the device
///
/// Unless forced, only upgrades are allowed: the packaged version must be
/// newer than whatever the device currently reports. The metadata region
/// is erased up front and rewritten only after the image itself has been
/// programmed.
pub fn program_device<R: RegisterAccess>(
    t: &mut Transport<R>,
    model: &FlashModel,
    layout: &DeviceLayout,
    image_bytes: &[u8],
    opts: ProgramOptions,
    progress: &mut dyn ProgressReport,
) -> Result<()> {
    let (mdata, raw_payload) = image::split_image(image_bytes)?;
    let metadata = image::parse_metadata(mdata)?;
    let packaged = metadata.fpd_version();

    let payload = match &metadata {
        Metadata::V1(_) => raw_payload.to_vec(),
        Metadata::V2(body) | Metadata::V3(body) => image::payload_data(body, raw_payload)?,
    };
    check_layout(model, layout, payload.len())?;
    if mdata.len() as u32 > layout.mdata_size {
        return Err(Error::InvalidArgument(format!(
            "metadata block ({} bytes) does not fit the {} byte metadata region",
            mdata.len(),
            layout.mdata_size
        )));
    }

    if !opts.force {
        if let Some(running) = running_version(t, model, layout)? {
            if (running.major, running.minor) >= (packaged.major, packaged.minor) {
                return Err(Error::InvalidArgument(format!(
                    "device already runs {} and the image packages {}; use force to downgrade or reprogram",
                    running, packaged
                )));
            }
        }
    }

    info!(
        "programming {} firmware {} ({} payload bytes)",
        model.name,
        packaged,
        payload.len()
    );

    flash::erase_range(t, model, layout.mdata_offset, layout.mdata_size, &mut NoProgress)?;
    flash::program(t, model, layout.image_offset, &payload, opts.verify, progress)?;
    flash::program(t, model, layout.mdata_offset, mdata, opts.verify, &mut NoProgress)?;

    info!("device programmed with firmware {}", packaged);
    Ok(())
}

/// Erase both device regions, metadata first
pub fn erase_device<R: RegisterAccess>(
    t: &mut Transport<R>,
    model: &FlashModel,
    layout: &DeviceLayout,
    progress: &mut dyn ProgressReport,
) -> Result<()> {
    flash::erase_range(t, model, layout.mdata_offset, layout.mdata_size, &mut NoProgress)?;
    flash::erase_range(t, model, layout.image_offset, layout.image_size, progress)?;
    Ok(())
}
