//! Range-level erase, program, and verify

use super::{
    ProgressReport, ERASED_VALUE, ERASE_PERCENT, PROGRAM_PERCENT, REPORT_INTERVAL, VERIFY_PERCENT,
};
use crate::chip::FlashModel;
use crate::error::{Error, Result};
use crate::protocol;
use crate::regs::{RegisterAccess, Transport};

/// Segments covered by the byte range `[addr, addr + len)`
///
/// Returns `(start, end)` segment indices, `end` exclusive.
pub fn segment_range(addr: u32, len: u32, seg: u32) -> Result<(u32, u32)> {
    if len == 0 {
        return Err(Error::InvalidArgument("zero-length range".into()));
    }
    let end = u64::from(addr) + u64::from(len);
    Ok((addr / seg, ((end - 1) / u64::from(seg) + 1) as u32))
}

/// Held copies of the first and last sectors covered by a range
///
/// The requested range may start or end mid-sector, but erase works on
/// whole sectors. The covered boundary sectors are read before anything is
/// destroyed so the untouched head and tail can be merged or written back.
/// A range inside a single sector holds that one sector only.
pub struct BoundarySnapshot {
    addr: u32,
    len: u32,
    start_sec: u32,
    end_sec: u32,
    sector_size: u32,
    page_size: u32,
    first: Vec<u8>,
    last: Option<Vec<u8>>,
}

impl BoundarySnapshot {
    /// Read and hold the boundary sectors of `[addr, addr + len)`
    pub fn capture<R: RegisterAccess>(
        t: &mut Transport<R>,
        model: &FlashModel,
        addr: u32,
        len: u32,
    ) -> Result<Self> {
        let sector_size = model.sector_size;
        let (start_sec, end_sec) = segment_range(addr, len, sector_size)?;

        let mut first = vec![0u8; sector_size as usize];
        protocol::read(t, model, start_sec * sector_size, &mut first)?;

        let last = if end_sec - start_sec > 1 {
            let mut buf = vec![0u8; sector_size as usize];
            protocol::read(t, model, (end_sec - 1) * sector_size, &mut buf)?;
            Some(buf)
        } else {
            None
        };

        Ok(Self {
            addr,
            len,
            start_sec,
            end_sec,
            sector_size: model.sector_size,
            page_size: model.page_size,
            first,
            last,
        })
    }

    fn held(&self, sec: u32) -> Option<&[u8]> {
        if sec == self.start_sec {
            Some(&self.first)
        } else if sec == self.end_sec - 1 {
            self.last.as_deref()
        } else {
            None
        }
    }

    /// Sector contents to program: the held copy (or blank for middle
    /// sectors) overlaid with the slice of `data` that maps onto `sec`
    fn merged_sector(&self, sec: u32, data: &[u8]) -> Vec<u8> {
        let ss = self.sector_size;
        let mut buf = match self.held(sec) {
            Some(held) => held.to_vec(),
            None => vec![ERASED_VALUE; ss as usize],
        };
        let sector_base = sec * ss;
        let from = self.addr.max(sector_base);
        let to = (self.addr + self.len).min(sector_base + ss);
        buf[(from - sector_base) as usize..(to - sector_base) as usize]
            .copy_from_slice(&data[(from - self.addr) as usize..(to - self.addr) as usize]);
        buf
    }

    /// Rewrite the parts of the held sectors that lie outside the range
    ///
    /// Called after an erase pass so a partially covered boundary sector
    /// gets its untouched head and tail back. Pages entirely inside the
    /// range stay erased.
    pub fn restore_outside_range<R: RegisterAccess>(
        &self,
        t: &mut Transport<R>,
        model: &FlashModel,
    ) -> Result<()> {
        let boundary_secs = if self.last.is_some() {
            vec![self.start_sec, self.end_sec - 1]
        } else {
            vec![self.start_sec]
        };

        let pages_per_sector = self.sector_size / self.page_size;
        for sec in boundary_secs {
            let held = self.held(sec).expect("boundary sector is held");
            let sector_base = sec * self.sector_size;
            for pg in 0..pages_per_sector {
                let page_addr = sector_base + pg * self.page_size;
                if page_addr >= self.addr && page_addr + self.page_size <= self.addr + self.len {
                    continue;
                }
                let start = (pg * self.page_size) as usize;
                let page = &held[start..start + self.page_size as usize];
                protocol::write_page(t, model, page_addr, page)?;
            }
        }
        Ok(())
    }

    /// Copy of the snapshot with the requested range blanked to 0xFF,
    /// matching what the flash holds right after the erase pass
    fn erased_view(&self) -> Self {
        let blank = |sec: u32, held: &[u8]| -> Vec<u8> {
            let mut buf = held.to_vec();
            let sector_base = sec * self.sector_size;
            let from = self.addr.max(sector_base);
            let to = (self.addr + self.len).min(sector_base + self.sector_size);
            for b in &mut buf[(from - sector_base) as usize..(to - sector_base) as usize] {
                *b = ERASED_VALUE;
            }
            buf
        };
        Self {
            addr: self.addr,
            len: self.len,
            start_sec: self.start_sec,
            end_sec: self.end_sec,
            sector_size: self.sector_size,
            page_size: self.page_size,
            first: blank(self.start_sec, &self.first),
            last: self
                .last
                .as_ref()
                .map(|held| blank(self.end_sec - 1, held)),
        }
    }
}

/// Erase every sector covered by `[addr, addr + len)` and verify each one
/// reads back as 0xFF
///
/// When the range is not sector-aligned the untouched parts of the
/// boundary sectors are captured first and written back afterwards, so
/// only the requested bytes end up erased. Progress spans the erase band
/// (0..=33).
pub fn erase_range<R: RegisterAccess>(
    t: &mut Transport<R>,
    model: &FlashModel,
    addr: u32,
    len: u32,
    progress: &mut dyn ProgressReport,
) -> Result<()> {
    // Reject before any sector is touched
    protocol::check_range(model, addr, len as usize)?;
    let (start_sec, end_sec) = segment_range(addr, len, model.sector_size)?;

    if !model.supports_erase {
        log::warn!("{} {} does not support erase", model.vendor, model.name);
        return Ok(());
    }

    let unaligned = addr % model.sector_size != 0 || (addr + len) % model.sector_size != 0;
    let snapshot = if unaligned {
        log::debug!(
            "unaligned erase 0x{:08X}+0x{:X}, holding boundary sectors",
            addr,
            len
        );
        Some(BoundarySnapshot::capture(t, model, addr, len)?)
    } else {
        None
    };

    let nsec = end_sec - start_sec;
    let cadence = report_cadence(nsec, ERASE_PERCENT);

    let mut readback = vec![0u8; model.sector_size as usize];
    for sec in start_sec..end_sec {
        let sector_addr = sec * model.sector_size;
        protocol::erase_sector(t, model, sector_addr)?;

        protocol::read(t, model, sector_addr, &mut readback)?;
        if let Some(pos) = readback.iter().position(|b| *b != ERASED_VALUE) {
            return Err(Error::VerifyFailed {
                addr: sector_addr + pos as u32,
                expected: ERASED_VALUE,
                found: readback[pos],
            });
        }

        let rel = sec - start_sec;
        if rel == nsec - 1 {
            progress.report(ERASE_PERCENT);
        } else if rel > 0 && rel % cadence == 0 {
            progress.report(REPORT_INTERVAL * (rel / cadence) as u8);
        }
    }
    log::info!("erased 0x{:X} bytes at 0x{:08X}", len, addr);

    if let Some(snapshot) = snapshot {
        snapshot.erased_view().restore_outside_range(t, model)?;
    }
    Ok(())
}

/// Program `data` at `addr`, preserving the rest of any partially covered
/// sector
///
/// Phases: capture boundary sectors, erase the covered range (with 0xFF
/// verification), program merged data page by page, then verify the range
/// against `data` when both the caller and the part descriptor ask for it.
pub fn program<R: RegisterAccess>(
    t: &mut Transport<R>,
    model: &FlashModel,
    addr: u32,
    data: &[u8],
    verify: bool,
    progress: &mut dyn ProgressReport,
) -> Result<()> {
    let len = data.len() as u32;
    protocol::check_range(model, addr, data.len())?;
    let snapshot = BoundarySnapshot::capture(t, model, addr, len)?;
    let (start_sec, end_sec) = (snapshot.start_sec, snapshot.end_sec);

    erase_range(t, model, addr, len, progress)?;

    let pages_per_sector = model.sector_size / model.page_size;
    let total_pages = (end_sec - start_sec) * pages_per_sector;
    let cadence = report_cadence(total_pages, PROGRAM_PERCENT);

    for sec in start_sec..end_sec {
        let buf = snapshot.merged_sector(sec, data);
        let sector_base = sec * model.sector_size;
        for pg in 0..pages_per_sector {
            let start = (pg * model.page_size) as usize;
            let page = &buf[start..start + model.page_size as usize];
            protocol::write_page(t, model, sector_base + pg * model.page_size, page)?;

            let curr = (sec - start_sec) * pages_per_sector + pg;
            if curr == total_pages - 1 {
                progress.report(ERASE_PERCENT + PROGRAM_PERCENT);
            } else if curr > 0 && curr % cadence == 0 {
                progress.report(ERASE_PERCENT + REPORT_INTERVAL * (curr / cadence) as u8);
            }
        }
    }
    log::info!("programmed 0x{:X} bytes at 0x{:08X}", len, addr);

    if verify && model.verify_after_program {
        verify_range(t, model, addr, data, progress)?;
    }
    Ok(())
}

/// Compare the flash range at `addr` against `data`
///
/// Fails with the absolute flash offset of the first mismatch. Progress
/// spans the verify band (67..=100).
pub fn verify_range<R: RegisterAccess>(
    t: &mut Transport<R>,
    model: &FlashModel,
    addr: u32,
    data: &[u8],
    progress: &mut dyn ProgressReport,
) -> Result<()> {
    let len = data.len() as u32;
    let (start_sec, end_sec) = segment_range(addr, len, model.sector_size)?;
    let nsec = end_sec - start_sec;
    let cadence = report_cadence(nsec, VERIFY_PERCENT);
    let base = ERASE_PERCENT + PROGRAM_PERCENT;

    let mut readback = vec![0u8; model.sector_size as usize];
    for sec in start_sec..end_sec {
        let sector_base = sec * model.sector_size;
        protocol::read(t, model, sector_base, &mut readback)?;

        let from = addr.max(sector_base);
        let to = (addr + len).min(sector_base + model.sector_size);
        for a in from..to {
            let expected = data[(a - addr) as usize];
            let found = readback[(a - sector_base) as usize];
            if found != expected {
                return Err(Error::VerifyFailed {
                    addr: a,
                    expected,
                    found,
                });
            }
        }

        let rel = sec - start_sec;
        if rel == nsec - 1 {
            progress.report(base + VERIFY_PERCENT);
        } else if rel > 0 && rel % cadence == 0 {
            progress.report(base + REPORT_INTERVAL * (rel / cadence) as u8);
        }
    }
    log::info!("verified 0x{:X} bytes at 0x{:08X}", len, addr);
    Ok(())
}

/// How many work units pass between progress reports so a phase emits at
/// most `band / REPORT_INTERVAL` callbacks
fn report_cadence(units: u32, band: u8) -> u32 {
    let slots = u32::from(band / REPORT_INTERVAL);
    let mut cadence = units / slots;
    if units % slots != 0 {
        cadence += 1;
    }
    cadence.max(1)
}
