//! Page and sector primitives on top of the register transport
//!
//! Everything here takes the transport and the identified part descriptor;
//! no state is kept between calls. Poll loops against flash-side status
//! registers are bounded by [`READY_POLL_LIMIT`] scaled by the part's
//! poll delay factor.

use crate::chip::{self, FlashModel};
use crate::error::{Error, Result};
use crate::regs::{RegisterAccess, SpiCommand, Transport, MAX_TRANSACTION};
use std::time::Duration;

/// Write-in-progress bit of the status register
pub const SR_WIP: u8 = 0x01;
/// Ready bit of the flag status register
pub const FSR_READY: u8 = 0x80;
/// Poll iterations allowed when waiting on a flash-side status register
pub const READY_POLL_LIMIT: u32 = 10_000;
/// Bytes read for a JEDEC identification
pub const JEDEC_ID_LEN: usize = 20;

/// JEDEC read opcode used before the part is identified
const JEDEC_OPCODE: u8 = 0x9F;

/// Delay between flash-side status polls, scaled by the part's factor
const POLL_SLEEP_US: u64 = 10;

/// Read the raw JEDEC identification bytes
pub fn read_jedec<R: RegisterAccess>(t: &mut Transport<R>) -> Result<Vec<u8>> {
    t.recv(&SpiCommand::read_reg(JEDEC_OPCODE), JEDEC_ID_LEN)
}

/// Identify the attached part against the descriptor table
pub fn probe<R: RegisterAccess>(t: &mut Transport<R>) -> Result<&'static FlashModel> {
    let id = read_jedec(t)?;
    let model = chip::identify(&id)?;
    log::info!(
        "identified {} {} ({} MiB, {} byte pages, {} KiB sectors)",
        model.vendor,
        model.name,
        model.capacity / (1024 * 1024),
        model.page_size,
        model.sector_size / 1024
    );
    Ok(model)
}

/// Read the status register
pub fn read_status<R: RegisterAccess>(t: &mut Transport<R>, model: &FlashModel) -> Result<u8> {
    let data = t.recv(&SpiCommand::read_reg(model.opcodes.read_status), 1)?;
    Ok(data[0])
}

/// Wait until the part reports ready through its flag status register
///
/// Parts without a flag status register are considered always ready here;
/// write-in-progress polling still gates completion.
pub fn wait_flash_ready<R: RegisterAccess>(t: &mut Transport<R>, model: &FlashModel) -> Result<()> {
    let Some(opcode) = model.opcodes.read_flag_status else {
        return Ok(());
    };
    for _ in 0..READY_POLL_LIMIT * model.poll_delay_factor {
        let fsr = t.recv(&SpiCommand::read_reg(opcode), 1)?[0];
        if fsr & FSR_READY != 0 {
            return Ok(());
        }
        std::thread::sleep(Duration::from_micros(
            POLL_SLEEP_US * u64::from(model.poll_delay_factor),
        ));
    }
    Err(Error::Timeout("flag status ready"))
}

/// Wait until a program or erase finishes (WIP bit clears)
pub fn wait_write_complete<R: RegisterAccess>(
    t: &mut Transport<R>,
    model: &FlashModel,
) -> Result<()> {
    for _ in 0..READY_POLL_LIMIT * model.poll_delay_factor {
        if read_status(t, model)? & SR_WIP == 0 {
            return Ok(());
        }
        std::thread::sleep(Duration::from_micros(
            POLL_SLEEP_US * u64::from(model.poll_delay_factor),
        ));
    }
    Err(Error::Timeout("write in progress"))
}

/// Enable writes, then wait for the part to report ready
pub fn write_enable<R: RegisterAccess>(t: &mut Transport<R>, model: &FlashModel) -> Result<()> {
    t.send(&SpiCommand::simple(model.opcodes.write_enable), &[])?;
    wait_flash_ready(t, model)
}

/// Disable writes
pub fn write_disable<R: RegisterAccess>(t: &mut Transport<R>, model: &FlashModel) -> Result<()> {
    t.send(&SpiCommand::simple(model.opcodes.write_disable), &[])
}

/// Program the bank (extended address) register for an address and read it
/// back to confirm
///
/// No-op on parts without bank registers; those either fit in 24 bits of
/// address or use 4-byte addressing on the wire.
pub fn select_bank<R: RegisterAccess>(
    t: &mut Transport<R>,
    model: &FlashModel,
    addr: u32,
) -> Result<()> {
    let (Some(write_op), Some(read_op)) = (model.opcodes.write_bank, model.opcodes.read_bank)
    else {
        return Ok(());
    };
    let value = (addr >> 24) as u8;
    t.send(&SpiCommand::write_reg(write_op), &[value])?;
    let read = t.recv(&SpiCommand::read_reg(read_op), 1)?[0];
    if read != value {
        return Err(Error::BankMismatch {
            written: value,
            read,
        });
    }
    log::debug!("bank register set to 0x{:02X}", value);
    Ok(())
}

/// Address as it goes on the wire
///
/// Parts with bank registers carry the top byte in the bank register and
/// see only the low 24 bits in the command; everything else gets the full
/// address (the transport widens the wire format when the top byte is
/// non-zero).
fn wire_addr(model: &FlashModel, addr: u32) -> u32 {
    if model.has_bank_registers() {
        addr & 0x00FF_FFFF
    } else {
        addr
    }
}

/// Read an arbitrary range, split at the transaction ceiling
pub fn read<R: RegisterAccess>(
    t: &mut Transport<R>,
    model: &FlashModel,
    addr: u32,
    buf: &mut [u8],
) -> Result<()> {
    if buf.is_empty() {
        return Err(Error::InvalidArgument("zero-length read".into()));
    }
    check_range(model, addr, buf.len())?;

    let mut offset = 0usize;
    while offset < buf.len() {
        let chunk_addr = addr + offset as u32;
        let chunk_len = (buf.len() - offset).min(MAX_TRANSACTION);
        select_bank(t, model, chunk_addr)?;
        let cmd = SpiCommand::read_mem(
            model.opcodes.read,
            wire_addr(model, chunk_addr),
            model.address_len(),
        );
        let data = t.recv(&cmd, chunk_len)?;
        buf[offset..offset + chunk_len].copy_from_slice(&data);
        offset += chunk_len;
    }
    Ok(())
}

/// Program up to one page at `addr`
///
/// The transfer must not cross a page boundary; the part would wrap within
/// the page and corrupt the low addresses.
pub fn write_page<R: RegisterAccess>(
    t: &mut Transport<R>,
    model: &FlashModel,
    addr: u32,
    data: &[u8],
) -> Result<()> {
    if data.is_empty() {
        return Err(Error::InvalidArgument("zero-length program".into()));
    }
    if data.len() > model.page_size as usize || data.len() > MAX_TRANSACTION {
        return Err(Error::InvalidArgument(format!(
            "program of {} bytes exceeds the {} byte page",
            data.len(),
            model.page_size
        )));
    }
    if (addr % model.page_size) as usize + data.len() > model.page_size as usize {
        return Err(Error::InvalidArgument(format!(
            "program at 0x{:08X} crosses a page boundary",
            addr
        )));
    }
    check_range(model, addr, data.len())?;

    select_bank(t, model, addr)?;
    write_enable(t, model)?;
    let cmd = SpiCommand::write_mem(
        model.opcodes.program,
        wire_addr(model, addr),
        model.address_len(),
    );
    let result = t
        .send(&cmd, data)
        .and_then(|_| wait_write_complete(t, model));
    // Leave writes disabled whether or not the program stuck
    write_disable(t, model)?;
    result
}

/// Erase the sector at `addr` (must be sector-aligned)
pub fn erase_sector<R: RegisterAccess>(
    t: &mut Transport<R>,
    model: &FlashModel,
    addr: u32,
) -> Result<()> {
    if addr % model.sector_size != 0 {
        return Err(Error::InvalidArgument(format!(
            "erase address 0x{:08X} is not aligned to the {} byte sector",
            addr, model.sector_size
        )));
    }
    check_range(model, addr, model.sector_size as usize)?;

    select_bank(t, model, addr)?;
    write_enable(t, model)?;
    let cmd = SpiCommand::erase(
        model.opcodes.erase,
        wire_addr(model, addr),
        model.address_len(),
    );
    let result = t
        .send(&cmd, &[])
        .and_then(|_| wait_write_complete(t, model));
    write_disable(t, model)?;
    result
}

pub(crate) fn check_range(model: &FlashModel, addr: u32, len: usize) -> Result<()> {
    let end = u64::from(addr) + len as u64;
    if end > u64::from(model.capacity) {
        return Err(Error::InvalidArgument(format!(
            "range 0x{:08X}+0x{:X} exceeds the {} byte part",
            addr, len, model.capacity
        )));
    }
    Ok(())
}
