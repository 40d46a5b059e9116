//! Register-level transport for the SPI controller block
//!
//! The controller exposes five 32-bit registers. A transaction is set up
//! by programming the address/opcode register (and the data FIFO for
//! host-to-flash transfers), then written to the control register with the
//! start bit set, then polled to completion through the status register.
//!
//! Data moves through a single FIFO register as 32-bit words with
//! big-endian byte lanes: the first data byte of a transfer occupies the
//! most significant byte of the first word.

use crate::error::{Error, Result};
use bitflags::bitflags;

/// Control register
pub const REG_CONTROL: usize = 0x00;
/// Status register
pub const REG_STATUS: usize = 0x04;
/// Transfer size register (12 bits)
pub const REG_SIZE: usize = 0x08;
/// Data FIFO register
pub const REG_DATA: usize = 0x0C;
/// Address / opcode register
pub const REG_ADDR_OP: usize = 0x10;

/// Size of the register block in bytes
pub const REG_BLOCK_LEN: usize = 0x14;

/// Most data bytes a single transaction can move
pub const MAX_TRANSACTION: usize = 2048;

/// Mask applied to the transfer size register
pub const SIZE_MASK: u32 = 0xFFF;

/// Poll iterations allowed for one controller transaction
pub const TRANSACTION_POLL_LIMIT: u32 = 1000;

bitflags! {
    /// Control register bits
    ///
    /// Bits 8..10 carry the address length (bytes minus one) and bits
    /// 24..32 the high address byte for 4-byte transfers; both are fields
    /// rather than flags and are composed by [`Transport`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Control: u32 {
        /// Transaction carries an address
        const USE_ADDR = 1 << 0;
        /// Data direction: set means host to flash
        const DATA_DIR = 1 << 1;
        /// Insert dummy cycles after the address
        const USE_DUMMY = 1 << 2;
        /// Transaction carries an opcode
        const USE_OPCODE = 1 << 3;
        /// Start the transaction
        const START = 1 << 10;
        /// Move data through the FIFO as 32-bit words
        const FIFO32 = 1 << 11;
    }
}

bitflags! {
    /// Status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        /// Transaction in flight
        const BUSY = 1 << 14;
        /// Transaction complete; write 1 to clear
        const DONE = 1 << 15;
    }
}

/// Shift for the address-length field (value is length in bytes minus one)
const ADDR_LEN_SHIFT: u32 = 8;
/// Shift for the high address byte of 4-byte transfers
const ADDR_MSB_SHIFT: u32 = 24;

/// Raw 32-bit access to the controller's register block
///
/// Implemented by [`UioMap`] for hardware and by the test mock. Offsets
/// are byte offsets from the block base and always 4-byte aligned.
pub trait RegisterAccess {
    /// Read a 32-bit register
    fn read32(&mut self, offset: usize) -> u32;
    /// Write a 32-bit register
    fn write32(&mut self, offset: usize, value: u32);
}

/// Transfer direction of a command's data phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Flash to host (reads)
    FlashToHost,
    /// Host to flash (programs, register writes)
    HostToFlash,
}

/// One SPI command as the controller understands it
#[derive(Debug, Clone, Copy)]
pub struct SpiCommand {
    /// Command opcode
    pub opcode: u8,
    /// Flash address, if the command takes one
    pub addr: Option<u32>,
    /// Address length on the wire in bytes (3 or 4)
    pub addr_len: u8,
    /// Direction of the data phase
    pub direction: Direction,
    /// Insert dummy cycles after the address
    pub dummy: bool,
}

impl SpiCommand {
    /// Command with no address and no data (write enable/disable, mode switches)
    pub const fn simple(opcode: u8) -> Self {
        Self {
            opcode,
            addr: None,
            addr_len: 0,
            direction: Direction::HostToFlash,
            dummy: false,
        }
    }

    /// Register read (status, flag status, bank, JEDEC ID)
    pub const fn read_reg(opcode: u8) -> Self {
        Self {
            opcode,
            addr: None,
            addr_len: 0,
            direction: Direction::FlashToHost,
            dummy: false,
        }
    }

    /// Register write (bank register)
    pub const fn write_reg(opcode: u8) -> Self {
        Self {
            opcode,
            addr: None,
            addr_len: 0,
            direction: Direction::HostToFlash,
            dummy: false,
        }
    }

    /// Memory read at `addr`
    pub const fn read_mem(opcode: u8, addr: u32, addr_len: u8) -> Self {
        Self {
            opcode,
            addr: Some(addr),
            addr_len,
            direction: Direction::FlashToHost,
            dummy: false,
        }
    }

    /// Page program at `addr`
    pub const fn write_mem(opcode: u8, addr: u32, addr_len: u8) -> Self {
        Self {
            opcode,
            addr: Some(addr),
            addr_len,
            direction: Direction::HostToFlash,
            dummy: false,
        }
    }

    /// Sector erase at `addr` (address, no data)
    pub const fn erase(opcode: u8, addr: u32, addr_len: u8) -> Self {
        Self {
            opcode,
            addr: Some(addr),
            addr_len,
            direction: Direction::HostToFlash,
            dummy: false,
        }
    }
}

/// Drives the controller register block
pub struct Transport<R: RegisterAccess> {
    regs: R,
}

impl<R: RegisterAccess> Transport<R> {
    /// Wrap a register block
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    /// Access the underlying register block
    pub fn regs_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    /// Send a command whose data phase (if any) flows host to flash
    pub fn send(&mut self, cmd: &SpiCommand, data: &[u8]) -> Result<()> {
        self.run(cmd, data, 0).map(|_| ())
    }

    /// Send a command and read `len` bytes back
    pub fn recv(&mut self, cmd: &SpiCommand, len: usize) -> Result<Vec<u8>> {
        self.run(cmd, &[], len)
    }

    fn run(&mut self, cmd: &SpiCommand, data_out: &[u8], read_len: usize) -> Result<Vec<u8>> {
        if data_out.len() > MAX_TRANSACTION || read_len > MAX_TRANSACTION {
            return Err(Error::InvalidArgument(format!(
                "transaction of {} bytes exceeds the {} byte ceiling",
                data_out.len().max(read_len),
                MAX_TRANSACTION
            )));
        }
        if !data_out.is_empty() && read_len > 0 {
            return Err(Error::InvalidArgument(
                "transaction cannot move data in both directions".into(),
            ));
        }

        let xfer_len = data_out.len().max(read_len);
        self.regs.write32(REG_SIZE, xfer_len as u32 & SIZE_MASK);

        if !data_out.is_empty() {
            self.fill_fifo(data_out);
        }

        let addr = cmd.addr.unwrap_or(0);
        self.regs
            .write32(REG_ADDR_OP, (cmd.opcode as u32) << 24 | (addr & 0x00FF_FFFF));

        let mut ctl = (Control::USE_OPCODE | Control::START | Control::FIFO32).bits();
        if cmd.addr.is_some() {
            ctl |= Control::USE_ADDR.bits();
            // The high address byte always rides in the control MSB field,
            // and a non-zero byte widens the wire address to 4 bytes no
            // matter what width the caller asked for.
            let msb = addr >> 24;
            let addr_len = if msb != 0 { 4 } else { u32::from(cmd.addr_len) };
            ctl |= (addr_len - 1) << ADDR_LEN_SHIFT;
            ctl |= msb << ADDR_MSB_SHIFT;
        }
        if cmd.direction == Direction::HostToFlash && !data_out.is_empty() {
            ctl |= Control::DATA_DIR.bits();
        }
        if cmd.dummy {
            ctl |= Control::USE_DUMMY.bits();
        }

        log::trace!(
            "spi op 0x{:02X} addr {:?} out {} in {}",
            cmd.opcode,
            cmd.addr,
            data_out.len(),
            read_len
        );
        self.regs.write32(REG_CONTROL, ctl);

        self.wait_transaction_complete()?;

        if read_len > 0 {
            Ok(self.drain_fifo(read_len))
        } else {
            Ok(Vec::new())
        }
    }

    /// Poll until the controller clears BUSY and raises DONE, then clear DONE
    fn wait_transaction_complete(&mut self) -> Result<()> {
        for _ in 0..TRANSACTION_POLL_LIMIT {
            let status = self.regs.read32(REG_STATUS);
            if status & Status::BUSY.bits() != 0 {
                continue;
            }
            if status & Status::DONE.bits() != 0 {
                // Write-1-to-clear
                self.regs.write32(REG_STATUS, Status::DONE.bits());
                return Ok(());
            }
        }
        Err(Error::Timeout("SPI controller transaction"))
    }

    fn fill_fifo(&mut self, data: &[u8]) {
        for chunk in data.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.regs.write32(REG_DATA, u32::from_be_bytes(word));
        }
    }

    fn drain_fifo(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let words = len.div_ceil(4);
        for _ in 0..words {
            let word = self.regs.read32(REG_DATA).to_be_bytes();
            out.extend_from_slice(&word);
        }
        out.truncate(len);
        out
    }
}

/// Memory-mapped register block from a UIO device node
///
/// UIO maps the whole register region at file offset zero; accesses are
/// volatile 32-bit reads and writes.
pub struct UioMap {
    ptr: *mut u32,
    size: usize,
}

impl UioMap {
    /// Map `size` bytes of a UIO device (e.g. `/dev/uio0`)
    pub fn open(path: &std::path::Path, size: usize) -> Result<Self> {
        use std::fs::OpenOptions;
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let map_size = size.div_ceil(page_size) * page_size;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        Ok(Self {
            ptr: ptr as *mut u32,
            size: map_size,
        })
    }
}

impl RegisterAccess for UioMap {
    #[inline]
    fn read32(&mut self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.size);
        debug_assert!(offset & 3 == 0, "unaligned register read");
        unsafe { core::ptr::read_volatile(self.ptr.add(offset / 4)) }
    }

    #[inline]
    fn write32(&mut self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.size);
        debug_assert!(offset & 3 == 0, "unaligned register write");
        unsafe { core::ptr::write_volatile(self.ptr.add(offset / 4), value) }
    }
}

impl Drop for UioMap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

// MMIO registers don't have the usual aliasing concerns
unsafe impl Send for UioMap {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockController;

    #[test]
    fn fifo_words_are_big_endian() {
        let mut t = Transport::new(MockController::new(64 * 1024, 4 * 1024));
        let cmd = SpiCommand::write_mem(0x02, 0, 3);
        t.send(&SpiCommand::simple(0x06), &[]).unwrap();
        t.send(&cmd, &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]).unwrap();
        // First byte of the transfer lands at the lowest flash address
        assert_eq!(
            &t.regs.mem()[..5],
            &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE],
            "tail word must carry residual bytes in the high lanes"
        );
    }

    #[test]
    fn oversized_transaction_is_rejected() {
        let mut t = Transport::new(MockController::new(64 * 1024, 4 * 1024));
        let data = vec![0u8; MAX_TRANSACTION + 1];
        let cmd = SpiCommand::write_mem(0x02, 0, 3);
        assert!(matches!(
            t.send(&cmd, &data),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn transaction_times_out_when_controller_stays_busy() {
        let mut mock = MockController::new(64 * 1024, 4 * 1024);
        mock.stay_busy();
        let mut t = Transport::new(mock);
        let cmd = SpiCommand::read_reg(0x05);
        assert!(matches!(t.recv(&cmd, 1), Err(Error::Timeout(_))));
    }

    #[test]
    fn high_address_byte_widens_a_three_byte_command() {
        // Caller asks for 3 address bytes, but the top byte is non-zero:
        // the transport must widen to 4 and put the byte in the MSB field
        // instead of truncating to the low-address alias
        let mut t = Transport::new(MockController::new(32 * 1024 * 1024, 64 * 1024));
        t.regs.poke(0x0112_2334, &[0xC3]);
        let cmd = SpiCommand::read_mem(0x03, 0x0112_2334, 3);
        let data = t.recv(&cmd, 1).unwrap();
        assert_eq!(data, [0xC3]);
    }

    #[test]
    fn four_byte_address_carries_high_byte_in_control() {
        let mut t = Transport::new(MockController::new(32 * 1024 * 1024, 64 * 1024));
        t.regs.poke(0x0123_4567, &[0x5A]);
        let cmd = SpiCommand::read_mem(0x13, 0x0123_4567, 4);
        let data = t.recv(&cmd, 1).unwrap();
        assert_eq!(data, [0x5A]);
    }
}
