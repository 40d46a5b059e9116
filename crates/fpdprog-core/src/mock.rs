//! Simulated SPI controller and NOR array for tests
//!
//! Implements [`RegisterAccess`] and services whole transactions when the
//! start bit is written: programs AND bytes into the array (NOR cells only
//! go 1 to 0), erases fill a sector with 0xFF, and reads stream through
//! the FIFO in the same big-endian word order the hardware uses.

use crate::regs::{RegisterAccess, Status, REG_ADDR_OP, REG_CONTROL, REG_DATA, REG_SIZE, REG_STATUS};
use std::collections::VecDeque;

const CTL_USE_ADDR: u32 = 1 << 0;
const CTL_START: u32 = 1 << 10;
const CTL_ADDR_LEN_SHIFT: u32 = 8;
const CTL_ADDR_MSB_SHIFT: u32 = 24;

pub struct MockController {
    mem: Vec<u8>,
    sector_size: u32,
    jedec: [u8; 20],

    status: u32,
    size_reg: u32,
    addr_op: u32,
    bank: u8,
    write_enabled: bool,

    wfifo: Vec<u8>,
    rfifo: VecDeque<u8>,

    /// Sector-aligned addresses of every erase performed
    pub erases: Vec<u32>,
    /// (address, length) of every program performed
    pub programs: Vec<(u32, usize)>,
    /// Programs/erases attempted without write enable
    pub rejected_ops: u32,

    stay_busy: bool,
    bank_readback: Option<u8>,
    stuck_byte_after_erase: Option<u32>,
    wip_polls: u32,
}

impl MockController {
    pub fn new(capacity: usize, sector_size: u32) -> Self {
        let mut jedec = [0u8; 20];
        // Defaults to the Micron part's ID
        jedec[..5].copy_from_slice(&[0x20, 0xBA, 0x19, 0x10, 0x44]);
        Self {
            mem: vec![0xFF; capacity],
            sector_size,
            jedec,
            status: 0,
            size_reg: 0,
            addr_op: 0,
            bank: 0,
            write_enabled: false,
            wfifo: Vec::new(),
            rfifo: VecDeque::new(),
            erases: Vec::new(),
            programs: Vec::new(),
            rejected_ops: 0,
            stay_busy: false,
            bank_readback: None,
            stuck_byte_after_erase: None,
            wip_polls: 0,
        }
    }

    pub fn mem(&self) -> &[u8] {
        &self.mem
    }

    /// Place bytes directly into the simulated array
    pub fn poke(&mut self, addr: u32, data: &[u8]) {
        let addr = addr as usize;
        self.mem[addr..addr + data.len()].copy_from_slice(data);
    }

    pub fn set_jedec(&mut self, bytes: &[u8]) {
        self.jedec = [0; 20];
        self.jedec[..bytes.len()].copy_from_slice(bytes);
    }

    pub fn bank(&self) -> u8 {
        self.bank
    }

    /// Make every status poll report BUSY
    pub fn stay_busy(&mut self) {
        self.stay_busy = true;
    }

    /// Bank register reads return this instead of the written value
    pub fn force_bank_readback(&mut self, value: u8) {
        self.bank_readback = Some(value);
    }

    /// Leave one byte unerased at this address on the next erase of its sector
    pub fn stick_byte_after_erase(&mut self, addr: u32) {
        self.stuck_byte_after_erase = Some(addr);
    }

    /// Report write-in-progress for this many status-register reads
    pub fn hold_wip(&mut self, polls: u32) {
        self.wip_polls = polls;
    }

    fn effective_addr(&self, control: u32) -> u32 {
        let addr24 = self.addr_op & 0x00FF_FFFF;
        let addr_len = ((control >> CTL_ADDR_LEN_SHIFT) & 0x3) + 1;
        if addr_len == 4 {
            ((control >> CTL_ADDR_MSB_SHIFT) & 0xFF) << 24 | addr24
        } else {
            u32::from(self.bank) << 24 | addr24
        }
    }

    fn execute(&mut self, control: u32) {
        let opcode = (self.addr_op >> 24) as u8;
        let xfer = (self.size_reg & 0xFFF) as usize;
        let addr = if control & CTL_USE_ADDR != 0 {
            self.effective_addr(control) as usize
        } else {
            0
        };

        match opcode {
            0x9F => {
                self.rfifo.extend(self.jedec.iter());
            }
            0x05 => {
                let wip = if self.wip_polls > 0 {
                    self.wip_polls -= 1;
                    0x01
                } else {
                    0x00
                };
                self.rfifo.push_back(wip);
            }
            0x70 => {
                self.rfifo.push_back(0x80);
            }
            0x03 | 0x13 => {
                self.rfifo.extend(self.mem[addr..addr + xfer].iter());
            }
            0x02 | 0x12 => {
                if !self.write_enabled {
                    self.rejected_ops += 1;
                } else {
                    let data: Vec<u8> = self.wfifo.drain(..).take(xfer).collect();
                    for (i, b) in data.iter().enumerate() {
                        self.mem[addr + i] &= b;
                    }
                    self.programs.push((addr as u32, data.len()));
                    self.write_enabled = false;
                }
            }
            0xD8 | 0xDC => {
                if !self.write_enabled {
                    self.rejected_ops += 1;
                } else {
                    let base = addr - addr % self.sector_size as usize;
                    for b in &mut self.mem[base..base + self.sector_size as usize] {
                        *b = 0xFF;
                    }
                    if let Some(stuck) = self.stuck_byte_after_erase {
                        let stuck = stuck as usize;
                        if stuck >= base && stuck < base + self.sector_size as usize {
                            self.mem[stuck] = 0x00;
                            self.stuck_byte_after_erase = None;
                        }
                    }
                    self.erases.push(base as u32);
                    self.write_enabled = false;
                }
            }
            0x06 => self.write_enabled = true,
            0x04 => self.write_enabled = false,
            0x17 => {
                self.bank = self.wfifo.first().copied().unwrap_or(0);
            }
            0x16 => {
                self.rfifo.push_back(self.bank_readback.unwrap_or(self.bank));
            }
            other => panic!("mock controller got unexpected opcode 0x{:02X}", other),
        }

        self.wfifo.clear();
        self.status |= Status::DONE.bits();
    }
}

impl RegisterAccess for MockController {
    fn read32(&mut self, offset: usize) -> u32 {
        match offset {
            REG_STATUS => {
                if self.stay_busy {
                    Status::BUSY.bits()
                } else {
                    self.status
                }
            }
            REG_DATA => {
                let mut word = [0u8; 4];
                for lane in &mut word {
                    *lane = self.rfifo.pop_front().unwrap_or(0);
                }
                u32::from_be_bytes(word)
            }
            REG_SIZE => self.size_reg,
            REG_ADDR_OP => self.addr_op,
            REG_CONTROL => 0,
            other => panic!("mock read of unknown register 0x{:X}", other),
        }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        match offset {
            REG_CONTROL => {
                if value & CTL_START != 0 {
                    self.execute(value);
                }
            }
            REG_STATUS => {
                // Write-1-to-clear for DONE
                self.status &= !(value & Status::DONE.bits());
            }
            REG_SIZE => self.size_reg = value,
            REG_DATA => self.wfifo.extend_from_slice(&value.to_be_bytes()),
            REG_ADDR_OP => self.addr_op = value,
            other => panic!("mock write of unknown register 0x{:X}", other),
        }
    }
}
