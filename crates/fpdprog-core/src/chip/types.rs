//! Flash part descriptor types

/// JEDEC ID match byte meaning "don't care"
///
/// Some vendors report batch- or package-specific values in the extended
/// ID bytes, so table entries may wildcard any position.
pub const JEDEC_WILDCARD: u8 = 0xFF;

/// JEDEC identification bytes a table entry matches against
///
/// Any byte set to [`JEDEC_WILDCARD`] matches whatever the part reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JedecId {
    /// Manufacturer ID (first JEDEC byte)
    pub manufacturer: u8,
    /// Memory type (second byte)
    pub memory_type: u8,
    /// Memory density (third byte)
    pub density: u8,
    /// First extended / vendor-specific byte
    pub vendor_id0: u8,
    /// Second extended / vendor-specific byte
    pub vendor_id1: u8,
}

impl JedecId {
    /// Check whether a 5-byte JEDEC response matches this entry
    pub fn matches(&self, bytes: &[u8; 5]) -> bool {
        let want = [
            self.manufacturer,
            self.memory_type,
            self.density,
            self.vendor_id0,
            self.vendor_id1,
        ];
        want.iter()
            .zip(bytes.iter())
            .all(|(w, b)| *w == JEDEC_WILDCARD || w == b)
    }
}

/// Command opcodes for a flash part
///
/// Optional opcodes are absent on parts that do not implement the
/// corresponding feature (flag status register, bank registers, 4-byte
/// address mode switching).
#[derive(Debug, Clone, Copy)]
pub struct OpcodeSet {
    /// Read JEDEC ID
    pub read_jedec: u8,
    /// Read status register (WIP in bit 0)
    pub read_status: u8,
    /// Read flag status register (ready in bit 7), if the part has one
    pub read_flag_status: Option<u8>,
    /// Read data
    pub read: u8,
    /// Sector erase
    pub erase: u8,
    /// Page program
    pub program: u8,
    /// Write enable
    pub write_enable: u8,
    /// Write disable
    pub write_disable: u8,
    /// Read bank (extended address) register
    pub read_bank: Option<u8>,
    /// Write bank (extended address) register
    pub write_bank: Option<u8>,
    /// Enter 4-byte address mode
    pub enter_4byte: Option<u8>,
    /// Exit 4-byte address mode
    pub exit_4byte: Option<u8>,
}

/// Descriptor for one supported flash part
#[derive(Debug, Clone, Copy)]
pub struct FlashModel {
    /// Vendor name
    pub vendor: &'static str,
    /// Part name
    pub name: &'static str,
    /// JEDEC match bytes
    pub jedec: JedecId,
    /// Program page size in bytes
    pub page_size: u32,
    /// Erase sector size in bytes
    pub sector_size: u32,
    /// Number of sectors
    pub sector_count: u32,
    /// Total capacity in bytes
    pub capacity: u32,
    /// Read back and compare after programming
    pub verify_after_program: bool,
    /// Part supports the erase operation
    pub supports_erase: bool,
    /// Multiplier applied to poll iteration budgets for slow parts
    pub poll_delay_factor: u32,
    /// Command opcodes
    pub opcodes: OpcodeSet,
    /// Drive the part with 3-byte addresses even when capacity needs 4
    pub force_3byte: bool,
}

impl FlashModel {
    /// Nominal address length in bytes used on the wire
    ///
    /// Parts driven in 3-byte mode still reach addresses above 16 MiB:
    /// banked parts carry the top byte in the bank register, and for the
    /// rest the transport widens to 4 bytes whenever the top byte is
    /// non-zero.
    pub fn address_len(&self) -> u8 {
        if self.capacity > 0x100_0000 && !self.force_3byte {
            4
        } else {
            3
        }
    }

    /// Whether this part exposes bank (extended address) registers
    pub fn has_bank_registers(&self) -> bool {
        self.opcodes.read_bank.is_some() && self.opcodes.write_bank.is_some()
    }
}
