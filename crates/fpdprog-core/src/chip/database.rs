//! Built-in table of supported flash parts

use super::types::{FlashModel, JedecId, OpcodeSet, JEDEC_WILDCARD};
use crate::error::{Error, Result};

const KIB: u32 = 1024;
const MIB: u32 = 1024 * 1024;

/// Supported flash parts
///
/// First match wins, so more specific entries (exact vendor bytes) must
/// come before entries that wildcard the same positions.
pub static MODELS: &[FlashModel] = &[
    FlashModel {
        vendor: "Micron",
        name: "MT25QL256ABA",
        jedec: JedecId {
            manufacturer: 0x20,
            memory_type: 0xBA,
            density: 0x19,
            vendor_id0: JEDEC_WILDCARD,
            vendor_id1: JEDEC_WILDCARD,
        },
        page_size: 256,
        sector_size: 64 * KIB,
        sector_count: 512,
        capacity: 32 * MIB,
        verify_after_program: true,
        supports_erase: true,
        poll_delay_factor: 1,
        opcodes: OpcodeSet {
            read_jedec: 0x9F,
            read_status: 0x05,
            read_flag_status: Some(0x70),
            read: 0x03,
            erase: 0xD8,
            program: 0x02,
            write_enable: 0x06,
            write_disable: 0x04,
            read_bank: None,
            write_bank: None,
            enter_4byte: Some(0xB7),
            exit_4byte: Some(0xE9),
        },
        force_3byte: true,
    },
    FlashModel {
        vendor: "Spansion",
        name: "S25FL256S (64 KiB sectors)",
        jedec: JedecId {
            manufacturer: 0x01,
            memory_type: 0x02,
            density: 0x19,
            vendor_id0: JEDEC_WILDCARD,
            vendor_id1: 0x01,
        },
        page_size: 256,
        sector_size: 64 * KIB,
        sector_count: 512,
        capacity: 32 * MIB,
        verify_after_program: true,
        supports_erase: true,
        poll_delay_factor: 1,
        opcodes: OpcodeSet {
            read_jedec: 0x9F,
            read_status: 0x05,
            read_flag_status: None,
            read: 0x03,
            erase: 0xD8,
            program: 0x02,
            write_enable: 0x06,
            write_disable: 0x04,
            read_bank: Some(0x16),
            write_bank: Some(0x17),
            enter_4byte: None,
            exit_4byte: None,
        },
        force_3byte: true,
    },
    FlashModel {
        vendor: "Spansion",
        name: "S25FL256S (256 KiB sectors)",
        jedec: JedecId {
            manufacturer: 0x01,
            memory_type: 0x02,
            density: 0x19,
            vendor_id0: JEDEC_WILDCARD,
            vendor_id1: 0x00,
        },
        page_size: 256,
        sector_size: 256 * KIB,
        sector_count: 128,
        capacity: 32 * MIB,
        verify_after_program: true,
        supports_erase: true,
        poll_delay_factor: 1,
        opcodes: OpcodeSet {
            read_jedec: 0x9F,
            read_status: 0x05,
            read_flag_status: None,
            read: 0x03,
            erase: 0xD8,
            program: 0x02,
            write_enable: 0x06,
            write_disable: 0x04,
            read_bank: Some(0x16),
            write_bank: Some(0x17),
            enter_4byte: None,
            exit_4byte: None,
        },
        force_3byte: true,
    },
    FlashModel {
        vendor: "Spansion",
        name: "S25FL512S",
        jedec: JedecId {
            manufacturer: 0x01,
            memory_type: 0x02,
            density: 0x20,
            vendor_id0: JEDEC_WILDCARD,
            vendor_id1: JEDEC_WILDCARD,
        },
        page_size: 512,
        sector_size: 256 * KIB,
        sector_count: 256,
        capacity: 64 * MIB,
        verify_after_program: true,
        supports_erase: true,
        poll_delay_factor: 1,
        opcodes: OpcodeSet {
            read_jedec: 0x9F,
            read_status: 0x05,
            read_flag_status: None,
            read: 0x03,
            erase: 0xD8,
            program: 0x02,
            write_enable: 0x06,
            write_disable: 0x04,
            read_bank: Some(0x16),
            write_bank: Some(0x17),
            enter_4byte: None,
            exit_4byte: None,
        },
        force_3byte: true,
    },
    FlashModel {
        vendor: "Macronix",
        name: "MX25L12835F",
        jedec: JedecId {
            manufacturer: 0xC2,
            memory_type: 0x20,
            density: 0x18,
            vendor_id0: JEDEC_WILDCARD,
            vendor_id1: JEDEC_WILDCARD,
        },
        page_size: 256,
        sector_size: 64 * KIB,
        sector_count: 256,
        capacity: 16 * MIB,
        verify_after_program: true,
        supports_erase: true,
        poll_delay_factor: 1,
        opcodes: OpcodeSet {
            read_jedec: 0x9F,
            read_status: 0x05,
            read_flag_status: None,
            read: 0x03,
            erase: 0xD8,
            program: 0x02,
            write_enable: 0x06,
            write_disable: 0x04,
            read_bank: None,
            write_bank: None,
            enter_4byte: None,
            exit_4byte: None,
        },
        force_3byte: false,
    },
];

/// Look up the descriptor for a part from its JEDEC ID bytes
///
/// Only the first five response bytes participate in matching; wildcarded
/// table bytes match anything.
pub fn identify(jedec: &[u8]) -> Result<&'static FlashModel> {
    if jedec.len() < 5 {
        return Err(Error::InvalidArgument(format!(
            "JEDEC response too short: {} bytes",
            jedec.len()
        )));
    }
    let bytes = [jedec[0], jedec[1], jedec[2], jedec[3], jedec[4]];
    MODELS
        .iter()
        .find(|m| m.jedec.matches(&bytes))
        .ok_or(Error::UnknownDevice(
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4],
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_internally_consistent() {
        for m in MODELS {
            assert_eq!(
                m.sector_size * m.sector_count,
                m.capacity,
                "{} {}",
                m.vendor,
                m.name
            );
            assert_eq!(m.capacity % m.page_size, 0);
            assert!(m.sector_size % m.page_size == 0);
        }
    }

    #[test]
    fn identify_micron_ignores_vendor_bytes() {
        let model = identify(&[0x20, 0xBA, 0x19, 0x10, 0x44, 0, 0, 0]).unwrap();
        assert_eq!(model.name, "MT25QL256ABA");
    }

    #[test]
    fn identify_distinguishes_spansion_sector_layouts() {
        let small = identify(&[0x01, 0x02, 0x19, 0x4D, 0x01]).unwrap();
        assert_eq!(small.sector_size, 64 * KIB);
        let large = identify(&[0x01, 0x02, 0x19, 0x4D, 0x00]).unwrap();
        assert_eq!(large.sector_size, 256 * KIB);
    }

    #[test]
    fn identify_unknown_part() {
        match identify(&[0xEF, 0x40, 0x18, 0x00, 0x00]) {
            Err(Error::UnknownDevice(0xEF, 0x40, 0x18, _, _)) => {}
            other => panic!("expected UnknownDevice, got {:?}", other.map(|m| m.name)),
        }
    }

    #[test]
    fn identify_rejects_short_response() {
        assert!(matches!(
            identify(&[0x20, 0xBA]),
            Err(Error::InvalidArgument(_))
        ));
    }
}
