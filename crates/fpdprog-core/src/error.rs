//! Error types for flash programming operations

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur during flash operations
#[derive(Debug, Error)]
pub enum Error {
    /// JEDEC ID did not match any entry in the descriptor table
    #[error("unknown flash device (JEDEC ID {0:02X} {1:02X} {2:02X} {3:02X} {4:02X})")]
    UnknownDevice(u8, u8, u8, u8, u8),

    /// A bounded poll loop expired before the hardware signalled completion
    #[error("timeout waiting for {0}")]
    Timeout(&'static str),

    /// Caller passed an argument the controller or flash part cannot honor
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Bank (extended address) register readback did not match what was written
    #[error("bank address register mismatch: wrote 0x{written:02X}, read 0x{read:02X}")]
    BankMismatch {
        /// Value written to the bank register
        written: u8,
        /// Value read back
        read: u8,
    },

    /// Flash contents did not match expectations after an erase or program pass
    #[error("verification failed at flash offset 0x{addr:08X}: expected 0x{expected:02X}, found 0x{found:02X}")]
    VerifyFailed {
        /// Absolute flash offset of the first mismatching byte
        addr: u32,
        /// Byte we expected to read
        expected: u8,
        /// Byte actually read
        found: u8,
    },

    /// Firmware image metadata is truncated, has a bad magic, or fails its CRC
    #[error("corrupt image: {0}")]
    CorruptImage(String),

    /// More than one image in a container matched the selection criteria;
    /// carries a description of each matching image
    #[error("image selection is ambiguous, {} images matched: {}", .0.len(), .0.join("; "))]
    SelectionAmbiguous(Vec<String>),

    /// No image in a container matched the selection criteria; carries a
    /// description of every image that was considered
    #[error("no image matched the selection criteria; candidates: {}", .0.join("; "))]
    SelectionNotFound(Vec<String>),

    /// DEFLATE payload failed to decompress
    #[error("payload decompression failed: {0}")]
    DecompressionFailed(String),

    /// Underlying I/O failure (mapping the register block, reading image files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
