//! Program/erase orchestration over arbitrary byte ranges
//!
//! Flash is erased by sector and programmed by page, but callers deal in
//! byte ranges. This module does the sector math, preserves the parts of
//! boundary sectors the caller did not ask to touch, verifies erases
//! against 0xFF, and reports phased progress.

mod operations;

pub use operations::{erase_range, program, segment_range, verify_range, BoundarySnapshot};

/// Share of overall progress assigned to the erase phase
pub const ERASE_PERCENT: u8 = 33;
/// Share of overall progress assigned to the program phase
pub const PROGRAM_PERCENT: u8 = 34;
/// Share of overall progress assigned to the verify phase
pub const VERIFY_PERCENT: u8 = 33;
/// Approximate granularity of progress callbacks
pub const REPORT_INTERVAL: u8 = 3;

/// Value every byte of an erased sector reads as
pub const ERASED_VALUE: u8 = 0xFF;

/// Receives overall-percentage progress callbacks
///
/// Phases are weighted 33/34/33 (erase/program/verify) and each phase's
/// final callback lands exactly on its boundary.
pub trait ProgressReport {
    /// Called with the overall completion percentage (0..=100)
    fn report(&mut self, percent: u8);
}

/// Progress sink that discards all reports
pub struct NoProgress;

impl ProgressReport for NoProgress {
    fn report(&mut self, _percent: u8) {}
}
