//! fpdprog-core - Engine for programming SPI-NOR flash behind a
//! memory-mapped SPI controller block
//!
//! Network switch platforms expose the flash that holds firmware for
//! field-programmable devices through a small five-register controller
//! block. This crate identifies the flash part, drives the controller,
//! and programs firmware images shipped in a metadata-wrapped container
//! format.
//!
//! Register access sits behind the [`regs::RegisterAccess`] trait so the
//! whole engine can be exercised against a simulated controller; on real
//! hardware [`regs::UioMap`] maps the block from a UIO device node.
//!
//! All operations are synchronous and single-threaded. Every poll loop is
//! bounded; operations abort on the first failure.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod chip;
pub mod error;
pub mod flash;
pub mod image;
pub mod protocol;
pub mod regs;
pub mod updater;

#[cfg(test)]
pub(crate) mod mock;

pub use error::{Error, Result};
