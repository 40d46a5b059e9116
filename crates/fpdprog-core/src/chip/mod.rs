//! Flash part descriptors and the built-in part table
//!
//! The engine does not do SFDP discovery; the static table here is
//! authoritative for which parts are supported and how they are driven.

mod database;
mod types;

pub use database::{identify, MODELS};
pub use types::*;
