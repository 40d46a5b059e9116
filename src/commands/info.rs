//! Info command implementation

use crate::commands::{open_transport, CommandResult};
use fpdprog_core::protocol;
use std::path::Path;

pub fn run_info(uio: &Path) -> CommandResult {
    let mut transport = open_transport(uio)?;

    let id = protocol::read_jedec(&mut transport)?;
    let id_str: Vec<String> = id.iter().take(5).map(|b| format!("{:02X}", b)).collect();
    println!("JEDEC ID: {}", id_str.join(" "));

    let model = protocol::probe(&mut transport)?;
    println!("Vendor:       {}", model.vendor);
    println!("Part:         {}", model.name);
    println!("Capacity:     {} bytes", model.capacity);
    println!("Page size:    {} bytes", model.page_size);
    println!(
        "Sectors:      {} x {} bytes",
        model.sector_count, model.sector_size
    );
    println!("Address mode: {}-byte", model.address_len());
    if model.has_bank_registers() {
        println!("Banking:      bank address registers");
    }
    Ok(())
}
