//! Extract a project directory and print its components and nets.

use netsnap::prelude::*;
use std::path::Path;

fn main() -> Result<(), NetsnapError> {
    let dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tests/fixtures/divider".to_string());
    let dir = Path::new(&dir);

    if !dir.is_dir() {
        eprintln!("Directory not found: {}", dir.display());
        eprintln!("Usage: cargo run --example extract_snapshot [path/to/project]");
        std::process::exit(1);
    }

    let extraction = Netsnap::extract_dir(dir, &ExtractOptions::default())?;

    println!("Root sheet: {}", extraction.root);
    println!("Components: {}", extraction.components.len());
    for component in &extraction.components {
        println!(
            "  {:<12} {:<20} {}",
            component.reference, component.lib_id, component.value
        );
    }

    println!();
    println!("Nets: {}", extraction.nets.len());
    for net in &extraction.nets {
        let pins: Vec<String> = net.pins.iter().map(ToString::to_string).collect();
        println!("  {:<16} {}", net.name, pins.join(" "));
    }

    if !extraction.warnings.is_empty() {
        println!();
        for warning in &extraction.warnings {
            println!("warning: {}", warning);
        }
    }

    Ok(())
}
