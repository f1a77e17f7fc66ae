//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `strata_core` linkage and schema bootstrap from a binary.
//! - Keep output deterministic for quick local sanity checks.

use std::process::ExitCode;
use strata_core::db::migrations::latest_version;
use strata_core::{Substrate, SubstrateConfig};

fn main() -> ExitCode {
    println!("strata_core ping={}", strata_core::ping());
    println!("strata_core version={}", strata_core::core_version());

    match Substrate::open_in_memory(SubstrateConfig::default()).and_then(|substrate| {
        let stats = substrate.stats()?;
        Ok((substrate.is_sealed()?, stats))
    }) {
        Ok((sealed, stats)) => {
            println!("strata_core schema_version={}", latest_version());
            println!("strata_core sealed={sealed} atoms={}", stats.atoms);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("strata_core store_error={err}");
            ExitCode::FAILURE
        }
    }
}
