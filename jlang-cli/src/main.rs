//! Command line runner for the built-in jlang sample images.
//!
//! Runs an image with either dispatch strategy and prints the result, or
//! prints its disassembly.

use clap::Parser;
use jlang_cli::{Args, run};
use jlang_vm::log;

#[cfg(not(target_arch = "wasm32"))]
use mimalloc::MiMalloc;
#[cfg(not(target_arch = "wasm32"))]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if cfg!(debug_assertions) | cfg!(test) {
        colog::default_builder()
            .filter_level(log::LevelFilter::Trace)
            .init();
    } else {
        colog::default_builder().init();
    }

    let args = Args::parse();
    if let Some(res) = run(&args)? {
        println!("{res}");
    }
    Ok(())
}
