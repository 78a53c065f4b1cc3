//! # rustySNES
//!
//! Headless development runner for the emulator core: loads a cartridge,
//! runs a number of frames without any window, and can dump the final
//! framebuffer to a PNG or round-trip a save state. A real front-end embeds
//! the library crate instead.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use rusty_snes::savestate::SaveState;
use rusty_snes::{Snes, SCREEN_HEIGHT, SCREEN_WIDTH};

/// A headless SNES emulator core
#[derive(Parser)]
#[command(name = "rusty-snes", version, about)]
struct Args {
    /// Cartridge image (.sfc/.smc)
    rom: PathBuf,

    /// Number of frames to run
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// Write the final framebuffer to a PNG file
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Write a save state after running
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Load a save state before running
    #[arg(long)]
    load_state: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let rom = fs::read(&args.rom)
        .with_context(|| format!("failed to read ROM file {}", args.rom.display()))?;

    let mut snes = Snes::new();
    snes.load_cartridge(&rom)
        .with_context(|| "failed to load cartridge")?;

    if let Some(cartridge) = snes.memory_bus.cartridge() {
        info!(
            "{:?} ({:?}, {} KB)",
            cartridge.title(),
            cartridge.mapping(),
            cartridge.len() / 1024
        );
    }

    if let Some(path) = &args.load_state {
        SaveState::load_from_file(&mut snes, path)
            .with_context(|| format!("failed to load state from {}", path.display()))?;
    }

    for _ in 0..args.frames {
        snes.run_frame();
    }
    info!("ran {} frames", args.frames);

    if let Some(path) = &args.screenshot {
        let frame = snes.frame_buffer().to_vec();
        let image =
            image::RgbaImage::from_raw(SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32, frame)
                .expect("framebuffer dimensions are fixed");
        image
            .save(path)
            .with_context(|| format!("failed to write screenshot to {}", path.display()))?;
        info!("screenshot written to {}", path.display());
    }

    if let Some(path) = &args.save_state {
        SaveState::save_to_file(&snes, path)
            .with_context(|| format!("failed to write state to {}", path.display()))?;
    }

    Ok(())
}
