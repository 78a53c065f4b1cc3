//! # rustySNES
//!
//! A headless Super Nintendo Entertainment System (SNES) emulator core.
//!
//! The crate simulates a 65816-class CPU, a 24-bit memory bus with LoROM and
//! HiROM cartridge mapping, a background-tile pixel pipeline, a DMA engine
//! and an audio co-processor port interface. It produces 256x224 RGBA
//! framebuffers and stereo audio samples; presentation and input collection
//! are the embedder's job.
//!
//! The entry point is [`Snes`]: load a cartridge, optionally install a frame
//! sink, and drive the machine one frame at a time (or with [`Snes::run`]).
//!
//! ```no_run
//! use rusty_snes::{Button, Snes};
//!
//! let rom = std::fs::read("game.sfc").unwrap();
//! let mut snes = Snes::new();
//! snes.load_cartridge(&rom).unwrap();
//! snes.set_frame_sink(Box::new(|frame| {
//!     // hand the RGBA buffer to a canvas/texture
//!     let _ = frame;
//! }));
//! snes.set_button(Button::Start, true);
//! snes.run_frame();
//! ```

pub mod apu;
pub mod cartridge;
pub mod controller;
pub mod cpu;
pub mod dma;
pub mod memory;
pub mod ppu;
pub mod savestate;
pub mod snes;
pub mod util;

pub use cartridge::{Cartridge, LoadError, Mapping};
pub use controller::Button;
pub use ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
pub use savestate::SaveStateError;
pub use snes::Snes;
