//! SNES system implementation
//!
//! This module ties the CPU, PPU, APU, memory bus and controllers together
//! and paces them against the frame clock. The machine runs ~21.477 million
//! master cycles per second; a frame is 262 scanlines of 1364 master cycles,
//! of which the first 224 scanlines are visible.
//!
//! [`Snes::run_frame`] advances the CPU until the vertical-blank boundary,
//! latches the blanking flags (delivering NMI when enabled), renders the
//! frame, hands it to the embedder's frame sink, then runs out the blanking
//! period. [`Snes::run`] loops frames until the shared running flag clears,
//! so an embedder (or the frame sink itself, via [`Snes::stop_handle`]) can
//! stop the loop cooperatively.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::apu::Apu;
use crate::cartridge::{Cartridge, LoadError};
use crate::controller::{Button, Controller};
use crate::cpu::Cpu;
use crate::memory::{MemoryBus, SystemBus};
use crate::ppu::Ppu;
use crate::savestate::{SaveState, SaveStateError};

/// Master clock rate (Hz), NTSC
pub const MASTER_CLOCK_HZ: u64 = 21_477_000;

/// Master cycles per scanline
pub const MASTER_CYCLES_PER_SCANLINE: u64 = 1364;

/// Scanlines per frame (224 visible + 38 vertical blank)
pub const SCANLINES_PER_FRAME: u64 = 262;

/// Visible scanlines per frame
pub const VISIBLE_SCANLINES: u64 = 224;

/// Master cycles per frame
pub const MASTER_CYCLES_PER_FRAME: u64 = MASTER_CYCLES_PER_SCANLINE * SCANLINES_PER_FRAME;

/// Master cycle at which vertical blank begins
const VBLANK_START: u64 = MASTER_CYCLES_PER_SCANLINE * VISIBLE_SCANLINES;

/// Master cycles per CPU cycle
const MASTER_CYCLES_PER_CPU_CYCLE: u64 = 6;

/// Callback receiving each finished RGBA framebuffer
pub type FrameSink = Box<dyn FnMut(&[u8])>;

/// Represents the whole machine
pub struct Snes {
    pub cpu: Cpu,
    pub ppu: Ppu,
    pub apu: Apu,
    pub memory_bus: MemoryBus,
    pub controller1: Controller,
    pub controller2: Controller,

    /// Master cycles consumed within the current frame
    pub(crate) frame_cycles: u64,

    /// Frames completed since reset
    pub(crate) frame_count: u64,

    running: Arc<AtomicBool>,
    frame_sink: Option<FrameSink>,
}

impl Snes {
    /// Create a new machine with no cartridge
    pub fn new() -> Self {
        Snes {
            cpu: Cpu::new(),
            ppu: Ppu::new(),
            apu: Apu::new(),
            memory_bus: MemoryBus::new(),
            controller1: Controller::new(),
            controller2: Controller::new(),
            frame_cycles: 0,
            frame_count: 0,
            running: Arc::new(AtomicBool::new(false)),
            frame_sink: None,
        }
    }

    /// Load a cartridge from a raw ROM image and reset the machine
    pub fn load_cartridge(&mut self, data: &[u8]) -> Result<(), LoadError> {
        let cartridge = Cartridge::from_bytes(data)?;
        self.memory_bus.insert_cartridge(cartridge);
        self.reset();

        info!("Cartridge loaded successfully");
        Ok(())
    }

    /// Reset the machine to its initial state. The cartridge (and its save
    /// RAM) is retained.
    pub fn reset(&mut self) {
        self.memory_bus.reset();
        self.ppu.reset();
        self.apu.reset();
        self.controller1.reset();
        self.controller2.reset();
        self.frame_cycles = 0;
        self.frame_count = 0;

        // The CPU resets last: it reads the reset vector through the bus
        let mut bus = SystemBus {
            mem: &mut self.memory_bus,
            ppu: &mut self.ppu,
            apu: &mut self.apu,
            joy1: &mut self.controller1,
            joy2: &mut self.controller2,
        };
        self.cpu.reset(&mut bus);
    }

    /// Run a single frame of emulation and hand the framebuffer to the sink
    pub fn run_frame(&mut self) {
        // Visible portion
        while self.frame_cycles < VBLANK_START {
            self.step_cpu();
        }

        // Vertical blank: latch the flag (delivering NMI when enabled),
        // then produce and publish the frame
        self.memory_bus.set_vblank(true);
        self.ppu.render_frame();
        if let Some(sink) = self.frame_sink.as_mut() {
            sink(self.ppu.frame_buffer());
        }

        // Blanking portion; the CPU sees the NMI on its next boundary
        while self.frame_cycles < MASTER_CYCLES_PER_FRAME {
            self.step_cpu();
        }
        self.memory_bus.set_vblank(false);

        self.frame_cycles -= MASTER_CYCLES_PER_FRAME;
        self.frame_count += 1;
        debug!("frame {} complete", self.frame_count);
    }

    /// Run frames until [`Snes::stop`] is called (possibly from the frame
    /// sink through a [`Snes::stop_handle`])
    pub fn run(&mut self) {
        self.running.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            self.run_frame();
        }
    }

    /// Clear the running flag; `run` returns at the next frame boundary
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// A shared handle onto the running flag, for stopping the loop from a
    /// frame sink or another thread
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Install the frame-ready callback
    pub fn set_frame_sink(&mut self, sink: FrameSink) {
        self.frame_sink = Some(sink);
    }

    /// Set a button on the first controller
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.controller1.set_button(button, pressed);
    }

    /// Fill stereo audio buffers with samples (silence baseline)
    pub fn fill_audio(&self, left: &mut [f32], right: &mut [f32]) {
        self.apu.fill_samples(left, right);
    }

    /// The most recently rendered frame (RGBA, 256 * 224 * 4 bytes)
    pub fn frame_buffer(&self) -> &[u8] {
        self.ppu.frame_buffer()
    }

    /// Frames completed since reset
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Serialize the full mutable machine state
    pub fn snapshot(&self) -> Result<Vec<u8>, SaveStateError> {
        SaveState::capture(self)?.to_bytes()
    }

    /// Restore machine state from a snapshot. The loaded cartridge must
    /// match the one the snapshot was taken from.
    pub fn restore(&mut self, data: &[u8]) -> Result<(), SaveStateError> {
        SaveState::from_bytes(data)?.apply_to(self)
    }

    /// Advance the CPU one instruction and account its master cycles
    fn step_cpu(&mut self) {
        let mut bus = SystemBus {
            mem: &mut self.memory_bus,
            ppu: &mut self.ppu,
            apu: &mut self.apu,
            joy1: &mut self.controller1,
            joy2: &mut self.controller2,
        };
        let cycles = self.cpu.step(&mut bus);
        self.frame_cycles += cycles as u64 * MASTER_CYCLES_PER_CPU_CYCLE;
    }
}

impl Default for Snes {
    fn default() -> Self {
        Self::new()
    }
}
