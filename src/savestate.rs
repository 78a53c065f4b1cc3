//! Save state implementation
//!
//! Save states capture the complete mutable state of the machine: every RAM,
//! the register file, CPU registers and flags, DMA channels, controller
//! latches, scheduler counters and the fault counters. States are versioned
//! and carry a cartridge fingerprint (image size + header checksum) so a
//! state can only be applied on top of the cartridge it was taken from.
//!
//! Serialization uses bincode with Serde-derived state structs. The blob
//! format is `snapshot -> restore` round-trip stable within a version; no
//! cross-version migration is attempted.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use bincode::{Decode, Encode};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dma::DmaChannel;
use crate::ppu::BgLayer;
use crate::snes::Snes;

/// Current save state format version
const CURRENT_SAVE_STATE_VERSION: u32 = 1;

/// Errors that can occur during save state operations
#[derive(Error, Debug)]
pub enum SaveStateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("incompatible save state version: found {0}, expected {1}")]
    IncompatibleVersion(u32, u32),

    #[error("save state belongs to a different cartridge")]
    CartridgeMismatch,

    #[error("no cartridge loaded")]
    NoCartridge,
}

/// Save state data
#[derive(Serialize, Deserialize, Encode, Decode)]
pub struct SaveState {
    /// Save state format version
    version: u32,

    /// Identity of the cartridge the state belongs to
    cartridge: CartridgeFingerprint,

    /// CPU state
    cpu: CpuState,

    /// PPU state
    ppu: PpuState,

    /// APU state
    apu: ApuState,

    /// Memory bus state
    memory: MemoryState,

    /// Controller latches
    controllers: [ControllerState; 2],

    /// Scheduler counters
    scheduler: SchedulerState,
}

/// Cartridge identity: image size and header checksum
#[derive(Serialize, Deserialize, Encode, Decode, PartialEq, Eq)]
struct CartridgeFingerprint {
    rom_len: u32,
    checksum: u16,
}

/// CPU state data
#[derive(Serialize, Deserialize, Encode, Decode)]
struct CpuState {
    a: u16,
    x: u16,
    y: u16,
    sp: u16,
    pc: u16,
    pbr: u8,
    dbr: u8,
    d: u16,
    p: u8,
    emulation: bool,
    cycles: u64,
    stopped: bool,
    waiting: bool,
    decode_misses: u64,
}

/// PPU state data
#[derive(Serialize, Deserialize, Encode, Decode)]
struct PpuState {
    vram: Vec<u16>,
    cgram: Vec<u16>,
    oam: Vec<u8>,
    forced_blank: bool,
    brightness: u8,
    bg_mode: u8,
    layers: [BgLayer; 4],
    main_screen: u8,
    sub_screen: u8,
    vram_addr: u16,
    vram_step: u16,
    vram_inc_on_high: bool,
    vram_read_latch: u16,
    cgram_addr: u8,
    cgram_high_phase: bool,
    cgram_low: u8,
    oam_addr: u16,
}

/// APU state data
#[derive(Serialize, Deserialize, Encode, Decode)]
struct ApuState {
    ports: [u8; 4],
}

/// Memory bus state data
#[derive(Serialize, Deserialize, Encode, Decode)]
struct MemoryState {
    wram: Vec<u8>,
    sram: Vec<u8>,
    regs: Vec<u8>,
    dma: [DmaChannel; 8],
    nmi_enabled: bool,
    nmi_flag: bool,
    nmi_pending: bool,
    irq_pending: bool,
    in_vblank: bool,
    mapping_faults: u64,
    sram_faults: u64,
}

/// Controller state data
#[derive(Serialize, Deserialize, Encode, Decode)]
struct ControllerState {
    buttons: u16,
    shift: u16,
    strobe: bool,
}

/// Scheduler state data
#[derive(Serialize, Deserialize, Encode, Decode)]
struct SchedulerState {
    frame_cycles: u64,
    frame_count: u64,
}

impl SaveState {
    /// Capture the machine state
    pub fn capture(snes: &Snes) -> Result<Self, SaveStateError> {
        let cartridge = snes
            .memory_bus
            .cartridge()
            .ok_or(SaveStateError::NoCartridge)?;
        let (rom_len, checksum) = cartridge.fingerprint();

        let cpu = CpuState {
            a: snes.cpu.a,
            x: snes.cpu.x,
            y: snes.cpu.y,
            sp: snes.cpu.sp,
            pc: snes.cpu.pc,
            pbr: snes.cpu.pbr,
            dbr: snes.cpu.dbr,
            d: snes.cpu.d,
            p: snes.cpu.p,
            emulation: snes.cpu.emulation,
            cycles: snes.cpu.cycles,
            stopped: snes.cpu.stopped,
            waiting: snes.cpu.waiting,
            decode_misses: snes.cpu.decode_misses,
        };

        let ppu = PpuState {
            vram: snes.ppu.vram.clone(),
            cgram: snes.ppu.cgram.clone(),
            oam: snes.ppu.oam.clone(),
            forced_blank: snes.ppu.forced_blank,
            brightness: snes.ppu.brightness,
            bg_mode: snes.ppu.bg_mode,
            layers: snes.ppu.layers,
            main_screen: snes.ppu.main_screen,
            sub_screen: snes.ppu.sub_screen,
            vram_addr: snes.ppu.vram_addr,
            vram_step: snes.ppu.vram_step,
            vram_inc_on_high: snes.ppu.vram_inc_on_high,
            vram_read_latch: snes.ppu.vram_read_latch,
            cgram_addr: snes.ppu.cgram_addr,
            cgram_high_phase: snes.ppu.cgram_high_phase,
            cgram_low: snes.ppu.cgram_low,
            oam_addr: snes.ppu.oam_addr,
        };

        let (nmi_flag, nmi_pending) = snes.memory_bus.interrupt_state();
        let memory = MemoryState {
            wram: snes.memory_bus.wram().to_vec(),
            sram: snes.memory_bus.sram().to_vec(),
            regs: snes.memory_bus.regs().to_vec(),
            dma: snes.memory_bus.dma,
            nmi_enabled: snes.memory_bus.nmi_enabled,
            nmi_flag,
            nmi_pending,
            irq_pending: snes.memory_bus.irq_pending,
            in_vblank: snes.memory_bus.in_vblank,
            mapping_faults: snes.memory_bus.mapping_faults,
            sram_faults: snes.memory_bus.sram_faults,
        };

        let controllers = [&snes.controller1, &snes.controller2].map(|pad| {
            let (shift, strobe) = pad.shift_state();
            ControllerState {
                buttons: pad.button_state(),
                shift,
                strobe,
            }
        });

        Ok(SaveState {
            version: CURRENT_SAVE_STATE_VERSION,
            cartridge: CartridgeFingerprint { rom_len, checksum },
            cpu,
            ppu,
            apu: ApuState {
                ports: snes.apu.port_state(),
            },
            memory,
            controllers,
            scheduler: SchedulerState {
                frame_cycles: snes.frame_cycles,
                frame_count: snes.frame_count,
            },
        })
    }

    /// Apply this state to the machine
    pub fn apply_to(&self, snes: &mut Snes) -> Result<(), SaveStateError> {
        if self.version != CURRENT_SAVE_STATE_VERSION {
            return Err(SaveStateError::IncompatibleVersion(
                self.version,
                CURRENT_SAVE_STATE_VERSION,
            ));
        }

        let cartridge = snes
            .memory_bus
            .cartridge()
            .ok_or(SaveStateError::NoCartridge)?;
        let (rom_len, checksum) = cartridge.fingerprint();
        if self.cartridge != (CartridgeFingerprint { rom_len, checksum }) {
            return Err(SaveStateError::CartridgeMismatch);
        }

        // CPU
        snes.cpu.a = self.cpu.a;
        snes.cpu.x = self.cpu.x;
        snes.cpu.y = self.cpu.y;
        snes.cpu.sp = self.cpu.sp;
        snes.cpu.pc = self.cpu.pc;
        snes.cpu.pbr = self.cpu.pbr;
        snes.cpu.dbr = self.cpu.dbr;
        snes.cpu.d = self.cpu.d;
        snes.cpu.p = self.cpu.p;
        snes.cpu.emulation = self.cpu.emulation;
        snes.cpu.cycles = self.cpu.cycles;
        snes.cpu.stopped = self.cpu.stopped;
        snes.cpu.waiting = self.cpu.waiting;
        snes.cpu.decode_misses = self.cpu.decode_misses;

        // PPU
        copy_checked("VRAM", &self.ppu.vram, &mut snes.ppu.vram);
        copy_checked("CGRAM", &self.ppu.cgram, &mut snes.ppu.cgram);
        copy_checked("OAM", &self.ppu.oam, &mut snes.ppu.oam);
        snes.ppu.forced_blank = self.ppu.forced_blank;
        snes.ppu.brightness = self.ppu.brightness;
        snes.ppu.bg_mode = self.ppu.bg_mode;
        snes.ppu.layers = self.ppu.layers;
        snes.ppu.main_screen = self.ppu.main_screen;
        snes.ppu.sub_screen = self.ppu.sub_screen;
        snes.ppu.vram_addr = self.ppu.vram_addr;
        snes.ppu.vram_step = self.ppu.vram_step;
        snes.ppu.vram_inc_on_high = self.ppu.vram_inc_on_high;
        snes.ppu.vram_read_latch = self.ppu.vram_read_latch;
        snes.ppu.cgram_addr = self.ppu.cgram_addr;
        snes.ppu.cgram_high_phase = self.ppu.cgram_high_phase;
        snes.ppu.cgram_low = self.ppu.cgram_low;
        snes.ppu.oam_addr = self.ppu.oam_addr;

        // APU
        snes.apu.restore_state(self.apu.ports);

        // Memory bus
        copy_checked("WRAM", &self.memory.wram, snes.memory_bus.wram_mut());
        copy_checked("SRAM", &self.memory.sram, snes.memory_bus.sram_mut());
        copy_checked("registers", &self.memory.regs, snes.memory_bus.regs_mut());
        snes.memory_bus.dma = self.memory.dma;
        snes.memory_bus.nmi_enabled = self.memory.nmi_enabled;
        snes.memory_bus
            .restore_interrupt_state(self.memory.nmi_flag, self.memory.nmi_pending);
        snes.memory_bus.irq_pending = self.memory.irq_pending;
        snes.memory_bus.in_vblank = self.memory.in_vblank;
        snes.memory_bus.mapping_faults = self.memory.mapping_faults;
        snes.memory_bus.sram_faults = self.memory.sram_faults;

        // Controllers
        for (pad, state) in [&mut snes.controller1, &mut snes.controller2]
            .into_iter()
            .zip(&self.controllers)
        {
            pad.restore_state(state.buttons, state.shift, state.strobe);
        }

        // Scheduler
        snes.frame_cycles = self.scheduler.frame_cycles;
        snes.frame_count = self.scheduler.frame_count;

        info!("Save state restored successfully");
        Ok(())
    }

    /// Serialize to a byte blob
    pub fn to_bytes(&self) -> Result<Vec<u8>, SaveStateError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| SaveStateError::Serialization(e.to_string()))
    }

    /// Deserialize from a byte blob
    pub fn from_bytes(data: &[u8]) -> Result<Self, SaveStateError> {
        let (state, _) = bincode::decode_from_slice(data, bincode::config::standard())
            .map_err(|e| SaveStateError::Deserialization(e.to_string()))?;
        Ok(state)
    }

    /// Capture the machine state and write it to a file
    pub fn save_to_file<P: AsRef<Path>>(snes: &Snes, path: P) -> Result<(), SaveStateError> {
        let data = Self::capture(snes)?.to_bytes()?;
        let mut file = File::create(path.as_ref())?;
        file.write_all(&data)?;

        info!("Save state written to {}", path.as_ref().display());
        Ok(())
    }

    /// Load a state file and apply it to the machine
    pub fn load_from_file<P: AsRef<Path>>(snes: &mut Snes, path: P) -> Result<(), SaveStateError> {
        let mut file = File::open(path.as_ref())?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Self::from_bytes(&data)?.apply_to(snes)?;

        info!("Save state loaded from {}", path.as_ref().display());
        Ok(())
    }
}

/// Copy a saved buffer over a live one, warning on size mismatch instead of
/// failing (a mismatch can only come from a hand-edited blob)
fn copy_checked<T: Copy>(what: &str, from: &[T], to: &mut [T]) {
    if from.len() == to.len() {
        to.copy_from_slice(from);
    } else {
        warn!("{} size mismatch: {} vs {}", what, from.len(), to.len());
    }
}
