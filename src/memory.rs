//! Memory bus implementation
//!
//! The machine has a 24-bit address space: 256 banks of 64 KiB. This module
//! translates machine addresses into one of work RAM, save RAM, cartridge
//! ROM or the memory-mapped register file, and routes register side effects
//! to the PPU, APU, DMA engine and controllers.
//!
//! Memory map (LoROM cartridges):
//! - banks 0x00-0x3F / 0x80-0xBF, offsets 0x0000-0x1FFF: work-RAM mirror
//! - banks 0x00-0x3F / 0x80-0xBF, offsets 0x2000-0x5FFF: register file
//! - banks 0x70-0x7D, offsets below 0x8000: save RAM
//! - banks 0x7E-0x7F: the full 128 KiB of work RAM
//! - everything else: cartridge ROM, 32 KiB half-banks
//!
//! Memory map (HiROM cartridges):
//! - banks 0x40-0x7D / 0xC0-0xFF: cartridge ROM, full 64 KiB banks
//! - banks 0x20-0x3F, offsets 0x6000-0x7FFF: save RAM
//! - other banks follow the same WRAM-mirror/register split as LoROM
//!
//! Reads of unmapped space return 0; writes to cartridge space are dropped.
//! Both increment fault counters instead of failing.

use log::{debug, trace};

use crate::apu::Apu;
use crate::cartridge::{Cartridge, Mapping};
use crate::controller::Controller;
use crate::cpu::CpuBus;
use crate::dma::{Direction, DmaChannel};
use crate::ppu::Ppu;
use crate::util::{bank_addr, check_bit};

/// Work RAM size (128 KiB)
pub const WRAM_SIZE: usize = 0x20000;

/// Extent of the low-bank WRAM mirror
const WRAM_MIRROR: u16 = 0x1FFF;

/// Register file window within a bank
const REG_BASE: u16 = 0x2000;
const REG_END: u16 = 0x5FFF;

/// Resolved target of a machine address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Wram(usize),
    Sram(usize),
    Register(u16),
    Cartridge(u32),
    Open,
}

/// Represents the memory bus connecting all components
pub struct MemoryBus {
    /// Work RAM (128 KiB)
    wram: Vec<u8>,

    /// Battery-backed save RAM, sized from the cartridge header
    sram: Vec<u8>,

    /// Cartridge connected to the system
    cartridge: Option<Cartridge>,

    /// Flat register file backing 0x2000-0x5FFF
    regs: Vec<u8>,

    /// DMA channel register blocks
    pub dma: [DmaChannel; 8],

    /// Vertical-blank NMI enable ($4200 bit 7)
    pub nmi_enabled: bool,

    /// Vertical-blank flag as seen through $4210 (cleared on read)
    nmi_flag: bool,

    /// NMI edge waiting for the CPU
    nmi_pending: bool,

    /// IRQ level (no sources are wired yet, but the plumbing exists)
    pub irq_pending: bool,

    /// Currently inside vertical blank ($4212 bit 7)
    pub in_vblank: bool,

    /// A DMA transfer is running; nested $420B triggers are ignored
    dma_active: bool,

    /// Accesses the mapping could not resolve
    pub mapping_faults: u64,

    /// Save-RAM accesses outside the declared size
    pub sram_faults: u64,
}

impl MemoryBus {
    /// Create a new memory bus with no cartridge
    pub fn new() -> Self {
        MemoryBus {
            wram: vec![0; WRAM_SIZE],
            sram: Vec::new(),
            cartridge: None,
            regs: vec![0; (REG_END - REG_BASE + 1) as usize],
            dma: [DmaChannel::default(); 8],
            nmi_enabled: false,
            nmi_flag: false,
            nmi_pending: false,
            irq_pending: false,
            in_vblank: false,
            dma_active: false,
            mapping_faults: 0,
            sram_faults: 0,
        }
    }

    /// Reset the bus. Save RAM survives a reset; it is only re-created when
    /// a new cartridge is inserted.
    pub fn reset(&mut self) {
        self.wram.fill(0);
        self.regs.fill(0);
        self.dma = [DmaChannel::default(); 8];
        self.nmi_enabled = false;
        self.nmi_flag = false;
        self.nmi_pending = false;
        self.irq_pending = false;
        self.in_vblank = false;
        self.dma_active = false;
        self.mapping_faults = 0;
        self.sram_faults = 0;
    }

    /// Insert a cartridge, creating save RAM per its header
    pub fn insert_cartridge(&mut self, cartridge: Cartridge) {
        self.sram = vec![0; cartridge.sram_size()];
        self.cartridge = Some(cartridge);
    }

    /// The inserted cartridge, if any
    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cartridge.as_ref()
    }

    /// Enter or leave vertical blank. Entering latches the $4210 flag and,
    /// when enabled, queues an NMI edge for the CPU.
    pub fn set_vblank(&mut self, active: bool) {
        self.in_vblank = active;
        if active {
            self.nmi_flag = true;
            if self.nmi_enabled {
                self.nmi_pending = true;
            }
        }
    }

    /// Raw work RAM, for save states
    pub fn wram(&self) -> &[u8] {
        &self.wram
    }

    pub fn wram_mut(&mut self) -> &mut [u8] {
        &mut self.wram
    }

    /// Raw save RAM, for save states
    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    pub fn sram_mut(&mut self) -> &mut [u8] {
        &mut self.sram
    }

    /// Raw register file, for save states
    pub fn regs(&self) -> &[u8] {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut [u8] {
        &mut self.regs
    }

    /// Interrupt latch state, for save states
    pub fn interrupt_state(&self) -> (bool, bool) {
        (self.nmi_flag, self.nmi_pending)
    }

    pub fn restore_interrupt_state(&mut self, nmi_flag: bool, nmi_pending: bool) {
        self.nmi_flag = nmi_flag;
        self.nmi_pending = nmi_pending;
    }

    /// Translate a 24-bit machine address to its target
    fn resolve(&self, addr: u32) -> Target {
        let bank = (addr >> 16) as u8;
        let offset = addr as u16;
        let mapping = self
            .cartridge
            .as_ref()
            .map(|c| c.mapping())
            .unwrap_or(Mapping::LoRom);

        match mapping {
            Mapping::LoRom => self.resolve_lorom(bank, offset),
            Mapping::HiRom => self.resolve_hirom(bank, offset),
        }
    }

    fn resolve_lorom(&self, bank: u8, offset: u16) -> Target {
        match bank {
            0x7E | 0x7F => Target::Wram(((bank as usize - 0x7E) << 16) | offset as usize),
            0x00..=0x3F | 0x80..=0xBF => match offset {
                0x0000..=WRAM_MIRROR => Target::Wram((offset & WRAM_MIRROR) as usize),
                REG_BASE..=REG_END => Target::Register(offset),
                0x6000..=0x7FFF => Target::Open,
                _ => Target::Cartridge(lorom_offset(bank, offset)),
            },
            0x70..=0x7D if offset < 0x8000 => {
                Target::Sram(((bank as usize - 0x70) << 15) | offset as usize)
            }
            _ => Target::Cartridge(lorom_offset(bank, offset)),
        }
    }

    fn resolve_hirom(&self, bank: u8, offset: u16) -> Target {
        match bank {
            0x7E | 0x7F => Target::Wram(((bank as usize - 0x7E) << 16) | offset as usize),
            0x40..=0x7D | 0xC0..=0xFF => {
                Target::Cartridge(bank_addr(bank, offset) & 0x3F_FFFF)
            }
            _ => match offset {
                0x0000..=WRAM_MIRROR => Target::Wram((offset & WRAM_MIRROR) as usize),
                REG_BASE..=REG_END => Target::Register(offset),
                0x6000..=0x7FFF if (0x20..=0x3F).contains(&bank) => {
                    Target::Sram(((bank as usize - 0x20) << 13) | (offset as usize - 0x6000))
                }
                0x6000..=0x7FFF => Target::Open,
                _ => Target::Cartridge(
                    (((bank & 0x3F) as u32) * 0x8000) | (offset & 0x7FFF) as u32,
                ),
            },
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// LoROM mapped offset: 32 KiB half-banks, high halves stacked
#[inline]
fn lorom_offset(bank: u8, offset: u16) -> u32 {
    (((bank & 0x7F) as u32) * 0x8000) | (offset & 0x7FFF) as u32
}

/// Ephemeral view of the whole machine, assembled by the scheduler for the
/// duration of a CPU batch or a register access. Owning nothing, it lets the
/// bus route register writes into the PPU and APU without reference cycles.
pub struct SystemBus<'a> {
    pub mem: &'a mut MemoryBus,
    pub ppu: &'a mut Ppu,
    pub apu: &'a mut Apu,
    pub joy1: &'a mut Controller,
    pub joy2: &'a mut Controller,
}

impl SystemBus<'_> {
    /// Read a byte from a 24-bit machine address
    pub fn read(&mut self, addr: u32) -> u8 {
        match self.mem.resolve(addr) {
            Target::Wram(index) => self.mem.wram[index],
            Target::Sram(index) => {
                if index < self.mem.sram.len() {
                    self.mem.sram[index]
                } else {
                    trace!("save-RAM read out of bounds: ${:06X}", addr);
                    self.mem.sram_faults += 1;
                    0
                }
            }
            Target::Register(offset) => self.read_register(offset),
            Target::Cartridge(offset) => match &self.mem.cartridge {
                Some(cart) => cart.read(offset),
                None => 0,
            },
            Target::Open => {
                trace!("read from unmapped address ${:06X}", addr);
                self.mem.mapping_faults += 1;
                0
            }
        }
    }

    /// Write a byte to a 24-bit machine address
    pub fn write(&mut self, addr: u32, value: u8) {
        match self.mem.resolve(addr) {
            Target::Wram(index) => self.mem.wram[index] = value,
            Target::Sram(index) => {
                if index < self.mem.sram.len() {
                    self.mem.sram[index] = value;
                } else {
                    trace!("save-RAM write out of bounds: ${:06X}", addr);
                    self.mem.sram_faults += 1;
                }
            }
            Target::Register(offset) => self.write_register(offset, value),
            Target::Cartridge(_) => {
                trace!("write to cartridge ROM dropped: ${:06X} = ${:02X}", addr, value);
            }
            Target::Open => {
                trace!("write to unmapped address ${:06X} = ${:02X}", addr, value);
                self.mem.mapping_faults += 1;
            }
        }
    }

    /// Read from the register file
    fn read_register(&mut self, addr: u16) -> u8 {
        match addr {
            // PPU read ports (VRAM/CGRAM data, counters)
            0x2134..=0x213F => self.ppu.read_register(addr),

            // APU communication ports, mirrored through $217F
            0x2140..=0x217F => self.apu.read_port((addr & 0x03) as usize),

            // Controller serial data
            0x4016 => self.joy1.read(),
            0x4017 => self.joy2.read(),

            // RDNMI - vertical-blank flag (cleared on read) + chip version
            0x4210 => {
                let mut value = 0x02;
                if self.mem.nmi_flag {
                    value |= 0x80;
                }
                self.mem.nmi_flag = false;
                value
            }

            // HVBJOY - blanking status
            0x4212 => {
                if self.mem.in_vblank {
                    0x80
                } else {
                    0
                }
            }

            // DMA channel registers
            0x4300..=0x437F => {
                let channel = ((addr >> 4) & 0x07) as usize;
                self.mem.dma[channel].load((addr & 0x0F) as u8)
            }

            // Everything else reads back the flat file
            _ => self.mem.regs[(addr - REG_BASE) as usize],
        }
    }

    /// Write to the register file. The value always lands in the flat file;
    /// known addresses additionally drive component side effects.
    fn write_register(&mut self, addr: u16, value: u8) {
        self.mem.regs[(addr - REG_BASE) as usize] = value;

        match addr {
            // PPU configuration and data ports
            0x2100..=0x2133 => self.ppu.write_register(addr, value),

            // APU communication ports
            0x2140..=0x217F => self.apu.write_port((addr & 0x03) as usize, value),

            // Controller strobe (latches both pads)
            0x4016 => {
                self.joy1.write_strobe(value);
                self.joy2.write_strobe(value);
            }

            // NMITIMEN - interrupt enable
            0x4200 => self.mem.nmi_enabled = check_bit(value, 7),

            // MDMAEN - start general-purpose DMA
            0x420B => {
                if !self.mem.dma_active {
                    self.run_dma(value);
                }
            }

            // DMA channel registers
            0x4300..=0x437F => {
                let channel = ((addr >> 4) & 0x07) as usize;
                self.mem.dma[channel].store((addr & 0x0F) as u8, value);
            }

            _ => {}
        }
    }

    /// Execute general-purpose DMA for every channel set in `mask`
    ///
    /// Channels run to completion in index order. Each byte moves between
    /// the A-bus address (advancing unless fixed) and a B-bus register that
    /// cycles through the channel mode's offset pattern.
    fn run_dma(&mut self, mask: u8) {
        self.mem.dma_active = true;

        for ch in 0..8 {
            if mask & (1 << ch) == 0 {
                continue;
            }
            let channel = self.mem.dma[ch];
            let pattern = channel.pattern();
            let count = channel.transfer_len();
            let mut a_addr = channel.a_addr;

            debug!(
                "DMA ch{}: {:?} ${:02X}:{:04X} <-> ${:04X} mode {} len {}",
                ch,
                channel.direction(),
                channel.a_bank,
                a_addr,
                0x2100 + channel.b_reg as u16,
                channel.mode(),
                count
            );

            for i in 0..count {
                let b_addr = 0x2100 + channel.b_reg.wrapping_add(pattern[i % pattern.len()]) as u16;
                match channel.direction() {
                    Direction::AToB => {
                        let value = self.read(bank_addr(channel.a_bank, a_addr));
                        self.write_register(b_addr, value);
                    }
                    Direction::BToA => {
                        let value = self.read_register(b_addr);
                        self.write(bank_addr(channel.a_bank, a_addr), value);
                    }
                }
                if !channel.fixed() {
                    a_addr = a_addr.wrapping_add(1);
                }
            }

            self.mem.dma[ch].a_addr = a_addr;
            self.mem.dma[ch].size = 0;
        }

        // All selected channels ran to completion; clear the enable mask
        self.mem.regs[(0x420B - REG_BASE) as usize] = 0;
        self.mem.dma_active = false;
    }
}

impl CpuBus for SystemBus<'_> {
    fn read(&mut self, addr: u32) -> u8 {
        SystemBus::read(self, addr)
    }

    fn write(&mut self, addr: u32, value: u8) {
        SystemBus::write(self, addr, value);
    }

    fn poll_nmi(&mut self) -> bool {
        let pending = self.mem.nmi_pending;
        self.mem.nmi_pending = false;
        pending
    }

    fn poll_irq(&mut self) -> bool {
        self.mem.irq_pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        mem: MemoryBus,
        ppu: Ppu,
        apu: Apu,
        joy1: Controller,
        joy2: Controller,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                mem: MemoryBus::new(),
                ppu: Ppu::new(),
                apu: Apu::new(),
                joy1: Controller::new(),
                joy2: Controller::new(),
            }
        }

        fn with_cartridge(cartridge: Cartridge) -> Self {
            let mut f = Self::new();
            f.mem.insert_cartridge(cartridge);
            f
        }

        fn bus(&mut self) -> SystemBus<'_> {
            SystemBus {
                mem: &mut self.mem,
                ppu: &mut self.ppu,
                apu: &mut self.apu,
                joy1: &mut self.joy1,
                joy2: &mut self.joy2,
            }
        }
    }

    /// A LoROM image whose bytes follow (i * 31) % 256, with a valid header
    /// written over the pattern.
    fn pattern_lorom() -> Vec<u8> {
        let mut rom: Vec<u8> = (0..0x10000u32).map(|i| (i * 31) as u8).collect();
        rom[0x7FB0 + 0x26] = 0x20; // LoROM map byte
        rom[0x7FB0 + 0x25] = 0x02; // ROM type with save RAM
        rom[0x7FB0 + 0x28] = 0x03; // 8 KiB save RAM
        for b in &mut rom[0x7FB0..0x7FB0 + 21] {
            *b = b' ';
        }
        rom[0x7FB0] = b'M';
        let sum: u16 = rom
            .iter()
            .enumerate()
            .filter(|(i, _)| !(0x7FB0 + 0x2C..0x7FB0 + 0x30).contains(i))
            .fold(0u16, |acc, (_, &b)| acc.wrapping_add(b as u16));
        rom[0x7FB0 + 0x2C..0x7FB0 + 0x2E].copy_from_slice(&sum.to_le_bytes());
        rom[0x7FB0 + 0x2E..0x7FB0 + 0x30]
            .copy_from_slice(&(0xFFFFu16.wrapping_sub(sum)).to_le_bytes());
        rom
    }

    #[test]
    fn wram_is_mirrored_into_the_low_banks() {
        let mut f = Fixture::new();
        let mut bus = f.bus();
        bus.write(0x7E0010, 0xAB);
        assert_eq!(bus.read(0x000010), 0xAB);
        assert_eq!(bus.read(0x801010), bus.read(0x7E1010));

        bus.write(0x3F1234, 0x55);
        assert_eq!(bus.read(0x7E1234), 0x55);
        assert_eq!(bus.read(0xBF1234), 0x55);
    }

    #[test]
    fn lorom_mapping_reaches_every_cartridge_window() {
        let rom = pattern_lorom();
        let cart = Cartridge::from_bytes(&rom).unwrap();
        let mut f = Fixture::with_cartridge(cart);
        let mut bus = f.bus();

        for &(bank, offset) in &[
            (0x00u8, 0x8000u16),
            (0x00, 0xFFFC),
            (0x01, 0x8123),
            (0x40, 0x0000),
            (0x40, 0x9000),
            (0x6F, 0xFFFF),
            (0x80, 0x8000),
            (0xC0, 0x4567),
            (0xFF, 0xFFFF),
        ] {
            let mapped = ((((bank & 0x7F) as u32) * 0x8000) | (offset & 0x7FFF) as u32) as usize;
            let expected = rom[mapped % rom.len()];
            assert_eq!(
                bus.read(bank_addr(bank, offset)),
                expected,
                "bank {:02X} offset {:04X}",
                bank,
                offset
            );
        }
    }

    #[test]
    fn hirom_mapping_uses_full_banks() {
        let mut rom: Vec<u8> = (0..0x20000u32).map(|i| (i * 31) as u8).collect();
        rom[0xFFB0 + 0x26] = 0x21;
        rom[0xFFB0 + 0x25] = 0x00;
        for b in &mut rom[0xFFB0..0xFFB0 + 21] {
            *b = b'H';
        }
        let sum: u16 = rom
            .iter()
            .enumerate()
            .filter(|(i, _)| !(0xFFB0 + 0x2C..0xFFB0 + 0x30).contains(i))
            .fold(0u16, |acc, (_, &b)| acc.wrapping_add(b as u16));
        rom[0xFFB0 + 0x2C..0xFFB0 + 0x2E].copy_from_slice(&sum.to_le_bytes());
        rom[0xFFB0 + 0x2E..0xFFB0 + 0x30]
            .copy_from_slice(&(0xFFFFu16.wrapping_sub(sum)).to_le_bytes());

        let cart = Cartridge::from_bytes(&rom).unwrap();
        assert_eq!(cart.mapping(), Mapping::HiRom);
        let mut f = Fixture::with_cartridge(cart);
        let mut bus = f.bus();

        // Full-bank window
        assert_eq!(bus.read(0xC01234), rom[0x01234]);
        assert_eq!(bus.read(0xC11234), rom[0x11234]);
        assert_eq!(bus.read(0x401234), rom[0x01234]);
        // Mirror window in the system banks
        assert_eq!(bus.read(0x018000), rom[0x8000]);
    }

    #[test]
    fn writes_to_cartridge_space_are_dropped() {
        let rom = pattern_lorom();
        let cart = Cartridge::from_bytes(&rom).unwrap();
        let mut f = Fixture::with_cartridge(cart);
        let mut bus = f.bus();
        let before = bus.read(0x008000);
        bus.write(0x008000, before.wrapping_add(1));
        assert_eq!(bus.read(0x008000), before);
    }

    #[test]
    fn unmapped_reads_return_zero_and_count() {
        let mut f = Fixture::new();
        let mut bus = f.bus();
        assert_eq!(bus.read(0x006100), 0);
        bus.write(0x006100, 0xFF);
        assert_eq!(f.mem.mapping_faults, 2);
    }

    #[test]
    fn sram_is_bounds_checked() {
        let rom = pattern_lorom();
        let cart = Cartridge::from_bytes(&rom).unwrap();
        assert_eq!(cart.sram_size(), 0x2000);
        let mut f = Fixture::with_cartridge(cart);
        let mut bus = f.bus();

        bus.write(0x700000, 0x5A);
        assert_eq!(bus.read(0x700000), 0x5A);

        // Bank 0x71 starts at SRAM offset 0x8000, past the declared 8 KiB
        bus.write(0x710000, 0x77);
        assert_eq!(bus.read(0x710000), 0);
        assert_eq!(f.mem.sram_faults, 2);
    }

    #[test]
    fn register_writes_reach_the_ppu() {
        let mut f = Fixture::new();
        let mut bus = f.bus();
        bus.write(0x002100, 0x0F);
        bus.write(0x812100, 0x8A);
        assert!(f.ppu.forced_blank);
        assert_eq!(f.ppu.brightness, 0x0A);
    }

    #[test]
    fn nmi_flag_clears_on_read() {
        let mut f = Fixture::new();
        f.mem.set_vblank(true);
        let mut bus = f.bus();
        assert_eq!(bus.read(0x004210) & 0x80, 0x80);
        assert_eq!(bus.read(0x004210) & 0x80, 0);
        assert_eq!(bus.read(0x004212), 0x80);
    }

    #[test]
    fn vblank_entry_queues_nmi_only_when_enabled() {
        let mut f = Fixture::new();
        f.mem.set_vblank(true);
        assert!(!f.bus().poll_nmi());

        f.mem.set_vblank(false);
        f.bus().write(0x004200, 0x80);
        f.mem.set_vblank(true);
        let mut bus = f.bus();
        assert!(CpuBus::poll_nmi(&mut bus));
        // The edge is consumed
        assert!(!CpuBus::poll_nmi(&mut bus));
    }

    #[test]
    fn dma_mode_zero_fills_the_palette() {
        let rom = pattern_lorom();
        let cart = Cartridge::from_bytes(&rom).unwrap();
        let mut f = Fixture::with_cartridge(cart);
        let mut bus = f.bus();

        // Stage 32 bytes in WRAM
        for i in 0..32u32 {
            bus.write(0x7E1000 + i, (i as u8) * 3);
        }

        bus.write(0x002121, 0x00); // palette index 0
        bus.write(0x004300, 0x00); // control: A->B, increment, mode 0
        bus.write(0x004302, 0x22); // B-bus: $2122 (palette data)
        bus.write(0x004303, 0x00);
        bus.write(0x004304, 0x10);
        bus.write(0x004305, 0x7E); // A-bus: $7E:1000
        bus.write(0x004308, 0x20);
        bus.write(0x004309, 0x00); // 32 bytes
        bus.write(0x00420B, 0x01);

        for i in 0..16usize {
            let low = (i as u16 * 6) % 256;
            let high = ((i as u16 * 6 + 3) % 256) & 0x7F;
            assert_eq!(f.ppu.cgram[i], (high << 8) | low);
        }
        assert_eq!(f.ppu.cgram_addr, 16);
        assert_eq!(f.mem.dma[0].size, 0);
        assert_eq!(f.mem.regs()[0x420B - 0x2000], 0);
    }

    #[test]
    fn dma_mode_one_interleaves_vram_bytes() {
        let rom = pattern_lorom();
        let cart = Cartridge::from_bytes(&rom).unwrap();
        let mut f = Fixture::with_cartridge(cart);
        let mut bus = f.bus();

        for i in 0..8u32 {
            bus.write(0x7E2000 + i, 0x10 + i as u8);
        }

        bus.write(0x002115, 0x80); // increment on high byte, step 1
        bus.write(0x002116, 0x00);
        bus.write(0x002117, 0x04); // VRAM word 0x0400
        bus.write(0x004300, 0x01); // mode 1
        bus.write(0x004302, 0x18); // B-bus: $2118/$2119
        bus.write(0x004303, 0x00);
        bus.write(0x004304, 0x20);
        bus.write(0x004305, 0x7E);
        bus.write(0x004308, 0x08);
        bus.write(0x004309, 0x00);
        bus.write(0x00420B, 0x01);

        assert_eq!(f.ppu.vram[0x0400], 0x1110);
        assert_eq!(f.ppu.vram[0x0401], 0x1312);
        assert_eq!(f.ppu.vram[0x0402], 0x1514);
        assert_eq!(f.ppu.vram[0x0403], 0x1716);
        assert_eq!(f.ppu.vram_addr, 0x0404);
    }

    #[test]
    fn dma_b_to_a_reads_registers_into_memory() {
        let mut f = Fixture::new();
        let mut bus = f.bus();

        // Seed two palette entries, then rewind the read address
        bus.write(0x002121, 0x00);
        for byte in [0x34, 0x12, 0x78, 0x56] {
            bus.write(0x002122, byte);
        }
        bus.write(0x002121, 0x00);

        bus.write(0x004300, 0x80); // B->A, mode 0
        bus.write(0x004302, 0x3B); // B-bus: $213B (palette read)
        bus.write(0x004303, 0x00);
        bus.write(0x004304, 0x30);
        bus.write(0x004305, 0x7E);
        bus.write(0x004308, 0x04);
        bus.write(0x004309, 0x00);
        bus.write(0x00420B, 0x01);

        assert_eq!(f.mem.wram()[0x3000], 0x34);
        assert_eq!(f.mem.wram()[0x3001], 0x12);
        assert_eq!(f.mem.wram()[0x3002], 0x78);
        assert_eq!(f.mem.wram()[0x3003], 0x56);
    }

    #[test]
    fn fixed_source_dma_repeats_one_byte() {
        let mut f = Fixture::new();
        let mut bus = f.bus();
        bus.write(0x7E0100, 0x42);

        bus.write(0x002102, 0x00);
        bus.write(0x002103, 0x00);
        bus.write(0x004300, 0x08); // fixed A-bus address, mode 0
        bus.write(0x004302, 0x04); // B-bus: $2104 (OAM data)
        bus.write(0x004303, 0x00);
        bus.write(0x004304, 0x01);
        bus.write(0x004305, 0x7E);
        bus.write(0x004308, 0x04);
        bus.write(0x004309, 0x00);
        bus.write(0x00420B, 0x01);

        assert_eq!(&f.ppu.oam[0..4], &[0x42, 0x42, 0x42, 0x42]);
        assert_eq!(f.mem.dma[0].a_addr, 0x0100);
    }
}
