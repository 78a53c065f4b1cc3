//! PPU (Picture Processing Unit) implementation
//!
//! The PPU owns video RAM (64 KiB of 16-bit words holding tile pixel data
//! and tilemaps), palette RAM (256 entries of 15-bit color) and the sprite
//! attribute table. Register writes arriving from the memory bus mutate the
//! access latches and layer configuration; once per frame the scheduler asks
//! for a full 256x224 RGBA framebuffer.
//!
//! The VRAM and palette ports are two-phase latches: the VRAM word address
//! auto-increments on either the low- or high-byte access depending on the
//! increment-on-high flag, and palette writes commit a 15-bit entry on every
//! second byte.

mod background;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::util::check_bit;

/// Screen width in pixels
pub const SCREEN_WIDTH: usize = 256;

/// Screen height in pixels
pub const SCREEN_HEIGHT: usize = 224;

/// VRAM size in 16-bit words
pub const VRAM_WORDS: usize = 0x8000;

/// Number of palette entries
pub const CGRAM_ENTRIES: usize = 256;

/// OAM size in bytes (128 sprites * 4 bytes + 32 bytes high table)
pub const OAM_SIZE: usize = 544;

/// Per-layer background configuration
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct BgLayer {
    /// 16x16 tiles instead of 8x8 (stored; the renderer draws 8x8)
    pub tile16: bool,

    /// Tilemap base address in VRAM words
    pub map_base: u16,

    /// Tilemap size code (0-3: 32x32, 64x32, 32x64, 64x64)
    pub map_size: u8,

    /// Character (tile pixel) data base address in VRAM words
    pub chr_base: u16,
}

/// Represents the SNES PPU
pub struct Ppu {
    /// Video RAM, addressed as 16-bit words
    pub vram: Vec<u16>,

    /// Palette RAM (15-bit BGR entries)
    pub cgram: Vec<u16>,

    /// Sprite attribute memory
    pub oam: Vec<u8>,

    /// Forced blanking ($2100 bit 7)
    pub forced_blank: bool,

    /// Master brightness 0-15 ($2100 bits 0-3)
    pub brightness: u8,

    /// Background mode 0-7 ($2105 bits 0-2)
    pub bg_mode: u8,

    /// Per-layer configuration
    pub layers: [BgLayer; 4],

    /// Main screen layer enable mask ($212C bits 0-4)
    pub main_screen: u8,

    /// Sub screen layer enable mask ($212D bits 0-4)
    pub sub_screen: u8,

    /// Current VRAM word address ($2116/$2117)
    pub vram_addr: u16,

    /// VRAM address auto-increment step (1, 32 or 128)
    pub vram_step: u16,

    /// Increment on high-byte access instead of low ($2115 bit 7)
    pub vram_inc_on_high: bool,

    /// VRAM read prefetch latch
    pub vram_read_latch: u16,

    /// Current palette entry index ($2121)
    pub cgram_addr: u8,

    /// Palette port phase: true after the low byte has been written
    pub cgram_high_phase: bool,

    /// Latched palette low byte awaiting its high half
    pub cgram_low: u8,

    /// Current OAM byte address ($2102/$2103)
    pub oam_addr: u16,

    /// RGBA framebuffer, rebuilt each frame
    frame_buffer: Vec<u8>,
}

impl Ppu {
    /// Create a new PPU with cleared memories
    pub fn new() -> Self {
        Ppu {
            vram: vec![0; VRAM_WORDS],
            cgram: vec![0; CGRAM_ENTRIES],
            oam: vec![0; OAM_SIZE],
            forced_blank: true,
            brightness: 0,
            bg_mode: 0,
            layers: [BgLayer::default(); 4],
            main_screen: 0,
            sub_screen: 0,
            vram_addr: 0,
            vram_step: 1,
            vram_inc_on_high: false,
            vram_read_latch: 0,
            cgram_addr: 0,
            cgram_high_phase: false,
            cgram_low: 0,
            oam_addr: 0,
            frame_buffer: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT * 4],
        }
    }

    /// Reset the PPU to power-on state
    pub fn reset(&mut self) {
        *self = Ppu::new();
    }

    /// The most recently rendered frame (RGBA, 256 * 224 * 4 bytes)
    pub fn frame_buffer(&self) -> &[u8] {
        &self.frame_buffer
    }

    /// Handle a register write routed from the memory bus ($2100-$2133)
    pub fn write_register(&mut self, addr: u16, value: u8) {
        match addr {
            // INIDISP - brightness and forced blank
            0x2100 => {
                self.brightness = value & 0x0F;
                self.forced_blank = check_bit(value, 7);
            }

            // BGMODE - mode and per-layer tile size
            0x2105 => {
                self.bg_mode = value & 0x07;
                for (i, layer) in self.layers.iter_mut().enumerate() {
                    layer.tile16 = value & (0x10 << i) != 0;
                }
            }

            // BG1SC-BG4SC - tilemap base and size
            0x2107..=0x210A => {
                let layer = &mut self.layers[(addr - 0x2107) as usize];
                layer.map_base = ((value >> 2) as u16) * 0x400;
                layer.map_size = value & 0x03;
            }

            // BG12NBA - character data base for layers 1/2
            0x210B => {
                self.layers[0].chr_base = ((value & 0x0F) as u16) * 0x1000;
                self.layers[1].chr_base = ((value >> 4) as u16) * 0x1000;
            }

            // BG34NBA - character data base for layers 3/4
            0x210C => {
                self.layers[2].chr_base = ((value & 0x0F) as u16) * 0x1000;
                self.layers[3].chr_base = ((value >> 4) as u16) * 0x1000;
            }

            // OAMADDL/OAMADDH - sprite table address (word index)
            0x2102 => {
                self.oam_addr = (self.oam_addr & 0x0200) | ((value as u16) << 1);
            }
            0x2103 => {
                self.oam_addr = (self.oam_addr & 0x01FF) | (((value & 0x01) as u16) << 9);
            }

            // OAMDATA - sprite table write with auto-increment
            0x2104 => {
                let index = self.oam_addr as usize % OAM_SIZE;
                self.oam[index] = value;
                self.oam_addr = self.oam_addr.wrapping_add(1) % OAM_SIZE as u16;
            }

            // VMAIN - VRAM increment mode
            0x2115 => {
                self.vram_step = match value & 0x03 {
                    0 => 1,
                    1 => 32,
                    _ => 128,
                };
                self.vram_inc_on_high = check_bit(value, 7);
            }

            // VMADDL/VMADDH - VRAM word address; setting it primes the
            // read prefetch latch
            0x2116 => {
                self.vram_addr = (self.vram_addr & 0xFF00) | value as u16;
                self.vram_read_latch = self.vram_word(self.vram_addr);
            }
            0x2117 => {
                self.vram_addr = (self.vram_addr & 0x00FF) | ((value as u16) << 8);
                self.vram_read_latch = self.vram_word(self.vram_addr);
            }

            // VMDATAL - VRAM data low byte
            0x2118 => {
                let word = self.vram_word(self.vram_addr);
                self.set_vram_word(self.vram_addr, (word & 0xFF00) | value as u16);
                if !self.vram_inc_on_high {
                    self.vram_addr = self.vram_addr.wrapping_add(self.vram_step);
                }
            }

            // VMDATAH - VRAM data high byte
            0x2119 => {
                let word = self.vram_word(self.vram_addr);
                self.set_vram_word(self.vram_addr, (word & 0x00FF) | ((value as u16) << 8));
                if self.vram_inc_on_high {
                    self.vram_addr = self.vram_addr.wrapping_add(self.vram_step);
                }
            }

            // CGADD - palette address, resets the byte latch
            0x2121 => {
                self.cgram_addr = value;
                self.cgram_high_phase = false;
            }

            // CGDATA - palette data, committing 15 bits per byte pair
            0x2122 => {
                if self.cgram_high_phase {
                    let entry = ((value as u16 & 0x7F) << 8) | self.cgram_low as u16;
                    self.cgram[self.cgram_addr as usize] = entry;
                    self.cgram_addr = self.cgram_addr.wrapping_add(1);
                } else {
                    self.cgram_low = value;
                }
                self.cgram_high_phase = !self.cgram_high_phase;
            }

            // TM/TS - main and sub screen enables
            0x212C => self.main_screen = value & 0x1F,
            0x212D => self.sub_screen = value & 0x1F,

            _ => {
                trace!("unhandled PPU register write ${:04X} = ${:02X}", addr, value);
            }
        }
    }

    /// Handle a register read routed from the memory bus ($2134-$213F)
    pub fn read_register(&mut self, addr: u16) -> u8 {
        match addr {
            // RDVRAML - VRAM read low byte
            0x2139 => {
                let value = self.vram_read_latch as u8;
                if !self.vram_inc_on_high {
                    self.vram_read_latch = self.vram_word(self.vram_addr);
                    self.vram_addr = self.vram_addr.wrapping_add(self.vram_step);
                }
                value
            }

            // RDVRAMH - VRAM read high byte
            0x213A => {
                let value = (self.vram_read_latch >> 8) as u8;
                if self.vram_inc_on_high {
                    self.vram_read_latch = self.vram_word(self.vram_addr);
                    self.vram_addr = self.vram_addr.wrapping_add(self.vram_step);
                }
                value
            }

            // RDCGRAM - palette read, sharing the byte latch with writes
            0x213B => {
                let entry = self.cgram[self.cgram_addr as usize];
                if self.cgram_high_phase {
                    self.cgram_high_phase = false;
                    self.cgram_addr = self.cgram_addr.wrapping_add(1);
                    (entry >> 8) as u8
                } else {
                    self.cgram_high_phase = true;
                    entry as u8
                }
            }

            _ => {
                trace!("unhandled PPU register read ${:04X}", addr);
                0
            }
        }
    }

    /// Fetch a VRAM word (the top address bit is unused)
    #[inline]
    fn vram_word(&self, addr: u16) -> u16 {
        self.vram[addr as usize % VRAM_WORDS]
    }

    #[inline]
    fn set_vram_word(&mut self, addr: u16, value: u16) {
        self.vram[addr as usize % VRAM_WORDS] = value;
    }

    /// Render one full frame into the framebuffer
    ///
    /// Layers are drawn back to front so that layer 1 ends up on top;
    /// color index 0 of every sub-palette is transparent and leaves the
    /// pixels below visible.
    pub fn render_frame(&mut self) {
        // Opaque black baseline; forced blank and disabled screens stop here
        for pixel in self.frame_buffer.chunks_exact_mut(4) {
            pixel.copy_from_slice(&[0, 0, 0, 0xFF]);
        }
        if self.forced_blank || self.main_screen == 0 {
            return;
        }

        for layer in (0..4).rev() {
            if self.main_screen & (1 << layer) == 0 {
                continue;
            }
            let bpp = self.layer_bpp(layer);
            if bpp == 0 {
                continue;
            }
            self.render_background(layer, bpp);
        }
    }

    /// Bits per pixel for a layer in the current mode (0 = layer unused)
    ///
    /// Modes 0 and 1 are implemented; the remaining modes fall back to
    /// rendering layer 1 as 4bpp.
    fn layer_bpp(&self, layer: usize) -> u32 {
        match (self.bg_mode, layer) {
            (0, _) => 2,
            (1, 0) | (1, 1) => 4,
            (1, 2) => 2,
            (1, _) => 0,
            (_, 0) => 4,
            _ => 0,
        }
    }

    /// Expand a 15-bit BGR palette entry to RGBA, scaled by brightness
    #[inline]
    fn entry_rgba(&self, entry: u16) -> [u8; 4] {
        let expand = |c: u16| -> u8 {
            let c = (c & 0x1F) as u8;
            (c << 3) | (c >> 2)
        };
        let scale = |c: u8| -> u8 { ((c as u16 * self.brightness as u16) / 15) as u8 };
        [
            scale(expand(entry)),
            scale(expand(entry >> 5)),
            scale(expand(entry >> 10)),
            0xFF,
        ]
    }

    /// Write one pixel to the framebuffer
    #[inline]
    fn put_pixel(&mut self, x: usize, y: usize, rgba: [u8; 4]) {
        let index = (y * SCREEN_WIDTH + x) * 4;
        self.frame_buffer[index..index + 4].copy_from_slice(&rgba);
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vram_address_advances_by_the_configured_step() {
        // Increment-on-high set: full words go in via $2118/$2119 and the
        // address steps once per pair
        let mut ppu = Ppu::new();
        for (mode, step) in [(0x80u8, 1u16), (0x81, 32), (0x82, 128), (0x83, 128)] {
            ppu.write_register(0x2115, mode);
            ppu.write_register(0x2116, 0x00);
            ppu.write_register(0x2117, 0x10);
            ppu.write_register(0x2118, 0xCD);
            // The low-byte write does not step in this mode
            assert_eq!(ppu.vram_addr, 0x1000);
            ppu.write_register(0x2119, 0xAB);
            assert_eq!(ppu.vram_addr, 0x1000u16.wrapping_add(step));
            assert_eq!(ppu.vram[0x1000], 0xABCD);
        }
    }

    #[test]
    fn vram_low_byte_write_steps_when_increment_on_high_is_clear() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2115, 0x00); // step 1, increment on low
        ppu.write_register(0x2116, 0x00);
        ppu.write_register(0x2117, 0x10);
        ppu.write_register(0x2118, 0xCD);
        assert_eq!(ppu.vram_addr, 0x1001);
        ppu.write_register(0x2118, 0xEF);
        // Each low write stepped, so the bytes land on consecutive words
        assert_eq!(ppu.vram[0x1000] & 0x00FF, 0x00CD);
        assert_eq!(ppu.vram[0x1001] & 0x00FF, 0x00EF);
        assert_eq!(ppu.vram_addr, 0x1002);
    }

    #[test]
    fn vram_address_wraps_modulo_64k() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2115, 0x02); // step 128
        ppu.write_register(0x2116, 0xFF);
        ppu.write_register(0x2117, 0xFF);
        ppu.write_register(0x2118, 0x11);
        assert_eq!(ppu.vram_addr, 0xFFFFu16.wrapping_add(128));
    }

    #[test]
    fn palette_latch_commits_fifteen_bits_and_advances() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2121, 0x10);
        ppu.write_register(0x2122, 0x34);
        // First byte only latches
        assert_eq!(ppu.cgram[0x10], 0);
        ppu.write_register(0x2122, 0xFF);
        assert_eq!(ppu.cgram[0x10], 0x7F34);
        assert_eq!(ppu.cgram_addr, 0x11);
    }

    #[test]
    fn palette_reads_return_the_written_bits() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2121, 0x20);
        ppu.write_register(0x2122, 0x9A);
        ppu.write_register(0x2122, 0x3C);

        ppu.write_register(0x2121, 0x20);
        let low = ppu.read_register(0x213B);
        let high = ppu.read_register(0x213B);
        assert_eq!(low, 0x9A);
        assert_eq!(high, 0x3C);
        assert_eq!(ppu.cgram_addr, 0x21);
    }

    #[test]
    fn cgram_address_write_resets_the_latch_phase() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2122, 0x11); // low byte latched
        ppu.write_register(0x2121, 0x05); // phase reset
        ppu.write_register(0x2122, 0x22);
        ppu.write_register(0x2122, 0x01);
        assert_eq!(ppu.cgram[0x05], 0x0122);
    }

    #[test]
    fn oam_writes_auto_increment_and_wrap() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2102, 0x00);
        ppu.write_register(0x2103, 0x00);
        ppu.write_register(0x2104, 0xAA);
        ppu.write_register(0x2104, 0xBB);
        assert_eq!(&ppu.oam[0..2], &[0xAA, 0xBB]);
        assert_eq!(ppu.oam_addr, 2);
    }

    #[test]
    fn forced_blank_renders_black() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2100, 0x8F);
        ppu.render_frame();
        assert!(ppu
            .frame_buffer()
            .chunks_exact(4)
            .all(|p| p == &[0, 0, 0, 0xFF]));
    }
}
