//! SNES cartridge implementation
//!
//! This module handles raw SNES ROM images: stripping the optional 512-byte
//! copier header, locating and scoring the internal cartridge header at the
//! LoROM (0x7FB0) and HiROM (0xFFB0) candidate offsets, classifying the
//! address mapping, and serving byte fetches by mapped offset.
//!
//! The image format carries no magic number, so mapping detection is a
//! heuristic: both candidate headers are scored on map-byte plausibility,
//! ROM-type plausibility, the checksum/complement invariant and printable
//! title bytes. The higher score wins; ties favor LoROM.

use std::fmt;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::combine_bytes;

/// Size of the copier (SMC) header some dumps carry in front of the image
const COPIER_HEADER_SIZE: usize = 512;

/// Smallest plausible ROM image (one LoROM bank half)
const MIN_ROM_SIZE: usize = 0x8000;

/// Internal header base for LoROM images
const LOROM_HEADER_BASE: usize = 0x7FB0;

/// Internal header base for HiROM images
const HIROM_HEADER_BASE: usize = 0xFFB0;

/// Length of the cartridge title field
const TITLE_LEN: usize = 21;

/// Header field offsets, relative to the header base
const OFF_TITLE: usize = 0x00;
const OFF_ROM_TYPE: usize = 0x25;
const OFF_MAP_MODE: usize = 0x26;
const OFF_ROM_SIZE: usize = 0x27;
const OFF_SRAM_SIZE: usize = 0x28;
const OFF_CHECKSUM: usize = 0x2C;
const OFF_COMPLEMENT: usize = 0x2E;

/// Total header length we need to inspect
const HEADER_LEN: usize = 0x30;

/// Save RAM is capped at 512 KiB regardless of the header code
const MAX_SRAM_SIZE: usize = 0x80000;

/// Errors that can occur when loading a ROM image
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("ROM image too small: {0} bytes (minimum 0x8000)")]
    TooSmall(usize),

    #[error("no plausible cartridge header at either mapping offset")]
    UnreadableHeader,
}

/// Cartridge address-mapping schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum Mapping {
    /// 32 KiB half-banks mapped at 0x8000..0xFFFF of each bank ("LoROM")
    LoRom,

    /// Full 64 KiB banks mapped at 0xC0..0xFF ("HiROM")
    HiRom,
}

/// Represents a loaded SNES cartridge
///
/// Immutable after construction; save RAM lives on the memory bus, not here.
pub struct Cartridge {
    /// Raw image with any copier header stripped
    rom: Vec<u8>,

    /// Detected address mapping
    mapping: Mapping,

    /// Title from the header, trimmed of padding
    title: String,

    /// ROM size declared by the header (bytes); the image length rules
    rom_size: usize,

    /// Save RAM size declared by the header (bytes, 0 = none)
    sram_size: usize,

    /// Checksum stored in the header
    checksum: u16,

    /// Whether the stored checksum matched the computed byte sum
    checksum_ok: bool,
}

impl Cartridge {
    /// Create a cartridge from a raw ROM image
    pub fn from_bytes(data: &[u8]) -> Result<Self, LoadError> {
        // Strip the copier header if present
        let rom: Vec<u8> = if data.len() % 1024 == COPIER_HEADER_SIZE {
            data[COPIER_HEADER_SIZE..].to_vec()
        } else {
            data.to_vec()
        };

        if rom.len() < MIN_ROM_SIZE {
            return Err(LoadError::TooSmall(rom.len()));
        }

        let lo_score = score_header(&rom, LOROM_HEADER_BASE, Mapping::LoRom);
        let hi_score = score_header(&rom, HIROM_HEADER_BASE, Mapping::HiRom);

        // Ties favor LoROM
        let (mapping, base, score) = if hi_score > lo_score {
            (Mapping::HiRom, HIROM_HEADER_BASE, hi_score)
        } else {
            (Mapping::LoRom, LOROM_HEADER_BASE, lo_score)
        };

        if score <= 0 {
            return Err(LoadError::UnreadableHeader);
        }

        let header = &rom[base..base + HEADER_LEN];

        let title = header[OFF_TITLE..OFF_TITLE + TITLE_LEN]
            .iter()
            .map(|&b| b as char)
            .collect::<String>()
            .trim_end_matches(|c| c == ' ' || c == '\0')
            .to_string();

        let rom_size_code = header[OFF_ROM_SIZE];
        let rom_size = if rom_size_code <= 0x0F {
            1024usize << rom_size_code
        } else {
            rom.len()
        };

        let sram_code = header[OFF_SRAM_SIZE];
        let sram_size = if sram_code == 0 {
            0
        } else {
            (1024usize << sram_code.min(0x0F)).min(MAX_SRAM_SIZE)
        };

        let checksum = combine_bytes(header[OFF_CHECKSUM], header[OFF_CHECKSUM + 1]);
        let complement = combine_bytes(header[OFF_COMPLEMENT], header[OFF_COMPLEMENT + 1]);
        let computed = compute_checksum(&rom, base);
        let checksum_ok = checksum.wrapping_add(complement) == 0xFFFF && checksum == computed;
        if !checksum_ok {
            warn!(
                "cartridge checksum mismatch: stored ${:04X}/${:04X}, computed ${:04X}",
                checksum, complement, computed
            );
        }

        info!(
            "Loaded cartridge - Title: {:?}, Mapping: {:?}, ROM: {}KB, SRAM: {}KB, Checksum: {}",
            title,
            mapping,
            rom.len() / 1024,
            sram_size / 1024,
            if checksum_ok { "ok" } else { "BAD" }
        );

        Ok(Cartridge {
            rom,
            mapping,
            title,
            rom_size,
            sram_size,
            checksum,
            checksum_ok,
        })
    }

    /// Read a byte by mapped ROM offset (wraps at the image size)
    #[inline]
    pub fn read(&self, offset: u32) -> u8 {
        self.rom[offset as usize % self.rom.len()]
    }

    /// The detected address mapping
    pub fn mapping(&self) -> Mapping {
        self.mapping
    }

    /// The cartridge title from the header
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Image length in bytes
    pub fn len(&self) -> usize {
        self.rom.len()
    }

    /// Whether the image is empty (never true for a loaded cartridge)
    pub fn is_empty(&self) -> bool {
        self.rom.is_empty()
    }

    /// ROM size declared by the header
    pub fn declared_rom_size(&self) -> usize {
        self.rom_size
    }

    /// Save RAM size declared by the header (0 = no save RAM)
    pub fn sram_size(&self) -> usize {
        self.sram_size
    }

    /// Whether battery-backed save RAM is present
    pub fn has_save_ram(&self) -> bool {
        self.sram_size > 0
    }

    /// Header checksum
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Whether the header checksum matched the computed byte sum
    pub fn checksum_ok(&self) -> bool {
        self.checksum_ok
    }

    /// A cheap identity for save-state compatibility checks
    pub fn fingerprint(&self) -> (u32, u16) {
        (self.rom.len() as u32, self.checksum)
    }
}

impl fmt::Debug for Cartridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cartridge")
            .field("title", &self.title)
            .field("mapping", &self.mapping)
            .field("rom_len", &self.rom.len())
            .field("sram_size", &self.sram_size)
            .field("checksum_ok", &self.checksum_ok)
            .finish()
    }
}

/// Score a header candidate at `base`. Negative means "not even addressable";
/// zero means "nothing plausible here".
fn score_header(rom: &[u8], base: usize, expected: Mapping) -> i32 {
    if base + HEADER_LEN > rom.len() {
        return -1;
    }
    let header = &rom[base..base + HEADER_LEN];
    let mut score = 0;

    // Map byte: nominal values are 0x20 (LoROM) / 0x21 (HiROM), with bit 4
    // set on FastROM variants. Matching the candidate offset counts double;
    // an implausible byte argues strongly against a header living here.
    let map = header[OFF_MAP_MODE];
    let map_mapping = match map {
        0x20 | 0x30 => Some(Mapping::LoRom),
        0x21 | 0x31 => Some(Mapping::HiRom),
        _ => None,
    };
    match map_mapping {
        Some(m) if m == expected => score += 3,
        Some(_) => score += 1,
        None => score -= 4,
    }

    // ROM type byte: the common chipset codes are small
    if header[OFF_ROM_TYPE] <= 0x05 {
        score += 1;
    } else {
        score -= 1;
    }

    // Checksum and complement must sum to 0xFFFF
    let checksum = combine_bytes(header[OFF_CHECKSUM], header[OFF_CHECKSUM + 1]);
    let complement = combine_bytes(header[OFF_COMPLEMENT], header[OFF_COMPLEMENT + 1]);
    if checksum.wrapping_add(complement) == 0xFFFF {
        score += 4;
    } else {
        score -= 1;
    }

    // Title must be printable and actually contain something
    let title = &header[OFF_TITLE..OFF_TITLE + TITLE_LEN];
    if title.iter().all(|&b| (0x20..0x7F).contains(&b) || b == 0)
        && title.iter().any(|&b| b > 0x20)
    {
        score += 2;
    } else {
        score -= 1;
    }

    score
}

/// 16-bit sum of every ROM byte except the 4-byte checksum/complement region
fn compute_checksum(rom: &[u8], header_base: usize) -> u16 {
    let skip = header_base + OFF_CHECKSUM..header_base + OFF_CHECKSUM + 4;
    let mut sum: u16 = 0;
    for (i, &b) in rom.iter().enumerate() {
        if !skip.contains(&i) {
            sum = sum.wrapping_add(b as u16);
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a 64 KiB LoROM image with a valid header and checksum
    fn build_lorom(title: &str) -> Vec<u8> {
        let mut rom = vec![0u8; 0x10000];
        write_header(&mut rom, LOROM_HEADER_BASE, title, 0x20, 0x06);
        rom
    }

    fn write_header(rom: &mut [u8], base: usize, title: &str, map: u8, size_code: u8) {
        for (i, slot) in rom[base..base + TITLE_LEN].iter_mut().enumerate() {
            *slot = *title.as_bytes().get(i).unwrap_or(&b' ');
        }
        rom[base + OFF_ROM_TYPE] = 0x00;
        rom[base + OFF_MAP_MODE] = map;
        rom[base + OFF_ROM_SIZE] = size_code;
        rom[base + OFF_SRAM_SIZE] = 0x00;
        let sum = compute_checksum(rom, base);
        let complement = 0xFFFFu16.wrapping_sub(sum);
        rom[base + OFF_CHECKSUM..base + OFF_CHECKSUM + 2].copy_from_slice(&sum.to_le_bytes());
        rom[base + OFF_COMPLEMENT..base + OFF_COMPLEMENT + 2]
            .copy_from_slice(&complement.to_le_bytes());
    }

    #[test]
    fn undersized_image_is_rejected() {
        let err = Cartridge::from_bytes(&vec![0u8; 0x4000]).unwrap_err();
        assert!(matches!(err, LoadError::TooSmall(0x4000)));
    }

    #[test]
    fn headerless_image_is_rejected() {
        let err = Cartridge::from_bytes(&vec![0u8; MIN_ROM_SIZE]).unwrap_err();
        assert!(matches!(err, LoadError::UnreadableHeader));
    }

    #[test]
    fn lorom_header_is_detected() {
        let rom = build_lorom("TEST");
        let cart = Cartridge::from_bytes(&rom).unwrap();
        assert_eq!(cart.mapping(), Mapping::LoRom);
        assert_eq!(cart.title(), "TEST");
        assert_eq!(cart.declared_rom_size(), 0x10000);
        assert!(cart.checksum_ok());
        assert!(!cart.has_save_ram());
    }

    #[test]
    fn hirom_header_is_detected() {
        let mut rom = vec![0u8; 0x10000];
        write_header(&mut rom, HIROM_HEADER_BASE, "HITEST", 0x21, 0x06);
        let cart = Cartridge::from_bytes(&rom).unwrap();
        assert_eq!(cart.mapping(), Mapping::HiRom);
        assert_eq!(cart.title(), "HITEST");
    }

    #[test]
    fn copier_header_is_stripped() {
        let rom = build_lorom("COPIER");
        let mut smc = vec![0u8; COPIER_HEADER_SIZE];
        smc.extend_from_slice(&rom);
        let cart = Cartridge::from_bytes(&smc).unwrap();
        assert_eq!(cart.title(), "COPIER");
        assert_eq!(cart.len(), rom.len());
    }

    #[test]
    fn checksum_flip_is_detected() {
        let mut rom = build_lorom("SUMS");
        assert!(Cartridge::from_bytes(&rom).unwrap().checksum_ok());
        rom[LOROM_HEADER_BASE + OFF_CHECKSUM] ^= 0x01;
        let cart = Cartridge::from_bytes(&rom).unwrap();
        assert!(!cart.checksum_ok());
    }

    #[test]
    fn sram_size_is_decoded_and_clamped() {
        let mut rom = build_lorom("SRAM");
        rom[LOROM_HEADER_BASE + OFF_SRAM_SIZE] = 0x03; // 8 KiB
        let cart = Cartridge::from_bytes(&rom).unwrap();
        assert_eq!(cart.sram_size(), 0x2000);

        rom[LOROM_HEADER_BASE + OFF_SRAM_SIZE] = 0x0F;
        let cart = Cartridge::from_bytes(&rom).unwrap();
        assert_eq!(cart.sram_size(), MAX_SRAM_SIZE);
    }

    #[test]
    fn mapped_reads_wrap_at_image_size() {
        let rom = build_lorom("WRAP");
        let cart = Cartridge::from_bytes(&rom).unwrap();
        assert_eq!(cart.read(0x10000 + 0x42), cart.read(0x42));
    }
}
