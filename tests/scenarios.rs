//! End-to-end scenarios driven through the public facade: cartridge loading,
//! register side effects from executed programs, and DMA.

mod common;

use common::{build_lorom, build_lorom_with, Asm};
use rusty_snes::cartridge::LoadError;
use rusty_snes::memory::SystemBus;
use rusty_snes::{Mapping, Snes};

#[test]
fn undersized_image_surfaces_a_load_error() {
    let mut snes = Snes::new();
    let err = snes.load_cartridge(&vec![0u8; 0x4000]).unwrap_err();
    assert!(matches!(err, LoadError::TooSmall(_)));
}

#[test]
fn headerless_image_surfaces_a_load_error() {
    let mut snes = Snes::new();
    let err = snes.load_cartridge(&vec![0u8; 0x8000]).unwrap_err();
    assert!(matches!(err, LoadError::UnreadableHeader));
}

#[test]
fn valid_lorom_image_loads_and_classifies() {
    let rom = build_lorom(&Asm::new().stp().build());
    let mut snes = Snes::new();
    snes.load_cartridge(&rom).unwrap();

    let cartridge = snes.memory_bus.cartridge().unwrap();
    assert_eq!(cartridge.mapping(), Mapping::LoRom);
    assert_eq!(cartridge.title(), "TEST");
    assert!(cartridge.checksum_ok());
}

#[test]
fn work_ram_is_mirrored_into_the_low_banks() {
    let rom = build_lorom(&Asm::new().stp().build());
    let mut snes = Snes::new();
    snes.load_cartridge(&rom).unwrap();

    let mut bus = SystemBus {
        mem: &mut snes.memory_bus,
        ppu: &mut snes.ppu,
        apu: &mut snes.apu,
        joy1: &mut snes.controller1,
        joy2: &mut snes.controller2,
    };
    bus.write(0x7E0010, 0xAB);
    assert_eq!(bus.read(0x000010), 0xAB);
}

#[test]
fn display_register_write_sets_brightness() {
    // LDA #$42 / STA $2100: brightness 2, forced blank off
    let program = Asm::new().poke(0x2100, 0x42).stp().build();
    let mut snes = Snes::new();
    snes.load_cartridge(&build_lorom(&program)).unwrap();
    snes.run_frame();

    assert_eq!(snes.ppu.brightness, 2);
    assert!(!snes.ppu.forced_blank);
}

#[test]
fn narrow_store_after_width_switch_writes_one_byte() {
    // CLC XCE REP #$20 LDA #$1234 SEP #$20 STA $10
    let program = Asm::new()
        .raw(&[0x18, 0xFB, 0xC2, 0x20, 0xA9, 0x34, 0x12, 0xE2, 0x20, 0x85, 0x10])
        .stp()
        .build();
    let mut snes = Snes::new();
    snes.load_cartridge(&build_lorom(&program)).unwrap();
    snes.run_frame();

    assert_eq!(snes.memory_bus.wram()[0x10], 0x34);
    assert_eq!(snes.memory_bus.wram()[0x11], 0x00);
}

#[test]
fn vram_port_write_lands_and_increments() {
    // $2115=0 (step 1, increment on low), address $1000, write low byte
    let program = Asm::new()
        .poke(0x2115, 0x00)
        .poke(0x2116, 0x00)
        .poke(0x2117, 0x10)
        .poke(0x2118, 0xCD)
        .stp()
        .build();
    let mut snes = Snes::new();
    snes.load_cartridge(&build_lorom(&program)).unwrap();
    snes.run_frame();

    assert_eq!(snes.ppu.vram[0x1000] & 0x00FF, 0x00CD);
    assert_eq!(snes.ppu.vram_addr, 0x1001);
}

#[test]
fn dma_to_the_palette_port_commits_entries() {
    // Channel 0: A->B, mode 0, 32 bytes from $00:9000 into $2122
    let program = Asm::new()
        .poke(0x2121, 0x00)
        .poke(0x4300, 0x00)
        .poke(0x4302, 0x22)
        .poke(0x4303, 0x00)
        .poke(0x4304, 0x90)
        .poke(0x4305, 0x00)
        .poke(0x4308, 0x20)
        .poke(0x4309, 0x00)
        .poke(0x420B, 0x01)
        .stp()
        .build();
    // $00:9000 maps to file offset 0x1000
    let rom = build_lorom_with(&program, |rom| {
        for i in 0..32 {
            rom[0x1000 + i] = (i as u8) * 5;
        }
    });
    let mut snes = Snes::new();
    snes.load_cartridge(&rom).unwrap();
    snes.run_frame();

    for i in 0..16usize {
        let low = (i as u16 * 10) & 0xFF;
        let high = ((i as u16 * 10 + 5) & 0x7F) as u16;
        assert_eq!(snes.ppu.cgram[i], (high << 8) | low, "palette entry {}", i);
    }
    assert_eq!(snes.ppu.cgram_addr, 16);
}

#[test]
fn vblank_nmi_runs_the_handler_once_per_frame() {
    // Handler at $8100 increments $21; main loop spins on $20
    let program = Asm::new()
        .poke(0x4200, 0x80)
        .idle_loop()
        .build();
    let rom = build_lorom_with(&program, |rom| {
        // Handler: INC $21 / RTI
        rom[0x0100..0x0103].copy_from_slice(&[0xE6, 0x21, 0x40]);
        // Emulation-mode NMI vector -> $8100
        rom[0x7FFA] = 0x00;
        rom[0x7FFB] = 0x81;
    });
    let mut snes = Snes::new();
    snes.load_cartridge(&rom).unwrap();

    for _ in 0..3 {
        snes.run_frame();
    }
    assert_eq!(snes.memory_bus.wram()[0x21], 3);
}

#[test]
fn controller_bits_shift_out_over_the_serial_port() {
    use rusty_snes::Button;

    // Strobe, then read the first serial bit (B) into $30
    let program = Asm::new()
        .poke(0x4016, 0x01)
        .poke(0x4016, 0x00)
        .raw(&[0xAD, 0x16, 0x40]) // LDA $4016
        .raw(&[0x85, 0x30]) // STA $30
        .stp()
        .build();
    let mut snes = Snes::new();
    snes.load_cartridge(&build_lorom(&program)).unwrap();
    snes.set_button(Button::B, true);
    snes.run_frame();

    assert_eq!(snes.memory_bus.wram()[0x30] & 0x01, 0x01);
}

#[test]
fn audio_fill_produces_silence() {
    let mut snes = Snes::new();
    snes.load_cartridge(&build_lorom(&Asm::new().stp().build()))
        .unwrap();
    let mut left = [0.5f32; 128];
    let mut right = [0.5f32; 128];
    snes.fill_audio(&mut left, &mut right);
    assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
}
