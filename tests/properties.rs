//! System-level properties: frame determinism, snapshot round-trips and the
//! cooperative run loop.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::{build_lorom, Asm};
use rusty_snes::savestate::SaveStateError;
use rusty_snes::Snes;

/// A program that draws a white 2bpp tile at the top-left corner through the
/// VRAM/CGRAM ports, enables BG1 in mode 0, then spins
fn drawing_program() -> Vec<u8> {
    Asm::new()
        // Palette entry 1 = $7FFF (white)
        .poke(0x2121, 0x01)
        .poke(0x2122, 0xFF)
        .poke(0x2122, 0x7F)
        // Word-sized VRAM access, tile 1 pixel data at word $1008
        .poke(0x2115, 0x80)
        .poke(0x2116, 0x08)
        .poke(0x2117, 0x10)
        // 8 rows of plane 0 = $FF: LDX #$08; LDA #$FF STA $2118
        // LDA #$00 STA $2119 DEX BNE loop
        .raw(&[0xA2, 0x08])
        .raw(&[0xA9, 0xFF, 0x8D, 0x18, 0x21, 0xA9, 0x00, 0x8D, 0x19, 0x21, 0xCA, 0xD0, 0xF3])
        // Tilemap entry (0,0) at word $2000 -> tile 1
        .poke(0x2116, 0x00)
        .poke(0x2117, 0x20)
        .poke(0x2118, 0x01)
        .poke(0x2119, 0x00)
        // Mode 0, BG1 tilemap at $2000, characters at $1000, BG1 on main
        .poke(0x2105, 0x00)
        .poke(0x2107, 0x20)
        .poke(0x210B, 0x01)
        .poke(0x212C, 0x01)
        // Full brightness, blanking off
        .poke(0x2100, 0x0F)
        .idle_loop()
        .build()
}

fn machine_with(program: Vec<u8>) -> Snes {
    let mut snes = Snes::new();
    snes.load_cartridge(&build_lorom(&program)).unwrap();
    snes
}

#[test]
fn the_drawing_program_actually_draws() {
    let mut snes = machine_with(drawing_program());
    snes.run_frame();
    let fb = snes.frame_buffer();
    assert_eq!(&fb[0..4], &[0xFF, 0xFF, 0xFF, 0xFF], "tile pixel is white");
    // Next tile over is still background black
    assert_eq!(&fb[8 * 4..8 * 4 + 4], &[0x00, 0x00, 0x00, 0xFF]);
}

#[test]
fn frames_are_deterministic_across_runs() {
    let mut first = machine_with(drawing_program());
    let mut second = machine_with(drawing_program());
    for _ in 0..3 {
        first.run_frame();
        second.run_frame();
    }
    assert_eq!(first.frame_buffer(), second.frame_buffer());
    assert!(
        first.frame_buffer().chunks_exact(4).any(|p| p[0] != 0),
        "the comparison is not between blank frames"
    );
}

#[test]
fn snapshot_restore_is_identity() {
    let mut snes = machine_with(drawing_program());
    snes.run_frame();
    snes.run_frame();

    let snapshot = snes.snapshot().unwrap();
    snes.restore(&snapshot).unwrap();
    let again = snes.snapshot().unwrap();
    assert_eq!(snapshot, again);
}

#[test]
fn restored_state_resumes_identically() {
    let program = drawing_program();

    let mut original = machine_with(program.clone());
    original.run_frame();
    original.run_frame();
    let snapshot = original.snapshot().unwrap();
    original.run_frame();
    original.run_frame();

    let mut resumed = machine_with(program);
    resumed.restore(&snapshot).unwrap();
    resumed.run_frame();
    resumed.run_frame();

    assert_eq!(original.frame_buffer(), resumed.frame_buffer());
    assert_eq!(original.frame_count(), resumed.frame_count());
    assert_eq!(
        original.memory_bus.wram(),
        resumed.memory_bus.wram(),
        "work RAM diverged after resume"
    );
}

#[test]
fn snapshot_refuses_a_different_cartridge() {
    let mut first = machine_with(drawing_program());
    first.run_frame();
    let snapshot = first.snapshot().unwrap();

    // A different program produces a different header checksum
    let mut other = machine_with(Asm::new().poke(0x2100, 0x0F).stp().build());
    let err = other.restore(&snapshot).unwrap_err();
    assert!(matches!(err, SaveStateError::CartridgeMismatch));
}

#[test]
fn snapshot_without_a_cartridge_fails() {
    let snes = Snes::new();
    assert!(matches!(
        snes.snapshot().unwrap_err(),
        SaveStateError::NoCartridge
    ));
}

#[test]
fn corrupt_snapshots_are_rejected() {
    let mut snes = machine_with(drawing_program());
    assert!(matches!(
        snes.restore(&[0xDE, 0xAD]).unwrap_err(),
        SaveStateError::Deserialization(_)
    ));
}

#[test]
fn the_frame_sink_sees_every_frame() {
    let mut snes = machine_with(drawing_program());
    let frames = Rc::new(Cell::new(0usize));
    let seen = frames.clone();
    snes.set_frame_sink(Box::new(move |fb| {
        assert_eq!(fb.len(), 256 * 224 * 4);
        seen.set(seen.get() + 1);
    }));
    snes.run_frame();
    snes.run_frame();
    assert_eq!(frames.get(), 2);
}

#[test]
fn the_run_loop_stops_cooperatively() {
    let mut snes = machine_with(drawing_program());
    let stop = snes.stop_handle();
    let frames = Rc::new(Cell::new(0usize));
    let seen = frames.clone();
    snes.set_frame_sink(Box::new(move |_| {
        seen.set(seen.get() + 1);
        // Ask the loop to end after the first frame
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    }));
    snes.run();
    assert_eq!(frames.get(), 1);
}
