//! 65816 CPU implementation
//!
//! The 65816 is a 16-bit successor of the 6502 with a 24-bit address space.
//! It boots in an "emulation mode" that behaves like a 6502 (8-bit registers,
//! stack confined to page 1) and switches to native mode via `XCE`, where the
//! accumulator and index registers can be widened to 16 bits under control of
//! the status flags M and X.
//!
//! The core executes one instruction per [`Cpu::step`] call and returns the
//! consumed cycle count; the scheduler owns all pacing. Decoding is driven by
//! a 256-entry table mapping each opcode to an operation, an addressing mode
//! and a base cycle cost. Memory access goes through the [`CpuBus`] trait so
//! the core stays decoupled from the machine around it.
//!
//! ## Interrupts
//!
//! NMI and IRQ are polled on instruction boundaries. NMI is an edge consumed
//! from the bus; IRQ is a level gated by the I flag. Vector addresses differ
//! between native and emulation mode, and BRK/COP have their own vectors.
//!
//! ## Width discipline
//!
//! With M set, arithmetic and memory operands are 8 bits wide and the high
//! accumulator byte is preserved. With X set, the index registers hold only
//! their low bytes; narrowing truncates and the high bytes read back as zero.

use log::debug;

use crate::util::combine_bytes;

/// CPU status flag bit positions
pub mod flags {
    pub const CARRY: u8 = 0x01;
    pub const ZERO: u8 = 0x02;
    pub const IRQ_DISABLE: u8 = 0x04;
    pub const DECIMAL: u8 = 0x08;
    /// X flag: 8-bit index registers (B flag in emulation mode)
    pub const INDEX_8BIT: u8 = 0x10;
    /// M flag: 8-bit accumulator and memory
    pub const MEMORY_8BIT: u8 = 0x20;
    pub const OVERFLOW: u8 = 0x40;
    pub const NEGATIVE: u8 = 0x80;
}

/// Interrupt vector addresses (bank 0)
mod vectors {
    pub const COP_NATIVE: u32 = 0xFFE4;
    pub const BRK_NATIVE: u32 = 0xFFE6;
    pub const NMI_NATIVE: u32 = 0xFFEA;
    pub const IRQ_NATIVE: u32 = 0xFFEE;
    pub const COP_EMULATION: u32 = 0xFFF4;
    pub const NMI_EMULATION: u32 = 0xFFFA;
    pub const RESET: u32 = 0xFFFC;
    /// Shared by IRQ and BRK in emulation mode
    pub const IRQ_EMULATION: u32 = 0xFFFE;
}

/// Represents a bus that the CPU can read from and write to
///
/// Addresses are 24-bit machine addresses. Interrupt polling happens on
/// instruction boundaries: `poll_nmi` consumes a pending edge, `poll_irq`
/// reports the current level.
pub trait CpuBus {
    fn read(&mut self, addr: u32) -> u8;
    fn write(&mut self, addr: u32, value: u8);
    fn poll_nmi(&mut self) -> bool;
    fn poll_irq(&mut self) -> bool;
}

/// Enumeration of the 65816 addressing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    Direct,
    DirectX,
    DirectY,
    /// (dp)
    DirectIndirect,
    /// [dp]
    DirectIndirectLong,
    /// (dp,X)
    DirectIndexedIndirect,
    /// (dp),Y
    DirectIndirectIndexed,
    /// [dp],Y
    DirectIndirectLongIndexed,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    AbsoluteLong,
    AbsoluteLongX,
    /// (abs), used by JMP
    AbsoluteIndirect,
    /// [abs], used by JML
    AbsoluteIndirectLong,
    /// (abs,X), used by JMP and JSR
    AbsoluteIndexedIndirect,
    /// sr,S
    StackRelative,
    /// (sr,S),Y
    StackRelativeIndirectIndexed,
    Relative,
    RelativeLong,
    BlockMove,
    Stack,
}

/// Enumeration of the 65816 operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Adc, And, Asl, AslA, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Bra, Brk, Brl,
    Bvc, Bvs, Clc, Cld, Cli, Clv, Cmp, Cop, Cpx, Cpy, Dec, DecA, Dex, Dey,
    Eor, Inc, IncA, Inx, Iny, Jml, Jmp, Jsl, Jsr, Lda, Ldx, Ldy, Lsr, LsrA,
    Mvn, Mvp, Nop, Ora, Pea, Pei, Per, Pha, Phb, Phd, Phk, Php, Phx, Phy,
    Pla, Plb, Pld, Plp, Plx, Ply, Rep, Rol, RolA, Ror, RorA, Rti, Rtl, Rts,
    Sbc, Sec, Sed, Sei, Sep, Sta, Stp, Stx, Sty, Stz, Tax, Tay, Tcd, Tcs,
    Tdc, Trb, Tsb, Tsc, Tsx, Txa, Txs, Txy, Tya, Tyx, Wai, Wdm, Xba, Xce,
}

use AddressingMode as M;
use Operation as O;

/// The 256-entry dispatch table: operation, addressing mode, base cycles.
///
/// Every opcode of the 65816 family is present; cycle counts are the
/// datasheet base values without the width/page-cross adjustments.
#[rustfmt::skip]
const OPCODES: [(Operation, AddressingMode, u32); 256] = [
    // 0x00
    (O::Brk, M::Stack, 7),                 (O::Ora, M::DirectIndexedIndirect, 6),
    (O::Cop, M::Stack, 7),                 (O::Ora, M::StackRelative, 4),
    (O::Tsb, M::Direct, 5),                (O::Ora, M::Direct, 3),
    (O::Asl, M::Direct, 5),                (O::Ora, M::DirectIndirectLong, 6),
    (O::Php, M::Stack, 3),                 (O::Ora, M::Immediate, 2),
    (O::AslA, M::Accumulator, 2),          (O::Phd, M::Stack, 4),
    (O::Tsb, M::Absolute, 6),              (O::Ora, M::Absolute, 4),
    (O::Asl, M::Absolute, 6),              (O::Ora, M::AbsoluteLong, 5),
    // 0x10
    (O::Bpl, M::Relative, 2),              (O::Ora, M::DirectIndirectIndexed, 5),
    (O::Ora, M::DirectIndirect, 5),        (O::Ora, M::StackRelativeIndirectIndexed, 7),
    (O::Trb, M::Direct, 5),                (O::Ora, M::DirectX, 4),
    (O::Asl, M::DirectX, 6),               (O::Ora, M::DirectIndirectLongIndexed, 6),
    (O::Clc, M::Implied, 2),               (O::Ora, M::AbsoluteY, 4),
    (O::IncA, M::Accumulator, 2),          (O::Tcs, M::Implied, 2),
    (O::Trb, M::Absolute, 6),              (O::Ora, M::AbsoluteX, 4),
    (O::Asl, M::AbsoluteX, 7),             (O::Ora, M::AbsoluteLongX, 5),
    // 0x20
    (O::Jsr, M::Absolute, 6),              (O::And, M::DirectIndexedIndirect, 6),
    (O::Jsl, M::AbsoluteLong, 8),          (O::And, M::StackRelative, 4),
    (O::Bit, M::Direct, 3),                (O::And, M::Direct, 3),
    (O::Rol, M::Direct, 5),                (O::And, M::DirectIndirectLong, 6),
    (O::Plp, M::Stack, 4),                 (O::And, M::Immediate, 2),
    (O::RolA, M::Accumulator, 2),          (O::Pld, M::Stack, 5),
    (O::Bit, M::Absolute, 4),              (O::And, M::Absolute, 4),
    (O::Rol, M::Absolute, 6),              (O::And, M::AbsoluteLong, 5),
    // 0x30
    (O::Bmi, M::Relative, 2),              (O::And, M::DirectIndirectIndexed, 5),
    (O::And, M::DirectIndirect, 5),        (O::And, M::StackRelativeIndirectIndexed, 7),
    (O::Bit, M::DirectX, 4),               (O::And, M::DirectX, 4),
    (O::Rol, M::DirectX, 6),               (O::And, M::DirectIndirectLongIndexed, 6),
    (O::Sec, M::Implied, 2),               (O::And, M::AbsoluteY, 4),
    (O::DecA, M::Accumulator, 2),          (O::Tsc, M::Implied, 2),
    (O::Bit, M::AbsoluteX, 4),             (O::And, M::AbsoluteX, 4),
    (O::Rol, M::AbsoluteX, 7),             (O::And, M::AbsoluteLongX, 5),
    // 0x40
    (O::Rti, M::Stack, 6),                 (O::Eor, M::DirectIndexedIndirect, 6),
    (O::Wdm, M::Immediate, 2),             (O::Eor, M::StackRelative, 4),
    (O::Mvp, M::BlockMove, 7),             (O::Eor, M::Direct, 3),
    (O::Lsr, M::Direct, 5),                (O::Eor, M::DirectIndirectLong, 6),
    (O::Pha, M::Stack, 3),                 (O::Eor, M::Immediate, 2),
    (O::LsrA, M::Accumulator, 2),          (O::Phk, M::Stack, 3),
    (O::Jmp, M::Absolute, 3),              (O::Eor, M::Absolute, 4),
    (O::Lsr, M::Absolute, 6),              (O::Eor, M::AbsoluteLong, 5),
    // 0x50
    (O::Bvc, M::Relative, 2),              (O::Eor, M::DirectIndirectIndexed, 5),
    (O::Eor, M::DirectIndirect, 5),        (O::Eor, M::StackRelativeIndirectIndexed, 7),
    (O::Mvn, M::BlockMove, 7),             (O::Eor, M::DirectX, 4),
    (O::Lsr, M::DirectX, 6),               (O::Eor, M::DirectIndirectLongIndexed, 6),
    (O::Cli, M::Implied, 2),               (O::Eor, M::AbsoluteY, 4),
    (O::Phy, M::Stack, 3),                 (O::Tcd, M::Implied, 2),
    (O::Jml, M::AbsoluteLong, 4),          (O::Eor, M::AbsoluteX, 4),
    (O::Lsr, M::AbsoluteX, 7),             (O::Eor, M::AbsoluteLongX, 5),
    // 0x60
    (O::Rts, M::Stack, 6),                 (O::Adc, M::DirectIndexedIndirect, 6),
    (O::Per, M::RelativeLong, 6),          (O::Adc, M::StackRelative, 4),
    (O::Stz, M::Direct, 3),                (O::Adc, M::Direct, 3),
    (O::Ror, M::Direct, 5),                (O::Adc, M::DirectIndirectLong, 6),
    (O::Pla, M::Stack, 4),                 (O::Adc, M::Immediate, 2),
    (O::RorA, M::Accumulator, 2),          (O::Rtl, M::Stack, 6),
    (O::Jmp, M::AbsoluteIndirect, 5),      (O::Adc, M::Absolute, 4),
    (O::Ror, M::Absolute, 6),              (O::Adc, M::AbsoluteLong, 5),
    // 0x70
    (O::Bvs, M::Relative, 2),              (O::Adc, M::DirectIndirectIndexed, 5),
    (O::Adc, M::DirectIndirect, 5),        (O::Adc, M::StackRelativeIndirectIndexed, 7),
    (O::Stz, M::DirectX, 4),               (O::Adc, M::DirectX, 4),
    (O::Ror, M::DirectX, 6),               (O::Adc, M::DirectIndirectLongIndexed, 6),
    (O::Sei, M::Implied, 2),               (O::Adc, M::AbsoluteY, 4),
    (O::Ply, M::Stack, 4),                 (O::Tdc, M::Implied, 2),
    (O::Jmp, M::AbsoluteIndexedIndirect, 6), (O::Adc, M::AbsoluteX, 4),
    (O::Ror, M::AbsoluteX, 7),             (O::Adc, M::AbsoluteLongX, 5),
    // 0x80
    (O::Bra, M::Relative, 3),              (O::Sta, M::DirectIndexedIndirect, 6),
    (O::Brl, M::RelativeLong, 4),          (O::Sta, M::StackRelative, 4),
    (O::Sty, M::Direct, 3),                (O::Sta, M::Direct, 3),
    (O::Stx, M::Direct, 3),                (O::Sta, M::DirectIndirectLong, 6),
    (O::Dey, M::Implied, 2),               (O::Bit, M::Immediate, 2),
    (O::Txa, M::Implied, 2),               (O::Phb, M::Stack, 3),
    (O::Sty, M::Absolute, 4),              (O::Sta, M::Absolute, 4),
    (O::Stx, M::Absolute, 4),              (O::Sta, M::AbsoluteLong, 5),
    // 0x90
    (O::Bcc, M::Relative, 2),              (O::Sta, M::DirectIndirectIndexed, 6),
    (O::Sta, M::DirectIndirect, 5),        (O::Sta, M::StackRelativeIndirectIndexed, 7),
    (O::Sty, M::DirectX, 4),               (O::Sta, M::DirectX, 4),
    (O::Stx, M::DirectY, 4),               (O::Sta, M::DirectIndirectLongIndexed, 6),
    (O::Tya, M::Implied, 2),               (O::Sta, M::AbsoluteY, 5),
    (O::Txs, M::Implied, 2),               (O::Txy, M::Implied, 2),
    (O::Stz, M::Absolute, 4),              (O::Sta, M::AbsoluteX, 5),
    (O::Stz, M::AbsoluteX, 5),             (O::Sta, M::AbsoluteLongX, 5),
    // 0xA0
    (O::Ldy, M::Immediate, 2),             (O::Lda, M::DirectIndexedIndirect, 6),
    (O::Ldx, M::Immediate, 2),             (O::Lda, M::StackRelative, 4),
    (O::Ldy, M::Direct, 3),                (O::Lda, M::Direct, 3),
    (O::Ldx, M::Direct, 3),                (O::Lda, M::DirectIndirectLong, 6),
    (O::Tay, M::Implied, 2),               (O::Lda, M::Immediate, 2),
    (O::Tax, M::Implied, 2),               (O::Plb, M::Stack, 4),
    (O::Ldy, M::Absolute, 4),              (O::Lda, M::Absolute, 4),
    (O::Ldx, M::Absolute, 4),              (O::Lda, M::AbsoluteLong, 5),
    // 0xB0
    (O::Bcs, M::Relative, 2),              (O::Lda, M::DirectIndirectIndexed, 5),
    (O::Lda, M::DirectIndirect, 5),        (O::Lda, M::StackRelativeIndirectIndexed, 7),
    (O::Ldy, M::DirectX, 4),               (O::Lda, M::DirectX, 4),
    (O::Ldx, M::DirectY, 4),               (O::Lda, M::DirectIndirectLongIndexed, 6),
    (O::Clv, M::Implied, 2),               (O::Lda, M::AbsoluteY, 4),
    (O::Tsx, M::Implied, 2),               (O::Tyx, M::Implied, 2),
    (O::Ldy, M::AbsoluteX, 4),             (O::Lda, M::AbsoluteX, 4),
    (O::Ldx, M::AbsoluteY, 4),             (O::Lda, M::AbsoluteLongX, 5),
    // 0xC0
    (O::Cpy, M::Immediate, 2),             (O::Cmp, M::DirectIndexedIndirect, 6),
    (O::Rep, M::Immediate, 3),             (O::Cmp, M::StackRelative, 4),
    (O::Cpy, M::Direct, 3),                (O::Cmp, M::Direct, 3),
    (O::Dec, M::Direct, 5),                (O::Cmp, M::DirectIndirectLong, 6),
    (O::Iny, M::Implied, 2),               (O::Cmp, M::Immediate, 2),
    (O::Dex, M::Implied, 2),               (O::Wai, M::Implied, 3),
    (O::Cpy, M::Absolute, 4),              (O::Cmp, M::Absolute, 4),
    (O::Dec, M::Absolute, 6),              (O::Cmp, M::AbsoluteLong, 5),
    // 0xD0
    (O::Bne, M::Relative, 2),              (O::Cmp, M::DirectIndirectIndexed, 5),
    (O::Cmp, M::DirectIndirect, 5),        (O::Cmp, M::StackRelativeIndirectIndexed, 7),
    (O::Pei, M::Stack, 6),                 (O::Cmp, M::DirectX, 4),
    (O::Dec, M::DirectX, 6),               (O::Cmp, M::DirectIndirectLongIndexed, 6),
    (O::Cld, M::Implied, 2),               (O::Cmp, M::AbsoluteY, 4),
    (O::Phx, M::Stack, 3),                 (O::Stp, M::Implied, 3),
    (O::Jml, M::AbsoluteIndirectLong, 6),  (O::Cmp, M::AbsoluteX, 4),
    (O::Dec, M::AbsoluteX, 7),             (O::Cmp, M::AbsoluteLongX, 5),
    // 0xE0
    (O::Cpx, M::Immediate, 2),             (O::Sbc, M::DirectIndexedIndirect, 6),
    (O::Sep, M::Immediate, 3),             (O::Sbc, M::StackRelative, 4),
    (O::Cpx, M::Direct, 3),                (O::Sbc, M::Direct, 3),
    (O::Inc, M::Direct, 5),                (O::Sbc, M::DirectIndirectLong, 6),
    (O::Inx, M::Implied, 2),               (O::Sbc, M::Immediate, 2),
    (O::Nop, M::Implied, 2),               (O::Xba, M::Implied, 3),
    (O::Cpx, M::Absolute, 4),              (O::Sbc, M::Absolute, 4),
    (O::Inc, M::Absolute, 6),              (O::Sbc, M::AbsoluteLong, 5),
    // 0xF0
    (O::Beq, M::Relative, 2),              (O::Sbc, M::DirectIndirectIndexed, 5),
    (O::Sbc, M::DirectIndirect, 5),        (O::Sbc, M::StackRelativeIndirectIndexed, 7),
    (O::Pea, M::Stack, 5),                 (O::Sbc, M::DirectX, 4),
    (O::Inc, M::DirectX, 6),               (O::Sbc, M::DirectIndirectLongIndexed, 6),
    (O::Sed, M::Implied, 2),               (O::Sbc, M::AbsoluteY, 4),
    (O::Plx, M::Stack, 4),                 (O::Xce, M::Implied, 2),
    (O::Jsr, M::AbsoluteIndexedIndirect, 8), (O::Sbc, M::AbsoluteX, 4),
    (O::Inc, M::AbsoluteX, 7),             (O::Sbc, M::AbsoluteLongX, 5),
];

/// Interrupt sources with distinct vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Nmi,
    Irq,
    Brk,
    Cop,
}

/// Structure representing the state of the 65816 CPU
pub struct Cpu {
    /// Accumulator (the high byte is preserved in 8-bit mode)
    pub a: u16,
    /// X index register
    pub x: u16,
    /// Y index register
    pub y: u16,
    /// Stack pointer
    pub sp: u16,
    /// Program counter
    pub pc: u16,
    /// Program bank
    pub pbr: u8,
    /// Data bank
    pub dbr: u8,
    /// Direct page base
    pub d: u16,
    /// Status register
    pub p: u8,
    /// 6502 emulation mode
    pub emulation: bool,

    /// Total number of CPU cycles executed
    pub cycles: u64,

    /// Stopped by STP until the next reset
    pub stopped: bool,

    /// Waiting for an interrupt (WAI)
    pub waiting: bool,

    /// Opcodes that fell through decode (diagnostic; the table is complete)
    pub decode_misses: u64,
}

impl Cpu {
    /// Create a new CPU. `reset` must run before stepping.
    pub fn new() -> Self {
        Cpu {
            a: 0,
            x: 0,
            y: 0,
            sp: 0x01FF,
            pc: 0,
            pbr: 0,
            dbr: 0,
            d: 0,
            p: flags::MEMORY_8BIT | flags::INDEX_8BIT | flags::IRQ_DISABLE,
            emulation: true,
            cycles: 0,
            stopped: false,
            waiting: false,
            decode_misses: 0,
        }
    }

    /// Reset the CPU and load the program counter from the reset vector
    pub fn reset(&mut self, bus: &mut impl CpuBus) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0x01FF;
        self.pbr = 0;
        self.dbr = 0;
        self.d = 0;
        self.p = flags::MEMORY_8BIT | flags::INDEX_8BIT | flags::IRQ_DISABLE;
        self.emulation = true;
        self.stopped = false;
        self.waiting = false;
        self.pc = self.read16_at(bus, vectors::RESET);
        self.cycles += 7;
        debug!("CPU reset, entry at ${:04X}", self.pc);
    }

    /// Set a specific flag in the status register
    pub fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.p |= flag;
        } else {
            self.p &= !flag;
        }
    }

    /// Check if a specific flag is set
    pub fn get_flag(&self, flag: u8) -> bool {
        (self.p & flag) != 0
    }

    /// 8-bit accumulator/memory mode?
    #[inline]
    fn m_is8(&self) -> bool {
        self.emulation || self.get_flag(flags::MEMORY_8BIT)
    }

    /// 8-bit index mode?
    #[inline]
    fn x_is8(&self) -> bool {
        self.emulation || self.get_flag(flags::INDEX_8BIT)
    }

    /// Re-assert the structural invariants after any write to P or a mode
    /// switch: emulation forces M/X and the stack page, X truncates indices.
    fn enforce_mode(&mut self) {
        if self.emulation {
            self.p |= flags::MEMORY_8BIT | flags::INDEX_8BIT;
            self.sp = 0x0100 | (self.sp & 0x00FF);
        }
        if self.x_is8() {
            self.x &= 0x00FF;
            self.y &= 0x00FF;
        }
    }

    /// Update the zero and negative flags for an 8- or 16-bit result
    fn update_nz(&mut self, value: u16, is8: bool) {
        if is8 {
            self.set_flag(flags::ZERO, value & 0x00FF == 0);
            self.set_flag(flags::NEGATIVE, value & 0x0080 != 0);
        } else {
            self.set_flag(flags::ZERO, value == 0);
            self.set_flag(flags::NEGATIVE, value & 0x8000 != 0);
        }
    }

    // ---- fetch and memory helpers -------------------------------------

    fn fetch8(&mut self, bus: &mut impl CpuBus) -> u8 {
        let value = bus.read(((self.pbr as u32) << 16) | self.pc as u32);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn fetch16(&mut self, bus: &mut impl CpuBus) -> u16 {
        let low = self.fetch8(bus);
        let high = self.fetch8(bus);
        combine_bytes(low, high)
    }

    fn fetch24(&mut self, bus: &mut impl CpuBus) -> u32 {
        let low = self.fetch16(bus) as u32;
        let bank = self.fetch8(bus) as u32;
        (bank << 16) | low
    }

    fn read16_at(&mut self, bus: &mut impl CpuBus, addr: u32) -> u16 {
        let low = bus.read(addr);
        let high = bus.read((addr + 1) & 0xFF_FFFF);
        combine_bytes(low, high)
    }

    fn read24_at(&mut self, bus: &mut impl CpuBus, addr: u32) -> u32 {
        let low = self.read16_at(bus, addr) as u32;
        let bank = bus.read((addr + 2) & 0xFF_FFFF) as u32;
        (bank << 16) | low
    }

    fn write16_at(&mut self, bus: &mut impl CpuBus, addr: u32, value: u16) {
        bus.write(addr, value as u8);
        bus.write((addr + 1) & 0xFF_FFFF, (value >> 8) as u8);
    }

    /// Read a memory operand with the given width
    fn read_data(&mut self, bus: &mut impl CpuBus, addr: u32, is8: bool) -> u16 {
        if is8 {
            bus.read(addr) as u16
        } else {
            self.read16_at(bus, addr)
        }
    }

    /// Write a memory operand with the given width
    fn write_data(&mut self, bus: &mut impl CpuBus, addr: u32, value: u16, is8: bool) {
        if is8 {
            bus.write(addr, value as u8);
        } else {
            self.write16_at(bus, addr, value);
        }
    }

    // ---- stack helpers ------------------------------------------------

    fn push8(&mut self, bus: &mut impl CpuBus, value: u8) {
        bus.write(self.sp as u32, value);
        self.sp = self.sp.wrapping_sub(1);
        if self.emulation {
            self.sp = 0x0100 | (self.sp & 0x00FF);
        }
    }

    fn push16(&mut self, bus: &mut impl CpuBus, value: u16) {
        self.push8(bus, (value >> 8) as u8);
        self.push8(bus, value as u8);
    }

    fn pull8(&mut self, bus: &mut impl CpuBus) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        if self.emulation {
            self.sp = 0x0100 | (self.sp & 0x00FF);
        }
        bus.read(self.sp as u32)
    }

    fn pull16(&mut self, bus: &mut impl CpuBus) -> u16 {
        let low = self.pull8(bus);
        let high = self.pull8(bus);
        combine_bytes(low, high)
    }

    // ---- addressing ---------------------------------------------------

    /// Compute the 24-bit effective address for a data addressing mode
    fn operand_address(&mut self, bus: &mut impl CpuBus, mode: AddressingMode) -> u32 {
        match mode {
            M::Direct => {
                let offset = self.fetch8(bus) as u16;
                self.d.wrapping_add(offset) as u32
            }
            M::DirectX => {
                let offset = self.fetch8(bus) as u16;
                self.d.wrapping_add(offset).wrapping_add(self.x) as u32
            }
            M::DirectY => {
                let offset = self.fetch8(bus) as u16;
                self.d.wrapping_add(offset).wrapping_add(self.y) as u32
            }
            M::DirectIndirect => {
                let pointer = {
                    let offset = self.fetch8(bus) as u16;
                    self.d.wrapping_add(offset) as u32
                };
                let base = self.read16_at(bus, pointer);
                ((self.dbr as u32) << 16) | base as u32
            }
            M::DirectIndirectLong => {
                let pointer = {
                    let offset = self.fetch8(bus) as u16;
                    self.d.wrapping_add(offset) as u32
                };
                self.read24_at(bus, pointer)
            }
            M::DirectIndexedIndirect => {
                let offset = self.fetch8(bus) as u16;
                let pointer = self.d.wrapping_add(offset).wrapping_add(self.x) as u32;
                let base = self.read16_at(bus, pointer);
                ((self.dbr as u32) << 16) | base as u32
            }
            M::DirectIndirectIndexed => {
                let pointer = {
                    let offset = self.fetch8(bus) as u16;
                    self.d.wrapping_add(offset) as u32
                };
                let base = self.read16_at(bus, pointer);
                ((((self.dbr as u32) << 16) | base as u32) + self.y as u32) & 0xFF_FFFF
            }
            M::DirectIndirectLongIndexed => {
                let pointer = {
                    let offset = self.fetch8(bus) as u16;
                    self.d.wrapping_add(offset) as u32
                };
                (self.read24_at(bus, pointer) + self.y as u32) & 0xFF_FFFF
            }
            M::Absolute => {
                let offset = self.fetch16(bus);
                ((self.dbr as u32) << 16) | offset as u32
            }
            M::AbsoluteX => {
                let offset = self.fetch16(bus);
                ((((self.dbr as u32) << 16) | offset as u32) + self.x as u32) & 0xFF_FFFF
            }
            M::AbsoluteY => {
                let offset = self.fetch16(bus);
                ((((self.dbr as u32) << 16) | offset as u32) + self.y as u32) & 0xFF_FFFF
            }
            M::AbsoluteLong => self.fetch24(bus),
            M::AbsoluteLongX => (self.fetch24(bus) + self.x as u32) & 0xFF_FFFF,
            M::StackRelative => {
                let offset = self.fetch8(bus) as u16;
                self.sp.wrapping_add(offset) as u32
            }
            M::StackRelativeIndirectIndexed => {
                let offset = self.fetch8(bus) as u16;
                let pointer = self.sp.wrapping_add(offset) as u32;
                let base = self.read16_at(bus, pointer);
                ((((self.dbr as u32) << 16) | base as u32) + self.y as u32) & 0xFF_FFFF
            }
            // Control-flow modes are resolved by their operations
            _ => unreachable!("no effective address for {:?}", mode),
        }
    }

    /// Fetch an operand value, returning the address it came from (if any)
    fn fetch_operand(
        &mut self,
        bus: &mut impl CpuBus,
        mode: AddressingMode,
        is8: bool,
    ) -> (u16, Option<u32>) {
        if mode == M::Immediate {
            let value = if is8 {
                self.fetch8(bus) as u16
            } else {
                self.fetch16(bus)
            };
            (value, None)
        } else {
            let addr = self.operand_address(bus, mode);
            (self.read_data(bus, addr, is8), Some(addr))
        }
    }

    // ---- interrupts ---------------------------------------------------

    /// Enter an interrupt handler. For BRK/COP the PC already points past
    /// the signature byte.
    fn handle_interrupt(&mut self, bus: &mut impl CpuBus, kind: Interrupt) -> u32 {
        let software = matches!(kind, Interrupt::Brk | Interrupt::Cop);
        let vector = if self.emulation {
            match kind {
                Interrupt::Nmi => vectors::NMI_EMULATION,
                Interrupt::Cop => vectors::COP_EMULATION,
                Interrupt::Irq | Interrupt::Brk => vectors::IRQ_EMULATION,
            }
        } else {
            match kind {
                Interrupt::Nmi => vectors::NMI_NATIVE,
                Interrupt::Irq => vectors::IRQ_NATIVE,
                Interrupt::Brk => vectors::BRK_NATIVE,
                Interrupt::Cop => vectors::COP_NATIVE,
            }
        };

        if self.emulation {
            self.push16(bus, self.pc);
            // In emulation mode bit 4 of the pushed status is the B flag:
            // set for BRK/COP, clear for hardware interrupts
            let pushed = if software {
                self.p | flags::INDEX_8BIT
            } else {
                self.p & !flags::INDEX_8BIT
            };
            self.push8(bus, pushed);
            self.set_flag(flags::IRQ_DISABLE, true);
            self.pbr = 0;
            self.pc = self.read16_at(bus, vector);
            7
        } else {
            self.push8(bus, self.pbr);
            self.push16(bus, self.pc);
            self.push8(bus, self.p);
            self.set_flag(flags::IRQ_DISABLE, true);
            self.set_flag(flags::DECIMAL, false);
            self.pbr = 0;
            self.pc = self.read16_at(bus, vector);
            8
        }
    }

    // ---- execution ----------------------------------------------------

    /// Execute one instruction (or service a pending interrupt) and return
    /// the number of CPU cycles consumed
    pub fn step(&mut self, bus: &mut impl CpuBus) -> u32 {
        if self.stopped {
            self.cycles += 2;
            return 2;
        }

        if bus.poll_nmi() {
            self.waiting = false;
            let cycles = self.handle_interrupt(bus, Interrupt::Nmi);
            self.cycles += cycles as u64;
            return cycles;
        }

        if bus.poll_irq() {
            self.waiting = false;
            if !self.get_flag(flags::IRQ_DISABLE) {
                let cycles = self.handle_interrupt(bus, Interrupt::Irq);
                self.cycles += cycles as u64;
                return cycles;
            }
        }

        if self.waiting {
            self.cycles += 2;
            return 2;
        }

        let opcode = self.fetch8(bus);
        let (op, mode, base) = OPCODES[opcode as usize];
        let cycles = self.execute(bus, op, mode, base);
        self.cycles += cycles as u64;
        cycles
    }

    fn execute(
        &mut self,
        bus: &mut impl CpuBus,
        op: Operation,
        mode: AddressingMode,
        base: u32,
    ) -> u32 {
        match op {
            // ---- loads and stores ----
            O::Lda => {
                let is8 = self.m_is8();
                let (value, _) = self.fetch_operand(bus, mode, is8);
                self.set_acc(value);
                self.update_nz(value, is8);
                base
            }
            O::Ldx => {
                let is8 = self.x_is8();
                let (value, _) = self.fetch_operand(bus, mode, is8);
                self.x = if is8 { value & 0x00FF } else { value };
                self.update_nz(value, is8);
                base
            }
            O::Ldy => {
                let is8 = self.x_is8();
                let (value, _) = self.fetch_operand(bus, mode, is8);
                self.y = if is8 { value & 0x00FF } else { value };
                self.update_nz(value, is8);
                base
            }
            O::Sta => {
                let is8 = self.m_is8();
                let addr = self.operand_address(bus, mode);
                let value = self.a;
                self.write_data(bus, addr, value, is8);
                base
            }
            O::Stx => {
                let is8 = self.x_is8();
                let addr = self.operand_address(bus, mode);
                let value = self.x;
                self.write_data(bus, addr, value, is8);
                base
            }
            O::Sty => {
                let is8 = self.x_is8();
                let addr = self.operand_address(bus, mode);
                let value = self.y;
                self.write_data(bus, addr, value, is8);
                base
            }
            O::Stz => {
                let is8 = self.m_is8();
                let addr = self.operand_address(bus, mode);
                self.write_data(bus, addr, 0, is8);
                base
            }

            // ---- arithmetic ----
            O::Adc => {
                let is8 = self.m_is8();
                let (value, _) = self.fetch_operand(bus, mode, is8);
                self.adc(value);
                base
            }
            O::Sbc => {
                let is8 = self.m_is8();
                let (value, _) = self.fetch_operand(bus, mode, is8);
                self.sbc(value);
                base
            }
            O::Cmp => {
                let is8 = self.m_is8();
                let (value, _) = self.fetch_operand(bus, mode, is8);
                let a = self.acc();
                self.compare(a, value, is8);
                base
            }
            O::Cpx => {
                let is8 = self.x_is8();
                let (value, _) = self.fetch_operand(bus, mode, is8);
                let x = self.x;
                self.compare(x, value, is8);
                base
            }
            O::Cpy => {
                let is8 = self.x_is8();
                let (value, _) = self.fetch_operand(bus, mode, is8);
                let y = self.y;
                self.compare(y, value, is8);
                base
            }

            // ---- logical ----
            O::And => {
                let is8 = self.m_is8();
                let (value, _) = self.fetch_operand(bus, mode, is8);
                let result = self.acc() & value;
                self.set_acc(result);
                self.update_nz(result, is8);
                base
            }
            O::Ora => {
                let is8 = self.m_is8();
                let (value, _) = self.fetch_operand(bus, mode, is8);
                let result = self.acc() | value;
                self.set_acc(result);
                self.update_nz(result, is8);
                base
            }
            O::Eor => {
                let is8 = self.m_is8();
                let (value, _) = self.fetch_operand(bus, mode, is8);
                let result = self.acc() ^ value;
                self.set_acc(result);
                self.update_nz(result, is8);
                base
            }
            O::Bit => {
                let is8 = self.m_is8();
                let (value, _) = self.fetch_operand(bus, mode, is8);
                self.set_flag(flags::ZERO, self.acc() & value == 0);
                // Immediate BIT affects Z only
                if mode != M::Immediate {
                    let (n, v) = if is8 {
                        (value & 0x80 != 0, value & 0x40 != 0)
                    } else {
                        (value & 0x8000 != 0, value & 0x4000 != 0)
                    };
                    self.set_flag(flags::NEGATIVE, n);
                    self.set_flag(flags::OVERFLOW, v);
                }
                base
            }
            O::Tsb => {
                self.rmw(bus, mode, |cpu, value| {
                    cpu.set_flag(flags::ZERO, cpu.acc() & value == 0);
                    value | cpu.acc()
                });
                base
            }
            O::Trb => {
                self.rmw(bus, mode, |cpu, value| {
                    cpu.set_flag(flags::ZERO, cpu.acc() & value == 0);
                    value & !cpu.acc()
                });
                base
            }

            // ---- shifts and rotates ----
            O::Asl => {
                self.rmw(bus, mode, Self::asl_value);
                base
            }
            O::AslA => {
                let value = self.acc();
                let result = self.asl_value(value);
                self.set_acc(result);
                base
            }
            O::Lsr => {
                self.rmw(bus, mode, Self::lsr_value);
                base
            }
            O::LsrA => {
                let value = self.acc();
                let result = self.lsr_value(value);
                self.set_acc(result);
                base
            }
            O::Rol => {
                self.rmw(bus, mode, Self::rol_value);
                base
            }
            O::RolA => {
                let value = self.acc();
                let result = self.rol_value(value);
                self.set_acc(result);
                base
            }
            O::Ror => {
                self.rmw(bus, mode, Self::ror_value);
                base
            }
            O::RorA => {
                let value = self.acc();
                let result = self.ror_value(value);
                self.set_acc(result);
                base
            }

            // ---- increments and decrements ----
            O::Inc => {
                self.rmw(bus, mode, |cpu, value| {
                    let is8 = cpu.m_is8();
                    let result = mask(value.wrapping_add(1), is8);
                    cpu.update_nz(result, is8);
                    result
                });
                base
            }
            O::Dec => {
                self.rmw(bus, mode, |cpu, value| {
                    let is8 = cpu.m_is8();
                    let result = mask(value.wrapping_sub(1), is8);
                    cpu.update_nz(result, is8);
                    result
                });
                base
            }
            O::IncA => {
                let is8 = self.m_is8();
                let result = mask(self.acc().wrapping_add(1), is8);
                self.set_acc(result);
                self.update_nz(result, is8);
                base
            }
            O::DecA => {
                let is8 = self.m_is8();
                let result = mask(self.acc().wrapping_sub(1), is8);
                self.set_acc(result);
                self.update_nz(result, is8);
                base
            }
            O::Inx => {
                let is8 = self.x_is8();
                self.x = mask(self.x.wrapping_add(1), is8);
                let x = self.x;
                self.update_nz(x, is8);
                base
            }
            O::Iny => {
                let is8 = self.x_is8();
                self.y = mask(self.y.wrapping_add(1), is8);
                let y = self.y;
                self.update_nz(y, is8);
                base
            }
            O::Dex => {
                let is8 = self.x_is8();
                self.x = mask(self.x.wrapping_sub(1), is8);
                let x = self.x;
                self.update_nz(x, is8);
                base
            }
            O::Dey => {
                let is8 = self.x_is8();
                self.y = mask(self.y.wrapping_sub(1), is8);
                let y = self.y;
                self.update_nz(y, is8);
                base
            }

            // ---- branches ----
            O::Bcc => self.branch(bus, !self.get_flag(flags::CARRY), base),
            O::Bcs => self.branch(bus, self.get_flag(flags::CARRY), base),
            O::Beq => self.branch(bus, self.get_flag(flags::ZERO), base),
            O::Bne => self.branch(bus, !self.get_flag(flags::ZERO), base),
            O::Bmi => self.branch(bus, self.get_flag(flags::NEGATIVE), base),
            O::Bpl => self.branch(bus, !self.get_flag(flags::NEGATIVE), base),
            O::Bvs => self.branch(bus, self.get_flag(flags::OVERFLOW), base),
            O::Bvc => self.branch(bus, !self.get_flag(flags::OVERFLOW), base),
            O::Bra => self.branch(bus, true, base),
            O::Brl => {
                let offset = self.fetch16(bus) as i16;
                self.pc = self.pc.wrapping_add(offset as u16);
                base
            }

            // ---- jumps and subroutines ----
            O::Jmp => {
                match mode {
                    M::Absolute => {
                        self.pc = self.fetch16(bus);
                    }
                    M::AbsoluteIndirect => {
                        let pointer = self.fetch16(bus) as u32;
                        self.pc = self.read16_at(bus, pointer);
                    }
                    M::AbsoluteIndexedIndirect => {
                        let pointer = self.fetch16(bus).wrapping_add(self.x);
                        let addr = ((self.pbr as u32) << 16) | pointer as u32;
                        self.pc = self.read16_at(bus, addr);
                    }
                    _ => unreachable!("JMP mode {:?}", mode),
                }
                base
            }
            O::Jml => {
                match mode {
                    M::AbsoluteLong => {
                        let target = self.fetch24(bus);
                        self.pbr = (target >> 16) as u8;
                        self.pc = target as u16;
                    }
                    M::AbsoluteIndirectLong => {
                        let pointer = self.fetch16(bus) as u32;
                        let target = self.read24_at(bus, pointer);
                        self.pbr = (target >> 16) as u8;
                        self.pc = target as u16;
                    }
                    _ => unreachable!("JML mode {:?}", mode),
                }
                base
            }
            O::Jsr => {
                match mode {
                    M::Absolute => {
                        let target = self.fetch16(bus);
                        let ret = self.pc.wrapping_sub(1);
                        self.push16(bus, ret);
                        self.pc = target;
                    }
                    M::AbsoluteIndexedIndirect => {
                        let pointer = self.fetch16(bus);
                        let ret = self.pc.wrapping_sub(1);
                        self.push16(bus, ret);
                        let addr =
                            ((self.pbr as u32) << 16) | pointer.wrapping_add(self.x) as u32;
                        self.pc = self.read16_at(bus, addr);
                    }
                    _ => unreachable!("JSR mode {:?}", mode),
                }
                base
            }
            O::Jsl => {
                let target = self.fetch24(bus);
                let pbr = self.pbr;
                let ret = self.pc.wrapping_sub(1);
                self.push8(bus, pbr);
                self.push16(bus, ret);
                self.pbr = (target >> 16) as u8;
                self.pc = target as u16;
                base
            }
            O::Rts => {
                self.pc = self.pull16(bus).wrapping_add(1);
                base
            }
            O::Rtl => {
                self.pc = self.pull16(bus).wrapping_add(1);
                self.pbr = self.pull8(bus);
                base
            }
            O::Rti => {
                self.p = self.pull8(bus);
                self.pc = self.pull16(bus);
                if !self.emulation {
                    self.pbr = self.pull8(bus);
                }
                self.enforce_mode();
                base
            }

            // ---- stack ----
            O::Pha => {
                let is8 = self.m_is8();
                let value = self.a;
                self.push_value(bus, value, is8);
                base
            }
            O::Phx => {
                let is8 = self.x_is8();
                let value = self.x;
                self.push_value(bus, value, is8);
                base
            }
            O::Phy => {
                let is8 = self.x_is8();
                let value = self.y;
                self.push_value(bus, value, is8);
                base
            }
            O::Php => {
                let p = self.p;
                self.push8(bus, p);
                base
            }
            O::Phb => {
                let dbr = self.dbr;
                self.push8(bus, dbr);
                base
            }
            O::Phd => {
                let d = self.d;
                self.push16(bus, d);
                base
            }
            O::Phk => {
                let pbr = self.pbr;
                self.push8(bus, pbr);
                base
            }
            O::Pla => {
                let is8 = self.m_is8();
                let value = self.pull_value(bus, is8);
                self.set_acc(value);
                self.update_nz(value, is8);
                base
            }
            O::Plx => {
                let is8 = self.x_is8();
                let value = self.pull_value(bus, is8);
                self.x = value;
                self.update_nz(value, is8);
                base
            }
            O::Ply => {
                let is8 = self.x_is8();
                let value = self.pull_value(bus, is8);
                self.y = value;
                self.update_nz(value, is8);
                base
            }
            O::Plp => {
                self.p = self.pull8(bus);
                self.enforce_mode();
                base
            }
            O::Plb => {
                let value = self.pull8(bus);
                self.dbr = value;
                self.update_nz(value as u16, true);
                base
            }
            O::Pld => {
                let value = self.pull16(bus);
                self.d = value;
                self.update_nz(value, false);
                base
            }
            O::Pea => {
                let value = self.fetch16(bus);
                self.push16(bus, value);
                base
            }
            O::Pei => {
                let pointer = {
                    let offset = self.fetch8(bus) as u16;
                    self.d.wrapping_add(offset) as u32
                };
                let value = self.read16_at(bus, pointer);
                self.push16(bus, value);
                base
            }
            O::Per => {
                let offset = self.fetch16(bus);
                let value = self.pc.wrapping_add(offset);
                self.push16(bus, value);
                base
            }

            // ---- flags ----
            O::Clc => {
                self.set_flag(flags::CARRY, false);
                base
            }
            O::Sec => {
                self.set_flag(flags::CARRY, true);
                base
            }
            O::Cli => {
                self.set_flag(flags::IRQ_DISABLE, false);
                base
            }
            O::Sei => {
                self.set_flag(flags::IRQ_DISABLE, true);
                base
            }
            O::Cld => {
                self.set_flag(flags::DECIMAL, false);
                base
            }
            O::Sed => {
                self.set_flag(flags::DECIMAL, true);
                base
            }
            O::Clv => {
                self.set_flag(flags::OVERFLOW, false);
                base
            }
            O::Rep => {
                let value = self.fetch8(bus);
                self.p &= !value;
                self.enforce_mode();
                base
            }
            O::Sep => {
                let value = self.fetch8(bus);
                self.p |= value;
                self.enforce_mode();
                base
            }
            O::Xce => {
                let carry = self.get_flag(flags::CARRY);
                self.set_flag(flags::CARRY, self.emulation);
                self.emulation = carry;
                self.enforce_mode();
                base
            }

            // ---- transfers ----
            O::Tax => {
                let is8 = self.x_is8();
                self.x = mask(self.a, is8);
                let x = self.x;
                self.update_nz(x, is8);
                base
            }
            O::Tay => {
                let is8 = self.x_is8();
                self.y = mask(self.a, is8);
                let y = self.y;
                self.update_nz(y, is8);
                base
            }
            O::Txa => {
                let is8 = self.m_is8();
                let value = self.x;
                self.set_acc(value);
                self.update_nz(value, is8);
                base
            }
            O::Tya => {
                let is8 = self.m_is8();
                let value = self.y;
                self.set_acc(value);
                self.update_nz(value, is8);
                base
            }
            O::Txy => {
                let is8 = self.x_is8();
                self.y = mask(self.x, is8);
                let y = self.y;
                self.update_nz(y, is8);
                base
            }
            O::Tyx => {
                let is8 = self.x_is8();
                self.x = mask(self.y, is8);
                let x = self.x;
                self.update_nz(x, is8);
                base
            }
            O::Tsx => {
                let is8 = self.x_is8();
                self.x = mask(self.sp, is8);
                let x = self.x;
                self.update_nz(x, is8);
                base
            }
            O::Txs => {
                self.sp = if self.emulation {
                    0x0100 | (self.x & 0x00FF)
                } else {
                    self.x
                };
                base
            }
            O::Tcd => {
                self.d = self.a;
                let d = self.d;
                self.update_nz(d, false);
                base
            }
            O::Tdc => {
                self.a = self.d;
                let a = self.a;
                self.update_nz(a, false);
                base
            }
            O::Tcs => {
                self.sp = if self.emulation {
                    0x0100 | (self.a & 0x00FF)
                } else {
                    self.a
                };
                base
            }
            O::Tsc => {
                self.a = self.sp;
                let a = self.a;
                self.update_nz(a, false);
                base
            }
            O::Xba => {
                self.a = self.a.rotate_right(8);
                let low = self.a;
                self.update_nz(low, true);
                base
            }

            // ---- block moves ----
            O::Mvn | O::Mvp => {
                let dst_bank = self.fetch8(bus);
                let src_bank = self.fetch8(bus);
                self.dbr = dst_bank;
                let count = self.a as u32 + 1;
                let forward = op == O::Mvn;
                for _ in 0..count {
                    let value = bus.read(((src_bank as u32) << 16) | self.x as u32);
                    bus.write(((dst_bank as u32) << 16) | self.y as u32, value);
                    if forward {
                        self.x = self.step_index(self.x, 1);
                        self.y = self.step_index(self.y, 1);
                    } else {
                        self.x = self.step_index(self.x, -1);
                        self.y = self.step_index(self.y, -1);
                    }
                }
                self.a = 0xFFFF;
                base * count
            }

            // ---- interrupt and mode control ----
            O::Brk => {
                self.fetch8(bus); // signature byte
                self.handle_interrupt(bus, Interrupt::Brk)
            }
            O::Cop => {
                self.fetch8(bus); // signature byte
                self.handle_interrupt(bus, Interrupt::Cop)
            }
            O::Wai => {
                self.waiting = true;
                base
            }
            O::Stp => {
                self.stopped = true;
                base
            }
            O::Wdm => {
                // Reserved two-byte no-op
                self.fetch8(bus);
                base
            }
            O::Nop => base,
        }
    }

    // ---- operation helpers --------------------------------------------

    /// Accumulator value at the current memory width
    #[inline]
    fn acc(&self) -> u16 {
        if self.m_is8() {
            self.a & 0x00FF
        } else {
            self.a
        }
    }

    /// Set the accumulator at the current memory width, preserving the high
    /// byte in 8-bit mode
    #[inline]
    fn set_acc(&mut self, value: u16) {
        if self.m_is8() {
            self.a = (self.a & 0xFF00) | (value & 0x00FF);
        } else {
            self.a = value;
        }
    }

    /// Step an index register by one, honoring the index width
    fn step_index(&self, value: u16, delta: i16) -> u16 {
        let next = value.wrapping_add(delta as u16);
        if self.x_is8() {
            next & 0x00FF
        } else {
            next
        }
    }

    /// Fetch a relative offset and branch when `condition` holds
    fn branch(&mut self, bus: &mut impl CpuBus, condition: bool, base: u32) -> u32 {
        let offset = self.fetch8(bus) as i8;
        if condition {
            self.pc = self.pc.wrapping_add(offset as u16);
            base + 1
        } else {
            base
        }
    }

    /// Read-modify-write on a memory operand
    fn rmw(
        &mut self,
        bus: &mut impl CpuBus,
        mode: AddressingMode,
        f: fn(&mut Self, u16) -> u16,
    ) {
        let is8 = self.m_is8();
        let addr = self.operand_address(bus, mode);
        let value = self.read_data(bus, addr, is8);
        let result = f(self, value);
        self.write_data(bus, addr, result, is8);
    }

    fn push_value(&mut self, bus: &mut impl CpuBus, value: u16, is8: bool) {
        if is8 {
            self.push8(bus, value as u8);
        } else {
            self.push16(bus, value);
        }
    }

    fn pull_value(&mut self, bus: &mut impl CpuBus, is8: bool) -> u16 {
        if is8 {
            self.pull8(bus) as u16
        } else {
            self.pull16(bus)
        }
    }

    fn asl_value(&mut self, value: u16) -> u16 {
        let is8 = self.m_is8();
        let carry = if is8 { value & 0x80 } else { value & 0x8000 } != 0;
        let result = mask(value << 1, is8);
        self.set_flag(flags::CARRY, carry);
        self.update_nz(result, is8);
        result
    }

    fn lsr_value(&mut self, value: u16) -> u16 {
        let is8 = self.m_is8();
        let result = mask(value, is8) >> 1;
        self.set_flag(flags::CARRY, value & 0x0001 != 0);
        self.update_nz(result, is8);
        result
    }

    fn rol_value(&mut self, value: u16) -> u16 {
        let is8 = self.m_is8();
        let carry_in = (self.p & flags::CARRY) as u16;
        let carry = if is8 { value & 0x80 } else { value & 0x8000 } != 0;
        let result = mask((value << 1) | carry_in, is8);
        self.set_flag(flags::CARRY, carry);
        self.update_nz(result, is8);
        result
    }

    fn ror_value(&mut self, value: u16) -> u16 {
        let is8 = self.m_is8();
        let carry_in = (self.p & flags::CARRY) as u16;
        let top = if is8 { carry_in << 7 } else { carry_in << 15 };
        let result = (mask(value, is8) >> 1) | top;
        self.set_flag(flags::CARRY, value & 0x0001 != 0);
        self.update_nz(result, is8);
        result
    }

    fn compare(&mut self, register: u16, operand: u16, is8: bool) {
        let register = mask(register, is8);
        let operand = mask(operand, is8);
        let result = register.wrapping_sub(operand);
        self.set_flag(flags::CARRY, register >= operand);
        self.update_nz(mask(result, is8), is8);
    }

    /// Add with carry, honoring the decimal flag on the 8-bit path
    fn adc(&mut self, operand: u16) {
        let is8 = self.m_is8();
        if self.get_flag(flags::DECIMAL) && is8 {
            self.adc_decimal8(operand as u8);
        } else {
            self.adc_binary(operand, is8);
        }
    }

    /// Subtract with borrow: add the one's complement of the operand, which
    /// also yields the standard subtraction overflow behavior
    fn sbc(&mut self, operand: u16) {
        let is8 = self.m_is8();
        if self.get_flag(flags::DECIMAL) && is8 {
            self.sbc_decimal8(operand as u8);
        } else {
            let inverted = if is8 {
                (operand ^ 0x00FF) & 0x00FF
            } else {
                operand ^ 0xFFFF
            };
            self.adc_binary(inverted, is8);
        }
    }

    fn adc_binary(&mut self, operand: u16, is8: bool) {
        let carry_in = (self.p & flags::CARRY) as u32;
        let a = self.acc() as u32;
        let m = operand as u32;
        let sum = a + m + carry_in;
        let (carry, sign) = if is8 {
            (sum > 0xFF, 0x80)
        } else {
            (sum > 0xFFFF, 0x8000)
        };
        let result = mask(sum as u16, is8);
        self.set_flag(flags::CARRY, carry);
        self.set_flag(flags::OVERFLOW, (!(a ^ m) & (a ^ sum) & sign) != 0);
        self.set_acc(result);
        self.update_nz(result, is8);
    }

    fn adc_decimal8(&mut self, operand: u8) {
        let carry_in = (self.p & flags::CARRY) as u16;
        let a = self.acc();
        let m = operand as u16;

        let mut low = (a & 0x0F) + (m & 0x0F) + carry_in;
        if low > 0x09 {
            low += 0x06;
        }
        let mut sum = (a & 0xF0) + (m & 0xF0) + (low & 0x0F) + (if low > 0x0F { 0x10 } else { 0 });
        self.set_flag(
            flags::OVERFLOW,
            (!(a ^ m) & (a ^ sum) & 0x80) != 0,
        );
        if sum > 0x9F {
            sum += 0x60;
        }
        self.set_flag(flags::CARRY, sum > 0xFF);
        let result = sum & 0x00FF;
        self.set_acc(result);
        self.update_nz(result, true);
    }

    fn sbc_decimal8(&mut self, operand: u8) {
        let borrow = 1 - (self.p & flags::CARRY) as i16;
        let a = self.acc() as i16;
        let m = operand as i16;

        let diff = a - m - borrow;
        let mut low = (a & 0x0F) - (m & 0x0F) - borrow;
        let mut high = (a >> 4) - (m >> 4);
        if low < 0 {
            low += 10;
            high -= 1;
        }
        if high < 0 {
            high += 10;
        }
        self.set_flag(flags::CARRY, diff >= 0);
        self.set_flag(
            flags::OVERFLOW,
            ((a ^ m) & (a ^ diff) & 0x80) != 0,
        );
        let result = (((high as u16) << 4) | (low as u16 & 0x0F)) & 0x00FF;
        self.set_acc(result);
        self.update_nz(result, true);
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Mask a value to the effective width
#[inline]
fn mask(value: u16, is8: bool) -> u16 {
    if is8 {
        value & 0x00FF
    } else {
        value
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CPU {{ A: ${:04X}, X: ${:04X}, Y: ${:04X}, P: ${:02X}, E: {}, SP: ${:04X}, PC: ${:02X}:{:04X}, D: ${:04X}, DBR: ${:02X}, Cycles: {} }}",
            self.a, self.x, self.y, self.p, self.emulation as u8, self.sp, self.pbr, self.pc,
            self.d, self.dbr, self.cycles
        )
    }
}
