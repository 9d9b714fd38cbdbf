//! Architecturally-defined classification tables.
//!
//! All tables are immutable process-wide constants built at compile time.
//! The predecoder indexes them with raw bytes (prefix map), or with
//! [escape class][opcode byte] pairs (ModRM / immediate maps).

use crate::emi::SegReg;

/// What a leading byte means when encountered before the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixClass {
    None,
    Seg(SegReg),
    OpSize,
    AddrSize,
    Lock,
    Rep,
    Repne,
    /// 0x40..=0x4F; only honoured in 64-bit submode.
    Rex,
}

const fn build_prefix_table() -> [PrefixClass; 256] {
    let mut t = [PrefixClass::None; 256];
    t[0x26] = PrefixClass::Seg(SegReg::Es);
    t[0x2E] = PrefixClass::Seg(SegReg::Cs);
    t[0x36] = PrefixClass::Seg(SegReg::Ss);
    t[0x3E] = PrefixClass::Seg(SegReg::Ds);
    t[0x64] = PrefixClass::Seg(SegReg::Fs);
    t[0x65] = PrefixClass::Seg(SegReg::Gs);
    t[0x66] = PrefixClass::OpSize;
    t[0x67] = PrefixClass::AddrSize;
    t[0xF0] = PrefixClass::Lock;
    t[0xF2] = PrefixClass::Repne;
    t[0xF3] = PrefixClass::Rep;
    let mut b = 0x40;
    while b <= 0x4F {
        t[b] = PrefixClass::Rex;
        b += 1;
    }
    t
}

pub const PREFIX_CLASS: [PrefixClass; 256] = build_prefix_table();

const fn one_byte_modrm() -> [bool; 256] {
    let mut t = [false; 256];
    // ALU groups: the r/m forms sit at +0..+3 of each group of eight.
    let mut base = 0x00;
    while base <= 0x38 {
        let mut i = 0;
        while i < 4 {
            t[base + i] = true;
            i += 1;
        }
        base += 8;
    }
    t[0x62] = true; // BOUND
    t[0x63] = true; // ARPL / MOVSXD
    t[0x69] = true; // IMUL imm
    t[0x6B] = true; // IMUL imm8
    // 0x80-0x83 immediate group, then TEST/XCHG/MOV/LEA/POP through 0x8F.
    let mut b = 0x80;
    while b <= 0x8F {
        t[b] = true;
        b += 1;
    }
    t[0xC0] = true; // shift group, imm8
    t[0xC1] = true;
    t[0xC4] = true; // LES
    t[0xC5] = true; // LDS
    t[0xC6] = true; // MOV r/m, imm
    t[0xC7] = true;
    let mut b = 0xD0;
    while b <= 0xD3 {
        t[b] = true; // shift group
        b += 1;
    }
    let mut b = 0xD8;
    while b <= 0xDF {
        t[b] = true; // x87 escapes
        b += 1;
    }
    t[0xF6] = true; // group 3
    t[0xF7] = true;
    t[0xFE] = true; // group 4
    t[0xFF] = true; // group 5
    t
}

const fn two_byte_modrm() -> [bool; 256] {
    let mut t = [false; 256];
    t[0x00] = true; // group 6
    t[0x01] = true; // group 7
    t[0x02] = true; // LAR
    t[0x03] = true; // LSL
    t[0x0D] = true; // prefetch hints
    let mut b = 0x10;
    while b <= 0x17 {
        t[b] = true; // SSE moves
        b += 1;
    }
    let mut b = 0x18;
    while b <= 0x1F {
        t[b] = true; // hint nop group
        b += 1;
    }
    let mut b = 0x20;
    while b <= 0x23 {
        t[b] = true; // MOV to/from CR/DR
        b += 1;
    }
    let mut b = 0x28;
    while b <= 0x2F {
        t[b] = true;
        b += 1;
    }
    let mut b = 0x40;
    while b <= 0x4F {
        t[b] = true; // CMOVcc
        b += 1;
    }
    let mut b = 0x50;
    while b <= 0x7F {
        t[b] = true;
        b += 1;
    }
    t[0x77] = false; // EMMS
    let mut b = 0x90;
    while b <= 0x9F {
        t[b] = true; // SETcc
        b += 1;
    }
    t[0xA3] = true; // BT
    t[0xA4] = true; // SHLD imm8
    t[0xA5] = true; // SHLD CL
    let mut b = 0xAB;
    while b <= 0xAF {
        t[b] = true; // BTS, SHRD, group 15, IMUL
        b += 1;
    }
    let mut b = 0xB0;
    while b <= 0xC7 {
        t[b] = true; // CMPXCHG..group 9
        b += 1;
    }
    let mut b = 0xC8;
    while b <= 0xCF {
        t[b] = false; // BSWAP
        b += 1;
    }
    let mut b = 0xD0;
    while b <= 0xFE {
        t[b] = true; // SSE/MMX arithmetic
        b += 1;
    }
    t
}

/// `[escape class][opcode byte]` -> does this opcode take a ModRM byte.
/// Row 0 is the one-byte map, row 1 the two-byte (0F) map; the three-byte
/// maps always take a ModRM byte and are handled directly by the opcode
/// state.
pub const USES_MODRM: [[bool; 256]; 2] = [one_byte_modrm(), two_byte_modrm()];

/// Size class of an opcode's immediate. The class is turned into a byte
/// count with [`imm_size`] using the operand-size (or, for `Offset`, the
/// address-size) attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ImmKind {
    None = 0,
    Byte = 1,
    Word = 2,
    /// Full operand size: 2, 4 or 8 bytes.
    VWord = 3,
    /// Operand size clamped to 4 bytes.
    ZWord = 4,
    /// Far pointer: 16-bit selector plus offset.
    Pointer = 5,
    /// Memory offset sized by the address-size attribute (moffs forms).
    Offset = 6,
    /// ENTER: imm16 plus imm8.
    Enter = 7,
}

const NUM_IMM_KINDS: usize = 8;

const fn one_byte_imm() -> [ImmKind; 256] {
    let mut t = [ImmKind::None; 256];
    // ALU accumulator-immediate forms at +4 (imm8) and +5 (immz) of each
    // group of eight.
    let mut base = 0x04;
    while base <= 0x3C {
        t[base] = ImmKind::Byte;
        t[base + 1] = ImmKind::ZWord;
        base += 8;
    }
    t[0x68] = ImmKind::ZWord; // PUSH imm
    t[0x69] = ImmKind::ZWord; // IMUL imm
    t[0x6A] = ImmKind::Byte; // PUSH imm8
    t[0x6B] = ImmKind::Byte; // IMUL imm8
    let mut b = 0x70;
    while b <= 0x7F {
        t[b] = ImmKind::Byte; // Jcc rel8
        b += 1;
    }
    t[0x80] = ImmKind::Byte; // immediate group
    t[0x81] = ImmKind::ZWord;
    t[0x82] = ImmKind::Byte;
    t[0x83] = ImmKind::Byte;
    t[0x9A] = ImmKind::Pointer; // CALL far
    t[0xA0] = ImmKind::Offset; // MOV moffs forms
    t[0xA1] = ImmKind::Offset;
    t[0xA2] = ImmKind::Offset;
    t[0xA3] = ImmKind::Offset;
    t[0xA8] = ImmKind::Byte; // TEST AL
    t[0xA9] = ImmKind::ZWord; // TEST eAX
    let mut b = 0xB0;
    while b <= 0xB7 {
        t[b] = ImmKind::Byte; // MOV r8, imm8
        b += 1;
    }
    let mut b = 0xB8;
    while b <= 0xBF {
        t[b] = ImmKind::VWord; // MOV r, imm
        b += 1;
    }
    t[0xC0] = ImmKind::Byte; // shift group imm8
    t[0xC1] = ImmKind::Byte;
    t[0xC2] = ImmKind::Word; // RET imm16
    t[0xC6] = ImmKind::Byte; // MOV r/m, imm
    t[0xC7] = ImmKind::ZWord;
    t[0xC8] = ImmKind::Enter;
    t[0xCA] = ImmKind::Word; // RETF imm16
    t[0xCD] = ImmKind::Byte; // INT imm8
    t[0xD4] = ImmKind::Byte; // AAM
    t[0xD5] = ImmKind::Byte; // AAD
    let mut b = 0xE0;
    while b <= 0xE7 {
        t[b] = ImmKind::Byte; // LOOP/JCXZ, IN/OUT imm8
        b += 1;
    }
    t[0xE8] = ImmKind::ZWord; // CALL rel
    t[0xE9] = ImmKind::ZWord; // JMP rel
    t[0xEA] = ImmKind::Pointer; // JMP far
    t[0xEB] = ImmKind::Byte; // JMP rel8
    // Group 3 (F6/F7) carries an immediate only for the TEST forms; the
    // ModRM state patches that in once the reg field is known.
    t
}

const fn two_byte_imm() -> [ImmKind; 256] {
    let mut t = [ImmKind::None; 256];
    t[0x70] = ImmKind::Byte; // PSHUF*
    t[0x71] = ImmKind::Byte; // shift groups
    t[0x72] = ImmKind::Byte;
    t[0x73] = ImmKind::Byte;
    let mut b = 0x80;
    while b <= 0x8F {
        t[b] = ImmKind::ZWord; // Jcc rel
        b += 1;
    }
    t[0xA4] = ImmKind::Byte; // SHLD imm8
    t[0xAC] = ImmKind::Byte; // SHRD imm8
    t[0xBA] = ImmKind::Byte; // group 8 BT imm8
    t[0xC2] = ImmKind::Byte; // CMPPS
    t[0xC4] = ImmKind::Byte; // PINSRW
    t[0xC5] = ImmKind::Byte; // PEXTRW
    t[0xC6] = ImmKind::Byte; // SHUFPS
    t
}

/// `[escape class][opcode byte]` -> immediate size class. Same row layout
/// as [`USES_MODRM`]; the 0F 38 map never carries an immediate and the
/// 0F 3A map always carries one byte, both handled by the opcode state.
pub const IMMEDIATE_KIND: [[ImmKind; 256]; 2] = [one_byte_imm(), two_byte_imm()];

// Rows: 2, 4, 8 byte operand (or address) size attribute.
const SIZE_BY_KIND: [[u8; NUM_IMM_KINDS]; 3] = [
    [0, 1, 2, 2, 2, 4, 2, 3],
    [0, 1, 2, 4, 4, 6, 4, 3],
    [0, 1, 2, 8, 4, 6, 8, 3],
];

#[inline]
fn size_row(bytes: u8) -> usize {
    match bytes {
        2 => 0,
        4 => 1,
        _ => 2,
    }
}

/// Resolve an immediate size class to a byte count under the current size
/// attributes.
pub fn imm_size(kind: ImmKind, op_size: u8, addr_size: u8) -> u8 {
    match kind {
        ImmKind::Offset => SIZE_BY_KIND[size_row(addr_size)][ImmKind::Offset as usize],
        k => SIZE_BY_KIND[size_row(op_size)][k as usize],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_classes() {
        assert_eq!(PREFIX_CLASS[0x66], PrefixClass::OpSize);
        assert_eq!(PREFIX_CLASS[0x67], PrefixClass::AddrSize);
        assert_eq!(PREFIX_CLASS[0xF0], PrefixClass::Lock);
        assert_eq!(PREFIX_CLASS[0x2E], PrefixClass::Seg(SegReg::Cs));
        assert_eq!(PREFIX_CLASS[0x40], PrefixClass::Rex);
        assert_eq!(PREFIX_CLASS[0x4F], PrefixClass::Rex);
        assert_eq!(PREFIX_CLASS[0x90], PrefixClass::None);
    }

    #[test]
    fn modrm_map_spot_checks() {
        assert!(USES_MODRM[0][0x00]); // ADD r/m8, r8
        assert!(USES_MODRM[0][0x89]); // MOV r/m, r
        assert!(USES_MODRM[0][0x8D]); // LEA
        assert!(USES_MODRM[0][0xFF]); // group 5
        assert!(!USES_MODRM[0][0x90]); // NOP
        assert!(!USES_MODRM[0][0xB0]); // MOV r8, imm8
        assert!(!USES_MODRM[0][0xC3]); // RET
        assert!(USES_MODRM[1][0xB6]); // MOVZX
        assert!(USES_MODRM[1][0x40]); // CMOVO
        assert!(!USES_MODRM[1][0x77]); // EMMS
        assert!(!USES_MODRM[1][0x84]); // Jcc rel
        assert!(!USES_MODRM[1][0xC8]); // BSWAP
    }

    #[test]
    fn immediate_map_spot_checks() {
        assert_eq!(IMMEDIATE_KIND[0][0x05], ImmKind::ZWord);
        assert_eq!(IMMEDIATE_KIND[0][0xB0], ImmKind::Byte);
        assert_eq!(IMMEDIATE_KIND[0][0xB8], ImmKind::VWord);
        assert_eq!(IMMEDIATE_KIND[0][0xC2], ImmKind::Word);
        assert_eq!(IMMEDIATE_KIND[0][0xC8], ImmKind::Enter);
        assert_eq!(IMMEDIATE_KIND[0][0xA1], ImmKind::Offset);
        assert_eq!(IMMEDIATE_KIND[0][0xF6], ImmKind::None);
        assert_eq!(IMMEDIATE_KIND[1][0x84], ImmKind::ZWord);
        assert_eq!(IMMEDIATE_KIND[1][0xBA], ImmKind::Byte);
    }

    #[test]
    fn size_resolution() {
        assert_eq!(imm_size(ImmKind::None, 4, 4), 0);
        assert_eq!(imm_size(ImmKind::Byte, 8, 8), 1);
        assert_eq!(imm_size(ImmKind::VWord, 2, 4), 2);
        assert_eq!(imm_size(ImmKind::VWord, 8, 8), 8);
        assert_eq!(imm_size(ImmKind::ZWord, 8, 8), 4);
        assert_eq!(imm_size(ImmKind::Offset, 4, 8), 8);
        assert_eq!(imm_size(ImmKind::Pointer, 2, 2), 4);
        assert_eq!(imm_size(ImmKind::Enter, 4, 4), 3);
    }
}
