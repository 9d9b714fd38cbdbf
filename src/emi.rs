use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::mode::OperatingMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegReg {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LegacyPrefixes: u8 {
        const OP_SIZE = 1 << 0; // 0x66
        const ADDR_SIZE = 1 << 1; // 0x67
        const LOCK = 1 << 2; // 0xF0
        const REP = 1 << 3; // 0xF3
        const REPNE = 1 << 4; // 0xF2
    }
}

/// The raw REX byte; zero when absent or outside 64-bit submode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rex(pub u8);

impl Rex {
    pub fn present(&self) -> bool {
        self.0 != 0
    }
    pub fn w(&self) -> bool {
        self.0 & 0x08 != 0
    }
    pub fn r(&self) -> bool {
        self.0 & 0x04 != 0
    }
    pub fn x(&self) -> bool {
        self.0 & 0x02 != 0
    }
    pub fn b(&self) -> bool {
        self.0 & 0x01 != 0
    }
}

/// Which opcode map the final opcode byte was found in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Escape {
    #[default]
    OneByte,
    TwoByte, // 0F
    ThreeByte38, // 0F 38
    ThreeByte3A, // 0F 3A
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opcode {
    pub escape: Escape,
    pub op: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModRm(pub u8);

impl ModRm {
    pub fn mode(&self) -> u8 {
        self.0 >> 6
    }
    pub fn reg(&self) -> u8 {
        (self.0 >> 3) & 0x7
    }
    pub fn rm(&self) -> u8 {
        self.0 & 0x7
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sib(pub u8);

impl Sib {
    pub fn scale(&self) -> u8 {
        self.0 >> 6
    }
    pub fn index(&self) -> u8 {
        (self.0 >> 3) & 0x7
    }
    pub fn base(&self) -> u8 {
        self.0 & 0x7
    }
}

/// The extended machine instruction: the fully structured decode result
/// handed to later pipeline stages. One record per predecoder instance,
/// reused between instructions; the fields a new instruction can reach are
/// re-zeroed when decode of that instruction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtMachInst {
    pub mode: OperatingMode,
    pub legacy: LegacyPrefixes,
    pub seg_override: Option<SegReg>,
    pub rex: Rex,
    pub opcode: Opcode,
    pub modrm: ModRm,
    pub sib: Sib,
    /// Sign-extended once the whole field has been collected.
    pub displacement: i64,
    pub immediate: u64,
    pub op_size: u8,
    pub addr_size: u8,
    pub stack_size: u8,
}

impl ExtMachInst {
    pub fn new(mode: OperatingMode) -> Self {
        Self {
            mode,
            legacy: LegacyPrefixes::empty(),
            seg_override: None,
            rex: Rex(0),
            opcode: Opcode::default(),
            modrm: ModRm(0),
            sib: Sib(0),
            displacement: 0,
            immediate: 0,
            op_size: 0,
            addr_size: 0,
            stack_size: 0,
        }
    }

    /// Reset every field a fresh instruction can reach, keeping the
    /// mode/submode tag in sync with the supplied context.
    pub(crate) fn restart(&mut self, mode: OperatingMode) {
        *self = Self::new(mode);
    }
}
