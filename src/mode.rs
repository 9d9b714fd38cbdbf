use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Long,
    Legacy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Submode {
    #[default]
    SixtyFourBit,
    Compat,
    Protected,
    Real,
}

/// The mode/submode tag carried by every decoded instruction record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingMode {
    pub mode: Mode,
    pub submode: Submode,
}

/// Decode-mode configuration owned by the execution context and consulted,
/// never mutated, by the predecoder. The `def_*`/`alt_*` fields are log2
/// byte widths: the default operand/address size of the current code
/// segment and the size selected when the corresponding override prefix is
/// present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState {
    pub mode: Mode,
    pub submode: Submode,
    pub def_op: u8,
    pub alt_op: u8,
    pub def_addr: u8,
    pub alt_addr: u8,
    pub stack: u8,
}

impl MachineState {
    /// 64-bit long mode: 32-bit default operands, 64-bit addresses.
    pub fn long64() -> Self {
        Self {
            mode: Mode::Long,
            submode: Submode::SixtyFourBit,
            def_op: 2,
            alt_op: 1,
            def_addr: 3,
            alt_addr: 2,
            stack: 3,
        }
    }

    /// Legacy protected mode with a 32-bit code segment (CS.D set).
    pub fn protected32() -> Self {
        Self {
            mode: Mode::Legacy,
            submode: Submode::Protected,
            def_op: 2,
            alt_op: 1,
            def_addr: 2,
            alt_addr: 1,
            stack: 2,
        }
    }

    /// Real mode / 16-bit segments: overrides select the 32-bit sizes.
    pub fn real16() -> Self {
        Self {
            mode: Mode::Legacy,
            submode: Submode::Real,
            def_op: 1,
            alt_op: 2,
            def_addr: 1,
            alt_addr: 2,
            stack: 1,
        }
    }

    pub fn operating_mode(&self) -> OperatingMode {
        OperatingMode { mode: self.mode, submode: self.submode }
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::long64()
    }
}
