pub mod chunk;
pub mod emi;
pub mod mode;
pub mod predecoder;
pub mod tables;

pub use chunk::{FetchChunk, PcState, CHUNK_BYTES};
pub use emi::{Escape, ExtMachInst, LegacyPrefixes, ModRm, Opcode, Rex, SegReg, Sib};
pub use mode::{MachineState, Mode, OperatingMode, Submode};
pub use predecoder::{DecodeFault, Predecoder};
