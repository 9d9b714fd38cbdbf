use serde::{Deserialize, Serialize};

/// Width of one fetch chunk in bytes (the architecture word size).
pub const CHUNK_BYTES: usize = 8;

/// A fixed-width buffer of raw instruction bytes delivered by the byte
/// source. Replaced wholesale on every supply call; the predecoder reads
/// it through its own cursor.
pub type FetchChunk = [u8; CHUNK_BYTES];

/// View a chunk as a little-endian word for shift/mask field extraction.
#[inline]
pub(crate) fn chunk_word(chunk: &FetchChunk) -> u64 {
    u64::from_le_bytes(*chunk)
}

/// Caller-owned program counter state. The predecoder stamps the decoded
/// instruction's size and next address into it on retrieval, but only if
/// the size has not been set already.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcState {
    pc: u64,
    npc: u64,
    size: Option<u8>,
}

impl PcState {
    pub fn new(pc: u64) -> Self {
        Self { pc, npc: pc, size: None }
    }

    /// Address of the instruction currently being fetched/decoded.
    pub fn addr(&self) -> u64 {
        self.pc
    }

    /// Address of the following instruction; equals `addr()` until a size
    /// has been stamped.
    pub fn npc(&self) -> u64 {
        self.npc
    }

    pub fn size(&self) -> Option<u8> {
        self.size
    }

    pub(crate) fn stamp(&mut self, size: u8) {
        self.size = Some(size);
        self.npc = self.pc.wrapping_add(size as u64);
    }

    /// Step to the next instruction, clearing the stamped size.
    pub fn advance(&mut self) {
        self.pc = self.npc;
        self.size = None;
    }
}
