use tracing::trace;

use crate::chunk::{chunk_word, FetchChunk, PcState, CHUNK_BYTES};
use crate::emi::{Escape, ExtMachInst, LegacyPrefixes, ModRm, Rex, Sib};
use crate::mode::{MachineState, Submode};
use crate::tables::{imm_size, ImmKind, PrefixClass, IMMEDIATE_KIND, PREFIX_CLASS, USES_MODRM};

/// Architectural limit on total instruction length; a longer encoding is
/// malformed.
const MAX_INST_BYTES: u64 = 15;

/// Raised when the byte stream cannot encode an instruction. Chunk
/// exhaustion is not a fault; it is reported through
/// [`Predecoder::need_more_bytes`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFault {
    #[error("malformed instruction encoding at {pc:#x}")]
    Malformed { pc: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Prefix,
    Opcode,
    ModRm,
    Sib,
    Displacement,
    Immediate,
    // Reachable only from a malformed encoding; surfaced as a fault.
    Error,
}

#[inline]
fn sext(v: u64, bits: u32) -> i64 {
    let s = 64 - bits;
    ((v << s) as i64) >> s
}

/// Incremental x86 predecoder. One instance per hardware thread; owns the
/// current fetch chunk, its cursor and the in-progress instruction record.
/// The byte source pushes chunks in with [`more_bytes`]; decode suspends
/// when the chunk runs dry and resumes exactly where it left off when the
/// next chunk arrives.
///
/// [`more_bytes`]: Predecoder::more_bytes
#[derive(Debug, Clone)]
pub struct Predecoder {
    machine: MachineState,
    chunk: FetchChunk,
    /// Address of byte 0 of the current chunk.
    base_pc: u64,
    /// Address at which the in-progress instruction began.
    orig_pc: u64,
    /// Cursor into the chunk; `offset == CHUNK_BYTES` means exhausted.
    offset: usize,
    emi: ExtMachInst,
    out_of_bytes: bool,
    emi_ready: bool,
    displacement_size: u8,
    immediate_size: u8,
    /// Bytes collected so far of whichever variable-width field is being
    /// accumulated (displacement or immediate).
    immediate_collected: u8,
    state: State,
}

impl Predecoder {
    pub fn new(machine: MachineState) -> Self {
        Self {
            machine,
            chunk: [0; CHUNK_BYTES],
            base_pc: 0,
            orig_pc: 0,
            offset: 0,
            emi: ExtMachInst::new(machine.operating_mode()),
            out_of_bytes: true,
            emi_ready: false,
            displacement_size: 0,
            immediate_size: 0,
            immediate_collected: 0,
            state: State::Start,
        }
    }

    pub fn machine(&self) -> &MachineState {
        &self.machine
    }

    pub fn set_machine(&mut self, machine: MachineState) {
        self.machine = machine;
    }

    /// Abandon any instruction in flight and re-enter the start state.
    /// Used when control flow redirects decode (e.g. a taken branch).
    pub fn reset(&mut self) {
        self.state = State::Start;
    }

    /// Same as [`reset`]; the previous record is accepted for API symmetry
    /// with callers that track it but is not consulted.
    ///
    /// [`reset`]: Predecoder::reset
    pub fn reset_from(&mut self, _prev: &ExtMachInst) {
        self.reset();
    }

    /// Supply a new chunk of bytes fetched from `fetch_pc`. The cursor is
    /// placed on the byte `pc` refers to when the chunk begins at or before
    /// it, else at the chunk start.
    pub fn more_bytes(
        &mut self,
        pc: &PcState,
        fetch_pc: u64,
        chunk: FetchChunk,
    ) -> Result<(), DecodeFault> {
        trace!(fetch_pc, "getting more bytes");
        self.base_pc = fetch_pc;
        self.offset = if fetch_pc >= pc.addr() {
            0
        } else {
            (pc.addr() - fetch_pc) as usize
        };
        debug_assert!(self.offset < CHUNK_BYTES);
        self.chunk = chunk;
        self.out_of_bytes = false;
        self.process()
    }

    /// True iff the chunk ran out before an instruction completed; the
    /// caller must supply another chunk to make progress.
    pub fn need_more_bytes(&self) -> bool {
        self.out_of_bytes
    }

    /// True iff a complete instruction record awaits retrieval. Repeated
    /// queries are idempotent; only [`take_inst`] clears it.
    ///
    /// [`take_inst`]: Predecoder::take_inst
    pub fn inst_ready(&self) -> bool {
        self.emi_ready
    }

    /// Byte length of the instruction decoded so far (final once ready).
    pub fn inst_size(&self) -> u64 {
        self.base_pc + self.offset as u64 - self.orig_pc
    }

    /// One-shot retrieval of the completed record: `Some` exactly once per
    /// decoded instruction, `None` whenever no instruction is ready. Stamps
    /// the instruction size and next address into `next_pc` unless a size
    /// was already set.
    pub fn take_inst(&mut self, next_pc: &mut PcState) -> Option<&ExtMachInst> {
        if !self.emi_ready {
            return None;
        }
        self.emi_ready = false;
        if next_pc.size().is_none() {
            let size = self.inst_size();
            trace!(
                base_pc = self.base_pc,
                offset = self.offset,
                orig_pc = self.orig_pc,
                size,
                "calculating the instruction size"
            );
            next_pc.stamp(size as u8);
        }
        Some(&self.emi)
    }

    #[inline]
    fn next_byte(&self) -> u8 {
        self.chunk[self.offset]
    }

    #[inline]
    fn consume_byte(&mut self) {
        self.consume_bytes(1);
    }

    #[inline]
    fn consume_bytes(&mut self, n: usize) {
        self.offset += n;
        debug_assert!(self.offset <= CHUNK_BYTES);
        if self.offset == CHUNK_BYTES {
            self.out_of_bytes = true;
        }
    }

    /// Shared variable-width accumulator for displacement and immediate
    /// fields. Pulls `min(size - collected, remaining)` bytes out of the
    /// chunk, ORs them into `current` at the collected bit position and
    /// advances the cursor; resumable across chunk boundaries.
    fn collect_field(&mut self, size: u8, current: u64) -> u64 {
        let to_get = ((size - self.immediate_collected) as usize).min(CHUNK_BYTES - self.offset);
        let mut partial = chunk_word(&self.chunk) >> (self.offset * 8);
        if to_get < 8 {
            partial &= (1u64 << (to_get * 8)) - 1;
        }
        let updated = current | (partial << (self.immediate_collected as usize * 8));
        self.immediate_collected += to_get as u8;
        self.consume_bytes(to_get);
        updated
    }

    /// Drive the state machine until an instruction completes or the chunk
    /// is exhausted, whichever comes first.
    pub fn process(&mut self) -> Result<(), DecodeFault> {
        while !self.out_of_bytes && !self.emi_ready {
            let byte = self.next_byte();
            self.state = match self.state {
                State::Start => self.do_start(),
                State::Prefix => self.do_prefix(byte),
                State::Opcode => self.do_opcode(byte),
                State::ModRm => self.do_modrm(byte),
                State::Sib => self.do_sib(byte),
                State::Displacement => self.do_displacement(),
                State::Immediate => self.do_immediate(),
                State::Error => State::Error,
            };
            if self.state == State::Error {
                return Err(DecodeFault::Malformed { pc: self.orig_pc });
            }
        }
        Ok(())
    }

    // Snapshot the instruction start and clear every record field the new
    // instruction can reach. Consumes no byte.
    fn do_start(&mut self) -> State {
        self.orig_pc = self.base_pc + self.offset as u64;
        trace!(pc = self.orig_pc, "starting new instruction");
        self.emi.restart(self.machine.operating_mode());
        self.displacement_size = 0;
        self.immediate_size = 0;
        self.immediate_collected = 0;
        State::Prefix
    }

    fn do_prefix(&mut self, byte: u8) -> State {
        // An unbounded prefix run would exceed the architectural length
        // limit; that encoding can never complete.
        if self.inst_size() >= MAX_INST_BYTES {
            return State::Error;
        }
        let mut class = PREFIX_CLASS[byte as usize];
        if class == PrefixClass::Rex && self.emi.mode.submode != Submode::SixtyFourBit {
            class = PrefixClass::None;
        }
        match class {
            PrefixClass::Seg(seg) => self.emi.seg_override = Some(seg),
            PrefixClass::OpSize => self.emi.legacy |= LegacyPrefixes::OP_SIZE,
            PrefixClass::AddrSize => self.emi.legacy |= LegacyPrefixes::ADDR_SIZE,
            PrefixClass::Lock => self.emi.legacy |= LegacyPrefixes::LOCK,
            PrefixClass::Rep => self.emi.legacy |= LegacyPrefixes::REP,
            PrefixClass::Repne => self.emi.legacy |= LegacyPrefixes::REPNE,
            PrefixClass::Rex => self.emi.rex = Rex(byte),
            // Not a prefix: leave the byte for the opcode state.
            PrefixClass::None => return State::Opcode,
        }
        trace!(byte, "found prefix");
        self.consume_byte();
        State::Prefix
    }

    fn do_opcode(&mut self, byte: u8) -> State {
        self.consume_byte();
        // Escape bytes select the wider opcode maps.
        match (self.emi.opcode.escape, byte) {
            (Escape::OneByte, 0x0F) => {
                self.emi.opcode.escape = Escape::TwoByte;
                return State::Opcode;
            }
            (Escape::TwoByte, 0x38) => {
                self.emi.opcode.escape = Escape::ThreeByte38;
                return State::Opcode;
            }
            (Escape::TwoByte, 0x3A) => {
                self.emi.opcode.escape = Escape::ThreeByte3A;
                return State::Opcode;
            }
            _ => {}
        }
        self.emi.opcode.op = byte;
        trace!(escape = ?self.emi.opcode.escape, opcode = byte, "found opcode");

        // Resolve the size attributes now that all prefixes are known.
        let log_op = if self.emi.rex.w() {
            3
        } else if self.emi.legacy.contains(LegacyPrefixes::OP_SIZE) {
            self.machine.alt_op
        } else {
            self.machine.def_op
        };
        self.emi.op_size = 1 << log_op;
        let log_addr = if self.emi.legacy.contains(LegacyPrefixes::ADDR_SIZE) {
            self.machine.alt_addr
        } else {
            self.machine.def_addr
        };
        self.emi.addr_size = 1 << log_addr;
        self.emi.stack_size = 1 << self.machine.stack;

        let (uses_modrm, kind) = match self.emi.opcode.escape {
            Escape::OneByte => (
                USES_MODRM[0][byte as usize],
                IMMEDIATE_KIND[0][byte as usize],
            ),
            Escape::TwoByte => (
                USES_MODRM[1][byte as usize],
                IMMEDIATE_KIND[1][byte as usize],
            ),
            Escape::ThreeByte38 => (true, ImmKind::None),
            Escape::ThreeByte3A => (true, ImmKind::Byte),
        };
        self.immediate_size = imm_size(kind, self.emi.op_size, self.emi.addr_size);

        if uses_modrm {
            State::ModRm
        } else if self.immediate_size > 0 {
            State::Immediate
        } else {
            self.finish_inst()
        }
    }

    fn do_modrm(&mut self, byte: u8) -> State {
        let modrm = ModRm(byte);
        self.emi.modrm = modrm;
        trace!(byte, "found ModRM");
        if self.emi.addr_size == 2 {
            // 16-bit addressing forms.
            self.displacement_size = match (modrm.mode(), modrm.rm()) {
                (0, 6) => 2,
                (0, _) => 0,
                (1, _) => 1,
                (2, _) => 2,
                _ => 0,
            };
        } else {
            self.displacement_size = match (modrm.mode(), modrm.rm()) {
                (0, 5) => 4,
                (0, _) => 0,
                (1, _) => 1,
                (2, _) => 4,
                _ => 0,
            };
        }
        // The TEST forms of group 3 carry an immediate the rest of the
        // group lacks.
        if self.emi.opcode.escape == Escape::OneByte && modrm.reg() & 0x6 == 0 {
            if self.emi.opcode.op == 0xF6 {
                self.immediate_size = 1;
            } else if self.emi.opcode.op == 0xF7 {
                self.immediate_size = if self.emi.op_size == 8 { 4 } else { self.emi.op_size };
            }
        }
        self.consume_byte();
        if modrm.mode() != 3 && modrm.rm() == 4 && self.emi.addr_size != 2 {
            State::Sib
        } else if self.displacement_size > 0 {
            State::Displacement
        } else if self.immediate_size > 0 {
            State::Immediate
        } else {
            self.finish_inst()
        }
    }

    fn do_sib(&mut self, byte: u8) -> State {
        let sib = Sib(byte);
        self.emi.sib = sib;
        trace!(byte, "found SIB");
        // No-base form: mod 00 with base 101 takes a 4-byte displacement.
        if self.emi.modrm.mode() == 0 && sib.base() == 5 {
            self.displacement_size = 4;
        }
        self.consume_byte();
        if self.displacement_size > 0 {
            State::Displacement
        } else if self.immediate_size > 0 {
            State::Immediate
        } else {
            self.finish_inst()
        }
    }

    fn do_displacement(&mut self) -> State {
        let raw = self.collect_field(self.displacement_size, self.emi.displacement as u64);
        self.emi.displacement = raw as i64;
        if self.immediate_collected != self.displacement_size {
            return State::Displacement;
        }
        // Sign-extend once the whole field is in hand.
        self.emi.displacement = sext(raw, self.displacement_size as u32 * 8);
        trace!(displacement = self.emi.displacement, "collected displacement");
        self.immediate_collected = 0;
        if self.immediate_size > 0 {
            State::Immediate
        } else {
            self.finish_inst()
        }
    }

    fn do_immediate(&mut self) -> State {
        let raw = self.collect_field(self.immediate_size, self.emi.immediate);
        self.emi.immediate = raw;
        if self.immediate_collected != self.immediate_size {
            return State::Immediate;
        }
        // Instructions with 64-bit operands but 32-bit immediates take the
        // immediate sign-extended.
        if self.emi.op_size == 8 && self.immediate_size == 4 {
            self.emi.immediate = sext(raw, 32) as u64;
        }
        trace!(immediate = self.emi.immediate, "collected immediate");
        self.immediate_collected = 0;
        self.finish_inst()
    }

    fn finish_inst(&mut self) -> State {
        trace!(size = self.inst_size(), "instruction ready");
        self.emi_ready = true;
        State::Start
    }
}
