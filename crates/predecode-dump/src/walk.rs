use serde::Serialize;

use x86_predecode_rs::{
    Escape, ExtMachInst, FetchChunk, MachineState, PcState, Predecoder, CHUNK_BYTES,
};

use crate::model::{is_mapped, read_u8, Image};

#[derive(Debug, Clone, Serialize)]
pub struct InsnOut {
    pub pc: u64,
    pub len: u8,
    pub bytes: Vec<u8>,
    pub record: ExtMachInst,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkReport {
    pub start: u64,
    pub end: u64,
    pub insns: Vec<InsnOut>,
    /// Set when the walk stopped on unmapped bytes before reaching `end`.
    pub truncated: bool,
    /// Address of a malformed encoding, if one stopped the walk.
    pub faulted: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub insns: usize,
    pub bytes: u64,
    pub one_byte: usize,
    pub two_byte: usize,
    pub three_byte: usize,
    pub with_modrm: usize,
    pub with_prefixes: usize,
}

/// Drive the predecoder over `[start, end)` of the image, collecting one
/// structural record per instruction. Chunks are aligned 8-byte windows;
/// instructions may straddle them freely.
pub fn walk_range(
    img: &Image,
    machine: MachineState,
    start: u64,
    end: u64,
    max_insns: usize,
) -> WalkReport {
    let mut report = WalkReport {
        start,
        end,
        insns: Vec::new(),
        truncated: false,
        faulted: None,
    };
    let mut pre = Predecoder::new(machine);
    let mut pc = PcState::new(start);
    let mask = !(CHUNK_BYTES as u64 - 1);

    'walk: while pc.addr() < end && report.insns.len() < max_insns {
        let mut fetch_pc = pc.addr() & mask;
        while !pre.inst_ready() {
            let Some(chunk) = chunk_at(img, fetch_pc, pc.addr()) else {
                report.truncated = true;
                break 'walk;
            };
            if pre.more_bytes(&pc, fetch_pc, chunk).is_err() {
                report.faulted = Some(pc.addr());
                break 'walk;
            }
            if pre.need_more_bytes() {
                fetch_pc += CHUNK_BYTES as u64;
            }
        }
        let Some(&record) = pre.take_inst(&mut pc) else {
            break;
        };
        let len = pc.size().unwrap_or(0);
        let bytes = (0..len as u64)
            .map_while(|i| read_u8(img, pc.addr() + i))
            .collect();
        report.insns.push(InsnOut { pc: pc.addr(), len, bytes, record });
        pc.advance();
    }
    report
}

pub fn summarize(report: &WalkReport) -> Summary {
    let mut s = Summary {
        insns: report.insns.len(),
        bytes: report.insns.iter().map(|i| i.len as u64).sum(),
        one_byte: 0,
        two_byte: 0,
        three_byte: 0,
        with_modrm: 0,
        with_prefixes: 0,
    };
    for i in &report.insns {
        match i.record.opcode.escape {
            Escape::OneByte => s.one_byte += 1,
            Escape::TwoByte => s.two_byte += 1,
            Escape::ThreeByte38 | Escape::ThreeByte3A => s.three_byte += 1,
        }
        if i.record.modrm.0 != 0 {
            s.with_modrm += 1;
        }
        if !i.record.legacy.is_empty() || i.record.seg_override.is_some() || i.record.rex.present()
        {
            s.with_prefixes += 1;
        }
    }
    s
}

// A chunk is usable as long as the first byte the decode still needs is
// mapped. An aligned window may start below an unaligned segment base, and
// a partial window at the end of a segment is zero-padded, which at worst
// decodes trailing garbage the caller asked about anyway.
fn chunk_at(img: &Image, fetch_pc: u64, pc: u64) -> Option<FetchChunk> {
    if !is_mapped(img, fetch_pc.max(pc)) {
        return None;
    }
    let mut chunk: FetchChunk = [0; CHUNK_BYTES];
    for (i, slot) in chunk.iter_mut().enumerate() {
        if let Some(b) = read_u8(img, fetch_pc + i as u64) {
            *slot = b;
        }
    }
    Some(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Segment;

    fn image(base: u64, bytes: &[u8]) -> Image {
        Image {
            segments: vec![Segment {
                name: "s".into(),
                base,
                bytes: bytes.to_vec(),
                perms: "r-x",
                kind: "raw",
            }],
        }
    }

    #[test]
    fn walk_reports_lengths() {
        // nop; mov al, 5; ret
        let img = image(0x1000, &[0x90, 0xB0, 0x05, 0xC3]);
        let r = walk_range(&img, MachineState::long64(), 0x1000, 0x1004, 100);
        let lens: Vec<u8> = r.insns.iter().map(|i| i.len).collect();
        assert_eq!(lens, vec![1, 2, 1]);
        assert_eq!(r.insns[1].record.immediate, 5);
        assert!(!r.truncated);
        assert!(r.faulted.is_none());
    }

    #[test]
    fn walk_summary_counts_escapes() {
        // movzx eax, al (0F B6 C0); nop
        let img = image(0, &[0x0F, 0xB6, 0xC0, 0x90]);
        let r = walk_range(&img, MachineState::long64(), 0, 4, 100);
        let s = summarize(&r);
        assert_eq!(s.insns, 2);
        assert_eq!(s.two_byte, 1);
        assert_eq!(s.one_byte, 1);
        assert_eq!(s.with_modrm, 1);
    }

    #[test]
    fn walk_handles_unaligned_base() {
        // The first aligned window starts below the segment; its unmapped
        // head must be padded, not treated as end of image.
        let img = image(0x1002, &[0x90, 0xB0, 0x05, 0xC3]);
        let r = walk_range(&img, MachineState::long64(), 0x1002, 0x1006, 100);
        assert!(!r.truncated);
        let lens: Vec<u8> = r.insns.iter().map(|i| i.len).collect();
        assert_eq!(lens, vec![1, 2, 1]);
        assert_eq!(r.insns[0].pc, 0x1002);
        assert_eq!(r.insns[1].record.immediate, 5);
    }

    #[test]
    fn walk_truncates_past_segment_end() {
        // An instruction whose tail needs the next, unmapped window stops
        // the walk with a truncation marker.
        let img = image(0, &[0x48, 0xB8, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let r = walk_range(&img, MachineState::long64(), 0, 16, 100);
        assert!(r.truncated);
        assert!(r.insns.is_empty());
    }

    #[test]
    fn walk_stops_on_prefix_runaway() {
        let img = image(0, &[0x66; 32]);
        let r = walk_range(&img, MachineState::long64(), 0, 32, 100);
        assert_eq!(r.faulted, Some(0));
        assert!(r.insns.is_empty());
    }
}
