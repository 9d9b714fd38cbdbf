use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use x86_predecode_rs::{FetchChunk, MachineState, PcState, Predecoder, CHUNK_BYTES};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Long64,
    Prot32,
    Real16,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Walk a flat binary through the x86 predecoder, printing instruction boundaries"
)]
struct Opts {
    /// Load address of the binary in target address space
    #[arg(short, long)]
    base: Option<u64>,
    /// Decode mode
    #[arg(long, value_enum, default_value_t = ModeArg::Long64)]
    mode: ModeArg,
    #[arg(value_name = "BINFILE")]
    input: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let bytes = std::fs::read(&opts.input)?;
    let base = opts.base.unwrap_or(0);
    let machine = match opts.mode {
        ModeArg::Long64 => MachineState::long64(),
        ModeArg::Prot32 => MachineState::protected32(),
        ModeArg::Real16 => MachineState::real16(),
    };

    let mut pre = Predecoder::new(machine);
    let mut pc = PcState::new(base);
    let end = base + bytes.len() as u64;
    let mask = !(CHUNK_BYTES as u64 - 1);

    'walk: while pc.addr() < end {
        // Feed aligned chunks until the instruction completes. The first
        // chunk of each instruction may begin before it; the cursor is
        // placed from the pc.
        let mut fetch_pc = pc.addr() & mask;
        while !pre.inst_ready() {
            if fetch_pc >= end {
                eprintln!("{:#010x}: truncated instruction at end of input", pc.addr());
                break 'walk;
            }
            let mut chunk: FetchChunk = [0; CHUNK_BYTES];
            for (i, slot) in chunk.iter_mut().enumerate() {
                let a = fetch_pc + i as u64;
                if a >= base && a < end {
                    *slot = bytes[(a - base) as usize];
                }
            }
            if let Err(fault) = pre.more_bytes(&pc, fetch_pc, chunk) {
                eprintln!("FAULT: {fault}");
                break 'walk;
            }
            if pre.need_more_bytes() {
                fetch_pc += CHUNK_BYTES as u64;
            }
        }
        let emi = match pre.take_inst(&mut pc) {
            Some(emi) => *emi,
            None => break 'walk,
        };
        let len = pc.size().unwrap_or(0);
        println!(
            "{:#010x}: len {:2}  esc {:?} op {:#04x} modrm {:#04x} disp {:#x} imm {:#x}",
            pc.addr(),
            len,
            emi.opcode.escape,
            emi.opcode.op,
            emi.modrm.0,
            emi.displacement,
            emi.immediate
        );
        pc.advance();
    }

    Ok(())
}
