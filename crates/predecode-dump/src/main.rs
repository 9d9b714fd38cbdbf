use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use std::path::Path;

use x86_predecode_rs::MachineState;

mod model;
mod walk;
use model::{load_raw_bin, Image};
use walk::{summarize, walk_range};

#[derive(Parser, Debug)]
#[command(author, version, about = "x86 instruction-structure dump CLI", long_about = None)]
struct Cli {
    /// Load address for the binary in target address space
    #[arg(long, default_value_t = 0u64)]
    base: u64,
    /// Skip N bytes at start of file before loading
    #[arg(long, default_value_t = 0usize)]
    skip: usize,
    /// Input binary path
    #[arg(value_name = "BINFILE")]
    input: String,
    /// Limit bytes loaded (default: to EOF after --skip)
    #[arg(long)]
    len: Option<usize>,
    /// Decode mode
    #[arg(long, value_enum, default_value_t = ModeArg::Long64)]
    mode: ModeArg,
    /// Subcommand
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Long64,
    Prot32,
    Real16,
}

impl ModeArg {
    fn machine(self) -> MachineState {
        match self {
            ModeArg::Long64 => MachineState::long64(),
            ModeArg::Prot32 => MachineState::protected32(),
            ModeArg::Real16 => MachineState::real16(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List loaded segments (simple single-segment for raw .bin)
    Sections,
    /// Walk a range [start, end) and print per-instruction lengths
    Lengths {
        /// Start address (hex or dec)
        start: String,
        /// End address (hex or dec, exclusive)
        end: String,
        /// Show instruction bytes
        #[arg(long)]
        show_bytes: bool,
        /// Write output to file instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<String>,
    },
    /// Walk a range and dump full structural records
    Records {
        /// Start address (hex or dec)
        start: String,
        /// End address (hex or dec, exclusive)
        end: String,
        /// Maximum instructions to decode before stopping
        #[arg(long, default_value_t = 100_000usize)]
        max_insns: usize,
        /// Output format: text or json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Write output to file instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_u64(s: &str) -> Result<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Ok(u64::from_str_radix(hex, 16)?)
    } else {
        Ok(s.parse::<u64>()?)
    }
}

fn fmt_insn(i: &walk::InsnOut, show_bytes: bool) -> String {
    use std::fmt::Write as _;
    let mut line = format!("{:#010x}: len {:2}", i.pc, i.len);
    if show_bytes {
        let _ = write!(line, "  ");
        for b in &i.bytes {
            let _ = write!(line, "{b:02x} ");
        }
    }
    let r = &i.record;
    let _ = write!(
        line,
        "  esc {:?} op {:#04x} modrm {:#04x} sib {:#04x} disp {:#x} imm {:#x}",
        r.opcode.escape, r.opcode.op, r.modrm.0, r.sib.0, r.displacement, r.immediate
    );
    line
}

fn emit(out: Option<String>, buf: String) -> Result<()> {
    if let Some(path) = out {
        std::fs::write(path, buf)?;
    } else {
        print!("{buf}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let img: Image = load_raw_bin(Path::new(&cli.input), cli.base, cli.skip, cli.len)?;
    let machine = cli.mode.machine();

    match cli.cmd {
        Command::Sections => {
            println!(
                "{:<10} {:<#12} {:<#12} {:<6} {:<6}",
                "name", "start", "end", "perms", "kind"
            );
            for s in &img.segments {
                let start = s.base;
                let end = s.base + (s.bytes.len() as u64);
                println!(
                    "{:<10} {start:#010x} {end:#010x} {:<6} {:<6}",
                    s.name, s.perms, s.kind
                );
            }
        }
        Command::Lengths { start, end, show_bytes, out } => {
            let start = parse_u64(&start)?;
            let end = parse_u64(&end)?;
            anyhow::ensure!(end >= start, "end must be >= start");
            let report = walk_range(&img, machine, start, end, usize::MAX);
            let mut buf = String::new();
            use std::fmt::Write as _;
            for i in &report.insns {
                let _ = writeln!(buf, "{}", fmt_insn(i, show_bytes));
            }
            if let Some(pc) = report.faulted {
                let _ = writeln!(buf, "{pc:#010x}: <malformed>");
            } else if report.truncated {
                let _ = writeln!(buf, "<truncated>");
            }
            emit(out, buf)?;
        }
        Command::Records { start, end, max_insns, format, out } => {
            let start = parse_u64(&start)?;
            let end = parse_u64(&end)?;
            anyhow::ensure!(end >= start, "end must be >= start");
            let report = walk_range(&img, machine, start, end, max_insns);
            let summary = summarize(&report);
            match format {
                OutputFormat::Json => {
                    #[derive(serde::Serialize)]
                    struct ReportOut<'a> {
                        report: &'a walk::WalkReport,
                        summary: &'a walk::Summary,
                    }
                    let json =
                        serde_json::to_string_pretty(&ReportOut { report: &report, summary: &summary })?;
                    emit(out, json)?;
                }
                OutputFormat::Text => {
                    let mut buf = String::new();
                    use std::fmt::Write as _;
                    let _ = writeln!(buf, "Walk summary:");
                    let _ = writeln!(buf, "  insns        : {}", summary.insns);
                    let _ = writeln!(buf, "  bytes        : {}", summary.bytes);
                    let _ = writeln!(buf, "  one-byte ops : {}", summary.one_byte);
                    let _ = writeln!(buf, "  two-byte ops : {}", summary.two_byte);
                    let _ = writeln!(buf, "  three-byte   : {}", summary.three_byte);
                    let _ = writeln!(buf, "  with modrm   : {}", summary.with_modrm);
                    let _ = writeln!(buf, "  with prefixes: {}", summary.with_prefixes);
                    for i in &report.insns {
                        let _ = writeln!(buf, "{}", fmt_insn(i, true));
                    }
                    if let Some(pc) = report.faulted {
                        let _ = writeln!(buf, "{pc:#010x}: <malformed>");
                    }
                    emit(out, buf)?;
                }
            }
        }
    }

    Ok(())
}
