//! An 8086 instruction decoder and functional simulator: the declarative
//! encoding table and matcher, the decoder, the NASM-syntax printer, and
//! the simulator that drives a small flat-memory machine. `main.rs` is a
//! thin CLI shell over this library.

pub mod decode;
pub mod encoding;
pub mod error;
pub mod memory;
pub mod printer;
pub mod reader;
pub mod simulator;
pub mod trace;
pub mod types;

use std::io::Write;

use anyhow::Result;

use error::CliError;
use memory::Memory;
use types::{Opcode, Register};

/// Finds and decodes the next instruction at the machine's current `IP`,
/// mirroring `sim86.c`'s `parse_opcode`: an unmatched opcode is reported
/// with the offending byte and is fatal, not recoverable.
pub fn parse_opcode(mem: &Memory) -> Result<Option<(Opcode, u8)>, CliError> {
    if mem.code_ended() {
        return Ok(None);
    }
    let code = mem.code_ptr();
    let encoding = encoding::find(code)?.ok_or(CliError::UnknownOpcode(code[0]))?;
    let (opcode, len) = decode::decode(encoding, code)?;
    Ok(Some((opcode, len)))
}

/// Runs the `decompile` command: prints one NASM line per instruction
/// without executing anything.
pub fn decompile(mem: &mut Memory, out: &mut impl Write) -> Result<()> {
    writeln!(out, "bits 16\n")?;
    while let Some((opcode, len)) = parse_opcode(mem)? {
        writeln!(out, "{}", opcode)?;
        let ip = mem.reg_word(Register::Ip);
        mem.set_reg_word(Register::Ip, ip + len as u16);
    }
    Ok(())
}

/// Runs the `run`/`trace` commands: executes every instruction against
/// `mem`, optionally emitting a per-instruction delta line plus a final
/// registers/flags block to `trace_out`.
pub fn run(mem: &mut Memory, mut trace_out: Option<&mut dyn Write>) -> Result<()> {
    while let Some((opcode, _)) = parse_opcode(mem)? {
        let snapshot = if trace_out.is_some() {
            Some(trace::Snapshot::capture(mem))
        } else {
            None
        };
        let flags_before = mem.flags.serialize();

        log::debug!("stepping {:?}", opcode.ty);
        let effect = simulator::step(&opcode, mem);

        if let (Some(out), Some(snapshot)) = (trace_out.as_deref_mut(), snapshot) {
            let deltas = trace::format_deltas(&snapshot, mem, effect, &flags_before);
            writeln!(out, "{} ;{}", opcode, deltas)?;
        }
    }

    if let Some(out) = trace_out.as_deref_mut() {
        write!(out, "{}", trace::format_final(mem))?;
    }

    Ok(())
}
