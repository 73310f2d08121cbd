//! Formats the per-instruction state deltas the `trace` command prints,
//! and the final-registers/flags block at the end of a run.

use strum::IntoEnumIterator;

use crate::memory::Memory;
use crate::printer;
use crate::simulator::MemEffect;
use crate::types::{Register, RegAccess};

/// A snapshot of everything the trace formatter needs to diff against,
/// taken right before an instruction executes.
pub struct Snapshot {
    registers: [u16; Register::COUNT],
}

impl Snapshot {
    pub fn capture(mem: &Memory) -> Self {
        Snapshot {
            registers: *mem.registers(),
        }
    }
}

/// Builds the ` name:0xold->0xnew` delta fragments for one instruction:
/// the memory write (if any) first, then changed registers in
/// `Register` enum order, then the flags register if it changed.
pub fn format_deltas(
    before: &Snapshot,
    after: &Memory,
    mem_effect: Option<MemEffect>,
    flags_before: &str,
) -> String {
    let mut out = String::new();

    if let Some(effect) = mem_effect {
        if effect.old != effect.new {
            out.push_str(&format!(
                " {}:0x{:x}->0x{:x}",
                printer::format_memory(effect.access),
                effect.old,
                effect.new
            ));
        }
    }

    for reg in Register::iter() {
        let old = before.registers[reg.index()];
        let new = after.reg_word(reg);
        if old != new {
            let name = printer::register_name(RegAccess::word(reg));
            out.push_str(&format!(" {}:0x{:x}->0x{:x}", name, old, new));
        }
    }

    let flags_after = after.flags.serialize();
    if flags_before != flags_after {
        out.push_str(&format!(" flags:{}->{}", flags_before, flags_after));
    }

    out
}

/// Renders the end-of-run `Final registers:`/`flags:` block.
pub fn format_final(mem: &Memory) -> String {
    let mut out = String::from("\nFinal registers:\n");
    for reg in Register::iter() {
        let val = mem.reg_word(reg);
        if val != 0 {
            let name = printer::register_name(RegAccess::word(reg));
            out.push_str(&format!("      {}: 0x{:04x} ({})\n", name, val, val));
        }
    }
    let flags = mem.flags.serialize();
    if !flags.is_empty() {
        out.push_str(&format!("   flags: {}\n", flags));
    }
    out
}
