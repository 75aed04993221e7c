use itertools::Itertools;

use super::{Instruction, image::BytecodeImage};

/// Linear listing of the whole image, one instruction per line.
///
/// Bytes that do not decode are listed as `.byte` and skipped one at a
/// time. The entry instruction is marked with `>`.
pub fn disassemble(image: &BytecodeImage) -> String {
    let mut lines = vec![];
    let mut offset = 0;
    while offset < image.size() {
        let marker = if offset == image.entry_offset() { '>' } else { ' ' };
        match Instruction::decode(image, offset) {
            Ok((instr, len)) => {
                lines.push(format!("{marker}{offset:08x}: {instr}"));
                offset += len;
            }
            Err(_) => {
                let byte = image.as_bytes()[offset];
                lines.push(format!("{marker}{offset:08x}: .byte 0x{byte:02x}"));
                offset += 1;
            }
        }
    }
    lines.iter().join("\n")
}
