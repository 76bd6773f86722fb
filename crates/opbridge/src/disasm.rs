//! Human-readable listings of code-object trees.
//!
//! The listing follows the host runtime's `dis` layout: source line, jump-target marker,
//! offset, mnemonic, operand and an interpretation of the operand. Nested code objects are
//! listed after their parent, each under a `Disassembly of ...` heading.

use std::fmt::{self, Write as _};

use crate::{
    code::{CodeObject, Constant},
    opcode::OpcodeTable,
};

/// Comparison operators indexed by the `COMPARE_OP` operand.
const COMPARE_OPS: &[&str] = &[
    "<",
    "<=",
    "==",
    "!=",
    ">",
    ">=",
    "in",
    "not in",
    "is",
    "is not",
    "exception match",
    "BAD",
];

/// How an instruction's operand is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperandKind {
    Const,
    Name,
    Local,
    Free,
    Compare,
    RelativeJump,
    AbsoluteJump,
    Plain,
}

impl OperandKind {
    fn of(mnemonic: &str) -> Self {
        match mnemonic {
            "LOAD_CONST" => Self::Const,
            "STORE_NAME" | "DELETE_NAME" | "STORE_ATTR" | "DELETE_ATTR" | "STORE_GLOBAL" | "DELETE_GLOBAL"
            | "LOAD_NAME" | "LOAD_ATTR" | "IMPORT_NAME" | "IMPORT_FROM" | "LOAD_GLOBAL" | "LOAD_METHOD" => {
                Self::Name
            }
            "LOAD_FAST" | "STORE_FAST" | "DELETE_FAST" => Self::Local,
            "LOAD_CLOSURE" | "LOAD_DEREF" | "STORE_DEREF" | "DELETE_DEREF" | "LOAD_CLASSDEREF" => Self::Free,
            "COMPARE_OP" => Self::Compare,
            "FOR_ITER" | "JUMP_FORWARD" | "SETUP_LOOP" | "SETUP_EXCEPT" | "SETUP_FINALLY" | "SETUP_WITH"
            | "SETUP_ASYNC_WITH" => Self::RelativeJump,
            "JUMP_ABSOLUTE" | "POP_JUMP_IF_FALSE" | "POP_JUMP_IF_TRUE" | "JUMP_IF_FALSE_OR_POP"
            | "JUMP_IF_TRUE_OR_POP" | "CONTINUE_LOOP" => Self::AbsoluteJump,
            _ => Self::Plain,
        }
    }
}

/// One decoded wordcode instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Byte offset of the instruction in the code object's bytecode.
    pub offset: usize,
    pub opcode: u8,
    /// Operand including any `EXTENDED_ARG` prefixes; `None` below `HAVE_ARGUMENT`.
    pub arg: Option<u32>,
    /// Source line, set on the first instruction of each line.
    pub starts_line: Option<i64>,
    pub is_jump_target: bool,
}

/// Decodes the line table into `(offset, line)` pairs, one per line change.
///
/// Each table entry is a byte-offset increment followed by a signed line increment, both
/// relative to the previous entry and starting at `first_line`.
#[must_use]
pub fn line_starts(code: &CodeObject) -> Vec<(usize, i64)> {
    let mut starts = Vec::new();
    let mut last_line = None;
    let mut line = i64::from(code.first_line);
    let mut addr = 0usize;
    for pair in code.line_table.chunks_exact(2) {
        let byte_incr = pair[0];
        let line_incr = i8::from_le_bytes([pair[1]]);
        if byte_incr != 0 {
            if last_line != Some(line) {
                starts.push((addr, line));
                last_line = Some(line);
            }
            addr += usize::from(byte_incr);
        }
        line += i64::from(line_incr);
    }
    if last_line != Some(line) {
        starts.push((addr, line));
    }
    starts
}

/// Decodes the wordcode of `code` against `table`.
#[must_use]
pub fn instructions(code: &CodeObject, table: &OpcodeTable) -> Vec<Instruction> {
    let extended_arg = table.code_of("EXTENDED_ARG");
    let starts = line_starts(code);
    let mut next_start = starts.iter().peekable();
    let mut decoded = Vec::with_capacity(code.bytecode.len() / 2);
    let mut extended = 0u32;

    for (index, word) in code.bytecode.chunks(2).enumerate() {
        let offset = index * 2;
        let opcode = word[0];
        let raw = u32::from(word.get(1).copied().unwrap_or(0));
        let arg = table.has_operand(opcode).then(|| raw | extended);
        extended = if Some(opcode) == extended_arg {
            arg.unwrap_or(raw) << 8
        } else {
            0
        };

        let mut starts_line = None;
        while let Some(&&(start, line)) = next_start.peek() {
            if start > offset {
                break;
            }
            if start == offset {
                starts_line = Some(line);
            }
            next_start.next();
        }

        decoded.push(Instruction {
            offset,
            opcode,
            arg,
            starts_line,
            is_jump_target: false,
        });
    }

    let targets: Vec<usize> = decoded
        .iter()
        .filter_map(|instr| jump_target(instr, table))
        .collect();
    for instr in &mut decoded {
        instr.is_jump_target = targets.contains(&instr.offset);
    }
    decoded
}

fn jump_target(instr: &Instruction, table: &OpcodeTable) -> Option<usize> {
    let arg = usize::try_from(instr.arg?).ok()?;
    match OperandKind::of(table.mnemonic(instr.opcode)?) {
        OperandKind::RelativeJump => Some(instr.offset + 2 + arg),
        OperandKind::AbsoluteJump => Some(arg),
        _ => None,
    }
}

/// Renders the listing for the whole tree rooted at `code`.
#[must_use]
pub fn disassemble(code: &CodeObject, table: &OpcodeTable) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = Disassembly { code, table }.write_tree(&mut out);
    out
}

/// Lazily formatted listing of a code-object tree.
#[derive(Debug, Clone, Copy)]
pub struct Disassembly<'a> {
    pub code: &'a CodeObject,
    pub table: &'a OpcodeTable,
}

impl fmt::Display for Disassembly<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_tree(f)
    }
}

impl Disassembly<'_> {
    fn write_tree(&self, out: &mut impl fmt::Write) -> fmt::Result {
        self.write_code(out)?;
        for nested in self.code.nested() {
            writeln!(out)?;
            writeln!(out, "Disassembly of {}:", CodeRepr(nested))?;
            Disassembly {
                code: nested,
                table: self.table,
            }
            .write_tree(out)?;
        }
        Ok(())
    }

    fn write_code(&self, out: &mut impl fmt::Write) -> fmt::Result {
        for instr in instructions(self.code, self.table) {
            if instr.starts_line.is_some() && instr.offset > 0 {
                writeln!(out)?;
            }
            let line = instr
                .starts_line
                .map_or_else(|| "   ".to_owned(), |line| format!("{line:>3}"));
            let marker = if instr.is_jump_target { ">>" } else { "  " };
            let name = self
                .table
                .get(instr.opcode)
                .map_or_else(|| format!("<{}>", instr.opcode), |entry| entry.mnemonic.clone());

            let mut text = format!("{line}     {marker} {:>4} {name:<20}", instr.offset);
            if let Some(arg) = instr.arg {
                let _ = write!(text, " {arg:>5}");
                if let Some(repr) = self.operand_repr(&instr, arg) {
                    let _ = write!(text, " ({repr})");
                }
            }
            writeln!(out, "{}", text.trim_end())?;
        }
        Ok(())
    }

    fn operand_repr(&self, instr: &Instruction, arg: u32) -> Option<String> {
        let code = self.code;
        let index = usize::try_from(arg).ok()?;
        match OperandKind::of(self.table.mnemonic(instr.opcode)?) {
            OperandKind::Const => code.constants.get(index).map(|constant| match constant {
                Constant::Code(nested) => CodeRepr(nested).to_string(),
                Constant::Literal(literal) => literal.to_string(),
            }),
            OperandKind::Name => code.names.get(index).cloned(),
            OperandKind::Local => code.local_names.get(index).cloned(),
            OperandKind::Free => code
                .cell_vars
                .iter()
                .chain(&code.free_vars)
                .nth(index)
                .cloned(),
            OperandKind::Compare => COMPARE_OPS.get(index).map(|op| (*op).to_owned()),
            OperandKind::RelativeJump => Some(format!("to {}", instr.offset + 2 + index)),
            OperandKind::AbsoluteJump | OperandKind::Plain => None,
        }
    }
}

/// `<code object NAME, file "FILE", line N>`
struct CodeRepr<'a>(&'a CodeObject);

impl fmt::Display for CodeRepr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<code object {}, file \"{}\", line {}>",
            self.0.name, self.0.source_file, self.0.first_line
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn code_with(bytecode: &[u8], line_table: &[u8]) -> CodeObject {
        let mut code = CodeObject::new("f", "t.py");
        code.bytecode = bytecode.to_vec();
        code.line_table = line_table.to_vec();
        code.first_line = 10;
        code
    }

    #[test]
    fn line_table_decoding() {
        // line 10 at 0, line 11 at 4, line 13 at 10 (two increments folded into one offset)
        let code = code_with(&[0; 12], &[4, 1, 6, 1, 0, 1]);
        assert_eq!(line_starts(&code), vec![(0, 10), (4, 11), (10, 13)]);

        let backwards = code_with(&[0; 4], &[2, 0xff]);
        assert_eq!(line_starts(&backwards), vec![(0, 10), (2, 9)]);
    }

    #[test]
    fn extended_args_accumulate() {
        let table = OpcodeTable::cpython36();
        let extended = table.code_of("EXTENDED_ARG").unwrap();
        let load_const = table.code_of("LOAD_CONST").unwrap();
        let code = code_with(&[extended, 1, load_const, 2], &[]);

        let decoded = instructions(&code, &table);
        assert_eq!(decoded[0].arg, Some(1));
        assert_eq!(decoded[1].arg, Some(0x102));
    }

    #[test]
    fn marks_jump_targets() {
        let table = OpcodeTable::cpython36();
        let nop = table.code_of("NOP").unwrap();
        let jump_forward = table.code_of("JUMP_FORWARD").unwrap();
        let jump_absolute = table.code_of("JUMP_ABSOLUTE").unwrap();
        let code = code_with(&[jump_forward, 2, nop, 0, jump_absolute, 0], &[]);

        let targets: Vec<bool> = instructions(&code, &table)
            .iter()
            .map(|instr| instr.is_jump_target)
            .collect();
        assert_eq!(targets, vec![true, false, true]);
    }
}
