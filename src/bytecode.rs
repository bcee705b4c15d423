// (C) 2020 Brandon Lewis
//
// The resolved, in-memory bytecode format: a fixed, closed opcode
// enumeration plus the on-disk textual encoding described for the CLI.
//
// Every `Opcode` value occupies exactly one slot in the instruction
// stream regardless of whether it carries an immediate operand, so
// "instruction index" always means "position in `Program::code`" -
// jump and call targets are indices into that vector, never byte
// offsets.

use std::io::{BufRead, Write};

/// The fixed opcode alphabet. Each variant folds its immediate operand
/// (if any) directly into the enum payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Opcode {
    ConstInt(i64),
    /// Not emitted by the code generator today; reserved for an
    /// interned field-name literal. See `vm::Value::StrLit`.
    ConstStr(String),
    Pop,
    Dup,
    Swap,
    Add,
    Sub,
    Eq,
    Neq,
    Lt,
    Jump(usize),
    JumpIfTrue(usize),
    JumpIfFalse(usize),
    New,
    GetField(String),
    SetField(String),
    Var(usize),
    Assign,
    Call(usize),
    Ret,
    Exit,
}

impl Opcode {
    fn mnemonic(&self) -> &'static str {
        use Opcode::*;
        match self {
            ConstInt(_) => "const_int",
            ConstStr(_) => "const_str",
            Pop => "pop",
            Dup => "dup",
            Swap => "swap",
            Add => "add",
            Sub => "sub",
            Eq => "eq",
            Neq => "neq",
            Lt => "lt",
            Jump(_) => "jump",
            JumpIfTrue(_) => "jump_if_true",
            JumpIfFalse(_) => "jump_if_false",
            New => "new",
            GetField(_) => "get_field",
            SetField(_) => "set_field",
            Var(_) => "var",
            Assign => "assign",
            Call(_) => "call",
            Ret => "ret",
            Exit => "exit",
        }
    }
}

/// The program's resolved instruction stream plus its function table: an
/// ordered mapping from a function's entry instruction index to the
/// number of local slots its frame must allocate. `main`, by
/// construction of the code generator, is always the first entry and
/// therefore sits at index 0.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub code: Vec<Opcode>,
    pub functions: Vec<(usize, usize)>,
}

impl Program {
    pub fn local_count(&self, entry: usize) -> Option<usize> {
        self.functions
            .iter()
            .find(|&&(e, _)| e == entry)
            .map(|&(_, n)| n)
    }

    pub fn main_entry(&self) -> usize {
        self.functions.first().map(|&(e, _)| e).unwrap_or(0)
    }
}

const SENTINEL: &str = "---";

#[derive(Debug, thiserror::Error)]
pub enum BytecodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {0}: expected an operand after `{1}`")]
    MissingOperand(usize, String),
    #[error("line {0}: invalid integer operand `{1}`")]
    BadInt(usize, String),
    #[error("line {0}: unknown opcode mnemonic `{1}`")]
    UnknownMnemonic(usize, String),
    #[error("line {0}: malformed function-table entry `{1}`")]
    BadFunctionEntry(usize, String),
}

type Result<T> = std::result::Result<T, BytecodeError>;

/// Write the textual encoding: one token per line for the instruction
/// stream (opcode mnemonic, then its operand on the following line if
/// it has one), a sentinel line, then one `entry,local_count` line per
/// function table entry, in table order.
pub fn encode(program: &Program, out: &mut impl Write) -> Result<()> {
    for op in &program.code {
        writeln!(out, "{}", op.mnemonic())?;
        use Opcode::*;
        match op {
            ConstInt(i) => writeln!(out, "{}", i)?,
            ConstStr(s) => writeln!(out, "{}", s)?,
            Jump(t) | JumpIfTrue(t) | JumpIfFalse(t) | Call(t) => writeln!(out, "{}", t)?,
            GetField(name) | SetField(name) => writeln!(out, "{}", name)?,
            Var(slot) => writeln!(out, "{}", slot)?,
            Pop | Dup | Swap | Add | Sub | Eq | Neq | Lt | New | Assign | Ret | Exit => {}
        }
    }
    writeln!(out, "{}", SENTINEL)?;
    for (entry, count) in &program.functions {
        writeln!(out, "{},{}", entry, count)?;
    }
    Ok(())
}

/// A one-line-at-a-time cursor over the already-collected input, used so
/// that reading an opcode's operand is just "read the next line" rather
/// than threading a lexer through every match arm.
struct Cursor {
    lines: Vec<String>,
    pos: usize,
}

impl Cursor {
    fn next(&mut self) -> Option<String> {
        let line = self.lines.get(self.pos)?.clone();
        self.pos += 1;
        Some(line)
    }

    /// 1-based line number of the line just returned by `next`.
    fn lineno(&self) -> usize {
        self.pos
    }

    fn operand(&mut self, opcode_line: &str) -> Result<String> {
        match self.next() {
            Some(l) => Ok(l),
            None => Err(BytecodeError::MissingOperand(
                self.lineno(),
                opcode_line.to_string(),
            )),
        }
    }

    fn index_operand(&mut self, opcode_line: &str) -> Result<usize> {
        let raw = self.operand(opcode_line)?;
        raw.parse::<usize>()
            .map_err(|_| BytecodeError::BadInt(self.lineno(), raw))
    }
}

/// Parse the textual encoding written by [`encode`].
pub fn decode(input: &mut impl BufRead) -> Result<Program> {
    let lines = input
        .lines()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut cursor = Cursor { lines, pos: 0 };

    let mut code = Vec::new();
    while let Some(line) = cursor.next() {
        if line == SENTINEL {
            break;
        }
        use Opcode::*;
        let op = match line.as_str() {
            "const_int" => {
                let raw = cursor.operand(&line)?;
                let v = raw
                    .parse::<i64>()
                    .map_err(|_| BytecodeError::BadInt(cursor.lineno(), raw))?;
                ConstInt(v)
            }
            "const_str" => ConstStr(cursor.operand(&line)?),
            "pop" => Pop,
            "dup" => Dup,
            "swap" => Swap,
            "add" => Add,
            "sub" => Sub,
            "eq" => Eq,
            "neq" => Neq,
            "lt" => Lt,
            "jump" => Jump(cursor.index_operand(&line)?),
            "jump_if_true" => JumpIfTrue(cursor.index_operand(&line)?),
            "jump_if_false" => JumpIfFalse(cursor.index_operand(&line)?),
            "new" => New,
            "get_field" => GetField(cursor.operand(&line)?),
            "set_field" => SetField(cursor.operand(&line)?),
            "var" => Var(cursor.index_operand(&line)?),
            "assign" => Assign,
            "call" => Call(cursor.index_operand(&line)?),
            "ret" => Ret,
            "exit" => Exit,
            other => {
                return Err(BytecodeError::UnknownMnemonic(
                    cursor.lineno(),
                    other.to_string(),
                ))
            }
        };
        code.push(op);
    }

    let mut functions = Vec::new();
    while let Some(line) = cursor.next() {
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ',');
        let entry = parts.next().and_then(|s| s.parse::<usize>().ok());
        let count = parts.next().and_then(|s| s.parse::<usize>().ok());
        match (entry, count) {
            (Some(e), Some(c)) => functions.push((e, c)),
            _ => {
                return Err(BytecodeError::BadFunctionEntry(
                    cursor.lineno(),
                    line.to_string(),
                ))
            }
        }
    }

    Ok(Program { code, functions })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        Program {
            code: vec![
                Opcode::ConstInt(5),
                Opcode::ConstInt(50),
                Opcode::Add,
                Opcode::Ret,
            ],
            functions: vec![(0, 1)],
        }
    }

    #[test]
    fn round_trips_through_the_text_encoding() {
        let program = sample();
        let mut buf = Vec::new();
        encode(&program, &mut buf).unwrap();
        let decoded = decode(&mut buf.as_slice()).unwrap();
        assert_eq!(program, decoded);
    }

    #[test]
    fn rejects_unknown_mnemonics() {
        let mut input = "bogus\n---\n0,0\n".as_bytes();
        assert!(matches!(
            decode(&mut input),
            Err(BytecodeError::UnknownMnemonic(_, _))
        ));
    }
}
