// (C) 2020 Brandon Lewis
//
// Lowers an `ast::Program` into a resolved `bytecode::Program`: a linear
// instruction stream plus the function table. Two passes, matching the
// distilled spec's design notes: emit an instruction stream interleaved
// with symbolic labels, then resolve every label in one sweep.
//
// Per-function local variables are numbered densely as they are first
// referenced, in insertion order, exactly like the original's
// `register_num_for_var` - JH has no globals or closures, so every
// identifier resolves unambiguously within its enclosing function.

use crate::ast::{self, BinOpKind};
use crate::bytecode::{Opcode, Program};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
enum RawOp {
    ConstInt(i64),
    Pop,
    Add,
    Sub,
    Eq,
    Lt,
    Jump(String),
    JumpIfTrue(String),
    JumpIfFalse(String),
    New,
    GetField(String),
    SetField(String),
    Var(usize),
    Assign,
    Call(String),
    Ret,
}

#[allow(dead_code)]
impl RawOp {
    // Kept for symmetry with `Opcode`; neither the grammar nor this
    // generator ever emits these, but the opcode-level instruction set
    // (and the VM) still supports them.
    const UNUSED: [&'static str; 0] = [];
}

enum Emitted {
    Instr(RawOp),
    Label(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("call to undefined function `{0}`")]
    UnknownFunction(String),
    #[error("program has no `main` function")]
    MissingMain,
}

type Result<T> = std::result::Result<T, CodegenError>;

struct Generator {
    code: Vec<Emitted>,
    func_order: Vec<String>,
    slot_tables: HashMap<String, Vec<String>>,
    label_counter: usize,
}

impl Generator {
    fn new() -> Self {
        Generator {
            code: Vec::new(),
            func_order: Vec::new(),
            slot_tables: HashMap::new(),
            label_counter: 0,
        }
    }

    fn fresh_label(&mut self, prefix: &str) -> String {
        self.label_counter += 1;
        format!("{}_{}", prefix, self.label_counter)
    }

    fn emit(&mut self, op: RawOp) {
        self.code.push(Emitted::Instr(op));
    }

    fn label(&mut self, name: String) {
        self.code.push(Emitted::Label(name));
    }

    // Look up (or register) the dense slot number for `name` within `func`.
    fn slot(&mut self, func: &str, name: &str) -> usize {
        let table = self
            .slot_tables
            .get_mut(func)
            .expect("slot table registered at function entry");
        match table.iter().position(|n| n == name) {
            Some(i) => i,
            None => {
                table.push(name.to_string());
                table.len() - 1
            }
        }
    }

    fn lower_function(&mut self, f: &ast::Function) {
        self.func_order.push(f.name.clone());
        self.slot_tables.insert(f.name.clone(), Vec::new());
        for param in &f.params {
            self.slot(&f.name, param);
        }
        self.label(f.name.clone());
        for stmt in &f.body {
            self.lower_statement(&f.name, stmt);
        }
    }

    fn lower_statement(&mut self, func: &str, stmt: &ast::Statement) {
        use ast::Statement::*;
        match stmt {
            Expr(e) => self.lower_expr(func, e),
            Return(e) => {
                self.lower_expr(func, e);
                self.emit(RawOp::Ret);
            }
            If(cond, then) => {
                let exit = self.fresh_label("exit");
                self.lower_expr(func, cond);
                self.emit(RawOp::JumpIfFalse(exit.clone()));
                for s in then {
                    self.lower_statement(func, s);
                }
                self.label(exit);
            }
            IfElse(cond, then, else_) => {
                let else_label = self.fresh_label("else");
                let exit = self.fresh_label("exit");
                self.lower_expr(func, cond);
                self.emit(RawOp::JumpIfFalse(else_label.clone()));
                for s in then {
                    self.lower_statement(func, s);
                }
                self.emit(RawOp::Jump(exit.clone()));
                self.label(else_label);
                for s in else_ {
                    self.lower_statement(func, s);
                }
                self.label(exit);
            }
            For(init, cond, step, body) => {
                let head = self.fresh_label("entry");
                let exit = self.fresh_label("exit");
                // Evaluated once, for its side effect; the value it
                // leaves on the stack is never popped (see the
                // for-loop open question in SPEC_FULL.md §7).
                self.lower_expr(func, init);
                self.label(head.clone());
                self.lower_expr(func, cond);
                self.emit(RawOp::JumpIfFalse(exit.clone()));
                for s in body {
                    self.lower_statement(func, s);
                }
                self.lower_expr(func, step);
                self.emit(RawOp::Jump(head));
                self.label(exit);
            }
        }
    }

    fn lower_expr(&mut self, func: &str, expr: &ast::Expr) {
        use ast::Expr::*;
        match expr {
            Number(n) => self.emit(RawOp::ConstInt(*n)),
            Var(name) => {
                let slot = self.slot(func, name);
                self.emit(RawOp::Var(slot));
            }
            Assign(name, value) => {
                let slot = self.slot(func, name);
                self.emit(RawOp::ConstInt(slot as i64));
                self.lower_expr(func, value);
                self.emit(RawOp::Assign);
            }
            BinOp(op, l, r) => {
                self.lower_expr(func, l);
                self.lower_expr(func, r);
                self.emit(match op {
                    BinOpKind::Add => RawOp::Add,
                    BinOpKind::Sub => RawOp::Sub,
                    BinOpKind::Eq => RawOp::Eq,
                    BinOpKind::Lt => RawOp::Lt,
                });
            }
            FieldAccessor(obj, name) => {
                self.lower_expr(func, obj);
                self.emit(RawOp::GetField(name.clone()));
            }
            FieldSetter(obj, name, value) => {
                self.lower_expr(func, obj);
                self.lower_expr(func, value);
                self.emit(RawOp::SetField(name.clone()));
            }
            Obj => self.emit(RawOp::New),
            Call(name, args) => {
                for a in args.iter().rev() {
                    self.lower_expr(func, a);
                }
                self.emit(RawOp::ConstInt(args.len() as i64));
                self.emit(RawOp::Call(name.clone()));
            }
        }
    }
}

// Excise labels from the stream, recording their resolved positions, then
// rewrite every jump/call operand that names a label into an absolute
// instruction index.
fn resolve(emitted: Vec<Emitted>) -> Result<(Vec<Opcode>, HashMap<String, usize>)> {
    let mut labels = HashMap::new();
    let mut raw = Vec::with_capacity(emitted.len());
    for e in emitted {
        match e {
            Emitted::Label(name) => {
                labels.insert(name, raw.len());
            }
            Emitted::Instr(op) => raw.push(op),
        }
    }

    let target = |labels: &HashMap<String, usize>, name: &str| -> Result<usize> {
        labels
            .get(name)
            .copied()
            .ok_or_else(|| CodegenError::UnknownFunction(name.to_string()))
    };

    let mut code = Vec::with_capacity(raw.len());
    for op in raw {
        code.push(match op {
            RawOp::ConstInt(i) => Opcode::ConstInt(i),
            RawOp::Pop => Opcode::Pop,
            RawOp::Add => Opcode::Add,
            RawOp::Sub => Opcode::Sub,
            RawOp::Eq => Opcode::Eq,
            RawOp::Lt => Opcode::Lt,
            RawOp::Jump(l) => Opcode::Jump(target(&labels, &l)?),
            RawOp::JumpIfTrue(l) => Opcode::JumpIfTrue(target(&labels, &l)?),
            RawOp::JumpIfFalse(l) => Opcode::JumpIfFalse(target(&labels, &l)?),
            RawOp::New => Opcode::New,
            RawOp::GetField(n) => Opcode::GetField(n),
            RawOp::SetField(n) => Opcode::SetField(n),
            RawOp::Var(s) => Opcode::Var(s),
            RawOp::Assign => Opcode::Assign,
            RawOp::Call(name) => Opcode::Call(target(&labels, &name)?),
            RawOp::Ret => Opcode::Ret,
        });
    }
    Ok((code, labels))
}

/// Lower a whole program. `main` is forced to the front of the function
/// list (and therefore to instruction index 0) regardless of where the
/// parser placed it; every other function keeps its relative order.
pub fn generate(program: &ast::Program) -> Result<Program> {
    let main = program
        .functions
        .iter()
        .find(|f| f.name == "main")
        .ok_or(CodegenError::MissingMain)?;

    let mut ordered = Vec::with_capacity(program.functions.len());
    ordered.push(main);
    for f in &program.functions {
        if f.name != "main" {
            ordered.push(f);
        }
    }

    let mut gen = Generator::new();
    for f in &ordered {
        gen.lower_function(f);
    }

    let (code, labels) = resolve(gen.code)?;

    let mut functions = Vec::with_capacity(gen.func_order.len());
    for name in &gen.func_order {
        let entry = *labels
            .get(name)
            .ok_or_else(|| CodegenError::UnknownFunction(name.clone()))?;
        let count = gen.slot_tables.get(name).map(Vec::len).unwrap_or(0);
        functions.push((entry, count));
    }

    Ok(Program { code, functions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOpKind::*, Expr::*, Statement::*};

    fn func(name: &str, params: &[&str], body: Vec<ast::Statement>) -> ast::Function {
        ast::Function {
            name: name.to_string(),
            params: params.iter().map(|s| s.to_string()).collect(),
            body,
        }
    }

    #[test]
    fn main_is_forced_to_instruction_zero() {
        let program = ast::Program {
            functions: vec![
                func("helper", &[], vec![Return(Number(1))]),
                func("main", &[], vec![Return(Call("helper".into(), vec![]))]),
            ],
        };
        let bc = generate(&program).unwrap();
        assert_eq!(bc.main_entry(), 0);
    }

    #[test]
    fn missing_main_is_an_error() {
        let program = ast::Program {
            functions: vec![func("helper", &[], vec![Return(Number(1))])],
        };
        assert!(matches!(generate(&program), Err(CodegenError::MissingMain)));
    }

    #[test]
    fn params_occupy_the_first_slots_in_order() {
        let program = ast::Program {
            functions: vec![func(
                "main",
                &["a", "b"],
                vec![Return(BinOp(Add, Box::new(Var("a".into())), Box::new(Var("b".into()))))],
            )],
        };
        let bc = generate(&program).unwrap();
        assert_eq!(bc.code[0], Opcode::Var(0));
        assert_eq!(bc.code[1], Opcode::Var(1));
    }

    #[test]
    fn slot_count_matches_the_highest_referenced_slot() {
        let program = ast::Program {
            functions: vec![func(
                "main",
                &[],
                vec![
                    Expr(Assign("x".into(), Box::new(Number(1)))),
                    Expr(Assign("y".into(), Box::new(Number(2)))),
                    Return(Var("y".into())),
                ],
            )],
        };
        let bc = generate(&program).unwrap();
        assert_eq!(bc.local_count(0), Some(2));
    }

    #[test]
    fn every_jump_and_call_target_is_in_bounds() {
        let program = ast::Program {
            functions: vec![
                func("main", &[], vec![Return(Call("id".into(), vec![Number(7)]))]),
                func("id", &["x"], vec![Return(Var("x".into()))]),
            ],
        };
        let bc = generate(&program).unwrap();
        for op in &bc.code {
            let target = match op {
                Opcode::Jump(t) | Opcode::JumpIfTrue(t) | Opcode::JumpIfFalse(t) | Opcode::Call(t) => {
                    Some(*t)
                }
                _ => None,
            };
            if let Some(t) = target {
                assert!(t < bc.code.len());
            }
        }
    }
}
