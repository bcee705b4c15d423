// (C) 2020 Brandon Lewis
//
// The abstract syntax tree produced by the parser (see `grammar.lalrpop`)
// and consumed by the code generator (`codegen.rs`).
//
// JH has no globals, no closures, and no user-visible types beyond
// integers, booleans and dynamically-shaped objects, so the tree stays
// small: a program is a list of functions, a function body is a list of
// statements, and statements bottom out in expressions.

/// Arithmetic and comparison operators exposed by the surface grammar.
///
/// `Neq` exists at the opcode level (`bytecode::Opcode::Neq`) but has no
/// surface syntax, matching the distilled grammar.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Eq,
    Lt,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(i64),
    Var(String),
    Assign(String, Box<Expr>),
    BinOp(BinOpKind, Box<Expr>, Box<Expr>),
    FieldAccessor(Box<Expr>, String),
    FieldSetter(Box<Expr>, String, Box<Expr>),
    Obj,
    Call(String, Vec<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// An expression evaluated for its side effect; its value is left on
    /// the stack, uninspected (see codegen's handling of `for`'s `init`).
    Expr(Expr),
    Return(Expr),
    If(Expr, Vec<Statement>),
    IfElse(Expr, Vec<Statement>, Vec<Statement>),
    For(Expr, Expr, Expr, Vec<Statement>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub functions: Vec<Function>,
}
