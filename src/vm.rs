// (C) 2020 Brandon Lewis
//
// The JH virtual machine: a stack-based interpreter for the bytecode
// produced by `codegen.rs`.
//
// *Execution model*
//
// Execution proceeds frame by frame. Each `Frame` owns a dense local
// slot vector and its own operand stack; frames chain to their caller
// through `caller: Option<Box<Frame>>`, so the call stack is simply the
// live `Frame` value plus the boxes hanging off it - there is no
// separate `Vec<Frame>`.
//
// A `call` pushes a `Value::Frame` marker onto the *caller's* stack
// before control transfers to the callee. The marker reserves the slot
// that the callee's eventual `ret` will overwrite with its result, so
// the caller's stack depth never has to be tracked separately from its
// contents.
//
// *Objects*
//
// Objects are hidden-class maps: an `Rc<ShapeMap>` describing which
// field names occupy which value-vector slot, shared by every object
// that has had the same fields added in the same order. `New` always
// starts an object from the same empty root shape, so two objects
// built by the same sequence of field assignments end up pointing at
// the identical `Rc<ShapeMap>` rather than merely an equal one.

use crate::bytecode::{Opcode, Program};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VmError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("expected an integer, found {0}")]
    NotAnInt(&'static str),
    #[error("expected a boolean, found {0}")]
    NotABool(&'static str),
    #[error("expected an object reference, found {0}")]
    NotARef(&'static str),
    #[error("instruction address {0} is out of bounds")]
    IllegalAddress(usize),
    #[error("call to undefined function at address {0}")]
    UnknownFunction(usize),
    #[error("object has no field `{0}`")]
    UnknownField(String),
    #[error("operand stack exceeded {0} slots")]
    StackOverflow(usize),
    #[error("local slot {0} is out of range")]
    OutOfRangeSlot(usize),
}

/// Per-frame operand stack bound. Exceeding it is a fatal,
/// code-generator-bug-class error. Expression-statements and a `for`
/// loop's `init` never get a matching `POP` (see `codegen.rs`), so a
/// loop of `n` iterations can leave on the order of `2n` values
/// sitting on the stack; this must stay comfortably above any
/// iteration count a well-formed program is expected to run.
const MAX_FRAME_STACK: usize = 4096;

pub type Result<T> = std::result::Result<T, VmError>;

/// Runtime values. `StrLit` and the associated `ConstStr` opcode are
/// reserved for an interned field-name literal; nothing in the current
/// grammar or code generator produces one yet.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Ref(usize),
    StrLit(Rc<str>),
    /// Placeholder parked on a caller's stack for the duration of a
    /// call; `ret` always overwrites it before it can be observed.
    Frame,
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Ref(_) => "object reference",
            Value::StrLit(_) => "string literal",
            Value::Frame => "call frame marker",
        }
    }

    fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(VmError::NotAnInt(other.kind())),
        }
    }

    fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(VmError::NotABool(other.kind())),
        }
    }

    fn as_ref(&self) -> Result<usize> {
        match self {
            Value::Ref(v) => Ok(*v),
            other => Err(VmError::NotARef(other.kind())),
        }
    }
}

/// A hidden class: the ordered set of field names an object with this
/// shape has. Two objects that acquired the same fields in the same
/// order share one `Rc<ShapeMap>`, memoized through `transitions`.
#[derive(Debug)]
struct ShapeMap {
    fields: Vec<String>,
    transitions: RefCell<HashMap<String, Rc<ShapeMap>>>,
}

impl ShapeMap {
    fn empty() -> Rc<ShapeMap> {
        Rc::new(ShapeMap {
            fields: Vec::new(),
            transitions: RefCell::new(HashMap::new()),
        })
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    /// The shape reached by adding `name` to `self`, memoized so that
    /// repeated transitions for the same field name from the same
    /// shape always return the identical `Rc`.
    fn transition(self: &Rc<Self>, name: &str) -> Rc<ShapeMap> {
        if let Some(existing) = self.transitions.borrow().get(name) {
            return Rc::clone(existing);
        }
        let mut fields = self.fields.clone();
        fields.push(name.to_string());
        let next = Rc::new(ShapeMap {
            fields,
            transitions: RefCell::new(HashMap::new()),
        });
        self.transitions
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&next));
        next
    }
}

#[derive(Debug)]
struct Object {
    map: Rc<ShapeMap>,
    values: Vec<Value>,
}

/// A single call's activation record: its locals, its own operand
/// stack, where to resume the caller, and the caller's frame itself.
#[derive(Debug)]
struct Frame {
    return_address: usize,
    locals: Vec<Value>,
    stack: Vec<Value>,
    caller: Option<Box<Frame>>,
}

impl Frame {
    fn new(return_address: usize, local_count: usize) -> Frame {
        Frame {
            return_address,
            locals: vec![Value::Int(0); local_count],
            stack: Vec::new(),
            caller: None,
        }
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn push(&mut self, v: Value) -> Result<()> {
        if self.stack.len() >= MAX_FRAME_STACK {
            return Err(VmError::StackOverflow(MAX_FRAME_STACK));
        }
        self.stack.push(v);
        Ok(())
    }
}

pub struct VM {
    program: Program,
    pc: usize,
    current: Frame,
    heap: Vec<Object>,
    root_shape: Rc<ShapeMap>,
}

impl VM {
    pub fn new(program: Program) -> VM {
        let entry = program.main_entry();
        let local_count = program.local_count(entry).unwrap_or(0);
        VM {
            program,
            pc: entry,
            current: Frame::new(0, local_count),
            heap: Vec::new(),
            root_shape: ShapeMap::empty(),
        }
    }

    /// Run until `main` returns (or an instruction faults), producing
    /// the value it returned.
    pub fn run(&mut self) -> Result<Value> {
        loop {
            if let Some(result) = self.step()? {
                return Ok(result);
            }
        }
    }

    fn fetch(&self) -> Result<Opcode> {
        self.program
            .code
            .get(self.pc)
            .cloned()
            .ok_or(VmError::IllegalAddress(self.pc))
    }

    /// Execute a single instruction. Returns `Some(value)` once the
    /// outermost frame (`main`) has returned, `None` otherwise.
    fn step(&mut self) -> Result<Option<Value>> {
        let op = self.fetch()?;
        log::trace!("{:05}: {:?} {:?}", self.pc, op, self.current.stack);

        let mut advance = true;
        let mut result = None;

        match op {
            Opcode::ConstInt(i) => self.current.push(Value::Int(i))?,
            Opcode::ConstStr(s) => self.current.push(Value::StrLit(Rc::from(s.as_str())))?,
            Opcode::Pop => {
                self.current.pop()?;
            }
            Opcode::Dup => {
                let top = self.current.pop()?;
                self.current.push(top.clone())?;
                self.current.push(top)?;
            }
            Opcode::Swap => {
                let a = self.current.pop()?;
                let b = self.current.pop()?;
                self.current.push(a)?;
                self.current.push(b)?;
            }
            Opcode::Add => self.arith(|a, b| Value::Int(a + b))?,
            Opcode::Sub => self.arith(|a, b| Value::Int(a - b))?,
            Opcode::Eq => self.arith(|a, b| Value::Bool(a == b))?,
            Opcode::Neq => self.arith(|a, b| Value::Bool(a != b))?,
            Opcode::Lt => self.arith(|a, b| Value::Bool(a < b))?,
            Opcode::Jump(target) => {
                self.pc = target;
                advance = false;
            }
            Opcode::JumpIfTrue(target) => {
                let cond = self.current.pop()?.as_bool()?;
                if cond {
                    self.pc = target;
                    advance = false;
                }
            }
            Opcode::JumpIfFalse(target) => {
                let cond = self.current.pop()?.as_bool()?;
                if !cond {
                    self.pc = target;
                    advance = false;
                }
            }
            Opcode::New => {
                let obj_ref = self.heap.len();
                self.heap.push(Object {
                    map: Rc::clone(&self.root_shape),
                    values: Vec::new(),
                });
                self.current.push(Value::Ref(obj_ref))?;
            }
            Opcode::GetField(name) => {
                let obj_ref = self.current.pop()?.as_ref()?;
                let obj = &self.heap[obj_ref];
                let value = obj
                    .map
                    .index_of(&name)
                    .map(|i| obj.values[i].clone())
                    .ok_or_else(|| VmError::UnknownField(name.clone()))?;
                self.current.push(value)?;
            }
            Opcode::SetField(name) => {
                let value = self.current.pop()?;
                let obj_ref = self.current.pop()?.as_ref()?;
                let obj = &mut self.heap[obj_ref];
                match obj.map.index_of(&name) {
                    Some(i) => obj.values[i] = value.clone(),
                    None => {
                        obj.map = obj.map.transition(&name);
                        obj.values.push(value.clone());
                    }
                }
                self.current.push(value)?;
            }
            Opcode::Var(slot) => {
                let value = self
                    .current
                    .locals
                    .get(slot)
                    .cloned()
                    .ok_or(VmError::OutOfRangeSlot(slot))?;
                self.current.push(value)?;
            }
            Opcode::Assign => {
                let value = self.current.pop()?;
                let slot = self.current.pop()?.as_int()? as usize;
                let dest = self
                    .current
                    .locals
                    .get_mut(slot)
                    .ok_or(VmError::OutOfRangeSlot(slot))?;
                *dest = value.clone();
                self.current.push(value)?;
            }
            Opcode::Call(target) => {
                self.call(target)?;
                advance = false;
            }
            Opcode::Ret => {
                result = self.ret()?;
                advance = false;
            }
            Opcode::Exit => {
                return Ok(Some(self.current.stack.last().cloned().unwrap_or(Value::Int(0))));
            }
        }

        if advance {
            self.pc += 1;
        }
        Ok(result)
    }

    fn arith(&mut self, f: impl Fn(i64, i64) -> Value) -> Result<()> {
        let b = self.current.pop()?.as_int()?;
        let a = self.current.pop()?.as_int()?;
        self.current.push(f(a, b))?;
        Ok(())
    }

    fn call(&mut self, target: usize) -> Result<()> {
        let argc = self.current.pop()?.as_int()? as usize;
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.current.pop()?);
        }

        let local_count = self
            .program
            .local_count(target)
            .ok_or(VmError::UnknownFunction(target))?;
        let mut locals = vec![Value::Int(0); local_count];
        for (slot, value) in args.into_iter().enumerate() {
            locals[slot] = value;
        }

        self.current.push(Value::Frame)?;

        let return_address = self.pc + 1;
        let mut callee = Frame::new(return_address, local_count);
        callee.locals = locals;

        let caller = std::mem::replace(&mut self.current, callee);
        self.current.caller = Some(Box::new(caller));
        self.pc = target;
        Ok(())
    }

    fn ret(&mut self) -> Result<Option<Value>> {
        let value = self.current.pop()?;
        match self.current.caller.take() {
            None => Ok(Some(value)),
            Some(caller) => {
                let mut caller = *caller;
                caller.pop()?; // discard the Value::Frame marker
                caller.push(value)?;
                self.pc = caller.return_address;
                self.current = caller;
                Ok(None)
            }
        }
    }
}

/// Compile-and-run convenience used by the CLI and by integration tests.
pub fn run(program: Program) -> Result<Value> {
    VM::new(program).run()
}
