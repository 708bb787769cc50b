//! Stack virtual machine for lowered programs.
//!
//! Executes the opcode tuples produced by [`crate::ir`]. Machine state is
//! an operand stack of integer or float words, per-function locals, a
//! global map, a byte-addressable memory buffer grown by `GROW`, and the
//! GOSUB call stack.
//!
//! ## Structured control
//!
//! When a function is loaded, one pass over its code links every
//! structured branch to its sibling through the control map, using a
//! stack of currently open constructs:
//!
//! - `IF` pushes its index; `ELSE` links the top entry here and replaces
//!   it; `ENDIF` links the top entry and pops.
//! - `LOOP` and `CBREAK` push; `ENDLOOP` links itself back to the `LOOP`
//!   index and the `CBREAK` forward to itself, then pops both.
//!
//! At run time `IF` jumps past the link when its condition is falsy,
//! `CBREAK` jumps past the link when its condition is truthy, and
//! `ENDLOOP` always jumps back.
//!
//! ## Line addressing
//!
//! `LINE` markers populate a line-to-index table per function, so `JUMP`
//! and `GOSUB` take BASIC line numbers. `GOSUB` records the index after
//! the call site; `RETGS` pops it and resumes there.

use crate::ast::format_number;
use crate::error::{BasicError, Result};
use crate::ir::{Function, Module, Op};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

/// One operand stack slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Word {
    Int(i64),
    Float(f64),
}

impl Word {
    fn truthy(self) -> bool {
        match self {
            Word::Int(v) => v != 0,
            Word::Float(x) => x != 0.0,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Word::Int(v) => v as f64,
            Word::Float(x) => x,
        }
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Word::Int(v) => write!(f, "{}", v),
            Word::Float(x) => write!(f, "{}", format_number(*x)),
        }
    }
}

struct LoadedFunction {
    params: Vec<String>,
    code: Vec<Op>,
    /// Sibling index per structured branch opcode.
    control: Vec<usize>,
    /// BASIC line number to instruction index.
    lines: HashMap<u32, usize>,
}

const UNLINKED: usize = usize::MAX;

pub struct Vm<'a> {
    functions: HashMap<String, Rc<LoadedFunction>>,
    stack: Vec<Word>,
    globals: HashMap<String, Word>,
    memory: Vec<u8>,
    call_stack: Vec<usize>,
    out: &'a mut dyn Write,
}

impl<'a> Vm<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self {
            functions: HashMap::new(),
            stack: Vec::new(),
            globals: HashMap::new(),
            memory: Vec::new(),
            call_stack: Vec::new(),
            out,
        }
    }

    /// Loads every function of a module.
    pub fn load(&mut self, module: &Module) -> Result<()> {
        for function in &module.functions {
            self.add_function(function)?;
        }
        Ok(())
    }

    /// Registers a function, resolving its structured branches and line
    /// markers in a single pass.
    pub fn add_function(&mut self, function: &Function) -> Result<()> {
        let code = function.code.clone();
        let mut control = vec![UNLINKED; code.len()];
        let mut levels: Vec<usize> = Vec::new();
        let mut lines = HashMap::new();

        for (n, op) in code.iter().enumerate() {
            match op {
                Op::If => levels.push(n),
                Op::Else => {
                    let top = levels
                        .last_mut()
                        .ok_or_else(|| unbalanced(&function.name, "ELSE"))?;
                    control[*top] = n;
                    *top = n;
                }
                Op::EndIf => {
                    let top = levels
                        .pop()
                        .ok_or_else(|| unbalanced(&function.name, "ENDIF"))?;
                    control[top] = n;
                }
                Op::Loop | Op::CBreak => levels.push(n),
                Op::EndLoop => {
                    let brk = levels
                        .pop()
                        .ok_or_else(|| unbalanced(&function.name, "ENDLOOP"))?;
                    let lp = levels
                        .pop()
                        .ok_or_else(|| unbalanced(&function.name, "ENDLOOP"))?;
                    control[n] = lp;
                    control[brk] = n;
                }
                Op::Line(line) => {
                    lines.insert(*line, n);
                }
                _ => {}
            }
        }

        if !levels.is_empty() {
            return Err(unbalanced(&function.name, "end of code"));
        }

        self.functions.insert(
            function.name.clone(),
            Rc::new(LoadedFunction {
                params: function.params.clone(),
                code,
                control,
                lines,
            }),
        );
        Ok(())
    }

    /// Runs the program, starting at `main`.
    pub fn run(&mut self) -> Result<()> {
        self.execute("main")?;
        self.out.flush()?;
        Ok(())
    }

    /// Executes one function. `CALL` recurses here, so every invocation
    /// gets its own locals while the operand stack is shared, which is
    /// how arguments and return values travel.
    pub fn execute(&mut self, name: &str) -> Result<()> {
        let func = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| BasicError::UndefinedFunction(name.to_string()))?;

        let mut locals: HashMap<String, Word> = HashMap::new();
        for param in func.params.iter().rev() {
            let value = self.pop()?;
            locals.insert(param.clone(), value);
        }

        let mut pc = 0usize;
        while pc < func.code.len() {
            let mut next = pc + 1;

            match &func.code[pc] {
                Op::ConstI(v) => self.stack.push(Word::Int(*v)),
                Op::ConstF(x) => self.stack.push(Word::Float(*x)),

                Op::AddI | Op::AddF => self.arith(|l, r| l + r, |l, r| l + r)?,
                Op::SubI | Op::SubF => self.arith(|l, r| l - r, |l, r| l - r)?,
                Op::MulI | Op::MulF => self.arith(|l, r| l * r, |l, r| l * r)?,
                Op::DivI => self.div_floor()?,
                Op::DivF => self.div_float()?,

                Op::Neg => {
                    let value = self.pop()?;
                    let negated = match value {
                        Word::Int(v) => Word::Int(-v),
                        Word::Float(x) => Word::Float(-x),
                    };
                    self.stack.push(negated);
                }

                Op::AndI => self.bitwise(|l, r| l & r)?,
                Op::OrI => self.bitwise(|l, r| l | r)?,

                Op::LtI => self.compare(|l, r| l < r)?,
                Op::LeI => self.compare(|l, r| l <= r)?,
                Op::GtI => self.compare(|l, r| l > r)?,
                Op::GeI => self.compare(|l, r| l >= r)?,
                Op::EqI => self.compare(|l, r| l == r)?,
                Op::NeI => self.compare(|l, r| l != r)?,

                Op::ItoF => {
                    let value = self.pop()?;
                    self.stack.push(Word::Float(value.as_f64()));
                }
                Op::FtoI => {
                    let value = self.pop()?;
                    self.stack.push(Word::Int(value.as_f64().trunc() as i64));
                }

                Op::PrintI | Op::PrintF => {
                    let value = self.pop()?;
                    write!(self.out, "{}", value)?;
                }
                Op::PrintB => {
                    let value = self.pop()?;
                    let code = match value {
                        Word::Int(v) => v,
                        Word::Float(x) => x.trunc() as i64,
                    };
                    match u32::try_from(code).ok().and_then(char::from_u32) {
                        Some(c) => write!(self.out, "{}", c)?,
                        None => {
                            return Err(BasicError::Runtime(format!(
                                "PRINTB of an invalid code point {}",
                                code
                            )));
                        }
                    }
                }

                Op::PeekI => {
                    let addr = self.address()?;
                    let bytes = self.read_memory(addr, 4)?;
                    let value = i32::from_le_bytes(bytes.try_into().unwrap());
                    self.stack.push(Word::Int(value as i64));
                }
                Op::PeekF => {
                    let addr = self.address()?;
                    let bytes = self.read_memory(addr, 8)?;
                    let value = f64::from_le_bytes(bytes.try_into().unwrap());
                    self.stack.push(Word::Float(value));
                }
                Op::PeekB => {
                    let addr = self.address()?;
                    let bytes = self.read_memory(addr, 1)?;
                    self.stack.push(Word::Int(bytes[0] as i64));
                }
                Op::PokeI => {
                    let value = self.pop()?;
                    let addr = self.address()?;
                    let v = match value {
                        Word::Int(v) => v as i32,
                        Word::Float(x) => x.trunc() as i32,
                    };
                    self.write_memory(addr, &v.to_le_bytes())?;
                }
                Op::PokeF => {
                    let value = self.pop()?;
                    let addr = self.address()?;
                    self.write_memory(addr, &value.as_f64().to_le_bytes())?;
                }
                Op::PokeB => {
                    let value = self.pop()?;
                    let addr = self.address()?;
                    let v = match value {
                        Word::Int(v) => v as u8,
                        Word::Float(x) => x.trunc() as u8,
                    };
                    self.write_memory(addr, &[v])?;
                }
                Op::Grow => {
                    let count = self.pop()?;
                    let count = match count {
                        Word::Int(v) if v >= 0 => v as usize,
                        other => {
                            return Err(BasicError::Runtime(format!(
                                "GROW expects a non-negative size, got {}",
                                other
                            )));
                        }
                    };
                    self.memory.resize(self.memory.len() + count, 0);
                    self.stack.push(Word::Int(self.memory.len() as i64));
                }

                Op::LocalGet(name) => {
                    let value = locals.get(name).copied().ok_or_else(|| {
                        BasicError::UndefinedVariable(format!("'{}'", name))
                    })?;
                    self.stack.push(value);
                }
                Op::LocalSet(name) => {
                    let value = self.pop()?;
                    locals.insert(name.clone(), value);
                }
                Op::GlobalGet(name) => {
                    let value = self.globals.get(name).copied().ok_or_else(|| {
                        BasicError::UndefinedVariable(format!("'{}'", name))
                    })?;
                    self.stack.push(value);
                }
                Op::GlobalSet(name) => {
                    let value = self.pop()?;
                    self.globals.insert(name.clone(), value);
                }

                Op::Call(name) => {
                    let name = name.clone();
                    self.execute(&name)?;
                }
                Op::Ret => break,

                Op::If => {
                    let cond = self.pop()?;
                    if !cond.truthy() {
                        next = self.sibling(&func, pc)? + 1;
                    }
                }
                Op::Else => next = self.sibling(&func, pc)? + 1,
                Op::EndIf | Op::Loop | Op::Line(_) => {}
                Op::CBreak => {
                    let cond = self.pop()?;
                    if cond.truthy() {
                        next = self.sibling(&func, pc)? + 1;
                    }
                }
                Op::Continue => next = self.sibling(&func, pc)?,
                Op::EndLoop => next = self.sibling(&func, pc)? + 1,

                Op::Jump(line) => next = self.line_index(&func, *line)?,
                Op::Gosub(line) => {
                    self.call_stack.push(pc + 1);
                    next = self.line_index(&func, *line)?;
                }
                Op::RetGs => {
                    next = self.call_stack.pop().ok_or_else(|| {
                        BasicError::Runtime("RETURN without GOSUB".to_string())
                    })?;
                }
            }

            pc = next;
        }

        Ok(())
    }

    fn sibling(&self, func: &LoadedFunction, pc: usize) -> Result<usize> {
        match func.control.get(pc) {
            Some(&index) if index != UNLINKED => Ok(index),
            _ => Err(BasicError::Runtime(format!(
                "Unlinked control opcode at index {}",
                pc
            ))),
        }
    }

    fn line_index(&self, func: &LoadedFunction, line: u32) -> Result<usize> {
        func.lines.get(&line).copied().ok_or_else(|| {
            BasicError::Runtime(format!("Line number {} not found", line))
        })
    }

    fn pop(&mut self) -> Result<Word> {
        self.stack
            .pop()
            .ok_or_else(|| BasicError::Runtime("Operand stack underflow".to_string()))
    }

    fn pop2(&mut self) -> Result<(Word, Word)> {
        let right = self.pop()?;
        let left = self.pop()?;
        Ok((left, right))
    }

    /// Integer arithmetic when both operands are integers, float
    /// arithmetic otherwise.
    fn arith(&mut self, f_int: fn(i64, i64) -> i64, f_float: fn(f64, f64) -> f64) -> Result<()> {
        let (left, right) = self.pop2()?;
        let result = match (left, right) {
            (Word::Int(l), Word::Int(r)) => Word::Int(f_int(l, r)),
            _ => Word::Float(f_float(left.as_f64(), right.as_f64())),
        };
        self.stack.push(result);
        Ok(())
    }

    /// DIVI rounds toward negative infinity, like the floor division it
    /// was modeled on.
    fn div_floor(&mut self) -> Result<()> {
        let (left, right) = self.pop2()?;
        let result = match (left, right) {
            (Word::Int(l), Word::Int(r)) => {
                if r == 0 {
                    return Err(BasicError::Runtime("Division by zero".to_string()));
                }
                let q = l / r;
                let floored = if l % r != 0 && (l < 0) != (r < 0) {
                    q - 1
                } else {
                    q
                };
                Word::Int(floored)
            }
            _ => {
                let r = right.as_f64();
                if r == 0.0 {
                    return Err(BasicError::Runtime("Division by zero".to_string()));
                }
                Word::Float((left.as_f64() / r).floor())
            }
        };
        self.stack.push(result);
        Ok(())
    }

    fn div_float(&mut self) -> Result<()> {
        let (left, right) = self.pop2()?;
        let r = right.as_f64();
        if r == 0.0 {
            return Err(BasicError::Runtime("Division by zero".to_string()));
        }
        self.stack.push(Word::Float(left.as_f64() / r));
        Ok(())
    }

    fn bitwise(&mut self, f: fn(i64, i64) -> i64) -> Result<()> {
        let (left, right) = self.pop2()?;
        match (left, right) {
            (Word::Int(l), Word::Int(r)) => {
                self.stack.push(Word::Int(f(l, r)));
                Ok(())
            }
            _ => Err(BasicError::Type(
                "Bitwise opcodes expect integer operands".to_string(),
            )),
        }
    }

    fn compare(&mut self, f: fn(f64, f64) -> bool) -> Result<()> {
        let (left, right) = self.pop2()?;
        let truth = f(left.as_f64(), right.as_f64());
        self.stack.push(Word::Int(truth as i64));
        Ok(())
    }

    fn address(&mut self) -> Result<usize> {
        match self.pop()? {
            Word::Int(addr) if addr >= 0 => Ok(addr as usize),
            other => Err(BasicError::Index(format!(
                "Invalid memory address {}",
                other
            ))),
        }
    }

    fn read_memory(&self, addr: usize, len: usize) -> Result<&[u8]> {
        self.memory.get(addr..addr + len).ok_or_else(|| {
            BasicError::Index(format!("Memory read past the end at address {}", addr))
        })
    }

    fn write_memory(&mut self, addr: usize, bytes: &[u8]) -> Result<()> {
        match self.memory.get_mut(addr..addr + bytes.len()) {
            Some(slot) => {
                slot.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(BasicError::Index(format!(
                "Memory write past the end at address {}",
                addr
            ))),
        }
    }
}

fn unbalanced(name: &str, at: &str) -> BasicError {
    BasicError::Runtime(format!(
        "Unbalanced structured control in function {} at {}",
        name, at
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::lower;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn run_vm(source: &str) -> Result<String> {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.tokenize();
        assert!(lexer.take_errors().is_empty());
        let prog = Parser::new(tokens).parse().expect("parse failure");
        let module = lower(&prog).expect("lowering failure");

        let mut out = Vec::new();
        {
            let mut vm = Vm::new(&mut out);
            vm.load(&module)?;
            vm.run()?;
        }
        Ok(String::from_utf8(out).expect("non-utf8 output"))
    }

    #[test]
    fn test_sum_program() {
        let output = run_vm(
            "10 LET S = 0\n\
             20 FOR I = 1 TO 10\n\
             30 LET S = S + I\n\
             40 NEXT I\n\
             50 PRINT S\n\
             60 END\n",
        )
        .unwrap();
        assert_eq!(output, "55\n");
    }

    #[test]
    fn test_if_branch_taken_and_skipped() {
        let output = run_vm(
            "10 LET A = 1\n\
             20 IF A = 1 THEN 40\n\
             30 PRINT 0\n\
             40 PRINT 2\n\
             50 END\n",
        )
        .unwrap();
        assert_eq!(output, "2\n");

        let output = run_vm(
            "10 LET A = 0\n\
             20 IF A = 1 THEN 40\n\
             30 PRINT 1\n\
             40 PRINT 2\n\
             50 END\n",
        )
        .unwrap();
        assert_eq!(output, "1\n2\n");
    }

    #[test]
    fn test_goto_jump() {
        let output = run_vm(
            "10 GOTO 40\n\
             20 PRINT 0\n\
             40 PRINT 9\n\
             50 END\n",
        )
        .unwrap();
        assert_eq!(output, "9\n");
    }

    #[test]
    fn test_gosub_returns_after_call_site() {
        let output = run_vm(
            "10 GOSUB 100\n\
             20 PRINT 1\n\
             30 GOTO 200\n\
             100 PRINT 2\n\
             110 RETURN\n\
             200 END\n",
        )
        .unwrap();
        assert_eq!(output, "2\n1\n");
    }

    #[test]
    fn test_def_call() {
        let output = run_vm(
            "10 DEF FNS(X) = X * X\n\
             20 PRINT FNS(4)\n\
             30 END\n",
        )
        .unwrap();
        assert_eq!(output, "16\n");
    }

    #[test]
    fn test_mod_in_vm() {
        let output = run_vm("10 PRINT 7 % 3\n20 END\n").unwrap();
        assert_eq!(output, "1\n");
    }

    #[test]
    fn test_mod_carries_the_dividend_sign() {
        // Same result as the tree walker, even though DIVI floors.
        let output = run_vm("10 PRINT -7 % 2\n20 END\n").unwrap();
        assert_eq!(output, "-1\n");
    }

    #[test]
    fn test_print_string_and_number() {
        let output = run_vm("10 PRINT \"SUM\"; 5\n20 END\n").unwrap();
        assert_eq!(output, "SUM 5\n");
    }

    #[test]
    fn test_div_floor_semantics() {
        let mut out = Vec::new();
        let mut vm = Vm::new(&mut out);
        vm.add_function(&Function {
            name: "main".to_string(),
            params: vec![],
            code: vec![
                Op::ConstI(7),
                Op::ConstI(2),
                Op::DivI,
                Op::PrintI,
                Op::ConstI('\n' as i64),
                Op::PrintB,
                Op::ConstI(-7),
                Op::ConstI(2),
                Op::DivI,
                Op::PrintI,
                Op::Ret,
            ],
        })
        .unwrap();
        vm.run().unwrap();
        drop(vm);
        assert_eq!(String::from_utf8(out).unwrap(), "3\n-4");
    }

    #[test]
    fn test_memory_roundtrip() {
        let mut out = Vec::new();
        let mut vm = Vm::new(&mut out);
        vm.add_function(&Function {
            name: "main".to_string(),
            params: vec![],
            code: vec![
                Op::ConstI(16),
                Op::Grow,
                Op::PrintI,
                Op::ConstI(0),
                Op::ConstI(-123),
                Op::PokeI,
                Op::ConstI(0),
                Op::PeekI,
                Op::PrintI,
                Op::Ret,
            ],
        })
        .unwrap();
        vm.run().unwrap();
        drop(vm);
        assert_eq!(String::from_utf8(out).unwrap(), "16-123");
    }

    #[test]
    fn test_unknown_jump_target() {
        let err = run_vm("10 GOTO 99\n20 END\n").unwrap_err();
        assert!(matches!(err, BasicError::Runtime(_)));
    }

    #[test]
    fn test_unbalanced_control_rejected() {
        let mut out = Vec::new();
        let mut vm = Vm::new(&mut out);
        let err = vm
            .add_function(&Function {
                name: "main".to_string(),
                params: vec![],
                code: vec![Op::If, Op::Ret],
            })
            .unwrap_err();
        assert!(matches!(err, BasicError::Runtime(_)));
    }
}
