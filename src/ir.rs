//! Lowering from the syntax tree to stack-machine code.
//!
//! The secondary execution path flattens a program into a sequence of
//! opcodes for the virtual machine in [`crate::vm`]. Every BASIC line is
//! preceded by a `LINE` marker so `JUMP` and `GOSUB` can translate line
//! numbers to instruction indices at load time.
//!
//! Control flow is structured rather than label-based: `IF`/`ELSE`/
//! `ENDIF` and `LOOP`/`CBREAK`/`ENDLOOP` brackets are linked to their
//! siblings by the VM when a function is loaded. `FOR`/`NEXT` lowers to
//! one such loop bracket, with the exit test emitted right after `LOOP`.
//!
//! `DEF FNx` turns into a separate VM function whose single parameter is
//! popped from the operand stack on entry; a call site pushes the
//! argument and emits `CALL`.
//!
//! The opcode set has no counterpart for READ, INPUT, DIM, array cells,
//! the `^` operator, built-in functions, or string values outside PRINT
//! literals. Lowering those is an error naming the line instead of
//! producing code that would fail later without a position.

use crate::ast::*;
use crate::error::{BasicError, Result};
use std::fmt;
use std::mem;

/// The fixed opcode set of the stack machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    ConstI(i64),
    ConstF(f64),

    AddI,
    SubI,
    MulI,
    DivI,
    AddF,
    SubF,
    MulF,
    DivF,

    AndI,
    OrI,
    Neg,

    LtI,
    LeI,
    GtI,
    GeI,
    EqI,
    NeI,

    ItoF,
    FtoI,

    PrintI,
    PrintF,
    PrintB,

    PeekI,
    PeekF,
    PeekB,
    PokeI,
    PokeF,
    PokeB,

    LocalGet(String),
    LocalSet(String),
    GlobalGet(String),
    GlobalSet(String),

    Call(String),
    Ret,

    If,
    Else,
    EndIf,
    Loop,
    CBreak,
    Continue,
    EndLoop,

    Jump(u32),
    Gosub(u32),
    RetGs,
    Line(u32),
    Grow,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Op::ConstI(v) => write!(f, "CONSTI {}", v),
            Op::ConstF(x) => write!(f, "CONSTF {}", x),
            Op::AddI => write!(f, "ADDI"),
            Op::SubI => write!(f, "SUBI"),
            Op::MulI => write!(f, "MULI"),
            Op::DivI => write!(f, "DIVI"),
            Op::AddF => write!(f, "ADDF"),
            Op::SubF => write!(f, "SUBF"),
            Op::MulF => write!(f, "MULF"),
            Op::DivF => write!(f, "DIVF"),
            Op::AndI => write!(f, "ANDI"),
            Op::OrI => write!(f, "ORI"),
            Op::Neg => write!(f, "NEG"),
            Op::LtI => write!(f, "LTI"),
            Op::LeI => write!(f, "LEI"),
            Op::GtI => write!(f, "GTI"),
            Op::GeI => write!(f, "GEI"),
            Op::EqI => write!(f, "EQI"),
            Op::NeI => write!(f, "NEI"),
            Op::ItoF => write!(f, "ITOF"),
            Op::FtoI => write!(f, "FTOI"),
            Op::PrintI => write!(f, "PRINTI"),
            Op::PrintF => write!(f, "PRINTF"),
            Op::PrintB => write!(f, "PRINTB"),
            Op::PeekI => write!(f, "PEEKI"),
            Op::PeekF => write!(f, "PEEKF"),
            Op::PeekB => write!(f, "PEEKB"),
            Op::PokeI => write!(f, "POKEI"),
            Op::PokeF => write!(f, "POKEF"),
            Op::PokeB => write!(f, "POKEB"),
            Op::LocalGet(name) => write!(f, "LOCAL_GET {}", name),
            Op::LocalSet(name) => write!(f, "LOCAL_SET {}", name),
            Op::GlobalGet(name) => write!(f, "GLOBAL_GET {}", name),
            Op::GlobalSet(name) => write!(f, "GLOBAL_SET {}", name),
            Op::Call(name) => write!(f, "CALL {}", name),
            Op::Ret => write!(f, "RET"),
            Op::If => write!(f, "IF"),
            Op::Else => write!(f, "ELSE"),
            Op::EndIf => write!(f, "ENDIF"),
            Op::Loop => write!(f, "LOOP"),
            Op::CBreak => write!(f, "CBREAK"),
            Op::Continue => write!(f, "CONTINUE"),
            Op::EndLoop => write!(f, "ENDLOOP"),
            Op::Jump(line) => write!(f, "JUMP {}", line),
            Op::Gosub(line) => write!(f, "GOSUB {}", line),
            Op::RetGs => write!(f, "RETGS"),
            Op::Line(line) => write!(f, "LINE {}", line),
            Op::Grow => write!(f, "GROW"),
        }
    }
}

/// A lowered function body. The program itself becomes `main`; every DEF
/// contributes one more entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub code: Vec<Op>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Opcode listing for the IR dump option.
    pub fn listing(&self) -> String {
        let mut text = String::new();
        for function in &self.functions {
            text.push_str(&format!(
                "function {}({})\n",
                function.name,
                function.params.join(", ")
            ));
            for op in &function.code {
                text.push_str(&format!("    {}\n", op));
            }
        }
        text
    }
}

/// Lowers a parsed program to a [`Module`].
pub fn lower(prog: &Program) -> Result<Module> {
    let mut lowerer = Lowerer::new();

    for (line, stmt) in &prog.lines {
        lowerer.line = *line;
        lowerer.code.push(Op::Line(*line));
        lowerer.lower_statement(stmt)?;
    }

    let mut functions = vec![Function {
        name: "main".to_string(),
        params: Vec::new(),
        code: lowerer.code,
    }];
    functions.append(&mut lowerer.functions);

    Ok(Module { functions })
}

struct Lowerer<'a> {
    code: Vec<Op>,
    /// Step expressions of the open FOR loops, consumed by NEXT.
    step_stack: Vec<Option<&'a Expression>>,
    functions: Vec<Function>,
    line: u32,
}

impl<'a> Lowerer<'a> {
    fn new() -> Self {
        Self {
            code: Vec::new(),
            step_stack: Vec::new(),
            functions: Vec::new(),
            line: 0,
        }
    }

    fn unsupported(&self, what: &str) -> BasicError {
        BasicError::Runtime(format!(
            "{} cannot be lowered to stack code, at line {}",
            what, self.line
        ))
    }

    fn lower_statement(&mut self, stmt: &'a Statement) -> Result<()> {
        match stmt {
            Statement::Remark(_) | Statement::Data { .. } | Statement::Restore => Ok(()),

            Statement::Let { var, expr } => {
                if var.is_subscripted() {
                    return Err(self.unsupported("Array assignment"));
                }
                self.lower_expression(expr)?;
                self.code.push(Op::LocalSet(var.name.clone()));
                Ok(())
            }

            Statement::Print { items } => self.lower_print(items),

            Statement::Goto { target } => {
                self.code.push(Op::Jump(*target));
                Ok(())
            }

            Statement::If { cond, target } => {
                self.lower_expression(cond)?;
                self.code.push(Op::If);
                self.code.push(Op::Jump(*target));
                self.code.push(Op::EndIf);
                Ok(())
            }

            Statement::For {
                var,
                low,
                high,
                step,
            } => {
                self.lower_expression(low)?;
                self.code.push(Op::LocalSet(var.clone()));

                self.code.push(Op::Loop);
                // Break once the loop variable passes the limit.
                self.lower_expression(high)?;
                self.code.push(Op::ConstI(1));
                self.code.push(Op::AddI);
                self.code.push(Op::LocalGet(var.clone()));
                self.code.push(Op::LeI);
                self.code.push(Op::CBreak);

                self.step_stack.push(step.as_ref());
                Ok(())
            }

            Statement::Next { var } => {
                let step = match self.step_stack.pop() {
                    Some(step) => step,
                    None => return Err(self.unsupported("NEXT without an open FOR")),
                };

                self.code.push(Op::LocalGet(var.clone()));
                match step {
                    Some(expr) => self.lower_expression(expr)?,
                    None => self.code.push(Op::ConstI(1)),
                }
                self.code.push(Op::AddI);
                self.code.push(Op::LocalSet(var.clone()));
                self.code.push(Op::EndLoop);
                Ok(())
            }

            Statement::GoSub { target } => {
                self.code.push(Op::Gosub(*target));
                Ok(())
            }

            Statement::Return => {
                self.code.push(Op::RetGs);
                Ok(())
            }

            Statement::Def { name, param, body } => {
                let saved = mem::take(&mut self.code);
                let result = self.lower_expression(body);
                let mut body_code = mem::replace(&mut self.code, saved);
                result?;
                body_code.push(Op::Ret);
                self.functions.push(Function {
                    name: name.clone(),
                    params: vec![param.clone()],
                    code: body_code,
                });
                Ok(())
            }

            Statement::End | Statement::Stop => {
                self.code.push(Op::Ret);
                Ok(())
            }

            Statement::Read { .. } => Err(self.unsupported("READ")),
            Statement::Input { .. } => Err(self.unsupported("INPUT")),
            Statement::Dim { .. } => Err(self.unsupported("DIM")),
        }
    }

    /// Strings print byte by byte through PRINTB; separators become a
    /// single space. The statement appends its own newline byte unless
    /// the list ends in a separator.
    fn lower_print(&mut self, items: &'a [PrintItem]) -> Result<()> {
        for item in items {
            match item {
                PrintItem::Comma | PrintItem::Semicolon => {
                    self.code.push(Op::ConstI(' ' as i64));
                    self.code.push(Op::PrintB);
                }
                PrintItem::Text(s) => self.lower_text(s),
                PrintItem::Expr(Expression::Str(s)) => self.lower_text(s),
                PrintItem::Expr(expr) => {
                    self.lower_expression(expr)?;
                    self.code.push(Op::PrintI);
                }
            }
        }

        if items.last().map_or(true, |item| !item.is_separator()) {
            self.code.push(Op::ConstI('\n' as i64));
            self.code.push(Op::PrintB);
        }
        Ok(())
    }

    fn lower_text(&mut self, text: &str) {
        for c in text.chars() {
            self.code.push(Op::ConstI(c as i64));
            self.code.push(Op::PrintB);
        }
    }

    fn lower_expression(&mut self, expr: &'a Expression) -> Result<()> {
        match expr {
            Expression::Number(Number::Int(n)) => {
                self.code.push(Op::ConstI(*n));
                Ok(())
            }
            Expression::Number(Number::Float(x)) => {
                self.code.push(Op::ConstF(*x));
                Ok(())
            }

            Expression::Str(_) => Err(self.unsupported("A string expression")),

            Expression::Var(var) => {
                if var.is_subscripted() {
                    return Err(self.unsupported("An array reference"));
                }
                self.code.push(Op::LocalGet(var.name.clone()));
                Ok(())
            }

            Expression::Neg(inner) => {
                self.lower_expression(inner)?;
                self.code.push(Op::Neg);
                Ok(())
            }

            Expression::Group(inner) => self.lower_expression(inner),

            Expression::Binary { op, left, right } => {
                match op {
                    BinOp::Pow => return Err(self.unsupported("The '^' operator")),
                    BinOp::Mod => {
                        // Truncating remainder, l - r * trunc(l / r), with
                        // the operands re-evaluated. The quotient goes
                        // through the float path because DIVI rounds
                        // toward negative infinity and the remainder must
                        // carry the sign of the dividend, as in the tree
                        // walker.
                        self.lower_expression(left)?;
                        self.lower_expression(right)?;
                        self.lower_expression(left)?;
                        self.code.push(Op::ItoF);
                        self.lower_expression(right)?;
                        self.code.push(Op::ItoF);
                        self.code.push(Op::DivF);
                        self.code.push(Op::FtoI);
                        self.code.push(Op::MulI);
                        self.code.push(Op::SubI);
                    }
                    _ => {
                        self.lower_expression(left)?;
                        self.lower_expression(right)?;
                        self.code.push(match op {
                            BinOp::Add => Op::AddI,
                            BinOp::Sub => Op::SubI,
                            BinOp::Mul => Op::MulI,
                            BinOp::Div => Op::DivI,
                            BinOp::Pow | BinOp::Mod => unreachable!(),
                        });
                    }
                }
                Ok(())
            }

            Expression::Logical { op, left, right } => {
                self.lower_expression(left)?;
                self.lower_expression(right)?;
                self.code.push(match op {
                    RelOp::Eq => Op::EqI,
                    RelOp::Ne => Op::NeI,
                    RelOp::Lt => Op::LtI,
                    RelOp::Le => Op::LeI,
                    RelOp::Gt => Op::GtI,
                    RelOp::Ge => Op::GeI,
                });
                Ok(())
            }

            Expression::Builtin { .. } => Err(self.unsupported("A built-in call")),

            Expression::Call { name, args } => {
                for arg in args {
                    self.lower_expression(arg)?;
                }
                self.code.push(Op::Call(name.clone()));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn lower_source(source: &str) -> Result<Module> {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.tokenize();
        assert!(lexer.take_errors().is_empty());
        let prog = Parser::new(tokens).parse().expect("parse failure");
        lower(&prog)
    }

    #[test]
    fn test_let_lowering() {
        let module = lower_source("10 LET A = 2 + 3\n20 END\n").unwrap();
        let main = module.get("main").unwrap();
        assert_eq!(
            main.code,
            vec![
                Op::Line(10),
                Op::ConstI(2),
                Op::ConstI(3),
                Op::AddI,
                Op::LocalSet("A".to_string()),
                Op::Line(20),
                Op::Ret,
            ]
        );
    }

    #[test]
    fn test_float_literal_lowering() {
        let module = lower_source("10 LET A = 1.5\n20 END\n").unwrap();
        assert!(module.get("main").unwrap().code.contains(&Op::ConstF(1.5)));
    }

    #[test]
    fn test_if_lowering() {
        let module = lower_source("10 IF A = 1 THEN 30\n20 PRINT 0\n30 END\n").unwrap();
        let main = module.get("main").unwrap();
        let idx = main.code.iter().position(|op| *op == Op::If).unwrap();
        assert_eq!(main.code[idx - 1], Op::EqI);
        assert_eq!(main.code[idx + 1], Op::Jump(30));
        assert_eq!(main.code[idx + 2], Op::EndIf);
    }

    #[test]
    fn test_for_next_bracket() {
        let module = lower_source(
            "10 FOR I = 1 TO 3\n20 PRINT I\n30 NEXT I\n40 END\n",
        )
        .unwrap();
        let code = &module.get("main").unwrap().code;
        let loop_idx = code.iter().position(|op| *op == Op::Loop).unwrap();
        let break_idx = code.iter().position(|op| *op == Op::CBreak).unwrap();
        let end_idx = code.iter().position(|op| *op == Op::EndLoop).unwrap();
        assert!(loop_idx < break_idx && break_idx < end_idx);
        // The exit test compares limit + 1 against the loop variable.
        assert_eq!(code[break_idx - 1], Op::LeI);
        assert_eq!(code[break_idx - 2], Op::LocalGet("I".to_string()));
    }

    #[test]
    fn test_def_becomes_function() {
        let module = lower_source("10 DEF FNS(X) = X * X\n20 PRINT FNS(4)\n30 END\n").unwrap();
        let fns = module.get("FNS").unwrap();
        assert_eq!(fns.params, vec!["X".to_string()]);
        assert_eq!(
            fns.code,
            vec![
                Op::LocalGet("X".to_string()),
                Op::LocalGet("X".to_string()),
                Op::MulI,
                Op::Ret,
            ]
        );
        let main = module.get("main").unwrap();
        assert!(main.code.contains(&Op::Call("FNS".to_string())));
    }

    #[test]
    fn test_mod_expansion() {
        let module = lower_source("10 LET A = 7 % 3\n20 END\n").unwrap();
        let code = &module.get("main").unwrap().code;
        let tail = &code[1..12];
        assert_eq!(
            tail,
            &[
                Op::ConstI(7),
                Op::ConstI(3),
                Op::ConstI(7),
                Op::ItoF,
                Op::ConstI(3),
                Op::ItoF,
                Op::DivF,
                Op::FtoI,
                Op::MulI,
                Op::SubI,
                Op::LocalSet("A".to_string()),
            ]
        );
    }

    #[test]
    fn test_print_string_bytes() {
        let module = lower_source("10 PRINT \"HI\"\n20 END\n").unwrap();
        let code = &module.get("main").unwrap().code;
        assert_eq!(
            &code[1..7],
            &[
                Op::ConstI('H' as i64),
                Op::PrintB,
                Op::ConstI('I' as i64),
                Op::PrintB,
                Op::ConstI('\n' as i64),
                Op::PrintB,
            ]
        );
    }

    #[test]
    fn test_unsupported_statements() {
        assert!(lower_source("10 READ A\n20 DATA 1\n30 END\n").is_err());
        assert!(lower_source("10 INPUT A\n20 END\n").is_err());
        assert!(lower_source("10 DIM A(5)\n20 END\n").is_err());
        assert!(lower_source("10 LET A(1) = 2\n20 END\n").is_err());
        assert!(lower_source("10 LET A = 2 ^ 3\n20 END\n").is_err());
        assert!(lower_source("10 LET A = SIN(1)\n20 END\n").is_err());
    }
}
