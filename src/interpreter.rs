//! Tree-walking interpreter for BASIC programs.
//!
//! Executes a parsed [`Program`] directly against the syntax tree. The
//! interpreter owns all runtime state: scalar variables, one and two
//! dimensional arrays, the DATA pool and its cursor, the FOR loop stack,
//! the pending GOSUB return slot, user functions defined with DEF, and
//! the PRINT column cursor.
//!
//! ## Preprocessing
//!
//! Before the first statement runs, the interpreter
//!
//! 1. sorts the program's line numbers into the jump table,
//! 2. harvests every DATA statement in line order into a flat pool,
//! 3. checks that exactly one END exists and sits on the last line,
//! 4. matches every FOR with its NEXT so loop exit is a direct jump.
//!
//! ## Main loop
//!
//! The program counter indexes the sorted line vector. Each statement
//! either falls through to the next line, branches after setting the
//! counter itself, or halts the run. Jumps translate a BASIC line number
//! to a counter index by binary search.
//!
//! ## Error policy
//!
//! Control-flow misuse (NEXT without FOR, a mismatched NEXT variable,
//! RETURN without GOSUB, a nested GOSUB) is reported to the output and
//! execution continues on the following line. Running out of DATA during
//! READ ends the program cleanly. Everything else terminates the run with
//! an error naming the line.

use crate::ast::*;
use crate::builtin::Builtins;
use crate::error::{BasicError, Result};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

/// Execution options chosen by the driver.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Uppercase string values read by INPUT.
    pub uppercase: bool,
    /// Lowest valid array subscript.
    pub array_base: i64,
    /// Treat subscripted string variables as character slices and reject
    /// string arrays.
    pub slicing: bool,
    /// Fall through to the next line when a jump target does not exist.
    pub go_next: bool,
    /// Announce every executed line.
    pub trace: bool,
    /// Column width of the PRINT comma zones.
    pub tabs: usize,
    /// Seed for RND.
    pub random_seed: Option<u64>,
    /// INPUT values taken from a file instead of standard input.
    pub input_lines: Option<Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            uppercase: false,
            array_base: 1,
            slicing: false,
            go_next: false,
            trace: false,
            tabs: 15,
            random_seed: None,
            input_lines: None,
        }
    }
}

/// What the main loop should do after one statement.
enum Flow {
    /// Fall through to the next line.
    Advance,
    /// The statement already placed the program counter.
    Branch,
    /// Terminate cleanly.
    Halt,
}

/// Counters reported by the statistics options.
#[derive(Debug, Clone, Copy)]
pub struct RunStats {
    pub elapsed: Duration,
    pub statements: u64,
}

pub struct Interpreter<'a> {
    prog: &'a Program,
    settings: Settings,
    builtins: Builtins,
    out: &'a mut dyn Write,

    // Symbols. Scalars and arrays are separate namespaces.
    vars: HashMap<String, Value>,
    lists: HashMap<String, Vec<Value>>,
    tables: HashMap<String, Vec<Vec<Value>>>,
    functions: HashMap<String, (&'a str, &'a Expression)>,

    // DATA pool and cursor.
    data: Vec<Value>,
    dc: usize,

    // Control flow.
    stat: Vec<u32>,
    pc: usize,
    loops: Vec<(usize, f64)>,
    loopend: HashMap<usize, usize>,
    gosub: Option<u32>,

    // PRINT cursor, in [0, 80).
    column: usize,

    input_index: usize,
    statements: u64,
    start: Instant,
}

impl<'a> Interpreter<'a> {
    pub fn new(prog: &'a Program, settings: Settings, out: &'a mut dyn Write) -> Self {
        let builtins = Builtins::new(settings.random_seed);
        Self {
            prog,
            settings,
            builtins,
            out,
            vars: HashMap::new(),
            lists: HashMap::new(),
            tables: HashMap::new(),
            functions: HashMap::new(),
            data: Vec::new(),
            dc: 0,
            stat: Vec::new(),
            pc: 0,
            loops: Vec::new(),
            loopend: HashMap::new(),
            gosub: None,
            column: 0,
            input_index: 0,
            statements: 0,
            start: Instant::now(),
        }
    }

    /// Runs the whole program: preprocessing first, then the fetch and
    /// dispatch loop until END, STOP, DATA underflow or the last line.
    pub fn run(&mut self) -> Result<()> {
        self.stat = self.prog.line_numbers();
        self.pc = 0;

        self.collect_data();
        self.check_end()?;
        self.check_loops()?;

        while self.pc < self.stat.len() {
            let line = self.stat[self.pc];
            if self.settings.trace {
                writeln!(self.out, "Executing line {}", line)?;
                self.column = 0;
            }

            let prog = self.prog;
            let stmt = &prog.lines[&line];
            self.statements += 1;

            match self.execute_statement(stmt)? {
                Flow::Advance => self.pc += 1,
                Flow::Branch => {}
                Flow::Halt => break,
            }
        }

        self.out.flush()?;
        Ok(())
    }

    /// Wall clock and statement counters for the statistics options.
    pub fn stats(&self) -> RunStats {
        RunStats {
            elapsed: self.start.elapsed(),
            statements: self.statements,
        }
    }

    // ----- preprocessing -------------------------------------------------

    /// Collects every DATA item, in ascending line order, into the pool.
    fn collect_data(&mut self) {
        self.data.clear();
        for stmt in self.prog.lines.values() {
            if let Statement::Data { items } = stmt {
                self.data.extend(items.iter().cloned());
            }
        }
        self.dc = 0;
    }

    /// A program must contain exactly one END, on its last line.
    fn check_end(&self) -> Result<()> {
        let end_lines: Vec<u32> = self
            .prog
            .lines
            .iter()
            .filter(|(_, stmt)| matches!(stmt, Statement::End))
            .map(|(line, _)| *line)
            .collect();

        match (end_lines.as_slice(), self.stat.last()) {
            ([], _) | (_, None) => Err(BasicError::Runtime(
                "Undefined END instruction".to_string(),
            )),
            ([only], Some(last)) if only == last => Ok(()),
            _ => Err(BasicError::Runtime(
                "END is not the last instruction".to_string(),
            )),
        }
    }

    /// Records the NEXT that closes every FOR, scanning forward past NEXT
    /// statements that belong to other variables.
    fn check_loops(&mut self) -> Result<()> {
        let prog = self.prog;
        for pc in 0..self.stat.len() {
            let loopvar = match &prog.lines[&self.stat[pc]] {
                Statement::For { var, .. } => var,
                _ => continue,
            };

            let found = (pc + 1..self.stat.len()).find(|i| {
                matches!(&prog.lines[&self.stat[*i]],
                         Statement::Next { var } if var == loopvar)
            });

            match found {
                Some(i) => {
                    self.loopend.insert(pc, i);
                }
                None => {
                    return Err(BasicError::Runtime(format!(
                        "FOR without NEXT at line {}",
                        self.stat[pc]
                    )));
                }
            }
        }
        Ok(())
    }

    // ----- statement dispatch --------------------------------------------

    fn execute_statement(&mut self, stmt: &'a Statement) -> Result<Flow> {
        match stmt {
            Statement::Remark(_) | Statement::Data { .. } => Ok(Flow::Advance),

            Statement::Let { var, expr } => {
                let value = self.evaluate(expr)?;
                self.assign(var, value)?;
                Ok(Flow::Advance)
            }

            Statement::Read { vars } => self.execute_read(vars),

            Statement::Restore => {
                self.dc = 0;
                Ok(Flow::Advance)
            }

            Statement::Print { items } => self.execute_print(items),

            Statement::Input { label, vars } => self.execute_input(label.as_deref(), vars),

            Statement::Goto { target } => {
                self.goto(*target, "GOTO")?;
                Ok(Flow::Branch)
            }

            Statement::If { cond, target } => {
                if self.evaluate(cond)?.is_truthy() {
                    self.goto(*target, "THEN")?;
                    Ok(Flow::Branch)
                } else {
                    Ok(Flow::Advance)
                }
            }

            Statement::For {
                var,
                low,
                high,
                step,
            } => self.execute_for(var, low, high, step.as_ref()),

            Statement::Next { var } => self.execute_next(var),

            Statement::GoSub { target } => {
                let lineno = self.line();
                if self.gosub.is_some() {
                    self.report(&format!(
                        "A subroutine is already in process at line {}",
                        lineno
                    ))?;
                    return Ok(Flow::Advance);
                }
                self.gosub = Some(lineno);
                self.goto(*target, "GOSUB")?;
                Ok(Flow::Branch)
            }

            Statement::Return => {
                let lineno = self.line();
                match self.gosub.take() {
                    None => {
                        self.report(&format!("RETURN without GOSUB at line {}", lineno))?;
                        Ok(Flow::Advance)
                    }
                    Some(back) => {
                        // Jump to the calling line itself; the normal
                        // advance then lands on the line after it.
                        self.goto(back, "RETURN")?;
                        Ok(Flow::Advance)
                    }
                }
            }

            Statement::Def { name, param, body } => {
                self.functions.insert(name.clone(), (param.as_str(), body));
                Ok(Flow::Advance)
            }

            Statement::Dim { items } => {
                for item in items {
                    self.execute_dim(item)?;
                }
                Ok(Flow::Advance)
            }

            Statement::End | Statement::Stop => Ok(Flow::Halt),
        }
    }

    /// READ takes the next pool values in order. Exhausting the pool ends
    /// the program cleanly.
    fn execute_read(&mut self, vars: &[Variable]) -> Result<Flow> {
        for target in vars {
            if self.dc >= self.data.len() {
                return Ok(Flow::Halt);
            }
            let datum = self.data[self.dc].clone();

            let value = if target.is_string() {
                match datum {
                    Value::Str(_) => datum,
                    Value::Number(n) => Value::Str(format_number(n)),
                }
            } else {
                match datum {
                    Value::Number(_) => datum,
                    Value::Str(s) => match s.trim().parse::<f64>() {
                        Ok(n) => Value::Number(n),
                        Err(_) => {
                            return Err(BasicError::Runtime(format!(
                                "The value {} could not be read at line {}",
                                s,
                                self.line()
                            )));
                        }
                    },
                }
            };

            self.assign(target, value)?;
            self.dc += 1;
        }
        Ok(Flow::Advance)
    }

    fn execute_print(&mut self, items: &'a [PrintItem]) -> Result<Flow> {
        for item in items {
            match item {
                PrintItem::Comma => self.pad(self.settings.tabs)?,
                PrintItem::Semicolon => self.print_str(" ")?,
                PrintItem::Text(s) => self.print_str(s)?,
                PrintItem::Expr(expr) => {
                    let text = match self.evaluate(expr)? {
                        Value::Number(n) => format_number(n),
                        Value::Str(s) => s,
                    };
                    self.print_str(&text)?;
                }
            }
        }

        if items.last().map_or(true, |item| !item.is_separator()) {
            self.newline()?;
        }
        Ok(Flow::Advance)
    }

    fn execute_input(&mut self, label: Option<&str>, vars: &'a [Variable]) -> Result<Flow> {
        if let Some(label) = label {
            if self.settings.input_lines.is_none() {
                write!(self.out, "{} ", label)?;
                self.out.flush()?;
            }
        }

        for target in vars {
            let line = self.read_input_line()?;

            let value = if target.is_string() {
                let text = if self.settings.uppercase {
                    line.to_ascii_uppercase()
                } else {
                    line
                };
                Value::Str(text)
            } else {
                let text = line.trim().to_string();
                match text.parse::<i64>() {
                    Ok(n) => Value::Number(n as f64),
                    Err(_) => match text.parse::<f64>() {
                        Ok(x) => Value::Number(x),
                        Err(_) => {
                            return Err(BasicError::Runtime(format!(
                                "The value {} could not be read at line {}",
                                text,
                                self.line()
                            )));
                        }
                    },
                }
            };

            self.assign(target, value)?;
        }
        Ok(Flow::Advance)
    }

    fn read_input_line(&mut self) -> Result<String> {
        match &self.settings.input_lines {
            Some(lines) => {
                if self.input_index < lines.len() {
                    let line = lines[self.input_index].clone();
                    self.input_index += 1;
                    Ok(line)
                } else {
                    Err(BasicError::Runtime(
                        "No more input data available in the file".to_string(),
                    ))
                }
            }
            None => {
                let mut buffer = String::new();
                let read = std::io::stdin().lock().read_line(&mut buffer)?;
                if read == 0 {
                    return Err(BasicError::Runtime(
                        "No more input data available".to_string(),
                    ));
                }
                Ok(buffer.trim_end_matches(['\n', '\r']).to_string())
            }
        }
    }

    /// FOR runs its body at least once. The loop condition is tested only
    /// when control comes back through the same FOR, using the step value
    /// captured at first entry.
    fn execute_for(
        &mut self,
        var: &'a str,
        low: &'a Expression,
        high: &'a Expression,
        step: Option<&'a Expression>,
    ) -> Result<Flow> {
        let first_entry = self.loops.last().map_or(true, |(pc, _)| *pc != self.pc);

        if first_entry {
            let step_val = match step {
                Some(expr) => self.number_value(expr, "FOR step")?,
                None => 1.0,
            };
            let low_val = self.evaluate(low)?;
            self.vars.insert(var.to_string(), low_val);
            self.loops.push((self.pc, step_val));
        } else {
            let step_val = self.loops.last().map(|(_, s)| *s).unwrap_or(1.0);
            let current = match self.vars.get(var) {
                Some(Value::Number(n)) => *n,
                _ => {
                    return Err(BasicError::Type(format!(
                        "FOR variable {} must be numeric at line {}",
                        var,
                        self.line()
                    )));
                }
            };
            let high_val = self.number_value(high, "FOR limit")?;
            let next = current + step_val;
            let keep_going = if step_val < 0.0 {
                next >= high_val
            } else {
                next <= high_val
            };

            if keep_going {
                self.vars.insert(var.to_string(), Value::Number(next));
            } else {
                // Loop complete. Jump to the matching NEXT; the advance
                // after it leaves the loop.
                self.pc = self.loopend[&self.pc];
                self.loops.pop();
            }
        }
        Ok(Flow::Advance)
    }

    fn execute_next(&mut self, var: &str) -> Result<Flow> {
        let lineno = self.line();

        let for_pc = match self.loops.last() {
            Some((pc, _)) => *pc,
            None => {
                self.report(&format!("NEXT without FOR at line {}", lineno))?;
                return Ok(Flow::Advance);
            }
        };

        let prog = self.prog;
        let forvar = match &prog.lines[&self.stat[for_pc]] {
            Statement::For { var, .. } => var.as_str(),
            _ => unreachable!("loop stack entries always point at FOR"),
        };

        if forvar != var {
            self.report(&format!("NEXT doesn't match FOR at line {}", lineno))?;
            return Ok(Flow::Advance);
        }

        self.pc = for_pc;
        Ok(Flow::Branch)
    }

    fn execute_dim(&mut self, item: &DimItem) -> Result<()> {
        if self.settings.slicing && item.name.ends_with('$') {
            return Err(BasicError::Runtime(format!(
                "String arrays are disabled while slicing is enabled, at line {}",
                self.line()
            )));
        }

        match item.size2 {
            None => {
                self.lists
                    .insert(item.name.clone(), vec![Value::Number(0.0); item.size1]);
            }
            Some(size2) => {
                let row = vec![Value::Number(0.0); size2];
                self.tables
                    .insert(item.name.clone(), vec![row; item.size1]);
            }
        }
        Ok(())
    }

    // ----- jumps ---------------------------------------------------------

    fn line(&self) -> u32 {
        self.stat.get(self.pc).copied().unwrap_or(0)
    }

    /// Points the program counter at a BASIC line. With the go-next
    /// policy an unknown target just falls through to the following line.
    fn goto(&mut self, lineno: u32, context: &str) -> Result<()> {
        match self.stat.binary_search(&lineno) {
            Ok(index) => {
                self.pc = index;
                Ok(())
            }
            Err(_) => {
                if self.settings.go_next {
                    self.pc += 1;
                    Ok(())
                } else {
                    Err(BasicError::Runtime(format!(
                        "Undefined line {} in {} instruction, located at line {}",
                        lineno,
                        context,
                        self.line()
                    )))
                }
            }
        }
    }

    // ----- assignment ----------------------------------------------------

    fn assign(&mut self, target: &Variable, value: Value) -> Result<()> {
        let lineno = self.line();

        if !target.is_subscripted() {
            self.vars.insert(target.name.clone(), value);
            return Ok(());
        }

        if self.settings.slicing && target.is_string() {
            return Err(BasicError::Runtime(format!(
                "Cannot assign to a string slice at line {}",
                lineno
            )));
        }

        let x = self.subscript(target.dim1.as_deref().unwrap())?;
        let base = self.settings.array_base;

        match target.dim2.as_deref() {
            None => {
                let list = self
                    .lists
                    .entry(target.name.clone())
                    .or_insert_with(|| vec![Value::Number(0.0); 10]);
                let index = x - base;
                if index < 0 || index as usize >= list.len() {
                    return Err(BasicError::Index(format!(
                        "Dimension is too large at line {}",
                        lineno
                    )));
                }
                list[index as usize] = value;
            }
            Some(dim2) => {
                let y = self.subscript(dim2)?;
                let table = self.tables.entry(target.name.clone()).or_insert_with(|| {
                    vec![vec![Value::Number(0.0); 10]; 10]
                });
                let (ix, iy) = (x - base, y - base);
                if ix < 0
                    || iy < 0
                    || ix as usize >= table.len()
                    || iy as usize >= table[0].len()
                {
                    return Err(BasicError::Index(format!(
                        "Dimensions are too large at line {}",
                        lineno
                    )));
                }
                table[ix as usize][iy as usize] = value;
            }
        }
        Ok(())
    }

    fn subscript(&mut self, expr: &Expression) -> Result<i64> {
        match self.evaluate(expr)? {
            Value::Number(n) => Ok(n.trunc() as i64),
            other => Err(BasicError::Type(format!(
                "Array subscript must be numeric, was obtained: {} at line {}",
                other.type_name(),
                self.line()
            ))),
        }
    }

    // ----- expression evaluation ------------------------------------------

    fn evaluate(&mut self, expr: &Expression) -> Result<Value> {
        match expr {
            Expression::Number(n) => Ok(Value::Number(n.as_f64())),
            Expression::Str(s) => Ok(Value::Str(s.clone())),
            Expression::Group(inner) => self.evaluate(inner),
            Expression::Var(var) => self.variable_value(var),

            Expression::Neg(inner) => match self.evaluate(inner)? {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(BasicError::Type(format!(
                    "Operand of '-' must be numeric, was obtained: {} at line {}",
                    other.type_name(),
                    self.line()
                ))),
            },

            Expression::Binary { op, left, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.binary(*op, left, right)
            }

            Expression::Logical { op, left, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.relational(*op, left, right)
            }

            Expression::Builtin { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.evaluate(arg)?);
                }
                self.builtins.call(name, &values)
            }

            Expression::Call { name, args } => self.call_function(name, args),
        }
    }

    fn binary(&self, op: BinOp, left: Value, right: Value) -> Result<Value> {
        let lineno = self.line();

        if let (Value::Str(l), Value::Str(r)) = (&left, &right) {
            return match op {
                BinOp::Add => Ok(Value::Str(format!("{}{}", l, r))),
                _ => Err(BasicError::Type(format!(
                    "Incorrect operator {} for strings at line {}",
                    op, lineno
                ))),
            };
        }

        let (l, r) = match (&left, &right) {
            (Value::Number(l), Value::Number(r)) => (*l, *r),
            _ => {
                return Err(BasicError::Type(format!(
                    "{} The operands must be numeric at line {}",
                    op, lineno
                )));
            }
        };

        let result = match op {
            BinOp::Add => l + r,
            BinOp::Sub => l - r,
            BinOp::Mul => l * r,
            BinOp::Div => {
                if r == 0.0 {
                    return Err(BasicError::Runtime(format!(
                        "Division by zero at line {}",
                        lineno
                    )));
                }
                l / r
            }
            BinOp::Pow => l.powf(r),
            BinOp::Mod => {
                let (li, ri) = (l.trunc() as i64, r.trunc() as i64);
                if ri == 0 {
                    return Err(BasicError::Runtime(format!(
                        "Division by zero at line {}",
                        lineno
                    )));
                }
                (li % ri) as f64
            }
        };
        Ok(Value::Number(result))
    }

    fn relational(&self, op: RelOp, left: Value, right: Value) -> Result<Value> {
        let truth = match (&left, &right) {
            (Value::Str(l), Value::Str(r)) => match op {
                RelOp::Eq => l == r,
                RelOp::Ne => l != r,
                RelOp::Lt => l < r,
                RelOp::Le => l <= r,
                RelOp::Gt => l > r,
                RelOp::Ge => l >= r,
            },
            (Value::Number(l), Value::Number(r)) => match op {
                RelOp::Eq => l == r,
                RelOp::Ne => l != r,
                RelOp::Lt => l < r,
                RelOp::Le => l <= r,
                RelOp::Gt => l > r,
                RelOp::Ge => l >= r,
            },
            _ => {
                return Err(BasicError::Type(format!(
                    "{} The operands must be numeric at line {}",
                    op,
                    self.line()
                )));
            }
        };
        Ok(Value::Number(if truth { 1.0 } else { 0.0 }))
    }

    /// Calls a DEF function. The parameter is bound in the scalar map for
    /// the duration of the call and the previous binding is put back
    /// afterwards, so a caller's same-named variable survives.
    fn call_function(&mut self, name: &str, args: &[Expression]) -> Result<Value> {
        let lineno = self.line();
        let (param, body) = match self.functions.get(name) {
            Some(entry) => *entry,
            None => {
                return Err(BasicError::UndefinedFunction(format!(
                    "{} at line {}",
                    name, lineno
                )));
            }
        };

        if args.len() != 1 {
            return Err(BasicError::Argument(format!(
                "{}() expects 1 argument, got {} at line {}",
                name,
                args.len(),
                lineno
            )));
        }

        let argument = self.evaluate(&args[0])?;
        let saved = self.vars.insert(param.to_string(), argument);
        let result = self.evaluate(body);
        match saved {
            Some(old) => {
                self.vars.insert(param.to_string(), old);
            }
            None => {
                self.vars.remove(param);
            }
        }
        result
    }

    fn variable_value(&mut self, var: &Variable) -> Result<Value> {
        let lineno = self.line();

        if !var.is_subscripted() {
            return self.vars.get(&var.name).cloned().ok_or_else(|| {
                BasicError::UndefinedVariable(format!("'{}' at line {}", var.name, lineno))
            });
        }

        if self.settings.slicing && var.is_string() {
            return self.string_slice(var);
        }

        let x = self.subscript(var.dim1.as_deref().unwrap())?;
        let base = self.settings.array_base;

        match var.dim2.as_deref() {
            None => {
                let index = x - base;
                let list = self.lists.get(&var.name).ok_or_else(|| {
                    BasicError::UndefinedVariable(format!("'{}' at line {}", var.name, lineno))
                })?;
                if index < 0 || index as usize >= list.len() {
                    return Err(BasicError::Index(format!(
                        "Index of {} is out of bounds at line {}",
                        var.name, lineno
                    )));
                }
                Ok(list[index as usize].clone())
            }
            Some(dim2) => {
                let y = self.subscript(dim2)?;
                let (ix, iy) = (x - base, y - base);
                let table = self.tables.get(&var.name).ok_or_else(|| {
                    BasicError::UndefinedVariable(format!("'{}' at line {}", var.name, lineno))
                })?;
                if ix < 0
                    || iy < 0
                    || ix as usize >= table.len()
                    || iy as usize >= table[0].len()
                {
                    return Err(BasicError::Index(format!(
                        "Indexes of {} are out of bounds at line {}",
                        var.name, lineno
                    )));
                }
                Ok(table[ix as usize][iy as usize].clone())
            }
        }
    }

    /// With slicing enabled, `A$(I)` is the suffix of the scalar starting
    /// at character I and `A$(I, J)` the inclusive substring. Positions
    /// are 1-based.
    fn string_slice(&mut self, var: &Variable) -> Result<Value> {
        let lineno = self.line();
        let x = self.subscript(var.dim1.as_deref().unwrap())?;
        let y = match var.dim2.as_deref() {
            Some(expr) => Some(self.subscript(expr)?),
            None => None,
        };

        let text = match self.vars.get(&var.name) {
            Some(Value::Str(s)) => s.clone(),
            Some(_) => {
                return Err(BasicError::Type(format!(
                    "Slicing expects a string variable, at line {}",
                    lineno
                )));
            }
            None => {
                return Err(BasicError::UndefinedVariable(format!(
                    "'{}' at line {}",
                    var.name, lineno
                )));
            }
        };

        let len = text.chars().count() as i64;
        let end = y.unwrap_or(len);
        if x < 1 || x > len || end < x || end > len {
            return Err(BasicError::Index(format!(
                "Slice of {} is out of bounds at line {}",
                var.name, lineno
            )));
        }

        let sliced: String = text
            .chars()
            .skip((x - 1) as usize)
            .take((end - x + 1) as usize)
            .collect();
        Ok(Value::Str(sliced))
    }

    fn number_value(&mut self, expr: &Expression, what: &str) -> Result<f64> {
        match self.evaluate(expr)? {
            Value::Number(n) => Ok(n),
            other => Err(BasicError::Type(format!(
                "{} must be numeric, was obtained: {} at line {}",
                what,
                other.type_name(),
                self.line()
            ))),
        }
    }

    // ----- PRINT cursor ---------------------------------------------------

    fn print_str(&mut self, s: &str) -> Result<()> {
        write!(self.out, "{}", s)?;
        self.column += s.chars().count();
        if self.column >= 80 {
            self.newline()?;
        }
        Ok(())
    }

    /// Advances with spaces until the column is a multiple of `width`.
    fn pad(&mut self, width: usize) -> Result<()> {
        if width == 0 {
            return Ok(());
        }
        while self.column % width != 0 {
            self.print_str(" ")?;
        }
        Ok(())
    }

    fn newline(&mut self) -> Result<()> {
        writeln!(self.out)?;
        self.column = 0;
        Ok(())
    }

    /// Non-fatal reports share the program's output stream.
    fn report(&mut self, message: &str) -> Result<()> {
        if self.column != 0 {
            self.newline()?;
        }
        writeln!(self.out, "{}", message)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn run_program(source: &str, settings: Settings) -> Result<String> {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.tokenize();
        assert!(lexer.take_errors().is_empty());
        let prog = Parser::new(tokens).parse().expect("parse failure");

        let mut out = Vec::new();
        {
            let mut interp = Interpreter::new(&prog, settings, &mut out);
            interp.run()?;
        }
        Ok(String::from_utf8(out).expect("non-utf8 output"))
    }

    fn run(source: &str) -> String {
        run_program(source, Settings::default()).expect("runtime failure")
    }

    #[test]
    fn test_sum_loop() {
        let output = run(
            "10 LET S = 0\n\
             20 FOR I = 1 TO 10\n\
             30 LET S = S + I\n\
             40 NEXT I\n\
             50 PRINT S\n\
             60 END\n",
        );
        assert_eq!(output, "55\n");
    }

    #[test]
    fn test_for_with_step() {
        let output = run(
            "10 LET S = 0\n\
             20 FOR I = 10 TO 1 STEP -2\n\
             30 LET S = S + I\n\
             40 NEXT I\n\
             50 PRINT S\n\
             60 END\n",
        );
        // 10 + 8 + 6 + 4 + 2
        assert_eq!(output, "30\n");
    }

    #[test]
    fn test_nested_loops() {
        let output = run(
            "10 LET C = 0\n\
             20 FOR I = 1 TO 3\n\
             30 FOR J = 1 TO 4\n\
             40 LET C = C + 1\n\
             50 NEXT J\n\
             60 NEXT I\n\
             70 PRINT C\n\
             80 END\n",
        );
        assert_eq!(output, "12\n");
    }

    #[test]
    fn test_goto_and_if() {
        let output = run(
            "10 LET I = 0\n\
             20 LET I = I + 1\n\
             30 IF I < 3 THEN 20\n\
             40 PRINT I\n\
             50 END\n",
        );
        assert_eq!(output, "3\n");
    }

    #[test]
    fn test_gosub_return() {
        let output = run(
            "10 GOSUB 100\n\
             20 PRINT \"X\"\n\
             30 GOTO 200\n\
             100 PRINT \"Y\"\n\
             110 RETURN\n\
             200 END\n",
        );
        assert_eq!(output, "Y\nX\n");
    }

    #[test]
    fn test_read_data_restore() {
        let output = run(
            "10 READ A, B\n\
             20 RESTORE\n\
             30 READ C\n\
             40 PRINT A; B; C\n\
             50 DATA 4, 7\n\
             60 END\n",
        );
        assert_eq!(output, "4 7 4\n");
    }

    #[test]
    fn test_read_underflow_ends_cleanly() {
        let output = run(
            "10 READ A\n\
             20 PRINT A\n\
             30 GOTO 10\n\
             40 DATA 1, 2\n\
             50 END\n",
        );
        assert_eq!(output, "1\n2\n");
    }

    #[test]
    fn test_print_tab_zones() {
        let output = run("10 PRINT \"A\", \"B\"\n20 END\n");
        assert_eq!(output, format!("A{}B\n", " ".repeat(14)));
    }

    #[test]
    fn test_print_string_expression_pair() {
        let output = run(
            "10 LET S = 55\n\
             20 PRINT \"THE SUM IS: \"S\n\
             30 END\n",
        );
        assert_eq!(output, "THE SUM IS: 55\n");
    }

    #[test]
    fn test_print_trailing_separator_suppresses_newline() {
        let output = run("10 PRINT \"A\";\n20 PRINT \"B\"\n30 END\n");
        assert_eq!(output, "A B\n");
    }

    #[test]
    fn test_two_dim_array() {
        let output = run(
            "10 DIM A(2, 2)\n\
             20 LET A(1, 1) = 7\n\
             30 PRINT A(1, 1)\n\
             40 END\n",
        );
        assert_eq!(output, "7\n");
    }

    #[test]
    fn test_auto_allocated_list() {
        let output = run(
            "10 LET A(3) = 9\n\
             20 PRINT A(3)\n\
             30 END\n",
        );
        assert_eq!(output, "9\n");
    }

    #[test]
    fn test_array_bounds_checked() {
        let err = run_program(
            "10 DIM A(2)\n20 LET A(5) = 1\n30 END\n",
            Settings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BasicError::Index(_)));
    }

    #[test]
    fn test_array_base_zero() {
        let output = run_program(
            "10 DIM A(3)\n\
             20 LET A(0) = 5\n\
             30 PRINT A(0)\n\
             40 END\n",
            Settings {
                array_base: 0,
                ..Settings::default()
            },
        )
        .unwrap();
        assert_eq!(output, "5\n");
    }

    #[test]
    fn test_def_and_call() {
        let output = run(
            "10 DEF FNS(X) = X * X\n\
             20 LET X = 3\n\
             30 PRINT FNS(4)\n\
             40 PRINT X\n\
             50 END\n",
        );
        // The caller's X survives the call.
        assert_eq!(output, "16\n3\n");
    }

    #[test]
    fn test_builtin_in_expression() {
        let output = run(
            "10 LET A = INT(2.9) + ABS(-2)\n\
             20 PRINT A\n\
             30 END\n",
        );
        assert_eq!(output, "4\n");
    }

    #[test]
    fn test_string_concat_and_compare() {
        let output = run(
            "10 LET A$ = \"FOO\" + \"BAR\"\n\
             20 IF A$ = \"FOOBAR\" THEN 40\n\
             30 PRINT \"NO\"\n\
             40 PRINT A$\n\
             50 END\n",
        );
        assert_eq!(output, "FOOBAR\n");
    }

    #[test]
    fn test_end_must_be_last() {
        let err = run_program("10 END\n20 PRINT 1\n", Settings::default()).unwrap_err();
        assert!(matches!(err, BasicError::Runtime(_)));
    }

    #[test]
    fn test_missing_end_fails_preflight() {
        let err = run_program("10 PRINT 1\n", Settings::default()).unwrap_err();
        assert!(matches!(err, BasicError::Runtime(_)));
    }

    #[test]
    fn test_for_without_next_fails_preflight() {
        let err = run_program(
            "10 FOR I = 1 TO 3\n20 PRINT I\n30 END\n",
            Settings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BasicError::Runtime(_)));
    }

    #[test]
    fn test_goto_unknown_line_fails() {
        let err = run_program("10 GOTO 99\n20 END\n", Settings::default()).unwrap_err();
        assert!(matches!(err, BasicError::Runtime(_)));
    }

    #[test]
    fn test_go_next_falls_through() {
        let output = run_program(
            "10 GOTO 99\n20 PRINT \"HERE\"\n30 END\n",
            Settings {
                go_next: true,
                ..Settings::default()
            },
        )
        .unwrap();
        assert_eq!(output, "HERE\n");
    }

    #[test]
    fn test_next_mismatch_reported_non_fatally() {
        let output = run(
            "10 FOR I = 1 TO 2\n\
             20 NEXT J\n\
             30 NEXT I\n\
             40 PRINT \"DONE\"\n\
             50 END\n",
        );
        assert!(output.contains("NEXT doesn't match FOR at line 20"));
        assert!(output.ends_with("DONE\n"));
    }

    #[test]
    fn test_nested_gosub_reported_non_fatally() {
        let output = run(
            "10 GOSUB 50\n\
             20 PRINT \"MAIN\"\n\
             30 GOTO 90\n\
             50 GOSUB 70\n\
             60 RETURN\n\
             70 PRINT \"SUB\"\n\
             80 RETURN\n\
             90 END\n",
        );
        assert!(output.contains("A subroutine is already in process at line 50"));
        assert!(output.contains("MAIN"));
    }

    #[test]
    fn test_input_from_lines() {
        let output = run_program(
            "10 INPUT \"VALUES\"; A, B$\n\
             20 PRINT A; B$\n\
             30 END\n",
            Settings {
                uppercase: true,
                input_lines: Some(vec!["41".to_string(), "hello".to_string()]),
                ..Settings::default()
            },
        )
        .unwrap();
        assert_eq!(output, "41 HELLO\n");
    }

    #[test]
    fn test_trace_prints_lines() {
        let output = run_program(
            "10 PRINT 1\n20 END\n",
            Settings {
                trace: true,
                ..Settings::default()
            },
        )
        .unwrap();
        assert!(output.starts_with("Executing line 10\n1\n"));
        assert!(output.contains("Executing line 20"));
    }

    #[test]
    fn test_string_slicing_mode() {
        let output = run_program(
            "10 LET A$ = \"ABCDE\"\n\
             20 PRINT A$(2, 3)\n\
             30 PRINT A$(4)\n\
             40 END\n",
            Settings {
                slicing: true,
                ..Settings::default()
            },
        )
        .unwrap();
        assert_eq!(output, "BC\nDE\n");
    }

    #[test]
    fn test_mod_truncates_toward_zero() {
        let output = run("10 PRINT 7 % 3\n20 PRINT -7 % 2\n30 END\n");
        assert_eq!(output, "1\n-1\n");
    }

    #[test]
    fn test_division_by_zero_fails() {
        let err = run_program("10 PRINT 1 / 0\n20 END\n", Settings::default()).unwrap_err();
        assert!(matches!(err, BasicError::Runtime(_)));
    }

    #[test]
    fn test_undefined_variable_fails() {
        let err = run_program("10 PRINT Z\n20 END\n", Settings::default()).unwrap_err();
        assert!(matches!(err, BasicError::UndefinedVariable(_)));
    }

    #[test]
    fn test_linear_solver_fixture() {
        let output = run(
            "10 READ A1, A2, A3, A4\n\
             15 LET D = A1 * A4 - A3 * A2\n\
             20 IF D = 0 THEN 65\n\
             30 READ B1, B2\n\
             37 LET X1 = (B1 * A4 - B2 * A2) / D\n\
             42 LET X2 = (A1 * B2 - A3 * B1) / D\n\
             55 PRINT X1, X2\n\
             60 GOTO 30\n\
             65 PRINT \"NO UNIQUE SOLUTION\"\n\
             70 DATA 1, 2, 4\n\
             80 DATA 2, -7, 5\n\
             85 DATA 1, 3, 4, -7\n\
             90 END\n",
        );
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('4'));
        assert!(lines[0].contains("-5.5"));
    }
}
