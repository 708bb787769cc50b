//! AST graph rendering and symbol table dumps.
//!
//! Two dump formats for a parsed program: a Graphviz DOT digraph with one
//! node per tree node and labeled edges, and an indented text outline of
//! the same tree. A third dump lists the symbols a program mentions.

use crate::ast::*;
use std::collections::BTreeSet;
use std::fmt::Write;

/// Renders the program as Graphviz DOT source.
pub fn render_dot(prog: &Program) -> String {
    let mut dot = DotRender::new();
    dot.program(prog);
    dot.finish()
}

/// Renders the program as an indented outline.
pub fn render_text(prog: &Program) -> String {
    let mut text = String::from("Program\n");
    for (line, stmt) in &prog.lines {
        let _ = writeln!(text, "  Line {}", line);
        text_statement(&mut text, stmt, 2);
    }
    text
}

struct DotRender {
    out: String,
    seq: usize,
}

impl DotRender {
    fn new() -> Self {
        let mut out = String::from("digraph AST {\n");
        out.push_str("    node [shape=box, color=deepskyblue, style=filled];\n");
        out.push_str("    edge [arrowhead=none];\n");
        Self { out, seq: 0 }
    }

    fn finish(mut self) -> String {
        self.out.push_str("}\n");
        self.out
    }

    fn name(&mut self) -> String {
        self.seq += 1;
        format!("n{:02}", self.seq)
    }

    fn node(&mut self, label: &str) -> String {
        let name = self.name();
        let _ = writeln!(
            self.out,
            "    {} [label=\"{}\"];",
            name,
            label.replace('"', "\\\"")
        );
        name
    }

    fn edge(&mut self, from: &str, to: &str, label: Option<&str>) {
        match label {
            Some(text) => {
                let _ = writeln!(self.out, "    {} -> {} [label=\"{}\"];", from, to, text);
            }
            None => {
                let _ = writeln!(self.out, "    {} -> {};", from, to);
            }
        }
    }

    fn program(&mut self, prog: &Program) {
        let root = self.node("Program");
        for (line, stmt) in &prog.lines {
            let command = self.node(&format!("Command\\nlineno: {}", line));
            self.edge(&root, &command, None);
            let child = self.statement(stmt);
            self.edge(&command, &child, None);
        }
    }

    fn statement(&mut self, stmt: &Statement) -> String {
        match stmt {
            Statement::Let { var, expr } => {
                let name = self.node("Let");
                let v = self.variable(var);
                self.edge(&name, &v, Some("var"));
                let e = self.expression(expr);
                self.edge(&name, &e, Some("expr"));
                name
            }
            Statement::Read { vars } => {
                let name = self.node("Read");
                for var in vars {
                    let v = self.variable(var);
                    self.edge(&name, &v, None);
                }
                name
            }
            Statement::Data { items } => {
                let name = self.node("Data");
                for item in items {
                    let v = self.node(&format!("{:?}", item));
                    self.edge(&name, &v, None);
                }
                name
            }
            Statement::Print { items } => {
                let name = self.node("Print");
                for item in items {
                    let child = match item {
                        PrintItem::Comma => self.node("','"),
                        PrintItem::Semicolon => self.node("';'"),
                        PrintItem::Text(s) => self.node(&format!("String {:?}", s)),
                        PrintItem::Expr(expr) => self.expression(expr),
                    };
                    self.edge(&name, &child, None);
                }
                name
            }
            Statement::Input { label, vars } => {
                let name = self.node("Input");
                if let Some(text) = label {
                    let l = self.node(&format!("label {:?}", text));
                    self.edge(&name, &l, None);
                }
                for var in vars {
                    let v = self.variable(var);
                    self.edge(&name, &v, None);
                }
                name
            }
            Statement::Goto { target } => self.node(&format!("Goto\\nlineno: {}", target)),
            Statement::If { cond, target } => {
                let name = self.node("If");
                let c = self.expression(cond);
                self.edge(&name, &c, Some("relexpr"));
                let t = self.node(&format!("lineno: {}", target));
                self.edge(&name, &t, None);
                name
            }
            Statement::For {
                var,
                low,
                high,
                step,
            } => {
                let name = self.node("For");
                let v = self.node(&format!("Variable\\n{}", var));
                self.edge(&name, &v, Some("ident"));
                let l = self.expression(low);
                self.edge(&name, &l, Some("low"));
                let h = self.expression(high);
                self.edge(&name, &h, Some("top"));
                if let Some(step) = step {
                    let s = self.expression(step);
                    self.edge(&name, &s, Some("step"));
                }
                name
            }
            Statement::Next { var } => {
                let name = self.node("Next");
                let v = self.node(&format!("Variable\\n{}", var));
                self.edge(&name, &v, None);
                name
            }
            Statement::GoSub { target } => self.node(&format!("GoSub\\nlineno: {}", target)),
            Statement::Return => self.node("Return"),
            Statement::Def { name, param, body } => {
                let node = self.node(&format!("Def {}({})", name, param));
                let b = self.expression(body);
                self.edge(&node, &b, Some("expr"));
                node
            }
            Statement::Dim { items } => {
                let name = self.node("Dim");
                for item in items {
                    let label = match item.size2 {
                        Some(size2) => format!("{}({}, {})", item.name, item.size1, size2),
                        None => format!("{}({})", item.name, item.size1),
                    };
                    let child = self.node(&label);
                    self.edge(&name, &child, None);
                }
                name
            }
            Statement::Remark(text) => self.node(&format!("Remark: {}", text)),
            Statement::End => self.node("End"),
            Statement::Stop => self.node("Stop"),
            Statement::Restore => self.node("Restore"),
        }
    }

    fn variable(&mut self, var: &Variable) -> String {
        let name = self.node(&format!("Variable\\n{}", var.name));
        if let Some(dim1) = &var.dim1 {
            let d = self.expression(dim1);
            self.edge(&name, &d, Some("dim1"));
        }
        if let Some(dim2) = &var.dim2 {
            let d = self.expression(dim2);
            self.edge(&name, &d, Some("dim2"));
        }
        name
    }

    fn expression(&mut self, expr: &Expression) -> String {
        match expr {
            Expression::Number(n) => self.node(&format!("Number\\nvalue {}", n.as_f64())),
            Expression::Str(s) => self.node(&format!("String {:?}", s)),
            Expression::Var(var) => self.variable(var),
            Expression::Neg(inner) => {
                let name = self.node("Unary -");
                let e = self.expression(inner);
                self.edge(&name, &e, None);
                name
            }
            Expression::Binary { op, left, right } => {
                let name = self.node(&format!("Binary {}", op));
                let l = self.expression(left);
                self.edge(&name, &l, Some("left"));
                let r = self.expression(right);
                self.edge(&name, &r, Some("right"));
                name
            }
            Expression::Logical { op, left, right } => {
                let name = self.node(&format!("Logical {}", op));
                let l = self.expression(left);
                self.edge(&name, &l, Some("left"));
                let r = self.expression(right);
                self.edge(&name, &r, Some("right"));
                name
            }
            Expression::Group(inner) => {
                let name = self.node("Group");
                let e = self.expression(inner);
                self.edge(&name, &e, None);
                name
            }
            Expression::Builtin { name, args } => {
                let node = self.node(&format!("Bltin {}", name));
                for arg in args {
                    let a = self.expression(arg);
                    self.edge(&node, &a, None);
                }
                node
            }
            Expression::Call { name, args } => {
                let node = self.node(&format!("Call {}", name));
                for arg in args {
                    let a = self.expression(arg);
                    self.edge(&node, &a, None);
                }
                node
            }
        }
    }
}

fn text_statement(out: &mut String, stmt: &Statement, depth: usize) {
    let pad = "  ".repeat(depth);
    let _ = writeln!(out, "{}{:?}", pad, StatementKind(stmt));
    match stmt {
        Statement::Let { var, expr } => {
            text_variable(out, var, depth + 1);
            text_expression(out, expr, depth + 1);
        }
        Statement::Read { vars } | Statement::Input { vars, .. } => {
            for var in vars {
                text_variable(out, var, depth + 1);
            }
        }
        Statement::Print { items } => {
            for item in items {
                match item {
                    PrintItem::Expr(expr) => text_expression(out, expr, depth + 1),
                    other => {
                        let _ = writeln!(out, "{}  {:?}", pad, other);
                    }
                }
            }
        }
        Statement::If { cond, .. } => text_expression(out, cond, depth + 1),
        Statement::For {
            low, high, step, ..
        } => {
            text_expression(out, low, depth + 1);
            text_expression(out, high, depth + 1);
            if let Some(step) = step {
                text_expression(out, step, depth + 1);
            }
        }
        Statement::Def { body, .. } => text_expression(out, body, depth + 1),
        _ => {}
    }
}

fn text_variable(out: &mut String, var: &Variable, depth: usize) {
    let pad = "  ".repeat(depth);
    let _ = writeln!(out, "{}Variable {}", pad, var.name);
    if let Some(dim1) = &var.dim1 {
        text_expression(out, dim1, depth + 1);
    }
    if let Some(dim2) = &var.dim2 {
        text_expression(out, dim2, depth + 1);
    }
}

fn text_expression(out: &mut String, expr: &Expression, depth: usize) {
    let pad = "  ".repeat(depth);
    match expr {
        Expression::Number(n) => {
            let _ = writeln!(out, "{}Number {}", pad, n.as_f64());
        }
        Expression::Str(s) => {
            let _ = writeln!(out, "{}String {:?}", pad, s);
        }
        Expression::Var(var) => text_variable(out, var, depth),
        Expression::Neg(inner) => {
            let _ = writeln!(out, "{}Unary -", pad);
            text_expression(out, inner, depth + 1);
        }
        Expression::Binary { op, left, right } => {
            let _ = writeln!(out, "{}Binary {}", pad, op);
            text_expression(out, left, depth + 1);
            text_expression(out, right, depth + 1);
        }
        Expression::Logical { op, left, right } => {
            let _ = writeln!(out, "{}Logical {}", pad, op);
            text_expression(out, left, depth + 1);
            text_expression(out, right, depth + 1);
        }
        Expression::Group(inner) => {
            let _ = writeln!(out, "{}Group", pad);
            text_expression(out, inner, depth + 1);
        }
        Expression::Builtin { name, args } => {
            let _ = writeln!(out, "{}Bltin {}", pad, name);
            for arg in args {
                text_expression(out, arg, depth + 1);
            }
        }
        Expression::Call { name, args } => {
            let _ = writeln!(out, "{}Call {}", pad, name);
            for arg in args {
                text_expression(out, arg, depth + 1);
            }
        }
    }
}

/// Short tags for the outline, one word per statement kind.
struct StatementKind<'a>(&'a Statement);

impl std::fmt::Debug for StatementKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let tag = match self.0 {
            Statement::Let { .. } => "Let",
            Statement::Read { .. } => "Read",
            Statement::Data { .. } => "Data",
            Statement::Print { .. } => "Print",
            Statement::Input { .. } => "Input",
            Statement::Goto { .. } => "Goto",
            Statement::If { .. } => "If",
            Statement::For { .. } => "For",
            Statement::Next { .. } => "Next",
            Statement::GoSub { .. } => "GoSub",
            Statement::Return => "Return",
            Statement::Def { .. } => "Def",
            Statement::Dim { .. } => "Dim",
            Statement::Remark(_) => "Remark",
            Statement::End => "End",
            Statement::Stop => "Stop",
            Statement::Restore => "Restore",
        };
        write!(f, "{}", tag)?;
        match self.0 {
            Statement::Goto { target } | Statement::GoSub { target } => {
                write!(f, " {}", target)
            }
            Statement::If { target, .. } => write!(f, " THEN {}", target),
            Statement::For { var, .. } | Statement::Next { var } => write!(f, " {}", var),
            Statement::Def { name, param, .. } => write!(f, " {}({})", name, param),
            _ => Ok(()),
        }
    }
}

/// Collects the names a program mentions, grouped by namespace.
pub fn symbol_table(prog: &Program) -> String {
    let mut symbols = Symbols::default();
    for stmt in prog.lines.values() {
        symbols.statement(stmt);
    }

    let mut text = String::from("SYMBOL TABLE\n");
    let _ = writeln!(text, "scalars:   {}", join(&symbols.scalars));
    let _ = writeln!(text, "lists:     {}", join(&symbols.lists));
    let _ = writeln!(text, "tables:    {}", join(&symbols.tables));
    let _ = writeln!(text, "functions: {}", join(&symbols.functions));
    let _ = writeln!(text, "builtins:  {}", join(&symbols.builtins));
    text
}

fn join(set: &BTreeSet<String>) -> String {
    if set.is_empty() {
        "-".to_string()
    } else {
        set.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

#[derive(Default)]
struct Symbols {
    scalars: BTreeSet<String>,
    lists: BTreeSet<String>,
    tables: BTreeSet<String>,
    functions: BTreeSet<String>,
    builtins: BTreeSet<String>,
}

impl Symbols {
    fn statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Let { var, expr } => {
                self.variable(var);
                self.expression(expr);
            }
            Statement::Read { vars } | Statement::Input { vars, .. } => {
                for var in vars {
                    self.variable(var);
                }
            }
            Statement::Print { items } => {
                for item in items {
                    if let PrintItem::Expr(expr) = item {
                        self.expression(expr);
                    }
                }
            }
            Statement::If { cond, .. } => self.expression(cond),
            Statement::For {
                var,
                low,
                high,
                step,
            } => {
                self.scalars.insert(var.clone());
                self.expression(low);
                self.expression(high);
                if let Some(step) = step {
                    self.expression(step);
                }
            }
            Statement::Def { name, param, body } => {
                self.functions.insert(format!("{}({})", name, param));
                self.expression(body);
            }
            Statement::Dim { items } => {
                for item in items {
                    match item.size2 {
                        Some(size2) => {
                            self.tables
                                .insert(format!("{}({}x{})", item.name, item.size1, size2));
                        }
                        None => {
                            self.lists.insert(format!("{}({})", item.name, item.size1));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn variable(&mut self, var: &Variable) {
        match (&var.dim1, &var.dim2) {
            (None, _) => {
                self.scalars.insert(var.name.clone());
            }
            (Some(dim1), None) => {
                self.lists.insert(format!("{}(?)", var.name));
                self.expression(dim1);
            }
            (Some(dim1), Some(dim2)) => {
                self.tables.insert(format!("{}(?x?)", var.name));
                self.expression(dim1);
                self.expression(dim2);
            }
        }
    }

    fn expression(&mut self, expr: &Expression) {
        match expr {
            Expression::Var(var) => self.variable(var),
            Expression::Neg(inner) | Expression::Group(inner) => self.expression(inner),
            Expression::Binary { left, right, .. } | Expression::Logical { left, right, .. } => {
                self.expression(left);
                self.expression(right);
            }
            Expression::Builtin { name, args } => {
                self.builtins.insert(name.clone());
                for arg in args {
                    self.expression(arg);
                }
            }
            Expression::Call { name, args } => {
                self.functions.insert(format!("{}(?)", name));
                for arg in args {
                    self.expression(arg);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn parse(source: &str) -> Program {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.tokenize();
        Parser::new(tokens).parse().expect("parse failure")
    }

    #[test]
    fn test_dot_output_shape() {
        let prog = parse("10 LET A = 1 + 2\n20 END\n");
        let dot = render_dot(&prog);
        assert!(dot.starts_with("digraph AST {"));
        assert!(dot.ends_with("}\n"));
        assert!(dot.contains("Command\\nlineno: 10"));
        assert!(dot.contains("Binary +"));
        assert!(dot.contains("[label=\"var\"]"));
    }

    #[test]
    fn test_text_outline() {
        let prog = parse("10 FOR I = 1 TO 3\n20 NEXT I\n30 END\n");
        let text = render_text(&prog);
        assert!(text.starts_with("Program\n"));
        assert!(text.contains("Line 10"));
        assert!(text.contains("For I"));
        assert!(text.contains("Next I"));
    }

    #[test]
    fn test_symbol_table() {
        let prog = parse(
            "10 DIM B(3, 4)\n\
             20 DEF FNS(X) = X * X\n\
             30 LET A = FNS(2) + INT(1.5)\n\
             40 END\n",
        );
        let table = symbol_table(&prog);
        assert!(table.contains("scalars:   A"));
        assert!(table.contains("B(3x4)"));
        assert!(table.contains("FNS(X)"));
        assert!(table.contains("INT"));
    }
}
