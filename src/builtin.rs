//! Built-in functions for BASIC programs.
//!
//! Implements the fixed library available to expressions:
//!
//! - **Trigonometry and math**: `SIN COS TAN ATN EXP ABS LOG SQR INT DEG`
//! - **Constants and environment**: `PI`, `TIME` (seconds since the
//!   interpreter started)
//! - **Randomness**: `RND`, uniform in [0, 1), optionally seeded from the
//!   command line for reproducible runs
//! - **Strings**: `LEN LEFT$ RIGHT$ MID$ CHR$` and `TAB`, which produces
//!   a run of spaces for PRINT positioning
//!
//! Every function validates its argument count and types and reports
//! mismatches through the shared error type. Angles are in radians and
//! string positions are 1-based.

use crate::ast::Value;
use crate::error::{BasicError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

/// The value of PI used by the PI built-in.
pub const PI: f64 = 3.141592654;

/// Registry of built-in functions.
///
/// Owns the state shared by the library: the random number generator and
/// the wall-clock epoch captured at interpreter start.
pub struct Builtins {
    rng: StdRng,
    epoch: Instant,
}

impl Builtins {
    /// Creates the registry. A seed makes every `RND` sequence
    /// reproducible; without one the generator is seeded from entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            epoch: Instant::now(),
        }
    }

    /// Dispatches a built-in call by name with already evaluated
    /// arguments.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        match name {
            "SIN" => self.math1(name, args, f64::sin),
            "COS" => self.math1(name, args, f64::cos),
            "TAN" => self.math1(name, args, f64::tan),
            "ATN" => self.math1(name, args, f64::atan),
            "EXP" => self.math1(name, args, f64::exp),
            "ABS" => self.math1(name, args, f64::abs),
            "INT" => self.math1(name, args, f64::trunc),
            "DEG" => self.math1(name, args, |x| x * (180.0 / PI)),
            "LOG" => {
                let x = arg_number(name, args, 0, 1)?;
                if x <= 0.0 {
                    return Err(BasicError::Argument(
                        "LOG of a non-positive number".to_string(),
                    ));
                }
                Ok(Value::Number(x.ln()))
            }
            "SQR" => {
                let x = arg_number(name, args, 0, 1)?;
                if x < 0.0 {
                    return Err(BasicError::Argument("SQR of a negative number".to_string()));
                }
                Ok(Value::Number(x.sqrt()))
            }
            "RND" => {
                // RND takes an ignored dummy argument in the classic
                // dialect; a bare RND() is accepted as well.
                if args.len() > 1 {
                    return Err(arity_error(name, "0 or 1 arguments", args.len()));
                }
                Ok(Value::Number(self.rng.gen::<f64>()))
            }
            "PI" => {
                if !args.is_empty() {
                    return Err(arity_error(name, "no arguments", args.len()));
                }
                Ok(Value::Number(PI))
            }
            "TIME" => {
                if !args.is_empty() {
                    return Err(arity_error(name, "no arguments", args.len()));
                }
                Ok(Value::Number(self.epoch.elapsed().as_secs_f64()))
            }
            "TAB" => {
                let n = arg_number(name, args, 0, 1)?;
                let count = if n > 0.0 { n.trunc() as usize } else { 0 };
                Ok(Value::Str(" ".repeat(count)))
            }
            "LEN" => {
                let s = arg_string(name, args, 0, 1)?;
                Ok(Value::Number(s.chars().count() as f64))
            }
            "CHR$" => {
                let n = arg_number(name, args, 0, 1)?;
                match char::from_u32(n.trunc() as u32) {
                    Some(c) => Ok(Value::Str(c.to_string())),
                    None => Err(BasicError::Argument(format!(
                        "CHR$() of an invalid code point {}",
                        n
                    ))),
                }
            }
            "LEFT$" => {
                let s = arg_string(name, args, 0, 2)?;
                let n = count_arg(name, args, 1, 2)?;
                Ok(Value::Str(s.chars().take(n).collect()))
            }
            "RIGHT$" => {
                let s = arg_string(name, args, 0, 2)?;
                let n = count_arg(name, args, 1, 2)?;
                let len = s.chars().count();
                // RIGHT$(S$, 0) yields the whole string.
                let skip = if n == 0 { 0 } else { len.saturating_sub(n) };
                Ok(Value::Str(s.chars().skip(skip).collect()))
            }
            "MID$" => {
                let s = arg_string(name, args, 0, 3)?;
                let start = count_arg(name, args, 1, 3)?;
                let len = count_arg(name, args, 2, 3)?;
                if start < 1 {
                    return Err(BasicError::Argument(
                        "MID$() start position is 1-based".to_string(),
                    ));
                }
                Ok(Value::Str(s.chars().skip(start - 1).take(len).collect()))
            }
            _ => Err(BasicError::UndefinedFunction(name.to_string())),
        }
    }

    fn math1(&mut self, name: &str, args: &[Value], f: impl Fn(f64) -> f64) -> Result<Value> {
        let x = arg_number(name, args, 0, 1)?;
        Ok(Value::Number(f(x)))
    }
}

fn arity_error(name: &str, expected: &str, got: usize) -> BasicError {
    BasicError::Argument(format!("{}() expects {}, got {}", name, expected, got))
}

fn arg_number(name: &str, args: &[Value], index: usize, arity: usize) -> Result<f64> {
    if args.len() != arity {
        return Err(arity_error(
            name,
            &format!("{} argument(s)", arity),
            args.len(),
        ));
    }
    match &args[index] {
        Value::Number(n) => Ok(*n),
        other => Err(BasicError::Type(format!(
            "{}() expected a number, was obtained: {}",
            name,
            other.type_name()
        ))),
    }
}

fn arg_string(name: &str, args: &[Value], index: usize, arity: usize) -> Result<String> {
    if args.len() != arity {
        return Err(arity_error(
            name,
            &format!("{} argument(s)", arity),
            args.len(),
        ));
    }
    match &args[index] {
        Value::Str(s) => Ok(s.clone()),
        other => Err(BasicError::Type(format!(
            "{}() expected a string, was obtained: {}",
            name,
            other.type_name()
        ))),
    }
}

fn count_arg(name: &str, args: &[Value], index: usize, arity: usize) -> Result<usize> {
    let n = arg_number(name, args, index, arity)?;
    if n < 0.0 {
        return Err(BasicError::Argument(format!(
            "{}() expects a non-negative count",
            name
        )));
    }
    Ok(n.trunc() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    fn s(text: &str) -> Value {
        Value::Str(text.to_string())
    }

    #[test]
    fn test_string_slicing_builtins() {
        let mut b = Builtins::new(None);
        assert_eq!(
            b.call("MID$", &[s("ABCDE"), num(2.0), num(2.0)]).unwrap(),
            s("BC")
        );
        assert_eq!(b.call("LEFT$", &[s("ABCDE"), num(3.0)]).unwrap(), s("ABC"));
        assert_eq!(b.call("RIGHT$", &[s("ABCDE"), num(2.0)]).unwrap(), s("DE"));
        assert_eq!(b.call("LEN", &[s("")]).unwrap(), num(0.0));
    }

    #[test]
    fn test_string_slicing_clamps_at_end() {
        let mut b = Builtins::new(None);
        assert_eq!(
            b.call("LEFT$", &[s("AB"), num(10.0)]).unwrap(),
            s("AB")
        );
        assert_eq!(
            b.call("MID$", &[s("ABCDE"), num(4.0), num(10.0)]).unwrap(),
            s("DE")
        );
        assert_eq!(b.call("RIGHT$", &[s("ABCDE"), num(0.0)]).unwrap(), s("ABCDE"));
    }

    #[test]
    fn test_math_functions() {
        let mut b = Builtins::new(None);
        assert_eq!(b.call("ABS", &[num(-3.5)]).unwrap(), num(3.5));
        assert_eq!(b.call("INT", &[num(2.9)]).unwrap(), num(2.0));
        assert_eq!(b.call("INT", &[num(-2.9)]).unwrap(), num(-2.0));
        assert_eq!(b.call("SQR", &[num(16.0)]).unwrap(), num(4.0));
        assert_eq!(b.call("PI", &[]).unwrap(), num(3.141592654));
        match b.call("DEG", &[num(PI)]).unwrap() {
            Value::Number(v) => assert!((v - 180.0).abs() < 1e-9),
            other => panic!("DEG returned {:?}", other),
        }
    }

    #[test]
    fn test_chr_and_tab() {
        let mut b = Builtins::new(None);
        assert_eq!(b.call("CHR$", &[num(65.0)]).unwrap(), s("A"));
        assert_eq!(b.call("TAB", &[num(4.0)]).unwrap(), s("    "));
        assert_eq!(b.call("TAB", &[num(-1.0)]).unwrap(), s(""));
    }

    #[test]
    fn test_rnd_seeded_is_deterministic() {
        let mut a = Builtins::new(Some(1));
        let mut b = Builtins::new(Some(1));
        for _ in 0..4 {
            let x = a.call("RND", &[num(0.0)]).unwrap();
            let y = b.call("RND", &[num(0.0)]).unwrap();
            assert_eq!(x, y);
            match x {
                Value::Number(v) => assert!((0.0..1.0).contains(&v)),
                other => panic!("RND returned {:?}", other),
            }
        }
    }

    #[test]
    fn test_type_and_arity_errors() {
        let mut b = Builtins::new(None);
        assert!(matches!(
            b.call("LEN", &[num(1.0)]),
            Err(BasicError::Type(_))
        ));
        assert!(matches!(
            b.call("SIN", &[]),
            Err(BasicError::Argument(_))
        ));
        assert!(matches!(
            b.call("SQR", &[num(-1.0)]),
            Err(BasicError::Argument(_))
        ));
        assert!(matches!(
            b.call("NOSUCH", &[]),
            Err(BasicError::UndefinedFunction(_))
        ));
    }
}
