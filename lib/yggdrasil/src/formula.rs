// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
use crate::parser::{Expr, FormulaParser};
use crate::path::Path;
use crate::tree::{Tree, TreeError, TreeResult};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// The value space of formula expressions. Inputs arrive as strings and the
/// final result must be a string; integers exist only as intermediates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Integer(i64),
    String(String),
}

impl Value {
    fn as_str(&self) -> TreeResult<&str> {
        match self {
            Value::String(s) => Ok(s),
            Value::Integer(i) => Err(TreeError::FormulaTypeError(format!(
                "expected a string, found the integer {}",
                i
            ))),
        }
    }

    fn into_result(self) -> TreeResult<String> {
        match self {
            Value::String(s) => Ok(s),
            Value::Integer(i) => Err(TreeError::FormulaTypeError(format!(
                "formula produced the integer {}, not a string",
                i
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

/// A formula is a read-only file whose content is computed from a set of
/// named input files. Results are memoized; the tree drops the memo whenever
/// any transitive input is created, removed, or written.
pub struct FormulaData {
    inputs: Vec<(String, Path)>,
    expr: Expr,
    cache: RefCell<Option<String>>,
}

impl FormulaData {
    pub fn new(inputs: &[(String, Path)], expression: &str) -> TreeResult<FormulaData> {
        let expr = FormulaParser::parse(expression)?;
        validate_calls(&expr)?;

        let mut free = HashSet::new();
        expr.collect_free_names(&mut free);
        for name in &free {
            if !inputs.iter().any(|(param, _)| param == name) {
                return Err(TreeError::FormulaParseError(format!(
                    "unbound name: {}",
                    name
                )));
            }
        }

        Ok(FormulaData {
            inputs: inputs.to_vec(),
            expr,
            cache: RefCell::new(None),
        })
    }

    pub fn input_paths(&self) -> Vec<Path> {
        self.inputs.iter().map(|(_, path)| path.clone()).collect()
    }

    pub fn invalidate(&self) {
        *self.cache.borrow_mut() = None;
    }

    pub fn get_data(&self, tree: &Tree) -> TreeResult<String> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }

        let mut env = HashMap::new();
        for (name, path) in &self.inputs {
            let data = match tree.get_data_at(path) {
                Ok(data) => data,
                // A failing formula input reports its own failure; anything
                // else means the input is not usable as an input.
                Err(e) => match e {
                    TreeError::FormulaInputNotFound(_)
                    | TreeError::FormulaTypeError(_)
                    | TreeError::FormulaParseError(_) => return Err(e),
                    _ => {
                        return Err(TreeError::FormulaInputNotFound(format!(
                            "{} - from: {}",
                            path, e
                        )));
                    }
                },
            };
            env.insert(name.clone(), data);
        }

        let result = eval(&self.expr, &env)?.into_result()?;
        self.cache.borrow_mut().replace(result.clone());
        Ok(result)
    }
}

fn validate_calls(expr: &Expr) -> TreeResult<()> {
    if let Expr::Call(name, args) = expr {
        match name.as_str() {
            "join" | "format" => {}
            _ => {
                return Err(TreeError::FormulaParseError(format!(
                    "unknown function: {}",
                    name
                )));
            }
        }
        if args.is_empty() {
            return Err(TreeError::FormulaParseError(format!(
                "{} requires at least one argument",
                name
            )));
        }
        for arg in args {
            validate_calls(arg)?;
        }
    }
    Ok(())
}

fn eval(expr: &Expr, env: &HashMap<String, String>) -> TreeResult<Value> {
    match expr {
        Expr::String(s) => Ok(Value::String(s.clone())),
        Expr::Integer(i) => Ok(Value::Integer(*i)),
        Expr::Name(name) => match env.get(name) {
            Some(data) => Ok(Value::String(data.clone())),
            None => Err(TreeError::FormulaParseError(format!(
                "unbound name: {}",
                name
            ))),
        },
        Expr::Call(name, args) => {
            let mut values = Vec::new();
            for arg in args {
                values.push(eval(arg, env)?);
            }
            match name.as_str() {
                "join" => builtin_join(&values),
                "format" => builtin_format(&values),
                _ => Err(TreeError::FormulaParseError(format!(
                    "unknown function: {}",
                    name
                ))),
            }
        }
    }
}

// (join sep a b ...) -> a sep b sep ...
fn builtin_join(values: &[Value]) -> TreeResult<Value> {
    let sep = values[0].as_str()?;
    let mut parts = Vec::new();
    for value in &values[1..] {
        parts.push(value.as_str()?.to_owned());
    }
    Ok(Value::String(parts.join(sep)))
}

// (format fmt a b ...) substitutes each ~s directive with the display form
// of the next argument; ~~ is a literal tilde.
fn builtin_format(values: &[Value]) -> TreeResult<Value> {
    let fmt = values[0].as_str()?;
    let mut args = values[1..].iter();
    let mut out = String::new();
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => match args.next() {
                Some(value) => out.push_str(&value.to_string()),
                None => {
                    return Err(TreeError::FormulaTypeError(format!(
                        "too few arguments for format string: {}",
                        fmt
                    )));
                }
            },
            Some('~') => out.push('~'),
            Some(d) => {
                return Err(TreeError::FormulaTypeError(format!(
                    "unknown format directive: ~{}",
                    d
                )));
            }
            None => {
                return Err(TreeError::FormulaTypeError(format!(
                    "dangling ~ at end of format string: {}",
                    fmt
                )));
            }
        }
    }
    if args.next().is_some() {
        return Err(TreeError::FormulaTypeError(format!(
            "too many arguments for format string: {}",
            fmt
        )));
    }
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_str(expression: &str, env: &[(&str, &str)]) -> TreeResult<String> {
        let expr = FormulaParser::parse(expression)?;
        validate_calls(&expr)?;
        let env = env
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<String, String>>();
        eval(&expr, &env)?.into_result()
    }

    #[test]
    fn test_eval_string_literal() {
        assert_eq!(eval_str("\"Hello, World!\"", &[]).unwrap(), "Hello, World!");
    }

    #[test]
    fn test_eval_name() {
        assert_eq!(eval_str("a0", &[("a0", "foobar")]).unwrap(), "foobar");
    }

    #[test]
    fn test_eval_integer_result_is_type_error() {
        assert_eq!(
            eval_str("42", &[]).unwrap_err().name(),
            "FormulaTypeError"
        );
    }

    #[test]
    fn test_eval_join() {
        assert_eq!(
            eval_str("(join \"\" a0 a1)", &[("a0", "foo"), ("a1", "bar")]).unwrap(),
            "foobar"
        );
        assert_eq!(
            eval_str("(join \"-\" a0 a1)", &[("a0", "foo"), ("a1", "bar")]).unwrap(),
            "foo-bar"
        );
        assert_eq!(eval_str("(join \",\")", &[]).unwrap(), "");
    }

    #[test]
    fn test_eval_join_integer_is_type_error() {
        assert_eq!(
            eval_str("(join \"\" 42)", &[]).unwrap_err().name(),
            "FormulaTypeError"
        );
    }

    #[test]
    fn test_eval_format() {
        assert_eq!(eval_str("(format \"~s\" 42)", &[]).unwrap(), "42");
        assert_eq!(
            eval_str("(format \"~s and ~s\" a0 9)", &[("a0", "six")]).unwrap(),
            "six and 9"
        );
        assert_eq!(eval_str("(format \"~~s\")", &[]).unwrap(), "~s");
    }

    #[test]
    fn test_eval_format_argument_mismatch() {
        assert_eq!(
            eval_str("(format \"~s\")", &[]).unwrap_err().name(),
            "FormulaTypeError"
        );
        assert_eq!(
            eval_str("(format \"~s\" 1 2)", &[]).unwrap_err().name(),
            "FormulaTypeError"
        );
        assert_eq!(
            eval_str("(format \"~x\" 1)", &[]).unwrap_err().name(),
            "FormulaTypeError"
        );
    }

    #[test]
    fn test_compile_unknown_function() {
        assert_eq!(
            FormulaData::new(&[], "(frobnicate 1)").unwrap_err().name(),
            "FormulaParseError"
        );
    }

    #[test]
    fn test_compile_unbound_name() {
        assert_eq!(
            FormulaData::new(&[], "a0").unwrap_err().name(),
            "FormulaParseError"
        );
    }

    #[test]
    fn test_compile_bound_name() {
        let path = crate::path::PathBuilder::new("/a0")
            .unwrap()
            .finish_path()
            .unwrap();
        assert!(FormulaData::new(&[("a0".to_owned(), path)], "a0").is_ok());
    }
}
