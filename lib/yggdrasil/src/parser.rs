// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
use crate::tokenizer::{FormulaTokenizer, Token};
use crate::tree::{TreeError, TreeResult};
use std::collections::HashSet;

/// A parsed formula expression. Expressions are pure: names are bound to
/// input file contents at evaluation time and calls have no side effects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Expr {
    String(String),
    Integer(i64),
    Name(String),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Collect all names that evaluation will look up in the input bindings.
    pub fn collect_free_names(&self, out: &mut HashSet<String>) {
        match self {
            Expr::String(_) | Expr::Integer(_) => {}
            Expr::Name(name) => {
                out.insert(name.clone());
            }
            Expr::Call(_, args) => {
                for arg in args {
                    arg.collect_free_names(out);
                }
            }
        }
    }
}

pub struct FormulaParser {
    tokens: Vec<Token>,
    position: usize,
}

impl FormulaParser {
    pub fn parse(s: &str) -> TreeResult<Expr> {
        let tokens = FormulaTokenizer::tokenize(s)?;
        let mut parser = FormulaParser {
            tokens,
            position: 0,
        };
        let expr = parser.consume_expr()?;
        if !parser.out_of_input() {
            return Err(TreeError::FormulaParseError(format!(
                "unexpected tokens after expression: {:?}",
                &parser.tokens[parser.position..]
            )));
        }
        Ok(expr)
    }

    fn consume_expr(&mut self) -> TreeResult<Expr> {
        match self.pop()? {
            Token::StringTerm(s) => Ok(Expr::String(s)),
            Token::IntegerTerm(i) => Ok(Expr::Integer(i)),
            Token::NameTerm(name) => Ok(Expr::Name(name)),
            Token::LeftParen => self.consume_call(),
            Token::RightParen => Err(TreeError::FormulaParseError(
                "unexpected ) at start of expression".to_owned(),
            )),
        }
    }

    fn consume_call(&mut self) -> TreeResult<Expr> {
        let name = match self.pop()? {
            Token::NameTerm(name) => name,
            token => {
                return Err(TreeError::FormulaParseError(format!(
                    "expected a function name after (, not: {:?}",
                    token
                )));
            }
        };
        let mut args = Vec::new();
        while self.peek()? != &Token::RightParen {
            args.push(self.consume_expr()?);
        }
        self.pop()?;
        Ok(Expr::Call(name, args))
    }

    fn out_of_input(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek(&self) -> TreeResult<&Token> {
        self.tokens.get(self.position).ok_or_else(|| {
            TreeError::FormulaParseError("unexpected end of expression".to_owned())
        })
    }

    fn pop(&mut self) -> TreeResult<Token> {
        let token = self.peek()?.clone();
        self.position += 1;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(name: &str) -> Expr {
        Expr::Name(name.to_owned())
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(
            FormulaParser::parse("\"Hello, World!\"").unwrap(),
            Expr::String("Hello, World!".to_owned())
        );
        assert_eq!(FormulaParser::parse("42").unwrap(), Expr::Integer(42));
        assert_eq!(FormulaParser::parse("a0").unwrap(), n("a0"));
    }

    #[test]
    fn test_parse_call() {
        assert_eq!(
            FormulaParser::parse("(join \"\" a0 a1)").unwrap(),
            Expr::Call(
                "join".to_owned(),
                vec![Expr::String("".to_owned()), n("a0"), n("a1")]
            )
        );
    }

    #[test]
    fn test_parse_nested_call() {
        assert_eq!(
            FormulaParser::parse("(format \"~s\" (join \"-\" a b))").unwrap(),
            Expr::Call(
                "format".to_owned(),
                vec![
                    Expr::String("~s".to_owned()),
                    Expr::Call("join".to_owned(), vec![Expr::String("-".to_owned()), n("a"), n("b")]),
                ]
            )
        );
    }

    #[test]
    fn test_parse_free_names() {
        let expr = FormulaParser::parse("(join \"\" a0 (format \"~s\" a1))").unwrap();
        let mut names = HashSet::new();
        expr.collect_free_names(&mut names);
        assert_eq!(names.len(), 2);
        assert!(names.contains("a0"));
        assert!(names.contains("a1"));
    }

    macro_rules! make_badformula_tests {
        ( [ $( ($name:ident, $string:expr) ),* ] ) =>
        {
            $(
                #[test]
                #[should_panic(expected="FormulaParseError")]
                fn $name() {
                    FormulaParser::parse($string).unwrap();
                }
            )*
        }
    }

    make_badformula_tests!([
        (test_parse_empty, ""),
        (test_parse_trailing, "a b"),
        (test_parse_unclosed_call, "(join \"\" a"),
        (test_parse_unopened_call, "join \"\" a)"),
        (test_parse_call_non_name, "(42 a)"),
        (test_parse_bare_rparen, ")")
    ]);
}
