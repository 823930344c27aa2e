// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
use crate::tree::{TreeError, TreeResult};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token {
    LeftParen,           // (
    RightParen,          // )
    NameTerm(String),    // [a-zA-Z][a-zA-Z0-9_-]*
    StringTerm(String),  // ""
    IntegerTerm(i64),    // -?[0-9]+
}

pub struct FormulaTokenizer {
    chars: Vec<char>,
    offset: usize,
}

impl FormulaTokenizer {
    pub fn tokenize(s: &str) -> TreeResult<Vec<Token>> {
        let mut lt = FormulaTokenizer {
            chars: s.chars().collect::<Vec<char>>(),
            offset: 0,
        };
        let mut tokens = Vec::new();
        loop {
            lt.skip_space();
            if lt.is_empty() {
                break;
            }
            let token = lt.tokenize_one()?;
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn skip_space(&mut self) {
        while let Some(c) = self.maybe_peek(0) {
            if !c.is_whitespace() {
                break;
            }
            self.offset += 1;
        }
    }

    fn is_empty(&self) -> bool {
        self.offset >= self.chars.len()
    }

    fn tokenize_one(&mut self) -> TreeResult<Token> {
        let c = self.peek(0)?;
        match c {
            '(' => {
                self.offset += 1;
                Ok(Token::LeftParen)
            }
            ')' => {
                self.offset += 1;
                Ok(Token::RightParen)
            }
            '"' => self.tokenize_string(),
            '-' | '0'..='9' => self.tokenize_integer(),
            'a'..='z' | 'A'..='Z' => self.tokenize_name(),
            _ => Err(TreeError::FormulaParseError(format!(
                "unexpected character: {}",
                c
            ))),
        }
    }

    fn tokenize_string(&mut self) -> TreeResult<Token> {
        self.offset += 1;
        let mut s = String::new();
        loop {
            let c = self.peek(0)?;
            self.offset += 1;
            match c {
                '"' => return Ok(Token::StringTerm(s)),
                '\\' => {
                    let escaped = self.peek(0)?;
                    self.offset += 1;
                    match escaped {
                        '"' => s.push('"'),
                        '\\' => s.push('\\'),
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        _ => {
                            return Err(TreeError::FormulaParseError(format!(
                                "unknown string escape: \\{}",
                                escaped
                            )));
                        }
                    }
                }
                _ => s.push(c),
            }
        }
    }

    fn tokenize_integer(&mut self) -> TreeResult<Token> {
        let start = self.offset;
        if self.peek(0)? == '-' {
            self.offset += 1;
        }
        let mut digits = 0;
        while let Some(c) = self.maybe_peek(0) {
            if !c.is_ascii_digit() {
                break;
            }
            digits += 1;
            self.offset += 1;
        }
        if digits == 0 {
            return Err(TreeError::FormulaParseError(
                "expected digits after -".to_owned(),
            ));
        }
        let s = self.chars[start..self.offset].iter().collect::<String>();
        let i = s
            .parse::<i64>()
            .map_err(|e| TreeError::FormulaParseError(format!("bad integer {}: {}", s, e)))?;
        Ok(Token::IntegerTerm(i))
    }

    fn tokenize_name(&mut self) -> TreeResult<Token> {
        let start = self.offset;
        while let Some(c) = self.maybe_peek(0) {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                break;
            }
            self.offset += 1;
        }
        let s = self.chars[start..self.offset].iter().collect::<String>();
        Ok(Token::NameTerm(s))
    }

    fn peek(&self, n: usize) -> TreeResult<char> {
        self.maybe_peek(n).ok_or_else(|| {
            TreeError::FormulaParseError("unexpected end of expression".to_owned())
        })
    }

    fn maybe_peek(&self, n: usize) -> Option<char> {
        self.chars.get(self.offset + n).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_literals() {
        assert_eq!(
            FormulaTokenizer::tokenize("\"Hello, World!\"").unwrap(),
            vec![Token::StringTerm("Hello, World!".to_owned())]
        );
        assert_eq!(
            FormulaTokenizer::tokenize("42").unwrap(),
            vec![Token::IntegerTerm(42)]
        );
        assert_eq!(
            FormulaTokenizer::tokenize("-7").unwrap(),
            vec![Token::IntegerTerm(-7)]
        );
        assert_eq!(
            FormulaTokenizer::tokenize("a0").unwrap(),
            vec![Token::NameTerm("a0".to_owned())]
        );
    }

    #[test]
    fn test_tokenize_call() {
        assert_eq!(
            FormulaTokenizer::tokenize("(join \"\" a0 a1)").unwrap(),
            vec![
                Token::LeftParen,
                Token::NameTerm("join".to_owned()),
                Token::StringTerm("".to_owned()),
                Token::NameTerm("a0".to_owned()),
                Token::NameTerm("a1".to_owned()),
                Token::RightParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_escapes() {
        assert_eq!(
            FormulaTokenizer::tokenize(r#""a\"b\\c\nd""#).unwrap(),
            vec![Token::StringTerm("a\"b\\c\nd".to_owned())]
        );
    }

    #[test]
    fn test_tokenize_unterminated_string() {
        assert!(FormulaTokenizer::tokenize("\"abc").is_err());
    }

    #[test]
    fn test_tokenize_bad_character() {
        assert!(FormulaTokenizer::tokenize("a $ b").is_err());
    }

    #[test]
    fn test_tokenize_lone_minus() {
        assert!(FormulaTokenizer::tokenize("-").is_err());
    }
}
