use crate::{error::DbError, types::DbResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int { mag: u128, neg: bool },
    Float(f64),
    Complex(f64, f64),
    Str(String),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    DotDot,
    Comma,
    Eq,
    Semi,
}

struct Scanner {
    chars: Vec<char>,
    at: usize,
}

impl Scanner {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.at).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.at + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.at += 1;
        c
    }

    fn scan_ident(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                s.push(c);
                self.at += 1;
            } else {
                break;
            }
        }
        s
    }

    /// One number: integer or float, with optional leading minus.
    /// `a..b` ranges make the dot ambiguous, so a dot only joins the
    /// number when it is not itself followed by a second dot.
    fn scan_number(&mut self) -> DbResult<Token> {
        let neg = if self.peek() == Some('-') {
            self.at += 1;
            true
        } else {
            false
        };

        let mut text = String::new();
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.at += 1;
            } else if c == '.' && self.peek2() != Some('.') {
                if is_float {
                    break;
                }
                is_float = true;
                text.push(c);
                self.at += 1;
            } else if c == 'e' || c == 'E' {
                is_float = true;
                text.push(c);
                self.at += 1;
                if self.peek() == Some('-') || self.peek() == Some('+') {
                    text.push(self.bump().unwrap_or('+'));
                }
            } else {
                break;
            }
        }

        if text.is_empty() {
            return Err(DbError::syntax("expected a number"));
        }

        // A complex literal continues with +i<float> or -i<float>
        if (self.peek() == Some('+') || self.peek() == Some('-')) && self.peek2() == Some('i') {
            let im_neg = self.peek() == Some('-');
            self.at += 2;

            let im = match self.scan_number()? {
                Token::Int { mag, neg } => {
                    let v = mag as f64;
                    if neg {
                        -v
                    } else {
                        v
                    }
                }
                Token::Float(f) => f,
                _ => return Err(DbError::syntax("bad imaginary part")),
            };

            let re: f64 = text
                .parse()
                .map_err(|_| DbError::syntax(format!("bad number: {}", text)))?;
            let re = if neg { -re } else { re };
            let im = if im_neg { -im } else { im };
            return Ok(Token::Complex(re, im));
        }

        if is_float {
            let v: f64 = text
                .parse()
                .map_err(|_| DbError::syntax(format!("bad float literal: {}", text)))?;
            if !v.is_finite() {
                return Err(DbError::arith(format!("float literal out of range: {}", text)));
            }
            Ok(Token::Float(if neg { -v } else { v }))
        } else {
            let mag: u128 = text
                .parse()
                .map_err(|_| DbError::arith(format!("integer literal out of range: {}", text)))?;
            Ok(Token::Int { mag, neg })
        }
    }

    fn scan_string(&mut self) -> DbResult<Token> {
        // opening quote already seen
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(DbError::syntax("unterminated string literal")),
                Some('"') => return Ok(Token::Str(s)),
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('\\') => s.push('\\'),
                    Some('"') => s.push('"'),
                    Some('0') => s.push('\0'),
                    other => {
                        return Err(DbError::syntax(format!(
                            "bad string escape: {:?}",
                            other
                        )))
                    }
                },
                Some(c) => s.push(c),
            }
        }
    }
}

/// Tokenize one statement.
pub fn scan(src: &str) -> DbResult<Vec<Token>> {
    let mut s = Scanner {
        chars: src.chars().collect(),
        at: 0,
    };
    let mut out = Vec::new();

    while let Some(c) = s.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                s.at += 1;
            }
            '[' => {
                s.at += 1;
                out.push(Token::LBracket);
            }
            ']' => {
                s.at += 1;
                out.push(Token::RBracket);
            }
            '{' => {
                s.at += 1;
                out.push(Token::LBrace);
            }
            '}' => {
                s.at += 1;
                out.push(Token::RBrace);
            }
            '(' => {
                s.at += 1;
                out.push(Token::LParen);
            }
            ')' => {
                s.at += 1;
                out.push(Token::RParen);
            }
            ',' => {
                s.at += 1;
                out.push(Token::Comma);
            }
            '=' => {
                s.at += 1;
                out.push(Token::Eq);
            }
            ';' => {
                s.at += 1;
                out.push(Token::Semi);
            }
            '.' => {
                if s.peek2() == Some('.') {
                    s.at += 2;
                    out.push(Token::DotDot);
                } else {
                    out.push(s.scan_number()?);
                }
            }
            '"' => {
                s.at += 1;
                out.push(s.scan_string()?);
            }
            '-' => {
                out.push(s.scan_number()?);
            }
            c if c.is_ascii_digit() => {
                out.push(s.scan_number()?);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                out.push(Token::Ident(s.scan_ident()));
            }
            other => {
                return Err(DbError::syntax(format!(
                    "unexpected character: {:?}",
                    other
                )));
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_statement() {
        let toks = scan("insert x[0..2048] = range(0, 2048);").unwrap();
        assert_eq!(toks[0], Token::Ident("insert".into()));
        assert_eq!(toks[1], Token::Ident("x".into()));
        assert_eq!(toks[2], Token::LBracket);
        assert_eq!(toks[3], Token::Int { mag: 0, neg: false });
        assert_eq!(toks[4], Token::DotDot);
        assert_eq!(
            toks[5],
            Token::Int {
                mag: 2048,
                neg: false
            }
        );
        assert_eq!(toks[6], Token::RBracket);
        assert_eq!(toks[7], Token::Eq);
        assert_eq!(toks[8], Token::Ident("range".into()));
        assert_eq!(toks.last(), Some(&Token::Semi));
    }

    #[test]
    fn test_scan_numbers() {
        assert_eq!(
            scan("-42").unwrap(),
            vec![Token::Int {
                mag: 42,
                neg: true
            }]
        );
        assert_eq!(scan("1.5").unwrap(), vec![Token::Float(1.5)]);
        assert_eq!(scan("1e3").unwrap(), vec![Token::Float(1000.0)]);
        assert_eq!(scan("3.0+i4.0").unwrap(), vec![Token::Complex(3.0, 4.0)]);
        assert_eq!(scan("2.5-i1.5").unwrap(), vec![Token::Complex(2.5, -1.5)]);
    }

    #[test]
    fn test_scan_string_escapes() {
        assert_eq!(
            scan("\"a\\nb\"").unwrap(),
            vec![Token::Str("a\nb".into())]
        );
        assert!(scan("\"open").is_err());
    }

    #[test]
    fn test_huge_integer_is_arith() {
        let got = scan("340282366920938463463374607431768211456"); // 2^128
        assert_eq!(
            got.unwrap_err().kind(),
            crate::error::ErrorKind::Arith
        );
    }
}
