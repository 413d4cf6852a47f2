use crate::{
    compiler::{scan, Expr, Literal, Range, Statement, Token},
    dtype::{Prim, Ty},
    error::DbError,
    types::DbResult,
};

struct Parser {
    toks: Vec<Token>,
    at: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.at)
    }

    fn bump(&mut self) -> DbResult<Token> {
        let t = self
            .toks
            .get(self.at)
            .cloned()
            .ok_or_else(|| DbError::syntax("unexpected end of statement"))?;
        self.at += 1;
        Ok(t)
    }

    fn expect(&mut self, want: &Token) -> DbResult {
        let got = self.bump()?;
        if &got != want {
            return Err(DbError::syntax(format!(
                "expected {:?} but got {:?}",
                want, got
            )));
        }
        Ok(())
    }

    fn ident(&mut self) -> DbResult<String> {
        match self.bump()? {
            Token::Ident(s) => Ok(s),
            other => Err(DbError::syntax(format!(
                "expected an identifier, got {:?}",
                other
            ))),
        }
    }

    fn uint(&mut self) -> DbResult<u64> {
        match self.bump()? {
            Token::Int { mag, neg: false } if mag <= u64::max_value() as u128 => Ok(mag as u64),
            other => Err(DbError::syntax(format!(
                "expected an unsigned integer, got {:?}",
                other
            ))),
        }
    }

    fn int(&mut self) -> DbResult<i64> {
        match self.bump()? {
            Token::Int { mag, neg } if mag <= i64::max_value() as u128 => {
                let v = mag as i64;
                Ok(if neg { -v } else { v })
            }
            other => Err(DbError::syntax(format!(
                "expected an integer, got {:?}",
                other
            ))),
        }
    }

    /// `[a..b]` or `[a]`.
    fn range(&mut self) -> DbResult<Range> {
        self.expect(&Token::LBracket)?;
        let start = self.uint()?;

        let r = if self.peek() == Some(&Token::DotDot) {
            self.at += 1;
            let end = self.uint()?;
            if end < start {
                return Err(DbError::syntax(format!(
                    "range end {} is before range start {}",
                    end, start
                )));
            }
            Range { start, end }
        } else {
            Range {
                start,
                end: start + 1,
            }
        };

        self.expect(&Token::RBracket)?;
        Ok(r)
    }

    /// Type grammar: primitive name, `[N]T`, `struct { name ty, .. }`,
    /// `union { name ty, .. }`, `enum { A, B, .. }`.
    fn ty(&mut self) -> DbResult<Ty> {
        match self.bump()? {
            Token::LBracket => {
                let mut dims = vec![self.array_dim()?];
                self.expect(&Token::RBracket)?;
                while self.peek() == Some(&Token::LBracket) {
                    self.at += 1;
                    dims.push(self.array_dim()?);
                    self.expect(&Token::RBracket)?;
                }
                let elem = self.ty()?;
                Ok(Ty::Array {
                    dims,
                    elem: Box::new(elem),
                })
            }
            Token::Ident(name) => match name.as_str() {
                "struct" => Ok(Ty::Struct(self.fields()?)),
                "union" => Ok(Ty::Union(self.fields()?)),
                "enum" => self.enum_ty(),
                prim => Prim::from_name(prim).map(Ty::Prim).ok_or_else(|| {
                    DbError::syntax(format!("unknown type name: {}", prim))
                }),
            },
            other => Err(DbError::syntax(format!(
                "expected a type, got {:?}",
                other
            ))),
        }
    }

    fn array_dim(&mut self) -> DbResult<u32> {
        let d = self.uint()?;
        if d == 0 || d > u32::max_value() as u64 {
            return Err(DbError::syntax(format!("bad array dimension: {}", d)));
        }
        Ok(d as u32)
    }

    fn fields(&mut self) -> DbResult<Vec<(String, Ty)>> {
        self.expect(&Token::LBrace)?;
        let mut fields = Vec::new();
        loop {
            let name = self.ident()?;
            let ty = self.ty()?;
            fields.push((name, ty));
            match self.bump()? {
                Token::Comma => continue,
                Token::RBrace => break,
                other => {
                    return Err(DbError::syntax(format!(
                        "expected ',' or '}}' in field list, got {:?}",
                        other
                    )))
                }
            }
        }
        Ok(fields)
    }

    fn enum_ty(&mut self) -> DbResult<Ty> {
        self.expect(&Token::LBrace)?;
        let mut names = Vec::new();
        loop {
            names.push(self.ident()?);
            match self.bump()? {
                Token::Comma => continue,
                Token::RBrace => break,
                other => {
                    return Err(DbError::syntax(format!(
                        "expected ',' or '}}' in enum list, got {:?}",
                        other
                    )))
                }
            }
        }
        if names.len() > 256 {
            return Err(DbError::syntax("enum has more than 256 variants"));
        }
        Ok(Ty::Enum(names))
    }

    fn literal(&mut self) -> DbResult<Literal> {
        match self.bump()? {
            Token::Int { mag, neg } => Ok(Literal::Int { mag, neg }),
            Token::Float(f) => Ok(Literal::Float(f)),
            Token::Complex(re, im) => Ok(Literal::Complex(re, im)),
            Token::Str(s) => Ok(Literal::Str(s)),
            Token::Ident(s) => match s.as_str() {
                "true" => Ok(Literal::Bool(true)),
                "false" => Ok(Literal::Bool(false)),
                _ => Ok(Literal::Name(s)),
            },
            other => Err(DbError::syntax(format!(
                "expected a literal, got {:?}",
                other
            ))),
        }
    }

    fn expr(&mut self) -> DbResult<Expr> {
        match self.peek() {
            Some(Token::Str(_)) => {
                if let Token::Str(s) = self.bump()? {
                    Ok(Expr::Str(s))
                } else {
                    unreachable!()
                }
            }
            Some(Token::LBracket) => {
                self.at += 1;
                let mut lits = Vec::new();
                loop {
                    lits.push(self.literal()?);
                    match self.bump()? {
                        Token::Comma => continue,
                        Token::RBracket => break,
                        other => {
                            return Err(DbError::syntax(format!(
                                "expected ',' or ']' in literal list, got {:?}",
                                other
                            )))
                        }
                    }
                }
                Ok(Expr::List(lits))
            }
            Some(Token::Ident(name)) if name == "range" => {
                self.at += 1;
                self.expect(&Token::LParen)?;
                let a = self.int()?;
                self.expect(&Token::Comma)?;
                let b = self.int()?;
                self.expect(&Token::RParen)?;
                if b < a {
                    return Err(DbError::syntax(format!(
                        "range({}, {}) runs backwards",
                        a, b
                    )));
                }
                Ok(Expr::Range(a, b))
            }
            _ => Ok(Expr::Scalar(self.literal()?)),
        }
    }

    fn statement(&mut self) -> DbResult<Statement> {
        let verb = self.ident()?;

        let stmt = match verb.as_str() {
            "create" => {
                let name = self.ident()?;
                let ty = self.ty()?;
                Statement::Create { name, ty }
            }
            "delete" => Statement::Delete { name: self.ident()? },
            "insert" => {
                let name = self.ident()?;
                let range = self.range()?;
                self.expect(&Token::Eq)?;
                let expr = self.expr()?;
                Statement::Insert { name, range, expr }
            }
            "read" => {
                let name = self.ident()?;
                let range = self.range()?;
                Statement::Read { name, range }
            }
            "write" => {
                let name = self.ident()?;
                let range = self.range()?;
                self.expect(&Token::Eq)?;
                let expr = self.expr()?;
                Statement::Write { name, range, expr }
            }
            other => {
                return Err(DbError::syntax(format!("unknown statement: {}", other)))
            }
        };

        self.expect(&Token::Semi)?;
        if self.at != self.toks.len() {
            return Err(DbError::syntax("trailing tokens after statement"));
        }
        Ok(stmt)
    }
}

/// Scan and parse one statement.
pub fn parse_statement(src: &str) -> DbResult<Statement> {
    let toks = scan(src)?;
    let mut p = Parser { toks, at: 0 };
    p.statement()
}
