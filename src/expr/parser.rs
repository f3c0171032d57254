use crate::dsl::lexer::{self, Lexer, Token, TokenKind};
use crate::errors::EngineError;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use regex::Regex;

/// Expected type of a compiled expression's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Bool,
    Number,
}

/// Compile an expression source into a tree, checking the return type
/// where it is statically known. References and function calls are only
/// checked at evaluation time.
pub fn compile(src: &str, rt: ReturnType) -> Result<Expr, EngineError> {
    let mut p = Parser::new(src)?;
    let root = p.expression(0)?;
    p.expect(TokenKind::Eof)?;
    match (rt, static_type(&root)) {
        (_, StaticType::Dynamic) => Ok(root),
        (ReturnType::Bool, StaticType::Bool) => Ok(root),
        (ReturnType::Number, StaticType::Number) => Ok(root),
        (expected, got) => Err(EngineError::Parse {
            pos: 0,
            msg: format!("expression returns {:?}, expected {:?}", got, expected),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaticType {
    Bool,
    Number,
    Str,
    Duration,
    Dynamic,
}

fn static_type(e: &Expr) -> StaticType {
    match e {
        Expr::Int(_) | Expr::Float(_) => StaticType::Number,
        Expr::Duration(_) => StaticType::Duration,
        Expr::Str(_) => StaticType::Str,
        Expr::Bool(_) => StaticType::Bool,
        Expr::Regex(_) => StaticType::Dynamic,
        Expr::Reference(_) | Expr::Call(..) => StaticType::Dynamic,
        Expr::Unary(UnaryOp::Not, _) => StaticType::Bool,
        Expr::Unary(UnaryOp::Neg, inner) => static_type(inner),
        Expr::Binary(op, lhs, _) => match op {
            BinaryOp::And
            | BinaryOp::Or
            | BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::Gt
            | BinaryOp::Gte
            | BinaryOp::Lt
            | BinaryOp::Lte
            | BinaryOp::RegexMatch
            | BinaryOp::RegexNotMatch => StaticType::Bool,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => static_type(lhs),
        },
    }
}

// Precedence climbing: OR < AND < comparison/regex < additive <
// multiplicative < unary.
fn precedence(kind: TokenKind) -> Option<(BinaryOp, u8)> {
    match kind {
        TokenKind::Or => Some((BinaryOp::Or, 1)),
        TokenKind::And => Some((BinaryOp::And, 2)),
        TokenKind::Equal => Some((BinaryOp::Eq, 3)),
        TokenKind::NotEqual => Some((BinaryOp::Neq, 3)),
        TokenKind::Greater => Some((BinaryOp::Gt, 3)),
        TokenKind::GreaterEqual => Some((BinaryOp::Gte, 3)),
        TokenKind::Less => Some((BinaryOp::Lt, 3)),
        TokenKind::LessEqual => Some((BinaryOp::Lte, 3)),
        TokenKind::RegexEqual => Some((BinaryOp::RegexMatch, 3)),
        TokenKind::RegexNotEqual => Some((BinaryOp::RegexNotMatch, 3)),
        TokenKind::Plus => Some((BinaryOp::Add, 4)),
        TokenKind::Minus => Some((BinaryOp::Sub, 4)),
        TokenKind::Mult => Some((BinaryOp::Mul, 5)),
        TokenKind::Div => Some((BinaryOp::Div, 5)),
        _ => None,
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self, EngineError> {
        let mut lexer = Lexer::new(src);
        let current = lexer.next_token()?;
        Ok(Parser { lexer, current })
    }

    fn advance(&mut self) -> Result<Token, EngineError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, EngineError> {
        if self.current.kind == kind {
            self.advance()
        } else {
            Err(EngineError::Parse {
                pos: self.current.pos,
                msg: format!("expected {:?}, found {:?}", kind, self.current.kind),
            })
        }
    }

    fn expression(&mut self, min_prec: u8) -> Result<Expr, EngineError> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = precedence(self.current.kind) {
            if prec < min_prec {
                break;
            }
            self.advance()?;
            let rhs = self.expression(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EngineError> {
        match self.current.kind {
            TokenKind::Not => {
                self.advance()?;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            TokenKind::Minus => {
                self.advance()?;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, EngineError> {
        let tok = self.advance()?;
        match tok.kind {
            TokenKind::Number => {
                if tok.literal.contains('.') {
                    tok.literal.parse::<f64>().map(Expr::Float).map_err(|_| {
                        EngineError::Parse {
                            pos: tok.pos,
                            msg: format!("invalid number {}", tok.literal),
                        }
                    })
                } else {
                    tok.literal.parse::<i64>().map(Expr::Int).map_err(|_| {
                        EngineError::Parse {
                            pos: tok.pos,
                            msg: format!("invalid number {}", tok.literal),
                        }
                    })
                }
            }
            TokenKind::Duration => Ok(Expr::Duration(lexer::parse_duration(&tok.literal)?)),
            TokenKind::Str => Ok(Expr::Str(lexer::unquote_string(&tok.literal))),
            TokenKind::Reference => Ok(Expr::Reference(lexer::unquote_reference(&tok.literal))),
            TokenKind::True => Ok(Expr::Bool(true)),
            TokenKind::False => Ok(Expr::Bool(false)),
            TokenKind::Regex => {
                let body = lexer::unquote_regex(&tok.literal);
                Regex::new(&body)
                    .map(Expr::Regex)
                    .map_err(|e| EngineError::Parse {
                        pos: tok.pos,
                        msg: format!("invalid regex: {}", e),
                    })
            }
            TokenKind::LParen => {
                let inner = self.expression(0)?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident => {
                if self.current.kind == TokenKind::LParen {
                    self.advance()?;
                    // the grammar has no argument separator, so calls take
                    // at most one argument
                    let mut args = Vec::new();
                    if self.current.kind != TokenKind::RParen {
                        args.push(self.expression(0)?);
                    }
                    self.expect(TokenKind::RParen)?;
                    Ok(Expr::Call(tok.literal, args))
                } else {
                    // bare identifiers name fields, same as references
                    Ok(Expr::Reference(tok.literal))
                }
            }
            other => Err(EngineError::Parse {
                pos: tok.pos,
                msg: format!("unexpected token {:?}", other),
            }),
        }
    }
}
