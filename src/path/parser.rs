//! Path parser: tokens to location steps

use super::expr::{BinOp, Expr, Function, Literal};
use super::tokenizer::{CmpOp, Token};
use super::{Axis, LocationStep};
use crate::error::{NetconfError, Result};

pub(crate) struct PathParser {
    toks: Vec<Token>,
    pos: usize,
}

impl PathParser {
    pub(crate) fn new(toks: Vec<Token>) -> Self {
        Self { toks, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.toks.get(self.pos + offset)
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Token) -> Result<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        match self.peek() {
            Some(Token::Atom(a)) if a == word => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    /// Parse error showing the next few tokens
    fn error(&self) -> NetconfError {
        let shown: String = self.toks.iter().skip(self.pos).take(5).map(|t| t.to_string()).collect();
        NetconfError::Path(format!("parse error: \"{}...\"", shown))
    }

    fn atom(&mut self) -> Result<String> {
        if let Some(Token::Atom(a)) = self.peek() {
            let a = a.clone();
            self.pos += 1;
            Ok(a)
        } else {
            Err(self.error())
        }
    }

    pub(crate) fn parse_path(&mut self) -> Result<Vec<LocationStep>> {
        let mut steps = Vec::new();
        if self.peek().is_none() {
            return Err(NetconfError::Path("empty path".into()));
        }
        if self.eat(&Token::Slash) {
            steps.push(LocationStep::root());
            if self.peek().is_none() {
                return Ok(steps);
            }
        }
        loop {
            if self.peek() == Some(&Token::SlashSlash) {
                return Err(descendant_error());
            }
            steps.push(self.parse_step()?);
            match self.peek() {
                None => return Ok(steps),
                Some(Token::Slash) => {
                    self.pos += 1;
                }
                Some(Token::SlashSlash) => return Err(descendant_error()),
                Some(_) => return Err(self.error()),
            }
        }
    }

    fn parse_step(&mut self) -> Result<LocationStep> {
        let mut step = match self.peek() {
            Some(Token::Dot) => {
                self.pos += 1;
                LocationStep::new(Axis::SelfAxis, None, None)
            }
            Some(Token::DotDot) => {
                self.pos += 1;
                LocationStep::new(Axis::Parent, None, None)
            }
            Some(Token::Atom(_)) if self.peek_at(1) == Some(&Token::ColonColon) => {
                let axis = parse_axis(&self.atom()?)?;
                self.pos += 1;
                let (prefix, name) = self.qname()?;
                LocationStep::new(axis, prefix, Some(name))
            }
            Some(Token::Atom(_)) => {
                let (prefix, name) = self.qname()?;
                LocationStep::new(Axis::Child, prefix, Some(name))
            }
            _ => return Err(self.error()),
        };

        while self.eat(&Token::LBracket) {
            step.predicates.push(self.parse_or()?);
            while self.eat(&Token::Comma) {
                step.predicates.push(self.parse_or()?);
            }
            self.expect(&Token::RBracket)?;
        }
        Ok(step)
    }

    fn qname(&mut self) -> Result<(Option<String>, String)> {
        let first = self.atom()?;
        if self.eat(&Token::Colon) {
            let name = self.atom()?;
            Ok((Some(first), name))
        } else {
            Ok((None, first))
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat_keyword("and") {
            let right = self.parse_equality()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Compare(CmpOp::Eq)) => BinOp::Eq,
                Some(Token::Compare(CmpOp::Ne)) => BinOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_relational()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Compare(CmpOp::Gt)) => BinOp::Gt,
                Some(Token::Compare(CmpOp::Ge)) => BinOp::Ge,
                Some(Token::Compare(CmpOp::Lt)) => BinOp::Lt,
                Some(Token::Compare(CmpOp::Le)) => BinOp::Le,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op('+')) => BinOp::Plus,
                Some(Token::Op('-')) => BinOp::Minus,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Op('-')) {
            Ok(Expr::Neg(Box::new(self.parse_unary()?)))
        } else {
            self.parse_primary()
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::LParen) => {
                self.pos += 1;
                let e = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Str(s)))
            }
            Some(Token::Int(i)) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Int(i)))
            }
            Some(Token::Float(f)) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Float(f)))
            }
            Some(Token::Attr(a)) => {
                self.pos += 1;
                Ok(Expr::Attr(a))
            }
            Some(Token::Atom(name)) if self.peek_at(1) == Some(&Token::LParen) => {
                self.pos += 2;
                let func = Function::from_name(&name)
                    .ok_or_else(|| NetconfError::Path(format!("unknown function: {}()", name)))?;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    args.push(self.parse_or()?);
                    while self.eat(&Token::Comma) {
                        args.push(self.parse_or()?);
                    }
                    self.expect(&Token::RParen)?;
                }
                let (min, max) = func.arity();
                if args.len() < min || args.len() > max {
                    return Err(NetconfError::Path(format!(
                        "wrong number of arguments to {}()",
                        name
                    )));
                }
                Ok(Expr::Call(func, args))
            }
            Some(Token::Atom(_)) => {
                let (prefix, name) = self.qname()?;
                Ok(Expr::Child { prefix, name })
            }
            _ => Err(self.error()),
        }
    }
}

fn parse_axis(name: &str) -> Result<Axis> {
    match name {
        "child" => Ok(Axis::Child),
        "self" => Ok(Axis::SelfAxis),
        "parent" => Ok(Axis::Parent),
        other => Err(NetconfError::Path(format!(
            "unsupported or unknown axis: {}",
            other
        ))),
    }
}

// `//` abbreviates descendant-or-self::node(), which is not supported
fn descendant_error() -> NetconfError {
    NetconfError::Path("unsupported or unknown axis: descendant-or-self".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::tokenizer::tokenize;

    fn parse(s: &str) -> Result<Vec<LocationStep>> {
        PathParser::new(tokenize(s)?).parse_path()
    }

    #[test]
    fn test_steps() {
        let steps = parse("/h:hosts/child::host[name='joe', 2]/self::ip").unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].axis, Axis::Root);
        assert_eq!(steps[1].prefix.as_deref(), Some("h"));
        assert_eq!(steps[1].name.as_deref(), Some("hosts"));
        assert_eq!(steps[2].axis, Axis::Child);
        assert_eq!(steps[2].predicates.len(), 2);
        assert_eq!(steps[3].axis, Axis::SelfAxis);
    }

    #[test]
    fn test_predicate_precedence() {
        let steps = parse("a[x=1 or y=2 and z=3]").unwrap();
        match &steps[0].predicates[0] {
            Expr::Binary(BinOp::Or, _, right) => {
                assert!(matches!(**right, Expr::Binary(BinOp::And, _, _)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_concat_commas_stay_in_call() {
        let steps = parse("a[concat(b, 'x', c) = 'yxz']").unwrap();
        assert_eq!(steps[0].predicates.len(), 1);
    }

    #[test]
    fn test_errors() {
        assert!(parse("a//b").unwrap_err().to_string().contains("descendant-or-self"));
        assert!(parse("ancestor::a").unwrap_err().to_string().contains("unknown axis: ancestor"));
        assert!(parse("a b").unwrap_err().to_string().contains("parse error"));
        assert!(parse("a[b='1'").is_err());
        assert!(parse("a[foo()]").unwrap_err().to_string().contains("unknown function"));
        assert!(parse("a[not()]").is_err());
    }
}
