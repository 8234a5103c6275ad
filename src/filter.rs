//! Filter expression grammar
//! -------------------------
//! Filter text is parsed exactly once into a small typed tree (comparisons,
//! boolean combinators, arithmetic over column references and literals) and
//! then lowered into a structural Polars predicate against the resolved
//! schema. Nothing outside this grammar is accepted; free text is never
//! handed to a general-purpose evaluator.

use polars::prelude::{col, lit, Expr};

use crate::alias;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    Comparison {
        left: Operand,
        op: CompOp,
        right: Operand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Column reference; may still be an unresolved `colN` alias until
    /// lowering translates it against the schema.
    ColumnRef(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    BinOp {
        left: Box<Operand>,
        op: ArithOp,
        right: Box<Operand>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Comp(CompOp),
    Arith(ArithOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> EngineResult<Vec<Tok>> {
    let err = |msg: &str| EngineError::translation(input.to_string(), msg.to_string());
    let chars: Vec<char> = input.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == quote {
                        closed = true;
                        i += 1;
                        break;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err(err("unterminated string literal"));
                }
                toks.push(Tok::Str(s));
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += 2;
                } else {
                    i += 1;
                }
                toks.push(Tok::Comp(CompOp::Eq));
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Comp(CompOp::Ne));
                    i += 2;
                } else {
                    return Err(err("'!' is only valid as '!='"));
                }
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    toks.push(Tok::Comp(CompOp::Le));
                    i += 2;
                }
                Some('>') => {
                    toks.push(Tok::Comp(CompOp::Ne));
                    i += 2;
                }
                _ => {
                    toks.push(Tok::Comp(CompOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Comp(CompOp::Ge));
                    i += 2;
                } else {
                    toks.push(Tok::Comp(CompOp::Gt));
                    i += 1;
                }
            }
            '+' => {
                toks.push(Tok::Arith(ArithOp::Add));
                i += 1;
            }
            '-' => {
                toks.push(Tok::Arith(ArithOp::Sub));
                i += 1;
            }
            '*' => {
                toks.push(Tok::Arith(ArithOp::Mul));
                i += 1;
            }
            '/' => {
                toks.push(Tok::Arith(ArithOp::Div));
                i += 1;
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                let mut is_float = false;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    if chars[i] == '.' {
                        is_float = true;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if is_float {
                    let v: f64 = text
                        .parse()
                        .map_err(|_| err(&format!("invalid number '{text}'")))?;
                    toks.push(Tok::Float(v));
                } else {
                    let v: i64 = text
                        .parse()
                        .map_err(|_| err(&format!("invalid number '{text}'")))?;
                    toks.push(Tok::Int(v));
                }
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.to_ascii_uppercase().as_str() {
                    "AND" => toks.push(Tok::And),
                    "OR" => toks.push(Tok::Or),
                    "NOT" => toks.push(Tok::Not),
                    "TRUE" => toks.push(Tok::Ident("true".into())),
                    "FALSE" => toks.push(Tok::Ident("false".into())),
                    _ => toks.push(Tok::Ident(word)),
                }
            }
            _ => {
                return Err(err(&format!("unexpected character '{c}'")));
            }
        }
    }
    Ok(toks)
}

struct Parser<'a> {
    toks: Vec<Tok>,
    pos: usize,
    input: &'a str,
}

impl<'a> Parser<'a> {
    fn err(&self, msg: &str) -> EngineError {
        EngineError::translation(self.input.to_string(), msg.to_string())
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    // OR has the lowest precedence.
    fn parse_or(&mut self) -> EngineResult<FilterExpr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Tok::Or)) {
            self.bump();
            let right = self.parse_and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> EngineResult<FilterExpr> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Tok::And)) {
            self.bump();
            let right = self.parse_not()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> EngineResult<FilterExpr> {
        if matches!(self.peek(), Some(Tok::Not)) {
            self.bump();
            let inner = self.parse_not()?;
            return Ok(FilterExpr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> EngineResult<FilterExpr> {
        // Parenthesized boolean sub-expression vs parenthesized arithmetic:
        // try the boolean reading first and fall back to a comparison whose
        // left side starts with '('.
        if matches!(self.peek(), Some(Tok::LParen)) {
            let saved = self.pos;
            self.bump();
            if let Ok(inner) = self.parse_or() {
                if matches!(self.peek(), Some(Tok::RParen)) {
                    self.bump();
                    // A boolean group is complete here unless a comparison
                    // operator follows, which means the parens were around
                    // an arithmetic operand after all.
                    if !matches!(self.peek(), Some(Tok::Comp(_)) | Some(Tok::Arith(_))) {
                        return Ok(inner);
                    }
                }
            }
            self.pos = saved;
        }
        let left = self.parse_sum()?;
        let op = match self.bump() {
            Some(Tok::Comp(op)) => op,
            Some(_) | None => {
                return Err(self.err("expected a comparison operator"));
            }
        };
        let right = self.parse_sum()?;
        Ok(FilterExpr::Comparison { left, op, right })
    }

    fn parse_sum(&mut self) -> EngineResult<Operand> {
        let mut left = self.parse_product()?;
        loop {
            match self.peek() {
                Some(Tok::Arith(op @ (ArithOp::Add | ArithOp::Sub))) => {
                    let op = *op;
                    self.bump();
                    let right = self.parse_product()?;
                    left = Operand::BinOp { left: Box::new(left), op, right: Box::new(right) };
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> EngineResult<Operand> {
        let mut left = self.parse_atom()?;
        loop {
            match self.peek() {
                Some(Tok::Arith(op @ (ArithOp::Mul | ArithOp::Div))) => {
                    let op = *op;
                    self.bump();
                    let right = self.parse_atom()?;
                    left = Operand::BinOp { left: Box::new(left), op, right: Box::new(right) };
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_atom(&mut self) -> EngineResult<Operand> {
        match self.bump() {
            Some(Tok::Int(v)) => Ok(Operand::Int(v)),
            Some(Tok::Float(v)) => Ok(Operand::Float(v)),
            Some(Tok::Str(s)) => Ok(Operand::Str(s)),
            Some(Tok::Arith(ArithOp::Sub)) => {
                // unary minus on a numeric literal
                match self.bump() {
                    Some(Tok::Int(v)) => Ok(Operand::Int(-v)),
                    Some(Tok::Float(v)) => Ok(Operand::Float(-v)),
                    _ => Err(self.err("unary '-' must precede a number")),
                }
            }
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" => Ok(Operand::Bool(true)),
                "false" => Ok(Operand::Bool(false)),
                _ => Ok(Operand::ColumnRef(name)),
            },
            Some(Tok::LParen) => {
                let inner = self.parse_sum()?;
                match self.bump() {
                    Some(Tok::RParen) => Ok(inner),
                    _ => Err(self.err("missing ')'")),
                }
            }
            _ => Err(self.err("expected a column, literal or '('")),
        }
    }
}

/// Parse filter text into the typed grammar. Any input outside the grammar
/// is a `Translation` error naming the offending expression.
pub fn parse(input: &str) -> EngineResult<FilterExpr> {
    let toks = tokenize(input)?;
    if toks.is_empty() {
        return Err(EngineError::translation(input.to_string(), "empty filter expression".to_string()));
    }
    let mut p = Parser { toks, pos: 0, input };
    let expr = p.parse_or()?;
    if p.pos != p.toks.len() {
        return Err(p.err("trailing tokens after expression"));
    }
    Ok(expr)
}

/// Lower the parsed tree to a Polars predicate. Column references are
/// alias-translated against the file schema and must then name a column in
/// `available` (the columns live at the filter stage).
pub fn compile(expr: &FilterExpr, schema: &[String], available: &[String]) -> EngineResult<Expr> {
    match expr {
        FilterExpr::And(l, r) => Ok(compile(l, schema, available)?.and(compile(r, schema, available)?)),
        FilterExpr::Or(l, r) => Ok(compile(l, schema, available)?.or(compile(r, schema, available)?)),
        FilterExpr::Not(e) => Ok(compile(e, schema, available)?.not()),
        FilterExpr::Comparison { left, op, right } => {
            let l = compile_operand(left, schema, available)?;
            let r = compile_operand(right, schema, available)?;
            Ok(match op {
                CompOp::Eq => l.eq(r),
                CompOp::Ne => l.neq(r),
                CompOp::Gt => l.gt(r),
                CompOp::Ge => l.gt_eq(r),
                CompOp::Lt => l.lt(r),
                CompOp::Le => l.lt_eq(r),
            })
        }
    }
}

fn compile_operand(op: &Operand, schema: &[String], available: &[String]) -> EngineResult<Expr> {
    match op {
        Operand::ColumnRef(name) => {
            let real = alias::to_real(name, schema);
            if !available.iter().any(|c| c == real) {
                return Err(EngineError::unknown_column(real.to_string(), "filter".to_string()));
            }
            Ok(col(real))
        }
        Operand::Int(v) => Ok(lit(*v)),
        Operand::Float(v) => Ok(lit(*v)),
        Operand::Str(s) => Ok(lit(s.as_str())),
        Operand::Bool(b) => Ok(lit(*b)),
        Operand::BinOp { left, op, right } => {
            let l = compile_operand(left, schema, available)?;
            let r = compile_operand(right, schema, available)?;
            Ok(match op {
                ArithOp::Add => l + r,
                ArithOp::Sub => l - r,
                ArithOp::Mul => l * r,
                ArithOp::Div => l / r,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_comparison() {
        let e = parse("col3 > 500").unwrap();
        assert_eq!(
            e,
            FilterExpr::Comparison {
                left: Operand::ColumnRef("col3".into()),
                op: CompOp::Gt,
                right: Operand::Int(500),
            }
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let e = parse("a == 1 OR b == 2 AND c == 3").unwrap();
        match e {
            FilterExpr::Or(_, right) => match *right {
                FilterExpr::And(_, _) => {}
                other => panic!("expected AND on the right, got {other:?}"),
            },
            other => panic!("expected OR at the top, got {other:?}"),
        }
    }

    #[test]
    fn parenthesized_boolean_group() {
        let e = parse("(a == 1 OR b == 2) AND c == 3").unwrap();
        assert!(matches!(e, FilterExpr::And(_, _)));
    }

    #[test]
    fn arithmetic_operands() {
        let e = parse("amount * 2 >= limit_col + 10").unwrap();
        match e {
            FilterExpr::Comparison { left, op, right } => {
                assert_eq!(op, CompOp::Ge);
                assert!(matches!(left, Operand::BinOp { op: ArithOp::Mul, .. }));
                assert!(matches!(right, Operand::BinOp { op: ArithOp::Add, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn not_and_neq_forms() {
        assert!(parse("NOT col1 == 'x'").is_ok());
        assert!(parse("col1 != 'x'").is_ok());
        assert!(parse("col1 <> 'x'").is_ok());
    }

    #[test]
    fn rejects_out_of_grammar_input() {
        assert!(parse("col1; DROP TABLE t").is_err());
        assert!(parse("__import__('os')").is_err());
        assert!(parse("col1 >").is_err());
        assert!(parse("").is_err());
        assert!(parse("col1 == 'unterminated").is_err());
        assert!(parse("col1 == 1 garbage").is_err());
    }

    #[test]
    fn compile_translates_aliases_and_checks_columns() {
        let schema = vec!["name".to_string(), "amount".to_string()];
        let e = parse("col2 > 5").unwrap();
        assert!(compile(&e, &schema, &schema).is_ok());

        // out-of-range alias stays literal and is then unknown
        let e = parse("col9 > 5").unwrap();
        let err = compile(&e, &schema, &schema).unwrap_err();
        assert_eq!(err.kind(), "unknown_column");
    }
}
