//! A small recursive-descent parser and evaluator for the mapper's `when`
//! predicate language.
//!
//! The source evaluates `when` as a free-form Python expression against the
//! blackboard. Here the grammar is fixed and closed: numeric comparisons,
//! boolean connectives, subscript/field access into a handful of named
//! values, and a `now()` function. There is no host `eval` anywhere in this
//! module — an unrecognized identifier or malformed subscript is a parse or
//! evaluation error, never code execution.
//!
//! ```text
//! expr       := or_expr
//! or_expr    := and_expr ('||' and_expr)*
//! and_expr   := unary ('&&' unary)*
//! unary      := '!' unary | comparison
//! comparison := primary (('<'|'<='|'>'|'>='|'=='|'!=') primary)?
//! primary    := number | 'true' | 'false' | 'now()' | identifier path | '(' expr ')'
//! path       := ('[' expr ']' | '.' ident)*
//! ```

use std::collections::HashMap;
use std::fmt;

use lumen_core::Blackboard;

use crate::error::MapperError;

/// The dynamically-typed result of evaluating a sub-expression. Missing data
/// (an absent blackboard field, an out-of-range index, an unrecorded
/// `prop_last_update` entry) is always `Null`: falsy in a boolean context,
/// never equal to any number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Null,
}

impl Value {
    pub fn as_bool(self) -> bool {
        match self {
            Value::Bool(b) => b,
            Value::Number(n) => n != 0.0,
            Value::Null => false,
        }
    }

    fn as_number(self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n),
            Value::Bool(b) => Some(b as i32 as f64),
            Value::Null => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
        }
    }
}

/// The data a compiled [`Predicate`] is evaluated against: the current
/// frame's blackboard plus the mapper's per-(light, property) last-write
/// clock, scoped to one light.
pub struct EvalContext<'a> {
    pub blackboard: &'a Blackboard,
    pub light: &'a str,
    pub prop_last_update: &'a HashMap<String, HashMap<String, f64>>,
}

/// An intermediate result while walking a subscript/field chain — not every
/// named value is a scalar, so resolution happens in two steps: look up the
/// base identifier, then fold each `[..]`/`.field` step over it.
enum Intermediate<'a> {
    Scalar(Value),
    Array(&'a [f32]),
    PropTable(&'a HashMap<String, HashMap<String, f64>>),
    PropRow(&'a HashMap<String, f64>),
}

impl Intermediate<'_> {
    fn into_value(self) -> Value {
        match self {
            Intermediate::Scalar(v) => v,
            _ => Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone)]
enum Subscript {
    Index(Box<Ast>),
    Field(String),
}

#[derive(Debug, Clone)]
enum Ast {
    Number(f64),
    Bool(bool),
    Now,
    Ident(String, Vec<Subscript>),
    Not(Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Cmp(CmpOp, Box<Ast>, Box<Ast>),
}

/// A parsed, reusable `when` expression.
#[derive(Debug, Clone)]
pub struct Predicate {
    ast: Ast,
}

impl Predicate {
    pub fn parse(source: &str) -> Result<Self, MapperError> {
        let mut p = Parser::new(source);
        let ast = p.parse_expr()?;
        p.skip_ws();
        if p.pos < p.chars.len() {
            return Err(MapperError::ExprSyntax(p.pos, "trailing input".to_string()));
        }
        Ok(Self { ast })
    }

    pub fn eval(&self, ctx: &EvalContext<'_>) -> bool {
        eval_ast(&self.ast, ctx).as_bool()
    }
}

fn eval_ast(ast: &Ast, ctx: &EvalContext<'_>) -> Value {
    match ast {
        Ast::Number(n) => Value::Number(*n),
        Ast::Bool(b) => Value::Bool(*b),
        Ast::Now => Value::Number(ctx.blackboard.now),
        Ast::Ident(name, path) => eval_path(name, path, ctx),
        Ast::Not(inner) => Value::Bool(!eval_ast(inner, ctx).as_bool()),
        Ast::And(a, b) => Value::Bool(eval_ast(a, ctx).as_bool() && eval_ast(b, ctx).as_bool()),
        Ast::Or(a, b) => Value::Bool(eval_ast(a, ctx).as_bool() || eval_ast(b, ctx).as_bool()),
        Ast::Cmp(op, a, b) => Value::Bool(eval_cmp(*op, eval_ast(a, ctx), eval_ast(b, ctx))),
    }
}

fn eval_cmp(op: CmpOp, a: Value, b: Value) -> bool {
    if op == CmpOp::Eq || op == CmpOp::Ne {
        let eq = match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x == y,
            _ => matches!((a, b), (Value::Null, Value::Null)),
        };
        return if op == CmpOp::Eq { eq } else { !eq };
    }
    let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
        return false;
    };
    match op {
        CmpOp::Lt => x < y,
        CmpOp::Le => x <= y,
        CmpOp::Gt => x > y,
        CmpOp::Ge => x >= y,
        CmpOp::Eq | CmpOp::Ne => unreachable!(),
    }
}

fn resolve_ident<'a>(name: &str, ctx: &'a EvalContext<'a>) -> Intermediate<'a> {
    let bb = ctx.blackboard;
    match name {
        "audio" => match &bb.audio {
            Some(v) => Intermediate::Array(v),
            None => Intermediate::Scalar(Value::Null),
        },
        "is_onset" => Intermediate::Scalar(opt_bool(bb.is_onset)),
        "is_beat" => Intermediate::Scalar(opt_bool(bb.is_beat)),
        "pitch" => Intermediate::Scalar(opt_num(bb.pitch.map(f64::from))),
        "idle_for" => Intermediate::Scalar(opt_num(bb.idle_for)),
        "dead_for" => Intermediate::Scalar(opt_num(bb.dead_for)),
        "audio_v_sum" => Intermediate::Scalar(opt_num(bb.audio_v_sum.map(f64::from))),
        "audio_v_avg" => Intermediate::Scalar(opt_num(bb.audio_v_avg.map(f64::from))),
        "prop_last_update" => Intermediate::PropTable(ctx.prop_last_update),
        "now" => Intermediate::Scalar(Value::Number(bb.now)),
        _ => Intermediate::Scalar(Value::Null),
    }
}

fn opt_bool(v: Option<bool>) -> Value {
    v.map_or(Value::Null, Value::Bool)
}

fn opt_num(v: Option<f64>) -> Value {
    v.map_or(Value::Null, Value::Number)
}

fn eval_path(name: &str, path: &[Subscript], ctx: &EvalContext<'_>) -> Value {
    let mut cur = resolve_ident(name, ctx);
    for step in path {
        cur = match (cur, step) {
            (Intermediate::Array(arr), Subscript::Index(idx_ast)) => {
                let idx = eval_ast(idx_ast, ctx).as_number();
                match idx.and_then(|i| usize::try_from(i as i64).ok()).and_then(|i| arr.get(i)) {
                    Some(v) => Intermediate::Scalar(Value::Number(f64::from(*v))),
                    None => Intermediate::Scalar(Value::Null),
                }
            }
            (Intermediate::PropTable(table), Subscript::Field(field)) => match table.get(field) {
                Some(row) => Intermediate::PropRow(row),
                None => Intermediate::Scalar(Value::Null),
            },
            (Intermediate::PropRow(row), Subscript::Field(field)) => {
                Intermediate::Scalar(row.get(field).copied().map_or(Value::Null, Value::Number))
            }
            _ => Intermediate::Scalar(Value::Null),
        };
    }
    cur.into_value()
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            source,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    fn bump_if(&mut self, s: &str) -> bool {
        self.skip_ws();
        let s_chars: Vec<char> = s.chars().collect();
        if self.chars[self.pos..].starts_with(&s_chars[..]) {
            self.pos += s_chars.len();
            true
        } else {
            false
        }
    }

    fn err(&self, msg: impl Into<String>) -> MapperError {
        MapperError::ExprSyntax(self.pos, msg.into())
    }

    fn parse_expr(&mut self) -> Result<Ast, MapperError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Ast, MapperError> {
        let mut lhs = self.parse_and()?;
        while self.bump_if("||") {
            let rhs = self.parse_and()?;
            lhs = Ast::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Ast, MapperError> {
        let mut lhs = self.parse_unary()?;
        while self.bump_if("&&") {
            let rhs = self.parse_unary()?;
            lhs = Ast::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Ast, MapperError> {
        if self.bump_if("!") {
            return Ok(Ast::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Ast, MapperError> {
        let lhs = self.parse_primary()?;
        let op = if self.bump_if("<=") {
            Some(CmpOp::Le)
        } else if self.bump_if(">=") {
            Some(CmpOp::Ge)
        } else if self.bump_if("==") {
            Some(CmpOp::Eq)
        } else if self.bump_if("!=") {
            Some(CmpOp::Ne)
        } else if self.bump_if("<") {
            Some(CmpOp::Lt)
        } else if self.bump_if(">") {
            Some(CmpOp::Gt)
        } else {
            None
        };
        match op {
            Some(op) => {
                let rhs = self.parse_primary()?;
                Ok(Ast::Cmp(op, Box::new(lhs), Box::new(rhs)))
            }
            None => Ok(lhs),
        }
    }

    fn parse_primary(&mut self) -> Result<Ast, MapperError> {
        self.skip_ws();
        let Some(c) = self.peek() else {
            return Err(self.err("unexpected end of expression"));
        };
        if c == '(' {
            self.pos += 1;
            let inner = self.parse_expr()?;
            self.skip_ws();
            if !self.bump_if(")") {
                return Err(self.err("expected `)`"));
            }
            return Ok(inner);
        }
        if c.is_ascii_digit() || c == '.' || c == '-' {
            return self.parse_number();
        }
        if c.is_alphabetic() || c == '_' {
            return self.parse_ident_or_literal();
        }
        Err(self.err(format!("unexpected character `{c}`")))
    }

    fn parse_number(&mut self) -> Result<Ast, MapperError> {
        let start = self.pos;
        if self.chars.get(self.pos) == Some(&'-') {
            self.pos += 1;
        }
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit() || *c == '.')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Ast::Number)
            .map_err(|_| self.err(format!("invalid number literal `{text}`")))
    }

    fn parse_ident_or_literal(&mut self) -> Result<Ast, MapperError> {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_alphanumeric() || *c == '_')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        match name.as_str() {
            "true" => return Ok(Ast::Bool(true)),
            "false" => return Ok(Ast::Bool(false)),
            "now" => {
                self.skip_ws();
                if !self.bump_if("()") {
                    return Err(self.err("`now` must be called as `now()`"));
                }
                return Ok(Ast::Now);
            }
            _ => {}
        }
        let path = self.parse_subscripts()?;
        Ok(Ast::Ident(name, path))
    }

    fn parse_subscripts(&mut self) -> Result<Vec<Subscript>, MapperError> {
        let mut subs = Vec::new();
        loop {
            self.skip_ws();
            match self.chars.get(self.pos) {
                Some('[') => {
                    self.pos += 1;
                    let idx = self.parse_expr()?;
                    self.skip_ws();
                    if !self.bump_if("]") {
                        return Err(self.err("expected `]`"));
                    }
                    subs.push(Subscript::Index(Box::new(idx)));
                }
                Some('.') => {
                    self.pos += 1;
                    let start = self.pos;
                    while self
                        .chars
                        .get(self.pos)
                        .is_some_and(|c| c.is_alphanumeric() || *c == '_')
                    {
                        self.pos += 1;
                    }
                    if start == self.pos {
                        return Err(self.err("expected a field name after `.`"));
                    }
                    let field: String = self.chars[start..self.pos].iter().collect();
                    subs.push(Subscript::Field(field));
                }
                _ => break,
            }
        }
        Ok(subs)
    }
}

impl fmt::Debug for Parser<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parser(pos={}, source={:?})", self.pos, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(bb: &Blackboard, plu: &HashMap<String, HashMap<String, f64>>) -> EvalContext<'_> {
        EvalContext {
            blackboard: bb,
            light: "L",
            prop_last_update: plu,
        }
    }

    #[test]
    fn numeric_comparison_against_subscript() {
        let mut bb = Blackboard::new(0.0);
        bb.audio = Some(vec![0.1, 0.9, 0.2]);
        let plu = HashMap::new();
        let pred = Predicate::parse("audio[1] > 0.5").unwrap();
        assert!(pred.eval(&ctx(&bb, &plu)));

        let pred2 = Predicate::parse("audio[0] > 0.5").unwrap();
        assert!(!pred2.eval(&ctx(&bb, &plu)));
    }

    #[test]
    fn boolean_connectives_and_missing_fields_are_falsy() {
        let mut bb = Blackboard::new(0.0);
        bb.is_onset = Some(true);
        let plu = HashMap::new();
        let pred = Predicate::parse("is_onset && !is_beat").unwrap();
        assert!(pred.eval(&ctx(&bb, &plu)));

        let pred2 = Predicate::parse("pitch > 40").unwrap();
        assert!(!pred2.eval(&ctx(&bb, &plu)));
    }

    #[test]
    fn now_and_prop_last_update_are_readable_inside_a_comparison() {
        let bb = Blackboard::new(12.0);
        let mut plu = HashMap::new();
        plu.insert("L".to_string(), HashMap::from([("dim".to_string(), 10.0)]));
        let pred = Predicate::parse("prop_last_update.L.dim < now()").unwrap();
        assert!(pred.eval(&ctx(&bb, &plu)));

        let pred_missing = Predicate::parse("prop_last_update.L.pan == 0").unwrap();
        assert!(!pred_missing.eval(&ctx(&bb, &plu)));
    }

    #[test]
    fn syntax_error_on_unknown_operator_sequence() {
        let err = Predicate::parse("audio[0] >>> 1").unwrap_err();
        assert!(matches!(err, MapperError::ExprSyntax(_, _)));
    }
}
