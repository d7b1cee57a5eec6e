//! Sandboxed expression evaluator for the HTTP engine's `Condition`.
//!
//! This is deliberately *not* a general-purpose scripting engine. No crate
//! in the reference corpus this codebase grows from embeds one, and the
//! security requirement — no network, no filesystem, no host globals
//! beyond `console.log` — is better satisfied by a grammar that is
//! structurally incapable of doing any of those things than by sandboxing a
//! general interpreter after the fact. The supported surface is a JS-like
//! expression language over literals, a `results` object, and a `Math`
//! namespace, plus `console.log` as a pure side-effect-free logging sink.
//!
//! A truthy result *fails* the check.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ProbeError;

/// Per-endpoint facts exposed to the condition as `results.<name>.<field>`
///.
#[derive(Debug, Clone, Default)]
pub struct EndpointFacts {
    pub success: bool,
    pub value: Option<serde_json::Value>,
    pub error: Option<String>,
    pub response: Option<serde_json::Value>,
    pub duration_ms: f64,
}

const MAX_EXPR_LEN: usize = 4096;
const MAX_DEPTH: usize = 64;

/// Evaluate `expr` against `results`. Returns `Ok(true)` iff the condition
/// is truthy (an anomaly was detected).
pub fn evaluate(
    expr: &str,
    results: &BTreeMap<String, EndpointFacts>,
) -> Result<bool, ProbeError> {
    if expr.len() > MAX_EXPR_LEN {
        return Err(ProbeError::condition(format!(
            "condition expression exceeds {MAX_EXPR_LEN} characters"
        )));
    }
    let tokens = lex(expr).map_err(ProbeError::condition)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
    };
    let ast = parser.parse_expr(0).map_err(ProbeError::condition)?;
    parser
        .expect_end()
        .map_err(ProbeError::condition)?;

    let env = build_env(results);
    let mut logs = Vec::new();
    let value = eval(&ast, &env, &mut logs, 0).map_err(ProbeError::condition)?;
    for line in logs {
        tracing::debug!(target: "sentinel::condition", "{line}");
    }
    Ok(truthy(&value))
}

fn build_env(results: &BTreeMap<String, EndpointFacts>) -> Value {
    let mut results_obj = BTreeMap::new();
    for (name, facts) in results {
        let mut obj = BTreeMap::new();
        obj.insert("success".to_string(), Value::Bool(facts.success));
        obj.insert(
            "value".to_string(),
            facts
                .value
                .as_ref()
                .map(Value::from_json)
                .unwrap_or(Value::Null),
        );
        obj.insert(
            "error".to_string(),
            match &facts.error {
                Some(e) => Value::String(e.clone()),
                None => Value::Null,
            },
        );
        obj.insert(
            "response".to_string(),
            facts
                .response
                .as_ref()
                .map(Value::from_json)
                .unwrap_or(Value::Null),
        );
        obj.insert("duration".to_string(), Value::Number(facts.duration_ms));
        results_obj.insert(name.clone(), Value::Object(obj));
    }
    let mut root = BTreeMap::new();
    root.insert("results".to_string(), Value::Object(results_obj));
    Value::Object(root)
}

// ---------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Value {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    Undefined,
    Object(BTreeMap<String, Value>),
    /// A callable built-in, referenced only through member access on
    /// `Math` or the bare `console.log` path — never constructible from
    /// user input.
    Builtin(Builtin),
}

#[derive(Debug, Clone, Copy)]
enum Builtin {
    MathAbs,
    MathMin,
    MathMax,
    MathFloor,
    MathCeil,
    MathRound,
    MathSqrt,
    MathPow,
    ConsoleLog,
}

impl Value {
    fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                let mut obj = BTreeMap::new();
                for (i, item) in items.iter().enumerate() {
                    obj.insert(i.to_string(), Value::from_json(item));
                }
                Value::Object(obj)
            }
            serde_json::Value::Object(map) => {
                let mut obj = BTreeMap::new();
                for (k, v) in map {
                    obj.insert(k.clone(), Value::from_json(v));
                }
                Value::Object(obj)
            }
        }
    }

    fn as_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            Value::Null | Value::Undefined => f64::NAN,
            Value::Object(_) | Value::Builtin(_) => f64::NAN,
        }
    }

    fn as_string(&self) -> String {
        match self {
            Value::Number(n) => format!("{n}"),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Undefined => "undefined".to_string(),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Builtin(_) => "[builtin]".to_string(),
        }
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::String(s) => !s.is_empty(),
        Value::Bool(b) => *b,
        Value::Null | Value::Undefined => false,
        Value::Object(_) | Value::Builtin(_) => true,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null | Value::Undefined, Value::Null | Value::Undefined) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        _ => a.as_number() == b.as_number(),
    }
}

// ---------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Sym(&'static str),
}

fn lex(src: &str) -> Result<Vec<Tok>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut out = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()))
        {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n: f64 = text
                .parse()
                .map_err(|_| format!("invalid number literal '{text}'"))?;
            out.push(Tok::Num(n));
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let start = i;
            while i < chars.len() && chars[i] != quote {
                i += 1;
            }
            if i >= chars.len() {
                return Err("unterminated string literal".to_string());
            }
            let text: String = chars[start..i].iter().collect();
            i += 1;
            out.push(Tok::Str(text));
            continue;
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            out.push(Tok::Ident(chars[start..i].iter().collect()));
            continue;
        }
        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        let sym2 = match two.as_str() {
            "==" => Some("=="),
            "!=" => Some("!="),
            "&&" => Some("&&"),
            "||" => Some("||"),
            "<=" => Some("<="),
            ">=" => Some(">="),
            _ => None,
        };
        if let Some(s) = sym2 {
            out.push(Tok::Sym(s));
            i += 2;
            continue;
        }
        let sym1 = match c {
            '+' => Some("+"),
            '-' => Some("-"),
            '*' => Some("*"),
            '/' => Some("/"),
            '%' => Some("%"),
            '<' => Some("<"),
            '>' => Some(">"),
            '!' => Some("!"),
            '(' => Some("("),
            ')' => Some(")"),
            '.' => Some("."),
            ',' => Some(","),
            _ => None,
        };
        match sym1 {
            Some(s) => {
                out.push(Tok::Sym(s));
                i += 1;
            }
            None => return Err(format!("unexpected character '{c}'")),
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// AST + parser (precedence climbing)
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    Member(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

struct Parser<'a> {
    tokens: &'a [Tok],
    pos: usize,
}

fn binding_power(op: &str) -> Option<(u8, u8)> {
    Some(match op {
        "||" => (1, 2),
        "&&" => (3, 4),
        "==" | "!=" => (5, 6),
        "<" | "<=" | ">" | ">=" => (7, 8),
        "+" | "-" => (9, 10),
        "*" | "/" | "%" => (11, 12),
        _ => return None,
    })
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), String> {
        match self.bump() {
            Some(Tok::Sym(s)) if s == sym => Ok(()),
            other => Err(format!("expected '{sym}', found {other:?}")),
        }
    }

    fn expect_end(&self) -> Result<(), String> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(format!(
                "unexpected trailing tokens at position {}",
                self.pos
            ))
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Sym(s)) => *s,
                _ => break,
            };
            let Some((l_bp, r_bp)) = binding_power(op) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.parse_expr(r_bp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if let Some(Tok::Sym(s @ ("!" | "-"))) = self.peek() {
            let op = *s;
            self.bump();
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(op, Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Tok::Sym(".")) => {
                    self.bump();
                    match self.bump() {
                        Some(Tok::Ident(name)) => {
                            expr = Expr::Member(Box::new(expr), name);
                        }
                        other => return Err(format!("expected identifier after '.', found {other:?}")),
                    }
                }
                Some(Tok::Sym("(")) => {
                    self.bump();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Tok::Sym(")"))) {
                        loop {
                            args.push(self.parse_expr(0)?);
                            match self.peek() {
                                Some(Tok::Sym(",")) => {
                                    self.bump();
                                }
                                _ => break,
                            }
                        }
                    }
                    self.expect_sym(")")?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Some(Tok::Num(n)) => Ok(Expr::Num(n)),
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" | "undefined" => Ok(Expr::Null),
                _ => Ok(Expr::Ident(name)),
            },
            Some(Tok::Sym("(")) => {
                let inner = self.parse_expr(0)?;
                self.expect_sym(")")?;
                Ok(inner)
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------

fn eval(
    expr: &Expr,
    env: &Value,
    logs: &mut Vec<String>,
    depth: usize,
) -> Result<Value, String> {
    if depth > MAX_DEPTH {
        return Err("expression nesting too deep".to_string());
    }
    match expr {
        Expr::Num(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Ident(name) => lookup_ident(name, env),
        Expr::Member(base, field) => {
            let base_val = eval(base, env, logs, depth + 1)?;
            member(&base_val, field)
        }
        Expr::Unary(op, inner) => {
            let v = eval(inner, env, logs, depth + 1)?;
            match *op {
                "!" => Ok(Value::Bool(!truthy(&v))),
                "-" => Ok(Value::Number(-v.as_number())),
                _ => unreachable!(),
            }
        }
        Expr::Binary("&&", lhs, rhs) => {
            let l = eval(lhs, env, logs, depth + 1)?;
            if !truthy(&l) {
                return Ok(l);
            }
            eval(rhs, env, logs, depth + 1)
        }
        Expr::Binary("||", lhs, rhs) => {
            let l = eval(lhs, env, logs, depth + 1)?;
            if truthy(&l) {
                return Ok(l);
            }
            eval(rhs, env, logs, depth + 1)
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, env, logs, depth + 1)?;
            let r = eval(rhs, env, logs, depth + 1)?;
            binary(op, &l, &r)
        }
        Expr::Call(callee, args) => eval_call(callee, args, env, logs, depth),
    }
}

fn lookup_ident(name: &str, env: &Value) -> Result<Value, String> {
    match name {
        "Math" => {
            let mut math = BTreeMap::new();
            math.insert("abs".to_string(), Value::Builtin(Builtin::MathAbs));
            math.insert("min".to_string(), Value::Builtin(Builtin::MathMin));
            math.insert("max".to_string(), Value::Builtin(Builtin::MathMax));
            math.insert("floor".to_string(), Value::Builtin(Builtin::MathFloor));
            math.insert("ceil".to_string(), Value::Builtin(Builtin::MathCeil));
            math.insert("round".to_string(), Value::Builtin(Builtin::MathRound));
            math.insert("sqrt".to_string(), Value::Builtin(Builtin::MathSqrt));
            math.insert("pow".to_string(), Value::Builtin(Builtin::MathPow));
            Ok(Value::Object(math))
        }
        "console" => {
            let mut console = BTreeMap::new();
            console.insert("log".to_string(), Value::Builtin(Builtin::ConsoleLog));
            Ok(Value::Object(console))
        }
        "results" => member(env, "results"),
        other => Err(format!("unknown identifier '{other}' (no host globals besides results/Math/console)")),
    }
}

fn member(base: &Value, field: &str) -> Result<Value, String> {
    match base {
        Value::Object(map) => Ok(map.get(field).cloned().unwrap_or(Value::Undefined)),
        Value::Undefined | Value::Null => {
            Err(format!("cannot read property '{field}' of null/undefined"))
        }
        _ => Ok(Value::Undefined),
    }
}

fn binary(op: &str, l: &Value, r: &Value) -> Result<Value, String> {
    Ok(match op {
        "+" => {
            if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
                Value::String(format!("{}{}", l.as_string(), r.as_string()))
            } else {
                Value::Number(l.as_number() + r.as_number())
            }
        }
        "-" => Value::Number(l.as_number() - r.as_number()),
        "*" => Value::Number(l.as_number() * r.as_number()),
        "/" => Value::Number(l.as_number() / r.as_number()),
        "%" => Value::Number(l.as_number() % r.as_number()),
        "<" => Value::Bool(l.as_number() < r.as_number()),
        "<=" => Value::Bool(l.as_number() <= r.as_number()),
        ">" => Value::Bool(l.as_number() > r.as_number()),
        ">=" => Value::Bool(l.as_number() >= r.as_number()),
        "==" => Value::Bool(loose_eq(l, r)),
        "!=" => Value::Bool(!loose_eq(l, r)),
        other => return Err(format!("unsupported operator '{other}'")),
    })
}

fn eval_call(
    callee: &Expr,
    args: &[Expr],
    env: &Value,
    logs: &mut Vec<String>,
    depth: usize,
) -> Result<Value, String> {
    let callee_val = eval(callee, env, logs, depth + 1)?;
    let Value::Builtin(builtin) = callee_val else {
        return Err("attempted to call a non-function value".to_string());
    };
    let mut values = Vec::with_capacity(args.len());
    for a in args {
        values.push(eval(a, env, logs, depth + 1)?);
    }
    match builtin {
        Builtin::MathAbs => Ok(Value::Number(arg(&values, 0)?.as_number().abs())),
        Builtin::MathMin => Ok(Value::Number(arg(&values, 0)?.as_number().min(arg(&values, 1)?.as_number()))),
        Builtin::MathMax => Ok(Value::Number(arg(&values, 0)?.as_number().max(arg(&values, 1)?.as_number()))),
        Builtin::MathFloor => Ok(Value::Number(arg(&values, 0)?.as_number().floor())),
        Builtin::MathCeil => Ok(Value::Number(arg(&values, 0)?.as_number().ceil())),
        Builtin::MathRound => Ok(Value::Number(arg(&values, 0)?.as_number().round())),
        Builtin::MathSqrt => Ok(Value::Number(arg(&values, 0)?.as_number().sqrt())),
        Builtin::MathPow => Ok(Value::Number(arg(&values, 0)?.as_number().powf(arg(&values, 1)?.as_number()))),
        Builtin::ConsoleLog => {
            let line = values.iter().map(Value::as_string).collect::<Vec<_>>().join(" ");
            logs.push(line);
            Ok(Value::Undefined)
        }
    }
}

fn arg(values: &[Value], index: usize) -> Result<&Value, String> {
    values
        .get(index)
        .ok_or_else(|| format!("missing argument {index}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facts(value: serde_json::Value) -> EndpointFacts {
        EndpointFacts {
            success: true,
            value: Some(value),
            error: None,
            response: None,
            duration_ms: 12.0,
        }
    }

    #[test]
    fn scenario_s2_anomaly_is_detected() {
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), facts(json!(10)));
        results.insert("b".to_string(), facts(json!(25)));
        let anomaly = evaluate(
            "Math.abs(results.a.value - results.b.value) > 10",
            &results,
        )
        .unwrap();
        assert!(anomaly);
    }

    #[test]
    fn false_condition_is_not_an_anomaly() {
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), facts(json!(10)));
        results.insert("b".to_string(), facts(json!(12)));
        let anomaly = evaluate(
            "Math.abs(results.a.value - results.b.value) > 10",
            &results,
        )
        .unwrap();
        assert!(!anomaly);
    }

    #[test]
    fn cannot_reference_host_globals() {
        let results = BTreeMap::new();
        let err = evaluate("process.exit(1)", &results).unwrap_err();
        assert_eq!(err.class, crate::error::ProbeErrorClass::Condition);
    }

    #[test]
    fn console_log_call_evaluates_to_falsy_undefined() {
        let results = BTreeMap::new();
        let anomaly = evaluate("console.log('checking endpoint')", &results).unwrap();
        assert!(!anomaly);
    }

    #[test]
    fn success_field_is_readable() {
        let mut results = BTreeMap::new();
        let mut f = facts(json!(1));
        f.success = false;
        results.insert("a".to_string(), f);
        let anomaly = evaluate("results.a.success == false", &results).unwrap();
        assert!(anomaly);
    }
}
