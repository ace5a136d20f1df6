// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! FILTER/BIND expressions (spec.md §4.2 "Filter", "Bind").
//!
//! Expressions arrive at compile time as SPARQL expression text and are
//! parsed once, with [`nom`], into an [`Expr`] tree; operators then
//! evaluate that tree per input mapping. `ParseError` is non-fatal by
//! design (spec.md §7): a FILTER that fails to parse or evaluate is
//! treated as `false` for that mapping, a BIND that fails leaves the
//! variable unbound, and the pipeline keeps going.
//!
//! Custom functions are looked up through an explicit [`FunctionRegistry`]
//! passed in at compile time, rather than mutating a process-global
//! table (see SPEC_FULL.md, "Supplemented features" / REDESIGN FLAGS).

use std::collections::HashMap;
use std::sync::Arc;

use md5::{Digest, Md5};
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_while1};
use nom::character::complete::{char, digit1, multispace0};
use nom::combinator::{cut, map, opt, recognize, value};
use nom::multi::separated_list0;
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;

use crate::term::{Mapping, Term};
use crate::{ErrorKind, Result};

/// A runtime value produced while evaluating an expression. Distinct
/// from [`Term`]: `Term` is the wire/storage encoding, `Value` is what
/// arithmetic and boolean operators actually work on.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    /// An IRI or literal already in N3 form, produced by `URI(...)` or
    /// passed through unevaluated from a `Term` leaf.
    Term(Term),
}

impl Value {
    /// SPARQL's "effective boolean value" (spec.md: FILTER "yielding
    /// only truthy mappings").
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0,
            Value::Term(_) => true,
        }
    }

    fn as_str_value(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Term(t) => n3_lexical_value(t),
        }
    }

    pub fn into_term(self) -> Term {
        match self {
            Value::Term(t) => t,
            Value::Str(s) => Term::new(format!("\"{s}\"")),
            Value::Num(n) => Term::new(n.to_string()),
            Value::Bool(b) => Term::new(b.to_string()),
        }
    }
}

/// Strip an IRI's `<...>` wrapper or a literal's surrounding quotes and
/// datatype/language suffix, the way `STR()` does (SPARQL 1.1 §17.4.2.5).
fn n3_lexical_value(t: &Term) -> String {
    let s = t.as_str();
    if let Some(inner) = s.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
        return inner.to_string();
    }
    if let Some(rest) = s.strip_prefix('"') {
        if let Some(end) = rest.rfind('"') {
            return rest[..end].to_string();
        }
    }
    s.to_string()
}

impl From<Value> for Term {
    fn from(v: Value) -> Term {
        v.into_term()
    }
}

/// A builtin SPARQL function call (spec.md §8 examples: `STR`, `URI`,
/// `CONCAT`, `MD5`, plus `BOUND`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Builtin {
    Str,
    Uri,
    Concat,
    Md5,
    Bound,
}

/// A parsed FILTER/BIND expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(String),
    StrLiteral(String),
    NumLiteral(f64),
    IriLiteral(Term),
    Call(Builtin, Vec<Expr>),
    /// A call to a function registered through [`FunctionRegistry`],
    /// named by its SPARQL-visible identifier.
    CustomCall(String, Vec<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
}

/// A custom SPARQL extension function, registered explicitly rather
/// than through process-global state.
pub type CustomFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// The explicit registry of custom functions available to a compiled
/// pipeline (SPEC_FULL.md "Supplemented features").
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, CustomFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, f: CustomFn) {
        self.functions.insert(name.into(), f);
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let f = self
            .functions
            .get(name)
            .ok_or_else(|| ErrorKind::ExpressionEvalError.with_message(format!("unknown function {name}")))?;
        f(args)
    }
}

impl Expr {
    /// Parse `text` into an expression tree. Returns `ParseError` on
    /// malformed input, matching spec.md §7's non-fatal treatment.
    pub fn parse(text: &str) -> Result<Expr> {
        match parse_or(text) {
            Ok((rest, expr)) if rest.trim().is_empty() => Ok(expr),
            Ok((rest, _)) => Err(ErrorKind::ExpressionEvalError
                .with_message(format!("trailing input in expression: {rest:?}"))),
            Err(e) => Err(ErrorKind::ExpressionEvalError.with_message(format!("malformed expression: {e}"))),
        }
    }

    /// Evaluate under a solution mapping. A reference to an unbound
    /// variable (outside `BOUND(...)`) evaluates to the empty string,
    /// matching SPARQL's "unbound is an error that propagates to
    /// false/unbound" treatment at this engine's level of strictness.
    pub fn eval(&self, mu: &Mapping, registry: &FunctionRegistry) -> Result<Value> {
        match self {
            Expr::Var(name) => match mu.get(name) {
                Some(term) => Ok(Value::Term(term.clone())),
                None => Ok(Value::Str(String::new())),
            },
            Expr::StrLiteral(s) => Ok(Value::Str(s.clone())),
            Expr::NumLiteral(n) => Ok(Value::Num(*n)),
            Expr::IriLiteral(t) => Ok(Value::Term(t.clone())),
            Expr::Call(builtin, args) => eval_builtin(builtin, args, mu, registry),
            Expr::CustomCall(name, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(mu, registry))
                    .collect::<Result<Vec<_>>>()?;
                registry.call(name, &values)
            }
            Expr::And(l, r) => Ok(Value::Bool(l.eval(mu, registry)?.truthy() && r.eval(mu, registry)?.truthy())),
            Expr::Or(l, r) => Ok(Value::Bool(l.eval(mu, registry)?.truthy() || r.eval(mu, registry)?.truthy())),
            Expr::Not(inner) => Ok(Value::Bool(!inner.eval(mu, registry)?.truthy())),
            Expr::Eq(l, r) => Ok(Value::Bool(values_equal(&l.eval(mu, registry)?, &r.eval(mu, registry)?))),
            Expr::Ne(l, r) => Ok(Value::Bool(!values_equal(&l.eval(mu, registry)?, &r.eval(mu, registry)?))),
            Expr::Lt(l, r) => compare(l, r, mu, registry, |a, b| a < b),
            Expr::Gt(l, r) => compare(l, r, mu, registry, |a, b| a > b),
            Expr::Le(l, r) => compare(l, r, mu, registry, |a, b| a <= b),
            Expr::Ge(l, r) => compare(l, r, mu, registry, |a, b| a >= b),
        }
    }

    /// The set of variables this expression reads, used by the
    /// compiler to decide whether a `BIND` over an empty BGP should
    /// become a standalone single-tuple bind (spec.md §4.3).
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Var(name) => out.push(name.clone()),
            Expr::Call(_, args) | Expr::CustomCall(_, args) => {
                for a in args {
                    a.collect_variables(out);
                }
            }
            Expr::And(l, r)
            | Expr::Or(l, r)
            | Expr::Eq(l, r)
            | Expr::Ne(l, r)
            | Expr::Lt(l, r)
            | Expr::Gt(l, r)
            | Expr::Le(l, r)
            | Expr::Ge(l, r) => {
                l.collect_variables(out);
                r.collect_variables(out);
            }
            Expr::Not(inner) => inner.collect_variables(out),
            Expr::StrLiteral(_) | Expr::NumLiteral(_) | Expr::IriLiteral(_) => {}
        }
    }
}

fn compare(l: &Expr, r: &Expr, mu: &Mapping, registry: &FunctionRegistry, op: impl Fn(f64, f64) -> bool) -> Result<Value> {
    let lv = l.eval(mu, registry)?;
    let rv = r.eval(mu, registry)?;
    let (a, b) = (numeric(&lv)?, numeric(&rv)?);
    Ok(Value::Bool(op(a, b)))
}

fn numeric(v: &Value) -> Result<f64> {
    match v {
        Value::Num(n) => Ok(*n),
        Value::Str(s) => s
            .parse()
            .map_err(|_| ErrorKind::ExpressionEvalError.with_message("non-numeric comparison operand")),
        Value::Term(t) => n3_lexical_value(t)
            .parse()
            .map_err(|_| ErrorKind::ExpressionEvalError.with_message("non-numeric comparison operand")),
        Value::Bool(_) => Err(ErrorKind::ExpressionEvalError.with_message("cannot compare a boolean numerically")),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a.as_str_value() == b.as_str_value()
}

fn eval_builtin(builtin: &Builtin, args: &[Expr], mu: &Mapping, registry: &FunctionRegistry) -> Result<Value> {
    match builtin {
        Builtin::Bound => {
            let Expr::Var(name) = &args[0] else {
                return Err(ErrorKind::ExpressionEvalError.with_message("BOUND() requires a variable argument"));
            };
            Ok(Value::Bool(mu.contains(name)))
        }
        Builtin::Str => {
            let v = args[0].eval(mu, registry)?;
            Ok(Value::Str(v.as_str_value()))
        }
        Builtin::Uri => {
            let v = args[0].eval(mu, registry)?;
            Ok(Value::Term(Term::iri(&v.as_str_value())))
        }
        Builtin::Concat => {
            let mut out = String::new();
            for a in args {
                out.push_str(&a.eval(mu, registry)?.as_str_value());
            }
            Ok(Value::Str(out))
        }
        Builtin::Md5 => {
            let v = args[0].eval(mu, registry)?;
            let mut hasher = Md5::new();
            hasher.update(v.as_str_value().as_bytes());
            let digest = hasher.finalize();
            Ok(Value::Str(format!("{digest:x}")))
        }
    }
}

// --- Parser -----------------------------------------------------------
//
// Grammar (loosest precedence first):
//   or_expr    := and_expr ( '||' and_expr )*
//   and_expr   := equality ( '&&' equality )*
//   equality   := unary ( ('=' | '!=' | '<=' | '>=' | '<' | '>') unary )?
//   unary      := '!' unary | primary
//   primary    := call | var | iri | string | number | '(' or_expr ')'

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = nom::multi::many0(preceded(ws(tag("||")), parse_and))(input)?;
    Ok((input, rest.into_iter().fold(first, |acc, r| Expr::Or(Box::new(acc), Box::new(r)))))
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_equality(input)?;
    let (input, rest) = nom::multi::many0(preceded(ws(tag("&&")), parse_equality))(input)?;
    Ok((input, rest.into_iter().fold(first, |acc, r| Expr::And(Box::new(acc), Box::new(r)))))
}

fn parse_equality(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_unary(input)?;
    let op = alt((
        tag("!="),
        tag("<="),
        tag(">="),
        tag("="),
        tag("<"),
        tag(">"),
    ));
    let (input, maybe_rhs) = opt(pair(ws(op), parse_unary))(input)?;
    let expr = match maybe_rhs {
        None => first,
        Some((op, rhs)) => match op {
            "=" => Expr::Eq(Box::new(first), Box::new(rhs)),
            "!=" => Expr::Ne(Box::new(first), Box::new(rhs)),
            "<" => Expr::Lt(Box::new(first), Box::new(rhs)),
            ">" => Expr::Gt(Box::new(first), Box::new(rhs)),
            "<=" => Expr::Le(Box::new(first), Box::new(rhs)),
            ">=" => Expr::Ge(Box::new(first), Box::new(rhs)),
            _ => unreachable!(),
        },
    };
    Ok((input, expr))
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('!')), parse_unary), |e| Expr::Not(Box::new(e))),
        parse_primary,
    ))(input)
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        parse_call,
        parse_var,
        parse_iri,
        parse_string,
        parse_number,
        delimited(char('('), parse_or, cut(char(')'))),
    )))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        nom::multi::many0_count(nom::character::complete::satisfy(|c| c.is_alphanumeric() || c == '_')),
    ))(input)
}

fn parse_call(input: &str) -> IResult<&str, Expr> {
    let (input, name) = identifier(input)?;
    let (input, args) = delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), parse_or),
        ws(char(')')),
    )(input)?;
    let builtin = match name.to_ascii_uppercase().as_str() {
        "STR" => Some(Builtin::Str),
        "URI" | "IRI" => Some(Builtin::Uri),
        "CONCAT" => Some(Builtin::Concat),
        "MD5" => Some(Builtin::Md5),
        "BOUND" => Some(Builtin::Bound),
        _ => None,
    };
    Ok((
        input,
        match builtin {
            Some(b) => Expr::Call(b, args),
            None => Expr::CustomCall(name.to_string(), args),
        },
    ))
}

fn parse_var(input: &str) -> IResult<&str, Expr> {
    map(recognize(pair(char('?'), identifier)), |v: &str| Expr::Var(v.to_string()))(input)
}

fn parse_iri(input: &str) -> IResult<&str, Expr> {
    map(delimited(char('<'), is_not(">"), char('>')), |iri: &str| {
        Expr::IriLiteral(Term::iri(iri))
    })(input)
}

fn parse_string(input: &str) -> IResult<&str, Expr> {
    let body = alt((
        escaped_transform(is_not("\\\""), '\\', alt((value("\\", tag("\\")), value("\"", tag("\""))))),
        value(String::new(), nom::combinator::peek(char('"'))),
    ));
    map(delimited(char('"'), body, char('"')), Expr::StrLiteral)(input)
}

fn parse_number(input: &str) -> IResult<&str, Expr> {
    map(
        recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1))))),
        |s: &str| Expr::NumLiteral(s.parse().unwrap_or(0.0)),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mu(pairs: &[(&str, &str)]) -> Mapping {
        pairs.iter().fold(Mapping::new(), |m, (k, v)| m.with(*k, Term::new(*v)))
    }

    #[test]
    fn parses_and_evaluates_md5_uri_concat_chain() {
        let expr = Expr::parse(
            r#"URI(CONCAT("http://", MD5(CONCAT(STR(<http://donald>), STR(<http://isa>), STR("duck")))))"#,
        )
        .unwrap();
        let value = expr.eval(&Mapping::new(), &FunctionRegistry::new()).unwrap();
        assert_eq!(value, Value::Term(Term::iri("http://c2fa74d2d092e3519266a8eb34824559")));
    }

    #[test]
    fn bound_checks_variable_presence() {
        let expr = Expr::parse("BOUND(?s)").unwrap();
        assert_eq!(
            expr.eval(&mu(&[("?s", "<http://a>")]), &FunctionRegistry::new()).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(expr.eval(&Mapping::new(), &FunctionRegistry::new()).unwrap(), Value::Bool(false));
    }

    #[test]
    fn comparison_and_boolean_operators() {
        let expr = Expr::parse("?n > 1 && ?n < 10").unwrap();
        assert_eq!(
            expr.eval(&mu(&[("?n", "5")]), &FunctionRegistry::new()).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            expr.eval(&mu(&[("?n", "50")]), &FunctionRegistry::new()).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn malformed_expression_is_a_parse_error_not_a_panic() {
        let err = Expr::parse("URI(CONCAT(").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExpressionEvalError);
    }

    #[test]
    fn custom_function_resolves_through_explicit_registry() {
        let mut registry = FunctionRegistry::new();
        registry.register(
            "DOUBLE",
            Arc::new(|args: &[Value]| Ok(Value::Num(numeric(&args[0])? * 2.0))),
        );
        let expr = Expr::parse("DOUBLE(?n)").unwrap();
        assert_eq!(expr.eval(&mu(&[("?n", "21")]), &registry).unwrap(), Value::Num(42.0));
    }
}
