//! Backend-neutral filter expressions.
//!
//! Leaves reference bound parameters by position; no comparison value is
//! ever part of the tree itself. The same tree renders to SQL and evaluates
//! directly against in-memory rows.

use std::cmp::Ordering;
use std::fmt::Write as _;

use crm_core::config::PlaceholderStyle;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields::{FieldKind, StorageField};

static NULL: Value = Value::Null;

/// Read access to one subscriber row, column by column.
pub trait RowAccessor {
    /// The stored value of `field`, `Value::Null` when unset.
    fn value(&self, field: StorageField) -> Value;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    True,
    False,
    Compare {
        field: StorageField,
        op: CompareOp,
        param: usize,
    },
    /// `LIKE` with `\` as the escape character.
    Like {
        field: StorageField,
        pattern: usize,
        negated: bool,
    },
    /// Inclusive on both ends.
    Between {
        field: StorageField,
        low: usize,
        high: usize,
    },
    InList {
        field: StorageField,
        params: Vec<usize>,
        negated: bool,
    },
    /// NULL or the column's empty encoding (`''`, or `'[]'` for tag lists).
    Blank { field: StorageField, negated: bool },
    All(Vec<Expression>),
    Any(Vec<Expression>),
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
        }
    }

    fn holds(&self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Ge => ord != Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
        }
    }
}

impl Expression {
    pub fn is_match_all(&self) -> bool {
        matches!(self, Expression::True)
    }

    /// Parameter indices in the order their placeholders are rendered.
    pub fn param_order(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_params(&mut out);
        out
    }

    pub fn placeholder_count(&self) -> usize {
        self.param_order().len()
    }

    fn collect_params(&self, out: &mut Vec<usize>) {
        match self {
            Expression::True | Expression::False | Expression::Blank { .. } => {}
            Expression::Compare { param, .. } => out.push(*param),
            Expression::Like { pattern, .. } => out.push(*pattern),
            Expression::Between { low, high, .. } => {
                out.push(*low);
                out.push(*high);
            }
            Expression::InList { params, .. } => out.extend(params.iter().copied()),
            Expression::All(children) | Expression::Any(children) => {
                for child in children {
                    child.collect_params(out);
                }
            }
        }
    }

    /// Move every parameter reference `offset` positions to the right.
    pub(crate) fn shift_params(&mut self, offset: usize) {
        if offset == 0 {
            return;
        }
        match self {
            Expression::True | Expression::False | Expression::Blank { .. } => {}
            Expression::Compare { param, .. } => *param += offset,
            Expression::Like { pattern, .. } => *pattern += offset,
            Expression::Between { low, high, .. } => {
                *low += offset;
                *high += offset;
            }
            Expression::InList { params, .. } => {
                for p in params.iter_mut() {
                    *p += offset;
                }
            }
            Expression::All(children) | Expression::Any(children) => {
                for child in children.iter_mut() {
                    child.shift_params(offset);
                }
            }
        }
    }

    // SQL rendering

    pub fn to_sql(&self, style: PlaceholderStyle) -> String {
        let mut out = String::new();
        self.write_sql(&mut out, style);
        out
    }

    fn write_sql(&self, out: &mut String, style: PlaceholderStyle) {
        match self {
            Expression::True => out.push_str("1 = 1"),
            Expression::False => out.push_str("1 = 0"),
            Expression::Compare { field, op, param } => {
                let _ = write!(out, "{} {} ", field.column(), op.symbol());
                push_placeholder(out, style, *param);
            }
            Expression::Like {
                field,
                pattern,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let _ = write!(out, "{} {}LIKE ", field.column(), not);
                push_placeholder(out, style, *pattern);
                out.push_str(" ESCAPE '\\'");
            }
            Expression::Between { field, low, high } => {
                let _ = write!(out, "{} BETWEEN ", field.column());
                push_placeholder(out, style, *low);
                out.push_str(" AND ");
                push_placeholder(out, style, *high);
            }
            Expression::InList {
                field,
                params,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let _ = write!(out, "{} {}IN (", field.column(), not);
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    push_placeholder(out, style, *p);
                }
                out.push(')');
            }
            Expression::Blank { field, negated } => {
                let col = field.column();
                let _ = match (blank_marker(*field), *negated) {
                    (Some(marker), false) => {
                        write!(out, "({col} IS NULL OR {col} = '{marker}')")
                    }
                    (Some(marker), true) => {
                        write!(out, "({col} IS NOT NULL AND {col} <> '{marker}')")
                    }
                    (None, false) => write!(out, "{col} IS NULL"),
                    (None, true) => write!(out, "{col} IS NOT NULL"),
                };
            }
            Expression::All(children) => write_joined(out, children, "AND", "1 = 1", style),
            Expression::Any(children) => write_joined(out, children, "OR", "1 = 0", style),
        }
    }

    // In-memory evaluation

    /// Evaluate against one row with SQL semantics: NULL satisfies no
    /// comparison, `LIKE` folds ASCII case.
    pub fn evaluate(&self, row: &dyn RowAccessor, params: &[Value]) -> bool {
        let param = |i: usize| params.get(i).unwrap_or(&NULL);
        match self {
            Expression::True => true,
            Expression::False => false,
            Expression::Compare { field, op, param: p } => {
                sql_cmp(&row.value(*field), param(*p)).is_some_and(|ord| op.holds(ord))
            }
            Expression::Like {
                field,
                pattern,
                negated,
            } => {
                let actual = row.value(*field);
                match (sql_text(&actual), sql_text(param(*pattern))) {
                    (Some(text), Some(pat)) => like_match(&text, &pat) != *negated,
                    _ => false,
                }
            }
            Expression::Between { field, low, high } => {
                let actual = row.value(*field);
                let above = sql_cmp(&actual, param(*low)).is_some_and(|o| o != Ordering::Less);
                let below = sql_cmp(&actual, param(*high)).is_some_and(|o| o != Ordering::Greater);
                above && below
            }
            Expression::InList {
                field,
                params: list,
                negated,
            } => {
                let actual = row.value(*field);
                if actual.is_null() {
                    return false;
                }
                let found = list
                    .iter()
                    .any(|p| sql_cmp(&actual, param(*p)) == Some(Ordering::Equal));
                if *negated {
                    !found && list.iter().all(|p| !param(*p).is_null())
                } else {
                    found
                }
            }
            Expression::Blank { field, negated } => {
                let actual = row.value(*field);
                let blank = match (&actual, blank_marker(*field)) {
                    (Value::Null, _) => true,
                    (Value::String(s), Some(marker)) => s == marker,
                    _ => false,
                };
                blank != *negated
            }
            Expression::All(children) => children.iter().all(|c| c.evaluate(row, params)),
            Expression::Any(children) => children.iter().any(|c| c.evaluate(row, params)),
        }
    }
}

fn push_placeholder(out: &mut String, style: PlaceholderStyle, param: usize) {
    match style {
        PlaceholderStyle::Question => out.push('?'),
        PlaceholderStyle::Numbered => {
            let _ = write!(out, "${}", param + 1);
        }
    }
}

fn write_joined(
    out: &mut String,
    children: &[Expression],
    keyword: &str,
    empty: &str,
    style: PlaceholderStyle,
) {
    if children.is_empty() {
        out.push_str(empty);
        return;
    }
    out.push('(');
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            let _ = write!(out, " {keyword} ");
        }
        child.write_sql(out, style);
    }
    out.push(')');
}

/// The non-NULL value a column uses to mean "empty", if it has one.
fn blank_marker(field: StorageField) -> Option<&'static str> {
    match field.kind() {
        FieldKind::Text => Some(""),
        FieldKind::TagList => Some("[]"),
        FieldKind::Number | FieldKind::Timestamp => None,
    }
}

fn sql_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn sql_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        other => Some(other.to_string()),
    }
}

/// Numeric when both sides read as numbers, otherwise byte-wise text order.
fn sql_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    if let (Some(x), Some(y)) = (sql_number(a), sql_number(b)) {
        return x.partial_cmp(&y);
    }
    Some(sql_text(a)?.cmp(&sql_text(b)?))
}

/// SQL `LIKE` with `%`, `_` and `\` escapes, ASCII case-insensitive.
pub(crate) fn like_match(text: &str, pattern: &str) -> bool {
    #[derive(Clone, Copy)]
    enum Tok {
        Many,
        One,
        Lit(char),
    }

    let mut toks = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        toks.push(match c {
            '%' => Tok::Many,
            '_' => Tok::One,
            '\\' => Tok::Lit(chars.next().unwrap_or('\\')),
            other => Tok::Lit(other),
        });
    }

    let text: Vec<char> = text.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match toks.get(p) {
            Some(Tok::Many) => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some(Tok::One) => {
                t += 1;
                p += 1;
                continue;
            }
            Some(Tok::Lit(c)) if c.eq_ignore_ascii_case(&text[t]) => {
                t += 1;
                p += 1;
                continue;
            }
            _ => {}
        }
        match backtrack {
            Some((star, from)) => {
                p = star + 1;
                t = from + 1;
                backtrack = Some((star, from + 1));
            }
            None => return false,
        }
    }
    toks[p..].iter().all(|tok| matches!(tok, Tok::Many))
}

/// Escape LIKE metacharacters so a user value only matches literally.
pub(crate) fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
