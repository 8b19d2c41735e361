//! Condition evaluator: turns one field/operator/value condition into an
//! expression fragment plus the values it binds.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use crm_core::config::SegmentationConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{SegmentError, SegmentResult};
use crate::expr::{escape_like, CompareOp, Expression};
use crate::fields::{ResolvedField, StorageField};
use crate::query::{Condition, LogicalOperator, Operator};

const SECS_PER_DAY: i64 = 86_400;

/// A compiled piece of filter with its own positional parameters,
/// numbered from zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub expression: Expression,
    pub parameters: Vec<Value>,
}

/// What to do with input the compiler cannot interpret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// Compile the condition to an always-true fragment.
    #[default]
    MatchAll,
    /// Fail the whole compile.
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Unrecognized operators, and tag-only operators used on other fields.
    pub unknown_operator: Fallback,
    /// Values whose shape does not fit the operator.
    pub malformed_value: Fallback,
}

impl CompileOptions {
    pub fn strict() -> Self {
        Self {
            unknown_operator: Fallback::Reject,
            malformed_value: Fallback::Reject,
        }
    }

    pub fn from_config(config: &SegmentationConfig) -> Self {
        let pick = |strict: bool| {
            if strict {
                Fallback::Reject
            } else {
                Fallback::MatchAll
            }
        };
        Self {
            unknown_operator: pick(config.strict_operators),
            malformed_value: pick(config.strict_values),
        }
    }
}

impl Fragment {
    pub fn match_all() -> Self {
        Self {
            expression: Expression::True,
            parameters: Vec::new(),
        }
    }

    pub fn match_none() -> Self {
        Self {
            expression: Expression::False,
            parameters: Vec::new(),
        }
    }

    fn leaf(expression: Expression, parameters: Vec<Value>) -> Self {
        Self {
            expression,
            parameters,
        }
    }

    /// Combine fragments under one boolean operator, renumbering each
    /// child's parameters so they follow its left siblings'.
    pub fn join(logic: LogicalOperator, fragments: Vec<Fragment>) -> Fragment {
        let mut children = Vec::with_capacity(fragments.len());
        let mut parameters = Vec::new();
        for mut fragment in fragments {
            fragment.expression.shift_params(parameters.len());
            parameters.append(&mut fragment.parameters);
            children.push(fragment.expression);
        }
        let expression = match logic {
            LogicalOperator::And => Expression::All(children),
            LogicalOperator::Or => Expression::Any(children),
        };
        Fragment {
            expression,
            parameters,
        }
    }
}

/// Compiles single conditions. `now` anchors `in_last_days`.
#[derive(Debug, Clone, Copy)]
pub struct ConditionEvaluator {
    options: CompileOptions,
    now: DateTime<Utc>,
}

impl ConditionEvaluator {
    pub fn new(options: CompileOptions, now: DateTime<Utc>) -> Self {
        Self { options, now }
    }

    pub fn compile(
        &self,
        condition: &Condition,
        field: ResolvedField<'_>,
    ) -> SegmentResult<Fragment> {
        let column = field.storage;
        let value = &condition.value;
        let op = &condition.operator;

        match op {
            Operator::Equals | Operator::NotEquals => {
                let negated = *op == Operator::NotEquals;
                if field.is_email_domain() {
                    let Some(domain) = scalar_text(value) else {
                        return self.malformed(condition, "expected a domain string");
                    };
                    return Ok(like(column, domain_pattern(&domain), negated));
                }
                let Some(v) = scalar(value) else {
                    return self.malformed(condition, "expected a single value");
                };
                let cmp = if negated { CompareOp::Ne } else { CompareOp::Eq };
                Ok(compare(column, cmp, v))
            }
            Operator::Contains | Operator::NotContains => {
                let Some(text) = scalar_text(value) else {
                    return self.malformed(condition, "expected a text value");
                };
                let pattern = if field.is_tags() {
                    tag_pattern(&text)
                } else {
                    format!("%{}%", escape_like(&text))
                };
                Ok(like(column, pattern, *op == Operator::NotContains))
            }
            Operator::StartsWith | Operator::EndsWith => {
                let Some(text) = scalar_text(value) else {
                    return self.malformed(condition, "expected a text value");
                };
                let pattern = if *op == Operator::StartsWith {
                    format!("{}%", escape_like(&text))
                } else {
                    format!("%{}", escape_like(&text))
                };
                Ok(like(column, pattern, false))
            }
            Operator::GreaterThan
            | Operator::LessThan
            | Operator::GreaterThanOrEquals
            | Operator::LessThanOrEquals => {
                let Some(v) = scalar(value) else {
                    return self.malformed(condition, "expected a single value");
                };
                let cmp = match op {
                    Operator::GreaterThan => CompareOp::Gt,
                    Operator::LessThan => CompareOp::Lt,
                    Operator::GreaterThanOrEquals => CompareOp::Ge,
                    _ => CompareOp::Le,
                };
                Ok(compare(column, cmp, v))
            }
            Operator::Between => match value.as_array().map(Vec::as_slice) {
                Some([low, high]) if scalar(low).is_some() && scalar(high).is_some() => {
                    Ok(Fragment::leaf(
                        Expression::Between {
                            field: column,
                            low: 0,
                            high: 1,
                        },
                        vec![low.clone(), high.clone()],
                    ))
                }
                _ => self.malformed(condition, "expected a [low, high] pair"),
            },
            Operator::InList | Operator::NotInList => {
                let negated = *op == Operator::NotInList;
                let Some(items) = value.as_array() else {
                    return self.malformed(condition, "expected an array");
                };
                if items.iter().any(|v| scalar(v).is_none()) {
                    return self.malformed(condition, "list items must be scalar values");
                }
                if items.is_empty() {
                    return Ok(if negated {
                        Fragment::match_all()
                    } else {
                        Fragment::match_none()
                    });
                }
                if field.is_email_domain() {
                    let mut parts = Vec::with_capacity(items.len());
                    for item in items {
                        let Some(domain) = scalar_text(item) else {
                            return self.malformed(condition, "expected domain strings");
                        };
                        parts.push(like(column, domain_pattern(&domain), negated));
                    }
                    // not_in_list: the email ends in none of the domains.
                    let logic = if negated {
                        LogicalOperator::And
                    } else {
                        LogicalOperator::Or
                    };
                    return Ok(Fragment::join(logic, parts));
                }
                Ok(Fragment::leaf(
                    Expression::InList {
                        field: column,
                        params: (0..items.len()).collect(),
                        negated,
                    },
                    items.clone(),
                ))
            }
            Operator::IsEmpty | Operator::IsNotEmpty => Ok(Fragment::leaf(
                Expression::Blank {
                    field: column,
                    negated: *op == Operator::IsNotEmpty,
                },
                Vec::new(),
            )),
            Operator::Before | Operator::After => {
                let Some(ts) = parse_timestamp(value) else {
                    return self.malformed(condition, "expected an ISO date or Unix timestamp");
                };
                let cmp = if *op == Operator::Before {
                    CompareOp::Lt
                } else {
                    CompareOp::Gt
                };
                Ok(compare(column, cmp, Value::from(ts)))
            }
            Operator::InLastDays => {
                let Some(days) = whole_days(value) else {
                    return self.malformed(condition, "expected a whole number of days");
                };
                let cutoff = days
                    .checked_mul(SECS_PER_DAY)
                    .and_then(|secs| self.now.timestamp().checked_sub(secs));
                let Some(cutoff) = cutoff else {
                    return self.malformed(condition, "day count out of range");
                };
                Ok(compare(column, CompareOp::Ge, Value::from(cutoff)))
            }
            Operator::ContainsAny | Operator::ContainsAll => {
                if !field.is_tags() {
                    return self.unknown(condition);
                }
                let Some(items) = value.as_array() else {
                    return self.malformed(condition, "expected an array of tags");
                };
                let mut tags = Vec::with_capacity(items.len());
                for item in items {
                    match scalar_text(item) {
                        Some(tag) => tags.push(tag),
                        None => return self.malformed(condition, "tags must be strings"),
                    }
                }
                let logic = if *op == Operator::ContainsAny {
                    LogicalOperator::Or
                } else {
                    LogicalOperator::And
                };
                if tags.is_empty() {
                    return Ok(match logic {
                        LogicalOperator::Or => Fragment::match_none(),
                        LogicalOperator::And => Fragment::match_all(),
                    });
                }
                let parts = tags
                    .iter()
                    .map(|tag| like(column, tag_pattern(tag), false))
                    .collect();
                Ok(Fragment::join(logic, parts))
            }
            Operator::Unknown(_) => self.unknown(condition),
        }
    }

    fn malformed(&self, condition: &Condition, reason: &str) -> SegmentResult<Fragment> {
        let err = SegmentError::MalformedValue {
            field: condition.field.clone(),
            operator: condition.operator.to_string(),
            reason: reason.to_string(),
        };
        self.fall_back(self.options.malformed_value, condition, err)
    }

    fn unknown(&self, condition: &Condition) -> SegmentResult<Fragment> {
        let err = SegmentError::UnknownOperator {
            operator: condition.operator.to_string(),
        };
        self.fall_back(self.options.unknown_operator, condition, err)
    }

    fn fall_back(
        &self,
        policy: Fallback,
        condition: &Condition,
        err: SegmentError,
    ) -> SegmentResult<Fragment> {
        match policy {
            Fallback::MatchAll => {
                warn!(
                    field = %condition.field,
                    operator = %condition.operator,
                    error = %err,
                    "Segment condition compiled to match-all"
                );
                Ok(Fragment::match_all())
            }
            Fallback::Reject => Err(err),
        }
    }
}

fn compare(field: StorageField, op: CompareOp, value: Value) -> Fragment {
    Fragment::leaf(
        Expression::Compare {
            field,
            op,
            param: 0,
        },
        vec![value],
    )
}

fn like(field: StorageField, pattern: String, negated: bool) -> Fragment {
    Fragment::leaf(
        Expression::Like {
            field,
            pattern: 0,
            negated,
        },
        vec![Value::String(pattern)],
    )
}

/// A tag matches when its JSON string form appears in the array text, so
/// quotes and backslashes inside the tag are matched in escaped form.
fn tag_pattern(tag: &str) -> String {
    let quoted = Value::from(tag).to_string();
    format!("%{}%", escape_like(&quoted))
}

/// Suffix pattern for an email domain; a leading `@` is tolerated.
fn domain_pattern(domain: &str) -> String {
    format!("%@{}", escape_like(domain.trim_start_matches('@')))
}

fn scalar(value: &Value) -> Option<Value> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Some(value.clone()),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn whole_days(value: &Value) -> Option<i64> {
    let days = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    (days >= 0).then_some(days)
}

/// Unix seconds from an integer, an RFC 3339 timestamp, a naive
/// `YYYY-MM-DD[THH:MM:SS]` (read as UTC) or a bare date (midnight UTC).
fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp());
            }
            for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(dt.and_utc().timestamp());
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().timestamp())
        }
        _ => None,
    }
}
