//! Segment query documents: groups of field/operator/value conditions.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A stored segment definition, one JSON document per dynamic segment.
///
/// Older documents carry a flat `conditions` list and no `groups`; those are
/// read as a single AND group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentQuery {
    #[serde(default)]
    pub logic: LogicalOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<ConditionGroup>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub logic: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOperator {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Comparison operators a condition may use.
///
/// Unrecognized operator strings deserialize into `Unknown` so that a stored
/// segment with a typo still loads; the compiler decides what to do with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterThanOrEquals,
    LessThanOrEquals,
    Between,
    InList,
    NotInList,
    IsEmpty,
    IsNotEmpty,
    Before,
    After,
    InLastDays,
    ContainsAny,
    ContainsAll,
    Unknown(String),
}

impl SegmentQuery {
    pub fn new(logic: LogicalOperator, groups: Vec<ConditionGroup>) -> Self {
        Self {
            logic,
            groups: Some(groups),
            conditions: Vec::new(),
        }
    }

    /// Parse a stored segment document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The groups to compile, with the legacy flat shape folded into one
    /// implicit AND group.
    pub fn normalized_groups(&self) -> Cow<'_, [ConditionGroup]> {
        match &self.groups {
            Some(groups) => Cow::Borrowed(groups.as_slice()),
            None if self.conditions.is_empty() => Cow::Owned(Vec::new()),
            None => Cow::Owned(vec![ConditionGroup {
                logic: LogicalOperator::And,
                conditions: self.conditions.clone(),
            }]),
        }
    }
}

impl ConditionGroup {
    pub fn new(logic: LogicalOperator, conditions: Vec<Condition>) -> Self {
        Self { logic, conditions }
    }
}

impl Condition {
    pub fn new(
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::GreaterThanOrEquals => "greater_than_or_equals",
            Operator::LessThanOrEquals => "less_than_or_equals",
            Operator::Between => "between",
            Operator::InList => "in_list",
            Operator::NotInList => "not_in_list",
            Operator::IsEmpty => "is_empty",
            Operator::IsNotEmpty => "is_not_empty",
            Operator::Before => "before",
            Operator::After => "after",
            Operator::InLastDays => "in_last_days",
            Operator::ContainsAny => "contains_any",
            Operator::ContainsAll => "contains_all",
            Operator::Unknown(other) => other,
        }
    }

    /// Operators whose result depends on the compile-time clock or on dates.
    pub fn is_time_relative(&self) -> bool {
        matches!(self, Operator::Before | Operator::After | Operator::InLastDays)
    }
}

impl From<String> for Operator {
    fn from(s: String) -> Self {
        match s.as_str() {
            "equals" => Operator::Equals,
            "not_equals" => Operator::NotEquals,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "starts_with" => Operator::StartsWith,
            "ends_with" => Operator::EndsWith,
            "greater_than" => Operator::GreaterThan,
            "less_than" => Operator::LessThan,
            "greater_than_or_equals" => Operator::GreaterThanOrEquals,
            "less_than_or_equals" => Operator::LessThanOrEquals,
            "between" => Operator::Between,
            "in_list" => Operator::InList,
            "not_in_list" => Operator::NotInList,
            "is_empty" => Operator::IsEmpty,
            "is_not_empty" => Operator::IsNotEmpty,
            "before" => Operator::Before,
            "after" => Operator::After,
            "in_last_days" => Operator::InLastDays,
            "contains_any" => Operator::ContainsAny,
            "contains_all" => Operator::ContainsAll,
            _ => Operator::Unknown(s),
        }
    }
}

impl From<&str> for Operator {
    fn from(s: &str) -> Self {
        Operator::from(s.to_string())
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        match op {
            Operator::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_grouped_document() {
        let query: SegmentQuery = serde_json::from_value(json!({
            "logic": "OR",
            "groups": [
                { "logic": "AND", "conditions": [
                    { "field": "tags", "operator": "contains", "value": "vip" },
                    { "field": "engagement_score", "operator": "greater_than", "value": 50 }
                ]},
                { "conditions": [
                    { "field": "geographic_tier", "operator": "equals", "value": "tier_1" }
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(query.logic, LogicalOperator::Or);
        let groups = query.normalized_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].logic, LogicalOperator::And);
        assert_eq!(groups[0].conditions[1].operator, Operator::GreaterThan);
    }

    #[test]
    fn test_legacy_flat_conditions() {
        let query = SegmentQuery::from_json(
            r#"{"logic":"OR","conditions":[
                {"field":"status","operator":"equals","value":"active"},
                {"field":"source","operator":"equals","value":"website"}
            ]}"#,
        )
        .unwrap();

        let groups = query.normalized_groups();
        assert_eq!(groups.len(), 1);
        // The implicit group is always AND, whatever the top-level logic says.
        assert_eq!(groups[0].logic, LogicalOperator::And);
        assert_eq!(groups[0].conditions.len(), 2);
    }

    #[test]
    fn test_explicit_groups_win_over_flat_conditions() {
        let query: SegmentQuery = serde_json::from_value(json!({
            "groups": [],
            "conditions": [{ "field": "status", "operator": "equals", "value": "active" }]
        }))
        .unwrap();
        assert!(query.normalized_groups().is_empty());
    }

    #[test]
    fn test_unknown_operator_round_trips() {
        let cond: Condition = serde_json::from_value(json!({
            "field": "email", "operator": "equalz", "value": "x"
        }))
        .unwrap();
        assert_eq!(cond.operator, Operator::Unknown("equalz".to_string()));

        let back = serde_json::to_value(&cond).unwrap();
        assert_eq!(back["operator"], "equalz");
    }

    #[test]
    fn test_missing_value_is_null() {
        let cond: Condition =
            serde_json::from_value(json!({ "field": "phone", "operator": "is_empty" })).unwrap();
        assert_eq!(cond.operator, Operator::IsEmpty);
        assert!(cond.value.is_null());
    }

    #[test]
    fn test_lowercase_logic_accepted() {
        let group: ConditionGroup =
            serde_json::from_value(json!({ "logic": "or", "conditions": [] })).unwrap();
        assert_eq!(group.logic, LogicalOperator::Or);
        assert_eq!(serde_json::to_value(group.logic).unwrap(), "OR");
    }
}
