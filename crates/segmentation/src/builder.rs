//! Segment query builder: fluent API for constructing segment queries.

use serde_json::Value;

use crate::query::{Condition, ConditionGroup, LogicalOperator, Operator, SegmentQuery};

pub struct SegmentQueryBuilder {
    logic: LogicalOperator,
    groups: Vec<ConditionGroup>,
}

impl SegmentQueryBuilder {
    pub fn new() -> Self {
        Self {
            logic: LogicalOperator::And,
            groups: Vec::new(),
        }
    }

    /// Combine groups with OR instead of AND.
    pub fn with_or(mut self) -> Self {
        self.logic = LogicalOperator::Or;
        self
    }

    pub fn group(mut self, build: impl FnOnce(GroupBuilder) -> GroupBuilder) -> Self {
        let group = build(GroupBuilder::new());
        self.groups.push(ConditionGroup::new(group.logic, group.conditions));
        self
    }

    pub fn build(self) -> SegmentQuery {
        SegmentQuery::new(self.logic, self.groups)
    }
}

impl Default for SegmentQueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GroupBuilder {
    logic: LogicalOperator,
    conditions: Vec<Condition>,
}

impl GroupBuilder {
    fn new() -> Self {
        Self {
            logic: LogicalOperator::And,
            conditions: Vec::new(),
        }
    }

    pub fn with_or(mut self) -> Self {
        self.logic = LogicalOperator::Or;
        self
    }

    pub fn condition(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions.push(Condition::new(field, operator, value));
        self
    }

    pub fn equals(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, Operator::Equals, value)
    }

    pub fn tagged_any<S: Into<String>>(self, tags: impl IntoIterator<Item = S>) -> Self {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        self.condition("tags", Operator::ContainsAny, tags)
    }

    pub fn tagged_all<S: Into<String>>(self, tags: impl IntoIterator<Item = S>) -> Self {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        self.condition("tags", Operator::ContainsAll, tags)
    }

    /// Opened an email within the last `days` days.
    pub fn active_within_days(self, days: u32) -> Self {
        self.condition("last_open_at", Operator::InLastDays, days)
    }
}
