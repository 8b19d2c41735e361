//! Group combinator: folds the conditions of one group into a single
//! parenthesized fragment.

use crate::condition::{ConditionEvaluator, Fragment};
use crate::error::SegmentResult;
use crate::fields::FieldResolver;
use crate::query::ConditionGroup;

#[derive(Debug, Clone, Copy)]
pub struct GroupCombinator<'a> {
    resolver: &'a FieldResolver,
    evaluator: &'a ConditionEvaluator,
}

impl<'a> GroupCombinator<'a> {
    pub fn new(resolver: &'a FieldResolver, evaluator: &'a ConditionEvaluator) -> Self {
        Self {
            resolver,
            evaluator,
        }
    }

    /// `None` when the group has no conditions and so contributes nothing
    /// to its parent.
    pub fn compile(&self, group: &ConditionGroup) -> SegmentResult<Option<Fragment>> {
        if group.conditions.is_empty() {
            return Ok(None);
        }

        let fragments = group
            .conditions
            .iter()
            .map(|condition| {
                let field = self.resolver.resolve(&condition.field)?;
                self.evaluator.compile(condition, field)
            })
            .collect::<SegmentResult<Vec<_>>>()?;

        Ok(Some(Fragment::join(group.logic, fragments)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::CompileOptions;
    use crate::error::SegmentError;
    use crate::expr::Expression;
    use crate::query::{Condition, LogicalOperator, Operator};
    use chrono::Utc;
    use crm_core::config::PlaceholderStyle;
    use serde_json::json;

    fn evaluator() -> ConditionEvaluator {
        ConditionEvaluator::new(CompileOptions::default(), Utc::now())
    }

    #[test]
    fn test_empty_group_contributes_nothing() {
        let resolver = FieldResolver::new();
        let evaluator = evaluator();
        let group = ConditionGroup::new(LogicalOperator::Or, Vec::new());
        assert!(GroupCombinator::new(&resolver, &evaluator)
            .compile(&group)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_or_group_is_parenthesized() {
        let resolver = FieldResolver::new();
        let evaluator = evaluator();
        let group = ConditionGroup::new(
            LogicalOperator::Or,
            vec![
                Condition::new("geographic_tier", Operator::Equals, "tier_1"),
                Condition::new("pos_system", Operator::Equals, "toast"),
            ],
        );
        let fragment = GroupCombinator::new(&resolver, &evaluator)
            .compile(&group)
            .unwrap()
            .unwrap();

        assert!(matches!(fragment.expression, Expression::Any(_)));
        assert_eq!(
            fragment.expression.to_sql(PlaceholderStyle::Question),
            "(geo_tier = ? OR pos_system = ?)"
        );
        assert_eq!(fragment.parameters, vec![json!("tier_1"), json!("toast")]);
    }

    #[test]
    fn test_unknown_field_aborts_group() {
        let resolver = FieldResolver::new();
        let evaluator = evaluator();
        let group = ConditionGroup::new(
            LogicalOperator::And,
            vec![
                Condition::new("status", Operator::Equals, "active"),
                Condition::new("password_hash", Operator::IsNotEmpty, json!(null)),
            ],
        );
        let err = GroupCombinator::new(&resolver, &evaluator)
            .compile(&group)
            .unwrap_err();
        assert!(matches!(err, SegmentError::FieldResolution { ref field } if field == "password_hash"));
    }
}
