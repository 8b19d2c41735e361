//! Query compiler: turns a [`SegmentQuery`] into a [`CompiledFilter`].

use chrono::{DateTime, Utc};
use crm_core::config::{PlaceholderStyle, SegmentationConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::condition::{CompileOptions, ConditionEvaluator, Fragment};
use crate::error::{SegmentError, SegmentResult};
use crate::expr::{Expression, RowAccessor};
use crate::fields::FieldResolver;
use crate::group::GroupCombinator;
use crate::query::SegmentQuery;

/// Whether the consumer counts matches or fetches full rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Count,
    Rows,
}

/// A compiled segment filter: an expression plus its positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledFilter {
    expression: Expression,
    parameters: Vec<Value>,
    mode: Mode,
    time_relative: bool,
}

impl CompiledFilter {
    pub fn match_all(mode: Mode) -> Self {
        Self {
            expression: Expression::True,
            parameters: Vec::new(),
            mode,
            time_relative: false,
        }
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// No restriction at all: every subscriber matches.
    pub fn is_match_all(&self) -> bool {
        self.expression.is_match_all()
    }

    /// True when the filter embeds a resolution-time timestamp, so a cached
    /// copy goes stale.
    pub fn is_time_relative(&self) -> bool {
        self.time_relative
    }

    /// Placeholders must reference parameters `0..n` in rendering order.
    pub fn check_alignment(&self) -> SegmentResult<()> {
        let order = self.expression.param_order();
        let aligned = order.len() == self.parameters.len()
            && order.iter().enumerate().all(|(i, p)| i == *p);
        if aligned {
            Ok(())
        } else {
            Err(SegmentError::ParameterMismatch {
                placeholders: order.len(),
                parameters: self.parameters.len(),
            })
        }
    }

    /// The `WHERE` predicate, or `None` for a match-all filter.
    pub fn where_clause(&self, style: PlaceholderStyle) -> Option<String> {
        (!self.is_match_all()).then(|| self.expression.to_sql(style))
    }

    /// Full statement for the filter's mode against `table`.
    pub fn to_sql(&self, table: &str, style: PlaceholderStyle) -> String {
        let select = match self.mode {
            Mode::Count => format!("SELECT COUNT(*) FROM {table}"),
            Mode::Rows => format!("SELECT * FROM {table}"),
        };
        match self.where_clause(style) {
            Some(predicate) => format!("{select} WHERE {predicate}"),
            None => select,
        }
    }

    pub fn matches(&self, row: &dyn RowAccessor) -> bool {
        self.expression.evaluate(row, &self.parameters)
    }
}

/// Compiles segment queries. Holds no state between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentCompiler {
    options: CompileOptions,
    resolver: FieldResolver,
}

impl SegmentCompiler {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            resolver: FieldResolver::new(),
        }
    }

    pub fn from_config(config: &SegmentationConfig) -> Self {
        Self::new(CompileOptions::from_config(config))
    }

    pub fn options(&self) -> CompileOptions {
        self.options
    }

    /// Compile `query` for `mode`. `now` anchors every time-relative
    /// operator.
    pub fn compile(
        &self,
        query: &SegmentQuery,
        mode: Mode,
        now: DateTime<Utc>,
    ) -> SegmentResult<CompiledFilter> {
        let groups = query.normalized_groups();

        // Reject bad field names before anything is bound.
        for condition in groups.iter().flat_map(|g| g.conditions.iter()) {
            self.resolver.resolve(&condition.field)?;
        }

        let evaluator = ConditionEvaluator::new(self.options, now);
        let combinator = GroupCombinator::new(&self.resolver, &evaluator);

        let mut fragments = Vec::with_capacity(groups.len());
        for group in groups.iter() {
            if let Some(fragment) = combinator.compile(group)? {
                fragments.push(fragment);
            }
        }

        let time_relative = groups
            .iter()
            .flat_map(|g| g.conditions.iter())
            .any(|c| c.operator.is_time_relative());

        debug!(
            groups = groups.len(),
            surviving = fragments.len(),
            mode = ?mode,
            "Compiling segment query"
        );

        if fragments.is_empty() {
            return Ok(CompiledFilter::match_all(mode));
        }

        let Fragment {
            expression,
            parameters,
        } = Fragment::join(query.logic, fragments);

        Ok(CompiledFilter {
            expression,
            parameters,
            mode,
            time_relative,
        })
    }
}
