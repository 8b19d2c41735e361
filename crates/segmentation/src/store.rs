//! Subscriber store: executes compiled filters.
//!
//! Production: the SQL from [`CompiledFilter::to_sql`] runs against the
//! subscriber table with positionally bound parameters. The in-memory store
//! evaluates the same expression tree directly and backs tests and previews.

use crm_core::types::Subscriber;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::compiler::CompiledFilter;
use crate::error::SegmentResult;
use crate::expr::RowAccessor;
use crate::fields::StorageField;

/// Executes filters against the subscriber relation.
pub trait SubscriberStore {
    fn count(&self, filter: &CompiledFilter) -> SegmentResult<u64>;
    fn fetch(&self, filter: &CompiledFilter) -> SegmentResult<Vec<Subscriber>>;
}

impl RowAccessor for Subscriber {
    fn value(&self, field: StorageField) -> Value {
        fn text(v: &Option<String>) -> Value {
            v.as_ref().map_or(Value::Null, |s| Value::String(s.clone()))
        }
        fn int(v: Option<i64>) -> Value {
            v.map_or(Value::Null, Value::from)
        }

        match field {
            StorageField::Email => Value::String(self.email.clone()),
            StorageField::FirstName => text(&self.first_name),
            StorageField::LastName => text(&self.last_name),
            StorageField::Company => text(&self.company),
            StorageField::Phone => text(&self.phone),
            StorageField::City => text(&self.city),
            StorageField::State => text(&self.state),
            StorageField::Status => self
                .status
                .map_or(Value::Null, |s| Value::String(s.as_str().to_string())),
            StorageField::Source => text(&self.source),
            StorageField::PosSystem => text(&self.pos_system),
            StorageField::GeoTier => text(&self.geo_tier),
            StorageField::TagsJson => self.tags_json().map_or(Value::Null, Value::String),
            StorageField::EngagementScore => self.engagement_score.map_or(Value::Null, Value::from),
            StorageField::EmailsSent => int(self.emails_sent),
            StorageField::EmailsOpened => int(self.emails_opened),
            StorageField::EmailsClicked => int(self.emails_clicked),
            StorageField::CreatedAt => int(self.created_at),
            StorageField::UpdatedAt => int(self.updated_at),
            StorageField::SubscribedAt => int(self.subscribed_at),
            StorageField::LastEmailAt => int(self.last_email_at),
            StorageField::LastOpenAt => int(self.last_open_at),
            StorageField::LastClickAt => int(self.last_click_at),
        }
    }
}

/// Thread-safe in-memory subscriber table keyed by id.
pub struct InMemorySubscriberStore {
    subscribers: DashMap<Uuid, Subscriber>,
}

impl InMemorySubscriberStore {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    pub fn with_subscribers(subscribers: impl IntoIterator<Item = Subscriber>) -> Self {
        let store = Self::new();
        for subscriber in subscribers {
            store.insert(subscriber);
        }
        store
    }

    pub fn insert(&self, subscriber: Subscriber) {
        self.subscribers.insert(subscriber.id, subscriber);
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl Default for InMemorySubscriberStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberStore for InMemorySubscriberStore {
    fn count(&self, filter: &CompiledFilter) -> SegmentResult<u64> {
        filter.check_alignment()?;
        let count = self
            .subscribers
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .count() as u64;
        debug!(count, "Counted segment matches");
        Ok(count)
    }

    fn fetch(&self, filter: &CompiledFilter) -> SegmentResult<Vec<Subscriber>> {
        filter.check_alignment()?;
        let mut rows: Vec<Subscriber> = self
            .subscribers
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| a.email.cmp(&b.email));
        debug!(rows = rows.len(), "Fetched segment matches");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Mode, SegmentCompiler};
    use crate::query::SegmentQuery;
    use chrono::Utc;
    use crm_core::types::SubscriberStatus;
    use serde_json::json;

    fn store() -> InMemorySubscriberStore {
        let mut a = Subscriber::new("b@pizza.example");
        a.tags = Some(vec!["vip".to_string()]);
        a.engagement_score = Some(80.0);
        let mut b = Subscriber::new("a@tacos.example");
        b.status = Some(SubscriberStatus::Unsubscribed);
        InMemorySubscriberStore::with_subscribers([a, b])
    }

    fn compile(query: serde_json::Value, mode: Mode) -> CompiledFilter {
        let query: SegmentQuery = serde_json::from_value(query).unwrap();
        SegmentCompiler::default().compile(&query, mode, Utc::now()).unwrap()
    }

    #[test]
    fn test_row_accessor_columns() {
        let mut sub = Subscriber::new("owner@bistro.example");
        sub.tags = Some(vec!["vip".to_string()]);
        sub.emails_opened = Some(3);
        assert_eq!(sub.value(StorageField::Email), json!("owner@bistro.example"));
        assert_eq!(sub.value(StorageField::TagsJson), json!(r#"["vip"]"#));
        assert_eq!(sub.value(StorageField::Status), json!("active"));
        assert_eq!(sub.value(StorageField::EmailsOpened), json!(3));
        assert_eq!(sub.value(StorageField::Phone), Value::Null);
    }

    #[test]
    fn test_count_and_fetch() {
        let store = store();
        assert_eq!(store.len(), 2);

        let all = compile(json!({ "groups": [] }), Mode::Rows);
        let rows = store.fetch(&all).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].email, "a@tacos.example");

        let active = compile(
            json!({ "conditions": [{ "field": "status", "operator": "equals", "value": "active" }] }),
            Mode::Count,
        );
        assert_eq!(store.count(&active).unwrap(), 1);
    }

    #[test]
    fn test_rejects_misaligned_filter() {
        let filter: CompiledFilter = serde_json::from_value(json!({
            "expression": { "compare": { "field": "email", "op": "eq", "param": 0 } },
            "parameters": [],
            "mode": "count",
            "time_relative": false
        }))
        .unwrap();
        assert!(store().count(&filter).is_err());
    }
}
