//! Segment registry: preview, create and refresh named segments.

use chrono::{DateTime, Utc};
use crm_core::types::Subscriber;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::compiler::{CompiledFilter, Mode, SegmentCompiler};
use crate::error::{SegmentError, SegmentResult};
use crate::query::{Condition, ConditionGroup, LogicalOperator, Operator, SegmentQuery};
use crate::store::SubscriberStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub definition: SegmentDefinition,
    pub subscriber_count: Option<u64>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentDefinition {
    /// Membership computed from a query each time the segment is used.
    Dynamic { query: SegmentQuery },
    /// A fixed list of subscriber email addresses.
    Static { members: Vec<String> },
}

impl SegmentDefinition {
    /// Static segments are expressed as an `email IN (...)` query so both
    /// kinds go through the same compiler.
    pub fn to_query(&self) -> SegmentQuery {
        match self {
            SegmentDefinition::Dynamic { query } => query.clone(),
            SegmentDefinition::Static { members } => SegmentQuery::new(
                LogicalOperator::And,
                vec![ConditionGroup::new(
                    LogicalOperator::And,
                    vec![Condition::new("email", Operator::InList, members.clone())],
                )],
            ),
        }
    }
}

pub struct SegmentationEngine {
    compiler: SegmentCompiler,
    segments: dashmap::DashMap<Uuid, Segment>,
}

impl SegmentationEngine {
    pub fn new(compiler: SegmentCompiler) -> Self {
        Self {
            compiler,
            segments: dashmap::DashMap::new(),
        }
    }

    pub fn compiler(&self) -> &SegmentCompiler {
        &self.compiler
    }

    /// Count the subscribers a query would match, without saving anything.
    pub fn preview(
        &self,
        query: &SegmentQuery,
        store: &dyn SubscriberStore,
        now: DateTime<Utc>,
    ) -> SegmentResult<u64> {
        let filter = self.compiler.compile(query, Mode::Count, now)?;
        store.count(&filter)
    }

    /// Validate and register a segment, recording its initial size.
    pub fn create_segment(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        definition: SegmentDefinition,
        store: &dyn SubscriberStore,
        now: DateTime<Utc>,
    ) -> SegmentResult<Segment> {
        let filter = self.compile(&definition, Mode::Count, now)?;
        let count = store.count(&filter)?;

        let segment = Segment {
            id: Uuid::new_v4(),
            name: name.into(),
            description,
            definition,
            subscriber_count: Some(count),
            last_refreshed_at: Some(now),
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
        };
        info!(segment_id = %segment.id, name = %segment.name, count, "Segment created");
        self.segments.insert(segment.id, segment.clone());
        Ok(segment)
    }

    /// Re-evaluate a segment, store its new size and return its members.
    pub fn refresh_segment(
        &self,
        id: &Uuid,
        store: &dyn SubscriberStore,
        now: DateTime<Utc>,
    ) -> SegmentResult<Vec<Subscriber>> {
        let recipients = self.recipients(id, store, now)?;
        let mut entry = self
            .segments
            .get_mut(id)
            .ok_or(SegmentError::SegmentNotFound(*id))?;
        entry.subscriber_count = Some(recipients.len() as u64);
        entry.last_refreshed_at = Some(now);
        entry.updated_at = now;
        info!(segment_id = %id, count = recipients.len(), "Segment refreshed");
        Ok(recipients)
    }

    /// Current members of a segment, for an email send.
    pub fn recipients(
        &self,
        id: &Uuid,
        store: &dyn SubscriberStore,
        now: DateTime<Utc>,
    ) -> SegmentResult<Vec<Subscriber>> {
        let definition = self
            .segments
            .get(id)
            .map(|s| s.definition.clone())
            .ok_or(SegmentError::SegmentNotFound(*id))?;
        let filter = self.compile(&definition, Mode::Rows, now)?;
        store.fetch(&filter)
    }

    pub fn get_segment(&self, id: &Uuid) -> Option<Segment> {
        self.segments.get(id).map(|s| s.clone())
    }

    /// All segments, newest first.
    pub fn list_segments(&self) -> Vec<Segment> {
        let mut segments: Vec<Segment> = self.segments.iter().map(|s| s.value().clone()).collect();
        segments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        segments
    }

    pub fn delete_segment(&self, id: &Uuid) -> SegmentResult<Segment> {
        self.segments
            .remove(id)
            .map(|(_, s)| s)
            .ok_or(SegmentError::SegmentNotFound(*id))
    }

    fn compile(
        &self,
        definition: &SegmentDefinition,
        mode: Mode,
        now: DateTime<Utc>,
    ) -> SegmentResult<CompiledFilter> {
        self.compiler.compile(&definition.to_query(), mode, now)
    }
}

impl Default for SegmentationEngine {
    fn default() -> Self {
        Self::new(SegmentCompiler::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SegmentQueryBuilder;
    use crate::store::InMemorySubscriberStore;
    use chrono::Duration;

    fn store(now: DateTime<Utc>) -> InMemorySubscriberStore {
        let opened = |email: &str, days_ago: i64| {
            let mut s = Subscriber::new(email);
            s.last_open_at = Some((now - Duration::days(days_ago)).timestamp());
            s
        };
        InMemorySubscriberStore::with_subscribers([
            opened("fresh@cafe.example", 2),
            opened("recent@diner.example", 20),
            opened("stale@grill.example", 90),
        ])
    }

    #[test]
    fn test_preview_does_not_register() {
        let now = Utc::now();
        let engine = SegmentationEngine::default();
        let query = SegmentQueryBuilder::new()
            .group(|g| g.active_within_days(30))
            .build();
        assert_eq!(engine.preview(&query, &store(now), now).unwrap(), 2);
        assert!(engine.list_segments().is_empty());
    }

    #[test]
    fn test_create_and_refresh_dynamic_segment() {
        let now = Utc::now();
        let store = store(now);
        let engine = SegmentationEngine::default();
        let query = SegmentQueryBuilder::new()
            .group(|g| g.active_within_days(7))
            .build();

        let segment = engine
            .create_segment("Engaged this week", None, SegmentDefinition::Dynamic { query }, &store, now)
            .unwrap();
        assert_eq!(segment.subscriber_count, Some(1));

        let mut newcomer = Subscriber::new("new@bakery.example");
        newcomer.last_open_at = Some(now.timestamp());
        store.insert(newcomer);

        let later = now + Duration::hours(1);
        let members = engine.refresh_segment(&segment.id, &store, later).unwrap();
        let emails: Vec<&str> = members.iter().map(|s| s.email.as_str()).collect();
        assert_eq!(emails, vec!["fresh@cafe.example", "new@bakery.example"]);

        let stored = engine.get_segment(&segment.id).unwrap();
        assert_eq!(stored.subscriber_count, Some(2));
        assert_eq!(stored.last_refreshed_at, Some(later));
    }

    #[test]
    fn test_static_segment_members() {
        let now = Utc::now();
        let store = store(now);
        let engine = SegmentationEngine::default();

        let segment = engine
            .create_segment(
                "Hand picked",
                Some("Owners we met at the expo".to_string()),
                SegmentDefinition::Static {
                    members: vec!["stale@grill.example".into(), "nobody@else.example".into()],
                },
                &store,
                now,
            )
            .unwrap();
        assert_eq!(segment.subscriber_count, Some(1));

        let empty = engine
            .create_segment("Empty", None, SegmentDefinition::Static { members: vec![] }, &store, now)
            .unwrap();
        assert_eq!(empty.subscriber_count, Some(0));
        assert_eq!(engine.list_segments().len(), 2);
    }

    #[test]
    fn test_invalid_definition_is_not_registered() {
        let now = Utc::now();
        let engine = SegmentationEngine::default();
        let query: SegmentQuery = serde_json::from_value(serde_json::json!({
            "conditions": [{ "field": "ssn", "operator": "is_not_empty" }]
        }))
        .unwrap();
        let err = engine
            .create_segment("Bad", None, SegmentDefinition::Dynamic { query }, &store(now), now)
            .unwrap_err();
        assert!(err.is_validation());
        assert!(engine.list_segments().is_empty());
    }

    #[test]
    fn test_missing_segment() {
        let now = Utc::now();
        let engine = SegmentationEngine::default();
        let id = Uuid::new_v4();
        assert!(matches!(
            engine.refresh_segment(&id, &store(now), now),
            Err(SegmentError::SegmentNotFound(missing)) if missing == id
        ));
        assert!(engine.delete_segment(&id).is_err());
    }

    #[test]
    fn test_definition_serialization() {
        let def = SegmentDefinition::Static {
            members: vec!["a@b.example".into()],
        };
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "static");
        let back: SegmentDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, def);
    }
}
