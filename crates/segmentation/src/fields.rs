//! Field resolution: maps user-facing field names onto subscriber columns.
//!
//! Every column a segment may reference is a variant of [`StorageField`].
//! Nothing outside this enum ever reaches rendered SQL as an identifier.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SegmentError, SegmentResult};

/// Subscriber columns that segments are allowed to filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageField {
    Email,
    FirstName,
    LastName,
    Company,
    Phone,
    City,
    State,
    Status,
    Source,
    PosSystem,
    GeoTier,
    TagsJson,
    EngagementScore,
    EmailsSent,
    EmailsOpened,
    EmailsClicked,
    CreatedAt,
    UpdatedAt,
    SubscribedAt,
    LastEmailAt,
    LastOpenAt,
    LastClickAt,
}

/// How a column's values compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    /// Unix seconds.
    Timestamp,
    /// JSON-encoded array of strings.
    TagList,
}

/// Logical names that do not match a column name.
const ALIASES: &[(&str, StorageField)] = &[
    ("geographic_tier", StorageField::GeoTier),
    ("tags", StorageField::TagsJson),
    ("email_domain", StorageField::Email),
];

impl StorageField {
    pub const ALL: [StorageField; 22] = [
        StorageField::Email,
        StorageField::FirstName,
        StorageField::LastName,
        StorageField::Company,
        StorageField::Phone,
        StorageField::City,
        StorageField::State,
        StorageField::Status,
        StorageField::Source,
        StorageField::PosSystem,
        StorageField::GeoTier,
        StorageField::TagsJson,
        StorageField::EngagementScore,
        StorageField::EmailsSent,
        StorageField::EmailsOpened,
        StorageField::EmailsClicked,
        StorageField::CreatedAt,
        StorageField::UpdatedAt,
        StorageField::SubscribedAt,
        StorageField::LastEmailAt,
        StorageField::LastOpenAt,
        StorageField::LastClickAt,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            StorageField::Email => "email",
            StorageField::FirstName => "first_name",
            StorageField::LastName => "last_name",
            StorageField::Company => "company",
            StorageField::Phone => "phone",
            StorageField::City => "city",
            StorageField::State => "state",
            StorageField::Status => "status",
            StorageField::Source => "source",
            StorageField::PosSystem => "pos_system",
            StorageField::GeoTier => "geo_tier",
            StorageField::TagsJson => "tags_json",
            StorageField::EngagementScore => "engagement_score",
            StorageField::EmailsSent => "emails_sent",
            StorageField::EmailsOpened => "emails_opened",
            StorageField::EmailsClicked => "emails_clicked",
            StorageField::CreatedAt => "created_at",
            StorageField::UpdatedAt => "updated_at",
            StorageField::SubscribedAt => "subscribed_at",
            StorageField::LastEmailAt => "last_email_at",
            StorageField::LastOpenAt => "last_open_at",
            StorageField::LastClickAt => "last_click_at",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            StorageField::TagsJson => FieldKind::TagList,
            StorageField::EngagementScore
            | StorageField::EmailsSent
            | StorageField::EmailsOpened
            | StorageField::EmailsClicked => FieldKind::Number,
            StorageField::CreatedAt
            | StorageField::UpdatedAt
            | StorageField::SubscribedAt
            | StorageField::LastEmailAt
            | StorageField::LastOpenAt
            | StorageField::LastClickAt => FieldKind::Timestamp,
            _ => FieldKind::Text,
        }
    }

    fn from_column(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.column() == name)
    }
}

/// A field reference after resolution.
///
/// Keeps the logical name because a few logical fields (`email_domain`)
/// change operator semantics on top of the column they map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedField<'a> {
    pub logical: &'a str,
    pub storage: StorageField,
}

impl ResolvedField<'_> {
    pub fn is_tags(&self) -> bool {
        self.storage.kind() == FieldKind::TagList
    }

    pub fn is_email_domain(&self) -> bool {
        self.logical == "email_domain"
    }
}

/// Resolves logical field names against the alias map and the column
/// allow-list.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldResolver;

impl FieldResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve<'a>(&self, logical: &'a str) -> SegmentResult<ResolvedField<'a>> {
        let storage = ALIASES
            .iter()
            .find(|(alias, _)| *alias == logical)
            .map(|(_, field)| *field)
            .or_else(|| StorageField::from_column(logical));

        match storage {
            Some(storage) => Ok(ResolvedField { logical, storage }),
            None => {
                debug!(field = logical, "Rejected segment field");
                Err(SegmentError::FieldResolution {
                    field: logical.to_string(),
                })
            }
        }
    }

    /// Every accepted logical name with the column it resolves to.
    pub fn known_fields(&self) -> Vec<(&'static str, StorageField)> {
        let mut fields: Vec<(&'static str, StorageField)> = ALIASES.to_vec();
        fields.extend(StorageField::ALL.iter().map(|f| (f.column(), *f)));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        let resolver = FieldResolver::new();
        assert_eq!(
            resolver.resolve("geographic_tier").unwrap().storage,
            StorageField::GeoTier
        );
        assert_eq!(resolver.resolve("tags").unwrap().storage, StorageField::TagsJson);

        let domain = resolver.resolve("email_domain").unwrap();
        assert_eq!(domain.storage, StorageField::Email);
        assert!(domain.is_email_domain());
    }

    #[test]
    fn test_passthrough_columns() {
        let resolver = FieldResolver::new();
        let score = resolver.resolve("engagement_score").unwrap();
        assert_eq!(score.storage, StorageField::EngagementScore);
        assert_eq!(score.storage.kind(), FieldKind::Number);
        assert_eq!(
            resolver.resolve("last_open_at").unwrap().storage.kind(),
            FieldKind::Timestamp
        );
    }

    #[test]
    fn test_rejects_unknown_and_injected_names() {
        let resolver = FieldResolver::new();
        for bad in ["drop_table", "email; DROP TABLE email_subscribers", "EMAIL", "", "tags_json "] {
            match resolver.resolve(bad) {
                Err(SegmentError::FieldResolution { field }) => assert_eq!(field, bad),
                other => panic!("expected FieldResolution for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_known_fields_cover_allow_list() {
        let fields = FieldResolver::new().known_fields();
        assert_eq!(fields.len(), ALIASES.len() + StorageField::ALL.len());
        assert!(fields.iter().any(|(name, _)| *name == "email_domain"));
        assert!(fields.iter().any(|(name, _)| *name == "tags_json"));
    }
}
