use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CrmResult;

/// One row of the subscriber relation targeted by email segments.
///
/// Timestamps are Unix seconds, matching how the subscriber table stores
/// them. `tags` is persisted as a JSON-encoded array of strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub status: Option<SubscriberStatus>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub pos_system: Option<String>,
    #[serde(default)]
    pub geo_tier: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub engagement_score: Option<f64>,
    #[serde(default)]
    pub emails_sent: Option<i64>,
    #[serde(default)]
    pub emails_opened: Option<i64>,
    #[serde(default)]
    pub emails_clicked: Option<i64>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub subscribed_at: Option<i64>,
    #[serde(default)]
    pub last_email_at: Option<i64>,
    #[serde(default)]
    pub last_open_at: Option<i64>,
    #[serde(default)]
    pub last_click_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberStatus {
    Active,
    Unsubscribed,
    Bounced,
    Complained,
}

impl SubscriberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriberStatus::Active => "active",
            SubscriberStatus::Unsubscribed => "unsubscribed",
            SubscriberStatus::Bounced => "bounced",
            SubscriberStatus::Complained => "complained",
        }
    }
}

impl Subscriber {
    /// Create a subscriber with only an email address set.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            status: Some(SubscriberStatus::Active),
            ..Default::default()
        }
    }

    /// The `tags` column as stored: a JSON array of strings, or `None`.
    pub fn tags_json(&self) -> Option<String> {
        self.tags
            .as_ref()
            .map(|tags| serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string()))
    }
}

/// Read a subscriber export: a JSON array of rows.
pub fn load_subscribers(path: impl AsRef<Path>) -> CrmResult<Vec<Subscriber>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
