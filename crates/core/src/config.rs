use serde::{Deserialize, Serialize};

use crate::error::CrmResult;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CRM__` and optional TOML config files.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Segment compilation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    /// Reject unrecognized operators instead of compiling them to match-all.
    #[serde(default)]
    pub strict_operators: bool,
    /// Reject malformed operator values instead of compiling them to match-all.
    #[serde(default)]
    pub strict_values: bool,
    /// Subscriber relation the rendered SQL selects from.
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub placeholder: PlaceholderStyle,
}

/// How positional parameters are spelled in rendered SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    /// `?` (SQLite, D1, MySQL)
    #[default]
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Numbered,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_log_json")]
    pub json: bool,
}

// Default functions
fn default_table() -> String {
    "email_subscribers".to_string()
}
fn default_log_filter() -> String {
    "crm_segment=info,crm_segmentation=info".to_string()
}
fn default_log_json() -> bool {
    true
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            strict_operators: false,
            strict_values: false,
            table: default_table(),
            placeholder: PlaceholderStyle::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: default_log_json(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            segmentation: SegmentationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> CrmResult<Self> {
        Self::load_from(None)
    }

    /// Load configuration from an optional TOML file, with environment
    /// variables taking precedence.
    pub fn load_from(path: Option<&str>) -> CrmResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("CRM")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_permissive() {
        let config = AppConfig::default();
        assert!(!config.segmentation.strict_operators);
        assert!(!config.segmentation.strict_values);
        assert_eq!(config.segmentation.table, "email_subscribers");
        assert_eq!(config.segmentation.placeholder, PlaceholderStyle::Question);
        assert!(config.logging.json);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "segmentation": { "strict_operators": true, "placeholder": "numbered" }
        }))
        .unwrap();
        assert!(config.segmentation.strict_operators);
        assert!(!config.segmentation.strict_values);
        assert_eq!(config.segmentation.placeholder, PlaceholderStyle::Numbered);
        assert_eq!(config.segmentation.table, "email_subscribers");
        assert_eq!(config.logging.filter, "crm_segment=info,crm_segmentation=info");
    }

    #[test]
    fn test_string_overrides_from_environment() {
        std::env::set_var("CRM__LOGGING__FILTER", "crm_segment=debug,crm_segmentation=debug");
        std::env::set_var("CRM__SEGMENTATION__TABLE", "subscribers_v2");
        std::env::set_var("CRM__SEGMENTATION__PLACEHOLDER", "numbered");
        std::env::set_var("CRM__SEGMENTATION__STRICT_VALUES", "true");

        let loaded = AppConfig::load();

        for key in [
            "CRM__LOGGING__FILTER",
            "CRM__SEGMENTATION__TABLE",
            "CRM__SEGMENTATION__PLACEHOLDER",
            "CRM__SEGMENTATION__STRICT_VALUES",
        ] {
            std::env::remove_var(key);
        }

        let config = loaded.unwrap();
        assert_eq!(config.logging.filter, "crm_segment=debug,crm_segmentation=debug");
        assert_eq!(config.segmentation.table, "subscribers_v2");
        assert_eq!(config.segmentation.placeholder, PlaceholderStyle::Numbered);
        assert!(config.segmentation.strict_values);
        assert!(!config.segmentation.strict_operators);
    }
}
