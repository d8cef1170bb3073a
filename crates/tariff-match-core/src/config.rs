//! Engine configuration, loaded from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! [thresholds]
//! auto_accept = 0.85
//! review = 0.50
//!
//! [remote]
//! base_url = "https://example.supabase.co/rest/v1"
//! api_key_env = "TARIFF_REMOTE_KEY"
//! tenant = "shop-1"
//!
//! [[rules]]
//! keyword = "лестниц"
//! code = "7616999008"
//! include_tokens = ["лестниц", "стремянк"]
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::resolver::{CategoryFilter, KeywordRule, Lexicon};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MatchConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    /// Replaces the built-in keyword rules when non-empty
    #[serde(default)]
    pub rules: Vec<KeywordRule>,
    /// Replaces the built-in category filters when non-empty
    #[serde(default)]
    pub filters: Vec<CategoryFilter>,
}

/// Score cut-offs of the three-tier policy.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Thresholds {
    /// Scores at or above this are accepted without review
    #[serde(default = "default_auto_accept")]
    pub auto_accept: f64,
    /// Scores at or above this (and below `auto_accept`) need review
    #[serde(default = "default_review")]
    pub review: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto_accept: default_auto_accept(),
            review: default_review(),
        }
    }
}

fn default_auto_accept() -> f64 {
    0.85
}
fn default_review() -> f64 {
    0.50
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct Limits {
    /// Candidates requested from a matcher
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    /// Options returned with a Review result
    #[serde(default = "default_review_options")]
    pub review_options: usize,
    /// Candidates kept per retail sale
    #[serde(default = "default_retail_candidates")]
    pub retail_candidates: usize,
    /// Items per classification assistant call
    #[serde(default = "default_assistant_chunk")]
    pub assistant_chunk: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            candidate_limit: default_candidate_limit(),
            review_options: default_review_options(),
            retail_candidates: default_retail_candidates(),
            assistant_chunk: default_assistant_chunk(),
        }
    }
}

fn default_candidate_limit() -> usize {
    15
}
fn default_review_options() -> usize {
    3
}
fn default_retail_candidates() -> usize {
    5
}
fn default_assistant_chunk() -> usize {
    25
}

/// Hosted catalog service (fuzzy search, verification, shared mappings).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    #[serde(default = "default_remote_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_tenant")]
    pub tenant: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: default_remote_key_env(),
            timeout_secs: default_remote_timeout(),
            tenant: default_tenant(),
        }
    }
}

fn default_remote_key_env() -> String {
    "TARIFF_REMOTE_KEY".into()
}
fn default_remote_timeout() -> u64 {
    15
}
fn default_tenant() -> String {
    "default".into()
}

/// OpenAI-compatible embeddings endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: default_embedding_model(),
            api_key_env: default_openai_key_env(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_batch_size() -> usize {
    50
}
fn default_embedding_timeout() -> u64 {
    30
}

/// OpenAI-compatible chat endpoint used for suggestions and disambiguation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AssistantConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_assistant_model")]
    pub model: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_assistant_timeout")]
    pub timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: default_assistant_model(),
            api_key_env: default_openai_key_env(),
            timeout_secs: default_assistant_timeout(),
        }
    }
}

fn default_assistant_model() -> String {
    "gpt-4o-mini".into()
}
fn default_assistant_timeout() -> u64 {
    120
}

impl MatchConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let Thresholds {
            auto_accept,
            review,
        } = self.thresholds;
        if !(0.0..=1.0).contains(&review)
            || !(0.0..=1.0).contains(&auto_accept)
            || review > auto_accept
        {
            return Err(ConfigError::Invalid(format!(
                "thresholds must satisfy 0 <= review ({}) <= auto_accept ({}) <= 1",
                review, auto_accept
            )));
        }
        if self.limits.candidate_limit == 0 {
            return Err(ConfigError::Invalid("limits.candidate_limit must be > 0".into()));
        }
        if self.limits.assistant_chunk == 0 {
            return Err(ConfigError::Invalid("limits.assistant_chunk must be > 0".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be > 0".into()));
        }
        if let Some(bad) = self
            .rules
            .iter()
            .filter_map(|r| r.code.as_deref())
            .find(|c| !crate::models::is_valid_code(c))
        {
            return Err(ConfigError::Invalid(format!("rule code {} is not a tariff code", bad)));
        }
        Ok(())
    }

    /// Lexicon built from the configured tables, falling back to the defaults.
    pub fn lexicon(&self) -> Lexicon {
        let defaults = Lexicon::default();
        let rules = if self.rules.is_empty() {
            defaults.rules().to_vec()
        } else {
            self.rules.clone()
        };
        let filters = if self.filters.is_empty() {
            defaults.filters().to_vec()
        } else {
            self.filters.clone()
        };
        Lexicon::new(rules, filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = MatchConfig::from_toml_str("").unwrap();
        assert_eq!(config.thresholds.auto_accept, 0.85);
        assert_eq!(config.thresholds.review, 0.50);
        assert_eq!(config.limits.candidate_limit, 15);
        assert_eq!(config.limits.review_options, 3);
        assert_eq!(config.limits.retail_candidates, 5);
        assert_eq!(config.embedding.batch_size, 50);
        assert_eq!(config.assistant.timeout_secs, 120);
        assert_eq!(config.remote.tenant, "default");
        assert_eq!(config.lexicon(), Lexicon::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = MatchConfig::from_toml_str(
            r#"
            [thresholds]
            auto_accept = 0.9

            [remote]
            base_url = "https://catalog.example/rest/v1"
            tenant = "shop-7"
            "#,
        )
        .unwrap();
        assert_eq!(config.thresholds.auto_accept, 0.9);
        assert_eq!(config.thresholds.review, 0.5);
        assert_eq!(
            config.remote.base_url.as_deref(),
            Some("https://catalog.example/rest/v1")
        );
        assert_eq!(config.remote.timeout_secs, 15);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let err = MatchConfig::from_toml_str(
            r#"
            [thresholds]
            auto_accept = 0.4
            review = 0.6
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_custom_rules_replace_defaults() {
        let config = MatchConfig::from_toml_str(
            r#"
            [[rules]]
            keyword = "грунт"
            code = "3209100009"

            [[filters]]
            keywords = ["грунт"]
            code_prefixes = ["32"]
            "#,
        )
        .unwrap();

        let lexicon = config.lexicon();
        assert_eq!(lexicon.rules().len(), 1);
        assert_eq!(lexicon.match_keyword_rule("грунтовка"), Some("3209100009"));
        assert_eq!(lexicon.match_keyword_rule("стремянка"), None);
        assert_eq!(lexicon.filters().len(), 1);
    }

    #[test]
    fn test_bad_rule_code_rejected() {
        let result = MatchConfig::from_toml_str(
            r#"
            [[rules]]
            keyword = "x"
            code = "12"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            MatchConfig::from_toml_str("[thresholds"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tariff.toml");
        std::fs::write(&path, "[limits]\ncandidate_limit = 20\n").unwrap();

        let config = MatchConfig::load(&path).unwrap();
        assert_eq!(config.limits.candidate_limit, 20);
        assert!(MatchConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
