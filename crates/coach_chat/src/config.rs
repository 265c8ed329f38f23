//! Session configuration.
//!
//! Loaded from TOML; every section and field has a default so an empty file
//! (or no file at all) yields a working configuration.
//!
//! ```toml
//! [router]
//! threshold = 0.12
//! max_targets = 3
//!
//! [router.weights]
//! analytics = 1.1
//! general = 0.6
//!
//! [lookup]
//! proxy_url = "http://localhost:8787/products"
//!
//! [preferences]
//! locale = "en"
//! style = "concise"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};
use crate::types::{Domain, Locale};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    pub router: RouterConfig,
    pub lookup: LookupConfig,
    pub threads: ThreadConfig,
    pub llm: LlmConfig,
    pub preferences: UserPreferences,
}

impl CoachConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> ChatResult<Self> {
        toml::from_str(content).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ChatResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a file when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> ChatResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Intent router tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Minimum score a domain needs to be considered
    pub threshold: f64,
    /// Per-domain score multipliers; missing domains use 1.0
    pub weights: BTreeMap<Domain, f64>,
    /// Upper bound on targets in multi mode
    pub max_targets: usize,
    /// Confidence reported when falling back to the default domain
    pub default_confidence: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(Domain::Analytics, 1.1);
        weights.insert(Domain::General, 0.6);
        Self {
            threshold: 0.12,
            weights,
            max_targets: 3,
            default_confidence: 0.3,
        }
    }
}

impl RouterConfig {
    pub fn weight(&self, domain: Domain) -> f64 {
        self.weights.get(&domain).copied().unwrap_or(1.0)
    }
}

/// Product database lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Same-origin proxy tried first
    pub proxy_url: Option<String>,
    pub direct_url: String,
    pub page_size: u32,
    pub locale: String,
    /// Per-attempt timeout of each endpoint request
    pub timeout_secs: u64,
    /// Timeout of the generative fallback call
    pub fallback_timeout_secs: u64,
    pub fallback_enabled: bool,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            proxy_url: None,
            direct_url: "https://world.openfoodfacts.org/cgi/search.pl".to_string(),
            page_size: 10,
            locale: "de".to_string(),
            timeout_secs: 8,
            fallback_timeout_secs: 20,
            fallback_enabled: true,
        }
    }
}

/// Thread cache limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// Messages kept per domain thread
    pub max_messages: usize,
    /// Turns of history sent to the generator
    pub history_turns: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            max_messages: 50,
            history_turns: 10,
        }
    }
}

/// Generator settings. Credentials always come from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "openai" or "anthropic"; detected from the environment when unset
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            max_tokens: 2048,
        }
    }
}

/// How the coach should phrase its replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationStyle {
    Concise,
    Detailed,
    Motivational,
}

/// Notification toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPreferences {
    /// Include deviation alerts in agent instructions
    pub deviation_alerts: bool,
    pub reminders: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            deviation_alerts: true,
            reminders: true,
        }
    }
}

/// Per-user preferences, loaded at session start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub locale: Locale,
    pub style: Option<CommunicationStyle>,
    pub notifications: NotificationPreferences,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoachConfig::default();
        assert_eq!(config.router.threshold, 0.12);
        assert_eq!(config.router.weight(Domain::Analytics), 1.1);
        assert_eq!(config.router.weight(Domain::General), 0.6);
        assert_eq!(config.router.weight(Domain::Nutrition), 1.0);
        assert_eq!(config.threads.max_messages, 50);
        assert_eq!(config.threads.history_turns, 10);
        assert!(config.preferences.notifications.deviation_alerts);
    }

    #[test]
    fn test_partial_toml() {
        let config = CoachConfig::from_toml_str(
            r#"
            [router]
            threshold = 0.2

            [router.weights]
            training = 1.3

            [preferences]
            locale = "en"
            style = "motivational"

            [preferences.notifications]
            deviation_alerts = false
            "#,
        )
        .unwrap();

        assert_eq!(config.router.threshold, 0.2);
        assert_eq!(config.router.weight(Domain::Training), 1.3);
        // A weights table replaces the default table
        assert_eq!(config.router.weight(Domain::Analytics), 1.0);
        assert_eq!(config.router.max_targets, 3);
        assert_eq!(config.preferences.locale, Locale::En);
        assert_eq!(config.preferences.style, Some(CommunicationStyle::Motivational));
        assert!(!config.preferences.notifications.deviation_alerts);
        assert!(config.preferences.notifications.reminders);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = CoachConfig::from_toml_str("router = 5").unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }
}
