//! Shared configuration-document types for the gateway.
//!
//! This crate owns the wire/disk shape of the declarative configuration
//! document (the single source of truth described by the config store) and
//! nothing else: no I/O, no runtime state. Every other crate depends on
//! these types instead of redefining them.

pub mod log;
pub mod model;

pub use log::{RequestLogRecord, RequestLogSink};
pub use model::ModelEntry;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The declarative configuration document: the single source of truth for
/// the gateway, loaded from disk and validated before it is ever published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// Local admission credential. Never forwarded upstream.
    pub api_key: String,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

fn default_model_timeout() -> u64 {
    20
}

fn default_cooldown_period() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_model_timeout")]
    pub model_timeout: u64,
    #[serde(default = "default_cooldown_period")]
    pub cooldown_period: u64,
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            model_timeout: default_model_timeout(),
            cooldown_period: default_cooldown_period(),
            proxy: None,
        }
    }
}

fn default_priority() -> i64 {
    0
}

fn default_enabled() -> bool {
    true
}

fn default_models_endpoint() -> String {
    "/v1/models".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: String,
    pub base_url: String,
    /// Upstream credential. Forwarded but never logged.
    pub api_key: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_models_endpoint")]
    pub models_endpoint: String,
    #[serde(default)]
    pub model: Vec<ModelEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("api_key is required")]
    MissingApiKey,
    #[error("preferences.model_timeout must be > 0")]
    InvalidModelTimeout,
    #[error("provider name must not be empty")]
    EmptyProviderName,
    #[error("duplicate provider name: {0}")]
    DuplicateProvider(String),
    #[error("provider {provider}: base_url is not a valid absolute URL: {source}")]
    InvalidBaseUrl {
        provider: String,
        #[source]
        source: url::ParseError,
    },
    #[error("provider {provider}: api_key is required")]
    MissingProviderApiKey { provider: String },
}

impl ConfigDocument {
    /// Validate the document in place. Validation failures are fatal to the
    /// reload attempt that produced this document, never to the process.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.preferences.model_timeout == 0 {
            return Err(ConfigError::InvalidModelTimeout);
        }

        let mut seen = HashSet::with_capacity(self.providers.len());
        for provider in &self.providers {
            if provider.provider.trim().is_empty() {
                return Err(ConfigError::EmptyProviderName);
            }
            if !seen.insert(provider.provider.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.provider.clone()));
            }
            if provider.api_key.trim().is_empty() {
                return Err(ConfigError::MissingProviderApiKey {
                    provider: provider.provider.clone(),
                });
            }
            url::Url::parse(&provider.base_url).map_err(|source| ConfigError::InvalidBaseUrl {
                provider: provider.provider.clone(),
                source,
            })?;
        }

        Ok(())
    }
}
