//! Generation parameters sent with every completion request
//!
//! Defaults are compiled in and may be overridden from a TOML file:
//!
//! ```toml
//! [generation]
//! model = "gpt-3.5-turbo-instruct"   # optional, defaults per provider
//! temperature = 0.9
//! max_tokens = 80
//!
//! [generation.logit_bias]
//! "198" = -100
//! ```
//!
//! The stop list is never read from the file. It is always derived from the
//! participant names so the model stops before speaking for either side.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Token id of "\n" in the GPT-3 vocabulary
const NEWLINE_TOKEN: &str = "198";

/// Completion model used when nothing else names one
pub const DEFAULT_MODEL: &str = "text-davinci-002";

/// Static generation defaults, before any participant is known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationDefaults {
    /// Unset means the provider's default model
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Token id -> bias, as the completions API expects
    #[serde(default = "default_logit_bias")]
    pub logit_bias: BTreeMap<String, i32>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    50
}

fn default_logit_bias() -> BTreeMap<String, i32> {
    // Keep the model from emitting a newline
    BTreeMap::from([(NEWLINE_TOKEN.to_string(), -100)])
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            logit_bias: default_logit_bias(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerationFile {
    #[serde(default)]
    generation: GenerationDefaults,
}

impl GenerationDefaults {
    /// Load overrides from a TOML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, GenerationError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load overrides from a TOML string
    pub fn from_str(content: &str) -> Result<Self, GenerationError> {
        let file: GenerationFile = toml::from_str(content)?;
        file.generation.validate()?;
        Ok(file.generation)
    }

    /// Fill in `model` unless one is already set
    pub fn or_model(mut self, model: &str) -> Self {
        if self.model.is_none() {
            self.model = Some(model.to_string());
        }
        self
    }

    fn validate(&self) -> Result<(), GenerationError> {
        if self.model.as_deref().map_or(false, |m| m.trim().is_empty()) {
            return Err(GenerationError::Validation("model must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(GenerationError::Validation(format!(
                "temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(GenerationError::Validation("max_tokens must be positive".into()));
        }
        Ok(())
    }
}

/// Per-session request parameters: the defaults plus the derived stop list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub logit_bias: BTreeMap<String, i32>,
    pub stop: Vec<String>,
}

impl RequestConfig {
    pub fn for_participants(defaults: &GenerationDefaults, user_name: &str, agent_name: &str) -> Self {
        Self {
            model: defaults.model.as_deref().unwrap_or(DEFAULT_MODEL).to_string(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            logit_bias: defaults.logit_bias.clone(),
            stop: vec![
                "\n".to_string(),
                format!("{}:", user_name),
                format!("{}:", agent_name),
            ],
        }
    }
}

/// Errors from loading generation overrides
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
