//! Application configuration

pub mod generation;
pub mod prompts;

use std::env;
use std::path::{Path, PathBuf};

pub use generation::{GenerationDefaults, RequestConfig};
pub use prompts::{PromptTemplate, TemplateError};

#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub openai_org_id: Option<String>,
    pub openai_base_url: String,
    pub ollama_url: String,
    pub chat_turns_dir: PathBuf,
}

impl Config {
    /// Load secrets from a dotenv-style file into the environment, then read it.
    ///
    /// A missing file is not an error; variables already set win over the file.
    pub fn from_secrets_file(path: &Path) -> anyhow::Result<Self> {
        match dotenvy::from_path(path) {
            Ok(()) => tracing::debug!("Loaded secrets from {}", path.display()),
            Err(e) if e.not_found() => {
                tracing::debug!("No secrets file at {}, using environment", path.display())
            }
            Err(e) => return Err(e.into()),
        }
        Self::from_env()
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            openai_org_id: non_empty_var("OPENAI_ORG_ID"),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| crate::providers::OPENAI_BASE_URL.into()),
            ollama_url: env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".into()),
            chat_turns_dir: env::var("PARLEY_CHAT_TURNS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./.chat_turns")),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
