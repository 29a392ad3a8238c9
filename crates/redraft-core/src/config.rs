use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, RedraftError};

pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const OLLAMA_API_URL: &str = "http://localhost:11434/v1/chat/completions";

/// Top-level Redraft configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub stages: StageTemperatures,
}

/// Settings for the research workflow and its executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Revise-then-review cycles allowed after the first review.
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,
    /// Case-sensitive substring in a critique that ends the revision loop.
    #[serde(default = "default_approval_marker")]
    pub approval_marker: String,
    /// Per-stage timeout in seconds (0 = no timeout).
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
    /// Hard cap on node visits per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Where `redraft run` saves the Markdown report.
    #[serde(default = "default_output_file")]
    pub output_file: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_revisions: default_max_revisions(),
            approval_marker: default_approval_marker(),
            stage_timeout_secs: default_stage_timeout(),
            max_steps: default_max_steps(),
            output_file: default_output_file(),
        }
    }
}

impl WorkflowConfig {
    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_secs > 0).then(|| Duration::from_secs(self.stage_timeout_secs))
    }
}

fn default_max_revisions() -> u32 { 2 }
fn default_approval_marker() -> String { "APPROVE".to_string() }
fn default_stage_timeout() -> u64 { 120 }
fn default_max_steps() -> usize { 64 }
fn default_output_file() -> String { "research_report.md".to_string() }

/// Sampling temperature for each research stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTemperatures {
    #[serde(default = "default_precise")]
    pub planner: f32,
    #[serde(default = "default_researcher")]
    pub researcher: f32,
    #[serde(default = "default_creative")]
    pub writer: f32,
    #[serde(default = "default_precise")]
    pub reviewer: f32,
    #[serde(default = "default_creative")]
    pub reviser: f32,
}

impl Default for StageTemperatures {
    fn default() -> Self {
        Self {
            planner: default_precise(),
            researcher: default_researcher(),
            writer: default_creative(),
            reviewer: default_precise(),
            reviser: default_creative(),
        }
    }
}

fn default_precise() -> f32 { 0.0 }
fn default_researcher() -> f32 { 0.2 }
fn default_creative() -> f32 { 0.5 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Extra HTTP headers sent with every request (e.g. OpenRouter's `X-Title`).
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

impl ModelConfig {
    /// Copy of this config with a different sampling temperature.
    pub fn with_temperature(&self, temperature: f32) -> Self {
        Self {
            temperature,
            ..self.clone()
        }
    }
}

fn default_provider() -> String { "openrouter".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| RedraftError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| RedraftError::Config(e.to_string()))?;
        debug!(path = %path.display(), model = %config.model.model_id, "Loaded config");
        Ok(config)
    }

    /// Build a minimal config from the environment.
    ///
    /// `OPENAI_API_KEY` selects OpenRouter with DeepSeek Chat; without it the
    /// local Ollama endpoint is used.
    pub fn from_env() -> Self {
        let model = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => ModelConfig {
                provider: default_provider(),
                model_id: "deepseek/deepseek-chat".to_string(),
                api_key: Some(key),
                base_url: Some(OPENROUTER_API_URL.to_string()),
                max_tokens: default_max_tokens(),
                temperature: default_temperature(),
                retry: Some(RetryConfig::default()),
                extra_headers: HashMap::new(),
            },
            Err(_) => ModelConfig {
                provider: "ollama".to_string(),
                model_id: "llama3.2".to_string(),
                api_key: None,
                base_url: Some(OLLAMA_API_URL.to_string()),
                max_tokens: default_max_tokens(),
                temperature: default_temperature(),
                retry: None,
                extra_headers: HashMap::new(),
            },
        };

        Self {
            model,
            fallback_models: vec![],
            workflow: WorkflowConfig::default(),
            stages: StageTemperatures::default(),
        }
    }

    /// Copy with every API key masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for model in std::iter::once(&mut copy.model).chain(copy.fallback_models.iter_mut()) {
            if model.api_key.is_some() {
                model.api_key = Some("***".to_string());
            }
        }
        copy
    }

    /// Default config path under the home directory (`~/.redraft/config.toml`).
    pub fn home_config_path() -> Option<PathBuf> {
        dirs_home().map(|h| h.join(".redraft").join("config.toml"))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    warn!(var = %var_name, "Config references unset environment variable");
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
