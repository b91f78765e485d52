//! Configuration loading, validation, and management for Chorus.
//!
//! Loads configuration from `~/.chorus/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use chorus_core::WireDialect;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The absolute ceiling on agent loop steps, whatever the configuration says.
pub const MAX_STEPS_CEILING: u32 = 25;

/// The root configuration structure.
///
/// Maps directly to `~/.chorus/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model backend URL; its shape decides the wire dialect
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub default_model: String,

    /// Base system prompt shared by personas without their own
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Stream responses chunk by chunk
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Extended thinking budget (Messages dialect only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub admission: AdmissionConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub compaction: CompactionConfig,

    #[serde(default)]
    pub local_server: LocalServerConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub personas: Vec<PersonaConfig>,
}

fn default_endpoint() -> String {
    "http://localhost:1234/v1/chat/completions".into()
}
fn default_model() -> String {
    "local-model".into()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_request_timeout() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("default_model", &self.default_model)
            .field("system_prompt", &self.system_prompt)
            .field("max_tokens", &self.max_tokens)
            .field("stream", &self.stream)
            .field("thinking_budget", &self.thinking_budget)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("admission", &self.admission)
            .field("agent", &self.agent)
            .field("compaction", &self.compaction)
            .field("local_server", &self.local_server)
            .field("tools", &self.tools)
            .field("memory", &self.memory)
            .field("personas", &self.personas)
            .finish()
    }
}

/// Global call admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Calls allowed in flight across all personas
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_calls: usize,
}

fn default_max_concurrent() -> usize {
    1
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Tool round-trips per loop run (capped at [`MAX_STEPS_CEILING`])
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Wall-clock limit on one thinking period before an abort is requested
    #[serde(default = "default_thinking_timeout")]
    pub thinking_timeout_secs: u64,

    /// Tools never offered to isolated calls
    #[serde(default = "default_publishing_tools")]
    pub publishing_tools: Vec<String>,

    /// Minutes between scheduled check-ins; 0 disables them
    #[serde(default)]
    pub checkin_interval_minutes: u64,

    #[serde(default = "default_checkin_prompt")]
    pub checkin_prompt: String,
}

fn default_max_steps() -> u32 {
    10
}
fn default_thinking_timeout() -> u64 {
    300
}
fn default_publishing_tools() -> Vec<String> {
    vec!["post_message".into(), "publish".into()]
}
fn default_checkin_prompt() -> String {
    "Scheduled check-in. Review anything pending and note what matters.".into()
}

impl AgentConfig {
    /// The step cap actually enforced.
    pub fn effective_max_steps(&self) -> u32 {
        self.max_steps.min(MAX_STEPS_CEILING)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            thinking_timeout_secs: default_thinking_timeout(),
            publishing_tools: default_publishing_tools(),
            checkin_interval_minutes: 0,
            checkin_prompt: default_checkin_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Fraction of the context window that triggers compaction
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Entry count that triggers compaction before any real token count exists
    #[serde(default = "default_message_threshold")]
    pub message_threshold: usize,

    /// Window used when the model list did not report one
    #[serde(default = "default_context_window")]
    pub default_context_window: u32,

    /// Instruction sent to the model before the conversation is cleared
    #[serde(default = "default_compaction_prompt")]
    pub prompt: String,
}

fn default_threshold() -> f64 {
    0.8
}
fn default_message_threshold() -> usize {
    40
}
fn default_context_window() -> u32 {
    8192
}
fn default_compaction_prompt() -> String {
    "Your context is almost full. Summarize what you need to remember from this \
     conversation and save it with the save_memory tool. Reply with the summary."
        .into()
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            message_threshold: default_message_threshold(),
            default_context_window: default_context_window(),
            prompt: default_compaction_prompt(),
        }
    }
}

/// Settings for stateful local servers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalServerConfig {
    /// Opaque server-side tool integration descriptors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub integrations: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Local tool-execution RPC endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "file" or "in_memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// JSON-lines file for the file backend (defaults under the config dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_memory_backend() -> String {
    "file".into()
}

impl MemoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("memories.jsonl"))
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
        }
    }
}

/// One persona; unset fields fall back to the top-level values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// A persona with every fallback applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPersona {
    pub name: String,
    pub system_prompt: String,
    pub model: String,
    pub endpoint: String,
}

impl AppConfig {
    /// Load configuration from the default path (~/.chorus/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CHORUS_ENDPOINT`, `CHORUS_MODEL`
    /// - `CHORUS_API_KEY` (highest priority), then `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("CHORUS_ENDPOINT") {
            self.endpoint = endpoint;
        }

        if let Ok(model) = std::env::var("CHORUS_MODEL") {
            self.default_model = model;
        }

        if let Ok(key) = std::env::var("CHORUS_API_KEY") {
            self.api_key = Some(key);
        } else if self.api_key.is_none() {
            self.api_key = std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chorus")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.compaction.threshold > 0.0 && self.compaction.threshold <= 1.0) {
            return Err(ConfigError::ValidationError(
                "compaction.threshold must be in (0, 1]".into(),
            ));
        }

        if self.admission.max_concurrent_calls == 0 {
            return Err(ConfigError::ValidationError(
                "admission.max_concurrent_calls must be at least 1".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.agent.max_steps > MAX_STEPS_CEILING {
            tracing::warn!(
                max_steps = self.agent.max_steps,
                ceiling = MAX_STEPS_CEILING,
                "agent.max_steps exceeds the ceiling and will be capped"
            );
        }

        let mut seen = HashSet::new();
        for persona in &self.personas {
            if persona.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "persona names must not be empty".into(),
                ));
            }
            if !seen.insert(persona.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate persona name: {}",
                    persona.name
                )));
            }
        }

        match self.memory.backend.as_str() {
            "file" | "in_memory" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "unknown memory backend: {other}"
            ))),
        }
    }

    /// The dialect the top-level endpoint speaks.
    pub fn dialect(&self) -> WireDialect {
        WireDialect::detect(&self.endpoint)
    }

    /// Personas with fallbacks applied. With none configured, a single
    /// "assistant" persona uses the top-level settings.
    pub fn resolved_personas(&self) -> Vec<ResolvedPersona> {
        if self.personas.is_empty() {
            return vec![ResolvedPersona {
                name: "assistant".into(),
                system_prompt: self.system_prompt.clone(),
                model: self.default_model.clone(),
                endpoint: self.endpoint.clone(),
            }];
        }

        self.personas
            .iter()
            .map(|p| ResolvedPersona {
                name: p.name.clone(),
                system_prompt: p
                    .system_prompt
                    .clone()
                    .unwrap_or_else(|| self.system_prompt.clone()),
                model: p.model.clone().unwrap_or_else(|| self.default_model.clone()),
                endpoint: p.endpoint.clone().unwrap_or_else(|| self.endpoint.clone()),
            })
            .collect()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            default_model: default_model(),
            system_prompt: default_system_prompt(),
            max_tokens: default_max_tokens(),
            stream: true,
            thinking_budget: None,
            request_timeout_secs: default_request_timeout(),
            admission: AdmissionConfig::default(),
            agent: AgentConfig::default(),
            compaction: CompactionConfig::default(),
            local_server: LocalServerConfig::default(),
            tools: ToolsConfig::default(),
            memory: MemoryConfig::default(),
            personas: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.admission.max_concurrent_calls, 1);
        assert_eq!(config.agent.max_steps, 10);
        assert_eq!(config.compaction.default_context_window, 8192);
        assert_eq!(config.dialect(), WireDialect::ChatCompletions);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.endpoint, config.endpoint);
        assert_eq!(parsed.compaction.threshold, config.compaction.threshold);
    }

    #[test]
    fn invalid_threshold_rejected() {
        let mut config = AppConfig::default();
        config.compaction.threshold = 0.0;
        assert!(config.validate().is_err());
        config.compaction.threshold = 1.5;
        assert!(config.validate().is_err());
        config.compaction.threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_slots_rejected() {
        let mut config = AppConfig::default();
        config.admission.max_concurrent_calls = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn step_cap_is_hard_capped() {
        let mut config = AppConfig::default();
        config.agent.max_steps = 100;
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.effective_max_steps(), MAX_STEPS_CEILING);
    }

    #[test]
    fn duplicate_personas_rejected() {
        let toml_str = r#"
[[personas]]
name = "ada"

[[personas]]
name = "ada"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.default_model, "local-model");
    }

    #[test]
    fn load_from_file_with_personas() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
endpoint = "https://api.anthropic.com/v1/messages"
default_model = "claude-sonnet-4"

[agent]
max_steps = 4

[[personas]]
name = "ada"
system_prompt = "You are Ada."

[[personas]]
name = "bob"
endpoint = "http://127.0.0.1:1234/api/v1/chat"
model = "qwen3-8b"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.dialect(), WireDialect::Messages);
        assert_eq!(config.agent.max_steps, 4);

        let personas = config.resolved_personas();
        assert_eq!(personas.len(), 2);
        assert_eq!(personas[0].system_prompt, "You are Ada.");
        assert_eq!(personas[0].model, "claude-sonnet-4");
        assert_eq!(personas[1].model, "qwen3-8b");
        assert_eq!(
            WireDialect::detect(&personas[1].endpoint),
            WireDialect::StatefulLocal
        );
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "endpoint = [unclosed").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn default_persona_when_none_configured() {
        let personas = AppConfig::default().resolved_personas();
        assert_eq!(personas.len(), 1);
        assert_eq!(personas[0].name, "assistant");
    }

    #[test]
    fn api_key_redacted_in_debug() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("endpoint"));
        assert!(toml_str.contains("[compaction]"));
    }
}
