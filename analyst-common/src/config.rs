//! Configuration management for Analyst services.
//!
//! The gateway reads a single configuration file at `~/.analyst/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! ## Network
//! - `ANALYST_PORT` / `PORT` → network.port
//! - `ANALYST_BIND_ADDRESS` → network.bind
//!
//! ## Auth
//! - `JWT_SECRET` → auth.jwt_secret
//! - `ANALYST_ADMIN_EMAIL` → auth.admin_email
//! - `ANALYST_ADMIN_PASSWORD` → auth.admin_password
//!
//! ## LLM
//! - `AI_KEY` / `GEMINI_API_KEY` / `GOOGLE_API_KEY` → llm.api_key
//! - `ANALYST_LLM_MODEL` → llm.model
//!
//! ## Storage
//! - `ANALYST_DB_PATH` → storage.database_path
//! - `ANALYST_STORAGE_DIR` → storage.documents_dir
//!
//! ## Observability
//! - `ANALYST_LOG_LEVEL` → observability.log_level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".analyst"),
        |dirs| dirs.home_dir().join(".analyst"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Network Configuration
// ============================================================================

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address. Default is `127.0.0.1` (local only).
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

// ============================================================================
// Auth Configuration
// ============================================================================

/// Token signing and bootstrap account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for issuing and verifying tokens.
    ///
    /// When unset, the WebSocket channels refuse every connection and
    /// the HTTP middleware lets requests through unauthenticated.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Token expiry in seconds
    #[serde(default = "default_token_expiry")]
    pub token_expiry_secs: u64,

    /// Email of the account seeded into an empty user table
    #[serde(default)]
    pub admin_email: Option<String>,

    /// Password of the seeded account (seeding is skipped without it)
    #[serde(default)]
    pub admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_expiry_secs: default_token_expiry(),
            admin_email: None,
            admin_password: None,
        }
    }
}

impl AuthConfig {
    /// The configured secret, treating blank strings as absent.
    pub fn secret(&self) -> Option<&str> {
        self.jwt_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

// ============================================================================
// LLM Configuration
// ============================================================================

/// Generation model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (only "gemini" is wired today)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Provider API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Output token ceiling
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: i64,

    /// Upper bound for a single model call, retries included
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds (doubles per retry)
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// System instruction seeded at the start of every chat
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Prompt used to turn a whole transcript into a report.
    /// `{transcript}` is replaced with the conversation.
    #[serde(default = "default_transcript_prompt")]
    pub transcript_prompt: String,

    /// Prompt used to turn a single free-form request into a report.
    /// `{request}` is replaced with the request text.
    #[serde(default = "default_analysis_prompt")]
    pub analysis_prompt: String,

    /// Reply `type` values that mark a structured turn
    #[serde(default = "default_structured_types")]
    pub structured_types: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff(),
            system_prompt: default_system_prompt(),
            transcript_prompt: default_transcript_prompt(),
            analysis_prompt: default_analysis_prompt(),
            structured_types: default_structured_types(),
        }
    }
}

// ============================================================================
// Storage Configuration
// ============================================================================

/// Where rows and generated documents live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory for rendered documents
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            documents_dir: default_documents_dir(),
        }
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets held at `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(k));

        if let Some(port) = first(&["ANALYST_PORT", "PORT"]) {
            match port.parse() {
                Ok(p) => self.network.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring non-numeric port override"),
            }
        }
        if let Some(bind) = lookup("ANALYST_BIND_ADDRESS") {
            self.network.bind = bind;
        }

        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(email) = lookup("ANALYST_ADMIN_EMAIL") {
            self.auth.admin_email = Some(email);
        }
        if let Some(password) = lookup("ANALYST_ADMIN_PASSWORD") {
            self.auth.admin_password = Some(password);
        }

        if let Some(key) = first(&["AI_KEY", "GEMINI_API_KEY", "GOOGLE_API_KEY"]) {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = lookup("ANALYST_LLM_MODEL") {
            self.llm.model = model;
        }

        if let Some(path) = lookup("ANALYST_DB_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("ANALYST_STORAGE_DIR") {
            self.storage.documents_dir = PathBuf::from(dir);
        }

        if let Some(level) = lookup("ANALYST_LOG_LEVEL") {
            self.observability.log_level = level;
        }
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        let path = config_path();
        let dir = config_dir();

        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Socket address string for the listener.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.bind, self.network.port)
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_token_expiry() -> u64 {
    24 * 60 * 60
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_output_tokens() -> i64 {
    8192
}

fn default_request_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_backoff() -> u64 {
    250
}

fn default_database_path() -> PathBuf {
    config_dir().join("analyst.db")
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("storage")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Reply discriminators recognised out of the box.
pub fn default_structured_types() -> Vec<String> {
    vec!["questionnaire".to_string(), "requirements".to_string()]
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_transcript_prompt() -> String {
    DEFAULT_TRANSCRIPT_PROMPT.to_string()
}

fn default_analysis_prompt() -> String {
    DEFAULT_ANALYSIS_PROMPT.to_string()
}

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a business requirements assistant. You collect business requirements through a staged questionnaire and finish with a structured requirements document.

For greetings and general questions answer in plain text and briefly explain what you do.

For a concrete business request switch to requirements mode and answer with exactly one JSON object per reply, no markdown:

{"type":"questionnaire","stage":<1-5>,"title":"...","questions":[{"id":"q1","text":"..."}]}

When enough is known, answer once with:

{"type":"requirements","data":{"project":{"name":"...","description":"..."},"objectives":[],"scope":{"in_scope":[],"out_of_scope":[]},"requirements":[],"stakeholders":[],"constraints":[],"functional_requirements":[],"non_functional_requirements":[],"use_cases":[],"user_stories":[],"process_flows":[],"kpis":[],"style_guides":[]}}

Reply in the language of the user. Never invent requirements the user did not give."#;

const DEFAULT_TRANSCRIPT_PROMPT: &str = r#"Analyze the following conversation transcript between a User and a Business Analyst.
Extract all requirements and produce a Business Analysis Report.
Return ONLY valid JSON (no markdown) with this structure:
{"goal":"...","description":"...","scope":"...","business_rules":[],"kpis":[],"use_cases":[],"user_stories":[],"diagrams_desc":[]}

Transcript:
{transcript}"#;

const DEFAULT_ANALYSIS_PROMPT: &str = r#"You are an expert Business Analyst. Analyze the following user request and produce a Business Analysis Report.
Return ONLY valid JSON (no markdown) with this structure:
{"goal":"SMART goal statement","description":"...","scope":"In/Out of scope","business_rules":[],"kpis":[],"use_cases":[],"user_stories":["As a... I want to... So that..."],"diagrams_desc":[]}

User Request: {request}"#;
