//! Configuration system for Vigil.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/vigil/config.toml` and/or `.vigil/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for Vigil.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    pub llm: LlmConfig,
    pub budget: BudgetConfig,
    pub anomaly: AnomalyConfig,
    pub retrieval: RetrievalConfig,
    pub verification: VerificationConfig,
    pub memory: MemoryConfig,
    pub pipeline: PipelineConfig,
    pub session: SessionConfig,
}

/// Which generative-model backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Deterministic canned responses, for tests and dry runs.
    Stub,
    /// A local Ollama server.
    Local,
    /// An OpenAI-compatible HTTP API.
    Remote,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Stub => write!(f, "stub"),
            BackendKind::Local => write!(f, "local"),
            BackendKind::Remote => write!(f, "remote"),
        }
    }
}

/// Generative-model backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Backend variant: "stub", "local", "remote".
    pub backend: BackendKind,
    /// Model identifier passed to the backend.
    pub model: String,
    /// Optional base URL override for the backend endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable name containing the API key (remote only).
    pub api_key_env: String,
    /// Maximum tokens to generate for analyst and planner calls.
    pub max_tokens: usize,
    /// Sampling temperature for analyst and planner calls.
    pub temperature: f32,
    /// HTTP request timeout.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Stub,
            model: "llama3".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 200,
            temperature: 0.7,
            request_timeout_secs: 60,
        }
    }
}

/// Spend limits for model calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Spend above which calls are allowed with a warning (USD).
    pub soft_limit_usd: f64,
    /// Spend above which calls are rejected (USD).
    pub hard_limit_usd: f64,
    /// Flat rate applied to total tokens (USD per 1000 tokens).
    pub cost_per_1k_tokens: f64,
    /// SQLite path for the token usage ledger. In-memory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            soft_limit_usd: 10.0,
            hard_limit_usd: 50.0,
            cost_per_1k_tokens: 0.002,
            ledger_path: None,
        }
    }
}

/// Token-usage anomaly detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub window_size: usize,
    pub min_samples: usize,
    pub z_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            min_samples: 10,
            z_threshold: 3.0,
        }
    }
}

/// Hybrid retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Rank offset in the reciprocal rank fusion formula.
    pub rrf_k: f64,
    /// Dimensionality of the embedding vectors.
    pub vector_dimensions: usize,
    /// SQLite path for the long-term vector store. In-memory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            vector_dimensions: 128,
            store_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Minimum support score below which Layer B notes a weakly grounded plan.
    pub groundedness_threshold: f32,
    /// Additional case-insensitive regexes that Layer A treats as violations.
    #[serde(default)]
    pub extra_deny_patterns: Vec<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            groundedness_threshold: 0.5,
            extra_deny_patterns: Vec::new(),
        }
    }
}

/// Long-term memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Document sources the long-term store accepts.
    pub allowed_sources: Vec<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            allowed_sources: vec![
                "playbook-ssh".to_string(),
                "playbook-phishing".to_string(),
                "policy-access-control".to_string(),
            ],
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Context items requested from retrieval.
    pub retrieval_k: usize,
    /// Extra PLAN attempts after a parse failure (0 = no retry).
    pub max_plan_retries: u32,
    /// Deadline for each model-backed stage (0 = disabled).
    pub stage_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retrieval_k: 3,
            max_plan_retries: 0,
            stage_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

impl VigilConfig {
    /// Check the configuration for suspicious values.
    ///
    /// Returns human-readable warnings; an empty list means nothing looked off.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.budget.soft_limit_usd > self.budget.hard_limit_usd {
            warnings.push(format!(
                "budget.soft_limit_usd ({}) exceeds budget.hard_limit_usd ({})",
                self.budget.soft_limit_usd, self.budget.hard_limit_usd
            ));
        }
        if self.budget.cost_per_1k_tokens < 0.0 {
            warnings.push("budget.cost_per_1k_tokens is negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.verification.groundedness_threshold) {
            warnings.push(format!(
                "verification.groundedness_threshold ({}) is outside [0, 1]",
                self.verification.groundedness_threshold
            ));
        }
        if self.anomaly.min_samples > self.anomaly.window_size {
            warnings.push(format!(
                "anomaly.min_samples ({}) exceeds anomaly.window_size ({}); no call will ever be flagged",
                self.anomaly.min_samples, self.anomaly.window_size
            ));
        }
        if self.retrieval.vector_dimensions == 0 {
            warnings.push("retrieval.vector_dimensions must be positive".to_string());
        }
        if self.pipeline.retrieval_k == 0 {
            warnings.push("pipeline.retrieval_k is 0; plans will be ungrounded".to_string());
        }
        if self.memory.allowed_sources.is_empty() {
            warnings.push("memory.allowed_sources is empty; every commit will be rejected".to_string());
        }
        if self.llm.backend == BackendKind::Remote && std::env::var(&self.llm.api_key_env).is_err()
        {
            warnings.push(format!(
                "llm.backend is remote but {} is not set",
                self.llm.api_key_env
            ));
        }

        warnings
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "vigil", "vigil")
}

/// Path of the user-level configuration file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("config.toml"))
}

/// Directory for rolling log files.
pub fn log_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Load configuration by merging layers (highest priority last):
/// 1. Built-in defaults
/// 2. User config (`~/.config/vigil/config.toml`)
/// 3. Workspace-local config (`.vigil/config.toml`)
/// 4. Environment variables (prefixed with `VIGIL_`)
/// 5. Explicit overrides (passed as argument)
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&VigilConfig>,
) -> Result<VigilConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(VigilConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".vigil").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // VIGIL_BUDGET__HARD_LIMIT_USD, VIGIL_LLM__BACKEND, etc.
    figment = figment.merge(Env::prefixed("VIGIL_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
