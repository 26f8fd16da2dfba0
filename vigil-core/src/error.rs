//! Error types for the Vigil triage core.
//!
//! Uses `thiserror` for public API error types with one enum per domain:
//! model calls (including budget enforcement), the long-term store,
//! memory governance, retrieval, output validation, and configuration.

/// Top-level error type for the Vigil core library.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Governance error: {0}")]
    Governance(#[from] GovernanceError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl VigilError {
    /// Whether this error is a hard-limit budget rejection.
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, VigilError::Model(ModelError::BudgetExceeded { .. }))
    }
}

/// Errors from generative-model backends and the cost governor wrapping them.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for backend {backend}")]
    AuthFailed { backend: String },

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Backend connection failed: {message}")]
    Connection { message: String },

    #[error("Budget exceeded: {reason} (projected ${projected_usd:.4}, limit ${limit_usd:.2})")]
    BudgetExceeded {
        reason: String,
        projected_usd: f64,
        limit_usd: f64,
    },
}

/// Errors from the long-term vector store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Source {origin} is not in the allowlist")]
    PolicyViolation { origin: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Invalid stored record {doc_id}: {message}")]
    Corrupt { doc_id: String, message: String },
}

/// Errors from the memory-write governance ledger.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    #[error("Proposal {proposal_id} not found")]
    NotFound { proposal_id: String },

    #[error("Proposal {proposal_id} is {status}, expected PENDING")]
    InvalidState { proposal_id: String, status: String },

    #[error("Commit failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the retrieval subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Got {documents} documents but {ids} ids")]
    LengthMismatch { documents: usize, ids: usize },

    #[error("Index error: {message}")]
    Index { message: String },
}

/// Errors from validating model output or inbound records.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Malformed JSON: {message}")]
    MalformedJson { message: String },

    #[error("Invalid field '{field}': {reason}")]
    Field { field: String, reason: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration load error: {message}")]
    Load { message: String },
}

impl From<Box<figment::Error>> for ConfigError {
    fn from(err: Box<figment::Error>) -> Self {
        ConfigError::Load {
            message: err.to_string(),
        }
    }
}

/// A type alias for results using the top-level `VigilError`.
pub type Result<T> = std::result::Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_model() {
        let err = VigilError::Model(ModelError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "Model error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_figment_error_becomes_load_error() {
        let err: ConfigError = Box::new(figment::Error::from("missing field `llm`".to_string())).into();
        assert!(matches!(err, ConfigError::Load { ref message } if message.contains("llm")));
    }

    #[test]
    fn test_error_display_policy_violation() {
        let err = StoreError::PolicyViolation {
            origin: "pastebin".into(),
        };
        assert_eq!(err.to_string(), "Source pastebin is not in the allowlist");
    }

    #[test]
    fn test_error_display_budget() {
        let err = ModelError::BudgetExceeded {
            reason: "hard limit reached".into(),
            projected_usd: 51.0,
            limit_usd: 50.0,
        };
        assert_eq!(
            err.to_string(),
            "Budget exceeded: hard limit reached (projected $51.0000, limit $50.00)"
        );
    }

    #[test]
    fn test_error_display_governance() {
        let err = VigilError::Governance(GovernanceError::InvalidState {
            proposal_id: "p-1".into(),
            status: "APPROVED".into(),
        });
        assert_eq!(
            err.to_string(),
            "Governance error: Proposal p-1 is APPROVED, expected PENDING"
        );
    }

    #[test]
    fn test_is_budget_exceeded() {
        let err: VigilError = ModelError::BudgetExceeded {
            reason: "x".into(),
            projected_usd: 1.0,
            limit_usd: 0.5,
        }
        .into();
        assert!(err.is_budget_exceeded());

        let err: VigilError = ModelError::Timeout { timeout_secs: 5 }.into();
        assert!(!err.is_budget_exceeded());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VigilError = io_err.into();
        assert!(matches!(err, VigilError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: VigilError = serde_err.into();
        assert!(matches!(err, VigilError::Serialization(_)));
    }
}
