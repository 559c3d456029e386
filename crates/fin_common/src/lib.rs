//! Common types and errors for FinSync
//!
//! This crate provides the error taxonomy, the domain model and the money
//! helpers shared by every FinSync component.

pub mod model;
pub mod money;
pub mod sanitizer;
pub mod telemetry;

pub use model::*;

use thiserror::Error;

/// Core error types for FinSync operations
#[derive(Error, Debug)]
pub enum FinError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Domain(DomainError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Local storage error: {0}")]
    Storage(String),

    #[error("Local storage is full")]
    StorageFull,

    #[error("Protected transaction: {0}")]
    ProtectedTransaction(String),

    #[error("Transaction {0} is part of a series; choose a scope: current, current-and-remaining or all")]
    ScopeRequired(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Sync engine is not running")]
    SyncUnavailable,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl FinError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        FinError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Only transport-level connectivity failures fall back to the offline queue.
    pub fn is_retryable_offline(&self) -> bool {
        matches!(self, FinError::Network(_))
    }

    /// Message suitable for a user-facing notice.
    pub fn friendly_message(&self) -> String {
        match self {
            FinError::Domain(domain) => domain.friendly_message(),
            FinError::Validation { field, message } => format!("{}: {}", field, message),
            FinError::NotFound(what) => format!("Registro não encontrado: {}", what),
            FinError::Conflict(what) => format!("Conflito ao salvar: {}", what),
            FinError::ScopeRequired(_) => {
                "Esta transação faz parte de uma série. Escolha o escopo: current, current-and-remaining ou all."
                    .to_string()
            }
            FinError::StorageFull | FinError::Storage(_) => {
                "Não foi possível salvar localmente. Libere espaço e tente novamente.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Business-rule failures reported by the server-side functions.
///
/// The server encodes them as `CODE|key=value|key=value`; amounts are cents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    CreditLimitExceeded { limit: i64, used: i64, requested: i64 },
    InsufficientFunds { available: i64, requested: i64 },
    Other { code: String, message: String },
}

impl DomainError {
    pub fn parse(code: Option<&str>, message: &str) -> Self {
        let mut parts = message.split('|');
        let head = parts.next().unwrap_or_default().trim();
        let fields: std::collections::HashMap<&str, i64> = parts
            .filter_map(|p| p.split_once('='))
            .filter_map(|(k, v)| v.trim().parse::<i64>().ok().map(|v| (k.trim(), v)))
            .collect();
        let get = |k: &str| fields.get(k).copied();

        match head {
            "CREDIT_LIMIT_EXCEEDED" => match (get("limit"), get("used"), get("requested")) {
                (Some(limit), Some(used), Some(requested)) => {
                    DomainError::CreditLimitExceeded { limit, used, requested }
                }
                _ => DomainError::other(code, message),
            },
            "INSUFFICIENT_FUNDS" => match (get("available"), get("requested")) {
                (Some(available), Some(requested)) => {
                    DomainError::InsufficientFunds { available, requested }
                }
                _ => DomainError::other(code, message),
            },
            _ => DomainError::other(code, message),
        }
    }

    fn other(code: Option<&str>, message: &str) -> Self {
        DomainError::Other {
            code: code.unwrap_or("unknown").to_string(),
            message: message.to_string(),
        }
    }

    pub fn friendly_message(&self) -> String {
        use money::format_brl;
        match self {
            DomainError::CreditLimitExceeded { limit, used, requested } => format!(
                "Limite de crédito excedido. Disponível: {} de {}. Valor solicitado: {}",
                format_brl(limit - used),
                format_brl(*limit),
                format_brl(*requested)
            ),
            DomainError::InsufficientFunds { available, requested } => format!(
                "Saldo insuficiente. Disponível: {}. Valor solicitado: {}",
                format_brl(*available),
                format_brl(*requested)
            ),
            DomainError::Other { message, .. } => message.clone(),
        }
    }
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainError::Other { code, message } => write!(f, "{} ({})", message, code),
            other => f.write_str(&other.friendly_message()),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FinError>;

/// Exit code constants for the CLI
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_CONFIG_ERROR: i32 = 101;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credit_limit() {
        let err = DomainError::parse(
            Some("P0001"),
            "CREDIT_LIMIT_EXCEEDED|limit=500000|used=450000|requested=80000",
        );
        assert_eq!(
            err,
            DomainError::CreditLimitExceeded {
                limit: 500_000,
                used: 450_000,
                requested: 80_000
            }
        );
        let msg = err.friendly_message();
        assert!(msg.contains("R$ 500,00"));
        assert!(msg.contains("R$ 5.000,00"));
        assert!(msg.contains("R$ 800,00"));
    }

    #[test]
    fn test_parse_unstructured_falls_back() {
        let err = DomainError::parse(None, "network of accounts is inconsistent");
        assert!(matches!(err, DomainError::Other { .. }));
    }

    #[test]
    fn test_domain_error_mentioning_network_is_not_retryable() {
        let err = FinError::Domain(DomainError::parse(None, "network of accounts is inconsistent"));
        assert!(!err.is_retryable_offline());
        assert!(FinError::Network("Failed to fetch".into()).is_retryable_offline());
    }
}
