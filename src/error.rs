/// Unified error type for the NLQuery service
/// Provides structured error handling with categories for different failure modes
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum NlqError {
    /// Payload errors: malformed request body, empty required fields
    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    /// The target database could not be reached
    #[error("Database connection failed: {message}")]
    ConnectionFailed { message: String },

    /// All generation slots are busy; the caller may retry
    #[error("Engine overloaded: no free generation slot")]
    EngineOverloaded,

    /// The model signalled that the question cannot be answered from this schema
    #[error("Prompt rejected by the model")]
    PromptInvalid,

    /// Requested database provider is not supported
    #[error("Unsupported database provider: {provider}")]
    NotSupportedProvider { provider: String },

    /// The generated SQL failed to execute; carries the SQL for diagnostics
    #[error("Database error: {message}")]
    Db { message: String, sql: String },

    /// Semantic-correction stage returned an unparseable document
    #[error("Semantic correction failed: {message}")]
    SemanticCorrection { message: String },

    /// Internal errors: tokenization failure, generation timeout, bugs
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl NlqError {
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    pub fn not_supported(provider: impl Into<String>) -> Self {
        Self::NotSupportedProvider {
            provider: provider.into(),
        }
    }

    pub fn db(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Db {
            message: message.into(),
            sql: sql.into(),
        }
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::SemanticCorrection {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// SQL text attached to the error, if any
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Db { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Status surfaced to the caller for this error
    pub fn status(&self) -> NlqStatus {
        match self {
            Self::InvalidPayload { .. } => NlqStatus::InvalidPayload,
            Self::ConnectionFailed { .. } => NlqStatus::ConnectionFailed,
            Self::EngineOverloaded => NlqStatus::EngineOverloaded,
            Self::PromptInvalid => NlqStatus::PromptInvalid,
            Self::NotSupportedProvider { .. } => NlqStatus::NotSupportedProvider,
            Self::Db { .. } => NlqStatus::DbError,
            Self::SemanticCorrection { .. } => NlqStatus::SemanticCorrectionError,
            Self::Internal { .. } => NlqStatus::InternalServerError,
        }
    }
}

impl From<std::io::Error> for NlqError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for NlqError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

/// Status taxonomy surfaced to callers in the response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NlqStatus {
    Success,
    InvalidPayload,
    ConnectionFailed,
    EngineOverloaded,
    PromptInvalid,
    InternalServerError,
    NotSupportedProvider,
    DbError,
    TooMuchData,
    SemanticCorrectionError,
}

impl NlqStatus {
    /// Wire code included in every response document
    pub fn code(&self) -> u16 {
        match self {
            Self::Success => 2000,
            Self::InvalidPayload => 2001,
            Self::ConnectionFailed => 2002,
            Self::EngineOverloaded => 2003,
            Self::PromptInvalid => 2004,
            Self::InternalServerError => 2005,
            Self::NotSupportedProvider => 2006,
            Self::DbError => 2007,
            Self::TooMuchData => 2008,
            Self::SemanticCorrectionError => 2009,
        }
    }
}

/// Result type alias for service operations
pub type NlqResult<T> = Result<T, NlqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(NlqError::EngineOverloaded.status(), NlqStatus::EngineOverloaded);
        assert_eq!(
            NlqError::db("relation does not exist", "SELECT 1").status(),
            NlqStatus::DbError
        );
        assert_eq!(NlqError::PromptInvalid.status(), NlqStatus::PromptInvalid);
    }

    #[test]
    fn test_db_error_carries_sql() {
        let err = NlqError::db("boom", "SELECT * FROM dropped");
        assert_eq!(err.sql(), Some("SELECT * FROM dropped"));
        assert_eq!(NlqError::PromptInvalid.sql(), None);
    }

    #[test]
    fn test_status_codes_distinct() {
        let all = [
            NlqStatus::Success,
            NlqStatus::InvalidPayload,
            NlqStatus::ConnectionFailed,
            NlqStatus::EngineOverloaded,
            NlqStatus::PromptInvalid,
            NlqStatus::InternalServerError,
            NlqStatus::NotSupportedProvider,
            NlqStatus::DbError,
            NlqStatus::TooMuchData,
            NlqStatus::SemanticCorrectionError,
        ];
        let mut codes: Vec<u16> = all.iter().map(|s| s.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}
