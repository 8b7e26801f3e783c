/// Failures surfaced by the gradebook engine and its backends.
///
/// `Validation` is raised before any backend call. `Domain` means the backend
/// answered but refused the operation (`success: false`). Everything else is
/// a transport-level problem the caller may retry.
#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Backend rejected {operation}: {}", .errors.join("; "))]
    Domain {
        operation: &'static str,
        errors: Vec<String>,
    },

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Could not decode backend response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GradeError {
    pub fn domain(operation: &'static str, message: impl Into<String>) -> Self {
        GradeError::Domain {
            operation,
            errors: vec![message.into()],
        }
    }

    /// Whether calling the same operation again could succeed without any
    /// change to the input.
    pub fn is_retryable(&self) -> bool {
        match self {
            GradeError::Transport(_) | GradeError::Database(_) => true,
            GradeError::Status { status, .. } => *status >= 500 || *status == 429,
            GradeError::Validation(_)
            | GradeError::Domain { .. }
            | GradeError::Decode(_)
            | GradeError::Config(_) => false,
        }
    }
}
