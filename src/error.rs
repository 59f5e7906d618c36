use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Domain failure kinds. Backends translate their native errors into one of
/// these at the repository boundary; nothing above the repository inspects
/// `sqlx` or `mongodb` error types.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    #[error("validation failed for field '{field}': {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("{0}")]
    Forbidden(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid token")]
    InvalidToken,

    #[error("invalid password")]
    InvalidPassword,

    #[error("{context}")]
    Storage {
        context: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("operation cancelled: {0}")]
    Cancelled(&'static str),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn storage(context: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Storage {
            context,
            source: source.into(),
        }
    }

    /// Stable machine-readable code for the kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::Unauthorized => "UNAUTHORIZED",
            Error::InvalidToken => "INVALID_TOKEN",
            Error::InvalidPassword => "INVALID_PASSWORD",
            Error::Storage { .. } => "DATABASE_ERROR",
            Error::Cancelled(_) => "CANCELLED",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Diagnostic detail that may accompany the stable code.
    pub fn details(&self) -> Option<String> {
        match self {
            Error::Validation { field, .. } => Some(format!("field={field}")),
            Error::Storage { source, .. } => Some(source.to_string()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
