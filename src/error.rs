/// Error Handling Module
///
/// Every credential flow returns `Result<_, AuthError>`. Callers match on the
/// variant; the HTTP status mapping lives here so the transport layer only has
/// to hand the error to actix-web.
///
/// Storage failures are carried inside `AuthError::Internal` but never rendered:
/// the response body only ever says "internal error".

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;

use crate::auth::PasswordViolation;

// ============================================================================
// COLLABORATOR ERRORS
// ============================================================================

/// Errors reported by the storage collaborators
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("missing required config: {0}")]
    MissingRequired(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

// ============================================================================
// DOMAIN ERROR TAXONOMY
// ============================================================================

/// Outcome of a failed credential flow
#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong email or wrong password. The two are deliberately indistinguishable.
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is locked. Try again in {minutes_remaining} minute(s)")]
    AccountLocked { minutes_remaining: i64 },

    #[error("Account is inactive")]
    AccountInactive,

    #[error("Email is already registered")]
    EmailAlreadyRegistered,

    #[error("Email address has invalid format")]
    InvalidEmail,

    #[error("Password does not meet requirements")]
    WeakPassword(Vec<PasswordViolation>),

    #[error("Password was used recently")]
    PasswordReused,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token has been revoked")]
    TokenRevoked,

    /// Only produced by lookups by id, never by email-addressed flows.
    #[error("User not found")]
    UserNotFound,

    #[error("internal error")]
    Internal(#[source] StoreError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Storage operation failed");
        AuthError::Internal(err)
    }
}

impl AuthError {
    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::AccountLocked { .. } => "ACCOUNT_LOCKED",
            AuthError::AccountInactive => "ACCOUNT_INACTIVE",
            AuthError::EmailAlreadyRegistered => "EMAIL_ALREADY_REGISTERED",
            AuthError::InvalidEmail => "VALIDATION_ERROR",
            AuthError::WeakPassword(_) => "WEAK_PASSWORD",
            AuthError::PasswordReused => "PASSWORD_REUSED",
            AuthError::TokenInvalid => "TOKEN_INVALID",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenRevoked => "TOKEN_REVOKED",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AuthError::Internal(source) => {
                tracing::error!(
                    request_id = request_id,
                    error = %source,
                    "Internal error during credential flow"
                );
            }
            AuthError::InvalidCredentials => {
                tracing::warn!(
                    request_id = request_id,
                    error = %self,
                    "Invalid credentials attempt"
                );
            }
            _ => {
                tracing::warn!(
                    request_id = request_id,
                    error = %self,
                    code = self.code(),
                    "Authentication error"
                );
            }
        }
    }
}

// ============================================================================
// HTTP RESPONSE MAPPING
// ============================================================================

/// Error response body
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID for correlating with logs
    pub error_id: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    /// HTTP status code
    pub status: u16,
    /// Timestamp when error occurred
    pub timestamp: String,
    /// Itemised reasons, e.g. every violated password rule
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::TokenInvalid
            | AuthError::TokenExpired
            | AuthError::TokenRevoked => StatusCode::UNAUTHORIZED,
            AuthError::AccountLocked { .. } => StatusCode::LOCKED,
            AuthError::AccountInactive => StatusCode::FORBIDDEN,
            AuthError::EmailAlreadyRegistered => StatusCode::CONFLICT,
            AuthError::InvalidEmail | AuthError::WeakPassword(_) | AuthError::PasswordReused => {
                StatusCode::BAD_REQUEST
            }
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let status = self.status_code();
        let details = match self {
            AuthError::WeakPassword(violations) => {
                violations.iter().map(ToString::to_string).collect()
            }
            _ => Vec::new(),
        };

        let body = ErrorResponse::new(
            request_id,
            self.to_string(),
            self.code().to_string(),
            status.as_u16(),
        )
        .with_details(details);

        HttpResponse::build(status).json(body)
    }
}
