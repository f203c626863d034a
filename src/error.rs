use serde::Serialize;
use thiserror::Error;

/// Error message constants shared between validation sites and tests.
pub mod msg {
    pub const EMAIL_EMPTY: &str = "Email cannot be empty";
    pub const INVALID_EMAIL_FORMAT: &str = "Invalid email format";
    pub const UNKNOWN_PLAN: &str = "Unknown plan (expected monthly, yearly or lifetime)";
    pub const INVALID_DURATION: &str = "Duration must be between 1 and 36500 days";
    pub const INVALID_DEVICE_LIMIT: &str = "Device limit is out of range";
    pub const DEVICE_LIMIT_BELOW_USAGE: &str =
        "Device limit is below the number of devices bound to the license";
    pub const INVALID_EXTENSION: &str = "Extension must be between 1 and 36500 days";
    pub const INVALID_LICENSE_ID: &str = "Malformed license id";
    pub const DEVICE_ID_EMPTY: &str = "Device id cannot be empty";
    pub const LICENSE_NOT_FOUND: &str = "License not found";
    pub const LICENSE_REVOKED: &str = "License is revoked; restore it first";
    pub const DEVICE_NOT_FOUND: &str = "Device not found";
    pub const DEVICE_NOT_FOUND_OR_INACTIVE: &str = "Device not found or inactive";
    /// Shown to external callers for both unknown codes and email mismatches.
    pub const INVALID_CREDENTIALS: &str = "Activation code or email is invalid";
    pub const LICENSE_EXPIRED: &str = "License has expired";
    pub const DEVICE_SUSPENDED: &str = "Device is suspended; ask an administrator to restore it";
    pub const QUOTA_EXCEEDED: &str = "Device limit reached; cancel a device first";
}

/// Coarse classification of every failure the authority can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller supplied bad input; nothing was written.
    Validation,
    NotFound,
    /// Request conflicts with current state (quota, suspension, identity).
    Conflict,
    /// Connection or transaction failure; the operation was rolled back.
    Store,
}

/// Why a `verify_and_activate` call was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum VerifyFailure {
    #[error("activation code not found or license inactive")]
    CodeNotFound,

    #[error("email does not match the activation code")]
    EmailMismatch,

    #[error("license expired")]
    Expired,

    #[error("device is suspended")]
    DeviceSuspended,

    /// `used` counts suspended devices too; they keep their slot.
    #[error("device limit reached ({used}/{limit})")]
    QuotaExceeded { used: i64, limit: i64 },
}

impl VerifyFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VerifyFailure::CodeNotFound => ErrorKind::NotFound,
            VerifyFailure::EmailMismatch
            | VerifyFailure::Expired
            | VerifyFailure::DeviceSuspended
            | VerifyFailure::QuotaExceeded { .. } => ErrorKind::Conflict,
        }
    }

    /// Message safe to show to whoever presented the code.
    ///
    /// Unknown codes and wrong emails share one message so a caller cannot
    /// probe which of the two secrets is wrong.
    pub fn public_message(&self) -> &'static str {
        match self {
            VerifyFailure::CodeNotFound | VerifyFailure::EmailMismatch => msg::INVALID_CREDENTIALS,
            VerifyFailure::Expired => msg::LICENSE_EXPIRED,
            VerifyFailure::DeviceSuspended => msg::DEVICE_SUSPENDED,
            VerifyFailure::QuotaExceeded { .. } => msg::QUOTA_EXCEEDED,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyFailure),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Verify(failure) => failure.kind(),
            AppError::Database(_) | AppError::Pool(_) | AppError::Json(_) | AppError::Internal(_) => {
                ErrorKind::Store
            }
        }
    }

    /// Message for external callers. Store failures are reduced to a generic
    /// text; the detail goes to the log instead.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg) | AppError::NotFound(msg) | AppError::Conflict(msg) => {
                msg.clone()
            }
            AppError::Verify(failure) => failure.public_message().to_string(),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal error".to_string()
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                "Internal error".to_string()
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                "Internal error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal error".to_string()
            }
        }
    }

    /// The verification failure behind this error, if any.
    pub fn verify_failure(&self) -> Option<VerifyFailure> {
        match self {
            AppError::Verify(failure) => Some(*failure),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
