use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message shared by "no such site" and "site not in your grant" so the two
/// cannot be told apart by callers.
pub const SITE_NOT_FOUND: &str = "Site not found";

/// A single rejected input field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Request-scoped failure taxonomy of the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Valid caller, but the site is not in its grant. Rendered exactly like
    /// a missing site.
    #[error("{}", SITE_NOT_FOUND)]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid argument: {}", describe_fields(.0))]
    InvalidArgument(Vec<FieldError>),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{} ({})", f.field, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// JSON body returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl GatewayError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::InvalidArgument(vec![FieldError::new(field, reason)])
    }

    pub fn site_not_found() -> Self {
        GatewayError::NotFound(SITE_NOT_FOUND.to_string())
    }

    /// Stable, machine-readable kind. `Forbidden` reports
    /// `not_found`.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Forbidden | GatewayError::NotFound(_) => "not_found",
            GatewayError::InvalidArgument(_) => "invalid_argument",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Unavailable(_) => "unavailable",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Whether an idempotent read may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden | GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            GatewayError::Internal(_) => {
                log::error!("Request failed: {}", self);
                "An internal error occurred".to_string()
            }
            GatewayError::Timeout(_) | GatewayError::Unavailable(_) => {
                log::warn!("Request failed: {}", self);
                self.to_string()
            }
            _ => self.to_string(),
        };

        let fields = match self {
            GatewayError::InvalidArgument(fields) => fields.clone(),
            _ => Vec::new(),
        };

        HttpResponse::build(self.status_code()).json(ErrorBody {
            kind: self.kind().to_string(),
            message,
            fields,
        })
    }
}
