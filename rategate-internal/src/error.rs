use std::fmt::{self, Display};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde_json::json;

#[derive(Debug, PartialEq)]
// As long as the struct member is private, callers must go through `new`,
// which logs the error. `ErrorDetails` is boxed per `clippy::result_large_err`.
pub struct Error(Box<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Box::new(details))
    }

    pub fn new_without_logging(details: ErrorDetails) -> Self {
        Error(Box::new(details))
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    pub fn get_owned_details(self) -> ErrorDetails {
        *self.0
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, PartialEq)]
pub enum ErrorDetails {
    /// The X-API-Key header was absent or blank.
    ApiKeyMissing,
    /// The X-API-Key header did not match any client.
    ApiKeyInvalid,
    /// The client exists but has been deactivated.
    ClientInactive,
    /// The counter store (Redis) could not be reached or timed out.
    /// The admission path fails closed on this.
    CounterStore { message: String },
    /// The durable store (Postgres) failed on the hot path.
    SubscriptionStore { message: String },
    InvalidRequest { message: String },
    NotFound { message: String },
    Config { message: String },
    InternalError { message: String },
}

impl ErrorDetails {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::ApiKeyMissing | ErrorDetails::ApiKeyInvalid => StatusCode::UNAUTHORIZED,
            ErrorDetails::ClientInactive => StatusCode::FORBIDDEN,
            ErrorDetails::CounterStore { .. } | ErrorDetails::SubscriptionStore { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorDetails::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::NotFound { .. } => StatusCode::NOT_FOUND,
            ErrorDetails::Config { .. } | ErrorDetails::InternalError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short machine-readable label, used as the `error` field of JSON bodies.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorDetails::ApiKeyMissing | ErrorDetails::ApiKeyInvalid => "Unauthorized",
            ErrorDetails::ClientInactive => "Forbidden",
            ErrorDetails::CounterStore { .. } | ErrorDetails::SubscriptionStore { .. } => {
                "Service Unavailable"
            }
            ErrorDetails::InvalidRequest { .. } => "Bad Request",
            ErrorDetails::NotFound { .. } => "Not Found",
            ErrorDetails::Config { .. } | ErrorDetails::InternalError { .. } => {
                "Internal Server Error"
            }
        }
    }

    pub fn log(&self) {
        if self.status_code().is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::warn!("{self}");
        }
    }
}

impl Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetails::ApiKeyMissing => write!(f, "Missing X-API-Key header"),
            ErrorDetails::ApiKeyInvalid => write!(f, "Invalid API key"),
            ErrorDetails::ClientInactive => write!(f, "Client is inactive"),
            ErrorDetails::CounterStore { message } => {
                write!(f, "Counter store error: {message}")
            }
            ErrorDetails::SubscriptionStore { message } => {
                write!(f, "Subscription store error: {message}")
            }
            ErrorDetails::InvalidRequest { message } => write!(f, "{message}"),
            ErrorDetails::NotFound { message } => write!(f, "{message}"),
            ErrorDetails::Config { message } => write!(f, "Configuration error: {message}"),
            ErrorDetails::InternalError { message } => write!(f, "Internal error: {message}"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self.get_details() {
            // 401/403 bodies carry only the error label and message.
            ErrorDetails::ApiKeyMissing | ErrorDetails::ApiKeyInvalid | ErrorDetails::ClientInactive => {
                json!({
                    "error": self.get_details().label(),
                    "message": self.to_string(),
                })
            }
            details => json!({
                "timestamp": Utc::now().to_rfc3339(),
                "status": status.as_u16(),
                "error": details.label(),
                "message": self.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}
