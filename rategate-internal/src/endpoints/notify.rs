//! Protected notification endpoints. Delivery is simulated: a real
//! deployment would hand off to SMS/email providers here.

use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, ErrorDetails};

#[derive(Debug, Deserialize)]
pub struct NotificationRequest {
    pub recipient: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub success: bool,
    pub id: String,
    pub channel: &'static str,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

fn validate(request: &NotificationRequest) -> Result<(String, String), Error> {
    let recipient = request
        .recipient
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| {
            Error::new(ErrorDetails::InvalidRequest {
                message: "recipient must not be blank".to_string(),
            })
        })?;
    let message = request
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            Error::new(ErrorDetails::InvalidRequest {
                message: "message must not be blank".to_string(),
            })
        })?;
    Ok((recipient.to_string(), message.to_string()))
}

fn accepted(channel: &'static str, confirmation: &str) -> NotificationResponse {
    NotificationResponse {
        success: true,
        id: Uuid::new_v4().to_string(),
        channel,
        timestamp: Utc::now(),
        message: confirmation.to_string(),
    }
}

pub async fn send_sms(
    Json(request): Json<NotificationRequest>,
) -> Result<Json<NotificationResponse>, Error> {
    let (recipient, message) = validate(&request)?;
    info!(recipient = %recipient, "SMS sent: {message}");
    Ok(Json(accepted("sms", "SMS accepted for delivery")))
}

pub async fn send_email(
    Json(request): Json<NotificationRequest>,
) -> Result<Json<NotificationResponse>, Error> {
    let (recipient, message) = validate(&request)?;
    info!(recipient = %recipient, "Email sent: {message}");
    Ok(Json(accepted("email", "Email accepted for delivery")))
}
