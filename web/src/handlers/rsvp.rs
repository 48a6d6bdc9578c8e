//! RSVP admission endpoints.
//!
//! Every endpoint requires `Authorization: Bearer <token>`. Idempotent
//! no-ops (already verified, nothing to withdraw) answer `200`.

use crate::WebResult;
use crate::extractors::Caller;
use crate::state::AppState;
use admission_core::AdmissionError;
use admission_core::types::AdmissionStatus;
use admission_runtime::{JoinOutcome, VerifyOutcome};
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SUCCESS: &str = "success";

/// Response to `POST /api/rsvp/waitlist`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    /// Always `"success"`
    pub status: String,
    /// Human-readable summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// `"reserved"`, `"waitlisted"`, or `"already_verified"`
    pub outcome: String,
    /// Confirmation deadline when a spot was granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Queue entry time when waitlisted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
}

impl JoinResponse {
    fn new(outcome: &str, message: &str) -> Self {
        Self {
            status: SUCCESS.to_string(),
            message: Some(message.to_string()),
            outcome: outcome.to_string(),
            expires_at: None,
            joined_at: None,
        }
    }
}

impl From<JoinOutcome> for JoinResponse {
    fn from(outcome: JoinOutcome) -> Self {
        match outcome {
            JoinOutcome::Reserved { expires_at } => Self {
                expires_at: Some(expires_at),
                ..Self::new("reserved", "A spot is reserved for you. Confirm your RSVP before it expires.")
            },
            JoinOutcome::Waitlisted { joined_at } => Self {
                joined_at: Some(joined_at),
                ..Self::new("waitlisted", "You have joined the waitlist.")
            },
        }
    }
}

/// Response to `POST /api/rsvp/verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// Always `"success"`
    pub status: String,
    /// Whether the caller now holds a confirmed RSVP
    pub verified: bool,
    /// Human-readable summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response to `POST /api/rsvp/withdraw`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawResponse {
    /// Always `"success"`
    pub status: String,
    /// Human-readable summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Whether an RSVP was actually given up
    pub withdrawn: bool,
    /// Whether the freed spot went to a waitlisted user
    pub promoted: bool,
}

/// Take a free spot or join the waitlist.
///
/// # Endpoint
///
/// ```text
/// POST /api/rsvp/waitlist
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "success",
///   "message": "You have joined the waitlist.",
///   "outcome": "waitlisted",
///   "joinedAt": "2025-01-01T00:00:00Z"
/// }
/// ```
///
/// # Errors
///
/// `400` for a second join or missing claims, `500` on store failure.
pub async fn join_waitlist(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> WebResult<Json<JoinResponse>> {
    match state.service.join_waitlist(&caller).await {
        Ok(outcome) => Ok(Json(outcome.into())),
        Err(AdmissionError::AlreadyVerified) => Ok(Json(JoinResponse::new(
            "already_verified",
            "RSVP already verified",
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Confirm the caller's reserved spot.
///
/// # Endpoint
///
/// ```text
/// POST /api/rsvp/verify
/// Authorization: Bearer <token>
/// ```
///
/// # Errors
///
/// `400` with `LIMIT_REACHED` if no spot is held, `SPOT_EXPIRED` if it lapsed.
pub async fn verify_rsvp(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> WebResult<Json<VerifyResponse>> {
    let message = match state.service.verify_rsvp(&caller).await? {
        VerifyOutcome::Verified => "RSVP confirmed",
        VerifyOutcome::AlreadyVerified => "RSVP already verified",
    };
    Ok(Json(VerifyResponse {
        status: SUCCESS.to_string(),
        verified: true,
        message: Some(message.to_string()),
    }))
}

/// Give up a confirmed RSVP.
///
/// The caller's sessions are revoked, so the bearer token used here stops
/// working afterwards.
///
/// # Endpoint
///
/// ```text
/// POST /api/rsvp/withdraw
/// Authorization: Bearer <token>
/// ```
///
/// # Errors
///
/// `500` on store failure.
pub async fn withdraw_rsvp(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> WebResult<Json<WithdrawResponse>> {
    let outcome = state.service.withdraw_rsvp(&caller).await?;
    let message = if outcome.withdrawn {
        "RSVP withdrawn"
    } else {
        "No RSVP to withdraw"
    };
    Ok(Json(WithdrawResponse {
        status: SUCCESS.to_string(),
        message: Some(message.to_string()),
        withdrawn: outcome.withdrawn,
        promoted: outcome.promoted.is_some(),
    }))
}

/// Where the caller sits in the admission flow.
///
/// # Endpoint
///
/// ```text
/// GET /api/rsvp/status
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// ```json
/// { "state": "waitlisted", "joined_at": "2025-01-01T00:00:00Z", "position": 3 }
/// ```
///
/// # Errors
///
/// `500` on store failure.
pub async fn status(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> WebResult<Json<AdmissionStatus>> {
    Ok(Json(state.service.status(caller.user_id()).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use admission_testing::mocks::test_time;

    #[test]
    fn reserved_response_omits_join_time() {
        let json = serde_json::to_value(JoinResponse::from(JoinOutcome::Reserved {
            expires_at: test_time(),
        }))
        .unwrap_or_default();

        assert_eq!(json["outcome"], "reserved");
        assert_eq!(json["status"], "success");
        assert!(json.get("expiresAt").is_some());
        assert!(json.get("joinedAt").is_none());
    }
}
