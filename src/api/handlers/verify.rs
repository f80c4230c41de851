//! The entry gate itself.
//!
//! One request carries the scanned QR payload and a still image from the
//! gate camera; the response is the Allow/Deny decision. The decision core
//! audits every attempt, so this handler only translates outcomes into
//! status codes and caller-safe messages.

use axum::{extract::Extension, http::StatusCode, Json};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

use crate::api::AppGate;
use crate::gate::engine::{DenyReason, EntryDecision};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyRequest {
    /// Decoded QR payload as scanned at the gate.
    qr_token: String,
    /// Still image from the gate camera, base64-encoded.
    image: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyResponse {
    access_granted: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    similarity: Option<f32>,
}

type EntryResponse = (StatusCode, Json<VerifyResponse>);

#[utoipa::path(
    post,
    path= "/verify-entry",
    request_body = VerifyRequest,
    responses (
        (status = 200, description = "Access granted", body = VerifyResponse),
        (status = 400, description = "Bad request or no biometric template", body = VerifyResponse),
        (status = 401, description = "Invalid credential or face mismatch", body = VerifyResponse),
        (status = 403, description = "Account expired", body = VerifyResponse),
        (status = 404, description = "Unknown identity", body = VerifyResponse),
        (status = 500, description = "Internal error", body = VerifyResponse)
    ),
    tag = "verify",
)]
#[instrument(skip(gate, payload))]
pub async fn verify_entry(
    Extension(gate): Extension<Arc<AppGate>>,
    payload: Option<Json<VerifyRequest>>,
) -> EntryResponse {
    let Some(Json(request)) = payload else {
        return refused(StatusCode::BAD_REQUEST, "Missing payload");
    };

    let Ok(image) = BASE64_STANDARD.decode(&request.image) else {
        debug!("Rejecting request with undecodable image field");
        return refused(StatusCode::BAD_REQUEST, "Invalid image encoding");
    };

    let decision = gate.verify_entry(&request.qr_token, &image).await;
    decision_response(&decision)
}

fn refused(status: StatusCode, message: &str) -> EntryResponse {
    (
        status,
        Json(VerifyResponse {
            access_granted: false,
            message: message.to_string(),
            similarity: None,
        }),
    )
}

/// Map a terminal decision to the HTTP contract. Internal causes stay in the
/// audit log; callers only ever see the generic message.
fn decision_response(decision: &EntryDecision) -> EntryResponse {
    let Some(reason) = decision.denied else {
        let message = match decision.email.as_deref() {
            Some(email) => format!("Access granted. Welcome {email}!"),
            None => "Access granted".to_string(),
        };
        return (
            StatusCode::OK,
            Json(VerifyResponse {
                access_granted: true,
                message,
                similarity: decision.similarity,
            }),
        );
    };

    match reason {
        DenyReason::InvalidToken => {
            refused(StatusCode::UNAUTHORIZED, "Invalid, expired or forged QR token")
        }
        DenyReason::UnknownIdentity => refused(
            StatusCode::NOT_FOUND,
            "Credential verified but the identity no longer exists",
        ),
        DenyReason::AccountExpired => refused(StatusCode::FORBIDDEN, "Account expired"),
        DenyReason::MissingTemplate => refused(
            StatusCode::BAD_REQUEST,
            "No biometric template registered. Contact your administrator.",
        ),
        DenyReason::NoFaceDetected | DenyReason::FaceMismatch => (
            StatusCode::UNAUTHORIZED,
            Json(VerifyResponse {
                access_granted: false,
                message: "Face verification failed".to_string(),
                similarity: decision.similarity,
            }),
        ),
        DenyReason::ExtractionTimeout | DenyReason::Internal => {
            refused(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}
