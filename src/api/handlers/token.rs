//! Credential minting endpoint.
//!
//! An identity owner fetches a fresh rotating credential here and renders it
//! as a QR code client-side; image encoding never happens on the gateway.

use axum::{
    extract::rejection::QueryRejection,
    extract::{Extension, Query},
    http::{header::CACHE_CONTROL, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::api::AppGate;
use crate::gate::engine::IssueOutcome;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Token {
    token: String,
}

#[derive(IntoParams, Debug, Deserialize, Default)]
#[into_params(parameter_in = Query)]
pub struct SubjectArgs {
    // id of the identity the credential is minted for
    subject_id: String,
}

type TokenResponse = Result<(StatusCode, HeaderMap, Json<Token>), (StatusCode, String)>;

#[utoipa::path(
    get,
    path= "/token",
    params(SubjectArgs),
    responses (
        (status = 200, description = "Return a fresh credential", body = Token),
        (status = 400, description = "Missing or invalid subject id", body = String),
        (status = 403, description = "Account expired", body = String),
        (status = 404, description = "Unknown identity", body = String),
        (status = 500, description = "Error minting the credential", body = String)
    ),
    tag = "token",
)]
#[instrument(skip(gate, query))]
pub async fn token(
    Extension(gate): Extension<Arc<AppGate>>,
    query: Result<Query<SubjectArgs>, QueryRejection>,
) -> TokenResponse {
    let args = parse_subject_args(query)?;
    let subject_id = parse_subject_id(&args.subject_id)?;

    debug!("Minting credential for subject {}", subject_id);

    match gate.issue_token(subject_id, Utc::now()).await {
        Ok(IssueOutcome::Issued(token)) => {
            let mut response_headers = HeaderMap::new();
            response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            Ok((StatusCode::OK, response_headers, Json(Token { token })))
        }
        Ok(IssueOutcome::UnknownIdentity) => {
            debug!("Unknown subject id: {}", subject_id);
            Err((StatusCode::NOT_FOUND, "Unknown identity".to_string()))
        }
        Ok(IssueOutcome::AccountExpired) => {
            debug!("Refusing to mint for expired subject {}", subject_id);
            Err((StatusCode::FORBIDDEN, "Account expired".to_string()))
        }
        Err(err) => {
            error!("Failed to mint credential: {}", err);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to mint credential".to_string(),
            ))
        }
    }
}

fn parse_subject_args(
    query: Result<Query<SubjectArgs>, QueryRejection>,
) -> Result<SubjectArgs, (StatusCode, String)> {
    if let Ok(Query(args)) = query {
        Ok(args)
    } else {
        error!("Failed to parse query parameters");
        Err((StatusCode::BAD_REQUEST, "Missing subject id".to_string()))
    }
}

fn parse_subject_id(raw: &str) -> Result<i64, (StatusCode, String)> {
    raw.parse::<i64>().map_err(|err| {
        error!("Failed to parse subject id: {}", err);
        (
            StatusCode::BAD_REQUEST,
            "Invalid subject id format".to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::biometric::FaceMatcher;
    use crate::gate::engine::Gate;
    use crate::gate::extractor::RemoteExtractor;
    use crate::gate::store::PgAccessStore;
    use crate::gate::token::{PassCodec, TokenFormat, DEFAULT_VALIDITY_SECONDS};
    use anyhow::{anyhow, Result};
    use axum::http::Uri;
    use secrecy::SecretString;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
    use std::time::Duration;

    #[test]
    fn token_payload_serializes() -> Result<(), serde_json::Error> {
        let token = Token {
            token: "7|1000|deadbeef".to_string(),
        };
        let value = serde_json::to_value(token)?;
        assert_eq!(value, serde_json::json!({ "token": "7|1000|deadbeef" }));
        Ok(())
    }

    #[test]
    fn parse_subject_args_accepts_valid_query() {
        let query = Ok(Query(SubjectArgs {
            subject_id: "7".to_string(),
        }));
        let parsed = parse_subject_args(query);
        assert!(matches!(parsed, Ok(args) if args.subject_id == "7"));
    }

    #[test]
    fn parse_subject_args_rejects_missing_subject() -> Result<()> {
        let uri: Uri = "http://gate.test/token".parse()?;
        let rejection = Query::<SubjectArgs>::try_from_uri(&uri)
            .err()
            .ok_or_else(|| anyhow!("expected query rejection"))?;
        let parsed = parse_subject_args(Err(rejection));
        assert!(matches!(
            parsed,
            Err((StatusCode::BAD_REQUEST, msg)) if msg == "Missing subject id"
        ));
        Ok(())
    }

    #[test]
    fn parse_subject_id_accepts_integers() {
        assert!(matches!(parse_subject_id("7"), Ok(7)));
        assert!(matches!(parse_subject_id("-3"), Ok(-3)));
    }

    #[test]
    fn parse_subject_id_rejects_garbage() {
        assert!(matches!(
            parse_subject_id("seven"),
            Err((StatusCode::BAD_REQUEST, _))
        ));
    }

    fn unreachable_gate() -> Result<AppGate> {
        let options = PgConnectOptions::new()
            .host("127.0.0.1")
            .port(1)
            .username("invalid")
            .database("invalid")
            .ssl_mode(PgSslMode::Disable);
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy_with(options);

        let codec = PassCodec::new(
            SecretString::from("an-entirely-static-test-secret!!".to_string()),
            TokenFormat::TimeBoxed,
            DEFAULT_VALIDITY_SECONDS,
        );
        let extractor = RemoteExtractor::new(
            "http://127.0.0.1:1/analyze".to_string(),
            Duration::from_secs(1),
        )?;
        Ok(Gate::new(
            codec,
            FaceMatcher::new(0.5),
            PgAccessStore::new(pool),
            extractor,
        ))
    }

    #[tokio::test]
    async fn token_handler_reports_store_failure() -> Result<()> {
        let gate = Arc::new(unreachable_gate()?);
        let query = Ok(Query(SubjectArgs {
            subject_id: "7".to_string(),
        }));
        let result = token(Extension(gate), query).await;
        assert!(matches!(
            result,
            Err((StatusCode::INTERNAL_SERVER_ERROR, _))
        ));
        Ok(())
    }
}
