//! Health probe for the gateway.
//!
//! `GET /health` reports database connectivity with a detailed JSON payload;
//! `OPTIONS /health` serves orchestrator probes without a body.

use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info_span, warn, Instrument};
use utoipa::ToSchema;

use crate::GIT_COMMIT_HASH;

const HEALTH_DB_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Database connection is healthy", body = Health),
        (status = 503, description = "Database connection is unhealthy", body = Health)
    ),
    tag = "health",
)]
/// Report gateway health, probing the database with a bounded timeout.
pub async fn health(method: Method, pool: Extension<PgPool>) -> impl IntoResponse {
    let db_healthy = evaluate_database_probe(&pool.0).await;

    if db_healthy {
        debug!("Database connection is healthy");
    } else {
        debug!("Database connection is unhealthy");
    }

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if db_healthy {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let headers = app_headers(&health);

    if db_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

/// Probe database connectivity within [`HEALTH_DB_TIMEOUT_SECONDS`].
async fn evaluate_database_probe(pool: &PgPool) -> bool {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );

    if let Ok(result) = timeout(Duration::from_secs(HEALTH_DB_TIMEOUT_SECONDS), async {
        match pool.acquire().instrument(acquire_span).await {
            Ok(mut conn) => {
                let ping_span =
                    info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
                match conn.ping().instrument(ping_span).await {
                    Ok(()) => true,
                    Err(error) => {
                        error!("Failed to ping database: {}", error);
                        false
                    }
                }
            }
            Err(error) => {
                error!("Failed to acquire database connection: {}", error);
                false
            }
        }
    })
    .await
    {
        result
    } else {
        warn!("Database health check timed out");
        false
    }
}

fn short_commit(commit: &str) -> &str {
    if commit.len() > 7 {
        &commit[0..7]
    } else {
        ""
    }
}

fn app_headers(health: &Health) -> HeaderMap {
    format!(
        "{}:{}:{}",
        health.name,
        health.version,
        short_commit(&health.commit)
    )
    .parse::<HeaderValue>()
    .map(|x_app_header_value| {
        let mut headers = HeaderMap::new();
        headers.insert("X-App", x_app_header_value);
        headers
    })
    .map_err(|err| {
        debug!("Failed to parse X-App header: {}", err);
    })
    .unwrap_or_else(|()| HeaderMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};

    fn unreachable_pool() -> PgPool {
        let options = PgConnectOptions::new()
            .host("127.0.0.1")
            .port(1)
            .username("invalid")
            .database("invalid")
            .ssl_mode(PgSslMode::Disable);
        PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy_with(options)
    }

    #[test]
    fn short_commit_truncates_long_hashes() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("0123456"), "");
        assert_eq!(short_commit(""), "");
    }

    #[test]
    fn app_headers_carry_name_and_version() {
        let health = Health {
            commit: "0123456789abcdef".to_string(),
            name: "pordisto".to_string(),
            version: "0.1.0".to_string(),
            database: "ok".to_string(),
        };
        let headers = app_headers(&health);
        let value = headers.get("X-App").and_then(|v| v.to_str().ok());
        assert_eq!(value, Some("pordisto:0.1.0:0123456"));
    }

    #[tokio::test]
    async fn probe_fails_without_database() {
        let pool = unreachable_pool();
        assert!(!evaluate_database_probe(&pool).await);
    }

    #[tokio::test]
    async fn health_reports_unavailable_without_database() {
        let pool = unreachable_pool();
        let response = health(Method::GET, Extension(pool)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key("X-App"));
    }

    #[tokio::test]
    async fn options_probe_has_empty_body() {
        let pool = unreachable_pool();
        let response = health(Method::OPTIONS, Extension(pool))
            .await
            .into_response();
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("body");
        assert!(body.is_empty());
    }
}
