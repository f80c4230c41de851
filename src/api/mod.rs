//! HTTP surface over the decision core.
//!
//! The router is deliberately small: the gate endpoints, a health probe,
//! and the generated `OpenAPI` document behind Swagger UI. Everything
//! interesting happens in [`crate::gate`].

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::cli::actions::server::Args;
use crate::gate::{
    biometric::FaceMatcher, engine::Gate, extractor::RemoteExtractor, store::PgAccessStore,
    token::PassCodec,
};

pub mod handlers;

/// The concrete gate wired into the HTTP layer.
pub type AppGate = Gate<PgAccessStore, RemoteExtractor>;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::token::token,
        handlers::verify::verify_entry
    ),
    components(schemas(
        handlers::health::Health,
        handlers::token::Token,
        handlers::verify::VerifyRequest,
        handlers::verify::VerifyResponse
    )),
    tags(
        (name = "health", description = "Gateway health probes"),
        (name = "token", description = "Rotating credential minting"),
        (name = "verify", description = "Entry verification")
    )
)]
struct ApiDoc;

/// Boot the gateway: connect the store, assemble the gate, serve.
///
/// # Errors
///
/// Returns an error if the database is unreachable, the extractor client
/// cannot be built, or the listener fails to bind.
pub async fn new(args: Args) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let codec = PassCodec::new(args.secret.clone(), args.token_format, args.token_ttl);
    let matcher = FaceMatcher::new(args.threshold);
    let extractor = RemoteExtractor::new(
        args.extractor_url.clone(),
        Duration::from_secs(args.extractor_timeout),
    )?;

    let gate = Arc::new(Gate::new(
        codec,
        matcher,
        PgAccessStore::new(pool.clone()),
        extractor,
    ));

    let cors = CorsLayer::new()
        // the gate terminal and the QR frontend live on other origins
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    let app = Router::new()
        .route("/verify-entry", post(handlers::verify::verify_entry))
        .route("/token", get(handlers::token::token))
        .route(
            "/health",
            get(handlers::health::health).options(handlers::health::health),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &Request<Body>| {
                        HeaderValue::from_str(Ulid::new().to_string().as_str()).ok()
                    },
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(gate))
                .layer(Extension(pool)),
        )
        .route("/", get(handlers::root));

    let listener = TcpListener::bind(format!("::0:{}", args.port)).await?;

    info!("Listening on [::]:{}", args.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Gracefully shutdown");
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_documents_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        assert!(paths.contains(&"/health"));
        assert!(paths.contains(&"/token"));
        assert!(paths.contains(&"/verify-entry"));
    }

    #[test]
    fn make_span_handles_missing_request_id() {
        let request = Request::builder()
            .uri("/verify-entry")
            .body(Body::empty())
            .expect("request builds");
        // The span must build even when no x-request-id header is present.
        let _span = make_span(&request);
    }
}
