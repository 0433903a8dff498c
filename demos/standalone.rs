//! Minimal HTTP service exposing the signing key lifecycle.
//!
//! Run with: cargo run --example standalone
//!
//! ```bash
//! curl -X POST localhost:3000/keys -H 'content-type: application/json' \
//!      -d '{"scope": ["forgot_password"], "email": "user@example.com"}'
//! curl 'localhost:3000/keys/<token>/verify?scope=forgot_password'
//! curl -X POST localhost:3000/keys/<token>/rotate
//! curl -X DELETE localhost:3000/keys/<token>
//! curl 'localhost:3000/keys?scope=forgot_password&active=true'
//! ```
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use signing_keys::storage::MemoryStorage;
use signing_keys::{IssueRequest, KeyFilter, SigningEngine, SigningError, SigningKey};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

type Engine = Arc<SigningEngine<MemoryStorage>>;

#[derive(Deserialize)]
struct IssueBody {
    scope: Vec<String>,
    #[serde(default = "default_hours")]
    expiration_hours: i64,
    email: Option<String>,
}

fn default_hours() -> i64 {
    1
}

#[derive(Deserialize)]
struct ScopeParams {
    scope: String,
}

#[derive(Deserialize)]
struct ListParams {
    scope: Option<String>,
    active: Option<bool>,
    email: Option<String>,
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
}

struct ApiError(SigningError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            SigningError::KeyDoesNotExist | SigningError::NoMatchingKeys => StatusCode::NOT_FOUND,
            SigningError::KeyExpired(_) => StatusCode::GONE,
            SigningError::ScopeMismatch => StatusCode::FORBIDDEN,
            SigningError::AlreadyRotated => StatusCode::CONFLICT,
            SigningError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            SigningError::SignatureCollision => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.0.code(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<SigningError> for ApiError {
    fn from(error: SigningError) -> Self {
        Self(error)
    }
}

async fn issue(
    State(engine): State<Engine>,
    Json(body): Json<IssueBody>,
) -> Result<Json<TokenResponse>, ApiError> {
    let mut request = IssueRequest::new(body.scope).expiration_hours(body.expiration_hours);
    if let Some(email) = &body.email {
        request = request.email(email);
    }
    let token = engine.issue(request).await?;
    Ok(Json(TokenResponse { token }))
}

async fn verify(
    State(engine): State<Engine>,
    Path(token): Path<String>,
    Query(params): Query<ScopeParams>,
) -> Result<StatusCode, ApiError> {
    engine.verify(&token, params.scope.split(',').collect::<Vec<_>>()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rotate(
    State(engine): State<Engine>,
    Path(token): Path<String>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = engine.rotate_one(&token, None).await?;
    Ok(Json(TokenResponse { token }))
}

async fn expire(
    State(engine): State<Engine>,
    Path(token): Path<String>,
) -> Result<StatusCode, ApiError> {
    engine.expire(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list(
    State(engine): State<Engine>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<SigningKey>>, ApiError> {
    let mut filter = KeyFilter::new();
    if let Some(scope) = &params.scope {
        filter = filter.scope(scope);
    }
    if let Some(active) = params.active {
        filter = filter.active(active);
    }
    if let Some(email) = &params.email {
        filter = filter.email(email);
    }
    Ok(Json(engine.query(&filter).await?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("signing_keys=debug,info")),
        )
        .init();

    let engine: Engine = Arc::new(
        SigningEngine::builder()
            .with_rate_limit(10, Duration::from_secs(60))
            .build_and_init()
            .await?,
    );

    // Periodically deactivate expired keys and rotate keys about to expire.
    let maintenance = Arc::clone(&engine);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            if let Err(e) = maintenance.flush_expired().await {
                tracing::warn!("flush failed: {e}");
            }
            match maintenance.rotate_batch(1, None).await {
                Ok(pairs) => tracing::info!(rotated = pairs.len(), "maintenance rotation"),
                Err(e) => tracing::warn!("batch rotation failed: {e}"),
            }
        }
    });

    let app = Router::new()
        .route("/keys", post(issue).get(list))
        .route("/keys/:token", axum::routing::delete(expire))
        .route("/keys/:token/verify", get(verify))
        .route("/keys/:token/rotate", post(rotate))
        .with_state(engine);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
