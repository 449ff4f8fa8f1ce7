//! HTTP API for fare estimates and precompute rebuilds.
//!
//! - `GET /average_price` returns the twelve-month breakdown for a destination
//! - `POST /generate_precompute` rebuilds, persists and swaps the table
//! - `GET /health` is always unauthenticated
//!
//! When an API key is configured every other route requires it in the
//! `x-api-key` header.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{EstimateError, ServerError};
use crate::estimation::{EstimationService, PriceEstimate, TierFilter};
use crate::refresh::rebuild_and_swap;
use crate::storage::FareStore;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared state for the HTTP API.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EstimationService>,
    pub store: Arc<dyn FareStore>,
    /// Required `x-api-key` value. Never logged.
    pub api_key: Option<Arc<SecretString>>,
}

/// The public fare API.
pub struct FareApi;

impl FareApi {
    /// Build the axum router.
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/average_price", get(average_price))
            .route("/average_price/", get(average_price))
            .route("/generate_precompute", post(generate_precompute))
            .route_layer(axum::middleware::from_fn_with_state(
                state.api_key.clone(),
                api_key_middleware,
            ))
            // Unauthenticated routes (added after the layer).
            .route("/health", get(health_check))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve(
        state: AppState,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        tracing::info!("Fare API listening on {}", addr);

        axum::serve(listener, Self::router(state))
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Fare API shutting down");
            })
            .await?;

        Ok(())
    }
}

/// Rejects requests without the configured API key. A no-op when no key is set.
async fn api_key_middleware(
    State(api_key): State<Option<Arc<SecretString>>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = api_key {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .map(|v| v.as_bytes())
            .unwrap_or_default();

        let matches: bool = expected.expose_secret().as_bytes().ct_eq(provided).into();
        if !matches {
            return Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid or missing API key"));
        }
    }
    Ok(next.run(request).await)
}

/// JSON error body: `{"error": "..."}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<EstimateError> for ApiError {
    fn from(e: EstimateError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.to_string())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

// -- Handlers --

async fn health_check() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct AveragePriceParams {
    destination_iata: String,
    departure_month: u32,
    #[serde(default = "one")]
    num_travelers: u32,
    airline_filter: Option<String>,
}

fn one() -> u32 {
    1
}

async fn average_price(
    State(state): State<AppState>,
    params: Result<Query<AveragePriceParams>, QueryRejection>,
) -> Result<Json<PriceEstimate>, ApiError> {
    let Query(params) = params?;

    let tier_filter = match params.airline_filter.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<TierFilter>()?),
    };

    let estimate = state.service.estimate(
        &params.destination_iata,
        params.departure_month,
        params.num_travelers,
        tier_filter,
    )?;
    Ok(Json(estimate))
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    message: String,
    count: usize,
    priced: usize,
    destinations: usize,
}

async fn generate_precompute(
    State(state): State<AppState>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let summary = rebuild_and_swap(
        state.store.as_ref(),
        state.service.snapshot(),
        Arc::clone(state.service.config()),
    )
    .await
    .map_err(|e| {
        tracing::error!("Precompute rebuild failed: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("rebuild failed: {}", e))
    })?;

    Ok(Json(GenerateResponse {
        message: "Rebuilt the precompute table and swapped it in".to_string(),
        count: summary.entries,
        priced: summary.priced_entries,
        destinations: summary.destinations,
    }))
}
