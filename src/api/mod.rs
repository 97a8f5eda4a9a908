//! HTTP API for health checks, token listing, and route quotes

use crate::chain::Token;
use crate::config::ApiConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::route::{Allowance, FeeEstimator, Plan, RoutePlanner, UserLimits};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub planner: Arc<RoutePlanner>,
    pub estimator: Arc<dyn FeeEstimator>,
    pub limits: Arc<UserLimits>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tokens", get(list_tokens))
        .route("/plan", post(create_plan))
        .route("/allowance/:account", get(get_allowance))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> OrchestratorResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("API server: {}", e)))
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn list_tokens(State(state): State<AppState>) -> impl IntoResponse {
    Json(TokensResponse {
        tokens: state.planner.registry().tokens().to_vec(),
    })
}

async fn get_allowance(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Json<Allowance> {
    Json(state.limits.allowance(&account))
}

/// Plan a route and quote its fee. A failed quote keeps the fallback fee.
async fn create_plan(
    State(state): State<AppState>,
    Json(request): Json<PlanRequest>,
) -> Result<Json<Plan>, ApiError> {
    let mut plan = state
        .planner
        .plan_symbols(&request.source, &request.destination, request.amount)?;

    if let Err(e) = state
        .planner
        .refine_fee(&mut plan, state.estimator.as_ref())
        .await
    {
        warn!("Fee refinement failed for plan {}: {}", plan.id, e);
    }

    Ok(Json(plan))
}

// Request / response types

#[derive(Deserialize)]
struct PlanRequest {
    source: String,
    destination: String,
    amount: Decimal,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct TokensResponse {
    tokens: Vec<Token>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: String,
}

struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_caller_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
            kind: self.0.kind().as_str().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TokenRegistry;
    use crate::config::{FeeConfig, PlannerConfig};
    use crate::route::fees::MockFeeEstimator;
    use crate::route::StaticFeeEstimator;
    use crate::test_utils::dec;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app_with(estimator: Arc<dyn FeeEstimator>) -> Router {
        router(AppState {
            planner: Arc::new(RoutePlanner::new(
                Arc::new(TokenRegistry::builtin()),
                PlannerConfig::default(),
            )),
            estimator,
            limits: Arc::new(UserLimits::new(Some(dec("5000")))),
        })
    }

    fn app() -> Router {
        app_with(Arc::new(StaticFeeEstimator::new(FeeConfig::default())))
    }

    async fn post_plan(app: Router, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::post("/plan")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_tokens_lists_registry() {
        let response = app()
            .oneshot(Request::get("/tokens").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let symbols: Vec<&str> = body["tokens"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["symbol"].as_str())
            .collect();
        assert!(symbols.contains(&"TFUEL"));
        assert!(symbols.contains(&"stkATOM"));
    }

    #[tokio::test]
    async fn test_plan_is_refined() {
        let (status, body) = post_plan(
            app(),
            json!({ "source": "TFUEL", "destination": "stkATOM", "amount": "100" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["steps"].as_array().unwrap().len(), 3);
        assert_eq!(body["fee"]["refined"], true);
    }

    #[tokio::test]
    async fn test_plan_keeps_fallback_when_estimator_fails() {
        let mut estimator = MockFeeEstimator::new();
        estimator
            .expect_estimate()
            .returning(|_| Err(OrchestratorError::Internal("quote service down".into())));

        let (status, body) = post_plan(
            app_with(Arc::new(estimator)),
            json!({ "source": "TFUEL", "destination": "stkATOM", "amount": "100" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fee"]["refined"], false);
    }

    #[tokio::test]
    async fn test_same_family_pair_is_bad_request() {
        let (status, body) = post_plan(
            app(),
            json!({ "source": "ATOM", "destination": "stkATOM", "amount": "5" }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_pair");
    }

    #[tokio::test]
    async fn test_over_limit_is_bad_request() {
        let (status, _) = post_plan(
            app(),
            json!({ "source": "TFUEL", "destination": "stkATOM", "amount": "5000" }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_allowance_reports_remaining() {
        let limits = Arc::new(UserLimits::new(Some(dec("5000"))));
        limits.record("0xABC", dec("1200"));
        let app = router(AppState {
            planner: Arc::new(RoutePlanner::new(
                Arc::new(TokenRegistry::builtin()),
                PlannerConfig::default(),
            )),
            estimator: Arc::new(StaticFeeEstimator::new(FeeConfig::default())),
            limits,
        });

        let response = app
            .oneshot(Request::get("/allowance/0xabc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["total"], "1200");
        assert_eq!(body["remaining"], "3800");
        assert_eq!(body["limit"], "5000");
    }
}
