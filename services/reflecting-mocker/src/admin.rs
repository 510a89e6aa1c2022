//! Admin API for runtime fault injection
//!
//! Runs on its own listener, separate from the reflecting endpoints, so a test
//! orchestrator can flip an endpoint's fault flags between requests without
//! restarting anything.
//!
//! Endpoints:
//! - GET  /health                               - liveness, endpoint count, uptime
//! - GET  /metrics                              - Prometheus text exposition
//! - GET  /admin/endpoints                      - flags of every endpoint
//! - GET  /admin/endpoints/{id}                 - flags of one endpoint
//! - POST /admin/endpoints/{id}/always-bork     - `{"enabled": bool}`
//! - POST /admin/endpoints/{id}/always-redirect - `{"enabled": bool, "target": "<url>"}`
//! - POST /admin/endpoints/{id}/reset           - restore configured flags

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use handler::{EndpointContext, FaultFlags};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::{info, warn};

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    endpoints: Arc<BTreeMap<String, Arc<EndpointContext>>>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

impl AdminState {
    pub fn new(contexts: Vec<Arc<EndpointContext>>, prometheus: PrometheusHandle) -> Self {
        let endpoints = contexts
            .into_iter()
            .map(|ctx| (ctx.endpoint_id().to_string(), ctx))
            .collect();
        Self {
            endpoints: Arc::new(endpoints),
            prometheus,
            started_at: Instant::now(),
        }
    }

    fn context(&self, id: &str) -> Result<&Arc<EndpointContext>, Response> {
        self.endpoints.get(id).ok_or_else(|| {
            json_error(StatusCode::NOT_FOUND, &format!("unknown endpoint: {id}"))
        })
    }
}

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route("/admin/endpoints", get(list_endpoints))
        .route("/admin/endpoints/{id}", get(get_endpoint))
        .route("/admin/endpoints/{id}/always-bork", post(set_always_bork))
        .route("/admin/endpoints/{id}/always-redirect", post(set_always_redirect))
        .route("/admin/endpoints/{id}/reset", post(reset_endpoint))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct BorkRequest {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct RedirectRequest {
    enabled: bool,
    #[serde(default)]
    target: Option<String>,
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, [(CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}

fn json_error(status: StatusCode, message: &str) -> Response {
    json_response(status, serde_json::json!({ "error": message }))
}

fn flags_json(endpoint_id: &str, flags: &FaultFlags) -> serde_json::Value {
    serde_json::json!({
        "endpoint_id": endpoint_id,
        "always_bork": flags.always_bork,
        "always_redirect": flags.always_redirect,
        "redirect_target": flags.redirect_target,
    })
}

async fn describe(ctx: &EndpointContext) -> serde_json::Value {
    flags_json(ctx.endpoint_id(), &ctx.snapshot().await)
}

/// GET /health - always healthy while the process serves requests.
async fn health(State(state): State<AdminState>) -> Response {
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "endpoints": state.endpoints.len(),
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        }),
    )
}

/// GET /metrics - Prometheus text exposition format.
async fn metrics_text(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

/// GET /admin/endpoints - flags of every endpoint, ordered by id.
async fn list_endpoints(State(state): State<AdminState>) -> Response {
    let mut endpoints = Vec::with_capacity(state.endpoints.len());
    for ctx in state.endpoints.values() {
        endpoints.push(describe(ctx).await);
    }
    json_response(StatusCode::OK, serde_json::json!({ "endpoints": endpoints }))
}

/// GET /admin/endpoints/{id}
async fn get_endpoint(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    match state.context(&id) {
        Ok(ctx) => json_response(StatusCode::OK, describe(ctx).await),
        Err(response) => response,
    }
}

/// POST /admin/endpoints/{id}/always-bork
async fn set_always_bork(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    body: Result<Json<BorkRequest>, JsonRejection>,
) -> Response {
    let ctx = match state.context(&id) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return json_error(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };

    ctx.set_always_bork(body.enabled).await;
    info!(endpoint_id = %id, enabled = body.enabled, "always_bork updated");
    json_response(StatusCode::OK, describe(ctx).await)
}

/// POST /admin/endpoints/{id}/always-redirect
///
/// Enabling needs a target usable as a `Location` header. Disabling without a
/// target keeps the previous one.
async fn set_always_redirect(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    body: Result<Json<RedirectRequest>, JsonRejection>,
) -> Response {
    let ctx = match state.context(&id) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return json_error(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };

    if let Some(target) = &body.target {
        if HeaderValue::from_str(target).is_err() {
            warn!(endpoint_id = %id, "rejected redirect target");
            return json_error(
                StatusCode::BAD_REQUEST,
                "redirect target is not a valid header value",
            );
        }
    }
    match ctx.try_set_always_redirect(body.enabled, body.target).await {
        Ok(flags) => {
            info!(endpoint_id = %id, enabled = body.enabled, "always_redirect updated");
            json_response(StatusCode::OK, flags_json(ctx.endpoint_id(), &flags))
        }
        Err(e) => json_error(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

/// POST /admin/endpoints/{id}/reset
async fn reset_endpoint(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    let ctx = match state.context(&id) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    ctx.reset().await;
    info!(endpoint_id = %id, "fault flags reset");
    json_response(StatusCode::OK, describe(ctx).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflectors::reflecting_tcp_endpoint;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    fn test_state() -> (AdminState, Arc<EndpointContext>) {
        let alpha = Arc::new(EndpointContext::new("alpha"));
        let beta = Arc::new(EndpointContext::with_flags(
            "beta",
            FaultFlags {
                always_bork: false,
                always_redirect: true,
                redirect_target: "http://configured.test/".into(),
            },
        ));
        let state = AdminState::new(vec![alpha.clone(), beta], test_prometheus_handle());
        (state, alpha)
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let request = builder
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_endpoint_count() {
        let (state, _) = test_state();
        let (status, json) = call(build_admin_router(state), "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["endpoints"], 2);
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_text() {
        let (state, _) = test_state();
        let response = build_admin_router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "text/plain; version=0.0.4; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn list_endpoints_orders_by_id() {
        let (state, _) = test_state();
        let (status, json) = call(build_admin_router(state), "GET", "/admin/endpoints", None).await;

        assert_eq!(status, StatusCode::OK);
        let endpoints = json["endpoints"].as_array().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0]["endpoint_id"], "alpha");
        assert_eq!(endpoints[1]["endpoint_id"], "beta");
        assert_eq!(endpoints[1]["always_redirect"], true);
        assert_eq!(endpoints[1]["redirect_target"], "http://configured.test/");
    }

    #[tokio::test]
    async fn unknown_endpoint_is_404() {
        let (state, _) = test_state();
        let app = build_admin_router(state);

        let (status, json) = call(app.clone(), "GET", "/admin/endpoints/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("nope"));

        let (status, _) = call(
            app,
            "POST",
            "/admin/endpoints/nope/always-bork",
            Some(r#"{"enabled":true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bork_toggle_changes_next_reflected_response() {
        let (state, alpha) = test_state();
        let admin = build_admin_router(state);
        let endpoint = reflecting_tcp_endpoint(alpha.clone(), 0, None).router();
        let get = || Request::builder().uri("/probe").body(Body::empty()).unwrap();

        let before = endpoint.clone().oneshot(get()).await.unwrap();
        assert_eq!(before.status(), StatusCode::OK);

        let (status, json) = call(
            admin.clone(),
            "POST",
            "/admin/endpoints/alpha/always-bork",
            Some(r#"{"enabled":true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["always_bork"], true);

        let during = endpoint.clone().oneshot(get()).await.unwrap();
        assert_eq!(during.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let (status, json) = call(admin, "POST", "/admin/endpoints/alpha/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["always_bork"], false);

        let after = endpoint.oneshot(get()).await.unwrap();
        assert_eq!(after.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn redirect_requires_a_target_when_enabling() {
        let (state, alpha) = test_state();
        let app = build_admin_router(state);

        let (status, json) = call(
            app.clone(),
            "POST",
            "/admin/endpoints/alpha/always-redirect",
            Some(r#"{"enabled":true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
        assert!(!alpha.snapshot().await.always_redirect);

        let (status, _) = call(
            app,
            "POST",
            "/admin/endpoints/alpha/always-redirect",
            Some(r#"{"enabled":true,"target":"http://bad\ntarget"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!alpha.snapshot().await.always_redirect);
    }

    #[tokio::test]
    async fn redirect_disable_keeps_previous_target() {
        let (state, _) = test_state();
        let app = build_admin_router(state);

        let (status, json) = call(
            app.clone(),
            "POST",
            "/admin/endpoints/beta/always-redirect",
            Some(r#"{"enabled":false}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["always_redirect"], false);
        assert_eq!(json["redirect_target"], "http://configured.test/");

        let (status, json) = call(
            app,
            "POST",
            "/admin/endpoints/beta/always-redirect",
            Some(r#"{"enabled":true,"target":"http://other.test/x"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["always_redirect"], true);
        assert_eq!(json["redirect_target"], "http://other.test/x");
    }

    #[tokio::test]
    async fn malformed_json_body_is_a_json_400() {
        let (state, _) = test_state();
        let (status, json) = call(
            build_admin_router(state),
            "POST",
            "/admin/endpoints/alpha/always-bork",
            Some("{not json"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }
}
