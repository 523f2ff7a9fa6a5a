//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod activation;
mod audit;
mod schemes;
mod sections;

use crate::actor::{actor_middleware, ACTOR_HEADER};
use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    let cors = build_cors_layer(settings);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let layers = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    let api = Router::new()
        // Schemes
        .route("/api/schemes", get(schemes::list_schemes).post(schemes::create_scheme))
        .route("/api/schemes/validate", post(schemes::validate_definition))
        .route(
            "/api/schemes/{scheme_id}",
            get(schemes::get_scheme).patch(schemes::update_scheme),
        )
        .route(
            "/api/schemes/{scheme_id}/definition",
            get(schemes::get_definition).post(schemes::import_definition),
        )
        .route("/api/schemes/{scheme_id}/compile", post(schemes::compile_scheme))
        .route("/api/schemes/{scheme_id}/compiled", get(schemes::get_compiled))
        .route("/api/schemes/{scheme_id}/publish", post(schemes::publish_scheme))

        // Sections index
        .route(
            "/api/schemes/{scheme_id}/sections",
            get(sections::list_sections).put(sections::write_sections),
        )
        .route(
            "/api/schemes/{scheme_id}/sections/{section_id}",
            put(sections::upsert_section).delete(sections::remove_section),
        )

        // Activation workflow
        .route(
            "/api/activations",
            get(activation::list_activations).post(activation::submit_activation),
        )
        .route("/api/activations/pending", get(activation::list_pending))
        .route("/api/activations/{request_id}", get(activation::get_activation))
        .route(
            "/api/activations/{request_id}/decision",
            post(activation::decide_activation),
        )
        .route("/api/grants/{yoj_id}", get(activation::list_grants))
        .route("/api/grants/{yoj_id}/{scheme_id}", get(activation::get_grant))

        // Audit
        .route("/api/audit", get(audit::get_audit_log))
        .layer(middleware::from_fn(actor_middleware));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(layers)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [header::CONTENT_TYPE, header::ACCEPT, ACTOR_HEADER.clone()];

    let cors = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    };
    cors.allow_methods(methods)
        .allow_headers(headers)
        .max_age(Duration::from_secs(3600))
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> Router {
        let mut settings = Settings::default();
        settings.storage.data_dir = dir.to_path_buf();
        settings.pipeline.template_sets = vec!["TS-BASIC".to_string()];
        create_router(Arc::new(AppState::new(&settings)), &settings)
    }

    async fn call(app: &Router, method: Method, uri: &str, actor: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            builder = builder.header("x-actor-id", actor);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn definition() -> Value {
        json!({
            "schemeId": "SCM-TEST",
            "name": "Vendor onboarding",
            "fields": [
                { "id": "company_name", "label": "Company", "type": "text", "required": true }
            ],
            "steps": [
                { "id": "company", "title": "Company", "fields": ["company_name"], "section": "SEC-A" }
            ],
            "sections": ["SEC-A"],
        })
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(&app(dir.path()), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
    }

    #[tokio::test]
    async fn test_mutation_without_actor_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/schemes",
            None,
            Some(json!({ "schemeId": "SCM-TEST", "name": "Test" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("BAD_REQUEST"));

        let (status, _) = call(&app, Method::GET, "/api/schemes", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_scheme_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(
            &app(dir.path()),
            Method::POST,
            "/api/schemes",
            Some("op"),
            Some(json!({ "schemeId": "scm test", "name": "Test" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_failed_import_returns_unprocessable_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        call(&app, Method::POST, "/api/schemes", Some("op"), Some(json!({ "schemeId": "SCM-TEST", "name": "Test" }))).await;

        let mut raw = definition();
        raw["fields"][0]["type"] = json!("hologram");
        let (status, body) = call(&app, Method::POST, "/api/schemes/SCM-TEST/definition", Some("op"), Some(raw)).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["stage"], json!("import"));
        assert!(!body["messages"].as_array().unwrap().is_empty());
        assert_eq!(body["scheme"]["version"], json!(1));
    }

    #[tokio::test]
    async fn test_compile_on_draft_reports_missing_definition() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        call(&app, Method::POST, "/api/schemes", Some("op"), Some(json!({ "schemeId": "SCM-TEST", "name": "Test" }))).await;

        let (status, body) = call(&app, Method::POST, "/api/schemes/SCM-TEST/compile", Some("op"), None).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], json!("DEFINITION_MISSING"));
    }

    #[tokio::test]
    async fn test_scheme_to_grant_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/schemes",
            Some("op"),
            Some(json!({ "schemeId": "SCM-TEST", "name": "Test", "category": "registration" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["scheme"]["status"], json!("draft"));
        assert_eq!(body["scheme"]["version"], json!(1));

        let sections = json!({ "sections": [{ "id": "SEC-A", "title": "Company", "templateSet": "TS-BASIC", "content": {} }] });
        let (status, _) = call(&app, Method::PUT, "/api/schemes/SCM-TEST/sections", Some("op"), Some(sections)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, Method::POST, "/api/schemes/SCM-TEST/definition", Some("op"), Some(definition())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scheme"]["status"], json!("imported"));
        assert_eq!(body["scheme"]["version"], json!(2));

        let (status, body) = call(&app, Method::POST, "/api/schemes/SCM-TEST/compile", Some("op"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scheme"]["status"], json!("compiled"));
        assert_eq!(body["scheme"]["version"], json!(3));

        let (status, body) = call(&app, Method::POST, "/api/schemes/SCM-TEST/publish", Some("op"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scheme"]["status"], json!("published"));
        assert_eq!(body["scheme"]["version"], json!(4));

        let (_, body) = call(&app, Method::GET, "/api/schemes/SCM-TEST/sections", None, None).await;
        assert_eq!(body["sections"][0]["status"], json!("published"));

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/activations",
            Some("vendor-portal"),
            Some(json!({ "yojId": "Y123", "schemeId": "SCM-TEST" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["request"]["requestedBy"], json!("vendor-portal"));
        let request_id = body["request"]["requestId"].as_str().unwrap().to_string();

        let (_, body) = call(&app, Method::GET, "/api/activations/pending", None, None).await;
        assert_eq!(body["requests"].as_array().unwrap().len(), 1);

        let uri = format!("/api/activations/{}/decision", request_id);
        let (status, body) = call(&app, Method::POST, &uri, Some("approver"), Some(json!({ "decision": "approved" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["request"]["status"], json!("approved"));

        let (status, body) = call(&app, Method::POST, &uri, Some("approver"), Some(json!({ "decision": "rejected" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], json!("ALREADY_DECIDED"));

        let (status, body) = call(&app, Method::GET, "/api/grants/Y123/SCM-TEST", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["grant"]["enabled"], json!(true));
        assert_eq!(body["grant"]["role"], json!("vendor"));

        let (_, body) = call(&app, Method::GET, "/api/audit?schemeId=SCM-TEST&limit=1", None, None).await;
        assert_eq!(body["entries"][0]["event"], json!("ACTIVATION_APPROVED"));
    }
}
