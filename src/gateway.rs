//! HTTP gateway for the water balance query.
//!
//! Parses the `{ groupName, statDate }` body, asks the record source for flat
//! rows, assembles them into a tree and wraps the result in the
//! `{ success, data, message? }` envelope.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderName, Method},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::config::{QueryDefaults, QueryParams};
use crate::error::AppError;
use crate::source::RecordSource;
use crate::tree::{assemble_with_stats, TreeNode};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn RecordSource>,
    pub defaults: Arc<QueryDefaults>,
}

/// Response envelope for both outcomes.
#[derive(Debug, Serialize)]
pub struct WaterBalanceResponse {
    pub success: bool,
    pub data: Vec<TreeNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WaterBalanceResponse {
    pub fn success(data: Vec<TreeNode>) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            message: Some(message.into()),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ]);

    Router::new()
        .route("/health", get(health))
        .route("/waterBalance", post(water_balance))
        .route("/functions/v1/waterBalance", post(water_balance))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Fetch the rows for one group/date and return them as a tree.
async fn water_balance(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<WaterBalanceResponse>, AppError> {
    let request_id = Uuid::new_v4().simple().to_string();

    let params = parse_params(&body)?;
    let query = state.defaults.resolve(params);
    info!(
        "[{}] Water balance query: group={} date={}",
        request_id, query.group_name, query.stat_date
    );

    let records = state.source.fetch(&query).await?;
    info!(
        "[{}] {} returned {} records",
        request_id,
        state.source.name(),
        records.len()
    );

    let (forest, stats) = tokio::task::spawn_blocking(move || assemble_with_stats(&records))
        .await
        .map_err(|e| AppError::Assembly(e.to_string()))?;

    info!(
        "[{}] Assembled {} nodes under {} roots (orphans: {}, cycle breaks: {}, duplicates: {})",
        request_id, stats.nodes, stats.roots, stats.orphans, stats.cycle_breaks, stats.duplicates
    );

    Ok(Json(WaterBalanceResponse::success(forest)))
}

/// An empty or whitespace-only body means "use the defaults". Anything else
/// must be a JSON object.
fn parse_params(body: &[u8]) -> Result<QueryParams, AppError> {
    if std::str::from_utf8(body).is_ok_and(|text| text.trim().is_empty()) {
        return Ok(QueryParams::default());
    }

    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| AppError::MalformedInput(e.to_string()))?;
    if !value.is_object() {
        return Err(AppError::MalformedInput(format!(
            "expected an object, got {}",
            json_kind(&value)
        )));
    }

    serde_json::from_value(value).map_err(|e| AppError::MalformedInput(e.to_string()))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::WaterBalanceQuery;
    use crate::tree::FlatRecord;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;

    enum Outcome {
        Rows(Vec<FlatRecord>),
        Config,
        Fail(&'static str),
    }

    struct StubSource {
        outcome: Outcome,
        seen: Mutex<Vec<WaterBalanceQuery>>,
    }

    impl StubSource {
        fn new(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<WaterBalanceQuery> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RecordSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch(&self, query: &WaterBalanceQuery) -> Result<Vec<FlatRecord>, AppError> {
            self.seen.lock().unwrap().push(query.clone());
            match &self.outcome {
                Outcome::Rows(rows) => Ok(rows.clone()),
                Outcome::Config => Err(AppError::Config("missing SUPABASE_URL".to_string())),
                Outcome::Fail(msg) => Err(AppError::DataAccess(msg.to_string())),
            }
        }
    }

    fn zone_rows() -> Vec<FlatRecord> {
        vec![
            FlatRecord {
                id: 1,
                pid: 0,
                name: "Zone A".to_string(),
                water_volume: 100.0,
                water_amount: 90.0,
            },
            FlatRecord {
                id: 2,
                pid: 1,
                name: "Sub 1".to_string(),
                water_volume: 40.0,
                water_amount: 35.0,
            },
        ]
    }

    fn app(source: Arc<StubSource>) -> Router {
        build_router(AppState {
            source,
            defaults: Arc::new(QueryDefaults::default()),
        })
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_returns_assembled_tree() {
        let source = StubSource::new(Outcome::Rows(zone_rows()));
        let (status, json) = post_json(
            app(source.clone()),
            "/waterBalance",
            r#"{"groupName":"一号厂区","statDate":"2025-07-01"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert!(json.get("message").is_none());
        assert_eq!(json["data"][0]["path"], "Zone A");
        assert_eq!(json["data"][0]["waterVolume"], 100.0);
        assert_eq!(json["data"][0]["children"][0]["path"], "Zone A/Sub 1");
        assert_eq!(json["data"][0]["children"][0]["children"], serde_json::json!([]));

        assert_eq!(
            source.seen(),
            vec![WaterBalanceQuery {
                group_name: "一号厂区".to_string(),
                stat_date: "2025-07-01".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_function_path_alias() {
        let source = StubSource::new(Outcome::Rows(zone_rows()));
        let (status, json) = post_json(app(source), "/functions/v1/waterBalance", "{}").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_body_uses_defaults() {
        for body in [
            "",
            "  \n",
            "\u{3000}\u{a0}\x0b",
            r#"{"groupName":"","statDate":""}"#,
        ] {
            let source = StubSource::new(Outcome::Rows(Vec::new()));
            let (status, json) = post_json(app(source.clone()), "/waterBalance", body).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["success"], true);
            assert_eq!(json["data"], serde_json::json!([]));
            assert_eq!(
                source.seen(),
                vec![WaterBalanceQuery {
                    group_name: "默认分组".to_string(),
                    stat_date: "2024-01-01".to_string(),
                }]
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_body_rejected_before_fetch() {
        for body in [
            "{not json",
            "null",
            "5",
            r#""north""#,
            "[]",
            r#"["north","2025-01-01"]"#,
            r#"{"groupName": 5}"#,
        ] {
            let source = StubSource::new(Outcome::Rows(zone_rows()));
            let (status, json) = post_json(app(source.clone()), "/waterBalance", body).await;

            assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", body);
            assert_eq!(json["success"], false);
            assert_eq!(json["data"], serde_json::json!([]));
            assert!(json["message"]
                .as_str()
                .unwrap()
                .starts_with("invalid request body"));
            assert!(source.seen().is_empty());
        }
    }

    #[tokio::test]
    async fn test_source_failure_is_500_envelope() {
        let source = StubSource::new(Outcome::Fail("relation does not exist"));
        let (status, json) = post_json(app(source), "/waterBalance", "{}").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert_eq!(json["data"], serde_json::json!([]));
        assert_eq!(json["message"], "query failed: relation does not exist");
    }

    #[tokio::test]
    async fn test_missing_config_is_500_envelope() {
        let source = StubSource::new(Outcome::Config);
        let (status, json) = post_json(app(source), "/waterBalance", "").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["message"]
            .as_str()
            .unwrap()
            .starts_with("configuration error"));
    }

    #[tokio::test]
    async fn test_plain_options_acknowledged_empty() {
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/waterBalance")
            .body(Body::empty())
            .unwrap();

        let response = app(StubSource::new(Outcome::Rows(Vec::new())))
            .oneshot(req)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_any_origin() {
        let source = StubSource::new(Outcome::Rows(Vec::new()));
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/waterBalance")
            .header("origin", "http://dashboard.example")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "apikey,content-type")
            .body(Body::empty())
            .unwrap();

        let response = app(source.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );
        assert!(source.seen().is_empty());
    }

    #[tokio::test]
    async fn test_cors_header_on_post() {
        let req = Request::builder()
            .method("POST")
            .uri("/waterBalance")
            .header("origin", "http://dashboard.example")
            .body(Body::empty())
            .unwrap();

        let response = app(StubSource::new(Outcome::Rows(zone_rows())))
            .oneshot(req)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );
    }

    #[tokio::test]
    async fn test_health() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app(StubSource::new(Outcome::Rows(Vec::new())))
            .oneshot(req)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
