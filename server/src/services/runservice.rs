mod request;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use runlib::errors::AdmissionError;
use runlib::{StopOutcome, Supervisor};
use serde::Serialize;
use std::time::UNIX_EPOCH;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

const BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone)]
pub struct RunService {
    supervisor: Supervisor,
}

pub fn router(supervisor: Supervisor) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/run", post(run))
        .route("/run-bot", post(run))
        .route("/stop", post(stop))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(RunService { supervisor })
}

/// Admission failures as HTTP responses.
pub struct ServiceError(AdmissionError);

impl From<AdmissionError> for ServiceError {
    fn from(err: AdmissionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AdmissionError::InvalidInput(_) | AdmissionError::StructuralFailure(_) => {
                StatusCode::BAD_REQUEST
            }
            AdmissionError::RuntimeFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

async fn health() -> &'static str {
    "Generic Bot Runner is up."
}

async fn run(State(service): State<RunService>, body: Bytes) -> Result<String, ServiceError> {
    let job = request::parse_run_request(&body)?;
    let admission = service.supervisor.admit(job).await?;
    info!(job_id = %admission.job_id, "job admitted");
    Ok(admission.logs)
}

async fn stop(State(service): State<RunService>) -> &'static str {
    match service.supervisor.stop().await {
        StopOutcome::NotRunning => "no bot is running",
        StopOutcome::Stopped => "stopped",
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    running: bool,
    job_id: Option<String>,
    strategy: Option<&'static str>,
    started_at_ms: Option<u64>,
}

async fn status(State(service): State<RunService>) -> Json<StatusResponse> {
    let occupant = service.supervisor.status().await.occupant;
    Json(StatusResponse {
        running: occupant.is_some(),
        job_id: occupant.as_ref().map(|o| o.job_id.to_string()),
        strategy: occupant.as_ref().map(|o| o.strategy),
        started_at_ms: occupant.as_ref().and_then(|o| {
            o.started_at
                .duration_since(UNIX_EPOCH)
                .ok()
                .and_then(|elapsed| u64::try_from(elapsed.as_millis()).ok())
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use runlib::strategy::{
        EmbeddedConfig, EmbeddedStrategy, ExecutionStrategy, SubprocessConfig,
        SubprocessStrategy, WrapperDialect, CONFIRMATION,
    };
    use runlib::EnvView;
    use std::{path::Path, sync::Arc, time::Duration};
    use tower::ServiceExt;

    const LOGS_A_THEN_B: &str = r#"(module
      (import "host" "log" (func $log (param i32 i32)))
      (memory (export "memory") 1)
      (data (i32.const 0) "ab")
      (func (export "default")
        (call $log (i32.const 0) (i32.const 1))
        (call $log (i32.const 1) (i32.const 1))))"#;

    fn app(strategy: Arc<dyn ExecutionStrategy>, env: EnvView) -> Router {
        router(Supervisor::spawn(strategy, env, 8))
    }

    fn embedded_app() -> Router {
        let strategy = EmbeddedStrategy::new(EmbeddedConfig {
            eval_budget: Duration::from_millis(500),
        })
        .expect("engine");
        app(Arc::new(strategy), EnvView::empty())
    }

    fn subprocess_app(scratch: &Path) -> Router {
        let strategy = SubprocessStrategy::new(SubprocessConfig {
            scratch_dir: scratch.to_path_buf(),
            dialect: WrapperDialect::Shell,
            ..SubprocessConfig::default()
        })
        .expect("config");
        app(Arc::new(strategy), EnvView::from_process())
    }

    async fn call(app: &Router, method: &str, uri: &str, body: String) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    fn run_body(code: &str) -> String {
        serde_json::json!({ "code": code }).to_string()
    }

    #[tokio::test]
    async fn health() {
        let app = embedded_app();
        for uri in ["/", "/health"] {
            let (status, body) = call(&app, "GET", uri, String::new()).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, "Generic Bot Runner is up.");
        }
    }

    #[tokio::test]
    async fn run_returns_logs_then_stop() {
        let app = embedded_app();
        let (status, body) = call(&app, "POST", "/run", run_body(LOGS_A_THEN_B)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("a\nb\n{CONFIRMATION}\n"));

        let (_, status_body) = call(&app, "GET", "/status", String::new()).await;
        let status_json: serde_json::Value = serde_json::from_str(&status_body).unwrap();
        assert_eq!(status_json["running"], true);
        assert_eq!(status_json["strategy"], "embedded");

        let (status, body) = call(&app, "POST", "/stop", String::new()).await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "stopped"));
        let (status, body) = call(&app, "POST", "/stop", String::new()).await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "no bot is running"));
    }

    #[tokio::test]
    async fn missing_code_is_bad_request() {
        let app = embedded_app();
        let (status, body) = call(&app, "POST", "/run-bot", "{}".into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "field `code` (string) is required");
    }

    #[tokio::test]
    async fn missing_entry_point_is_bad_request() {
        let app = embedded_app();
        let (status, body) = call(&app, "POST", "/run", run_body("(module)")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "export default function not found in user code");
    }

    #[tokio::test]
    async fn trap_is_server_error() {
        let app = embedded_app();
        let code = r#"(module (func (export "default") unreachable))"#;
        let (status, body) = call(&app, "POST", "/run", run_body(code)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("unreachable"), "{body}");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let app = embedded_app();
        let (status, _) = call(&app, "POST", "/run", run_body(&"x".repeat(BODY_LIMIT + 1))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn subprocess_requires_token() {
        let scratch = tempfile::tempdir().unwrap();
        let app = subprocess_app(&scratch.path().join("jobs"));
        let (status, body) = call(&app, "POST", "/run", run_body("sleep 30")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "env.DISCORD_TOKEN is required");
        assert!(!scratch.path().join("jobs").exists());
    }

    #[tokio::test]
    async fn subprocess_stop_removes_artifact() {
        let scratch = tempfile::tempdir().unwrap();
        let jobs = scratch.path().join("jobs");
        let app = subprocess_app(&jobs);
        let body = serde_json::json!({
            "code": "sleep 30",
            "env": { "DISCORD_TOKEN": "secret" },
        })
        .to_string();
        let (status, logs) = call(&app, "POST", "/run", body).await;
        assert_eq!(status, StatusCode::OK, "{logs}");
        assert_eq!(std::fs::read_dir(&jobs).unwrap().count(), 1);

        let (status, body) = call(&app, "POST", "/stop", String::new()).await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "stopped"));
        assert_eq!(std::fs::read_dir(&jobs).unwrap().count(), 0);
    }
}
