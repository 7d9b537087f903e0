//! Daemon request handlers

use super::DaemonContext;
use crate::config::NodeState;
use crate::error::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Routes served on the control socket
pub fn router(context: Arc<DaemonContext>) -> Router {
    Router::new()
        .route("/state", get(get_state).post(set_state).delete(reset_state))
        .route("/nodes", get(nodes))
        .route("/sync-conf", get(sync_conf))
        .route("/wg", get(wg_status))
        .route("/wg-quick-up", post(wg_quick_up))
        .route("/wg-quick-down", post(wg_quick_down))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(context)
}

async fn get_state(State(context): State<Arc<DaemonContext>>) -> Json<NodeState> {
    Json(context.state().await)
}

// The client sends JSON without a content type, so the body is parsed by hand
async fn set_state(
    State(context): State<Arc<DaemonContext>>,
    body: Bytes,
) -> Result<Json<NodeState>> {
    let state: NodeState = serde_json::from_slice(&body)?;
    Ok(Json(context.update_state(state).await?))
}

async fn reset_state(State(context): State<Arc<DaemonContext>>) -> Result<Json<NodeState>> {
    Ok(Json(context.reset_state().await?))
}

async fn nodes(State(context): State<Arc<DaemonContext>>) -> Result<Json<Vec<String>>> {
    Ok(Json(context.refresh_nodes().await?))
}

async fn sync_conf(State(context): State<Arc<DaemonContext>>) -> Result<&'static str> {
    context.sync_configs().await?;
    Ok("ok")
}

async fn wg_status(State(context): State<Arc<DaemonContext>>) -> Result<String> {
    context.wg_status().await
}

async fn wg_quick_up(State(context): State<Arc<DaemonContext>>, body: String) -> Result<String> {
    context.wg_quick_up(&body).await
}

async fn wg_quick_down(State(context): State<Arc<DaemonContext>>, body: String) -> Result<String> {
    context.wg_quick_down(&body).await
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::exec::testing::RecordingRunner;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::response::Response;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir, runner: Arc<RecordingRunner>) -> (Router, Arc<DaemonContext>) {
        let config = DaemonConfig {
            base_dir: dir.path().to_path_buf(),
            ..DaemonConfig::default()
        };
        let context = Arc::new(
            DaemonContext::new(config, runner).with_controller_base("http://127.0.0.1:1"),
        );
        context.prepare_dirs().unwrap();
        (router(context.clone()), context)
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_post_state_without_content_type() {
        let dir = TempDir::new().unwrap();
        let (app, context) = app(&dir, Arc::new(RecordingRunner::default()));

        let response = app
            .oneshot(
                Request::post("/state")
                    .body(Body::from(
                        r#"{"ip":"203.0.113.7","vpn_host":"vpn.example.com","front_host":"","token":"alice","nodes":null,"slots":{"fra":3},"last_node":""}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let state = context.state().await;
        assert_eq!(state.slot("fra"), Some(3));
        assert!(state.node_cache.is_empty());
    }

    #[tokio::test]
    async fn test_sync_conf_reports_missing_slot() {
        let dir = TempDir::new().unwrap();
        let (app, context) = app(&dir, Arc::new(RecordingRunner::default()));
        std::fs::write(&context.paths().credentials, "{}").unwrap();
        context
            .update_state(NodeState {
                ip: "10.0.0.1".to_string(),
                node_cache: vec!["fra".to_string()],
                ..NodeState::default()
            })
            .await
            .unwrap();

        let response = app
            .oneshot(Request::get("/sync-conf").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "no slot selected for node: fra");
    }

    #[tokio::test]
    async fn test_nodes_unreachable_without_cache() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir, Arc::new(RecordingRunner::default()));

        let response = app
            .oneshot(Request::get("/nodes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_wg_quick_up_runs_tool() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::with_stdout("[#] wg setconf wg-fra /dev/fd/63\n"));
        let (app, context) = app(&dir, runner.clone());

        let active = context.paths().active_config("fra");
        std::fs::write(&active, "[Interface]\n").unwrap();
        let resolved = std::fs::canonicalize(&active).unwrap();

        let response = app
            .oneshot(
                Request::post("/wg-quick-up")
                    .body(Body::from(active.display().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "[#] wg setconf wg-fra /dev/fd/63\n");
        assert_eq!(runner.calls(), vec![format!("wg-quick up {}", resolved.display())]);
    }

    #[tokio::test]
    async fn test_wg_quick_up_rejects_foreign_config() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let (app, _) = app(&dir, runner.clone());

        let elsewhere = TempDir::new().unwrap();
        let foreign = elsewhere.path().join("wg-fra.conf");
        std::fs::write(&foreign, "[Interface]\nPostUp = id\n").unwrap();

        let response = app
            .oneshot(
                Request::post("/wg-quick-up")
                    .body(Body::from(foreign.display().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_state_resets() {
        let dir = TempDir::new().unwrap();
        let (app, context) = app(&dir, Arc::new(RecordingRunner::default()));
        context
            .update_state(NodeState {
                token: "alice".to_string(),
                ..NodeState::default()
            })
            .await
            .unwrap();

        let response = app
            .oneshot(Request::delete("/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(context.state().await, NodeState::default());
    }
}
