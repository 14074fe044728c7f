use super::prelude::*;
use crate::engine::EngineError;
use crate::models::workflow_run::RunDetail;

pub(crate) async fn load_run_detail(
    state: &AppState,
    run_id: Uuid,
) -> Result<Option<RunDetail>, sqlx::Error> {
    let Some(run) = state.store.find_run(run_id).await? else {
        return Ok(None);
    };
    let step_runs = state.store.list_step_runs(run_id).await?;
    let events = state.store.list_events(run_id).await?;
    Ok(Some(RunDetail {
        run,
        step_runs,
        events,
    }))
}

pub async fn start_run(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Response {
    match app_state.executor.start_run(workflow_id).await {
        Ok(run) => (StatusCode::ACCEPTED, Json(run)).into_response(),
        Err(EngineError::WorkflowNotFound(_)) => {
            JsonResponse::not_found("Workflow not found").into_response()
        }
        Err(err) => {
            tracing::error!(%workflow_id, ?err, "failed to start run");
            JsonResponse::server_error("Failed to start run").into_response()
        }
    }
}

pub async fn list_runs(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Response {
    match app_state.store.find_workflow(workflow_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return JsonResponse::not_found("Workflow not found").into_response(),
        Err(err) => {
            tracing::error!(%workflow_id, ?err, "failed to fetch workflow for runs listing");
            return JsonResponse::server_error("Failed to list runs").into_response();
        }
    }

    match app_state.store.list_runs(workflow_id).await {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => {
            tracing::error!(%workflow_id, ?err, "failed to list runs");
            JsonResponse::server_error("Failed to list runs").into_response()
        }
    }
}

pub async fn get_run(State(app_state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    match load_run_detail(&app_state, run_id).await {
        Ok(Some(detail)) => Json(detail).into_response(),
        Ok(None) => JsonResponse::not_found("Run not found").into_response(),
        Err(err) => {
            tracing::error!(%run_id, ?err, "failed to fetch run");
            JsonResponse::server_error("Failed to fetch run").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteManualStepRequest {
    pub success: bool,
}

pub async fn complete_manual_step(
    State(app_state): State<AppState>,
    Path(step_run_id): Path<Uuid>,
    Json(payload): Json<CompleteManualStepRequest>,
) -> Response {
    match app_state
        .executor
        .complete_manual_step(step_run_id, payload.success)
        .await
    {
        Ok(step_run) => Json(step_run).into_response(),
        Err(EngineError::StepRunNotFound(_)) => {
            JsonResponse::not_found("Step run not found").into_response()
        }
        Err(err) => {
            tracing::error!(%step_run_id, ?err, "failed to complete manual step");
            JsonResponse::server_error("Failed to complete manual step").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::broker::Broker;
    use crate::config::Config;
    use crate::db::sqlite_store::SqliteStore;
    use crate::db::store::Store;
    use crate::db::migrations;
    use crate::engine::Executor;
    use crate::models::workflow::WorkflowDetail;
    use crate::state::AppState;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use axum::routing::{get, post};
    use axum::Router;
    use serde_json::{json, Value};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn test_app() -> (Router, AppState) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory database should open");
        migrations::run(&pool).await.expect("schema should apply");
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let broker = Arc::new(Broker::new());
        let executor = Executor::new(store.clone(), broker.clone(), Arc::new(reqwest::Client::new()));
        let state = AppState {
            store,
            broker,
            executor,
            config: Arc::new(Config {
                database_url: "sqlite::memory:".into(),
                bind_addr: "127.0.0.1:0".into(),
            }),
        };

        let app = Router::new()
            .route(
                "/api/workflows",
                post(super::super::create_workflow).get(super::super::list_workflows),
            )
            .route(
                "/api/workflows/{workflow_id}/runs",
                post(super::start_run).get(super::list_runs),
            )
            .route("/api/runs/{run_id}", get(super::get_run))
            .route(
                "/api/step-runs/{step_run_id}/complete",
                post(super::complete_manual_step),
            )
            .with_state(state.clone());

        (app, state)
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should collect");
        serde_json::from_slice(&bytes).expect("body should be json")
    }

    #[tokio::test]
    async fn creating_a_workflow_returns_it_with_steps() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/workflows",
                json!({
                    "name": "release",
                    "steps": [
                        {"name": "wait", "kind": "delay", "config": {"seconds": 0}},
                        {"name": "sign-off", "kind": "manual"}
                    ]
                }),
            ))
            .await
            .expect("request should route");

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["name"], "release");
        assert_eq!(body["steps"].as_array().map(|s| s.len()), Some(2));
        assert_eq!(body["steps"][1]["kind"], "manual");
    }

    #[tokio::test]
    async fn blank_workflow_name_is_rejected() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/workflows",
                json!({"name": "   ", "steps": []}),
            ))
            .await
            .expect("request should route");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn starting_a_run_for_an_unknown_workflow_is_404() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(json_request(
                Method::POST,
                &format!("/api/workflows/{}/runs", Uuid::new_v4()),
                json!({}),
            ))
            .await
            .expect("request should route");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn fetching_an_unknown_run_is_404() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri(&format!("/api/runs/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should route");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn completing_an_unknown_step_run_is_404() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(json_request(
                Method::POST,
                &format!("/api/step-runs/{}/complete", Uuid::new_v4()),
                json!({"success": true}),
            ))
            .await
            .expect("request should route");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn a_started_run_is_visible_with_step_runs_and_events() {
        let (app, state) = test_app().await;
        let workflow: WorkflowDetail = state
            .store
            .create_workflow(
                "w",
                None,
                vec![crate::models::workflow::WorkflowStepInput {
                    id: None,
                    name: "gate".into(),
                    kind: crate::models::workflow::StepKind::Manual,
                    config: json!(null),
                    position: None,
                }],
            )
            .await
            .expect("workflow should persist");

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/api/workflows/{}/runs", workflow.workflow.id),
                json!({}),
            ))
            .await
            .expect("request should route");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let run = body_json(response).await;
        let run_id = run["id"].as_str().expect("run id present").to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(&format!("/api/runs/{run_id}"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should route");
        assert_eq!(response.status(), StatusCode::OK);
        let detail = body_json(response).await;
        assert_eq!(detail["step_runs"].as_array().map(|s| s.len()), Some(1));
        assert!(detail["events"]
            .as_array()
            .map(|e| !e.is_empty())
            .unwrap_or(false));
    }
}
