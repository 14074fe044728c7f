use super::prelude::*;

pub async fn list_workflows(State(app_state): State<AppState>) -> Response {
    match app_state.store.list_workflows().await {
        Ok(workflows) => Json(workflows).into_response(),
        Err(err) => {
            tracing::error!(?err, "failed to list workflows");
            JsonResponse::server_error("Failed to list workflows").into_response()
        }
    }
}

pub async fn get_workflow(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Response {
    match app_state.store.find_workflow(workflow_id).await {
        Ok(Some(workflow)) => Json(workflow).into_response(),
        Ok(None) => JsonResponse::not_found("Workflow not found").into_response(),
        Err(err) => {
            tracing::error!(%workflow_id, ?err, "failed to fetch workflow");
            JsonResponse::server_error("Failed to fetch workflow").into_response()
        }
    }
}

pub async fn create_workflow(
    State(app_state): State<AppState>,
    Json(payload): Json<CreateWorkflow>,
) -> Response {
    if payload.name.trim().is_empty() {
        return JsonResponse::bad_request("Workflow name must not be empty").into_response();
    }

    match app_state
        .store
        .create_workflow(&payload.name, payload.description.as_deref(), payload.steps)
        .await
    {
        Ok(workflow) => (StatusCode::CREATED, Json(workflow)).into_response(),
        Err(err) => {
            tracing::error!(?err, "failed to create workflow");
            JsonResponse::server_error("Failed to create workflow").into_response()
        }
    }
}

pub async fn update_workflow(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(payload): Json<UpdateWorkflow>,
) -> Response {
    if let Some(name) = &payload.name {
        if name.trim().is_empty() {
            return JsonResponse::bad_request("Workflow name must not be empty").into_response();
        }
    }

    match app_state
        .store
        .update_workflow(
            workflow_id,
            payload.name.as_deref(),
            payload.description.as_deref(),
            payload.steps,
        )
        .await
    {
        Ok(Some(workflow)) => Json(workflow).into_response(),
        Ok(None) => JsonResponse::not_found("Workflow not found").into_response(),
        Err(err) => {
            tracing::error!(%workflow_id, ?err, "failed to update workflow");
            JsonResponse::server_error("Failed to update workflow").into_response()
        }
    }
}
