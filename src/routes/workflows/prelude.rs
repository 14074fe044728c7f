pub(crate) use std::convert::Infallible;
pub(crate) use std::time::Duration;

pub(crate) use async_stream::stream;
pub(crate) use axum::response::sse::{Event, KeepAlive, Sse};
pub(crate) use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
pub(crate) use serde::Deserialize;
pub(crate) use uuid::Uuid;

pub(crate) use crate::{
    models::workflow::{CreateWorkflow, UpdateWorkflow},
    responses::JsonResponse,
    state::AppState,
};
