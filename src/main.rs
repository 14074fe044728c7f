use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use reqwest::Client;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

use flowline::broker::Broker;
use flowline::config::Config;
use flowline::db::sqlite_store::SqliteStore;
use flowline::db::store::Store;
use flowline::db::migrations;
use flowline::engine::Executor;
use flowline::routes::workflows::{
    complete_manual_step, create_workflow, get_run, get_workflow, list_runs, list_workflows,
    sse_run_updates, start_run, update_workflow,
};
use flowline::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    let config = Arc::new(Config::from_env());

    let pool = SqliteStore::connect(&config.database_url)
        .await
        .context("failed to open database")?;
    migrations::run(&pool)
        .await
        .context("failed to apply schema")?;

    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
    let broker = Arc::new(Broker::new());
    let http_client = Arc::new(Client::new());
    let executor = Executor::new(store.clone(), broker.clone(), http_client);

    // runs interrupted by the previous shutdown pick up where the journal
    // left them; manual gates stay suspended
    executor
        .resume_unfinished()
        .await
        .context("failed to resume unfinished runs")?;

    let state = AppState {
        store,
        broker,
        executor,
        config: config.clone(),
    };

    let workflow_routes = Router::new()
        .route("/", post(create_workflow).get(list_workflows))
        .route("/{workflow_id}", get(get_workflow).put(update_workflow))
        .route("/{workflow_id}/runs", post(start_run).get(list_runs));

    let run_routes = Router::new()
        .route("/{run_id}", get(get_run))
        .route("/{run_id}/events", get(sse_run_updates));

    let app = Router::new()
        .nest("/api/workflows", workflow_routes)
        .nest("/api/runs", run_routes)
        .route(
            "/api/step-runs/{step_run_id}/complete",
            post(complete_manual_step),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "flowline listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
