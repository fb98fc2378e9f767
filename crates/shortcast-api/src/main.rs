//! Shortcast API server

use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;

use shortcast_core::config::Settings;
use shortcast_core::machine::PipelineMachine;
use shortcast_core::store::JobStore;
use shortcast_stages::default_stages;

mod error;
mod media;
mod models;
mod routes;

#[derive(OpenApi)]
#[openapi(
    info(title = "Shortcast API", description = "Short-video generation jobs"),
    paths(
        routes::health,
        routes::create_job,
        routes::list_jobs,
        routes::get_job,
        routes::review_job,
        routes::list_library,
    ),
    components(schemas(
        models::CreateJobRequest,
        models::ReviewRequest,
        models::JobSummary,
        models::JobDetail,
        models::MediaLinks,
        models::LibraryItem,
        models::HealthResponse,
    ))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env();
    let stages = default_stages(&settings)?;
    let machine = PipelineMachine::new(stages);
    let store = JobStore::new(machine, settings.job_store_config())?;

    let app = routes::routes(routes::AppState {
        store,
        settings: Arc::new(settings.clone()),
    })
    .route(
        "/api/openapi.json",
        axum::routing::get(|| async { axum::Json(ApiDoc::openapi()) }),
    )
    .nest_service("/media", ServeDir::new(&settings.data_root))
    .layer(TraceLayer::new_for_http())
    .layer(build_cors(&settings.cors_origins));

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<_> = origins
        .iter()
        .filter_map(|origin| origin.parse::<axum::http::HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
