use catalog_export_rs::{
    archive::ExportDownload,
    catalog::CatalogClient,
    config::{self, ExportConfig},
    export::{ExportError, ExportErrorKind, ExportSummary, ProgressSnapshot, SuspensionView},
    jobs::JobRegistry,
    metrics,
    models::{ApiError, CreateJobRequest, ResolveSuspensionRequest, SwapRequest},
    render::RenderClient,
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use eyre::WrapErr;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::{net::SocketAddr, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "export.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let settings = ExportConfig::from_env();
    info!(
        target = "export.api",
        chunk_size = settings.chunk_size,
        column_token = %settings.identifier_column_token,
        "configuration loaded"
    );
    let catalog = CatalogClient::from_config(&settings);
    let renderer = RenderClient::from_config(&settings);
    info!(
        target = "export.api",
        catalog_remote = catalog.is_remote(),
        "collaborators ready"
    );
    let state = AppState {
        registry: JobRegistry::new(settings, catalog, renderer),
        prometheus_handle: metrics::prometheus_handle(),
    };

    let _reaper = state.registry.spawn_reaper(REAPER_INTERVAL);

    let port = config::port_from_env();
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "export.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app(state).into_make_service())
        .await
        .wrap_err("serving http")?;
    Ok(())
}

const REAPER_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct AppState {
    registry: JobRegistry,
    prometheus_handle: PrometheusHandle,
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(job_snapshot))
        .route("/jobs/{id}/resolve", post(resolve_job))
        .route("/jobs/{id}/generate", post(generate_job))
        .route(
            "/jobs/{id}/suspension",
            get(get_suspension).post(resolve_suspension),
        )
        .route("/jobs/{id}/suspension/swap", post(swap_images))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/summary", get(job_summary))
        .route("/jobs/{id}/logistics", post(logistics_report))
        .route("/jobs/{id}/archive", get(download_archive))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(config::body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "catalog-export-rs",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    let body = state.prometheus_handle.render();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}

/// Create an export job from free text or a decoded table.
///
/// - Method: `POST`
/// - Path: `/jobs`
/// - Body: `CreateJobRequest`
/// - Response: `201` with the job's first progress snapshot
async fn create_job(
    State(state): State<AppState>,
    Json(payload): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<ProgressSnapshot>), AppError> {
    metrics::inc_requests("/jobs");
    let snapshot = state
        .registry
        .create(payload.kind, payload.template_id, &payload.input)
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn job_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProgressSnapshot>, AppError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.registry.snapshot(id).await?))
}

/// Resolve identifiers against the catalog. Blocks until every lookup chunk
/// has returned.
async fn resolve_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProgressSnapshot>, AppError> {
    metrics::inc_requests("/jobs/resolve");
    let id = parse_job_id(&id)?;
    Ok(Json(state.registry.resolve(id).await?))
}

/// Start document generation. Rendering continues in the background; poll
/// `GET /jobs/{id}` for progress.
async fn generate_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ProgressSnapshot>), AppError> {
    metrics::inc_requests("/jobs/generate");
    let id = parse_job_id(&id)?;
    let snapshot = state.registry.generate(id).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

async fn get_suspension(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuspensionView>, AppError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.registry.suspension(id).await?))
}

async fn swap_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SwapRequest>,
) -> Result<Json<SuspensionView>, AppError> {
    metrics::inc_requests("/jobs/suspension/swap");
    let id = parse_job_id(&id)?;
    let view = state
        .registry
        .swap(id, payload.token, payload.a, payload.b)
        .await?;
    Ok(Json(view))
}

/// Confirm or cancel the pending review.
///
/// - Method: `POST`
/// - Path: `/jobs/{id}/suspension`
/// - Body: `{ "token", "action": "confirm" | "cancel", "ordering"? }`
async fn resolve_suspension(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ResolveSuspensionRequest>,
) -> Result<Json<ProgressSnapshot>, AppError> {
    metrics::inc_requests("/jobs/suspension");
    let id = parse_job_id(&id)?;
    let snapshot = state
        .registry
        .resolve_suspension(id, payload.into_decision())
        .await?;
    Ok(Json(snapshot))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProgressSnapshot>, AppError> {
    metrics::inc_requests("/jobs/cancel");
    let id = parse_job_id(&id)?;
    Ok(Json(state.registry.cancel(id).await?))
}

async fn job_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExportSummary>, AppError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.registry.summary(id).await?))
}

async fn logistics_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    metrics::inc_requests("/jobs/logistics");
    let id = parse_job_id(&id)?;
    Ok(download_response(state.registry.logistics(id).await?))
}

async fn download_archive(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    metrics::inc_requests("/jobs/archive");
    let id = parse_job_id(&id)?;
    Ok(download_response(state.registry.archive(id).await?))
}

fn download_response(download: ExportDownload) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", download.file_name);
    (
        [
            (header::CONTENT_TYPE, download.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        download.bytes,
    )
        .into_response()
}

fn parse_job_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw)
        .map_err(|_| AppError::Export(ExportError::invalid_input("jobs", "invalid_job_id")))
}

#[derive(Debug)]
enum AppError {
    Export(ExportError),
}

impl From<ExportError> for AppError {
    fn from(value: ExportError) -> Self {
        Self::Export(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Export(err) => {
                let status = match err.kind() {
                    ExportErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    ExportErrorKind::FailedPrecondition => StatusCode::UNPROCESSABLE_ENTITY,
                    ExportErrorKind::InvalidState => StatusCode::CONFLICT,
                    ExportErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ExportErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    error!(target = "export.api", stage = err.stage(), "{err}");
                }
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
