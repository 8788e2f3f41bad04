use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::domains::export::{ExportQueueManager, ExportService, ExportSettings, SqliteExportJobRepository};
use crate::domains::response::{ResponseRepository, SqliteResponseRepository};
use crate::domains::survey::{SqliteSurveyRepository, SurveyRepository};
use crate::rest::{exports_handler, responses_handler};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub response_repo: Arc<dyn ResponseRepository>,
    pub survey_repo: Arc<dyn SurveyRepository>,
    pub export_service: Arc<ExportService>,
    pub export_queue: ExportQueueManager,
}

impl AppState {
    /// Wires the repositories onto `pool`. Returns the service separately so
    /// the caller can hand it to the queue before building the state.
    pub fn export_service(pool: &SqlitePool, config: &AppConfig) -> Arc<ExportService> {
        Arc::new(ExportService::new(
            Arc::new(SqliteExportJobRepository::new(pool.clone())),
            Arc::new(SqliteResponseRepository::new(pool.clone())),
            ExportSettings::from(config),
        ))
    }

    pub fn new(
        pool: &SqlitePool,
        export_service: Arc<ExportService>,
        export_queue: ExportQueueManager,
    ) -> Self {
        Self {
            response_repo: Arc::new(SqliteResponseRepository::new(pool.clone())),
            survey_repo: Arc::new(SqliteSurveyRepository::new(pool.clone())),
            export_service,
            export_queue,
        }
    }
}

pub fn create_app(state: SharedState) -> Router {
    let api_v1 = Router::new()
        .route("/responses", get(responses_handler::list_responses_handler))
        .route("/responses/csv", get(responses_handler::responses_csv_handler))
        .route("/responses/form-data", get(responses_handler::form_data_csv_handler))
        .route("/responses/first-and-last", get(responses_handler::first_and_last_handler))
        .route("/exports", post(exports_handler::request_export_handler))
        .route("/exports/status", get(exports_handler::export_status_handler))
        .route("/exports/:export_id/file", get(exports_handler::export_file_handler));

    Router::new()
        .route("/healthcheck", get(health_check))
        .nest("/api/v1", api_v1)
        .fallback(fallback)
        .with_state(state)
}

/// axum handler for any request that fails to match the router routes.
pub async fn fallback(uri: axum::http::Uri) -> impl axum::response::IntoResponse {
    log::debug!("No route for {}", uri);
    (axum::http::StatusCode::NOT_FOUND, uri.to_string())
}

pub async fn health_check() -> Result<String, axum::http::StatusCode> {
    Ok("Health : Ok".into())
}
