use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use tokio_util::io::ReaderStream;

use crate::domains::export::ExportJob;
use crate::errors::{ServiceError, ValidationError};
use crate::rest::appstate::SharedState;
use crate::rest::caller::CallerEmail;
use crate::rest::responses_handler::{csv_attachment, SurveyQuery};

#[derive(Debug, Clone, Serialize)]
pub struct ExportAccepted {
    pub status: &'static str,
    pub export_id: String,
}

/// Queues a background export of the caller's survey.
pub async fn request_export_handler(
    State(state): State<SharedState>,
    CallerEmail(email): CallerEmail,
    Query(query): Query<SurveyQuery>,
) -> Result<(StatusCode, Json<ExportAccepted>), ServiceError> {
    let survey = query
        .survey
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ValidationError::required("survey"))?;

    let job = state
        .export_service
        .request_export(&state.export_queue, &email, &survey)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ExportAccepted {
            status: "success",
            export_id: job.export_id,
        }),
    ))
}

/// Status of every export the caller has requested, or of one survey's
/// exports with `?survey=`.
pub async fn export_status_handler(
    State(state): State<SharedState>,
    CallerEmail(email): CallerEmail,
    Query(query): Query<SurveyQuery>,
) -> Result<Json<Vec<ExportJob>>, ServiceError> {
    let survey = match query.survey {
        Some(survey) if survey.trim().is_empty() => {
            return Err(ServiceError::BadRequest(
                "survey query parameter is required".to_string(),
            ))
        }
        survey => survey,
    };

    let jobs = state
        .export_service
        .list_jobs(&email, survey.as_deref())
        .await?;
    Ok(Json(jobs))
}

/// Streams the file of one of the caller's finished exports.
pub async fn export_file_handler(
    State(state): State<SharedState>,
    CallerEmail(email): CallerEmail,
    Path(export_id): Path<String>,
) -> Result<Response, ServiceError> {
    let (file_name, file) = state.export_service.open_export(&email, &export_id).await?;
    log::info!("Serving export {} ({}) to {}", export_id, file_name, email);

    Ok(csv_attachment(
        file_name,
        Body::from_stream(ReaderStream::new(file)),
    ))
}
