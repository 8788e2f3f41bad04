use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::domains::export::service::{form_data_file_name, report_file_name};
use crate::domains::export::{csv_byte_stream, to_records, CsvConfig, CsvEncoder, CsvRecord};
use crate::domains::response::service::list_responses;
use crate::domains::response::{RespondentSpan, ResponseFilter, ResponsePage, ResponseRow};
use crate::domains::survey::SurveyFormData;
use crate::errors::{ServiceError, ServiceResult, ValidationError};
use crate::rest::appstate::SharedState;
use crate::rest::caller::CallerEmail;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SurveyQuery {
    pub survey: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub survey: Option<String>,
    pub after: Option<String>,
    pub page_size: Option<usize>,
}

fn required_survey(survey: Option<String>) -> ServiceResult<String> {
    survey
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::required("survey").into())
}

pub(crate) fn csv_attachment(file_name: String, body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        body,
    )
        .into_response()
}

/// Streams every response to the caller's survey as CSV.
///
/// The first row is awaited before anything is sent, so a failing query still
/// gets a proper 500. Later failures can only cut the body short.
pub async fn responses_csv_handler(
    State(state): State<SharedState>,
    CallerEmail(email): CallerEmail,
    Query(query): Query<SurveyQuery>,
) -> Result<Response, ServiceError> {
    let survey = required_survey(query.survey)?;
    let download_id = Uuid::new_v4();
    log::info!("[{}] CSV export of {} requested by {}", download_id, survey, email);

    let mut rows = state
        .export_service
        .response_rows(ResponseFilter::survey(&email, &survey));

    let first = match rows.next().await {
        Some(Err(e)) => return Err(e.into()),
        first => first,
    };
    let rows = stream::iter(first).chain(rows);

    let encoder = CsvEncoder::new(CsvConfig::default(), ResponseRow::schema());
    let chunks = csv_byte_stream(to_records(rows), encoder).map(move |chunk| {
        chunk.map(Bytes::from).map_err(|e| {
            log::error!("[{}] CSV export aborted mid-stream: {}", download_id, e);
            std::io::Error::new(std::io::ErrorKind::Other, e)
        })
    });

    Ok(csv_attachment(
        report_file_name(&survey, Utc::now()),
        Body::from_stream(chunks),
    ))
}

/// Every version of the survey with its creation time and metadata.
pub async fn form_data_csv_handler(
    State(state): State<SharedState>,
    CallerEmail(email): CallerEmail,
    Query(query): Query<SurveyQuery>,
) -> Result<Response, ServiceError> {
    let survey = required_survey(query.survey)?;
    let forms = state.survey_repo.form_data(&email, &survey).await?;

    let encoder = CsvEncoder::new(CsvConfig::default(), SurveyFormData::schema());
    let chunks: Vec<_> = csv_byte_stream(to_records(stream::iter(forms.into_iter().map(Ok))), encoder)
        .collect()
        .await;
    let body = chunks.into_iter().collect::<Result<Vec<_>, _>>()?.concat();

    Ok(csv_attachment(
        form_data_file_name(&survey, Utc::now()),
        Body::from(body),
    ))
}

/// One page of responses with resume tokens.
pub async fn list_responses_handler(
    State(state): State<SharedState>,
    CallerEmail(email): CallerEmail,
    Query(query): Query<ListQuery>,
) -> Result<Json<ResponsePage>, ServiceError> {
    let survey = required_survey(query.survey)?;
    let page = list_responses(
        state.response_repo.as_ref(),
        &ResponseFilter::survey(&email, &survey),
        query.after.as_deref(),
        query.page_size,
    )
    .await?;
    Ok(Json(page))
}

/// First and last answer of every respondent to the caller's surveys,
/// narrowed to one survey with `?survey=`.
pub async fn first_and_last_handler(
    State(state): State<SharedState>,
    CallerEmail(email): CallerEmail,
    Query(query): Query<SurveyQuery>,
) -> Result<Json<Vec<RespondentSpan>>, ServiceError> {
    let survey = query
        .survey
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let spans = state
        .response_repo
        .first_and_last(&email, survey.as_deref())
        .await?;
    Ok(Json(spans))
}
