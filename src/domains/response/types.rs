use serde::{Deserialize, Serialize};

/// One answer given by one respondent to one question of one survey, as read
/// for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ResponseRow {
    pub parent_surveyid: Option<String>,
    pub parent_shortcode: Option<String>,
    pub surveyid: String,
    pub flowid: Option<i64>,
    pub userid: String,
    pub question_ref: String,
    pub question_idx: Option<i64>,
    pub question_text: Option<String>,
    /// Raw answer. JSON when the answer is structured, plain text otherwise.
    pub response: Option<String>,
    pub timestamp: String,
    pub metadata: Option<String>,
    pub pageid: Option<String>,
    pub translated_response: Option<String>,
}

/// Which responses a row source walks over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFilter {
    /// Every version of the survey called `survey_name` owned by `email`.
    Survey { email: String, survey_name: String },
    /// The whole table. Used by the batch exporter.
    All,
}

impl ResponseFilter {
    pub fn survey(email: impl Into<String>, survey_name: impl Into<String>) -> Self {
        Self::Survey {
            email: email.into(),
            survey_name: survey_name.into(),
        }
    }
}

/// First and last answer a respondent gave across the surveys in scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RespondentSpan {
    pub userid: String,
    pub first_surveyid: String,
    pub first_timestamp: String,
    pub first_response: Option<String>,
    pub last_surveyid: String,
    pub last_timestamp: String,
    pub last_response: Option<String>,
}

/// A row returned by the paginated listing, carrying the token that resumes
/// the listing right after it.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseWithToken {
    #[serde(flatten)]
    pub row: ResponseRow,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponsePage {
    pub responses: Vec<ResponseWithToken>,
}
