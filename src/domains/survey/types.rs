use serde::{Deserialize, Serialize};

/// One version of a survey. Versions share a `survey_name`; `version` counts
/// them per shortcode, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SurveyFormData {
    pub surveyid: String,
    pub shortcode: String,
    pub survey_name: String,
    pub version: i64,
    pub survey_created: String,
    pub metadata: Option<String>,
}
