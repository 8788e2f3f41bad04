use crate::domains::export::types::CsvSchema;
use crate::domains::response::ResponseRow;
use crate::domains::survey::SurveyFormData;

/// A flattened, string-valued row ready for the encoder. Keys keep their
/// insertion order, which is the column order when the header is inferred.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRecord {
    fields: Vec<(String, String)>,
}

impl ExportRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Sets `key`, replacing its value in place if it is already present.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ExportRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = ExportRecord::new();
        for (k, v) in iter {
            record.push(k, v);
        }
        record
    }
}

/// Trait for types that can be exported to CSV
pub trait CsvRecord {
    /// Get CSV headers for this type
    fn headers() -> Vec<&'static str>;

    /// Convert to a flat record keyed by header name
    fn to_record(&self) -> ExportRecord;

    fn schema() -> CsvSchema {
        CsvSchema::fixed(Self::headers())
    }
}

pub const RESPONSE_COLUMNS: [&str; 13] = [
    "parent_surveyid",
    "parent_shortcode",
    "surveyid",
    "flowid",
    "userid",
    "question_ref",
    "question_idx",
    "question_text",
    "response",
    "timestamp",
    "metadata",
    "pageid",
    "translated_response",
];

pub const FORM_DATA_COLUMNS: [&str; 6] = [
    "surveyid",
    "shortcode",
    "survey_name",
    "version",
    "survey_created",
    "metadata",
];

/// Text form of a JSON value as it appears in a cell.
pub fn format_csv_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(arr) => arr
            .iter()
            .map(format_csv_value)
            .collect::<Vec<_>>()
            .join("; "),
        serde_json::Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Stored answers are JSON when structured and plain text otherwise.
pub fn csv_answer_to_string(value: &Option<String>) -> String {
    match value.as_deref() {
        None => String::new(),
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(parsed @ (serde_json::Value::Array(_) | serde_json::Value::Object(_))) => {
                format_csv_value(&parsed)
            }
            _ => raw.to_string(),
        },
    }
}

pub fn csv_optional_to_string<T: std::fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// Pure mapping of a response row onto [`RESPONSE_COLUMNS`].
pub fn response_to_record(row: &ResponseRow) -> ExportRecord {
    let mut record = ExportRecord::with_capacity(RESPONSE_COLUMNS.len());
    record.push("parent_surveyid", csv_optional_to_string(&row.parent_surveyid));
    record.push("parent_shortcode", csv_optional_to_string(&row.parent_shortcode));
    record.push("surveyid", row.surveyid.as_str());
    record.push("flowid", csv_optional_to_string(&row.flowid));
    record.push("userid", row.userid.as_str());
    record.push("question_ref", row.question_ref.as_str());
    record.push("question_idx", csv_optional_to_string(&row.question_idx));
    record.push("question_text", csv_optional_to_string(&row.question_text));
    record.push("response", csv_answer_to_string(&row.response));
    record.push("timestamp", row.timestamp.as_str());
    record.push("metadata", csv_optional_to_string(&row.metadata));
    record.push("pageid", csv_optional_to_string(&row.pageid));
    record.push("translated_response", csv_answer_to_string(&row.translated_response));
    record
}

pub fn form_data_to_record(form: &SurveyFormData) -> ExportRecord {
    let mut record = ExportRecord::with_capacity(FORM_DATA_COLUMNS.len());
    record.push("surveyid", form.surveyid.as_str());
    record.push("shortcode", form.shortcode.as_str());
    record.push("survey_name", form.survey_name.as_str());
    record.push("version", form.version.to_string());
    record.push("survey_created", form.survey_created.as_str());
    record.push("metadata", csv_optional_to_string(&form.metadata));
    record
}

impl CsvRecord for ResponseRow {
    fn headers() -> Vec<&'static str> {
        RESPONSE_COLUMNS.to_vec()
    }

    fn to_record(&self) -> ExportRecord {
        response_to_record(self)
    }
}

impl CsvRecord for SurveyFormData {
    fn headers() -> Vec<&'static str> {
        FORM_DATA_COLUMNS.to_vec()
    }

    fn to_record(&self) -> ExportRecord {
        form_data_to_record(self)
    }
}
