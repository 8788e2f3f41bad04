use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use super::types::ResponseRow;
use crate::errors::ValidationError;

/// Keyset position of a response: `(userid, timestamp, question_ref, surveyid)`.
///
/// Pages are fetched strictly after a cursor, in ascending keyset order. The
/// tuple is the primary key of `responses` reordered, so it is unique and the
/// walk is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseCursor {
    pub userid: String,
    pub timestamp: String,
    pub question_ref: String,
    pub surveyid: String,
}

impl ResponseCursor {
    /// Cursor positioned on `row`; the next page starts after it.
    pub fn after(row: &ResponseRow) -> Self {
        Self {
            userid: row.userid.clone(),
            timestamp: row.timestamp.clone(),
            question_ref: row.question_ref.clone(),
            surveyid: row.surveyid.clone(),
        }
    }

    /// Opaque, URL-safe token handed to API clients.
    pub fn encode(&self) -> String {
        let parts = [
            self.userid.as_str(),
            self.timestamp.as_str(),
            self.question_ref.as_str(),
            self.surveyid.as_str(),
        ];
        // serializing a fixed array of &str cannot fail
        let json = serde_json::to_string(&parts).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, ValidationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| ValidationError::format("after", &format!("not a valid token: {}", e)))?;
        let [userid, timestamp, question_ref, surveyid]: [String; 4] = serde_json::from_slice(&bytes)
            .map_err(|e| ValidationError::format("after", &format!("not a valid token: {}", e)))?;

        Ok(Self {
            userid,
            timestamp,
            question_ref,
            surveyid,
        })
    }
}
