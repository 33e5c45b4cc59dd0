//! Inbound frame decoding
//!
//! The backend has shipped two incompatible payload shapes. The nested one
//! (`type: "response"`) is tried first, the flat one
//! (`type: "learning_response"`) second. Either way the caller gets a
//! [`LearningResponse`] with non-empty `explanation` and `tts_ref`, or an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const RESPONSE_KIND: &str = "learning_response";
const SCHEMA_A_TYPE: &str = "response";
const SCHEMA_B_TYPE: &str = RESPONSE_KIND;

/// Canonical, schema-independent learning answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningResponse {
    pub kind: String,
    pub explanation: String,
    pub practice_questions: Vec<String>,
    pub additional_urls: Vec<String>,
    pub tts_ref: String,
}

/// Why a structurally-parsed payload was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unexpected type {0:?}")]
    UnexpectedType(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("{0}")]
    Shape(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("schema-a-invalid: {0}")]
    SchemaAInvalid(ValidationError),
    #[error("schema-b-invalid: {0}")]
    SchemaBInvalid(ValidationError),
}

impl DecodeError {
    /// Short cause tag
    pub fn cause(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::SchemaAInvalid(_) => "schema-a-invalid",
            Self::SchemaBInvalid(_) => "schema-b-invalid",
        }
    }

    /// Text published as the connection-level error
    pub fn user_message(&self) -> String {
        match self {
            Self::Malformed(detail) => format!("Failed to parse response: {detail}"),
            Self::SchemaAInvalid(_) | Self::SchemaBInvalid(_) => {
                "Received invalid response format".to_string()
            }
        }
    }
}

// Wire shapes. Lists default to empty; scalar fields are optional so that
// absence and emptiness can be reported separately.

#[derive(Debug, Deserialize)]
struct NestedFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<NestedText>,
    tts_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NestedText {
    explanation: Option<String>,
    #[serde(default)]
    practice_questions: Vec<String>,
    #[serde(default)]
    additional_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FlatFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    explanation: Option<String>,
    #[serde(default)]
    practice_questions: Vec<String>,
    #[serde(default)]
    additional_urls: Vec<String>,
    tts_url: Option<String>,
}

/// Decode one text frame.
pub fn decode(raw: &str) -> Result<LearningResponse, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::Malformed("expected a JSON object".to_string()));
    }

    let schema_a = decode_nested(&value);
    let a_error = match schema_a {
        Ok(response) => return Ok(response),
        Err(e) => e,
    };

    let b_error = match decode_flat(&value) {
        Ok(response) => return Ok(response),
        Err(e) => e,
    };

    // Report against the shape the sender evidently meant
    let tag = value.get("type").and_then(Value::as_str);
    if tag == Some(SCHEMA_A_TYPE) {
        Err(DecodeError::SchemaAInvalid(a_error))
    } else {
        Err(DecodeError::SchemaBInvalid(b_error))
    }
}

fn decode_nested(value: &Value) -> Result<LearningResponse, ValidationError> {
    let frame = NestedFrame::deserialize(value).map_err(|e| ValidationError::Shape(e.to_string()))?;
    check_type(frame.kind.as_deref(), SCHEMA_A_TYPE)?;
    let text = frame.text.ok_or(ValidationError::MissingField("text"))?;
    let explanation = require_non_empty(text.explanation, "text.explanation")?;
    let tts_ref = require_non_empty(frame.tts_url, "tts_url")?;

    Ok(LearningResponse {
        kind: RESPONSE_KIND.to_string(),
        explanation,
        practice_questions: text.practice_questions,
        additional_urls: text.additional_urls,
        tts_ref,
    })
}

fn decode_flat(value: &Value) -> Result<LearningResponse, ValidationError> {
    let frame = FlatFrame::deserialize(value).map_err(|e| ValidationError::Shape(e.to_string()))?;
    check_type(frame.kind.as_deref(), SCHEMA_B_TYPE)?;
    let explanation = require_non_empty(frame.explanation, "explanation")?;
    let tts_ref = require_non_empty(frame.tts_url, "tts_url")?;

    Ok(LearningResponse {
        kind: RESPONSE_KIND.to_string(),
        explanation,
        practice_questions: frame.practice_questions,
        additional_urls: frame.additional_urls,
        tts_ref,
    })
}

fn check_type(found: Option<&str>, expected: &str) -> Result<(), ValidationError> {
    match found {
        Some(t) if t == expected => Ok(()),
        Some(t) => Err(ValidationError::UnexpectedType(t.to_string())),
        None => Err(ValidationError::MissingField("type")),
    }
}

fn require_non_empty(
    value: Option<String>,
    field: &'static str,
) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => Err(ValidationError::EmptyField(field)),
        None => Err(ValidationError::MissingField(field)),
    }
}
