//! API error handling
//!
//! Bodies follow the `{"detail": ...}` shape: a list of field errors for 422
//! responses and the raw error message for everything else.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;
use validator::{ValidationError, ValidationErrors};

/// One entry of a 422 `detail` list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    pub(crate) fn body(field: Option<&str>, msg: impl Into<String>, kind: &str) -> Self {
        let mut loc = vec!["body".to_string()];
        if let Some(field) = field {
            loc.push(field.to_string());
        }
        Self {
            loc,
            msg: msg.into(),
            kind: kind.to_string(),
        }
    }
}

/// API error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: Value,
}

impl ApiError {
    pub fn unprocessable(errors: Vec<FieldError>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: json!(errors),
        }
    }

    /// The upstream page could not be fetched.
    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            detail: Value::String(msg.into()),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: Value::String(msg.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<abridge_core::Error> for ApiError {
    fn from(err: abridge_core::Error) -> Self {
        error!("Request failed: {}", err);
        ApiError::internal(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let text = rejection.body_text();
        let entry = match &rejection {
            JsonRejection::JsonDataError(_) => {
                if let Some(field) = missing_field(&text) {
                    FieldError::body(Some(field), "Field required", "missing")
                } else if let Some((field, msg)) = invalid_field(&text) {
                    let kind = if msg.contains("valid integer") {
                        "int_parsing"
                    } else {
                        "invalid_type"
                    };
                    FieldError::body(Some(field), msg, kind)
                } else {
                    FieldError::body(None, text.clone(), "model_attributes_type")
                }
            }
            JsonRejection::MissingJsonContentType(_) => {
                FieldError::body(None, text.clone(), "content_type")
            }
            _ => FieldError::body(None, text.clone(), "json_invalid"),
        };
        ApiError::unprocessable(vec![entry])
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut entries: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                let field = field.to_string();
                errs.iter()
                    .map(move |err| describe(&field, err))
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by(|a, b| a.loc.cmp(&b.loc));
        ApiError::unprocessable(entries)
    }
}

/// Extract `x` from serde's "missing field `x`" message.
fn missing_field(text: &str) -> Option<&str> {
    let rest = &text[text.find("missing field `")? + "missing field `".len()..];
    rest.split('`').next()
}

/// Split "...target type: field: message at line 1 column 9" into field and message.
fn invalid_field(text: &str) -> Option<(&str, &str)> {
    const PREFIX: &str = "target type: ";
    let rest = &text[text.find(PREFIX)? + PREFIX.len()..];
    let (field, msg) = rest.split_once(": ")?;
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let msg = msg.rsplit_once(" at line ").map_or(msg, |(msg, _)| msg);
    Some((field, msg))
}

fn describe(field: &str, err: &ValidationError) -> FieldError {
    let param = |name: &str| err.params.get(name).and_then(Value::as_f64);

    match err.code.as_ref() {
        "length" => match param("min") {
            Some(min) => FieldError::body(
                Some(field),
                format!("String should have at least {min} characters"),
                "string_too_short",
            ),
            None => FieldError::body(Some(field), "String has an invalid length", "string_length"),
        },
        "range" => match (param("value"), param("min"), param("max")) {
            (Some(value), Some(min), _) if value < min => FieldError::body(
                Some(field),
                format!("Input should be greater than or equal to {min}"),
                "greater_than_equal",
            ),
            (_, _, Some(max)) => FieldError::body(
                Some(field),
                format!("Input should be less than or equal to {max}"),
                "less_than_equal",
            ),
            _ => FieldError::body(Some(field), "Input is out of range", "range"),
        },
        "url" => FieldError::body(Some(field), "Input should be a valid URL", "url_parsing"),
        code => FieldError::body(
            Some(field),
            err.message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("Invalid value ({code})")),
            code,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_missing_field_extraction() {
        let text = "Failed to deserialize the JSON body into the target type: missing field `text` at line 1 column 2";
        assert_eq!(missing_field(text), Some("text"));
        assert_eq!(missing_field("expected value at line 1"), None);
    }

    #[test]
    fn test_invalid_field_extraction() {
        let text = "Failed to deserialize the JSON body into the target type: max_length: Input should be a valid integer at line 1 column 40";
        assert_eq!(
            invalid_field(text),
            Some(("max_length", "Input should be a valid integer"))
        );

        let root = "Failed to deserialize the JSON body into the target type: invalid type: integer `5`, expected struct SummaryRequest at line 1 column 1";
        assert_eq!(invalid_field(root), None);
    }

    #[tokio::test]
    async fn test_internal_error_body_is_raw_message() {
        let response = ApiError::from(abridge_core::Error::ModelLoadError("boom".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, json!({ "detail": "Failed to load model: boom" }));
    }

    #[test]
    fn test_range_error_description() {
        let mut err = ValidationError::new("range");
        err.add_param("min".into(), &30);
        err.add_param("max".into(), &500);
        err.add_param("value".into(), &10);
        let entry = describe("max_length", &err);
        assert_eq!(entry.kind, "greater_than_equal");
        assert_eq!(entry.loc, vec!["body", "max_length"]);

        err.params.insert("value".into(), json!(900));
        assert_eq!(describe("max_length", &err).kind, "less_than_equal");
    }
}
