//! Summarisation endpoints

use axum::{extract::State, Json};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::info;
use validator::Validate;

use crate::api::extract::ValidatedJson;
use crate::error::{ApiError, FieldError};
use crate::source;
use crate::state::AppState;
use abridge_core::{word_count, SummaryResult, DEFAULT_MAX_LENGTH, DEFAULT_MIN_LENGTH};

/// Shortest text the model is asked to summarise, in characters.
const MIN_TEXT_CHARS: usize = 10;

/// Summarisation request.
///
/// Unknown fields are ignored, which covers the sampling options
/// (`do_sample`, `temperature`) older web clients send.
#[derive(Debug, Deserialize, Validate)]
pub struct SummaryRequest {
    /// Text to summarise
    #[validate(length(min = 10))]
    pub text: String,

    /// Upper bound on summary length in tokens (default 150)
    #[serde(default, deserialize_with = "lenient_int")]
    #[validate(range(min = 30, max = 500))]
    pub max_length: Option<i64>,

    /// Lower bound on summary length in tokens (default 50)
    #[serde(default, deserialize_with = "lenient_int")]
    #[validate(range(min = 10, max = 200))]
    pub min_length: Option<i64>,
}

/// Same bounds as [`SummaryRequest`], but the text comes from a web page.
#[derive(Debug, Deserialize, Validate)]
pub struct UrlSummaryRequest {
    #[validate(url)]
    pub url: String,

    #[serde(default, deserialize_with = "lenient_int")]
    #[validate(range(min = 30, max = 500))]
    pub max_length: Option<i64>,

    #[serde(default, deserialize_with = "lenient_int")]
    #[validate(range(min = 10, max = 200))]
    pub min_length: Option<i64>,
}

/// Accepts `150`, `150.0` and `"150"`; fractional or non-numeric values are rejected.
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        Some(_) => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| de::Error::custom("Input should be a valid integer"))
}

fn integral(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64)
        .then_some(value as i64)
}

/// Length bounds with defaults applied. Only called after validation.
fn bounds(max_length: Option<i64>, min_length: Option<i64>) -> (usize, usize) {
    (
        max_length.map_or(DEFAULT_MAX_LENGTH, |value| value as usize),
        min_length.map_or(DEFAULT_MIN_LENGTH, |value| value as usize),
    )
}

impl SummaryRequest {
    fn bounds(&self) -> (usize, usize) {
        bounds(self.max_length, self.min_length)
    }
}

impl UrlSummaryRequest {
    fn bounds(&self) -> (usize, usize) {
        bounds(self.max_length, self.min_length)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub original_text_length: usize,
    pub summary: String,
    pub summary_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Text,
    Url,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryMetadata {
    pub input_word_count: usize,
    pub output_word_count: usize,
    pub compression_ratio: f64,
    pub model_used: String,
    pub processing_device: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub generation_time_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetailedSummaryResponse {
    pub summary: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub metadata: SummaryMetadata,
}

async fn run(
    state: &AppState,
    text: String,
    (max_length, min_length): (usize, usize),
) -> Result<(String, SummaryResult), ApiError> {
    info!(
        "Summarisation request: {} chars, max_length={}, min_length={}",
        text.chars().count(),
        max_length,
        min_length
    );

    let result = state
        .engine
        .summarise(text.clone(), max_length, min_length)
        .await?;
    Ok((text, result))
}

async fn detailed(
    state: &AppState,
    text: &str,
    result: SummaryResult,
    source_url: Option<String>,
) -> DetailedSummaryResponse {
    let status = state.engine.status().await;
    let input_word_count = word_count(text);
    let output_word_count = word_count(&result.summary);

    DetailedSummaryResponse {
        source_type: if source_url.is_some() {
            SourceType::Url
        } else {
            SourceType::Text
        },
        source_url,
        metadata: SummaryMetadata {
            input_word_count,
            output_word_count,
            compression_ratio: compression_ratio(input_word_count, output_word_count),
            model_used: status.model,
            processing_device: status.device,
            input_tokens: result.input_tokens,
            output_tokens: result.output_tokens,
            generation_time_ms: result.generation_time_ms,
        },
        summary: result.summary,
    }
}

/// `POST /Summarise`
pub async fn summarise(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<SummaryRequest>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let bounds = request.bounds();
    let (text, result) = run(&state, request.text, bounds).await?;

    Ok(Json(SummaryResponse {
        original_text_length: text.chars().count(),
        summary_length: result.summary.chars().count(),
        summary: result.summary,
    }))
}

/// `POST /api/summarise`: summary plus generation metadata.
pub async fn summarise_detailed(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<SummaryRequest>,
) -> Result<Json<DetailedSummaryResponse>, ApiError> {
    let bounds = request.bounds();
    let (text, result) = run(&state, request.text, bounds).await?;
    Ok(Json(detailed(&state, &text, result, None).await))
}

/// `POST /api/summarise-url`: fetch a page and summarise its text.
pub async fn summarise_url(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<UrlSummaryRequest>,
) -> Result<Json<DetailedSummaryResponse>, ApiError> {
    let bounds = request.bounds();
    info!("Fetching {}", request.url);
    let text = source::fetch_page_text(&state.http, &request.url).await?;

    if text.chars().count() < MIN_TEXT_CHARS {
        return Err(ApiError::unprocessable(vec![FieldError::body(
            Some("url"),
            format!("Page text should have at least {MIN_TEXT_CHARS} characters"),
            "string_too_short",
        )]));
    }

    let (text, result) = run(&state, text, bounds).await?;
    Ok(Json(detailed(&state, &text, result, Some(request.url)).await))
}

/// Output words per input word, rounded to two decimals.
fn compression_ratio(input_words: usize, output_words: usize) -> f64 {
    if input_words == 0 {
        return 0.0;
    }
    let ratio = output_words as f64 / input_words as f64;
    (ratio * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> SummaryRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_null_bounds_use_defaults() {
        let req = request(r#"{"text": "0123456789", "max_length": null}"#);
        assert!(req.validate().is_ok());
        assert_eq!(req.bounds(), (150, 50));
    }

    #[test]
    fn test_length_counts_characters() {
        // nine multi-byte characters
        let req = request(r#"{"text": "ééééééééé"}"#);
        assert!(req.validate().is_err());

        let req = request(r#"{"text": "éééééééééé"}"#);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let ok = request(r#"{"text": "0123456789", "max_length": 500, "min_length": 10}"#);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.bounds(), (500, 10));

        let low = request(r#"{"text": "0123456789", "max_length": 29}"#);
        assert!(low.validate().is_err());

        let high = request(r#"{"text": "0123456789", "min_length": 201}"#);
        assert!(high.validate().is_err());
    }

    #[test]
    fn test_integral_floats_and_numeric_strings_accepted() {
        let req = request(r#"{"text": "0123456789", "max_length": 150.0, "min_length": "40"}"#);
        assert!(req.validate().is_ok());
        assert_eq!(req.bounds(), (150, 40));

        let req = request(r#"{"text": "0123456789", "max_length": " 200 ", "min_length": "20.0"}"#);
        assert_eq!(req.bounds(), (200, 20));
    }

    #[test]
    fn test_fractional_and_non_numeric_bounds_fail_to_parse() {
        for body in [
            r#"{"text": "0123456789", "max_length": 150.5}"#,
            r#"{"text": "0123456789", "max_length": "abc"}"#,
            r#"{"text": "0123456789", "min_length": true}"#,
            r#"{"text": "0123456789", "min_length": [50]}"#,
        ] {
            let err = serde_json::from_str::<SummaryRequest>(body).unwrap_err();
            assert!(err.to_string().contains("valid integer"), "{body}: {err}");
        }
    }

    #[test]
    fn test_coerced_bound_still_range_checked() {
        let req = request(r#"{"text": "0123456789", "max_length": "29"}"#);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_url_request_validation() {
        let req: UrlSummaryRequest =
            serde_json::from_str(r#"{"url": "https://example.com/news/1", "max_length": 60}"#)
                .unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.bounds(), (60, 50));

        let req: UrlSummaryRequest = serde_json::from_str(r#"{"url": "not a url"}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(compression_ratio(300, 45), 0.15);
        assert_eq!(compression_ratio(3, 1), 0.33);
        assert_eq!(compression_ratio(0, 5), 0.0);
    }
}
