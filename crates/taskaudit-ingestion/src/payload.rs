//! Raw payloads and their parsing into rows
//!
//! A payload is CSV text with a header row, JSON text, or a descriptor of a
//! remote endpoint that serves JSON (or CSV). Every format produces a list of
//! rows, each a JSON object or a bare string.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use taskaudit_config::IngestionConfig;

use crate::error::{IngestionError, IngestionResult};

/// Object keys that may wrap the row array of a JSON document
const WRAPPER_KEYS: &[&str] = &["data", "records", "items", "rows"];

/// Remote source of rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSource {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// JSON pointer (RFC 6901) to the row array inside the response
    #[serde(default)]
    pub pointer: Option<String>,
}

/// Unparsed payload as handed to the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionPayload {
    Csv(String),
    Json(String),
    Endpoint(EndpointSource),
}

impl IngestionPayload {
    /// Size of the inline payload; endpoints are measured after fetching
    pub fn size_bytes(&self) -> u64 {
        match self {
            Self::Csv(text) | Self::Json(text) => text.len() as u64,
            Self::Endpoint(_) => 0,
        }
    }

    pub const fn format(&self) -> &'static str {
        match self {
            Self::Csv(_) => "CSV",
            Self::Json(_) => "JSON",
            Self::Endpoint(_) => "endpoint",
        }
    }

    /// Guess the inline format from the text: JSON if it opens with `[` or `{`
    pub fn detect(text: String) -> Self {
        match text.trim_start().chars().next() {
            Some('[' | '{') => Self::Json(text),
            _ => Self::Csv(text),
        }
    }
}

/// Turns payloads into rows, fetching endpoint payloads over HTTP
#[derive(Clone)]
pub struct PayloadParser {
    client: reqwest::Client,
    max_payload_bytes: u64,
}

impl PayloadParser {
    /// # Errors
    ///
    /// Returns `IngestionError::Configuration` if the HTTP client cannot be built
    pub fn new(config: &IngestionConfig) -> IngestionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.endpoint_timeout_seconds))
            .build()
            .map_err(|e| {
                IngestionError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            max_payload_bytes: config.max_payload_bytes,
        })
    }

    pub const fn max_payload_bytes(&self) -> u64 {
        self.max_payload_bytes
    }

    /// Reject inline payloads above the size limit
    ///
    /// # Errors
    ///
    /// Returns `IngestionError::PayloadTooLarge` when over the limit
    pub fn check_size(&self, payload: &IngestionPayload) -> IngestionResult<()> {
        check_size(payload.size_bytes(), self.max_payload_bytes)
    }

    /// Parse a payload into rows
    ///
    /// # Errors
    ///
    /// Returns a parse error for malformed text, and an endpoint error when a
    /// remote source cannot be fetched
    pub async fn parse(&self, payload: &IngestionPayload) -> IngestionResult<Vec<Value>> {
        self.check_size(payload)?;
        match payload {
            IngestionPayload::Csv(text) => parse_csv(text),
            IngestionPayload::Json(text) => parse_json(text, None),
            IngestionPayload::Endpoint(source) => self.fetch(source).await,
        }
    }

    async fn fetch(&self, source: &EndpointSource) -> IngestionResult<Vec<Value>> {
        let mut request = self.client.get(&source.url);
        for (name, value) in &source.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IngestionError::endpoint(&source.url, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestionError::endpoint(
                &source.url,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().contains("html"));
        let body = response
            .text()
            .await
            .map_err(|e| IngestionError::endpoint(&source.url, e.to_string()))?;
        check_size(body.len() as u64, self.max_payload_bytes)?;

        tracing::debug!(url = %source.url, bytes = body.len(), "Fetched endpoint payload");

        match parse_json(&body, source.pointer.as_deref()) {
            Ok(rows) => Ok(rows),
            // Endpoints without a pointer may serve CSV, but only real rows count
            Err(json_error) if source.pointer.is_none() && !is_html => match parse_csv(&body) {
                Ok(rows) if !rows.is_empty() => Ok(rows),
                _ => Err(json_error),
            },
            Err(e) => Err(e),
        }
    }
}

fn check_size(size: u64, max: u64) -> IngestionResult<()> {
    if size > max {
        return Err(IngestionError::PayloadTooLarge { size, max });
    }
    Ok(())
}

/// CSV with a header row; each record becomes an object of strings
///
/// # Errors
///
/// Returns `IngestionError::PayloadParse` on malformed CSV
pub fn parse_csv(text: &str) -> IngestionResult<Vec<Value>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| IngestionError::payload_parse("CSV", e.to_string()))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestionError::payload_parse("CSV", e.to_string()))?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, field)| (header.to_string(), Value::String(field.to_string())))
            .collect();
        rows.push(Value::Object(row));
    }
    Ok(rows)
}

/// JSON array of rows, an object wrapping one, or a single object
///
/// # Errors
///
/// Returns `IngestionError::PayloadParse` on malformed JSON or when no row
/// array can be found
pub fn parse_json(text: &str, pointer: Option<&str>) -> IngestionResult<Vec<Value>> {
    let document: Value =
        serde_json::from_str(text).map_err(|e| IngestionError::payload_parse("JSON", e.to_string()))?;

    let target = match pointer {
        Some(pointer) => document.pointer(pointer).cloned().ok_or_else(|| {
            IngestionError::payload_parse("JSON", format!("pointer {pointer} matches nothing"))
        })?,
        None => document,
    };

    let rows = match target {
        Value::Array(rows) => rows,
        Value::Object(mut map) => {
            let wrapped = WRAPPER_KEYS
                .iter()
                .find(|key| map.get(**key).is_some_and(Value::is_array))
                .and_then(|key| map.remove(*key));
            match wrapped {
                Some(Value::Array(rows)) => rows,
                _ => vec![Value::Object(map)],
            }
        }
        other => {
            return Err(IngestionError::payload_parse(
                "JSON",
                format!("expected an array of rows, found {}", type_name(&other)),
            ));
        }
    };

    Ok(rows.into_iter().filter_map(normalize_row).collect())
}

/// Objects and non-empty strings are rows; scalars become text; nulls drop
fn normalize_row(row: Value) -> Option<Value> {
    match row {
        Value::Null => None,
        Value::Object(ref map) if map.is_empty() => None,
        Value::String(ref text) if text.trim().is_empty() => None,
        Value::Object(_) | Value::String(_) => Some(row),
        other => Some(Value::String(other.to_string())),
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
