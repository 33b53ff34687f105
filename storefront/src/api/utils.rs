use crate::errors::{ApiError, StorefrontError};
use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderValue};
use http_body_util::combinators::BoxBody;
use hyper::Response;
use hyper::body::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::http::full_body;

pub type HandlerBody = BoxBody<Bytes, StorefrontError>;

/// How a route reports its errors to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorStyle {
    /// Short plain text reason
    Text,
    /// `{"error": reason}`, plus `details` with the upstream payload on 500s
    Json,
}

pub fn json_response(status: StatusCode, value: &Value) -> Response<HandlerBody> {
    // Serializing a `Value` cannot fail
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::new(full_body(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn text_response(status: StatusCode, message: &str) -> Response<HandlerBody> {
    let mut response = Response::new(full_body(message.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn error_response(error: &ApiError, style: ErrorStyle) -> Response<HandlerBody> {
    let (status, reason, details) = match error {
        ApiError::MissingParameter(reason) => (StatusCode::BAD_REQUEST, reason.to_string(), None),
        ApiError::InvalidBody(_) => (StatusCode::BAD_REQUEST, error.to_string(), None),
        ApiError::Upstream { reason, source } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            reason.to_string(),
            Some(source.details()),
        ),
    };

    match style {
        ErrorStyle::Text => text_response(status, &reason),
        ErrorStyle::Json => {
            let mut body = serde_json::json!({ "error": reason });
            if let Some(details) = details {
                body["details"] = details;
            }
            json_response(status, &body)
        }
    }
}

/// Decodes a JSON request body. An empty body reads as `{}` so that missing
/// fields surface as missing parameters rather than parse errors.
pub fn deserialize_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let bytes: &[u8] = match body.iter().all(u8::is_ascii_whitespace) {
        true => b"{}",
        false => body,
    };
    serde_json::from_slice(bytes).map_err(|e| ApiError::InvalidBody(e.to_string()))
}

/// Returns the first non-empty value of a query parameter.
pub fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, value)| key == name && !value.trim().is_empty())
        .map(|(_, value)| value.into_owned())
}

/// Rejects absent or blank values with `reason`.
pub fn require<'a>(value: Option<&'a str>, reason: &'static str) -> Result<&'a str, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ApiError::MissingParameter(reason))
}

/// Drops JSON values a caller would not mean as data: `null`, `false`, `0`
/// and the empty string.
pub fn present(value: Option<Value>) -> Option<Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}
