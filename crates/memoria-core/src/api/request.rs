use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde::Serialize;

use super::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Request payload. Kept as owned data so a request can be rebuilt for
/// the retry after a token refresh.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<MultipartPart>),
}

impl RequestBody {
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        Ok(RequestBody::Json(serde_json::to_value(value)?))
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<Vec<MultipartPart>> for RequestBody {
    fn from(parts: Vec<MultipartPart>) -> Self {
        RequestBody::Multipart(parts)
    }
}

#[derive(Debug, Clone)]
enum PartData {
    Text(String),
    Bytes {
        bytes: Vec<u8>,
        file_name: Option<String>,
        mime: Option<String>,
    },
}

/// One field of a multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartPart {
    name: String,
    data: PartData,
}

impl MultipartPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: PartData::Text(value.into()),
        }
    }

    /// A JSON document sent as an `application/json` part
    pub fn json<T: Serialize>(name: impl Into<String>, value: &T) -> serde_json::Result<Self> {
        Ok(Self {
            name: name.into(),
            data: PartData::Bytes {
                bytes: serde_json::to_vec(value)?,
                file_name: None,
                mime: Some("application/json".to_string()),
            },
        })
    }

    pub fn file(
        name: impl Into<String>,
        bytes: Vec<u8>,
        file_name: impl Into<String>,
        mime: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data: PartData::Bytes {
                bytes,
                file_name: Some(file_name.into()),
                mime: Some(mime.into()),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn to_part(&self) -> Result<Part, ApiError> {
        match &self.data {
            PartData::Text(value) => Ok(Part::text(value.clone())),
            PartData::Bytes {
                bytes,
                file_name,
                mime,
            } => {
                let mut part = Part::bytes(bytes.clone());
                if let Some(file_name) = file_name {
                    part = part.file_name(file_name.clone());
                }
                if let Some(mime) = mime {
                    part = part.mime_str(mime).map_err(|_| {
                        ApiError::InvalidHeader(format!("invalid part type {}", mime))
                    })?;
                }
                Ok(part)
            }
        }
    }
}

pub(crate) fn build_form(parts: &[MultipartPart]) -> Result<Form, ApiError> {
    parts.iter().try_fold(Form::new(), |form, part| {
        Ok(form.part(part.name.clone(), part.to_part()?))
    })
}

/// Per-request settings.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Applied after the defaults, so these win (including `Content-Type`).
    /// A multipart `Content-Type` without a `boundary=` parameter still gets
    /// the form's boundary appended.
    pub headers: Vec<(String, String)>,
    /// Overrides the client-wide timeout
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn merge_into(&self, headers: &mut HeaderMap) -> Result<(), ApiError> {
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ApiError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ApiError::InvalidHeader(name.to_string()))?;
            headers.insert(name, value);
        }
        Ok(())
    }
}
