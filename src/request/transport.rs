//! HTTP transport seam.
//!
//! `RequestClient` owns timeouts, retries and refresh; a transport only
//! performs one attempt and reads the whole body. `ReqwestTransport` is the
//! production implementation.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use super::types::{Body, HttpRequest, HttpResponse, Part, SendError};

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one attempt. Non-2xx statuses are responses, not errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SendError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns [`SendError::InvalidRequest`] if the TLS backend cannot initialize.
    pub fn new() -> Result<Self, SendError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| SendError::InvalidRequest(format!("HTTP client build failed: {e}")))?;
        Ok(Self { http })
    }

    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SendError> {
        let headers = header_map(&request.headers)?;
        let has_content_type = headers.contains_key(CONTENT_TYPE);
        let mut builder = self.http.request(request.method, &request.url).headers(headers);

        builder = match request.body {
            Body::Empty => builder,
            Body::Json(value) => {
                let raw = serde_json::to_vec(&value).map_err(|e| SendError::InvalidRequest(e.to_string()))?;
                let builder = if has_content_type { builder } else { builder.header(CONTENT_TYPE, "application/json") };
                builder.body(raw)
            }
            Body::Text(text) => {
                let builder = if has_content_type { builder } else { builder.header(CONTENT_TYPE, "text/plain; charset=utf-8") };
                builder.body(text)
            }
            Body::Multipart(parts) => builder.multipart(multipart_form(parts)?),
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_owned()))
            })
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        Ok(HttpResponse { status, headers, body })
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, SendError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| SendError::InvalidRequest(format!("invalid header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| SendError::InvalidRequest(format!("invalid header value for {}", name.as_str())))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn multipart_form(parts: Vec<Part>) -> Result<reqwest::multipart::Form, SendError> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match part {
            Part::Text { name, value } => form.text(name, value),
            Part::File { name, filename, bytes, mime } => {
                let mut file = reqwest::multipart::Part::bytes(bytes).file_name(filename);
                if let Some(mime) = mime {
                    file = file
                        .mime_str(&mime)
                        .map_err(|_| SendError::InvalidRequest(format!("invalid mime type: {mime}")))?;
                }
                form.part(name, file)
            }
        };
    }
    Ok(form)
}

fn map_reqwest_error(err: reqwest::Error) -> SendError {
    if err.is_timeout() {
        SendError::Timeout
    } else if err.is_builder() {
        SendError::InvalidRequest(err.to_string())
    } else {
        SendError::Network(err.to_string())
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
