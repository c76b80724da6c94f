use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use futures::stream::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};

use crate::error::{Error, Result};
use crate::types::ChatCompletionRequest;

/// Raw response body of a streaming request.
///
/// Dropping the stream closes the underlying connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Issues streaming completion requests.
///
/// The session talks to the inference endpoint only through this trait, so the
/// endpoint can be replaced with a scripted stream in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` authorized by `credential` and return the response body.
    ///
    /// Implementations return `Error::RequestFailed` for network failures and
    /// non-success statuses, carrying the response body as diagnostic text.
    async fn open(&self, request: &ChatCompletionRequest, credential: &str) -> Result<ByteStream>;
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    client: ReqwestClient,
    endpoint: String,
}

impl InferenceClient {
    /// Create a new client posting to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = ReqwestClient::builder().build().map_err(|e| {
            Error::http_client(
                format!("Failed to build HTTP client: {e}"),
                Some(Box::new(e)),
            )
        })?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Create a client around an existing reqwest client.
    pub fn with_client(client: ReqwestClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// The URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(credential: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        let mut authorization = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|_| {
                Error::validation(
                    "API key contains characters not allowed in a header",
                    Some("api_key".to_string()),
                )
            })?;
        authorization.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, authorization);
        Ok(headers)
    }

    /// Read the body of a non-success response as diagnostic text.
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        match response.text().await {
            Ok(body) if !body.trim().is_empty() => Error::request_failed(Some(status_code), body),
            Ok(_) => Error::request_failed(Some(status_code), format!("HTTP {status_code}")),
            Err(e) => Error::request_failed(
                Some(status_code),
                format!("HTTP {status_code} (failed to read error response: {e})"),
            ),
        }
    }
}

#[async_trait::async_trait]
impl Transport for InferenceClient {
    async fn open(&self, request: &ChatCompletionRequest, credential: &str) -> Result<ByteStream> {
        let response = self
            .client
            .post(&self.endpoint)
            .headers(Self::headers(credential)?)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    Error::request_failed(None, format!("Connection error: {e}"))
                } else {
                    Error::request_failed(None, format!("Request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        let stream = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });
        Ok(Box::pin(stream))
    }
}
