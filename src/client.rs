use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::Stream;
use futures::stream::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS};
use crate::types::ChatCompletionRequest;

/// Default chat-completion endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Raw body chunks of a streaming response, in arrival order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Something that can open a streaming chat completion.
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Send `request` authenticated by `credential` and return the response body.
    ///
    /// Non-success statuses are returned as [`Error::Api`] carrying the status
    /// and the best-effort body text.
    async fn open_stream(
        &self,
        request: &ChatCompletionRequest,
        credential: &str,
    ) -> Result<ChunkStream>;
}

/// HTTP client for a chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: ReqwestClient,
    endpoint: Url,
    timeout: Duration,
}

impl ChatClient {
    /// Create a client for the default endpoint.
    pub fn new() -> Result<Self> {
        Self::with_options(None, None)
    }

    /// Create a new client with custom settings.
    ///
    /// `timeout` bounds connecting and waiting for the response headers; a
    /// streaming body may take as long as the server keeps sending.
    pub fn with_options(endpoint: Option<&str>, timeout: Option<Duration>) -> Result<Self> {
        let endpoint = Url::parse(endpoint.unwrap_or(DEFAULT_ENDPOINT))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::validation(
                format!("unsupported endpoint scheme '{}'", endpoint.scheme()),
                Some("endpoint".to_string()),
            ));
        }

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// The endpoint requests are sent to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The connect and response-header timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create the headers for a streaming request.
    fn request_headers(credential: &str) -> Result<HeaderMap> {
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
                Error::authentication("API key contains characters not allowed in a header")
            })?;
        authorization.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, authorization);
        Ok(headers)
    }

    /// Convert a non-success response into an [`Error::Api`].
    async fn process_error_response(response: Response) -> Error {
        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|val| val.to_str().ok())
            .map(String::from);

        // Best effort: a body that cannot be read is reported as empty.
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(error = %e, "failed to read error response body");
                String::new()
            }
        };

        Error::api(
            status.as_u16(),
            status.canonical_reason().map(String::from),
            body,
            request_id,
        )
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {e}"),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
        }
    }
}

#[async_trait::async_trait]
impl CompletionBackend for ChatClient {
    async fn open_stream(
        &self,
        request: &ChatCompletionRequest,
        credential: &str,
    ) -> Result<ChunkStream> {
        let headers = Self::request_headers(credential)?;
        CLIENT_REQUESTS.click();
        let started = Instant::now();
        tracing::debug!(
            endpoint = %self.endpoint,
            model = %request.model,
            messages = request.messages.len(),
            "opening chat completion stream"
        );

        let send = self
            .client
            .post(self.endpoint.clone())
            .headers(headers)
            .json(request)
            .send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                CLIENT_REQUEST_ERRORS.click();
                return Err(self.map_send_error(e));
            }
            Err(_) => {
                CLIENT_REQUEST_ERRORS.click();
                return Err(Error::timeout(
                    "no response headers before the deadline",
                    Some(self.timeout.as_secs_f64()),
                ));
            }
        };
        CLIENT_REQUEST_DURATION.add(started.elapsed().as_secs_f64());

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
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
