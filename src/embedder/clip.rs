//! HTTP client for a CLIP-style inference server.

use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{check_vector, EmbedError, Embedder};

/// Blocking client that embeds images and text through one model server.
///
/// The server exposes `POST {base}/embed/image` taking `{"image": <base64>}`
/// and `POST {base}/embed/text` taking `{"text": ...}`. Both answer with
/// either `{"embedding": [...]}` or `{"data": [{"embedding": [...]}]}`.
#[derive(Clone)]
pub struct ClipHttpEmbedder {
    client: Client,
    image_endpoint: String,
    text_endpoint: String,
    dimensions: Option<usize>,
    max_retries: usize,
}

impl ClipHttpEmbedder {
    /// Builds a new client.
    ///
    /// # Arguments
    /// * `base_url` - Server root, e.g. `http://127.0.0.1:8000`
    /// * `dimensions` - Expected vector length; checked on every response when set
    /// * `timeout` - Per-request timeout
    /// * `max_retries` - Total attempts for rate limits and transient errors
    pub fn new(
        base_url: &str,
        dimensions: Option<usize>,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self, EmbedError> {
        let parsed = Url::parse(base_url)
            .map_err(|err| EmbedError::InvalidEndpoint(format!("{base_url:?}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(EmbedError::InvalidEndpoint(format!(
                "expected an http(s) URL, got {base_url:?}"
            )));
        }
        let base = base_url.trim_end_matches('/');
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            image_endpoint: format!("{base}/embed/image"),
            text_endpoint: format!("{base}/embed/text"),
            dimensions,
            max_retries: max_retries.max(1),
        })
    }

    /// Expected vector length, if configured.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    fn post<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<Vec<f32>, EmbedError> {
        let mut attempt = 0usize;
        loop {
            match self.client.post(endpoint).json(body).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbedResponse = resp.json()?;
                        let vector = parsed.into_vector()?;
                        check_vector(&vector, self.dimensions)?;
                        return Ok(vector);
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        debug!(%status, attempt, endpoint, "retrying embedding request");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(EmbedError::Status { status, body });
                }
                Err(err) => {
                    if is_retryable(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        debug!(error = %err, attempt, endpoint, "retrying embedding request");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

impl Embedder for ClipHttpEmbedder {
    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError> {
        let request = ImageRequest {
            image: STANDARD.encode(bytes),
        };
        self.post(&self.image_endpoint, &request)
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.post(&self.text_endpoint, &TextRequest { text })
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(250 * (1 << capped))
}

#[derive(Serialize)]
struct ImageRequest {
    image: String,
}

#[derive(Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

impl EmbedResponse {
    fn into_vector(self) -> Result<Vec<f32>, EmbedError> {
        if let Some(vector) = self.embedding {
            return Ok(vector);
        }
        let mut data = self.data;
        match data.len() {
            1 => Ok(data.remove(0).embedding),
            0 => Err(EmbedError::InvalidResponse(
                "response missing embedding payload".into(),
            )),
            n => Err(EmbedError::InvalidResponse(format!(
                "expected 1 embedding, got {n}"
            ))),
        }
    }
}
