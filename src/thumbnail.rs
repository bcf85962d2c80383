//! Thumbnail retrieval over HTTP.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

const USER_AGENT: &str = concat!("thumbsearch/", env!("CARGO_PKG_VERSION"));

/// Why a thumbnail could not be retrieved.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The thumbnail URL does not parse.
    #[error("invalid thumbnail url {url:?}: {source}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Parser failure.
        source: url::ParseError,
    },
    /// Connection, TLS, timeout or body read failure.
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        source: reqwest::Error,
    },
    /// The host answered with a non-success status.
    #[error("{url} returned {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status.
        status: StatusCode,
    },
    /// The response body was empty.
    #[error("{url} returned an empty body")]
    Empty {
        /// Requested URL.
        url: String,
    },
    /// The payload is not a decodable image.
    #[error("{url} did not return a readable image: {source}")]
    InvalidImage {
        /// Requested URL.
        url: String,
        /// Decoder failure.
        source: image::ImageError,
    },
}

/// Resolves a thumbnail URL to raw image bytes. One attempt per call.
pub trait ThumbnailFetcher: Send + Sync {
    /// Downloads and validates the image at `url`.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Blocking `reqwest` fetcher.
#[derive(Clone)]
pub struct HttpThumbnailFetcher {
    client: Client,
}

impl HttpThumbnailFetcher {
    /// Builds a fetcher with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

impl ThumbnailFetcher for HttpThumbnailFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let parsed = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let response = self.client.get(parsed).send().map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let body = response.bytes().map_err(transport)?;
        validate_image(url, &body)?;
        Ok(body.to_vec())
    }
}

/// Checks that `bytes` decode as an image in a supported format.
pub fn validate_image(url: &str, bytes: &[u8]) -> Result<(), FetchError> {
    if bytes.is_empty() {
        return Err(FetchError::Empty {
            url: url.to_string(),
        });
    }
    image::load_from_memory(bytes)
        .map(|_| ())
        .map_err(|source| FetchError::InvalidImage {
            url: url.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn accepts_real_image_bytes() {
        validate_image("mem://ok", &tiny_png()).expect("png accepted");
    }

    #[test]
    fn rejects_empty_and_garbage_payloads() {
        assert!(matches!(
            validate_image("mem://empty", &[]),
            Err(FetchError::Empty { .. })
        ));
        assert!(matches!(
            validate_image("mem://html", b"<html>not found</html>"),
            Err(FetchError::InvalidImage { .. })
        ));
    }
}
