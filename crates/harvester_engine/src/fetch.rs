use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;

use engine_logging::engine_info;

use crate::validated_url::ValidatedUrl;
use crate::{FailureKind, FetchError};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// A successful response whose body has not been read yet.
pub struct FeedResponse {
    pub status: u16,
    pub body: BodyStream,
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Issues a GET. Credentials are attached only when `url` is secure.
    async fn get(
        &self,
        url: &ValidatedUrl,
        credentials: Option<&Credentials>,
    ) -> Result<FeedResponse, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn get(
        &self,
        url: &ValidatedUrl,
        credentials: Option<&Credentials>,
    ) -> Result<FeedResponse, FetchError> {
        let mut request = self.client.get(url.as_url().clone());
        if let Some(credentials) = credentials.filter(|_| url.is_secure()) {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        engine_info!("GET {} : {}", url, status.as_u16());

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::new(
                FailureKind::Unauthorized(status.as_u16()),
                status.to_string(),
            ));
        }
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let body = response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other));
        Ok(FeedResponse {
            status: status.as_u16(),
            body: Box::pin(body),
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_builder() {
        return FetchError::new(FailureKind::InvalidUrl, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
