use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{
    error::TransportError,
    models::{
        AccessTokenRequest, AccessTokenResponse, AuthorizeRequest, AuthorizeResponse, Samples,
        SamplesRequest, Sensor, SensorsRequest,
    },
};

pub const DEFAULT_BASE_URL: &str = "https://api.sensorpush.com/api/v1";

/// The four SensorPush endpoints the client relies on.
///
/// Implementations perform exactly one request per call; retries, timeouts and
/// token handling are layered on top by [`crate::SensorPushClient`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn authorize(&self, request: &AuthorizeRequest)
        -> Result<AuthorizeResponse, TransportError>;

    async fn access_token(
        &self,
        request: &AccessTokenRequest,
    ) -> Result<AccessTokenResponse, TransportError>;

    async fn sensors(
        &self,
        access_token: &str,
        request: &SensorsRequest,
    ) -> Result<IndexMap<String, Sensor>, TransportError>;

    async fn samples(
        &self,
        access_token: &str,
        request: &SamplesRequest,
    ) -> Result<Samples, TransportError>;
}

/// [`Transport`] over HTTPS using a shared `reqwest` connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Reuse an existing client, e.g. one shared with the rest of the host process.
    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    async fn post<B, T>(
        &self,
        path: &str,
        access_token: Option<&str>,
        body: &B,
    ) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST SensorPush endpoint");

        let mut request = self
            .http
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(body);
        if let Some(token) = access_token {
            request = request.header(header::AUTHORIZATION, token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = error_body(response.text().await);
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Body of a failed response. A body that cannot be read is replaced by a
/// note saying so, so the status error still explains itself.
fn error_body(text: Result<String, reqwest::Error>) -> String {
    match text {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "failed to read error response body");
            format!("<failed to read response body: {e}>")
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn authorize(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<AuthorizeResponse, TransportError> {
        self.post("/oauth/authorize", None, request).await
    }

    async fn access_token(
        &self,
        request: &AccessTokenRequest,
    ) -> Result<AccessTokenResponse, TransportError> {
        self.post("/oauth/accesstoken", None, request).await
    }

    async fn sensors(
        &self,
        access_token: &str,
        request: &SensorsRequest,
    ) -> Result<IndexMap<String, Sensor>, TransportError> {
        self.post("/devices/sensors", Some(access_token), request).await
    }

    async fn samples(
        &self,
        access_token: &str,
        request: &SamplesRequest,
    ) -> Result<Samples, TransportError> {
        self.post("/samples", Some(access_token), request).await
    }
}
