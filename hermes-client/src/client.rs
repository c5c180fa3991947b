//! Caller-side client: every request goes through the gateway and carries
//! this application's version header.

use hermes_core::config::ClientConfig;
use hermes_core::envelope::{CLIENT_VERSION_HEADER, ERROR_MESSAGE_HEADER, header_text};
use hermes_core::uri::expand_uri;
use http::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

const DEFAULT_ALIVE_PATH: &str = "/hermes/alive";

#[derive(Error, Debug)]
pub enum ClientError {
    /// The gateway answered with a non-2xx status. `message` is the relayed
    /// error message when the gateway sent one.
    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Transport(e) => e.status(),
            ClientError::Decode(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HermesClient {
    http: reqwest::Client,
    base_url: String,
    version: String,
    alive_path: String,
}

impl HermesClient {
    pub fn new(base_url: impl Into<String>, config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.connect_timeout() + config.read_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            version: config.version.clone(),
            alive_path: DEFAULT_ALIVE_PATH.to_string(),
        })
    }

    /// Override the gateway's own alive path.
    pub fn with_alive_path(mut self, path: impl Into<String>) -> Self {
        self.alive_path = path.into();
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` (with `{..}` placeholders filled from `vars`) and decode the
    /// JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, vars: &[String]) -> Result<T, ClientError> {
        let url = self.url(path, vars);
        let response = self
            .http
            .get(&url)
            .header(CLIENT_VERSION_HEADER, &self.version)
            .send()
            .await?;
        decode(response).await
    }

    /// POST `body` as JSON and decode the JSON response.
    pub async fn post<B, T>(&self, path: &str, body: &B, vars: &[String]) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path, vars);
        let response = self
            .http
            .post(&url)
            .header(CLIENT_VERSION_HEADER, &self.version)
            .json(body)
            .send()
            .await?;
        decode(response).await
    }

    /// Whether the gateway itself answers on its alive path.
    pub async fn is_gateway_alive(&self) -> bool {
        self.is_alive(&self.alive_path).await
    }

    /// Whether `alive_path` answers with a success status through the gateway.
    pub async fn is_alive(&self, alive_path: &str) -> bool {
        let url = self.url(alive_path, &[]);
        match self
            .http
            .get(&url)
            .header(CLIENT_VERSION_HEADER, &self.version)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url = %url, error = %e, "Alive check failed");
                false
            }
        }
    }

    fn url(&self, path: &str, vars: &[String]) -> String {
        let path = expand_uri(path, vars);
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let relayed = response
            .headers()
            .get(ERROR_MESSAGE_HEADER)
            .map(|v| header_text(v).into_owned());
        let message = match relayed {
            Some(m) => m,
            None => {
                let body = response.text().await.unwrap_or_default();
                match body.trim() {
                    "" => status.canonical_reason().unwrap_or("error").to_string(),
                    t => t.to_string(),
                }
            }
        };
        return Err(ClientError::Status { status, message });
    }

    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(serde_json::from_value(serde_json::Value::Null)?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}
