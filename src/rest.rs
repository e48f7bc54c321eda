use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_REDIRECTS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// The request never produced a status line.
#[derive(Debug, Error)]
#[error("HTTP request failed: {0}")]
pub struct TransportError(pub String);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base URL '{0}' (expected http:// or https://)")]
    InvalidBaseUrl(String),
}

pub trait Delivery {
    fn post(&mut self, endpoint: &str, json: &str) -> Result<HttpResponse, TransportError>;
}

pub struct RestClient {
    agent: ureq::Agent,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: &str, timeout: Duration, connect_timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidBaseUrl(base_url.to_string()));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .timeout_connect(connect_timeout)
            .redirects(MAX_REDIRECTS)
            .build();

        Ok(RestClient { agent, base_url: base_url.to_string() })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.is_empty() {
            return self.base_url.clone();
        }
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

impl Delivery for RestClient {
    fn post(&mut self, endpoint: &str, json: &str) -> Result<HttpResponse, TransportError> {
        let url = self.url_for(endpoint);

        let result = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .send_string(json);

        // ureq reports 4xx/5xx as errors, but the exchange did complete.
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => return Err(TransportError(transport.to_string())),
        };

        let status = response.status();
        let body = response.into_string().unwrap_or_default();
        debug!(%url, status, "POST completed");
        Ok(HttpResponse { status, body })
    }
}

impl Drop for RestClient {
    fn drop(&mut self) {
        debug!(base_url = %self.base_url, "REST client released");
    }
}
