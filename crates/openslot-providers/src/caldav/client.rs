//! HTTP client for CalDAV operations.
//!
//! Thin wrapper over reqwest handling basic authentication, the PROPFIND
//! and REPORT methods, and status-to-error mapping. Every request carries
//! the configured bounded timeout.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, Method, Response, StatusCode};
use tracing::trace;

use crate::error::{ProviderError, ProviderResult};

use super::config::CalDavConfig;

/// HTTP client for CalDAV operations.
pub struct CalDavClient {
    client: Client,
    config: CalDavConfig,
}

impl CalDavClient {
    /// Creates a new CalDAV client with the given configuration.
    pub fn new(config: CalDavConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Performs a PROPFIND request (calendar discovery).
    pub async fn propfind(&self, url: &str, body: &str, depth: u8) -> ProviderResult<String> {
        self.request("PROPFIND", url, body, depth).await
    }

    /// Performs a REPORT request (calendar-query).
    pub async fn report(&self, url: &str, body: &str) -> ProviderResult<String> {
        self.request("REPORT", url, body, 1).await
    }

    async fn request(&self, method: &str, url: &str, body: &str, depth: u8) -> ProviderResult<String> {
        let http_method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ProviderError::internal(format!("invalid HTTP method: {method}")))?;

        let mut request = self
            .client
            .request(http_method, url)
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Depth", depth.to_string())
            .body(body.to_string());

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            let encoded = BASE64.encode(format!("{username}:{password}"));
            request = request.header("Authorization", format!("Basic {encoded}"));
        }

        trace!(method = %method, url = %url, "sending CalDAV request");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::timeout("request timed out")
            } else if e.is_connect() {
                ProviderError::network(format!("connection failed: {e}"))
            } else {
                ProviderError::network(format!("request failed: {e}"))
            }
        })?;

        self.handle_response(response).await
    }

    /// Maps the response status and extracts the body.
    async fn handle_response(&self, response: Response) -> ProviderResult<String> {
        let status = response.status();
        trace!(status = %status, "received CalDAV response");

        match status {
            StatusCode::OK | StatusCode::MULTI_STATUS => response
                .text()
                .await
                .map_err(|e| ProviderError::network(format!("failed to read response: {e}"))),
            StatusCode::UNAUTHORIZED => Err(ProviderError::authentication(
                "authentication failed: invalid credentials",
            )),
            StatusCode::FORBIDDEN => Err(ProviderError::authorization("access denied to calendar")),
            StatusCode::NOT_FOUND => Err(ProviderError::not_found("calendar or resource not found")),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(ProviderError::rate_limited("too many requests to server"))
            }
            s if s.is_server_error() => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::server(format!("server error ({s}): {body}")))
            }
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::invalid_response(format!(
                    "unexpected status {s}: {body}"
                )))
            }
        }
    }

    /// Returns the base URL from the configuration.
    pub fn base_url(&self) -> &str {
        self.config.url_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn client_creation() {
        let config = CalDavConfig::new("https://caldav.example.com/")
            .unwrap()
            .with_credentials("user", "pass")
            .with_timeout(Duration::from_secs(10));
        assert!(CalDavClient::new(config).is_ok());
    }

    #[test]
    fn client_base_url() {
        let config = CalDavConfig::new("https://caldav.example.com/calendars/").unwrap();
        let client = CalDavClient::new(config).unwrap();
        assert_eq!(client.base_url(), "https://caldav.example.com/calendars/");
    }
}
