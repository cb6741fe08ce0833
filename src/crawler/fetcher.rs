//! HTTP downloader
//!
//! This module handles all HTTP requests for crawler runtimes, including:
//! - Building HTTP clients with proper user agent strings
//! - Applying the configured timeout and proxy
//! - Rejecting error statuses and oversized bodies
//! - Reporting the charset announced by the server

use crate::config::{DownloaderConfig, UserAgentConfig};
use crate::LoomError;
use reqwest::{header, Client, Method};
use std::time::Duration;
use tracing::trace;

/// A download request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    /// Overrides the client timeout for this request
    pub timeout: Option<Duration>,
    /// Overrides the configured body size limit
    pub max_len: Option<u64>,
}

impl HttpRequest {
    /// A GET request with the downloader defaults
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            timeout: None,
            max_len: None,
        }
    }
}

/// A successful download
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL after redirects
    pub url: String,
    pub status_code: u16,
    /// Decoded body text
    pub text: String,
    /// Charset from the Content-Type header, if any
    pub encoding: Option<String>,
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `downloader` - Timeout and proxy settings
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client (e.g. invalid proxy)
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    downloader: &DownloaderConfig,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(Duration::from_secs(downloader.timeout))
        .connect_timeout(Duration::from_secs(downloader.timeout.min(10)))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &downloader.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }

    builder.build()
}

/// Shared HTTP downloader
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    max_body_bytes: Option<u64>,
}

impl Downloader {
    pub fn new(
        user_agent: &UserAgentConfig,
        downloader: &DownloaderConfig,
    ) -> Result<Self, LoomError> {
        Ok(Self {
            client: build_http_client(user_agent, downloader)?,
            max_body_bytes: downloader.max_body_bytes,
        })
    }

    /// Downloads a URL
    ///
    /// Statuses of 400 and above, transport failures and bodies over the size
    /// limit are errors.
    pub async fn download(&self, request: &HttpRequest) -> Result<HttpResponse, LoomError> {
        let limit = request.max_len.or(self.max_body_bytes);

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.as_str());
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|source| LoomError::Http {
            url: request.url.clone(),
            source,
        })?;

        let status = response.status();
        let final_url = response.url().to_string();
        trace!(url = %request.url, status = status.as_u16(), "Downloaded");

        if status.is_client_error() || status.is_server_error() {
            return Err(LoomError::HttpStatus {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        if let (Some(limit), Some(length)) = (limit, response.content_length()) {
            if length > limit {
                return Err(LoomError::BodyTooLarge {
                    url: request.url.clone(),
                    limit,
                });
            }
        }

        let encoding = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset);

        let text = response.text().await.map_err(|source| LoomError::Http {
            url: request.url.clone(),
            source,
        })?;

        if let Some(limit) = limit {
            if text.len() as u64 > limit {
                return Err(LoomError::BodyTooLarge {
                    url: request.url.clone(),
                    limit,
                });
            }
        }

        Ok(HttpResponse {
            url: final_url,
            status_code: status.as_u16(),
            text,
            encoding,
        })
    }
}

/// Extracts the charset parameter of a Content-Type value
fn charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_ascii_lowercase())
        } else {
            None
        }
    })
}
