use crate::utils::NormalizedUrl;
use crate::PreviewError;
use async_trait::async_trait;
use reqwest::{header::HeaderMap, Client};
use std::time::Duration;
use tracing::{debug, error, instrument};

/// A successful (2xx) upstream response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// Location after redirects were followed.
    pub final_url: String,
    pub body: String,
}

/// Outbound GET used by the pipeline and by source resolution.
///
/// Transport failures and non-2xx statuses are both reported as errors that
/// carry the target URL, the status code when one was received, and the
/// upstream status text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &NormalizedUrl) -> Result<FetchResponse, PreviewError>;
}

#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher {
    pub fn new() -> Self {
        debug!("Fetcher initialized with default configuration");
        Self::new_with_config(FetcherConfig::default())
    }

    /// Builds a fetcher with custom client settings.
    ///
    /// Falls back to reqwest's default client if the builder rejects the
    /// configuration (for example a TLS backend failing to initialize).
    pub fn new_with_config(config: FetcherConfig) -> Self {
        let mut client_builder = Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(10)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));

        if let Some(headers) = config.headers {
            client_builder = client_builder.default_headers(headers);
        }

        let client = client_builder.build().unwrap_or_else(|e| {
            error!(error = %e, "Failed to create HTTP client with custom config, using defaults");
            Client::new()
        });

        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for Fetcher {
    #[instrument(level = "debug", skip_all, fields(url = %url), err)]
    async fn fetch(&self, url: &NormalizedUrl) -> Result<FetchResponse, PreviewError> {
        debug!("Starting fetch request");

        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to send request");
            PreviewError::from_reqwest(url.as_str(), e)
        })?;

        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() {
            return Err(PreviewError::FetchError {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("Unknown status")
                    .to_string(),
            });
        }

        let body = response.text().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to read response body");
            PreviewError::from_reqwest(url.as_str(), e)
        })?;

        debug!(
            status = status.as_u16(),
            final_url = %final_url,
            content_length = body.len(),
            "Successfully fetched page"
        );

        Ok(FetchResponse {
            status: status.as_u16(),
            final_url,
            body,
        })
    }
}

/// Client settings for [`Fetcher::new_with_config`].
///
/// # Examples
/// ```ignore
/// let fetcher = Fetcher::new_with_config(FetcherConfig {
///     user_agent: "my-custom-agent/1.0".to_string(),
///     timeout: Duration::from_secs(20),
///     ..FetcherConfig::default()
/// });
/// ```
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    /// Upper bound for the whole request, body included.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_redirects: usize,
    pub headers: Option<HeaderMap>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("link_preview/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            max_redirects: 10,
            headers: None,
        }
    }
}

impl FetcherConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }
}
