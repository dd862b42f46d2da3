use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreviewError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid scraper configuration: {0}")]
    Configuration(String),

    #[error("Failed to fetch {url}: {message}")]
    FetchError {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Request timeout: {url}")]
    TimeoutError { url: String },

    #[error("Scraper '{scraper}' failed: {message}")]
    ExtractError { scraper: String, message: String },

    #[error("Failed to resolve source {url}: {message}")]
    SourceResolution {
        url: String,
        status: Option<u16>,
        message: String,
    },
}

impl PreviewError {
    pub fn log(&self) {
        match self {
            PreviewError::InvalidUrl(e) => {
                warn!(error = %e, "URL normalization failed");
            }
            PreviewError::InvalidRequest(e) => {
                warn!(error = %e, "Malformed preview request");
            }
            PreviewError::Configuration(e) => {
                warn!(error = %e, "Scraper descriptor rejected");
            }
            PreviewError::FetchError {
                url,
                status,
                message,
            } => {
                error!(url = %url, status = ?status, error = %message, "Content fetch failed");
            }
            PreviewError::TimeoutError { url } => {
                warn!(url = %url, "Request timed out");
            }
            PreviewError::ExtractError { scraper, message } => {
                warn!(scraper = %scraper, error = %message, "Scraper failed");
            }
            PreviewError::SourceResolution {
                url,
                status,
                message,
            } => {
                error!(url = %url, status = ?status, error = %message, "Source query failed");
            }
        }
    }

    /// HTTP status code reported by the upstream, if the failure got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            PreviewError::FetchError { status, .. }
            | PreviewError::SourceResolution { status, .. } => *status,
            _ => None,
        }
    }

    /// Caller-facing message in the `"<status>: <url>, <status text>"` shape.
    /// The status prefix is dropped when the request never got a response.
    pub fn envelope_message(&self) -> String {
        match self {
            PreviewError::FetchError {
                url,
                status,
                message,
            }
            | PreviewError::SourceResolution {
                url,
                status,
                message,
            } => match status {
                Some(code) => format!("{code}: {url}, {message}"),
                None => format!("{url}, {message}"),
            },
            PreviewError::TimeoutError { url } => format!("{url}, request timed out"),
            other => other.to_string(),
        }
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return PreviewError::TimeoutError {
                url: url.to_string(),
            };
        }
        PreviewError::FetchError {
            url: url.to_string(),
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    /// Re-labels a fetch failure as a failed source query.
    pub(crate) fn into_source_error(self) -> Self {
        match self {
            PreviewError::FetchError {
                url,
                status,
                message,
            } => PreviewError::SourceResolution {
                url,
                status,
                message,
            },
            PreviewError::TimeoutError { url } => PreviewError::SourceResolution {
                url,
                status: None,
                message: "request timed out".to_string(),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_message_with_status() {
        let err = PreviewError::FetchError {
            url: "https://example.com/missing".into(),
            status: Some(404),
            message: "Not Found".into(),
        };
        assert_eq!(
            err.envelope_message(),
            "404: https://example.com/missing, Not Found"
        );
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_envelope_message_without_status() {
        let err = PreviewError::FetchError {
            url: "https://nowhere.invalid/".into(),
            status: None,
            message: "dns error".into(),
        };
        assert_eq!(err.envelope_message(), "https://nowhere.invalid/, dns error");
    }

    #[test]
    fn test_source_relabel() {
        let err = PreviewError::TimeoutError {
            url: "https://index.example.com/api".into(),
        }
        .into_source_error();
        assert!(matches!(err, PreviewError::SourceResolution { status: None, .. }));
    }
}
