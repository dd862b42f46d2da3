use crate::fetcher::PageFetcher;
use crate::utils::normalize_url;
use crate::PreviewError;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

/// How a content-index query narrows its results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SourceFilter {
    #[default]
    None,
    /// Sent as `tag=<tag>`.
    Tag(String),
    /// Sent as `<name>=<value>`.
    Join { name: String, value: String },
}

/// A query against an external content index whose results supply the URLs
/// to preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    pub source_url: String,
    pub filter: SourceFilter,
    pub limit: Option<u32>,
}

impl SourceQuery {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            filter: SourceFilter::None,
            limit: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.filter = SourceFilter::Tag(tag.into());
        self
    }

    pub fn with_join(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter = SourceFilter::Join {
            name: name.into(),
            value: value.into(),
        };
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The index endpoint with the filter and `perPage` appended to any
    /// query string the source URL already carries.
    pub fn index_url(&self) -> Result<Url, PreviewError> {
        let mut url = Url::parse(normalize_url(&self.source_url)?.as_str())
            .map_err(|e| PreviewError::InvalidUrl(format!("{}: {e}", self.source_url)))?;

        {
            let mut pairs = url.query_pairs_mut();
            match &self.filter {
                SourceFilter::None => {}
                SourceFilter::Tag(tag) => {
                    pairs.append_pair("tag", tag);
                }
                SourceFilter::Join { name, value } => {
                    pairs.append_pair(name, value);
                }
            }
            if let Some(limit) = self.limit {
                pairs.append_pair("perPage", &limit.to_string());
            }
        }

        // An empty serializer leaves a dangling '?'.
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    results: Vec<IndexItem>,
}

#[derive(Debug, Deserialize)]
struct IndexItem {
    #[serde(rename = "_url")]
    url: Option<String>,
}

/// Queries the content index and returns the `_url` of each result, in
/// response order.
///
/// Relative `_url` values are resolved against the index URL. Results without
/// a `_url` are skipped. Every failure is reported as
/// [`PreviewError::SourceResolution`].
#[instrument(level = "debug", skip(fetcher), err)]
pub async fn resolve_source(
    fetcher: &dyn PageFetcher,
    query: &SourceQuery,
) -> Result<Vec<String>, PreviewError> {
    let source_error = |message: String| PreviewError::SourceResolution {
        url: query.source_url.clone(),
        status: None,
        message,
    };

    let index_url = query.index_url().map_err(|e| source_error(e.to_string()))?;
    let target = normalize_url(index_url.as_str()).map_err(|e| source_error(e.to_string()))?;
    debug!(index_url = %target, "Querying content index");

    let response = fetcher
        .fetch(&target)
        .await
        .map_err(PreviewError::into_source_error)?;

    let index: IndexResponse = serde_json::from_str(&response.body).map_err(|e| {
        PreviewError::SourceResolution {
            url: target.to_string(),
            status: Some(response.status),
            message: format!("Invalid index response: {e}"),
        }
    })?;

    let base = Url::parse(&response.final_url).unwrap_or(index_url);
    let mut urls: Vec<String> = index
        .results
        .into_iter()
        .filter_map(|item| match item.url {
            Some(raw) => match base.join(&raw) {
                Ok(resolved) => Some(resolved.to_string()),
                Err(e) => {
                    warn!(url = %raw, error = %e, "Skipping unresolvable index result");
                    None
                }
            },
            None => {
                debug!("Skipping index result without _url");
                None
            }
        })
        .collect();

    if let Some(limit) = query.limit {
        urls.truncate(limit as usize);
    }

    debug!(count = urls.len(), "Resolved source query");
    Ok(urls)
}
