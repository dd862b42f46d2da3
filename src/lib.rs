mod adapter;
mod cache;
mod error;
mod extractor;
mod fetcher;
#[cfg(feature = "logging")]
mod logging;
mod pipeline;
mod registry;
mod source;
mod utils;

pub use adapter::{
    handle_json, handle_request, BatchItem, ErrorBody, FilterBy, PreviewRequest, ResponseData,
    ResponseEnvelope, SourceRequest, Status,
};
pub use cache::{Cache, CacheEntry, DEFAULT_TTL};
pub use error::PreviewError;
pub use extractor::{extract_record, MetaTagScraper, MicrodataScraper};
pub use fetcher::{FetchResponse, Fetcher, FetcherConfig, PageFetcher};
#[cfg(feature = "logging")]
pub use logging::{log_error_card, log_preview_card, setup_logging, LogConfig, LogLevelGuard};
pub use pipeline::{CacheStrategy, PipelineConfig, PreviewPipeline, MAX_CONCURRENT_REQUESTS};
pub use registry::{Scraper, ScraperDescriptor, ScraperRegistry};
pub use source::{resolve_source, SourceFilter, SourceQuery};
pub use utils::{camel_case, normalize_url, truncate_str, NormalizedUrl};

use serde_json::{Map, Value};

/// Scraped preview data for one page: each scraper's name mapped to the
/// fragment it produced, in scraper order.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PreviewRecord(Map<String, Value>);

impl PreviewRecord {
    pub fn get(&self, scraper: &str) -> Option<&Value> {
        self.0.get(scraper)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, scraper: String, fragment: Value) {
        self.0.insert(scraper, fragment);
    }
}
