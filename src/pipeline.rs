use crate::cache::{Cache, DEFAULT_TTL};
use crate::extractor::extract_record;
use crate::fetcher::{Fetcher, PageFetcher};
use crate::registry::{ScraperDescriptor, ScraperRegistry};
use crate::source::{resolve_source, SourceQuery};
use crate::utils::{normalize_url, NormalizedUrl};
use crate::{PreviewError, PreviewRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

pub const MAX_CONCURRENT_REQUESTS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    #[default]
    UseCache,
    NoCache,
}

/// Fetch, scrape and cache orchestration.
///
/// The pipeline owns no state of its own beyond handles to the shared cache,
/// fetcher and scraper registry, so clones are cheap and all see the same
/// cache.
#[derive(Clone)]
pub struct PreviewPipeline {
    registry: Arc<ScraperRegistry>,
    cache: Cache,
    fetcher: Arc<dyn PageFetcher>,
    // Bounds outbound fetches across every request sharing this pipeline
    semaphore: Arc<Semaphore>,
    cache_ttl: Duration,
    cache_strategy: CacheStrategy,
    single_flight: bool,
}

impl Default for PreviewPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewPipeline {
    pub fn new() -> Self {
        Self::new_with_config(PipelineConfig::default())
    }

    pub fn no_cache() -> Self {
        Self::new_with_config(PipelineConfig::default().with_cache_strategy(CacheStrategy::NoCache))
    }

    pub fn new_with_config(config: PipelineConfig) -> Self {
        Self::from_parts(Arc::new(Fetcher::new()), Cache::new(config.cache_capacity), config)
    }

    /// Assembles a pipeline over caller-supplied collaborators. The registry
    /// is built from the defaults plus `config.add_scrapers`, minus
    /// `config.remove_scrapers`.
    pub fn from_parts(fetcher: Arc<dyn PageFetcher>, cache: Cache, config: PipelineConfig) -> Self {
        let registry = ScraperRegistry::from_config(config.add_scrapers, &config.remove_scrapers);
        debug!(scrapers = ?registry.names(), "Initializing PreviewPipeline");

        Self {
            registry: Arc::new(registry),
            cache,
            fetcher,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            cache_ttl: config.cache_ttl,
            cache_strategy: config.cache_strategy,
            single_flight: config.single_flight,
        }
    }

    pub fn registry(&self) -> &ScraperRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Preview for a single URL, served from cache within the TTL window.
    #[instrument(level = "debug", skip(self))]
    pub async fn preview(&self, url: &str) -> Result<PreviewRecord, PreviewError> {
        let result = self.preview_inner(url).await;
        if let Err(e) = &result {
            e.log();
        }
        result
    }

    /// Previews every URL concurrently. The output is positional: entry `i`
    /// belongs to `urls[i]`, and one failure does not affect the others.
    #[instrument(level = "debug", skip_all, fields(count = urls.len()))]
    pub async fn preview_batch<S>(&self, urls: &[S]) -> Vec<Result<PreviewRecord, PreviewError>>
    where
        S: AsRef<str> + Sync,
    {
        let futures: Vec<_> = urls.iter().map(|url| self.preview(url.as_ref())).collect();
        futures::future::join_all(futures).await
    }

    /// Resolves `query` against its content index, then previews every URL it
    /// yields. A failed index query fails the whole call; per-URL failures are
    /// reported positionally.
    #[instrument(level = "debug", skip(self))]
    pub async fn preview_source(
        &self,
        query: &SourceQuery,
    ) -> Result<Vec<Result<PreviewRecord, PreviewError>>, PreviewError> {
        let urls = resolve_source(self.fetcher.as_ref(), query)
            .await
            .inspect_err(PreviewError::log)?;
        Ok(self.preview_batch(&urls).await)
    }

    async fn preview_inner(&self, raw: &str) -> Result<PreviewRecord, PreviewError> {
        let url = normalize_url(raw)?;

        match self.cache_strategy {
            CacheStrategy::NoCache => self.fetch_and_extract(url).await,
            CacheStrategy::UseCache if self.single_flight => {
                let key = url.to_string();
                let this = self.clone();
                self.cache
                    .get_or_fetch(&key, self.cache_ttl, async move {
                        this.fetch_and_extract(url).await
                    })
                    .await
            }
            CacheStrategy::UseCache => {
                // Unsynchronized lookup; concurrent misses may each fetch.
                if let Some(cached) = self.cache.get(url.as_str()).await {
                    debug!(url = %url, "Cache hit");
                    return Ok(cached);
                }
                let key = url.to_string();
                let record = self.fetch_and_extract(url).await?;
                self.cache.set(key, record.clone(), self.cache_ttl).await;
                Ok(record)
            }
        }
    }

    async fn fetch_and_extract(&self, url: NormalizedUrl) -> Result<PreviewRecord, PreviewError> {
        let response = {
            let _permit = self.semaphore.acquire().await.map_err(|_| {
                PreviewError::FetchError {
                    url: url.to_string(),
                    status: None,
                    message: "fetch limiter closed".to_string(),
                }
            })?;
            self.fetcher.fetch(&url).await?
        };

        Ok(extract_record(&self.registry, &response.body))
    }
}

/// Construction options for [`PreviewPipeline::new_with_config`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub cache_strategy: CacheStrategy,
    pub max_concurrent_requests: usize,
    /// Coalesce concurrent misses on the same URL into one fetch.
    pub single_flight: bool,
    /// Appended after the built-in scrapers; malformed entries are skipped.
    pub add_scrapers: Vec<ScraperDescriptor>,
    /// Names dropped from the built-in plus added scrapers.
    pub remove_scrapers: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            cache_ttl: DEFAULT_TTL,
            cache_strategy: CacheStrategy::UseCache,
            max_concurrent_requests: MAX_CONCURRENT_REQUESTS,
            single_flight: true,
            add_scrapers: Vec::new(),
            remove_scrapers: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    pub fn with_cache_strategy(mut self, cache_strategy: CacheStrategy) -> Self {
        self.cache_strategy = cache_strategy;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max_concurrent_requests: usize) -> Self {
        self.max_concurrent_requests = max_concurrent_requests;
        self
    }

    pub fn with_single_flight(mut self, single_flight: bool) -> Self {
        self.single_flight = single_flight;
        self
    }

    pub fn add_scraper(mut self, descriptor: ScraperDescriptor) -> Self {
        self.add_scrapers.push(descriptor);
        self
    }

    pub fn remove_scraper(mut self, name: impl Into<String>) -> Self {
        self.remove_scrapers.push(name.into());
        self
    }
}
