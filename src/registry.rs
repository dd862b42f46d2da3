use crate::extractor::{MetaTagScraper, MicrodataScraper};
use crate::PreviewError;
use scraper::Html;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A single extraction strategy.
///
/// Scrapers get the parsed document plus the raw response body and return a
/// JSON fragment. Closures with the matching signature implement this trait.
pub trait Scraper: Send + Sync {
    fn scrape(&self, document: &Html, body: &str) -> Result<Value, PreviewError>;

    /// Fragment used in place of the scraper's output when it fails.
    fn fallback(&self) -> Value {
        Value::Null
    }
}

impl<F> Scraper for F
where
    F: Fn(&Html, &str) -> Result<Value, PreviewError> + Send + Sync,
{
    fn scrape(&self, document: &Html, body: &str) -> Result<Value, PreviewError> {
        self(document, body)
    }
}

/// A named scraper. The name becomes the key of the scraper's fragment in a
/// [`PreviewRecord`](crate::PreviewRecord).
#[derive(Clone)]
pub struct ScraperDescriptor {
    name: String,
    scraper: Arc<dyn Scraper>,
}

impl ScraperDescriptor {
    pub fn new(name: impl Into<String>, scraper: impl Scraper + 'static) -> Self {
        Self {
            name: name.into(),
            scraper: Arc::new(scraper),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scraper(&self) -> &dyn Scraper {
        self.scraper.as_ref()
    }

    /// Checks the descriptor on its own, without regard to other registrations.
    pub fn validate(&self) -> Result<(), PreviewError> {
        if self.name.trim().is_empty() {
            return Err(PreviewError::Configuration(
                "scraper name must be a non-empty string".to_string(),
            ));
        }
        if self.name.trim() != self.name || self.name.chars().any(char::is_control) {
            return Err(PreviewError::Configuration(format!(
                "scraper name '{}' contains surrounding whitespace or control characters",
                self.name.escape_debug()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ScraperDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScraperDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ordered set of scrapers run against every fetched page.
///
/// Built once per deployment and handed to the pipeline; it is not mutated
/// while requests are in flight.
#[derive(Clone, Default, Debug)]
pub struct ScraperRegistry {
    descriptors: Vec<ScraperDescriptor>,
}

impl ScraperRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `metaTags` and `schema.org` scrapers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for descriptor in default_scrapers() {
            registry.register(descriptor).ok();
        }
        registry
    }

    /// Defaults, then `add` appended in order, then every name in `remove`
    /// dropped. Malformed additions are logged and skipped.
    pub fn from_config<I, S>(add: Vec<ScraperDescriptor>, remove: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::with_defaults();
        for descriptor in add {
            registry.register(descriptor).ok();
        }
        registry.unregister(remove);
        registry
    }

    /// Appends `descriptor` unless it is malformed or its name is taken.
    ///
    /// A rejected descriptor is logged as a warning and leaves the registry
    /// untouched; the returned error is informational.
    pub fn register(&mut self, descriptor: ScraperDescriptor) -> Result<(), PreviewError> {
        let verdict = descriptor.validate().and_then(|_| {
            if self.contains(descriptor.name()) {
                Err(PreviewError::Configuration(format!(
                    "a scraper named '{}' is already registered",
                    descriptor.name()
                )))
            } else {
                Ok(())
            }
        });

        match verdict {
            Ok(()) => {
                debug!(scraper = %descriptor.name(), "Registered scraper");
                self.descriptors.push(descriptor);
                Ok(())
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "A link preview scraper was malformed and has been skipped. \
                     Scrapers need a unique, non-empty name and a scrape function"
                );
                Err(e)
            }
        }
    }

    /// Removes every scraper whose name is in `names`. Unknown names are ignored.
    pub fn unregister<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: HashSet<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        if names.is_empty() {
            return;
        }
        self.descriptors.retain(|d| {
            let keep = !names.contains(d.name());
            if !keep {
                debug!(scraper = %d.name(), "Removed scraper");
            }
            keep
        });
    }

    /// Active scrapers in registration order.
    pub fn list(&self) -> &[ScraperDescriptor] {
        &self.descriptors
    }

    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.iter().any(|d| d.name() == name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

fn default_scrapers() -> Vec<ScraperDescriptor> {
    vec![
        ScraperDescriptor::new(MetaTagScraper::NAME, MetaTagScraper),
        ScraperDescriptor::new(MicrodataScraper::NAME, MicrodataScraper),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(value: Value) -> impl Scraper {
        move |_: &Html, _: &str| -> Result<Value, PreviewError> { Ok(value.clone()) }
    }

    #[test]
    fn test_defaults_in_order() {
        let registry = ScraperRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["metaTags", "schema.org"]);
    }

    #[test]
    fn test_register_appends_after_defaults() {
        let mut registry = ScraperRegistry::with_defaults();
        registry
            .register(ScraperDescriptor::new("title", constant(json!("t"))))
            .unwrap();
        assert_eq!(registry.names(), vec!["metaTags", "schema.org", "title"]);
    }

    #[test]
    fn test_malformed_descriptors_rejected() {
        let mut registry = ScraperRegistry::with_defaults();
        let before = registry.names().join(",");

        assert!(matches!(
            registry.register(ScraperDescriptor::new("", constant(json!(1)))),
            Err(PreviewError::Configuration(_))
        ));
        assert!(registry
            .register(ScraperDescriptor::new("   ", constant(json!(1))))
            .is_err());
        assert!(registry
            .register(ScraperDescriptor::new(" padded ", constant(json!(1))))
            .is_err());
        assert!(registry
            .register(ScraperDescriptor::new("metaTags", constant(json!(1))))
            .is_err());

        assert_eq!(registry.names().join(","), before);
    }

    #[test]
    fn test_unregister() {
        let mut registry = ScraperRegistry::new();
        registry
            .register(ScraperDescriptor::new("a", constant(json!(1))))
            .unwrap();
        registry
            .register(ScraperDescriptor::new("b", constant(json!(2))))
            .unwrap();

        registry.unregister(["a", "missing"]);

        assert_eq!(registry.names(), vec!["b"]);
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_from_config() {
        let registry = ScraperRegistry::from_config(
            vec![
                ScraperDescriptor::new("extra", constant(json!({}))),
                ScraperDescriptor::new("", constant(json!({}))),
            ],
            ["schema.org"],
        );
        assert_eq!(registry.names(), vec!["metaTags", "extra"]);
    }
}
