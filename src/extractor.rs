use crate::registry::{Scraper, ScraperRegistry};
use crate::utils::camel_case;
use crate::{PreviewError, PreviewRecord};
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, instrument};

/// Runs every registered scraper against `body` and collects the fragments
/// under each scraper's name, in registry order.
///
/// A scraper that errors or panics contributes its fallback fragment instead;
/// the remaining scrapers still run.
#[instrument(level = "debug", skip_all, fields(scrapers = registry.len(), body_len = body.len()))]
pub fn extract_record(registry: &ScraperRegistry, body: &str) -> PreviewRecord {
    let document = Html::parse_document(body);
    let mut record = PreviewRecord::default();

    for descriptor in registry.list() {
        let scraper = descriptor.scraper();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| scraper.scrape(&document, body)))
            .unwrap_or_else(|payload| {
                Err(PreviewError::ExtractError {
                    scraper: descriptor.name().to_string(),
                    message: panic_message(payload.as_ref()),
                })
            });

        let fragment = match outcome {
            Ok(fragment) => fragment,
            Err(e) => {
                let e = match e {
                    PreviewError::ExtractError { .. } => e,
                    other => PreviewError::ExtractError {
                        scraper: descriptor.name().to_string(),
                        message: other.to_string(),
                    },
                };
                e.log();
                scraper.fallback()
            }
        };

        record.insert(descriptor.name().to_string(), fragment);
    }

    debug!(fragments = record.len(), "Extraction finished");
    record
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "scraper panicked".to_string()
    }
}

fn selector(css: &str) -> Result<Selector, PreviewError> {
    Selector::parse(css).map_err(|e| PreviewError::ExtractError {
        scraper: "selector".to_string(),
        message: format!("Invalid selector '{css}': {e:?}"),
    })
}

/// Captures every `<head><meta property=...>` as `camelCasedProperty -> content`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaTagScraper;

impl MetaTagScraper {
    pub const NAME: &'static str = "metaTags";
}

impl Scraper for MetaTagScraper {
    fn scrape(&self, document: &Html, _body: &str) -> Result<Value, PreviewError> {
        let meta_selector = selector("head > meta[property]")?;
        let mut tags = Map::new();

        for element in document.select(&meta_selector) {
            let Some(property) = element.value().attr("property") else {
                continue;
            };
            let key = camel_case(property);
            if key.is_empty() {
                continue;
            }
            // Later duplicates overwrite earlier ones; a tag without content
            // clears whatever an earlier duplicate stored.
            match element.value().attr("content") {
                Some(content) => {
                    tags.insert(key, Value::String(content.to_string()));
                }
                None => {
                    tags.remove(&key);
                }
            }
        }

        Ok(Value::Object(tags))
    }

    fn fallback(&self) -> Value {
        Value::Object(Map::new())
    }
}

/// Reads schema.org microdata (`itemscope`/`itemprop`) into a list of items
/// shaped like `{ "type": [...], "properties": { name: [values] } }`.
///
/// Top-level items lose their `id` (`itemid`) field.
#[derive(Debug, Clone, Copy, Default)]
pub struct MicrodataScraper;

impl MicrodataScraper {
    pub const NAME: &'static str = "schema.org";
}

impl Scraper for MicrodataScraper {
    fn scrape(&self, document: &Html, _body: &str) -> Result<Value, PreviewError> {
        let scope_selector = selector("[itemscope]")?;

        let items = document
            .select(&scope_selector)
            .filter(|el| el.value().attr("itemprop").is_none())
            .map(|el| {
                let mut item = microdata_item(el);
                item.remove("id");
                Value::Object(item)
            })
            .collect();

        Ok(Value::Array(items))
    }

    fn fallback(&self) -> Value {
        Value::Array(Vec::new())
    }
}

fn microdata_item(scope: ElementRef<'_>) -> Map<String, Value> {
    let mut item = Map::new();

    if let Some(types) = scope.value().attr("itemtype") {
        let types: Vec<Value> = types
            .split_whitespace()
            .map(|t| Value::String(t.to_string()))
            .collect();
        if !types.is_empty() {
            item.insert("type".to_string(), Value::Array(types));
        }
    }
    if let Some(id) = scope.value().attr("itemid") {
        item.insert("id".to_string(), Value::String(id.trim().to_string()));
    }

    let mut properties = Map::new();
    collect_properties(scope, &mut properties);
    item.insert("properties".to_string(), Value::Object(properties));
    item
}

/// Walks the descendants of `parent`, stopping at nested item scopes.
fn collect_properties(parent: ElementRef<'_>, properties: &mut Map<String, Value>) {
    for child in parent.children().filter_map(ElementRef::wrap) {
        let is_scope = child.value().attr("itemscope").is_some();

        if let Some(names) = child.value().attr("itemprop") {
            let value = if is_scope {
                Value::Object(microdata_item(child))
            } else {
                Value::String(property_value(child))
            };
            for name in names.split_whitespace() {
                let slot = properties
                    .entry(name.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(values) = slot {
                    values.push(value.clone());
                }
            }
        }

        if !is_scope {
            collect_properties(child, properties);
        }
    }
}

fn property_value(element: ElementRef<'_>) -> String {
    let el = element.value();
    let attr = match el.name() {
        "meta" => el.attr("content"),
        "audio" | "embed" | "iframe" | "img" | "source" | "track" | "video" => el.attr("src"),
        "a" | "area" | "link" => el.attr("href"),
        "object" => el.attr("data"),
        "data" | "meter" => el.attr("value"),
        "time" => el.attr("datetime"),
        _ => None,
    };

    match attr {
        Some(value) => value.trim().to_string(),
        None => element
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
    }
}
