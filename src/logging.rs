use crate::utils::truncate_str;
use crate::PreviewRecord;
use serde_json::Value;
use std::error::Error;
use std::fmt::Display;
use std::path::PathBuf;
use tracing::{debug, error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt as subscriber_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

#[derive(Debug)]
pub struct LogConfig {
    pub log_dir: PathBuf,
    pub log_level: String,
    pub console_output: bool,
    pub file_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".into(),
            log_level: "info".into(),
            console_output: true,
            file_output: true,
        }
    }
}

fn create_separator(width: usize, ch: char) -> String {
    std::iter::repeat(ch).take(width).collect()
}

fn meta_tag<'a>(record: &'a PreviewRecord, key: &str) -> &'a str {
    record
        .get("metaTags")
        .and_then(|tags| tags.get(key))
        .and_then(Value::as_str)
        .unwrap_or("N/A")
}

/// Logs a boxed summary of `record` at info level.
pub fn log_preview_card(record: &PreviewRecord, url: &str) {
    const CARD_WIDTH: usize = 80;
    const CONTENT_WIDTH: usize = CARD_WIDTH - 10;

    let items = record
        .get("schema.org")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    let scrapers = record.names().collect::<Vec<_>>().join(", ");
    let horizontal_line = create_separator(CARD_WIDTH - 2, '═');

    info!(
        "\n╔{}╗\n\
         URL:      {}\n\
         Title:    {}\n\
         Desc:     {}\n\
         Image:    {}\n\
         Site:     {}\n\
         Items:    {}\n\
         Scrapers: {}\n\
         ╚{}╝",
        horizontal_line,
        truncate_str(url, CONTENT_WIDTH),
        truncate_str(meta_tag(record, "ogTitle"), CONTENT_WIDTH),
        truncate_str(meta_tag(record, "ogDescription"), CONTENT_WIDTH),
        truncate_str(meta_tag(record, "ogImage"), CONTENT_WIDTH),
        truncate_str(meta_tag(record, "ogSiteName"), CONTENT_WIDTH),
        items,
        truncate_str(&scrapers, CONTENT_WIDTH),
        horizontal_line,
    );
}

pub fn log_error_card<E: Display + Error>(url: &str, error: &E) {
    const CARD_WIDTH: usize = 70;
    const CONTENT_WIDTH: usize = CARD_WIDTH - 10;

    let top_bottom = create_separator(CARD_WIDTH - 2, '═');
    let middle = create_separator(CARD_WIDTH - 2, '─');

    let mut error_details = error.to_string();
    if let Some(source) = error.source() {
        error_details = format!("{error_details} (caused by: {source})");
    }

    error!(
        "\n╔═{}═╗\n\
         ║ URL:   {:<width$} ║\n\
         ║{}║\n\
         ║ Error: {:<width$} ║\n\
         ╚═{}═╝",
        top_bottom,
        truncate_str(url, CONTENT_WIDTH),
        middle,
        truncate_str(&error_details, CONTENT_WIDTH),
        top_bottom,
        width = CONTENT_WIDTH
    );
}

/// Installs the global subscriber: env filter (falling back to
/// `config.log_level`), optional pretty console output and an optional daily
/// rolling `link-preview.log` file.
pub fn setup_logging(config: LogConfig) -> Result<(), Box<dyn Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let mut layers = Vec::new();

    if config.console_output {
        let console_layer = subscriber_fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .pretty();
        layers.push(console_layer.boxed());
    }

    if config.file_output {
        std::fs::create_dir_all(&config.log_dir)?;

        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "link-preview.log");

        let file_layer = subscriber_fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .with_writer(file_appender);

        layers.push(file_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    debug!("Logging system initialized with config: {:?}", config);
    Ok(())
}

/// Scoped subscriber at `level`, restored when the guard drops.
pub struct LogLevelGuard {
    _guard: tracing::subscriber::DefaultGuard,
}

impl LogLevelGuard {
    pub fn set_level(level: &str) -> Self {
        let filter = EnvFilter::new(level);
        let subscriber = tracing_subscriber::registry()
            .with(subscriber_fmt::layer().with_test_writer())
            .with(filter);

        LogLevelGuard {
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PreviewError;

    #[test]
    fn test_cards_render_without_panicking() {
        let _guard = LogLevelGuard::set_level("debug");
        let record = PreviewRecord::default();
        log_preview_card(&record, "https://example.com/a-very-long-path-that-keeps-going-and-going-and-going");
        log_error_card(
            "https://example.com/",
            &PreviewError::FetchError {
                url: "https://example.com/".into(),
                status: Some(502),
                message: "Bad Gateway".into(),
            },
        );
    }
}
