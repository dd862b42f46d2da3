use clap::Parser;
use colored::Colorize;
use link_preview::{
    handle_request, log_error_card, log_preview_card, setup_logging, BatchItem, FilterBy,
    LogConfig, PipelineConfig, PreviewPipeline, PreviewRequest, ResponseData, SourceRequest,
};
use std::error::Error;

/// Fetch link previews and print the response envelope as JSON.
#[derive(Debug, Parser)]
#[command(name = "preview_cli")]
struct Args {
    /// Pages to preview.
    urls: Vec<String>,

    /// Content index to pull URLs from instead of positional URLs.
    #[arg(long)]
    source: Option<String>,

    /// Only index results with this tag.
    #[arg(long, conflicts_with = "join")]
    tag: Option<String>,

    /// Only index results matching NAME=VALUE.
    #[arg(long, value_name = "NAME=VALUE")]
    join: Option<String>,

    /// Maximum number of index results.
    #[arg(long)]
    limit: Option<u32>,

    /// Scrapers to disable, e.g. `schema.org`.
    #[arg(long = "remove-scraper")]
    remove_scrapers: Vec<String>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn request(&self) -> Result<PreviewRequest, Box<dyn Error + Send + Sync>> {
        if let Some(source_url) = &self.source {
            let (filter_by, join_name, join_value) = match (&self.tag, &self.join) {
                (Some(_), _) => (FilterBy::Tag, None, None),
                (None, Some(pair)) => {
                    let (name, value) = pair
                        .split_once('=')
                        .ok_or("--join expects NAME=VALUE")?;
                    (FilterBy::Join, Some(name.to_string()), Some(value.to_string()))
                }
                (None, None) => (FilterBy::None, None, None),
            };
            return Ok(PreviewRequest::Source(SourceRequest {
                source_url: source_url.clone(),
                filter_by,
                filter_tag: self.tag.clone(),
                filter_join_name: join_name,
                filter_join_value: join_value,
                limit: self.limit,
            }));
        }

        match self.urls.as_slice() {
            [] => Err("pass at least one URL or --source".into()),
            [url] => Ok(PreviewRequest::Single { url: url.clone() }),
            urls => Ok(PreviewRequest::Batch {
                urls: urls.to_vec(),
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();

    setup_logging(LogConfig {
        log_level: args.log_level.clone(),
        file_output: false,
        ..LogConfig::default()
    })?;

    let request = args.request()?;
    let config = args
        .remove_scrapers
        .iter()
        .fold(PipelineConfig::default(), |config, name| {
            config.remove_scraper(name.as_str())
        });
    let pipeline = PreviewPipeline::new_with_config(config);

    println!("{}", "Link Preview".bold().green());
    println!("{}", "============".green());

    let envelope = handle_request(&pipeline, &request).await;

    match (&request, &envelope.data) {
        (PreviewRequest::Single { url }, Some(ResponseData::Single(record))) => {
            log_preview_card(record, url);
        }
        (PreviewRequest::Batch { urls }, Some(ResponseData::Batch(items))) => {
            for (url, item) in urls.iter().zip(items) {
                if let BatchItem::Ok(record) = item {
                    log_preview_card(record, url);
                }
            }
        }
        _ => {}
    }

    if envelope.is_ok() {
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        let message = envelope.message.clone().unwrap_or_default();
        log_error_card(&message, &std::io::Error::other(message.clone()));
        eprintln!("{}: {}", "Error".bold().red(), message);
    }

    Ok(())
}
