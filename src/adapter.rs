use crate::pipeline::PreviewPipeline;
use crate::source::{SourceFilter, SourceQuery};
use crate::{PreviewError, PreviewRecord};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Inbound request body.
///
/// `{ "url": ... }` previews one page, `{ "urls": [...] }` previews a list,
/// and `{ "sourceUrl": ..., "filterBy": ... }` previews whatever a content
/// index query returns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PreviewRequest {
    Source(SourceRequest),
    Batch { urls: Vec<String> },
    Single { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterBy {
    #[default]
    None,
    Tag,
    Join,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRequest {
    pub source_url: String,
    #[serde(default)]
    pub filter_by: FilterBy,
    pub filter_tag: Option<String>,
    pub filter_join_name: Option<String>,
    pub filter_join_value: Option<String>,
    pub limit: Option<u32>,
}

impl SourceRequest {
    pub fn to_query(&self) -> Result<SourceQuery, PreviewError> {
        let filter = match self.filter_by {
            FilterBy::None => SourceFilter::None,
            FilterBy::Tag => match non_empty(&self.filter_tag) {
                Some(tag) => SourceFilter::Tag(tag.to_string()),
                None => {
                    return Err(PreviewError::InvalidRequest(
                        "filterBy \"tag\" requires filterTag".to_string(),
                    ))
                }
            },
            FilterBy::Join => match non_empty(&self.filter_join_name) {
                Some(name) => SourceFilter::Join {
                    name: name.to_string(),
                    value: self.filter_join_value.clone().unwrap_or_default(),
                },
                None => {
                    return Err(PreviewError::InvalidRequest(
                        "filterBy \"join\" requires filterJoinName".to_string(),
                    ))
                }
            },
        };

        Ok(SourceQuery {
            source_url: self.source_url.clone(),
            filter,
            limit: self.limit,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub status: Status,
    pub message: String,
}

impl From<&PreviewError> for ErrorBody {
    fn from(e: &PreviewError) -> Self {
        Self {
            status: Status::Error,
            message: e.envelope_message(),
        }
    }
}

/// One slot of a batch response: the record, or an inline error object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Ok(PreviewRecord),
    Error(ErrorBody),
}

impl From<Result<PreviewRecord, PreviewError>> for BatchItem {
    fn from(result: Result<PreviewRecord, PreviewError>) -> Self {
        match result {
            Ok(record) => BatchItem::Ok(record),
            Err(e) => BatchItem::Error(ErrorBody::from(&e)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseData {
    Single(PreviewRecord),
    Batch(Vec<BatchItem>),
}

/// Outbound response: `{ "status": "ok", "data": ... }` or
/// `{ "status": "error", "message": "<status>: <url>, <status text>" }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseEnvelope {
    pub fn ok(data: ResponseData) -> Self {
        Self {
            status: Status::Ok,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(error: &PreviewError) -> Self {
        Self {
            status: Status::Error,
            data: None,
            message: Some(error.envelope_message()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    fn batch(results: Vec<Result<PreviewRecord, PreviewError>>) -> Self {
        Self::ok(ResponseData::Batch(
            results.into_iter().map(BatchItem::from).collect(),
        ))
    }
}

/// Runs `request` through the pipeline and wraps the outcome for the caller.
pub async fn handle_request(pipeline: &PreviewPipeline, request: &PreviewRequest) -> ResponseEnvelope {
    match request {
        PreviewRequest::Single { url } => match pipeline.preview(url).await {
            Ok(record) => ResponseEnvelope::ok(ResponseData::Single(record)),
            Err(e) => ResponseEnvelope::error(&e),
        },
        PreviewRequest::Batch { urls } => ResponseEnvelope::batch(pipeline.preview_batch(urls).await),
        PreviewRequest::Source(source) => {
            let query = match source.to_query() {
                Ok(query) => query,
                Err(e) => {
                    e.log();
                    return ResponseEnvelope::error(&e);
                }
            };
            match pipeline.preview_source(&query).await {
                Ok(results) => ResponseEnvelope::batch(results),
                Err(e) => ResponseEnvelope::error(&e),
            }
        }
    }
}

/// Parses a JSON request body and handles it. Unparseable bodies produce an
/// error envelope rather than an `Err`.
pub async fn handle_json(pipeline: &PreviewPipeline, body: &str) -> ResponseEnvelope {
    match serde_json::from_str::<PreviewRequest>(body) {
        Ok(request) => {
            debug!(request = ?request, "Handling preview request");
            handle_request(pipeline, &request).await
        }
        Err(e) => {
            let e = PreviewError::InvalidRequest(e.to_string());
            e.log();
            ResponseEnvelope::error(&e)
        }
    }
}
