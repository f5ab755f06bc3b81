use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::formats::Level;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("http status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("http request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("markup is empty")]
    EmptyMarkup,

    #[error("markup has no body element")]
    NoBody,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("authentication rejected ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: Box<ServiceError>,
    },
}

impl ServiceError {
    pub fn retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Server { .. } => true,
            Self::Transport(_) => true,
            Self::Auth { .. } | Self::Rejected { .. } | Self::Malformed(_) => false,
            Self::Exhausted { .. } => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AnnotationErrorKind {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("malformed annotation: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
#[error("annotate {section_id}: {kind}")]
pub struct AnnotationError {
    pub section_id: String,
    #[source]
    pub kind: AnnotationErrorKind,
}

#[derive(Debug, Error)]
pub enum RewriteErrorKind {
    #[error("section has no annotation")]
    MissingAnnotation,

    #[error("rewrite lost {} link(s): {}", .missing.len(), .missing.join(", "))]
    LinkLost { missing: Vec<String> },

    #[error("rewrite output is empty")]
    EmptyOutput,

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Error)]
#[error("rewrite {section_id} ({level}): {kind}")]
pub struct RewriteError {
    pub section_id: String,
    pub level: Level,
    #[source]
    pub kind: RewriteErrorKind,
}

#[derive(Debug, Error)]
pub enum SummarizationError {
    #[error("document has no text to summarize")]
    EmptyDocument,

    #[error("summary set incomplete; missing: {}", join_levels(.missing))]
    Incomplete { missing: Vec<Level> },

    #[error("{level} summary: {source}")]
    Service {
        level: Level,
        #[source]
        source: ServiceError,
    },
}

fn join_levels(levels: &[Level]) -> String {
    levels
        .iter()
        .map(|level| level.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Extract,
    Annotate,
    Rewrite,
    Summarize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Annotate => "annotate",
            Stage::Rewrite => "rewrite",
            Stage::Summarize => "summarize",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{url}: fetch failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("{url}: extraction failed: {source}")]
    Extraction {
        url: String,
        #[source]
        source: ExtractionError,
    },

    #[error("{url}: {source}")]
    Annotation {
        url: String,
        #[source]
        source: AnnotationError,
    },

    #[error("{url}: {source}")]
    Rewrite {
        url: String,
        #[source]
        source: RewriteError,
    },

    #[error("{url}: summarization failed: {source}")]
    Summarization {
        url: String,
        #[source]
        source: SummarizationError,
    },
}

impl PipelineError {
    pub fn url(&self) -> &str {
        match self {
            Self::Fetch { url, .. }
            | Self::Extraction { url, .. }
            | Self::Annotation { url, .. }
            | Self::Rewrite { url, .. }
            | Self::Summarization { url, .. } => url,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Fetch { .. } => Stage::Fetch,
            Self::Extraction { .. } => Stage::Extract,
            Self::Annotation { .. } => Stage::Annotate,
            Self::Rewrite { .. } => Stage::Rewrite,
            Self::Summarization { .. } => Stage::Summarize,
        }
    }

    pub fn section_id(&self) -> Option<&str> {
        match self {
            Self::Annotation { source, .. } => Some(&source.section_id),
            Self::Rewrite { source, .. } => Some(&source.section_id),
            Self::Fetch { .. } | Self::Extraction { .. } | Self::Summarization { .. } => None,
        }
    }
}
