use std::fmt;

/// What a fetch is expected to return; drives the `Accept` header and the
/// content-type check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Document,
    Image,
    Json,
    Any,
}

impl Accept {
    pub(crate) fn header_value(self) -> &'static str {
        match self {
            Accept::Document => "text/html,application/xhtml+xml;q=0.9,*/*;q=0.1",
            Accept::Image => "image/avif,image/webp,image/png,image/jpeg,image/*;q=0.8,*/*;q=0.1",
            Accept::Json => "application/json,application/json+oembed;q=0.9,*/*;q=0.1",
            Accept::Any => "*/*",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub bytes: Vec<u8>,
    pub metadata: FetchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub original_url: String,
    pub final_url: String,
    pub redirect_count: usize,
    pub content_type: Option<String>,
    pub byte_len: u64,
}

/// Raw input of one archival run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl SourceDocument {
    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            bytes: html.into().into_bytes(),
            content_type: Some("text/html; charset=utf-8".to_string()),
        }
    }
}

impl From<FetchOutput> for SourceDocument {
    fn from(output: FetchOutput) -> Self {
        Self {
            bytes: output.bytes,
            content_type: output.metadata.content_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    InvalidHeader,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::InvalidHeader => write!(f, "invalid request header"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::Network => write!(f, "network error"),
        }
    }
}
