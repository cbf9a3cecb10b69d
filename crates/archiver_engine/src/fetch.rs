use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, LOCATION};

use crate::{Accept, FailureKind, FetchError, FetchMetadata, FetchOutput};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    /// Cap for [`Accept::Image`] responses.
    pub max_image_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 5 * 1024 * 1024,
            max_image_bytes: 20 * 1024 * 1024,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
            user_agent: concat!("archiver/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, accept: Accept) -> Result<FetchOutput, FetchError>;
}

/// HTTP fetcher over one pooled client. Redirects are followed here rather
/// than by reqwest so that each fetch can count them.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    /// A build failure surfaces on every fetch.
    client: Result<reqwest::Client, String>,
    settings: FetchSettings,
    headers: BTreeMap<String, String>,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self {
            client: build_client(&settings),
            settings,
            headers: BTreeMap::new(),
        }
    }

    /// A copy of this fetcher that sends extra headers with every request,
    /// as site rules ask for some sources.
    pub fn with_headers(&self, headers: &BTreeMap<String, String>) -> Self {
        let mut fetcher = self.clone();
        fetcher
            .headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        fetcher
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    fn request_headers(&self, accept: Accept) -> Result<HeaderMap, FetchError> {
        let mut map = HeaderMap::new();
        map.insert(ACCEPT, HeaderValue::from_static(accept.header_value()));
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| FetchError::new(FailureKind::InvalidHeader, err.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| FetchError::new(FailureKind::InvalidHeader, err.to_string()))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    fn max_bytes(&self, accept: Accept) -> u64 {
        match accept {
            Accept::Image => self.settings.max_image_bytes,
            _ => self.settings.max_bytes,
        }
    }

    fn is_content_type_allowed(&self, content_type: &str, accept: Accept) -> bool {
        let ct = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();
        match accept {
            Accept::Document => self
                .settings
                .allowed_content_types
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&ct)),
            Accept::Image => {
                ct.starts_with("image/") || ct.ends_with("/octet-stream") || ct.is_empty()
            }
            Accept::Json => ct.contains("json") || ct.contains("javascript") || ct == "text/plain",
            Accept::Any => true,
        }
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, accept: Accept) -> Result<FetchOutput, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::new(
                FailureKind::InvalidUrl,
                format!("unsupported scheme {}", parsed.scheme()),
            ));
        }
        let client = self
            .client
            .as_ref()
            .map_err(|message| FetchError::new(FailureKind::Network, message.clone()))?;
        let headers = self.request_headers(accept)?;
        let max_bytes = self.max_bytes(accept);

        let mut current = parsed;
        let mut redirect_count = 0;
        let response = loop {
            let response = client
                .get(current.clone())
                .headers(headers.clone())
                .send()
                .await
                .map_err(map_reqwest_error)?;
            let location = match response.headers().get(LOCATION) {
                Some(value) if response.status().is_redirection() => {
                    value.to_str().ok().map(str::to_string)
                }
                _ => None,
            };
            let Some(location) = location else {
                break response;
            };
            if redirect_count >= self.settings.redirect_limit {
                return Err(FetchError::new(
                    FailureKind::RedirectLimitExceeded,
                    format!("more than {} redirects", self.settings.redirect_limit),
                ));
            }
            let next = current
                .join(&location)
                .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
            if !matches!(next.scheme(), "http" | "https") {
                return Err(FetchError::new(
                    FailureKind::InvalidUrl,
                    format!("redirect to unsupported scheme {}", next.scheme()),
                ));
            }
            current = next;
            redirect_count += 1;
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if let Some(ct) = content_type.as_deref() {
            if !self.is_content_type_allowed(ct, accept) {
                return Err(FetchError::new(
                    FailureKind::UnsupportedContentType {
                        content_type: ct.to_string(),
                    },
                    "unsupported content type",
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let metadata = FetchMetadata {
            original_url: url.to_string(),
            final_url,
            redirect_count,
            content_type,
            byte_len: bytes.len() as u64,
        };

        Ok(FetchOutput { bytes, metadata })
    }
}

fn build_client(settings: &FetchSettings) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(settings.user_agent.clone())
        .build()
        .map_err(|err| err.to_string())
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
