use archiver_core::{Document, ExtractedLink, LinkKind};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::LinkSettings;
use crate::decode::decode_html;
use crate::{Accept, Fetcher};

/// An outbound hyperlink with what its target reported about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedLink {
    pub url: String,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub error: Option<String>,
}

/// Resolves content type and remote title of a bookmark's outbound links.
/// Runs after archival and never affects the container.
pub struct LinkEnricher<'a> {
    fetcher: &'a dyn Fetcher,
    settings: &'a LinkSettings,
}

impl<'a> LinkEnricher<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, settings: &'a LinkSettings) -> Self {
        Self { fetcher, settings }
    }

    /// Results follow the input order. Only `http(s)` hyperlinks are visited.
    pub async fn enrich(
        &self,
        links: &[ExtractedLink],
        cancel: &CancellationToken,
    ) -> Vec<EnrichedLink> {
        let targets: Vec<&str> = links
            .iter()
            .filter(|link| link.kind == LinkKind::Hyperlink)
            .map(|link| link.url.as_str())
            .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
            .take(self.settings.max_links)
            .collect();

        stream::iter(targets)
            .map(|url| self.visit(url, cancel))
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    async fn visit(&self, url: &str, cancel: &CancellationToken) -> EnrichedLink {
        let mut link = EnrichedLink {
            url: url.to_string(),
            content_type: None,
            title: None,
            error: None,
        };
        let timeout = self.settings.timeout;
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                link.error = Some("cancelled".to_string());
                return link;
            }
            fetched = tokio::time::timeout(timeout, self.fetcher.fetch(url, Accept::Any)) => {
                fetched
            }
        };
        match fetched {
            Ok(Ok(output)) => {
                let content_type = output.metadata.content_type.clone();
                if content_type.as_deref().is_some_and(is_html) {
                    link.title = remote_title(&output.bytes, content_type.as_deref());
                }
                link.content_type = content_type;
            }
            Ok(Err(err)) => link.error = Some(err.to_string()),
            Err(_) => link.error = Some(format!("timed out after {timeout:?}")),
        }
        link
    }
}

fn is_html(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/html") || ct.starts_with("application/xhtml+xml")
}

fn remote_title(bytes: &[u8], content_type: Option<&str>) -> Option<String> {
    let decoded = decode_html(bytes, content_type).ok()?;
    let doc = Document::parse(&decoded.html);
    let node = doc.first("title").ok().flatten()?;
    let title = doc.text(node).split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}
