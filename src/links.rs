//! Link Validator: reachability checks for arbitrary URLs.
//!
//! A link that cannot be reached is a normal answer (`Ok(false)`), not an
//! error. So is a well-formed URL we cannot check, such as `ftp://`. Only
//! input that does not parse as an absolute URL is rejected with
//! [`LinkError::InvalidLinkFormat`].

use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use kbob_core::source::{LinkError, SourceFetcher};

/// Parse `raw` as an absolute URL of any scheme.
pub fn parse_link(raw: &str) -> Result<Url, LinkError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LinkError::InvalidLinkFormat(
            "link must not be empty".to_string(),
        ));
    }
    Url::parse(trimmed).map_err(|e| LinkError::InvalidLinkFormat(format!("'{}': {}", trimmed, e)))
}

/// `http(s)` with a host. Anything else is reported unreachable.
pub fn is_checkable(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty())
}

/// Reachability of one link, as reported by `/api/kbob/source-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub url: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct LinkValidator {
    fetcher: Arc<dyn SourceFetcher>,
    timeout: Duration,
}

impl LinkValidator {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, timeout: Duration) -> Self {
        Self { fetcher, timeout }
    }

    /// `true` only on an explicit success response within the timeout.
    pub async fn test_link(&self, url: &str) -> Result<bool, LinkError> {
        let url = parse_link(url)?;
        if !is_checkable(&url) {
            tracing::debug!(url = %url, "link scheme cannot be checked");
            return Ok(false);
        }
        match tokio::time::timeout(self.timeout, self.fetcher.fetch_link(url.as_str())).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(url = %url, timeout_secs = self.timeout.as_secs(), "link check timed out");
                Ok(false)
            }
        }
    }

    /// Check several links concurrently. Results keep the input order.
    pub async fn check_all(&self, urls: &[String]) -> Vec<LinkStatus> {
        let handles: Vec<_> = urls
            .iter()
            .map(|url| {
                let validator = self.clone();
                let url = url.clone();
                tokio::spawn(async move { validator.test_link(&url).await })
            })
            .collect();

        let mut statuses = Vec::with_capacity(urls.len());
        for (url, handle) in urls.iter().zip(handles) {
            let (reachable, error) = match handle.await {
                Ok(Ok(reachable)) => (reachable, None),
                Ok(Err(e)) => (false, Some(e.to_string())),
                Err(e) => {
                    tracing::error!(url = %url, error = %e, "link check task failed");
                    (false, Some("link check failed".to_string()))
                }
            };
            statuses.push(LinkStatus {
                url: url.clone(),
                reachable,
                error,
            });
        }
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kbob_core::source::{RawDataset, SourceError};

    struct StubFetcher {
        reachable: bool,
        delay: Duration,
    }

    #[async_trait]
    impl SourceFetcher for StubFetcher {
        async fn fetch_raw_dataset(&self) -> Result<RawDataset, SourceError> {
            Ok(RawDataset::default())
        }

        async fn fetch_link(&self, url: &str) -> Result<bool, LinkError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.reachable && !url.contains("dead"))
        }
    }

    fn validator(reachable: bool, delay_ms: u64, timeout_ms: u64) -> LinkValidator {
        LinkValidator::new(
            Arc::new(StubFetcher {
                reachable,
                delay: Duration::from_millis(delay_ms),
            }),
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn parse_link_rejects_only_malformed_input() {
        let url = parse_link("https://www.kbob.admin.ch/de/oekobilanzdaten").unwrap();
        assert!(is_checkable(&url));
        assert!(is_checkable(&parse_link("  http://127.0.0.1:8080/x  ").unwrap()));

        for other in ["ftp://host/file", "mailto:a@b.ch", "file:///tmp/kbob.xlsx"] {
            let url = parse_link(other).unwrap();
            assert!(!is_checkable(&url), "{:?} should not be checked", other);
        }

        for bad in ["", "   ", "not-a-url", "/relative/path", "http://"] {
            assert!(
                matches!(parse_link(bad), Err(LinkError::InvalidLinkFormat(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[tokio::test]
    async fn malformed_link_raises() {
        let v = validator(true, 0, 1000);
        assert!(matches!(
            v.test_link("not-a-url").await,
            Err(LinkError::InvalidLinkFormat(_))
        ));
    }

    #[tokio::test]
    async fn uncheckable_schemes_are_false_not_errors() {
        let v = validator(true, 0, 1000);
        assert_eq!(v.test_link("ftp://live.example/file").await, Ok(false));
        assert_eq!(v.test_link("mailto:info@kbob.admin.ch").await, Ok(false));
    }

    #[tokio::test]
    async fn unreachable_and_slow_links_are_false() {
        let v = validator(true, 0, 1000);
        assert!(v.test_link("https://live.example/x").await.unwrap());
        assert!(!v.test_link("https://dead.example/x").await.unwrap());

        let slow = validator(true, 500, 20);
        assert!(!slow.test_link("https://live.example/x").await.unwrap());
    }

    #[tokio::test]
    async fn check_all_keeps_order_and_reports_bad_input() {
        let v = validator(true, 0, 1000);
        let urls = vec![
            "https://dead.example/a".to_string(),
            "nope".to_string(),
            "https://live.example/b".to_string(),
        ];
        let statuses = v.check_all(&urls).await;
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[0].url, urls[0]);
        assert!(!statuses[0].reachable);
        assert!(statuses[1].error.is_some());
        assert!(statuses[2].reachable);
        assert!(statuses[2].error.is_none());
    }
}
