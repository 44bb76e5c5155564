//! HTTP implementation of [`SourceFetcher`].
//!
//! Downloads the published KBOB dataset with `reqwest` (or reads it from
//! disk for `file://` URLs) and decodes it into [`RawRow`]s according to
//! the configured [`SourceFormat`]. Link checks use a separate client with
//! the shorter link timeout.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;

use kbob_core::models::{RawRow, RawValue};
use kbob_core::source::{LinkError, RawDataset, SourceError, SourceFetcher};

use crate::config::{SourceConfig, SourceFormat};
use crate::links::{is_checkable, parse_link};
use crate::xlsx;

const USER_AGENT: &str = concat!("kbob-cache/", env!("CARGO_PKG_VERSION"));

pub struct HttpFetcher {
    client: reqwest::Client,
    link_client: reqwest::Client,
    dataset_url: String,
    format: SourceFormat,
    sheet_index: usize,
    header_row: usize,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(source: &SourceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(source.timeout())
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build dataset HTTP client")?;
        let link_client = reqwest::Client::builder()
            .timeout(source.link_timeout())
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build link-check HTTP client")?;

        Ok(Self {
            client,
            link_client,
            dataset_url: source.dataset_url.clone(),
            format: source.format,
            sheet_index: source.sheet_index,
            header_row: source.header_row,
            timeout: source.timeout(),
        })
    }

    async fn read_payload(&self) -> Result<Vec<u8>, SourceError> {
        let url = Url::parse(&self.dataset_url)
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", self.dataset_url, e)))?;

        if url.scheme() == "file" {
            let path = url.to_file_path().map_err(|_| {
                SourceError::Unavailable(format!("{}: not a local path", self.dataset_url))
            })?;
            return tokio::fs::read(&path)
                .await
                .map_err(|e| SourceError::Unavailable(format!("{}: {}", path.display(), e)));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!(
                "{} answered {}",
                self.dataset_url, status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok(body.to_vec())
    }

    fn transport_error(&self, err: reqwest::Error) -> SourceError {
        if err.is_timeout() {
            SourceError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            SourceError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch_raw_dataset(&self) -> Result<RawDataset, SourceError> {
        let payload = self.read_payload().await?;
        tracing::debug!(url = %self.dataset_url, bytes = payload.len(), "dataset downloaded");

        let rows = decode_payload(&payload, self.format, self.sheet_index, self.header_row)?;
        Ok(RawDataset {
            origin: self.dataset_url.clone(),
            rows,
        })
    }

    async fn fetch_link(&self, url: &str) -> Result<bool, LinkError> {
        let url = parse_link(url)?;
        if !is_checkable(&url) {
            return Ok(false);
        }

        let head = self.link_client.head(url.clone()).send().await;
        let response = match head {
            Ok(resp)
                if resp.status() == StatusCode::METHOD_NOT_ALLOWED
                    || resp.status() == StatusCode::NOT_IMPLEMENTED =>
            {
                // Some servers refuse HEAD; the GET body is never read.
                self.link_client.get(url.clone()).send().await
            }
            other => other,
        };

        match response {
            Ok(resp) => {
                let ok = resp.status().is_success();
                tracing::debug!(url = %url, status = %resp.status(), reachable = ok, "link checked");
                Ok(ok)
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "link unreachable");
                Ok(false)
            }
        }
    }
}

/// Decode a dataset payload into raw rows.
pub fn decode_payload(
    bytes: &[u8],
    format: SourceFormat,
    sheet_index: usize,
    header_row: usize,
) -> Result<Vec<RawRow>, SourceError> {
    match format {
        SourceFormat::Xlsx => xlsx::read_rows(bytes, sheet_index, header_row)
            .map_err(|e| SourceError::Format(e.to_string())),
        SourceFormat::Json => decode_json(bytes),
    }
}

/// Top-level array of objects, or an object with a `materials` array.
fn decode_json(bytes: &[u8]) -> Result<Vec<RawRow>, SourceError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| SourceError::Format(e.to_string()))?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("materials") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(SourceError::Format(
                    "expected an array or an object with a 'materials' array".to_string(),
                ))
            }
        },
        _ => {
            return Err(SourceError::Format(
                "expected an array or an object with a 'materials' array".to_string(),
            ))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(position, item)| match item {
            serde_json::Value::Object(fields) => {
                let mut row = RawRow::new(position);
                for (name, value) in fields {
                    row.push(name, json_scalar(value));
                }
                Ok(row)
            }
            other => Err(SourceError::Format(format!(
                "record {} is not an object: {}",
                position, other
            ))),
        })
        .collect()
}

fn json_scalar(value: serde_json::Value) -> RawValue {
    match value {
        serde_json::Value::Null => RawValue::Empty,
        serde_json::Value::Bool(b) => RawValue::Bool(b),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) => RawValue::Number(f),
            None => RawValue::Text(n.to_string()),
        },
        serde_json::Value::String(s) => RawValue::Text(s),
        nested => RawValue::Text(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_array_and_wrapped_object() {
        let rows = decode_json(
            br#"[{"uuid":"A","density":"2'400","active":true,"note":null,"tags":["x"]}]"#,
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].position, 0);
        assert_eq!(rows[0].get("uuid"), Some(&RawValue::Text("A".into())));
        assert_eq!(rows[0].get("active"), Some(&RawValue::Bool(true)));
        assert_eq!(rows[0].get("note"), Some(&RawValue::Empty));
        assert_eq!(rows[0].get("tags"), Some(&RawValue::Text("[\"x\"]".into())));

        let wrapped = decode_json(br#"{"materials":[{"uuid":"A"},{"uuid":"B","density":1.5}]}"#)
            .unwrap();
        assert_eq!(wrapped.len(), 2);
        assert_eq!(wrapped[1].position, 1);
        assert_eq!(wrapped[1].get("density"), Some(&RawValue::Number(1.5)));
    }

    #[test]
    fn json_container_errors() {
        let cases: [&[u8]; 4] = [
            b"{not json",
            br#""just a string""#,
            br#"{"items":[]}"#,
            br#"[1,2,3]"#,
        ];
        for bad in cases {
            assert!(
                matches!(decode_json(bad), Err(SourceError::Format(_))),
                "{:?}",
                String::from_utf8_lossy(bad)
            );
        }
    }

    #[test]
    fn xlsx_errors_map_to_format_error() {
        let err = decode_payload(b"PK\x03\x04 broken", SourceFormat::Xlsx, 0, 1).unwrap_err();
        assert_eq!(err.code(), "SourceFormatError");
    }

    #[tokio::test]
    async fn reads_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kbob.json");
        std::fs::write(&path, br#"[{"uuid":"A","group":"Beton"}]"#).unwrap();

        let source = SourceConfig {
            dataset_url: Url::from_file_path(&path).unwrap().to_string(),
            format: SourceFormat::Json,
            sheet_index: 0,
            header_row: 1,
            timeout_secs: 5,
            link_timeout_secs: 5,
            links: Vec::new(),
            columns: Default::default(),
        };
        let fetcher = HttpFetcher::new(&source).unwrap();
        let dataset = fetcher.fetch_raw_dataset().await.unwrap();
        assert_eq!(dataset.rows.len(), 1);

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            fetcher.fetch_raw_dataset().await,
            Err(SourceError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable_and_unreachable() {
        let source = SourceConfig {
            dataset_url: "http://127.0.0.1:1/kbob.xlsx".to_string(),
            format: SourceFormat::Xlsx,
            sheet_index: 0,
            header_row: 1,
            timeout_secs: 5,
            link_timeout_secs: 5,
            links: Vec::new(),
            columns: Default::default(),
        };
        let fetcher = HttpFetcher::new(&source).unwrap();
        assert!(matches!(
            fetcher.fetch_raw_dataset().await,
            Err(SourceError::Unavailable(_))
        ));
        assert_eq!(fetcher.fetch_link("http://127.0.0.1:1/x").await, Ok(false));
        assert_eq!(fetcher.fetch_link("ftp://127.0.0.1/x").await, Ok(false));
        assert!(matches!(
            fetcher.fetch_link("not-a-url").await,
            Err(LinkError::InvalidLinkFormat(_))
        ));
    }
}
