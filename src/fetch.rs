// src/fetch.rs

//! Remote content fetching seam
//!
//! The pipeline downloads sources through a [`Fetcher`] so that tests can
//! substitute canned responses for the network. [`HttpFetcher`] is the
//! production implementation on top of a blocking HTTP client.

use crate::error::Result;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use std::io::Read;

/// A fetched remote resource. The body is only meaningful when the
/// status indicates success; callers check before reading.
pub struct RemoteResource {
    pub status: u16,
    pub last_modified: Option<DateTime<Utc>>,
    pub body: Box<dyn Read>,
}

/// Metadata of a remote resource, without its body.
#[derive(Debug, Clone)]
pub struct RemoteHead {
    pub status: u16,
    pub last_modified: Option<DateTime<Utc>>,
}

pub trait Fetcher {
    fn get(&self, url: &str) -> Result<RemoteResource>;
    fn head(&self, url: &str) -> Result<RemoteHead>;
}

/// Fetcher backed by a blocking HTTP client.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<RemoteResource> {
        let response = self.client.get(url).send()?;
        Ok(RemoteResource {
            status: response.status().as_u16(),
            last_modified: last_modified(response.headers()),
            body: Box::new(response),
        })
    }

    fn head(&self, url: &str) -> Result<RemoteHead> {
        let response = self.client.head(url).send()?;
        Ok(RemoteHead {
            status: response.status().as_u16(),
            last_modified: last_modified(response.headers()),
        })
    }
}

fn last_modified(headers: &reqwest::header::HeaderMap) -> Option<DateTime<Utc>> {
    let value = headers.get(reqwest::header::LAST_MODIFIED)?.to_str().ok()?;
    parse_http_date(value)
}

/// Parse an HTTP date header (RFC 2822 format).
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_date() {
        let parsed = parse_http_date("Thu, 01 Jun 2023 12:00:00 GMT").unwrap();
        assert_eq!(parsed.timestamp(), 1685620800);
    }

    #[test]
    fn test_parse_http_date_rejects_garbage() {
        assert!(parse_http_date("last tuesday").is_none());
    }
}
