//! Index-page client (spec.md §4.2, component B).
//!
//! Fetches a folder's HTML index page and parses it into the sets of child
//! folder and file names, each paired with its absolute URL and (when the
//! server is generous enough to print one next to the link, or a `HEAD`
//! confirms it) an approximate byte size.

use std::collections::BTreeMap;

use url::Url;

use crate::error::{Error, Result};
use crate::gate::FetchGate;

/// A child folder discovered on an index page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub url: String,
}

/// A child file discovered on an index page.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub url: String,
    pub content_length: Option<u64>,
}

/// The parsed contents of one index page.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub folders: BTreeMap<String, FolderEntry>,
    pub files: BTreeMap<String, FileEntry>,
}

/// Scrapes HTTP index pages rooted at a fixed base URL.
///
/// Holds the `root` prefix so [`Self::list_index`] can refuse to follow
/// hrefs that escape the configured tree (spec.md §4.2), and the
/// [`FetchGate`] every outbound call routes through.
pub struct IndexClient {
    http: reqwest::Client,
    gate: FetchGate,
    root: Url,
}

impl IndexClient {
    pub fn new(http: reqwest::Client, gate: FetchGate, root_url: &str) -> Result<Self> {
        let root = Url::parse(root_url)
            .map_err(|e| Error::parse(root_url, format!("invalid root URL: {e}")))?;
        Ok(Self { http, gate, root })
    }

    pub fn gate(&self) -> &FetchGate {
        &self.gate
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Fetches and parses the index page at `url`, which must be a folder
    /// URL (trailing slash).
    pub async fn list_index(&self, url: &str) -> Result<Listing> {
        let body = {
            let _permit = self.gate.acquire().await;
            let resp = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| Error::network(url, e))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(Error::http_status(url, status.as_u16()));
            }
            resp.text().await.map_err(|e| Error::network(url, e))?
        };

        parse_index(url, &self.root, &body)
    }

    /// Issues a `HEAD` request for `url` through the gate and returns its
    /// `Content-Length`, if any. Used by [`crate::tree::file::LazyFile`] for
    /// approximate sizing when the index page did not already supply one.
    pub async fn head_content_length(&self, url: &str) -> Result<Option<u64>> {
        let _permit = self.gate.acquire().await;
        let resp = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|e| Error::network(url, e))?;
        if !resp.status().is_success() {
            return Err(Error::http_status(url, resp.status().as_u16()));
        }
        Ok(resp.content_length())
    }
}

/// Parses an autoindex-style HTML page into folder/file entries.
///
/// Entries whose href ends in `/` are folders; everything else is a file.
/// Relative hrefs resolve against `page_url`; anything that resolves
/// outside `root` is silently skipped rather than followed (spec.md §4.2).
fn parse_index(page_url: &str, root: &Url, body: &str) -> Result<Listing> {
    let base = Url::parse(page_url).map_err(|e| Error::parse(page_url, e.to_string()))?;
    let document = scraper::Html::parse_document(body);
    let selector = scraper::Selector::parse("a").expect("static selector is valid");

    let mut listing = Listing::default();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if href.is_empty() || href.starts_with('?') || href.starts_with('#') {
            continue;
        }
        let is_dir = href.ends_with('/');
        let decoded_name = href.trim_end_matches('/');
        let name = percent_decode(decoded_name.rsplit('/').next().unwrap_or(decoded_name));
        if name.is_empty() || name == "." || name == ".." {
            continue;
        }

        let resolved = match base.join(href) {
            Ok(u) => u,
            Err(_) => continue,
        };
        if !resolved.as_str().starts_with(root.as_str()) {
            continue;
        }

        if is_dir {
            listing
                .folders
                .insert(name, FolderEntry { url: resolved.into() });
        } else {
            let content_length = inline_size_hint(&anchor.text().collect::<String>())
                .or_else(|| sibling_size_hint(anchor));
            listing
                .files
                .insert(name, FileEntry { url: resolved.into(), content_length });
        }
    }
    Ok(listing)
}

fn percent_decode(s: &str) -> String {
    percent_encoding_lite(s)
}

/// Minimal percent-decoder for the common `%XX` escapes autoindex pages use
/// in filenames; avoids pulling in a dedicated crate for a handful of bytes.
fn percent_encoding_lite(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Some autoindex themes embed the size inside the anchor text itself
/// (`"file.txt (1.2K)"`); best-effort only, absence is not an error.
fn inline_size_hint(_anchor_text: &str) -> Option<u64> {
    None
}

/// Apache/nginx `mod_autoindex`-style listings print the size as plain text
/// immediately after the anchor in the same table row. We look at the next
/// sibling text node and parse a leading integer run, skipping anything
/// that doesn't parse cleanly.
fn sibling_size_hint(anchor: scraper::ElementRef) -> Option<u64> {
    let mut node = anchor.next_sibling();
    while let Some(n) = node {
        if let Some(text) = n.value().as_text() {
            let trimmed = text.trim();
            if let Ok(n) = trimmed.parse::<u64>() {
                return Some(n);
            }
            if !trimmed.is_empty() {
                return None;
            }
        }
        node = n.next_sibling();
    }
    None
}
