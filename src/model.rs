use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::roman::PageLabel;

/// Base URLs and UI selectors for one reader platform. The selector strings
/// come from the deployed reader frontends and change when those ship new
/// styled-component builds.
#[derive(Debug, Clone)]
pub struct PlatformProfile {
    pub name: &'static str,
    pub home_url: &'static str,
    pub jigsaw_url: &'static str,
    pub total_pages_css: &'static str,
    pub current_page_css: &'static str,
    pub page_loader_css: &'static str,
    pub next_page_css: &'static str,
}

pub const VITALSOURCE: PlatformProfile = PlatformProfile {
    name: "vitalsource",
    home_url: "https://bookshelf.vitalsource.com",
    jigsaw_url: "https://jigsaw.vitalsource.com",
    total_pages_css: ".sc-wkwDy.ebHWgB",
    current_page_css: ".InputControl__input-fbzQBk.hDtUvs",
    page_loader_css: ".sc-AjmGg.dDNaMw",
    next_page_css: ".IconButton__button-bQttMI.cSDGGI",
};

pub const YUZU: PlatformProfile = PlatformProfile {
    name: "yuzu",
    home_url: "https://reader.yuzu.com",
    jigsaw_url: "https://jigsaw.yuzu.com",
    total_pages_css: ".sc-wkwDy.ebHWgB",
    current_page_css: ".InputControl__input-fbzQBk.hDtUvs",
    page_loader_css: ".sc-hiwPVj.hZlgDU",
    next_page_css: ".IconButton__button-bQttMI.cSDGGI",
};

impl PlatformProfile {
    pub fn reader_url(&self, book_id: &str, page: u64) -> String {
        format!("{}/reader/books/{}/pageid/{}", self.home_url, book_id, page)
    }

    /// Prefix shared by every page-image exchange for this book.
    pub fn image_prefix(&self, book_id: &str) -> String {
        format!("{}/books/{}/images/", self.jigsaw_url, book_id)
    }

    pub fn pages_endpoint(&self, book_id: &str) -> String {
        format!("{}/books/{}/pages", self.jigsaw_url, book_id)
    }

    pub fn book_info_endpoint(&self, book_id: &str) -> String {
        format!("{}/info/books.json?isbns={}", self.jigsaw_url, book_id)
    }

    pub fn toc_endpoint(&self, book_id: &str) -> String {
        format!("{}/books/{}/toc", self.jigsaw_url, book_id)
    }
}

/// One resolved page: the label the reader displayed while the exchange was
/// observed, and the base resource URL backing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageRecord {
    pub label: PageLabel,
    pub url: String,
}

/// Mutable state for one acquisition run, passed explicitly to each phase.
#[derive(Debug)]
pub struct RunState {
    /// Navigation page cursor (the reader's pageid, not the printed label).
    pub cursor: u64,
    /// Expected page count, revised upward for every non-numeric label.
    pub total_estimate: u64,
    pub non_numeric_pages: u64,
    pub records: HashSet<PageRecord>,
    /// Cursors whose resource URL could not be resolved in the main pass.
    pub deferred: BTreeSet<u64>,
}

impl RunState {
    pub fn new(start_page: u64, total_estimate: u64) -> Self {
        Self {
            cursor: start_page,
            total_estimate,
            non_numeric_pages: 0,
            records: HashSet::new(),
            deferred: BTreeSet::new(),
        }
    }
}

/// Delay configuration shared by navigation, acquisition and download.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    /// Base unit for fixed waits (metadata settle, download settle).
    pub base: Duration,
    pub variance: f64,
    /// Bounds for the between-pages pause.
    pub min: Duration,
    pub max: Duration,
    /// Interval between trace-log polls.
    pub poll: Duration,
}

impl Pacing {
    pub fn page_pause(&self) -> Duration {
        crate::util::human_delay(self.min, self.max)
    }

    pub fn settle(&self, multiplier: f64) -> Duration {
        crate::util::jittered(self.base.mul_f64(multiplier), self.variance)
    }

    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            base: Duration::ZERO,
            variance: 0.0,
            min: Duration::ZERO,
            max: Duration::ZERO,
            poll: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocEntry {
    pub title: String,
    /// Page anchor as reported by the jigsaw TOC payload, e.g. "/12".
    pub cfi: String,
}

/// Payload shape of the jigsaw `books.json` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BookInfoPayload {
    #[serde(default)]
    pub books: Vec<BookInfoEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookInfoEntry {
    pub title: Option<String>,
    pub author: Option<String>,
}

/// Metadata persisted next to the page images so `build` can run without a
/// live session. Falls back to `{title = book id, author = "Unknown"}` when
/// the metadata scrape came up empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMetadata {
    pub book_id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub toc: Vec<TocEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<serde_json::Value>,
}

impl StoredMetadata {
    pub fn fallback(book_id: &str) -> Self {
        Self {
            book_id: book_id.to_string(),
            title: book_id.to_string(),
            author: "Unknown".to_string(),
            toc: Vec::new(),
            pages: None,
        }
    }
}

/// End-of-run summary manifest naming every failing label and its final
/// disposition.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeRunManifest {
    pub manifest_version: u32,
    pub book_id: String,
    pub platform: String,
    pub started_at: String,
    pub finished_at: String,
    pub pages_resolved: usize,
    pub non_numeric_pages: u64,
    pub unresolved_cursors: Vec<u64>,
    pub downloads_succeeded: usize,
    pub download_failures: Vec<String>,
}
