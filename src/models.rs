use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Id of the pseudo-source backed by archives on disk
pub const LOCAL_SOURCE_ID: &str = "local";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HttpClientKind {
    #[default]
    Default,
    /// Browser-like headers and the user agent the challenge was solved with
    Impersonating,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "desc" => SortOrder::Desc,
            _ => SortOrder::Asc,
        }
    }
}

/// A tracked series as stored locally
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Title {
    pub id: i64,
    pub source_id: String,
    pub slug: String,
    pub name: String,
    pub cover: Option<String>,
    pub authors: Vec<String>,
    pub genres: Vec<String>,
    pub status: Option<String>,
    pub synopsis: Option<String>,
    pub in_library: bool,
    pub sort_order: SortOrder,
    pub last_read: Option<i64>,
    pub last_update: Option<i64>,
}

/// A chapter row as stored locally
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Chapter {
    pub id: i64,
    pub title_id: i64,
    pub slug: String,
    pub title: String,
    pub num: Option<String>,
    pub num_volume: Option<String>,
    pub url: Option<String>,
    pub date: Option<NaiveDate>,
    pub scanlators: Vec<String>,
    pub rank: i64,
    pub downloaded: bool,
    pub recent: bool,
    pub read: bool,
    pub read_progress: Option<String>,
    pub last_page_read_index: Option<i64>,
    pub last_read: Option<i64>,
}

/// A chapter as reported by a source.
///
/// Optional fields are only compared or written when the source supplies
/// them; the reading-progress fields are echoed back by sources that sync
/// progress server-side.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RemoteChapter {
    pub slug: String,
    pub title: String,
    pub num: Option<String>,
    pub num_volume: Option<String>,
    pub url: Option<String>,
    pub date: Option<NaiveDate>,
    pub scanlators: Option<Vec<String>>,
    pub read: Option<bool>,
    pub read_progress: Option<String>,
    pub last_page_read_index: Option<i64>,
    pub last_read: Option<i64>,
}

impl RemoteChapter {
    pub fn new(slug: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Full description of a title returned by `fetch_catalog_entry`
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CatalogEntry {
    pub name: String,
    pub cover: Option<String>,
    pub authors: Vec<String>,
    pub genres: Vec<String>,
    pub status: Option<String>,
    pub synopsis: Option<String>,
    pub chapters: Vec<RemoteChapter>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SearchResult {
    pub slug: String,
    pub name: String,
    pub cover: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SearchFilters {
    pub genres: Vec<String>,
    pub status: Option<String>,
}

/// Enough information for a source to fetch one page image
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PageDescriptor {
    pub index: usize,
    pub url: Option<String>,
    /// Archive member name or other source-specific locator
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ChapterContent {
    pub pages: Vec<PageDescriptor>,
}

#[derive(Debug, Clone)]
pub struct PageImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub suggested_name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Downloaded,
    Error,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Downloaded => "downloaded",
            DownloadStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DownloadStatus::Pending),
            "downloading" => Some(DownloadStatus::Downloading),
            "downloaded" => Some(DownloadStatus::Downloaded),
            "error" => Some(DownloadStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Download {
    pub chapter_id: i64,
    pub status: DownloadStatus,
    pub percent: f64,
    pub errors: i64,
    pub date: i64,
}
