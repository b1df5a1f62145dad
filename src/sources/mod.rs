//! Content source adapters.
//!
//! Every site the reader can fetch from implements [`ContentSource`]. The
//! trait only describes fetching; sessions, challenges and retries of a
//! rejected request are handled by the challenge bridge around it.

pub mod local;
pub mod site;

pub use local::LocalSource;
pub use site::{SiteProfile, SiteSelectors, SiteSource};

use crate::error::SourceError;
use crate::http_client::SourceClient;
use crate::models::{CatalogEntry, ChapterContent, HttpClientKind, PageDescriptor, PageImage, SearchFilters, SearchResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the clearance cookie issued by Cloudflare
pub const CLOUDFLARE_CLEARANCE: &str = "cf_clearance";

/// Declares that a site sits behind an anti-automation challenge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeRequirement {
    /// Page requested to check whether a stored session is still accepted;
    /// also the page the browser solves the challenge on
    pub probe_url: String,
    /// Cookie whose presence means the challenge was passed
    #[serde(default = "default_clearance_cookie")]
    pub clearance_cookie: String,
}

fn default_clearance_cookie() -> String { CLOUDFLARE_CLEARANCE.to_string() }

impl ChallengeRequirement {
    pub fn cloudflare(probe_url: impl Into<String>) -> Self {
        Self {
            probe_url: probe_url.into(),
            clearance_cookie: CLOUDFLARE_CLEARANCE.to_string(),
        }
    }
}

/// Contract every source adapter fulfils.
///
/// `Ok(None)` means the source answered but has nothing for the request.
/// Errors are always [`SourceError`]; an adapter that gets served a challenge
/// page reports [`SourceError::ChallengeRequired`] and the bridge retries once.
#[async_trait]
pub trait ContentSource: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn base_url(&self) -> &str;

    /// `Some` for sites that need a solved challenge before they serve content
    fn challenge(&self) -> Option<ChallengeRequirement> {
        None
    }

    fn http_client_kind(&self) -> HttpClientKind {
        HttpClientKind::Default
    }

    async fn fetch_catalog_entry(
        &self,
        client: &SourceClient,
        slug: &str,
    ) -> Result<Option<CatalogEntry>, SourceError>;

    async fn fetch_chapter_content(
        &self,
        client: &SourceClient,
        title_slug: &str,
        chapter_slug: &str,
    ) -> Result<Option<ChapterContent>, SourceError>;

    async fn fetch_page_image(
        &self,
        client: &SourceClient,
        page: &PageDescriptor,
    ) -> Result<Option<PageImage>, SourceError>;

    async fn search(
        &self,
        client: &SourceClient,
        term: &str,
        filters: &SearchFilters,
    ) -> Result<Option<Vec<SearchResult>>, SourceError>;
}

/// Source adapters by id
#[derive(Default, Clone)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn ContentSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one with the same id
    pub fn register(&mut self, source: Arc<dyn ContentSource>) {
        let id = source.id().to_string();
        if self.sources.insert(id.clone(), source).is_some() {
            log::warn!("Source {} registered twice, keeping the last one", id);
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ContentSource>> {
        self.sources.get(id).cloned()
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Registry with the local pseudo-source and every configured site
    pub fn from_config(config: &crate::config::Config) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalSource::new(config.local_library_dir())));
        for profile in &config.sites {
            registry.register(Arc::new(SiteSource::new(profile.clone())));
        }
        log::info!("Registered {} sources", registry.len());
        registry
    }
}
