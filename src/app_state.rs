//! Application state shared by the CLI commands
//!
//! `AppState` wires the library database, the session store, the source
//! registry, the challenge bridge and both queues together from a [`Config`].

use crate::challenge::ChallengeBridge;
use crate::config::Config;
use crate::db::Store;
use crate::error::{CoreError, SourceError};
use crate::jobs::{Downloader, Updater};
use crate::metrics::MetricsTracker;
use crate::models::{SearchFilters, SearchResult};
use crate::queue::{LogNotifier, Notifier};
use crate::reconcile::{reconcile_title, ReconcileOutcome};
use crate::session::SessionStore;
use crate::sources::{ContentSource, SourceRegistry};
use chrono::Utc;
use std::fs;
use std::sync::Arc;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

pub struct AppState {
    /// Application configuration
    pub config: Config,
    /// Library database
    pub store: Store,
    pub registry: SourceRegistry,
    /// Per-source job and challenge counters
    pub metrics: Arc<MetricsTracker>,
    pub bridge: Arc<ChallengeBridge>,
    pub updater: Updater,
    pub downloader: Downloader,
}

impl AppState {
    /// Open everything under `config.data_dir`, solving challenges in Chrome
    pub fn new(config: Config) -> Result<Self, CoreError> {
        fs::create_dir_all(&config.data_dir)?;
        let store = Store::open(config.database_path())?;
        let registry = SourceRegistry::from_config(&config);
        let metrics = Arc::new(MetricsTracker::new());
        let sessions = Arc::new(SessionStore::new(config.sessions_dir()));
        let bridge = Arc::new(ChallengeBridge::new(&config, sessions, metrics.clone()));
        Ok(Self::with_parts(config, store, registry, bridge, metrics, Arc::new(LogNotifier)))
    }

    pub fn with_parts(
        config: Config,
        store: Store,
        registry: SourceRegistry,
        bridge: Arc<ChallengeBridge>,
        metrics: Arc<MetricsTracker>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let updater = Updater::new(
            store.clone(),
            registry.clone(),
            bridge.clone(),
            notifier.clone(),
            metrics.clone(),
            config.updater.notify_batch_items,
        );
        let downloader = Downloader::new(
            store.clone(),
            registry.clone(),
            bridge.clone(),
            config.downloads_dir(),
            notifier,
            metrics.clone(),
        );
        Self {
            config,
            store,
            registry,
            metrics,
            bridge,
            updater,
            downloader,
        }
    }

    fn source(&self, id: &str) -> Result<Arc<dyn ContentSource>, CoreError> {
        self.registry.get(id).ok_or_else(|| CoreError::UnknownSource(id.to_string()))
    }

    /// Fetch a title and add it to the library; returns its id and the initial reconciliation
    pub async fn add_title(&self, source_id: &str, slug: &str) -> Result<(i64, ReconcileOutcome), CoreError> {
        let source = self.source(source_id)?;
        let entry = self
            .bridge
            .guarded(source.as_ref(), |client| {
                let source = source.clone();
                async move { source.fetch_catalog_entry(&client, slug).await }
            })
            .await?
            .ok_or(SourceError::NotFound)?;

        let id = self.store.add_title(source_id, slug, &entry.name, entry.cover.as_deref())?;
        self.store.set_in_library(id, true)?;
        let title = self.store.title(id)?;
        let outcome = reconcile_title(&self.store, &title, &entry)?;
        log::info!("Added {} ({} chapters)", entry.name, entry.chapters.len());
        Ok((id, outcome))
    }

    pub async fn search(
        &self,
        source_id: &str,
        term: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, CoreError> {
        let source = self.source(source_id)?;
        let results = self
            .bridge
            .guarded(source.as_ref(), |client| {
                let source = source.clone();
                async move { source.search(&client, term, filters).await }
            })
            .await?;
        Ok(results.unwrap_or_default())
    }

    /// Drop titles outside the library that nobody read recently
    pub fn gc(&self) -> Result<usize, CoreError> {
        let older_than = Utc::now().timestamp() - self.config.updater.gc_after_days * SECONDS_PER_DAY;
        Ok(self.store.gc_unlisted_titles(older_than)?)
    }
}
