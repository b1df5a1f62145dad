//! The two queues the reader runs: title updates and chapter downloads.

use crate::challenge::ChallengeBridge;
use crate::db::Store;
use crate::error::{CoreError, SourceError};
use crate::metrics::MetricsTracker;
use crate::models::{DownloadStatus, PageImage};
use crate::queue::{JobHandler, JobQueue, JobReport, Notifier, RunSummary};
use crate::reconcile::reconcile_title;
use crate::sources::{ContentSource, SourceRegistry};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Fetches a title's catalog entry and reconciles its chapters
pub struct UpdateHandler {
    store: Store,
    registry: SourceRegistry,
    bridge: Arc<ChallengeBridge>,
}

impl UpdateHandler {
    pub fn new(store: Store, registry: SourceRegistry, bridge: Arc<ChallengeBridge>) -> Self {
        Self { store, registry, bridge }
    }
}

fn lookup(registry: &SourceRegistry, id: &str) -> Result<Arc<dyn ContentSource>, CoreError> {
    registry.get(id).ok_or_else(|| CoreError::UnknownSource(id.to_string()))
}

#[async_trait]
impl JobHandler for UpdateHandler {
    fn source_for(&self, target: i64) -> Option<String> {
        self.store.title(target).ok().map(|t| t.source_id)
    }

    async fn handle(&self, target: i64) -> Result<JobReport, CoreError> {
        let title = self.store.title(target)?;
        let source = lookup(&self.registry, &title.source_id)?;

        let entry = self
            .bridge
            .guarded(source.as_ref(), |client| {
                let source = source.clone();
                let slug = title.slug.clone();
                async move { source.fetch_catalog_entry(&client, &slug).await }
            })
            .await?
            .ok_or(SourceError::NotFound)?;

        let outcome = reconcile_title(&self.store, &title, &entry)?;
        Ok(JobReport {
            label: entry.name,
            new_chapters: outcome.recent_ids.len(),
        })
    }
}

/// Fetches every page of a chapter and writes them under the downloads folder
pub struct DownloadHandler {
    store: Store,
    registry: SourceRegistry,
    bridge: Arc<ChallengeBridge>,
    downloads_dir: PathBuf,
}

impl DownloadHandler {
    pub fn new(store: Store, registry: SourceRegistry, bridge: Arc<ChallengeBridge>, downloads_dir: PathBuf) -> Self {
        Self {
            store,
            registry,
            bridge,
            downloads_dir,
        }
    }

    /// Folder holding the pages of one chapter
    pub fn chapter_dir(&self, source_id: &str, title_slug: &str, chapter_slug: &str) -> PathBuf {
        self.downloads_dir.join(source_id).join(title_slug).join(chapter_slug)
    }

    async fn fetch_pages(
        &self,
        source: &Arc<dyn ContentSource>,
        chapter_id: i64,
        title_slug: &str,
        chapter_slug: &str,
    ) -> Result<Vec<PageImage>, SourceError> {
        self.bridge
            .guarded(source.as_ref(), |client| {
                let source = source.clone();
                let store = self.store.clone();
                async move {
                    let content = source
                        .fetch_chapter_content(&client, title_slug, chapter_slug)
                        .await?
                        .ok_or(SourceError::NotFound)?;
                    let total = content.pages.len().max(1);
                    let mut images = Vec::with_capacity(content.pages.len());
                    for page in &content.pages {
                        let image = source
                            .fetch_page_image(&client, page)
                            .await?
                            .ok_or(SourceError::NotFound)?;
                        images.push(image);
                        let percent = images.len() as f64 * 100.0 / total as f64;
                        if let Err(e) = store.set_download_status(chapter_id, DownloadStatus::Downloading, percent) {
                            log::warn!("Could not record progress of chapter {}: {}", chapter_id, e);
                        }
                    }
                    Ok::<_, SourceError>(images)
                }
            })
            .await
    }
}

fn write_pages(dir: &Path, images: &[PageImage]) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    for image in images {
        let path = dir.join(&image.suggested_name);
        let tmp = path.with_extension("part");
        fs::write(&tmp, &image.bytes)?;
        fs::rename(&tmp, &path)?;
    }
    Ok(())
}

#[async_trait]
impl JobHandler for DownloadHandler {
    fn source_for(&self, target: i64) -> Option<String> {
        let chapter = self.store.chapter(target).ok()?;
        self.store.title(chapter.title_id).ok().map(|t| t.source_id)
    }

    async fn handle(&self, target: i64) -> Result<JobReport, CoreError> {
        let chapter = self.store.chapter(target)?;
        let title = self.store.title(chapter.title_id)?;
        let source = lookup(&self.registry, &title.source_id)?;
        self.store.set_download_status(target, DownloadStatus::Downloading, 0.0)?;

        let images = match self.fetch_pages(&source, target, &title.slug, &chapter.slug).await {
            Ok(images) => images,
            Err(e) => {
                self.store.record_download_error(target)?;
                return Err(e.into());
            }
        };

        let dir = self.chapter_dir(&title.source_id, &title.slug, &chapter.slug);
        if let Err(e) = write_pages(&dir, &images) {
            self.store.record_download_error(target)?;
            return Err(e.into());
        }

        self.store.set_download_status(target, DownloadStatus::Downloaded, 100.0)?;
        self.store.set_chapter_downloaded(target, true)?;
        log::info!("Downloaded {} pages of {} / {}", images.len(), title.name, chapter.title);
        Ok(JobReport {
            label: format!("{} - {}", title.name, chapter.title),
            new_chapters: 0,
        })
    }
}

/// Entry point for title updates
pub struct Updater {
    store: Store,
    queue: JobQueue<UpdateHandler>,
    bridge: Arc<ChallengeBridge>,
}

impl Updater {
    pub fn new(
        store: Store,
        registry: SourceRegistry,
        bridge: Arc<ChallengeBridge>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<MetricsTracker>,
        notify_batch_items: bool,
    ) -> Self {
        let handler = Arc::new(UpdateHandler::new(store.clone(), registry, bridge.clone()));
        Self {
            store,
            queue: JobQueue::new("updater", handler, notifier, metrics, notify_batch_items),
            bridge,
        }
    }

    pub fn queue(&self) -> &JobQueue<UpdateHandler> {
        &self.queue
    }

    /// Update the given titles, announcing each result
    pub fn update(&self, title_ids: &[i64]) -> Option<JoinHandle<RunSummary>> {
        let added = self.queue.enqueue_many(title_ids.iter().copied(), false);
        log::info!("Queued {} of {} titles for update", added, title_ids.len());
        self.queue.start()
    }

    /// Update every title in the library as one batch
    pub fn update_library(&self) -> Result<Option<JoinHandle<RunSummary>>, CoreError> {
        let ids: Vec<i64> = self.store.library_titles()?.iter().map(|t| t.id).collect();
        let added = self.queue.enqueue_many(ids, true);
        log::info!("Queued {} library titles for update", added);
        Ok(self.queue.start())
    }

    pub fn stop(&self) {
        self.queue.stop();
    }

    /// Stop and also abort a challenge the running job may be waiting on
    pub fn abort(&self) {
        self.queue.stop();
        self.bridge.abort_active();
    }
}

/// Entry point for chapter downloads
pub struct Downloader {
    queue: JobQueue<DownloadHandler>,
}

impl Downloader {
    pub fn new(
        store: Store,
        registry: SourceRegistry,
        bridge: Arc<ChallengeBridge>,
        downloads_dir: PathBuf,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<MetricsTracker>,
    ) -> Self {
        let handler = Arc::new(DownloadHandler::new(store, registry, bridge, downloads_dir));
        Self {
            queue: JobQueue::new("downloader", handler, notifier, metrics, false),
        }
    }

    pub fn queue(&self) -> &JobQueue<DownloadHandler> {
        &self.queue
    }

    /// Queue chapters for download; pending chapters are marked as such
    pub fn download(&self, chapter_ids: &[i64]) -> Result<Option<JoinHandle<RunSummary>>, CoreError> {
        let store = &self.queue.handler().store;
        for id in chapter_ids {
            if self.queue.enqueue(*id, false) {
                store.set_download_status(*id, DownloadStatus::Pending, 0.0)?;
            }
        }
        Ok(self.queue.start())
    }

    pub fn stop(&self) {
        self.queue.stop();
    }
}
