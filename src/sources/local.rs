//! Pseudo-source reading CBZ archives from disk.
//!
//! Layout is one folder per title, one archive per chapter:
//! `<root>/<title slug>/<chapter slug>.cbz`. There is no remote truth, so the
//! reconciler never deletes chapters of this source.

use super::site::mime_from_name;
use super::ContentSource;
use crate::error::SourceError;
use crate::http_client::SourceClient;
use crate::models::{
    CatalogEntry, ChapterContent, PageDescriptor, PageImage, RemoteChapter, SearchFilters, SearchResult,
    LOCAL_SOURCE_ID,
};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use regex::Regex;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use zip::ZipArchive;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "avif"];

fn is_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("number pattern"))
}

/// Sort key comparing embedded numbers numerically ("ch 2" before "ch 10")
fn natural_key(name: &str) -> (Option<u64>, String) {
    let lead = number_re()
        .captures(name)
        .and_then(|cap| cap[1].split('.').next().and_then(|n| n.parse().ok()));
    (lead, name.to_lowercase())
}

pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn title_dir(&self, slug: &str) -> Option<PathBuf> {
        // Slugs are folder names; refuse anything that walks out of the root
        if slug.is_empty() || slug.contains('/') || slug.contains('\\') || slug == "." || slug == ".." {
            return None;
        }
        let dir = self.root.join(slug);
        dir.is_dir().then_some(dir)
    }

    /// Archive whose stem is `chapter_slug`, whatever the case of its extension
    fn archive_path(&self, title_slug: &str, chapter_slug: &str) -> Option<PathBuf> {
        let dir = self.title_dir(title_slug)?;
        Self::chapter_archives(&dir)
            .ok()?
            .into_iter()
            .find(|p| p.file_stem().is_some_and(|s| s.to_string_lossy() == chapter_slug) && p.is_file())
    }

    fn chapter_archives(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
        let entries = fs::read_dir(dir).map_err(|e| SourceError::Archive(e.to_string()))?;
        let mut archives: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("cbz"))
                    .unwrap_or(false)
            })
            .collect();
        archives.sort_by_key(|p| natural_key(&p.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default()));
        Ok(archives)
    }

    /// Image members of an archive in reading order
    pub fn read_page_names(path: &Path) -> Result<Vec<String>, SourceError> {
        let file = File::open(path).map_err(|e| SourceError::Archive(format!("{}: {}", path.display(), e)))?;
        let mut archive = ZipArchive::new(file)?;
        let mut names = Vec::new();
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if !entry.is_dir() && is_image(entry.name()) {
                names.push(entry.name().to_string());
            }
        }
        names.sort_by_key(|n| natural_key(n));
        Ok(names)
    }

    fn read_member(path: &Path, name: &str) -> Result<Vec<u8>, SourceError> {
        let file = File::open(path).map_err(|e| SourceError::Archive(format!("{}: {}", path.display(), e)))?;
        let mut archive = ZipArchive::new(file)?;
        let mut entry = archive.by_name(name)?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| SourceError::Archive(format!("{} in {}: {}", name, path.display(), e)))?;
        Ok(bytes)
    }

    fn chapter_from_archive(path: &Path) -> Option<RemoteChapter> {
        let stem = path.file_stem()?.to_string_lossy().to_string();
        let mut chapter = RemoteChapter::new(stem.clone(), stem.replace('_', " "));
        chapter.num = number_re().captures(&stem).map(|cap| cap[1].to_string());
        chapter.date = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(|t| DateTime::<Local>::from(t).date_naive());
        Some(chapter)
    }
}

#[async_trait]
impl ContentSource for LocalSource {
    fn id(&self) -> &str {
        LOCAL_SOURCE_ID
    }

    fn name(&self) -> &str {
        "Local"
    }

    fn base_url(&self) -> &str {
        ""
    }

    async fn fetch_catalog_entry(
        &self,
        _client: &SourceClient,
        slug: &str,
    ) -> Result<Option<CatalogEntry>, SourceError> {
        let Some(dir) = self.title_dir(slug) else { return Ok(None) };

        let chapters = Self::chapter_archives(&dir)?
            .iter()
            .filter_map(|p| Self::chapter_from_archive(p))
            .collect();

        let cover = ["cover.jpg", "cover.png", "cover.webp"]
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
            .map(|p| p.to_string_lossy().to_string());

        Ok(Some(CatalogEntry {
            name: slug.replace('_', " "),
            cover,
            chapters,
            ..Default::default()
        }))
    }

    async fn fetch_chapter_content(
        &self,
        _client: &SourceClient,
        title_slug: &str,
        chapter_slug: &str,
    ) -> Result<Option<ChapterContent>, SourceError> {
        let Some(path) = self.archive_path(title_slug, chapter_slug) else { return Ok(None) };
        let archive = path.to_string_lossy().to_string();
        let pages = Self::read_page_names(&path)?
            .into_iter()
            .enumerate()
            .map(|(index, name)| PageDescriptor {
                index,
                url: Some(archive.clone()),
                name: Some(name),
            })
            .collect();
        Ok(Some(ChapterContent { pages }))
    }

    async fn fetch_page_image(
        &self,
        _client: &SourceClient,
        page: &PageDescriptor,
    ) -> Result<Option<PageImage>, SourceError> {
        let (Some(archive), Some(name)) = (&page.url, &page.name) else { return Ok(None) };
        let path = Path::new(archive);
        if !path.starts_with(&self.root) || !path.is_file() {
            return Ok(None);
        }
        let bytes = Self::read_member(path, name)?;
        let suggested_name = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| name.clone());
        Ok(Some(PageImage {
            bytes,
            mime_type: mime_from_name(name).to_string(),
            suggested_name,
        }))
    }

    async fn search(
        &self,
        _client: &SourceClient,
        term: &str,
        _filters: &SearchFilters,
    ) -> Result<Option<Vec<SearchResult>>, SourceError> {
        let Ok(entries) = fs::read_dir(&self.root) else { return Ok(None) };
        let needle = term.to_lowercase();
        let mut results: Vec<SearchResult> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
            .filter(|slug| slug.to_lowercase().replace('_', " ").contains(&needle))
            .map(|slug| SearchResult {
                name: slug.replace('_', " "),
                slug,
                cover: None,
            })
            .collect();
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Some(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_order() {
        let mut names = vec!["ch 10", "ch 2", "ch 1"];
        names.sort_by_key(|n| natural_key(n));
        assert_eq!(names, vec!["ch 1", "ch 2", "ch 10"]);
    }

    #[test]
    fn test_is_image() {
        assert!(is_image("001.JPG"));
        assert!(is_image("dir/002.webp"));
        assert!(!is_image("ComicInfo.xml"));
    }

    #[test]
    fn test_title_dir_rejects_escape() {
        let source = LocalSource::new("/tmp");
        assert!(source.title_dir("..").is_none());
        assert!(source.title_dir("a/b").is_none());
        assert!(source.title_dir("").is_none());
    }
}
