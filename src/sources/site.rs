//! Generic HTML adapter driven by a [`SiteProfile`].
//!
//! Most scanlation sites run the same WordPress manga theme with small
//! variations, so one adapter covers them: the profile carries the URL
//! templates and CSS selectors, and [`SiteProfile::wp_manga`] gives the
//! theme defaults. Parsing is split from fetching so it can be exercised on
//! saved pages.

use super::{ChallengeRequirement, ContentSource};
use crate::error::SourceError;
use crate::http_client::SourceClient;
use crate::models::{
    CatalogEntry, ChapterContent, HttpClientKind, PageDescriptor, PageImage, RemoteChapter, SearchFilters,
    SearchResult,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Hook deriving a chapter label from the link text and href
pub type ChapterLabelFn = fn(text: &str, href: &str) -> String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSelectors {
    #[serde(default = "default_name_selector")]
    pub name: String,
    #[serde(default = "default_cover_selector")]
    pub cover: String,
    #[serde(default = "default_authors_selector")]
    pub authors: String,
    #[serde(default = "default_genres_selector")]
    pub genres: String,
    #[serde(default = "default_status_selector")]
    pub status: String,
    #[serde(default = "default_synopsis_selector")]
    pub synopsis: String,
    /// Container of one chapter row (link plus release date)
    #[serde(default = "default_chapter_item_selector")]
    pub chapter_item: String,
    #[serde(default = "default_chapter_date_selector")]
    pub chapter_date: String,
    /// Tried in order on chapter links when no chapter row matches
    #[serde(default = "default_chapter_link_selectors")]
    pub chapter_links: Vec<String>,
    #[serde(default = "default_pages_selector")]
    pub pages: String,
    #[serde(default = "default_search_item_selector")]
    pub search_item: String,
    #[serde(default = "default_search_link_selector")]
    pub search_link: String,
}

fn default_name_selector() -> String { "div.post-title h1, div.post-title h3".into() }
fn default_cover_selector() -> String { "div.summary_image img".into() }
fn default_authors_selector() -> String { "div.author-content a, div.artist-content a".into() }
fn default_genres_selector() -> String { "div.genres-content a".into() }
fn default_status_selector() -> String { "div.post-status div.post-content_item div.summary-content".into() }
fn default_synopsis_selector() -> String { "div.description-summary div.summary__content, div.summary__content".into() }
fn default_chapter_item_selector() -> String { "li.wp-manga-chapter".into() }
fn default_chapter_date_selector() -> String { "span.chapter-release-date".into() }
fn default_pages_selector() -> String { "div.reading-content img".into() }
fn default_search_item_selector() -> String { "div.c-tabs-item__content, div.page-item-detail".into() }
fn default_search_link_selector() -> String { "div.post-title a, h3 a".into() }

fn default_chapter_link_selectors() -> Vec<String> {
    [
        "li.wp-manga-chapter a",
        "ul.main.version-chap li a",
        "div.listing-chapters_wrap a",
        "div.eplister a",
        "div#chapterlist a",
        "div.chapter-list a",
        "ul.chapter-list a",
        "li.chapter a",
        "ul.version-chap a",
        "div.page-content-listing a[href*='chapter']",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            name: default_name_selector(),
            cover: default_cover_selector(),
            authors: default_authors_selector(),
            genres: default_genres_selector(),
            status: default_status_selector(),
            synopsis: default_synopsis_selector(),
            chapter_item: default_chapter_item_selector(),
            chapter_date: default_chapter_date_selector(),
            chapter_links: default_chapter_link_selectors(),
            pages: default_pages_selector(),
            search_item: default_search_item_selector(),
            search_link: default_search_link_selector(),
        }
    }
}

/// Everything that differs between two sites sharing the adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    pub id: String,
    pub name: String,
    pub base_url: String,

    /// Path of a title page, `{slug}` is substituted
    #[serde(default = "default_title_path")]
    pub title_path: String,

    /// Path of a chapter reader page, `{title}` and `{chapter}` are substituted
    #[serde(default = "default_chapter_path")]
    pub chapter_path: String,

    #[serde(default = "default_search_path")]
    pub search_path: String,

    /// Query parameters of a search, `{term}` is substituted
    #[serde(default = "default_search_params")]
    pub search_params: Vec<(String, String)>,

    #[serde(default)]
    pub selectors: SiteSelectors,

    /// chrono format of absolute release dates
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Site lists its newest chapter first
    #[serde(default = "default_true")]
    pub newest_first: bool,

    /// Fall back to the theme's AJAX chapter endpoints when the page has none
    #[serde(default = "default_true")]
    pub ajax_chapters: bool,

    #[serde(default)]
    pub challenge: Option<ChallengeRequirement>,

    #[serde(default)]
    pub client_kind: HttpClientKind,

    #[serde(skip)]
    pub chapter_label: Option<ChapterLabelFn>,
}

fn default_true() -> bool { true }
fn default_title_path() -> String { "/manga/{slug}/".into() }
fn default_chapter_path() -> String { "/manga/{title}/{chapter}/".into() }
fn default_search_path() -> String { "/".into() }
fn default_date_format() -> String { "%B %d, %Y".into() }

fn default_search_params() -> Vec<(String, String)> {
    vec![
        ("s".into(), "{term}".into()),
        ("post_type".into(), "wp-manga".into()),
    ]
}

impl SiteProfile {
    /// Profile for a site running the stock WordPress manga theme
    pub fn wp_manga(id: impl Into<String>, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            title_path: default_title_path(),
            chapter_path: default_chapter_path(),
            search_path: default_search_path(),
            search_params: default_search_params(),
            selectors: SiteSelectors::default(),
            date_format: default_date_format(),
            newest_first: true,
            ajax_chapters: true,
            challenge: None,
            client_kind: HttpClientKind::Default,
            chapter_label: None,
        }
    }

    /// Same profile, behind a Cloudflare challenge solved on the home page
    pub fn behind_cloudflare(mut self) -> Self {
        self.challenge = Some(ChallengeRequirement::cloudflare(format!("{}/", self.base_url)));
        self.client_kind = HttpClientKind::Impersonating;
        self
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn title_url(&self, slug: &str) -> String {
        format!("{}{}", self.base(), self.title_path.replace("{slug}", slug))
    }

    pub fn chapter_url(&self, title_slug: &str, chapter_slug: &str) -> String {
        let path = self
            .chapter_path
            .replace("{title}", title_slug)
            .replace("{chapter}", chapter_slug);
        format!("{}{}", self.base(), path)
    }

    pub fn search_url(&self, term: &str, filters: &SearchFilters) -> Result<Url, SourceError> {
        let mut params: Vec<(String, String)> = self
            .search_params
            .iter()
            .map(|(k, v)| (k.clone(), v.replace("{term}", term)))
            .collect();
        for genre in &filters.genres {
            params.push(("genre[]".into(), genre.clone()));
        }
        if let Some(status) = &filters.status {
            params.push(("status[]".into(), status.clone()));
        }
        Url::parse_with_params(&format!("{}{}", self.base(), self.search_path), &params)
            .map_err(|e| SourceError::Layout(format!("bad search url for {}: {}", self.id, e)))
    }

    fn label(&self, text: &str, href: &str) -> String {
        match self.chapter_label {
            Some(hook) => hook(text, href),
            None => derive_chapter_label(text, href),
        }
    }
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Layout(format!("invalid selector {:?}: {:?}", css, e)))
}

fn chapter_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:chapter|chap|ch\.?|episode|ep\.?)\s*[-/]?\s*(\d+(?:\.\d+)?)").expect("chapter number pattern")
    })
}

fn volume_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)vol(?:ume)?\.?\s*[-/]?\s*(\d+)").expect("volume number pattern"))
}

fn relative_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s*(sec|min|mins|minute|hour|day|week|month|year)s?\s+ago").expect("relative date pattern")
    })
}

fn text_of(el: ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-normalized title with listing badges removed
pub fn clean_title(raw: &str) -> Option<String> {
    let mut cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    for badge in ["HOT", "NEW", "🔥 Hot", "Hot", "New"] {
        if let Some(rest) = cleaned.strip_prefix(badge) {
            if rest.starts_with(' ') {
                cleaned = rest.trim().to_string();
            }
        }
    }
    if cleaned.is_empty() || cleaned.chars().all(|c| !c.is_alphanumeric()) {
        return None;
    }
    Some(cleaned)
}

/// Readable label for a chapter link, falling back on the URL
pub fn derive_chapter_label(text: &str, href: &str) -> String {
    let t = text.trim();
    if !t.is_empty() && t != "#" {
        return t.to_string();
    }
    let lower = href.to_lowercase();
    if let Some(cap) = chapter_number_re().captures(&lower) {
        return format!("Ch.{}", &cap[1]);
    }
    if let Some(cap) = volume_number_re().captures(&lower) {
        return format!("Vol.{}", &cap[1]);
    }
    href.to_string()
}

/// Last non-empty path segment of a URL
pub fn slug_from_url(href: &str) -> Option<String> {
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.split(&['?', '#'][..]).next().unwrap_or(href).to_string(),
    };
    path.split('/').filter(|s| !s.is_empty()).last().map(|s| s.to_string())
}

/// Release date as printed by the site, absolute or "3 days ago"
pub fn parse_release_date(text: &str, format: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, format) {
        return Some(date);
    }
    if let Some(cap) = relative_date_re().captures(text) {
        let n: i64 = cap[1].parse().ok()?;
        let days = match cap[2].to_lowercase().as_str() {
            "sec" | "min" | "mins" | "minute" | "hour" => 0,
            "day" => n,
            "week" => n * 7,
            "month" => n * 30,
            _ => n * 365,
        };
        return today.checked_sub_signed(ChronoDuration::days(days));
    }
    match text.to_lowercase().as_str() {
        "today" | "new" => Some(today),
        "yesterday" => today.pred_opt(),
        _ => None,
    }
}

fn absolute(base: Option<&Url>, href: &str) -> String {
    match base {
        Some(base) => base.join(href).map(|u| u.to_string()).unwrap_or_else(|_| href.to_string()),
        None => href.to_string(),
    }
}

fn remote_chapter(profile: &SiteProfile, text: &str, href: &str, page_base: Option<&Url>) -> Option<RemoteChapter> {
    let url = absolute(page_base, href.trim());
    let slug = slug_from_url(&url)?;
    let label = profile.label(text, &url);
    let mut chapter = RemoteChapter::new(slug, label.clone());
    let lower_url = url.to_lowercase();
    chapter.num = chapter_number_re()
        .captures(&label)
        .or_else(|| chapter_number_re().captures(&lower_url))
        .map(|cap| cap[1].to_string());
    chapter.num_volume = volume_number_re().captures(&label).map(|cap| cap[1].to_string());
    chapter.url = Some(url);
    Some(chapter)
}

/// Chapter list of a title page, oldest chapter first
pub fn parse_chapter_list(
    html: &str,
    profile: &SiteProfile,
    page_url: &str,
    today: NaiveDate,
) -> Result<Vec<RemoteChapter>, SourceError> {
    let document = Html::parse_document(html);
    let page_base = Url::parse(page_url).ok();
    let item_sel = selector(&profile.selectors.chapter_item)?;
    let date_sel = selector(&profile.selectors.chapter_date)?;
    let link_sel = selector("a")?;

    let mut chapters = Vec::new();
    for item in document.select(&item_sel) {
        let Some(link) = item.select(&link_sel).next() else { continue };
        let Some(href) = link.value().attr("href").or_else(|| link.value().attr("data-href")) else {
            continue;
        };
        if let Some(mut chapter) = remote_chapter(profile, &text_of(link), href, page_base.as_ref()) {
            chapter.date = item
                .select(&date_sel)
                .next()
                .and_then(|d| parse_release_date(&text_of(d), &profile.date_format, today));
            chapters.push(chapter);
        }
    }

    if chapters.is_empty() {
        for css in &profile.selectors.chapter_links {
            let sel = selector(css)?;
            for a in document.select(&sel) {
                if let Some(href) = a.value().attr("href").or_else(|| a.value().attr("data-href")) {
                    if let Some(chapter) = remote_chapter(profile, &text_of(a), href, page_base.as_ref()) {
                        chapters.push(chapter);
                    }
                }
            }
            if !chapters.is_empty() {
                log::debug!("Found {} chapters using selector: {}", chapters.len(), css);
                break;
            }
        }
    }

    let mut seen = HashSet::new();
    chapters.retain(|c| seen.insert(c.slug.clone()));
    if profile.newest_first {
        chapters.reverse();
    }
    Ok(chapters)
}

/// Title page into a catalog entry, chapters included
pub fn parse_catalog(
    html: &str,
    profile: &SiteProfile,
    page_url: &str,
    today: NaiveDate,
) -> Result<CatalogEntry, SourceError> {
    let document = Html::parse_document(html);
    let s = &profile.selectors;

    let name = document
        .select(&selector(&s.name)?)
        .next()
        .map(text_of)
        .and_then(|t| clean_title(&t))
        .ok_or_else(|| SourceError::Layout(format!("no title name on {}", page_url)))?;

    let cover = document.select(&selector(&s.cover)?).next().and_then(|img| {
        let v = img.value();
        v.attr("data-src")
            .or_else(|| v.attr("data-lazy-src"))
            .or_else(|| v.attr("src"))
            .map(|src| src.trim().to_string())
    });

    let list = |css: &str| -> Result<Vec<String>, SourceError> {
        let mut values: Vec<String> = Vec::new();
        for el in document.select(&selector(css)?) {
            let t = text_of(el);
            if !t.is_empty() && !values.contains(&t) {
                values.push(t);
            }
        }
        Ok(values)
    };

    let first = |css: &str| -> Result<Option<String>, SourceError> {
        Ok(document
            .select(&selector(css)?)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty()))
    };

    Ok(CatalogEntry {
        name,
        cover,
        authors: list(&s.authors)?,
        genres: list(&s.genres)?,
        status: first(&s.status)?,
        synopsis: first(&s.synopsis)?,
        chapters: parse_chapter_list(html, profile, page_url, today)?,
    })
}

/// Reader page into page descriptors, in reading order
pub fn parse_pages(html: &str, profile: &SiteProfile, page_url: &str) -> Result<Vec<PageDescriptor>, SourceError> {
    let document = Html::parse_document(html);
    let page_base = Url::parse(page_url).ok();
    let mut pages = Vec::new();
    for img in document.select(&selector(&profile.selectors.pages)?) {
        let v = img.value();
        let src = v
            .attr("data-src")
            .or_else(|| v.attr("data-lazy-src"))
            .or_else(|| v.attr("src"))
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.starts_with("data:"));
        if let Some(src) = src {
            pages.push(PageDescriptor {
                index: pages.len(),
                url: Some(absolute(page_base.as_ref(), src)),
                name: None,
            });
        }
    }
    Ok(pages)
}

/// Search result listing
pub fn parse_search(html: &str, profile: &SiteProfile) -> Result<Vec<SearchResult>, SourceError> {
    let document = Html::parse_document(html);
    let link_sel = selector(&profile.selectors.search_link)?;
    let img_sel = selector("img")?;
    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for item in document.select(&selector(&profile.selectors.search_item)?) {
        let Some(link) = item.select(&link_sel).next() else { continue };
        let Some(href) = link.value().attr("href") else { continue };
        let raw = link
            .value()
            .attr("title")
            .map(|t| t.to_string())
            .unwrap_or_else(|| text_of(link));
        let (Some(slug), Some(name)) = (slug_from_url(href), clean_title(&raw)) else {
            continue;
        };
        let cover = item.select(&img_sel).next().and_then(|img| {
            img.value()
                .attr("data-src")
                .or_else(|| img.value().attr("src"))
                .map(|s| s.trim().to_string())
        });
        if seen.insert(slug.clone()) {
            results.push(SearchResult { slug, name, cover });
        }
    }
    Ok(results)
}

fn manga_post_id(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let holder = Selector::parse("div#manga-chapters-holder").ok()?;
    if let Some(id) = document.select(&holder).next().and_then(|d| d.value().attr("data-id")) {
        return Some(id.to_string());
    }
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"manga_id["']?\s*[:=]\s*["']?(\d+)"#).expect("manga id pattern"));
    re.captures(html).map(|cap| cap[1].to_string())
}

/// Wrap a chapter fragment returned by the AJAX endpoints so it parses like a page
fn wrap_fragment(fragment: &str) -> String {
    format!("<html><body>{}</body></html>", fragment)
}

pub fn mime_from_name(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".avif") {
        "image/avif"
    } else {
        "image/jpeg"
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/avif" => "avif",
        _ => "jpg",
    }
}

pub struct SiteSource {
    profile: SiteProfile,
}

impl SiteSource {
    pub fn new(profile: SiteProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    async fn ajax_chapters(
        &self,
        client: &SourceClient,
        title_url: &str,
        page: &str,
        today: NaiveDate,
    ) -> Result<Vec<RemoteChapter>, SourceError> {
        let endpoint = format!("{}/ajax/chapters/", title_url.trim_end_matches('/'));
        let fragment = match client.post_form(&endpoint, &[]).await {
            Ok(body) => body,
            Err(e) => {
                let Some(post_id) = manga_post_id(page) else {
                    log::debug!("No AJAX chapter endpoint for {}: {}", title_url, e);
                    return Ok(Vec::new());
                };
                let admin = format!("{}/wp-admin/admin-ajax.php", self.profile.base());
                client
                    .post_form(&admin, &[("action", "manga_get_chapters"), ("manga", post_id.as_str())])
                    .await?
            }
        };
        parse_chapter_list(&wrap_fragment(&fragment), &self.profile, title_url, today)
    }
}

#[async_trait]
impl ContentSource for SiteSource {
    fn id(&self) -> &str {
        &self.profile.id
    }

    fn name(&self) -> &str {
        &self.profile.name
    }

    fn base_url(&self) -> &str {
        &self.profile.base_url
    }

    fn challenge(&self) -> Option<ChallengeRequirement> {
        self.profile.challenge.clone()
    }

    fn http_client_kind(&self) -> HttpClientKind {
        self.profile.client_kind
    }

    async fn fetch_catalog_entry(
        &self,
        client: &SourceClient,
        slug: &str,
    ) -> Result<Option<CatalogEntry>, SourceError> {
        let url = self.profile.title_url(slug);
        let page = match client.get_text(&url).await {
            Ok(page) => page,
            Err(SourceError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let today = Local::now().date_naive();
        let mut entry = parse_catalog(&page, &self.profile, &url, today)?;
        if entry.chapters.is_empty() && self.profile.ajax_chapters {
            entry.chapters = self.ajax_chapters(client, &url, &page, today).await?;
        }
        log::debug!("{}: {} chapters for {}", self.profile.id, entry.chapters.len(), slug);
        Ok(Some(entry))
    }

    async fn fetch_chapter_content(
        &self,
        client: &SourceClient,
        title_slug: &str,
        chapter_slug: &str,
    ) -> Result<Option<ChapterContent>, SourceError> {
        let url = self.profile.chapter_url(title_slug, chapter_slug);
        let page = match client.get_text(&url).await {
            Ok(page) => page,
            Err(SourceError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let pages = parse_pages(&page, &self.profile, &url)?;
        if pages.is_empty() {
            return Err(SourceError::Layout(format!("no page images on {}", url)));
        }
        Ok(Some(ChapterContent { pages }))
    }

    async fn fetch_page_image(
        &self,
        client: &SourceClient,
        page: &PageDescriptor,
    ) -> Result<Option<PageImage>, SourceError> {
        let Some(url) = &page.url else { return Ok(None) };
        let (bytes, content_type) = match client.get_bytes(url).await {
            Ok(found) => found,
            Err(SourceError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let mime_type = content_type
            .filter(|t| t.starts_with("image/"))
            .unwrap_or_else(|| mime_from_name(url).to_string());
        let suggested_name = format!("{:03}.{}", page.index + 1, extension_for_mime(&mime_type));
        Ok(Some(PageImage {
            bytes,
            mime_type,
            suggested_name,
        }))
    }

    async fn search(
        &self,
        client: &SourceClient,
        term: &str,
        filters: &SearchFilters,
    ) -> Result<Option<Vec<SearchResult>>, SourceError> {
        let url = self.profile.search_url(term, filters)?;
        let page = client.get_text(url.as_str()).await?;
        let results = parse_search(&page, &self.profile)?;
        Ok(Some(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn profile() -> SiteProfile {
        SiteProfile::wp_manga("example", "Example", "https://example.com/")
    }

    #[test]
    fn test_urls() {
        let p = profile();
        assert_eq!(p.title_url("solo"), "https://example.com/manga/solo/");
        assert_eq!(p.chapter_url("solo", "chapter-3"), "https://example.com/manga/solo/chapter-3/");
        let url = p.search_url("solo leveling", &SearchFilters::default()).unwrap();
        assert_eq!(url.as_str(), "https://example.com/?s=solo+leveling&post_type=wp-manga");
    }

    #[test]
    fn test_release_dates() {
        assert_eq!(
            parse_release_date("January 5, 2024", "%B %d, %Y", today()),
            NaiveDate::from_ymd_opt(2024, 1, 5)
        );
        assert_eq!(
            parse_release_date("3 days ago", "%B %d, %Y", today()),
            NaiveDate::from_ymd_opt(2024, 3, 7)
        );
        assert_eq!(parse_release_date("2 hours ago", "%B %d, %Y", today()), Some(today()));
        assert_eq!(parse_release_date("soon", "%B %d, %Y", today()), None);
    }

    #[test]
    fn test_slug_from_url() {
        assert_eq!(slug_from_url("https://example.com/manga/solo/chapter-1/"), Some("chapter-1".into()));
        assert_eq!(slug_from_url("/manga/solo/?style=list"), Some("solo".into()));
        assert_eq!(slug_from_url("https://example.com/"), None);
    }

    #[test]
    fn test_derive_chapter_label() {
        assert_eq!(derive_chapter_label("Chapter 4", "x"), "Chapter 4");
        assert_eq!(derive_chapter_label("", "https://e.com/solo/chapter-12.5/"), "Ch.12.5");
        assert_eq!(derive_chapter_label("#", "https://e.com/solo/vol-2/"), "Vol.2");
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  HOT   Solo\n Leveling "), Some("Solo Leveling".into()));
        assert_eq!(clean_title(" -- "), None);
    }

    #[test]
    fn test_chapter_label_hook() {
        let mut p = profile();
        p.chapter_label = Some(|_, href| format!("Episode from {}", href.len()));
        let html = r#"<ul><li class="wp-manga-chapter"><a href="/manga/x/ep-1/">Ep 1</a></li></ul>"#;
        let chapters = parse_chapter_list(html, &p, "https://example.com/manga/x/", today()).unwrap();
        assert!(chapters[0].title.starts_with("Episode from"));
    }

    #[test]
    fn test_chapter_number_falls_back_to_url() {
        let mut p = profile();
        p.chapter_label = Some(|_, _| "Special".to_string());
        let html = r#"<ul><li class="wp-manga-chapter"><a href="/manga/x/Chapter-7.5/">Bonus</a></li></ul>"#;
        let chapters = parse_chapter_list(html, &p, "https://example.com/manga/x/", today()).unwrap();
        assert_eq!(chapters[0].title, "Special");
        assert_eq!(chapters[0].num.as_deref(), Some("7.5"));
    }

    #[test]
    fn test_invalid_selector_is_layout_error() {
        let mut p = profile();
        p.selectors.pages = "div[".into();
        assert!(matches!(
            parse_pages("<html></html>", &p, "https://example.com/"),
            Err(SourceError::Layout(_))
        ));
    }
}
