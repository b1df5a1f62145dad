//! Chapter list reconciliation.
//!
//! Merges a freshly fetched remote chapter list into the chapters stored for
//! one title. Ranks are the reading-order key, so the rules are strict:
//!
//! - a local chapter missing remotely is deleted, unless it is downloaded
//!   (or belongs to the local pseudo-source), in which case it stays where it
//!   is and its rank becomes reserved;
//! - remote chapters get ranks `0, 1, 2, ...` in the source's order, skipping
//!   reserved ranks by probing forward;
//! - matched chapters only receive the fields that actually differ.
//!
//! [`plan`] is pure; [`reconcile_title`] applies a plan in one transaction.

use crate::db::{self, Store};
use crate::error::StoreError;
use crate::models::{CatalogEntry, Chapter, RemoteChapter, Title, LOCAL_SOURCE_ID};
use chrono::{Local, NaiveDate, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A chapter to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewChapter {
    pub slug: String,
    pub title: String,
    pub num: Option<String>,
    pub num_volume: Option<String>,
    pub url: Option<String>,
    pub date: NaiveDate,
    pub scanlators: Vec<String>,
    pub rank: i64,
    pub read: bool,
    pub read_progress: Option<String>,
    pub last_page_read_index: Option<i64>,
    pub last_read: Option<i64>,
}

/// Partial update of a stored chapter; `None` means "leave as is"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterChanges {
    pub title: Option<String>,
    pub num: Option<Option<String>>,
    pub num_volume: Option<Option<String>>,
    pub url: Option<Option<String>>,
    pub date: Option<Option<NaiveDate>>,
    pub scanlators: Option<Vec<String>>,
    pub rank: Option<i64>,
    pub read: Option<bool>,
    pub read_progress: Option<Option<String>>,
    pub last_page_read_index: Option<Option<i64>>,
    pub last_read: Option<Option<i64>>,
}

impl ChapterChanges {
    pub fn is_empty(&self) -> bool {
        *self == ChapterChanges::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterUpdate {
    pub id: i64,
    pub changes: ChapterChanges,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub deletes: Vec<i64>,
    /// Chapters gone remotely but kept, with their rank reserved
    pub retained: Vec<i64>,
    pub updates: Vec<ChapterUpdate>,
    pub inserts: Vec<NewChapter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub recent_ids: Vec<i64>,
    pub nb_updated: usize,
    pub nb_deleted: usize,
}

impl ReconcileOutcome {
    pub fn has_changes(&self) -> bool {
        !self.recent_ids.is_empty() || self.nb_updated > 0 || self.nb_deleted > 0
    }
}

/// Normalize a chapter or volume number: `"007"` -> `"7"`, `"7.50"` -> `"7.5"`.
/// Anything that is not a plain non-negative decimal number becomes `None`.
pub fn normalize_number(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => {
            if f.contains('.') {
                return None;
            }
            (i, f)
        }
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    let int_part = int_part.trim_start_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let frac_part = frac_part.trim_end_matches('0');

    if frac_part.is_empty() {
        Some(int_part.to_string())
    } else {
        Some(format!("{}.{}", int_part, frac_part))
    }
}

fn normalize_opt(raw: &Option<String>) -> Option<Option<String>> {
    raw.as_ref().map(|s| normalize_number(s))
}

/// Ranks held by retained chapters. New ranks probe forward past them.
struct ReservedRanks(BTreeSet<i64>);

impl ReservedRanks {
    fn next_free(&self, mut rank: i64) -> i64 {
        while self.0.contains(&rank) {
            rank += 1;
        }
        rank
    }
}

fn same_set(a: &[String], b: &[String]) -> bool {
    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}

fn diff_chapter(local: &Chapter, remote: &RemoteChapter, rank: i64) -> ChapterChanges {
    let mut changes = ChapterChanges::default();

    if remote.title != local.title {
        changes.title = Some(remote.title.clone());
    }
    if let Some(num) = normalize_opt(&remote.num) {
        if num != local.num {
            changes.num = Some(num);
        }
    }
    if let Some(num_volume) = normalize_opt(&remote.num_volume) {
        if num_volume != local.num_volume {
            changes.num_volume = Some(num_volume);
        }
    }
    if let Some(url) = &remote.url {
        if local.url.as_ref() != Some(url) {
            changes.url = Some(Some(url.clone()));
        }
    }
    if let Some(date) = remote.date {
        if local.date != Some(date) {
            changes.date = Some(Some(date));
        }
    }
    if let Some(scanlators) = &remote.scanlators {
        if !same_set(scanlators, &local.scanlators) {
            changes.scanlators = Some(scanlators.clone());
        }
    }
    if local.rank != rank {
        changes.rank = Some(rank);
    }

    // Progress echoed back by sources that sync it server-side
    if let Some(read) = remote.read {
        if read != local.read {
            changes.read = Some(read);
        }
    }
    if let Some(progress) = &remote.read_progress {
        if local.read_progress.as_ref() != Some(progress) {
            changes.read_progress = Some(Some(progress.clone()));
        }
    }
    if let Some(index) = remote.last_page_read_index {
        if local.last_page_read_index != Some(index) {
            changes.last_page_read_index = Some(Some(index));
        }
    }
    if let Some(last_read) = remote.last_read {
        if local.last_read != Some(last_read) {
            changes.last_read = Some(Some(last_read));
        }
    }

    changes
}

/// Compute the changes needed to bring `local` in line with `remote`.
///
/// `keep_all_orphans` is set for the local pseudo-source, which has no remote
/// truth: nothing it stops listing is ever deleted.
pub fn plan(
    local: &[Chapter],
    remote: &[RemoteChapter],
    keep_all_orphans: bool,
    today: NaiveDate,
) -> ReconcilePlan {
    let mut seen = HashSet::new();
    let remote: Vec<&RemoteChapter> = remote
        .iter()
        .filter(|c| {
            let first = seen.insert(c.slug.as_str());
            if !first {
                log::warn!("Duplicate remote chapter slug {}, keeping first occurrence", c.slug);
            }
            first
        })
        .collect();
    let remote_slugs = seen;

    let mut out = ReconcilePlan::default();
    let mut reserved = BTreeSet::new();
    for chapter in local {
        if remote_slugs.contains(chapter.slug.as_str()) {
            continue;
        }
        if chapter.downloaded || keep_all_orphans {
            reserved.insert(chapter.rank);
            out.retained.push(chapter.id);
        } else {
            out.deletes.push(chapter.id);
        }
    }
    let reserved = ReservedRanks(reserved);

    let by_slug: HashMap<&str, &Chapter> = local.iter().map(|c| (c.slug.as_str(), c)).collect();

    let mut rank = 0;
    for chapter in remote {
        rank = reserved.next_free(rank);

        match by_slug.get(chapter.slug.as_str()) {
            Some(existing) => {
                let changes = diff_chapter(existing, chapter, rank);
                if !changes.is_empty() {
                    out.updates.push(ChapterUpdate {
                        id: existing.id,
                        changes,
                    });
                }
            }
            None => out.inserts.push(NewChapter {
                slug: chapter.slug.clone(),
                title: chapter.title.clone(),
                num: chapter.num.as_deref().and_then(normalize_number),
                num_volume: chapter.num_volume.as_deref().and_then(normalize_number),
                url: chapter.url.clone(),
                date: chapter.date.unwrap_or(today),
                scanlators: chapter.scanlators.clone().unwrap_or_default(),
                rank,
                read: chapter.read.unwrap_or(false),
                read_progress: chapter.read_progress.clone(),
                last_page_read_index: chapter.last_page_read_index,
                last_read: chapter.last_read,
            }),
        }

        rank += 1;
    }

    out
}

/// Merge `entry` into the stored title and its chapters, atomically
pub fn reconcile_title(store: &Store, title: &Title, entry: &CatalogEntry) -> Result<ReconcileOutcome, StoreError> {
    let mut conn = store.connect()?;
    let tx = conn.transaction()?;

    let local = db::select_chapters(&tx, title.id)?;
    let plan = plan(
        &local,
        &entry.chapters,
        title.source_id == LOCAL_SOURCE_ID,
        Local::now().date_naive(),
    );

    // Order matters: the (title_id, rank) index must hold after every statement
    for id in &plan.deletes {
        db::delete_chapter(&tx, *id)?;
    }
    for update in plan.updates.iter().filter(|u| u.changes.rank.is_some()) {
        db::park_chapter_rank(&tx, update.id)?;
    }
    for update in &plan.updates {
        db::update_chapter(&tx, update.id, &update.changes)?;
    }
    let mut recent_ids = Vec::with_capacity(plan.inserts.len());
    for chapter in &plan.inserts {
        recent_ids.push(db::insert_chapter(&tx, title.id, chapter)?);
    }

    db::update_title_metadata(&tx, title.id, entry)?;

    let outcome = ReconcileOutcome {
        recent_ids,
        nb_updated: plan.updates.len(),
        nb_deleted: plan.deletes.len(),
    };
    if outcome.has_changes() {
        db::touch_title_last_update(&tx, title.id, Utc::now().timestamp())?;
    }
    tx.commit()?;

    log::debug!(
        "Reconciled {} ({}): {} new, {} updated, {} deleted, {} retained",
        title.name,
        title.id,
        outcome.recent_ids.len(),
        outcome.nb_updated,
        outcome.nb_deleted,
        plan.retained.len()
    );
    Ok(outcome)
}
