use crate::error::StoreError;
use crate::models::{CatalogEntry, Chapter, Download, DownloadStatus, SortOrder, Title};
use crate::reconcile::{ChapterChanges, NewChapter};
use chrono::{NaiveDate, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type Result<T> = std::result::Result<T, StoreError>;

const TITLE_COLUMNS: &str = "id, source_id, slug, name, cover, authors, genres, status, synopsis, in_library, sort_order, last_read, last_update";
const CHAPTER_COLUMNS: &str = "id, title_id, slug, title, num, num_volume, url, date, scanlators, rank, downloaded, recent, read, read_progress, last_page_read_index, last_read";

/// Handle on the library database.
///
/// No connection is kept around: every logical operation opens its own and
/// drops it when done, so the store can be shared freely between workers.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Open (and migrate) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = store.connect()?;
        create_tables(&conn)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Insert a title if `(source_id, slug)` is unknown, returning its id either way
    pub fn add_title(&self, source_id: &str, slug: &str, name: &str, cover: Option<&str>) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR IGNORE INTO titles (source_id, slug, name, cover) VALUES (?1, ?2, ?3, ?4)",
            params![source_id, slug, name, cover],
        )?;
        let id = conn.query_row(
            "SELECT id FROM titles WHERE source_id = ?1 AND slug = ?2",
            params![source_id, slug],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn title(&self, id: i64) -> Result<Title> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {} FROM titles WHERE id = ?1", TITLE_COLUMNS),
            params![id],
            row_to_title,
        )
        .optional()?
        .ok_or(StoreError::Missing { kind: "title", id })
    }

    pub fn title_by_slug(&self, source_id: &str, slug: &str) -> Result<Option<Title>> {
        let conn = self.connect()?;
        let title = conn
            .query_row(
                &format!("SELECT {} FROM titles WHERE source_id = ?1 AND slug = ?2", TITLE_COLUMNS),
                params![source_id, slug],
                row_to_title,
            )
            .optional()?;
        Ok(title)
    }

    /// Titles in the library, ordered by name
    pub fn library_titles(&self) -> Result<Vec<Title>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM titles WHERE in_library = 1 ORDER BY name COLLATE NOCASE",
            TITLE_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_title)?;
        let mut titles = Vec::new();
        for r in rows {
            titles.push(r?);
        }
        Ok(titles)
    }

    pub fn set_in_library(&self, id: i64, in_library: bool) -> Result<()> {
        let conn = self.connect()?;
        let n = conn.execute(
            "UPDATE titles SET in_library = ?1 WHERE id = ?2",
            params![in_library, id],
        )?;
        if n == 0 {
            return Err(StoreError::Missing { kind: "title", id });
        }
        Ok(())
    }

    pub fn set_sort_order(&self, id: i64, order: SortOrder) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE titles SET sort_order = ?1 WHERE id = ?2",
            params![order.as_str(), id],
        )?;
        Ok(())
    }

    pub fn delete_title(&self, id: i64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM titles WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Chapters of a title in reading order
    pub fn chapters(&self, title_id: i64) -> Result<Vec<Chapter>> {
        let conn = self.connect()?;
        select_chapters(&conn, title_id)
    }

    pub fn chapter(&self, id: i64) -> Result<Chapter> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {} FROM chapters WHERE id = ?1", CHAPTER_COLUMNS),
            params![id],
            row_to_chapter,
        )
        .optional()?
        .ok_or(StoreError::Missing { kind: "chapter", id })
    }

    pub fn set_chapter_downloaded(&self, id: i64, downloaded: bool) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE chapters SET downloaded = ?1 WHERE id = ?2",
            params![downloaded, id],
        )?;
        Ok(())
    }

    /// Record reading progress, also stamping the owning title's `last_read`
    pub fn set_chapter_read(&self, id: i64, read: bool, last_page_read_index: Option<i64>) -> Result<()> {
        let mut conn = self.connect()?;
        let now = Utc::now().timestamp();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE chapters SET read = ?1, last_page_read_index = ?2, last_read = ?3, recent = 0 WHERE id = ?4",
            params![read, last_page_read_index, now, id],
        )?;
        tx.execute(
            "UPDATE titles SET last_read = ?1 WHERE id = (SELECT title_id FROM chapters WHERE id = ?2)",
            params![now, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Drop titles outside the library that have not been read since `older_than`
    /// and hold no downloaded chapter. Chapters go with them.
    pub fn gc_unlisted_titles(&self, older_than: i64) -> Result<usize> {
        let conn = self.connect()?;
        let n = conn.execute(
            "DELETE FROM titles
             WHERE in_library = 0
               AND coalesce(last_read, 0) < ?1
               AND NOT EXISTS (SELECT 1 FROM chapters c WHERE c.title_id = titles.id AND c.downloaded = 1)",
            params![older_than],
        )?;
        if n > 0 {
            log::info!("Garbage-collected {} unlisted titles", n);
        }
        Ok(n)
    }

    pub fn add_category(&self, label: &str) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute("INSERT OR IGNORE INTO categories (label) VALUES (?1)", params![label])?;
        let id = conn.query_row(
            "SELECT id FROM categories WHERE label = ?1",
            params![label],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn assign_category(&self, title_id: i64, category_id: i64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR IGNORE INTO categories_titles (category_id, title_id) VALUES (?1, ?2)",
            params![category_id, title_id],
        )?;
        Ok(())
    }

    pub fn category_title_ids(&self, category_id: i64) -> Result<Vec<i64>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT title_id FROM categories_titles WHERE category_id = ?1 ORDER BY title_id",
        )?;
        let rows = stmt.query_map(params![category_id], |row| row.get(0))?;
        let mut ids = Vec::new();
        for r in rows {
            ids.push(r?);
        }
        Ok(ids)
    }

    pub fn set_download_status(&self, chapter_id: i64, status: DownloadStatus, percent: f64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO downloads (chapter_id, status, percent, errors, date) VALUES (?1, ?2, ?3, 0, ?4)
             ON CONFLICT(chapter_id) DO UPDATE SET status = excluded.status, percent = excluded.percent, date = excluded.date",
            params![chapter_id, status.as_str(), percent, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn record_download_error(&self, chapter_id: i64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE downloads SET errors = errors + 1, status = 'error' WHERE chapter_id = ?1",
            params![chapter_id],
        )?;
        Ok(())
    }

    pub fn download(&self, chapter_id: i64) -> Result<Option<Download>> {
        let conn = self.connect()?;
        let download = conn
            .query_row(
                "SELECT chapter_id, status, percent, errors, date FROM downloads WHERE chapter_id = ?1",
                params![chapter_id],
                |row| {
                    let status: String = row.get(1)?;
                    Ok(Download {
                        chapter_id: row.get(0)?,
                        status: DownloadStatus::parse(&status).unwrap_or(DownloadStatus::Error),
                        percent: row.get(2)?,
                        errors: row.get(3)?,
                        date: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(download)
    }
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    log::debug!("Creating tables if not exists...");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS titles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            cover TEXT,
            authors TEXT NOT NULL DEFAULT '[]',
            genres TEXT NOT NULL DEFAULT '[]',
            status TEXT,
            synopsis TEXT,
            in_library INTEGER NOT NULL DEFAULT 0,
            sort_order TEXT NOT NULL DEFAULT 'asc',
            last_read INTEGER,
            last_update INTEGER,
            UNIQUE(source_id, slug)
        );",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chapters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title_id INTEGER NOT NULL,
            slug TEXT NOT NULL,
            title TEXT NOT NULL,
            num TEXT,
            num_volume TEXT,
            url TEXT,
            date TEXT,
            scanlators TEXT NOT NULL DEFAULT '[]',
            rank INTEGER NOT NULL,
            downloaded INTEGER NOT NULL DEFAULT 0,
            recent INTEGER NOT NULL DEFAULT 0,
            read INTEGER NOT NULL DEFAULT 0,
            last_page_read_index INTEGER,
            last_read INTEGER,
            FOREIGN KEY (title_id) REFERENCES titles (id) ON DELETE CASCADE,
            UNIQUE(title_id, slug),
            UNIQUE(title_id, rank)
        );",
        [],
    )?;

    // Migrations for existing DBs: add missing columns
    ensure_column(conn, "chapters", "read_progress", "TEXT")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            label TEXT NOT NULL UNIQUE
        );",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories_titles (
            category_id INTEGER NOT NULL,
            title_id INTEGER NOT NULL,
            FOREIGN KEY (category_id) REFERENCES categories (id) ON DELETE CASCADE,
            FOREIGN KEY (title_id) REFERENCES titles (id) ON DELETE CASCADE,
            UNIQUE(category_id, title_id)
        );",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS downloads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chapter_id INTEGER NOT NULL UNIQUE,
            status TEXT NOT NULL,
            percent REAL NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0,
            date INTEGER NOT NULL,
            FOREIGN KEY (chapter_id) REFERENCES chapters (id) ON DELETE CASCADE
        );",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ch_title ON chapters(title_id);",
        [],
    )?;

    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, column: &str, column_type: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut exists = false;
    let rows = stmt.query_map([], |row| {
        let name: String = row.get(1)?; // 2nd column is name
        Ok(name)
    })?;
    for r in rows {
        if r? == column {
            exists = true;
            break;
        }
    }
    if !exists {
        let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_type);
        conn.execute(&sql, [])?;
    }
    Ok(())
}

pub(crate) fn select_chapters(conn: &Connection, title_id: i64) -> Result<Vec<Chapter>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM chapters WHERE title_id = ?1 ORDER BY rank",
        CHAPTER_COLUMNS
    ))?;
    let rows = stmt.query_map(params![title_id], row_to_chapter)?;
    let mut chapters = Vec::new();
    for r in rows {
        chapters.push(r?);
    }
    Ok(chapters)
}

pub(crate) fn insert_chapter(conn: &Connection, title_id: i64, chapter: &NewChapter) -> Result<i64> {
    conn.execute(
        "INSERT INTO chapters (title_id, slug, title, num, num_volume, url, date, scanlators, rank, recent, read, read_progress, last_page_read_index, last_read)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?11, ?12, ?13)",
        params![
            title_id,
            chapter.slug,
            chapter.title,
            chapter.num,
            chapter.num_volume,
            chapter.url,
            chapter.date.to_string(),
            serde_json::to_string(&chapter.scanlators)?,
            chapter.rank,
            chapter.read,
            chapter.read_progress,
            chapter.last_page_read_index,
            chapter.last_read,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Move a chapter's rank out of the way before ranks are rewritten
pub(crate) fn park_chapter_rank(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE chapters SET rank = -id WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

pub(crate) fn update_chapter(conn: &Connection, id: i64, changes: &ChapterChanges) -> Result<()> {
    let mut columns: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(title) = &changes.title {
        columns.push("title");
        values.push(Value::Text(title.clone()));
    }
    if let Some(num) = &changes.num {
        columns.push("num");
        values.push(opt_text(num.as_deref()));
    }
    if let Some(num_volume) = &changes.num_volume {
        columns.push("num_volume");
        values.push(opt_text(num_volume.as_deref()));
    }
    if let Some(url) = &changes.url {
        columns.push("url");
        values.push(opt_text(url.as_deref()));
    }
    if let Some(date) = &changes.date {
        columns.push("date");
        values.push(opt_text(date.map(|d| d.to_string()).as_deref()));
    }
    if let Some(scanlators) = &changes.scanlators {
        columns.push("scanlators");
        values.push(Value::Text(serde_json::to_string(scanlators)?));
    }
    if let Some(rank) = changes.rank {
        columns.push("rank");
        values.push(Value::Integer(rank));
    }
    if let Some(read) = changes.read {
        columns.push("read");
        values.push(Value::Integer(read as i64));
    }
    if let Some(read_progress) = &changes.read_progress {
        columns.push("read_progress");
        values.push(opt_text(read_progress.as_deref()));
    }
    if let Some(index) = changes.last_page_read_index {
        columns.push("last_page_read_index");
        values.push(index.map(Value::Integer).unwrap_or(Value::Null));
    }
    if let Some(last_read) = changes.last_read {
        columns.push("last_read");
        values.push(last_read.map(Value::Integer).unwrap_or(Value::Null));
    }

    if columns.is_empty() {
        return Ok(());
    }

    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", c, i + 1))
        .collect();
    let sql = format!(
        "UPDATE chapters SET {} WHERE id = ?{}",
        assignments.join(", "),
        columns.len() + 1
    );
    values.push(Value::Integer(id));
    conn.execute(&sql, params_from_iter(values))?;
    Ok(())
}

pub(crate) fn delete_chapter(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM chapters WHERE id = ?1", params![id])?;
    Ok(())
}

pub(crate) fn update_title_metadata(conn: &Connection, title_id: i64, entry: &CatalogEntry) -> Result<()> {
    conn.execute(
        "UPDATE titles SET name = ?1, cover = coalesce(?2, cover), authors = ?3, genres = ?4,
                status = coalesce(?5, status), synopsis = coalesce(?6, synopsis)
         WHERE id = ?7",
        params![
            entry.name,
            entry.cover,
            serde_json::to_string(&entry.authors)?,
            serde_json::to_string(&entry.genres)?,
            entry.status,
            entry.synopsis,
            title_id,
        ],
    )?;
    Ok(())
}

pub(crate) fn touch_title_last_update(conn: &Connection, title_id: i64, at: i64) -> Result<()> {
    conn.execute(
        "UPDATE titles SET last_update = ?1 WHERE id = ?2",
        params![at, title_id],
    )?;
    Ok(())
}

fn opt_text(v: Option<&str>) -> Value {
    v.map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null)
}

fn json_list(row: &Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_title(row: &Row) -> rusqlite::Result<Title> {
    let sort_order: String = row.get(10)?;
    Ok(Title {
        id: row.get(0)?,
        source_id: row.get(1)?,
        slug: row.get(2)?,
        name: row.get(3)?,
        cover: row.get(4)?,
        authors: json_list(row, 5)?,
        genres: json_list(row, 6)?,
        status: row.get(7)?,
        synopsis: row.get(8)?,
        in_library: row.get(9)?,
        sort_order: SortOrder::parse(&sort_order),
        last_read: row.get(11)?,
        last_update: row.get(12)?,
    })
}

fn row_to_chapter(row: &Row) -> rusqlite::Result<Chapter> {
    let date: Option<String> = row.get(7)?;
    Ok(Chapter {
        id: row.get(0)?,
        title_id: row.get(1)?,
        slug: row.get(2)?,
        title: row.get(3)?,
        num: row.get(4)?,
        num_volume: row.get(5)?,
        url: row.get(6)?,
        date: date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        scanlators: json_list(row, 8)?,
        rank: row.get(9)?,
        downloaded: row.get(10)?,
        recent: row.get(11)?,
        read: row.get(12)?,
        read_progress: row.get(13)?,
        last_page_read_index: row.get(14)?,
        last_read: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("library.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_add_title_is_idempotent() {
        let (_dir, store) = temp_store();
        let a = store.add_title("mangasite", "one-piece", "One Piece", None).unwrap();
        let b = store.add_title("mangasite", "one-piece", "One Piece", None).unwrap();
        assert_eq!(a, b);
        let title = store.title(a).unwrap();
        assert_eq!(title.slug, "one-piece");
        assert!(!title.in_library);
        assert!(title.authors.is_empty());
    }

    #[test]
    fn test_chapters_cascade_with_title() {
        let (_dir, store) = temp_store();
        let id = store.add_title("mangasite", "slug", "Name", None).unwrap();
        let conn = store.connect().unwrap();
        let chapter = NewChapter {
            slug: "c1".into(),
            title: "Chapter 1".into(),
            num: Some("1".into()),
            num_volume: None,
            url: None,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            scanlators: vec!["Team".into()],
            rank: 0,
            read: false,
            read_progress: None,
            last_page_read_index: None,
            last_read: None,
        };
        let chapter_id = insert_chapter(&conn, id, &chapter).unwrap();
        store.set_download_status(chapter_id, DownloadStatus::Pending, 0.0).unwrap();
        drop(conn);

        assert_eq!(store.chapters(id).unwrap().len(), 1);
        store.delete_title(id).unwrap();
        assert!(store.chapters(id).unwrap().is_empty());
        assert!(store.download(chapter_id).unwrap().is_none());
    }

    #[test]
    fn test_gc_keeps_library_and_downloaded() {
        let (_dir, store) = temp_store();
        let kept = store.add_title("s", "kept", "Kept", None).unwrap();
        store.set_in_library(kept, true).unwrap();
        let stale = store.add_title("s", "stale", "Stale", None).unwrap();

        let removed = store.gc_unlisted_titles(Utc::now().timestamp() + 1).unwrap();
        assert_eq!(removed, 1);
        assert!(store.title(kept).is_ok());
        assert!(matches!(store.title(stale), Err(StoreError::Missing { .. })));
    }

    #[test]
    fn test_update_chapter_partial() {
        let (_dir, store) = temp_store();
        let id = store.add_title("s", "t", "T", None).unwrap();
        let conn = store.connect().unwrap();
        let chapter_id = insert_chapter(
            &conn,
            id,
            &NewChapter {
                slug: "c1".into(),
                title: "Old".into(),
                num: None,
                num_volume: None,
                url: Some("https://example.com/c1".into()),
                date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                scanlators: vec![],
                rank: 0,
                read: false,
                read_progress: None,
                last_page_read_index: None,
                last_read: None,
            },
        )
        .unwrap();
        let changes = ChapterChanges {
            title: Some("New".into()),
            rank: Some(4),
            ..Default::default()
        };
        update_chapter(&conn, chapter_id, &changes).unwrap();
        drop(conn);

        let chapter = store.chapter(chapter_id).unwrap();
        assert_eq!(chapter.title, "New");
        assert_eq!(chapter.rank, 4);
        assert_eq!(chapter.url.as_deref(), Some("https://example.com/c1"));
        assert!(chapter.recent);
    }

    #[test]
    fn test_categories() {
        let (_dir, store) = temp_store();
        let t = store.add_title("s", "t", "T", None).unwrap();
        let c = store.add_category("Reading").unwrap();
        assert_eq!(store.add_category("Reading").unwrap(), c);
        store.assign_category(t, c).unwrap();
        assert_eq!(store.category_title_ids(c).unwrap(), vec![t]);
    }
}
