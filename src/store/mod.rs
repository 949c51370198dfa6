pub mod models;

#[cfg(test)]
mod tests;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use models::*;

const EPISODE_COLUMNS: &str = "id, podcast_id, guid, title, episode_number, season_id, \
     episode_type, show_notes, episode_url, download_url, file_name, mime_type, \
     file_size, duration_seconds, release_at, explicit, cw_present, transcript_detected";

const PODCAST_COLUMNS: &str = "id, title, feed_url, description, author, email, site_url, \
     funding_url, cover_art_url, language, generator, explicit, itunes_feed_type, \
     probable_feed_host, release_frequency, dormant, has_itunes_data, \
     has_podcast_index_data, has_structured_funding, has_tracking_data, \
     last_checked_at, last_release_at";

/// Edge-move counts from a person merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeStats {
    pub hosted_moved: usize,
    pub guested_moved: usize,
    pub duplicate_edges_dropped: usize,
}

/// SQLite-backed entity graph.
///
/// One connection behind a mutex; WAL mode so readers in other processes
/// keep working while this one writes. Individual methods take the
/// connection for a single statement; a reconciliation run takes it for its
/// whole transaction through [`Database::exclusive_write`], so concurrent
/// runs over different podcasts serialize cleanly instead of interleaving.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS podcasts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                feed_url TEXT NOT NULL UNIQUE,
                description TEXT,
                author TEXT,
                email TEXT,
                site_url TEXT,
                funding_url TEXT,
                cover_art_url TEXT,
                language TEXT,
                generator TEXT,
                explicit INTEGER NOT NULL DEFAULT 0,
                itunes_feed_type TEXT,
                probable_feed_host TEXT,
                release_frequency TEXT NOT NULL DEFAULT 'unknown',
                dormant INTEGER NOT NULL DEFAULT 0,
                has_itunes_data INTEGER NOT NULL DEFAULT 0,
                has_podcast_index_data INTEGER NOT NULL DEFAULT 0,
                has_structured_funding INTEGER NOT NULL DEFAULT 0,
                has_tracking_data INTEGER NOT NULL DEFAULT 0,
                last_checked_at TEXT,
                last_release_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS seasons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                podcast_id INTEGER NOT NULL,
                season_number INTEGER NOT NULL,
                FOREIGN KEY (podcast_id) REFERENCES podcasts(id) ON DELETE CASCADE,
                UNIQUE(podcast_id, season_number)
            );

            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                podcast_id INTEGER NOT NULL,
                guid TEXT,
                title TEXT,
                episode_number INTEGER,
                season_id INTEGER,
                episode_type TEXT NOT NULL DEFAULT 'full',
                show_notes TEXT,
                episode_url TEXT,
                download_url TEXT NOT NULL,
                file_name TEXT,
                mime_type TEXT,
                file_size INTEGER,
                duration_seconds INTEGER,
                release_at TEXT,
                explicit INTEGER NOT NULL DEFAULT 0,
                cw_present INTEGER NOT NULL DEFAULT 0,
                transcript_detected INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (podcast_id) REFERENCES podcasts(id) ON DELETE CASCADE,
                FOREIGN KEY (season_id) REFERENCES seasons(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_episodes_podcast_guid
                ON episodes(podcast_id, guid);
            CREATE INDEX IF NOT EXISTS idx_episodes_podcast_url
                ON episodes(podcast_id, download_url);
            CREATE INDEX IF NOT EXISTS idx_episodes_release
                ON episodes(podcast_id, release_at);

            CREATE TABLE IF NOT EXISTS people (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                url TEXT,
                img_url TEXT,
                merged_into INTEGER,
                merged_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (merged_into) REFERENCES people(id)
            );

            CREATE INDEX IF NOT EXISTS idx_people_name ON people(name);

            CREATE TABLE IF NOT EXISTS episode_hosts (
                episode_id INTEGER NOT NULL,
                person_id INTEGER NOT NULL,
                PRIMARY KEY (episode_id, person_id),
                FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE,
                FOREIGN KEY (person_id) REFERENCES people(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS episode_guests (
                episode_id INTEGER NOT NULL,
                person_id INTEGER NOT NULL,
                PRIMARY KEY (episode_id, person_id),
                FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE,
                FOREIGN KEY (person_id) REFERENCES people(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                parent_id INTEGER,
                FOREIGN KEY (parent_id) REFERENCES categories(id),
                UNIQUE(name, parent_id)
            );

            CREATE TABLE IF NOT EXISTS podcast_categories (
                podcast_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL,
                PRIMARY KEY (podcast_id, category_id),
                FOREIGN KEY (podcast_id) REFERENCES podcasts(id) ON DELETE CASCADE,
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS podcast_tags (
                podcast_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (podcast_id, tag_id),
                FOREIGN KEY (podcast_id) REFERENCES podcasts(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS analysis_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS analysis_group_podcasts (
                group_id INTEGER NOT NULL,
                podcast_id INTEGER NOT NULL,
                PRIMARY KEY (group_id, podcast_id),
                FOREIGN KEY (group_id) REFERENCES analysis_groups(id) ON DELETE CASCADE,
                FOREIGN KEY (podcast_id) REFERENCES podcasts(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS analysis_group_episodes (
                group_id INTEGER NOT NULL,
                episode_id INTEGER NOT NULL,
                PRIMARY KEY (group_id, episode_id),
                FOREIGN KEY (group_id) REFERENCES analysis_groups(id) ON DELETE CASCADE,
                FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE
            );
        "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Write scopes
    // =========================================================================

    /// Run `f` inside one immediate transaction, holding the connection for
    /// the whole scope. Commits when `f` returns `Ok`; the transaction (and
    /// every write issued through the scope) rolls back on `Err`.
    pub fn exclusive_write<T, E>(
        &self,
        f: impl FnOnce(&StoreScope<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| E::from(anyhow::Error::from(e)))?;
        let scope = StoreScope { conn: &tx };
        let value = f(&scope)?;
        tx.commit().map_err(|e| E::from(anyhow::Error::from(e)))?;
        Ok(value)
    }

    /// Single-statement scope: lock, run, unlock.
    fn scoped<T>(&self, f: impl FnOnce(&StoreScope<'_>) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&StoreScope { conn: &conn })
    }

    // =========================================================================
    // Podcasts
    // =========================================================================

    /// Look up a podcast by feed URL, creating a bare record on first sight.
    /// Returns (id, created).
    pub fn get_or_create_podcast(&self, feed_url: &str, title: &str) -> Result<(i64, bool)> {
        self.scoped(|s| s.get_or_create_podcast(feed_url, title))
    }

    pub fn get_podcast(&self, id: i64) -> Result<Option<Podcast>> {
        self.scoped(|s| s.get_podcast(id))
    }

    pub fn get_podcast_by_feed_url(&self, feed_url: &str) -> Result<Option<Podcast>> {
        let conn = self.conn.lock().unwrap();
        let podcast = conn
            .query_row(
                &format!("SELECT {PODCAST_COLUMNS} FROM podcasts WHERE feed_url = ?"),
                params![feed_url],
                map_podcast,
            )
            .optional()?;
        Ok(podcast)
    }

    /// Write every mutable column of the podcast row.
    pub fn save_podcast(&self, podcast: &Podcast) -> Result<()> {
        self.scoped(|s| s.save_podcast(podcast))
    }

    /// Bookkeeping-only update; deliberately separate from `save_podcast` so
    /// an unchanged feed does not rewrite content columns.
    pub fn touch_last_checked(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.scoped(|s| s.touch_last_checked(id, at))
    }

    // =========================================================================
    // Episodes
    // =========================================================================

    pub fn find_episode_by_guid(&self, podcast_id: i64, guid: &str) -> Result<Option<Episode>> {
        self.scoped(|s| s.find_episode_by_guid(podcast_id, guid))
    }

    pub fn find_episode_by_download_url(
        &self,
        podcast_id: i64,
        download_url: &str,
    ) -> Result<Option<Episode>> {
        self.scoped(|s| s.find_episode_by_download_url(podcast_id, download_url))
    }

    pub fn get_episode(&self, id: i64) -> Result<Option<Episode>> {
        let conn = self.conn.lock().unwrap();
        let episode = conn
            .query_row(
                &format!("SELECT {EPISODE_COLUMNS} FROM episodes WHERE id = ?"),
                params![id],
                map_episode,
            )
            .optional()?;
        Ok(episode)
    }

    pub fn insert_episode(&self, episode: &NewEpisode) -> Result<i64> {
        self.scoped(|s| s.insert_episode(episode))
    }

    /// Apply a field-level diff. An empty diff is a no-op, not an error.
    pub fn update_episode_fields(&self, id: i64, changes: &[EpisodeChange]) -> Result<()> {
        self.scoped(|s| s.update_episode_fields(id, changes))
    }

    /// Ordered scan of a podcast's episodes, release date ascending with
    /// undated episodes last.
    pub fn episodes_for_podcast(&self, podcast_id: i64) -> Result<Vec<Episode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE podcast_id = ? \
             ORDER BY release_at IS NULL, release_at, id"
        ))?;
        let episodes = stmt
            .query_map(params![podcast_id], map_episode)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(episodes)
    }

    pub fn count_episodes(&self, podcast_id: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM episodes WHERE podcast_id = ?",
            params![podcast_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Release timestamps for a podcast, ascending, undated episodes skipped.
    pub fn release_times(&self, podcast_id: i64, full_only: bool) -> Result<Vec<DateTime<Utc>>> {
        self.scoped(|s| s.release_times(podcast_id, full_only))
    }

    pub fn durations(&self, podcast_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT duration_seconds FROM episodes \
             WHERE podcast_id = ? AND duration_seconds IS NOT NULL ORDER BY duration_seconds",
        )?;
        let durations = stmt
            .query_map(params![podcast_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(durations)
    }

    // =========================================================================
    // Seasons
    // =========================================================================

    pub fn get_or_create_season(&self, podcast_id: i64, season_number: i64) -> Result<(i64, bool)> {
        self.scoped(|s| s.get_or_create_season(podcast_id, season_number))
    }

    pub fn get_season(&self, id: i64) -> Result<Option<Season>> {
        let conn = self.conn.lock().unwrap();
        let season = conn
            .query_row(
                "SELECT id, podcast_id, season_number FROM seasons WHERE id = ?",
                params![id],
                |row| {
                    Ok(Season {
                        id: row.get(0)?,
                        podcast_id: row.get(1)?,
                        season_number: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(season)
    }

    pub fn season_count(&self, podcast_id: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM seasons WHERE podcast_id = ?",
            params![podcast_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Assign an episode to a season. Rejects a season belonging to a
    /// different podcast.
    pub fn set_episode_season(&self, episode_id: i64, season_id: Option<i64>) -> Result<()> {
        if let Some(sid) = season_id {
            let episode = self
                .get_episode(episode_id)?
                .ok_or_else(|| anyhow::anyhow!("episode {episode_id} not found"))?;
            let season = self
                .get_season(sid)?
                .ok_or_else(|| anyhow::anyhow!("season {sid} not found"))?;
            if season.podcast_id != episode.podcast_id {
                bail!(
                    "season {} belongs to podcast {}, not podcast {}",
                    sid,
                    season.podcast_id,
                    episode.podcast_id
                );
            }
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE episodes SET season_id = ? WHERE id = ?",
            params![season_id, episode_id],
        )?;
        Ok(())
    }

    // =========================================================================
    // Categories
    // =========================================================================

    pub fn get_or_create_category(
        &self,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<(i64, bool)> {
        self.scoped(|s| s.get_or_create_category(name, parent_id))
    }

    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn.lock().unwrap();
        let category = conn
            .query_row(
                "SELECT id, name, parent_id FROM categories WHERE id = ?",
                params![id],
                map_category,
            )
            .optional()?;
        Ok(category)
    }

    /// Re-parent a category, rejecting any assignment that would cycle.
    pub fn set_category_parent(&self, id: i64, parent_id: Option<i64>) -> Result<()> {
        if let Some(mut cursor) = parent_id {
            // Walk up from the proposed parent; hitting `id` means a cycle.
            let mut hops = 0;
            loop {
                if cursor == id {
                    bail!("setting parent {cursor} on category {id} would create a cycle");
                }
                let parent = self
                    .get_category(cursor)?
                    .ok_or_else(|| anyhow::anyhow!("category {cursor} not found"))?;
                match parent.parent_id {
                    Some(next) => cursor = next,
                    None => break,
                }
                hops += 1;
                if hops > 32 {
                    bail!("category parent chain exceeds depth limit");
                }
            }
        }
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE categories SET parent_id = ? WHERE id = ?",
            params![parent_id, id],
        )?;
        if updated == 0 {
            bail!("category {id} not found");
        }
        Ok(())
    }

    /// Replace the podcast's category set. Categories dropped from the feed
    /// are detached but never deleted.
    pub fn set_podcast_categories(&self, podcast_id: i64, category_ids: &[i64]) -> Result<()> {
        self.scoped(|s| s.set_podcast_categories(podcast_id, category_ids))
    }

    /// Categories for a podcast with the parent name resolved for display.
    pub fn categories_for_podcast(
        &self,
        podcast_id: i64,
    ) -> Result<Vec<(Category, Option<String>)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.name, c.parent_id, p.name
             FROM podcast_categories pc
             JOIN categories c ON c.id = pc.category_id
             LEFT JOIN categories p ON p.id = c.parent_id
             WHERE pc.podcast_id = ?
             ORDER BY p.name, c.name",
        )?;
        let rows = stmt
            .query_map(params![podcast_id], |row| {
                Ok((
                    Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        parent_id: row.get(2)?,
                    },
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn category_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))?;
        Ok(count)
    }

    // =========================================================================
    // Tags
    // =========================================================================

    pub fn set_podcast_tags(&self, podcast_id: i64, tags: &[String]) -> Result<()> {
        self.scoped(|s| s.set_podcast_tags(podcast_id, tags))
    }

    pub fn tags_for_podcast(&self, podcast_id: i64) -> Result<Vec<String>> {
        self.scoped(|s| s.tags_for_podcast(podcast_id))
    }

    // =========================================================================
    // People
    // =========================================================================

    pub fn create_person(
        &self,
        name: &str,
        url: Option<&str>,
        img_url: Option<&str>,
    ) -> Result<i64> {
        self.scoped(|s| s.create_person(name, url, img_url))
    }

    pub fn get_person(&self, id: i64) -> Result<Option<Person>> {
        self.scoped(|s| s.get_person(id))
    }

    /// Exact case-insensitive name lookup. Oldest record wins when duplicates
    /// exist.
    pub fn find_person_by_name(&self, name: &str) -> Result<Option<Person>> {
        self.scoped(|s| s.find_person_by_name(name))
    }

    /// Active (non-retired) people, for listing views.
    pub fn list_people(&self) -> Result<Vec<Person>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, url, img_url, merged_into, merged_at FROM people
             WHERE merged_into IS NULL ORDER BY name",
        )?;
        let people = stmt
            .query_map([], map_person)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(people)
    }

    pub fn update_person_urls(
        &self,
        id: i64,
        url: Option<&str>,
        img_url: Option<&str>,
    ) -> Result<()> {
        self.scoped(|s| s.update_person_urls(id, url, img_url))
    }

    /// Returns true if the edge was newly inserted.
    pub fn add_host_edge(&self, episode_id: i64, person_id: i64) -> Result<bool> {
        self.scoped(|s| s.add_host_edge(episode_id, person_id))
    }

    /// Returns true if the edge was newly inserted.
    pub fn add_guest_edge(&self, episode_id: i64, person_id: i64) -> Result<bool> {
        self.scoped(|s| s.add_guest_edge(episode_id, person_id))
    }

    pub fn hosted_episode_ids(&self, person_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT episode_id FROM episode_hosts WHERE person_id = ? ORDER BY episode_id",
        )?;
        let ids = stmt
            .query_map(params![person_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn guest_episode_ids(&self, person_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT episode_id FROM episode_guests WHERE person_id = ? ORDER BY episode_id",
        )?;
        let ids = stmt
            .query_map(params![person_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Per-podcast (podcast_id, title, episode count) for one edge table.
    pub fn appearance_counts_by_podcast(
        &self,
        person_id: i64,
        as_host: bool,
    ) -> Result<Vec<(i64, String, i64)>> {
        let conn = self.conn.lock().unwrap();
        let table = if as_host {
            "episode_hosts"
        } else {
            "episode_guests"
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT p.id, p.title, COUNT(*) FROM {table} edge
             JOIN episodes e ON e.id = edge.episode_id
             JOIN podcasts p ON p.id = e.podcast_id
             WHERE edge.person_id = ?
             GROUP BY p.id, p.title
             ORDER BY p.title"
        ))?;
        let rows = stmt
            .query_map(params![person_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Move every host/guest edge from `source` to `destination`, retire the
    /// source, and inherit missing urls — all in one transaction.
    pub fn merge_people(
        &self,
        source: &Person,
        destination: &Person,
        merged_at: DateTime<Utc>,
    ) -> Result<MergeStats> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut stats = MergeStats::default();

        for table in ["episode_hosts", "episode_guests"] {
            // Destination's existing edge wins; drop the source duplicate so
            // the move below cannot violate the primary key.
            let dropped = tx.execute(
                &format!(
                    "DELETE FROM {table} WHERE person_id = ?1 AND episode_id IN
                     (SELECT episode_id FROM {table} WHERE person_id = ?2)"
                ),
                params![source.id, destination.id],
            )?;
            let moved = tx.execute(
                &format!("UPDATE {table} SET person_id = ?2 WHERE person_id = ?1"),
                params![source.id, destination.id],
            )?;
            stats.duplicate_edges_dropped += dropped;
            if table == "episode_hosts" {
                stats.hosted_moved = moved;
            } else {
                stats.guested_moved = moved;
            }
        }

        let url = destination.url.clone().or_else(|| source.url.clone());
        let img_url = destination.img_url.clone().or_else(|| source.img_url.clone());
        tx.execute(
            "UPDATE people SET url = ?, img_url = ? WHERE id = ?",
            params![url, img_url, destination.id],
        )?;
        tx.execute(
            "UPDATE people SET merged_into = ?, merged_at = ? WHERE id = ?",
            params![destination.id, merged_at, source.id],
        )?;

        tx.commit()?;
        Ok(stats)
    }

    // =========================================================================
    // Analysis groups
    // =========================================================================

    pub fn create_group(&self, name: &str, description: Option<&str>) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO analysis_groups (name, description) VALUES (?, ?)",
            params![name, description],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_group(&self, id: i64) -> Result<Option<AnalysisGroup>> {
        let conn = self.conn.lock().unwrap();
        let group = conn
            .query_row(
                "SELECT id, name, description FROM analysis_groups WHERE id = ?",
                params![id],
                |row| {
                    Ok(AnalysisGroup {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(group)
    }

    pub fn add_podcast_to_group(&self, group_id: i64, podcast_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO analysis_group_podcasts (group_id, podcast_id) VALUES (?, ?)",
            params![group_id, podcast_id],
        )?;
        Ok(())
    }

    pub fn add_episode_to_group(&self, group_id: i64, episode_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO analysis_group_episodes (group_id, episode_id) VALUES (?, ?)",
            params![group_id, episode_id],
        )?;
        Ok(())
    }

    pub fn group_podcast_ids(&self, group_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT podcast_id FROM analysis_group_podcasts WHERE group_id = ? ORDER BY podcast_id",
        )?;
        let ids = stmt
            .query_map(params![group_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn group_episode_ids(&self, group_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT episode_id FROM analysis_group_episodes WHERE group_id = ? ORDER BY episode_id",
        )?;
        let ids = stmt
            .query_map(params![group_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

/// The store operations a reconciliation run needs, bound to one borrowed
/// connection. [`Database`] methods of the same name run each call in its
/// own lock scope; [`Database::exclusive_write`] hands out one scope whose
/// calls all join a single open transaction.
pub struct StoreScope<'conn> {
    conn: &'conn Connection,
}

impl StoreScope<'_> {
    pub fn get_or_create_podcast(&self, feed_url: &str, title: &str) -> Result<(i64, bool)> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM podcasts WHERE feed_url = ?",
                params![feed_url],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok((id, false));
        }

        self.conn.execute(
            "INSERT INTO podcasts (title, feed_url) VALUES (?, ?)",
            params![title, feed_url],
        )?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    pub fn get_podcast(&self, id: i64) -> Result<Option<Podcast>> {
        let podcast = self
            .conn
            .query_row(
                &format!("SELECT {PODCAST_COLUMNS} FROM podcasts WHERE id = ?"),
                params![id],
                map_podcast,
            )
            .optional()?;
        Ok(podcast)
    }

    pub fn save_podcast(&self, podcast: &Podcast) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE podcasts SET
                title = ?, feed_url = ?, description = ?, author = ?, email = ?,
                site_url = ?, funding_url = ?, cover_art_url = ?, language = ?,
                generator = ?, explicit = ?, itunes_feed_type = ?,
                probable_feed_host = ?, release_frequency = ?, dormant = ?,
                has_itunes_data = ?, has_podcast_index_data = ?,
                has_structured_funding = ?, has_tracking_data = ?,
                last_checked_at = ?, last_release_at = ?
             WHERE id = ?",
            params![
                podcast.title,
                podcast.feed_url,
                podcast.description,
                podcast.author,
                podcast.email,
                podcast.site_url,
                podcast.funding_url,
                podcast.cover_art_url,
                podcast.language,
                podcast.generator,
                podcast.explicit,
                podcast.itunes_feed_type,
                podcast.probable_feed_host,
                podcast.release_frequency.to_string(),
                podcast.dormant,
                podcast.has_itunes_data,
                podcast.has_podcast_index_data,
                podcast.has_structured_funding,
                podcast.has_tracking_data,
                podcast.last_checked_at,
                podcast.last_release_at,
                podcast.id,
            ],
        )?;
        if updated == 0 {
            bail!("podcast {} not found", podcast.id);
        }
        Ok(())
    }

    pub fn touch_last_checked(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE podcasts SET last_checked_at = ? WHERE id = ?",
            params![at, id],
        )?;
        Ok(())
    }

    pub fn find_episode_by_guid(&self, podcast_id: i64, guid: &str) -> Result<Option<Episode>> {
        let episode = self
            .conn
            .query_row(
                &format!(
                    "SELECT {EPISODE_COLUMNS} FROM episodes WHERE podcast_id = ? AND guid = ?"
                ),
                params![podcast_id, guid],
                map_episode,
            )
            .optional()?;
        Ok(episode)
    }

    pub fn find_episode_by_download_url(
        &self,
        podcast_id: i64,
        download_url: &str,
    ) -> Result<Option<Episode>> {
        let episode = self
            .conn
            .query_row(
                &format!(
                    "SELECT {EPISODE_COLUMNS} FROM episodes \
                     WHERE podcast_id = ? AND download_url = ?"
                ),
                params![podcast_id, download_url],
                map_episode,
            )
            .optional()?;
        Ok(episode)
    }

    pub fn insert_episode(&self, episode: &NewEpisode) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO episodes (podcast_id, guid, title, episode_number, season_id,
                episode_type, show_notes, episode_url, download_url, file_name,
                mime_type, file_size, duration_seconds, release_at, explicit,
                cw_present, transcript_detected)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                episode.podcast_id,
                episode.guid,
                episode.title,
                episode.episode_number,
                episode.season_id,
                episode.episode_type.to_string(),
                episode.show_notes,
                episode.episode_url,
                episode.download_url,
                episode.file_name,
                episode.mime_type,
                episode.file_size,
                episode.duration_seconds,
                episode.release_at,
                episode.explicit,
                episode.cw_present,
                episode.transcript_detected,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_episode_fields(&self, id: i64, changes: &[EpisodeChange]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let set_clause = changes
            .iter()
            .map(|c| format!("{} = ?", c.column()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE episodes SET {set_clause} WHERE id = ?");
        let mut values: Vec<&dyn ToSql> = changes.iter().map(|c| c.value()).collect();
        values.push(&id);
        let updated = self.conn.execute(&sql, values.as_slice())?;
        if updated == 0 {
            bail!("episode {id} not found");
        }
        Ok(())
    }

    pub fn release_times(&self, podcast_id: i64, full_only: bool) -> Result<Vec<DateTime<Utc>>> {
        let sql = if full_only {
            "SELECT release_at FROM episodes \
             WHERE podcast_id = ? AND release_at IS NOT NULL AND episode_type = 'full' \
             ORDER BY release_at"
        } else {
            "SELECT release_at FROM episodes \
             WHERE podcast_id = ? AND release_at IS NOT NULL ORDER BY release_at"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let times = stmt
            .query_map(params![podcast_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(times)
    }

    pub fn get_or_create_season(&self, podcast_id: i64, season_number: i64) -> Result<(i64, bool)> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM seasons WHERE podcast_id = ? AND season_number = ?",
                params![podcast_id, season_number],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok((id, false));
        }
        self.conn.execute(
            "INSERT INTO seasons (podcast_id, season_number) VALUES (?, ?)",
            params![podcast_id, season_number],
        )?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    pub fn get_or_create_category(
        &self,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<(i64, bool)> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM categories WHERE name = ? AND parent_id IS ?",
                params![name, parent_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok((id, false));
        }
        self.conn.execute(
            "INSERT INTO categories (name, parent_id) VALUES (?, ?)",
            params![name, parent_id],
        )?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    pub fn set_podcast_categories(&self, podcast_id: i64, category_ids: &[i64]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM podcast_categories WHERE podcast_id = ?",
            params![podcast_id],
        )?;
        for id in category_ids {
            self.conn.execute(
                "INSERT OR IGNORE INTO podcast_categories (podcast_id, category_id) VALUES (?, ?)",
                params![podcast_id, id],
            )?;
        }
        Ok(())
    }

    /// Attached category ids, ascending.
    pub fn podcast_category_ids(&self, podcast_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT category_id FROM podcast_categories WHERE podcast_id = ? ORDER BY category_id",
        )?;
        let ids = stmt
            .query_map(params![podcast_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn set_podcast_tags(&self, podcast_id: i64, tags: &[String]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM podcast_tags WHERE podcast_id = ?",
            params![podcast_id],
        )?;
        for tag in tags {
            self.conn
                .execute("INSERT OR IGNORE INTO tags (name) VALUES (?)", params![tag])?;
            let tag_id: i64 = self.conn.query_row(
                "SELECT id FROM tags WHERE name = ?",
                params![tag],
                |row| row.get(0),
            )?;
            self.conn.execute(
                "INSERT OR IGNORE INTO podcast_tags (podcast_id, tag_id) VALUES (?, ?)",
                params![podcast_id, tag_id],
            )?;
        }
        Ok(())
    }

    pub fn tags_for_podcast(&self, podcast_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.name FROM podcast_tags pt
             JOIN tags t ON t.id = pt.tag_id
             WHERE pt.podcast_id = ? ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map(params![podcast_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    pub fn create_person(
        &self,
        name: &str,
        url: Option<&str>,
        img_url: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO people (name, url, img_url) VALUES (?, ?, ?)",
            params![name, url, img_url],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_person(&self, id: i64) -> Result<Option<Person>> {
        let person = self
            .conn
            .query_row(
                "SELECT id, name, url, img_url, merged_into, merged_at FROM people WHERE id = ?",
                params![id],
                map_person,
            )
            .optional()?;
        Ok(person)
    }

    pub fn find_person_by_name(&self, name: &str) -> Result<Option<Person>> {
        let person = self
            .conn
            .query_row(
                "SELECT id, name, url, img_url, merged_into, merged_at FROM people
                 WHERE LOWER(name) = LOWER(?) ORDER BY id LIMIT 1",
                params![name],
                map_person,
            )
            .optional()?;
        Ok(person)
    }

    pub fn update_person_urls(
        &self,
        id: i64,
        url: Option<&str>,
        img_url: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE people SET url = ?, img_url = ? WHERE id = ?",
            params![url, img_url, id],
        )?;
        Ok(())
    }

    pub fn add_host_edge(&self, episode_id: i64, person_id: i64) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO episode_hosts (episode_id, person_id) VALUES (?, ?)",
            params![episode_id, person_id],
        )?;
        Ok(inserted > 0)
    }

    pub fn add_guest_edge(&self, episode_id: i64, person_id: i64) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO episode_guests (episode_id, person_id) VALUES (?, ?)",
            params![episode_id, person_id],
        )?;
        Ok(inserted > 0)
    }
}

// =========================================================================
// Row mappers
// =========================================================================

fn map_podcast(row: &Row<'_>) -> rusqlite::Result<Podcast> {
    Ok(Podcast {
        id: row.get(0)?,
        title: row.get(1)?,
        feed_url: row.get(2)?,
        description: row.get(3)?,
        author: row.get(4)?,
        email: row.get(5)?,
        site_url: row.get(6)?,
        funding_url: row.get(7)?,
        cover_art_url: row.get(8)?,
        language: row.get(9)?,
        generator: row.get(10)?,
        explicit: row.get(11)?,
        itunes_feed_type: row.get(12)?,
        probable_feed_host: row.get(13)?,
        release_frequency: ReleaseFrequency::from(row.get::<_, String>(14)?.as_str()),
        dormant: row.get(15)?,
        has_itunes_data: row.get(16)?,
        has_podcast_index_data: row.get(17)?,
        has_structured_funding: row.get(18)?,
        has_tracking_data: row.get(19)?,
        last_checked_at: row.get(20)?,
        last_release_at: row.get(21)?,
    })
}

fn map_episode(row: &Row<'_>) -> rusqlite::Result<Episode> {
    Ok(Episode {
        id: row.get(0)?,
        podcast_id: row.get(1)?,
        guid: row.get(2)?,
        title: row.get(3)?,
        episode_number: row.get(4)?,
        season_id: row.get(5)?,
        episode_type: EpisodeType::from(row.get::<_, String>(6)?.as_str()),
        show_notes: row.get(7)?,
        episode_url: row.get(8)?,
        download_url: row.get(9)?,
        file_name: row.get(10)?,
        mime_type: row.get(11)?,
        file_size: row.get(12)?,
        duration_seconds: row.get(13)?,
        release_at: row.get(14)?,
        explicit: row.get(15)?,
        cw_present: row.get(16)?,
        transcript_detected: row.get(17)?,
    })
}

fn map_person(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        img_url: row.get(3)?,
        merged_into: row.get(4)?,
        merged_at: row.get(5)?,
    })
}

fn map_category(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
    })
}
