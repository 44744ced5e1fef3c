//! SQLite-backed discovery store implementation.

use super::models::*;
use super::schema::DISCOVERY_VERSIONED_SCHEMAS;
use super::trait_def::DiscoveryStore;
use crate::sqlite_persistence::migrate_if_needed;
use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const TRACK_COLUMNS: &str = "track_id, name, artist_name, artist_id, album_name, duration_ms, \
     popularity, external_url, genre, release_year";

const PROFILE_COLUMNS: &str = "artist_id, name, genres, popularity, followers, images";

/// SQLite-backed discovery store.
#[derive(Clone)]
pub struct SqliteDiscoveryStore {
    read_pool: Vec<Arc<Mutex<Connection>>>,
    write_conn: Arc<Mutex<Connection>>,
    read_index: Arc<AtomicUsize>,
}

impl SqliteDiscoveryStore {
    /// Open (and create or migrate if needed) the discovery database.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `read_pool_size` - Number of read-only connections handed out round-robin
    pub fn new<P: AsRef<Path>>(db_path: P, read_pool_size: usize) -> Result<Self> {
        let db_path_ref = db_path.as_ref();

        let mut write_conn = Connection::open_with_flags(
            db_path_ref,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open discovery database")?;

        migrate_if_needed(&mut write_conn, DISCOVERY_VERSIONED_SCHEMAS, "discovery")?;
        write_conn.pragma_update(None, "journal_mode", "WAL")?;

        let counts = count_rows(&write_conn)?;
        info!(
            "Opened discovery db: {} artist profiles, {} tracks, {} relationships",
            counts.artist_profiles, counts.tracks, counts.relationships
        );

        let mut read_pool = Vec::with_capacity(read_pool_size.max(1));
        for _ in 0..read_pool_size.max(1) {
            let read_conn = Connection::open_with_flags(
                db_path_ref,
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .context("Failed to open discovery database for reading")?;
            read_pool.push(Arc::new(Mutex::new(read_conn)));
        }

        Ok(Self {
            read_pool,
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn get_read_conn(&self) -> Arc<Mutex<Connection>> {
        let index = self.read_index.fetch_add(1, Ordering::Relaxed) % self.read_pool.len();
        self.read_pool[index].clone()
    }

    fn query_tracks(&self, sql: &str, values: Vec<Value>) -> Result<Vec<TrackRecord>> {
        let conn = self.get_read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let tracks = stmt
            .query_map(params_from_iter(values), track_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    fn query_profiles(&self, sql: &str, values: Vec<Value>) -> Result<Vec<ArtistProfile>> {
        let conn = self.get_read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let profiles = stmt
            .query_map(params_from_iter(values), profile_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(profiles)
    }
}

fn count_rows(conn: &Connection) -> Result<StoreCounts> {
    let artist_profiles: usize =
        conn.query_row("SELECT COUNT(*) FROM artist_profiles", [], |r| r.get(0))?;
    let tracks: usize = conn.query_row("SELECT COUNT(*) FROM tracks", [], |r| r.get(0))?;
    let relationships: usize =
        conn.query_row("SELECT COUNT(*) FROM artist_relationships", [], |r| r.get(0))?;
    Ok(StoreCounts {
        artist_profiles,
        tracks,
        relationships,
    })
}

/// "?1, ?2, ..., ?n" starting at `first`.
fn placeholders(first: usize, n: usize) -> String {
    (first..first + n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn lower_names(names: &[String]) -> Vec<Value> {
    names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .map(Value::Text)
        .collect()
}

fn clamp_popularity(p: i64) -> u8 {
    p.clamp(0, 100) as u8
}

fn track_from_row(row: &Row) -> rusqlite::Result<TrackRecord> {
    Ok(TrackRecord {
        track_id: row.get(0)?,
        name: row.get(1)?,
        artist_name: row.get(2)?,
        artist_id: row.get(3)?,
        album_name: row.get(4)?,
        duration_ms: row
            .get::<_, Option<i64>>(5)?
            .map(|d| d.clamp(0, u32::MAX as i64) as u32),
        popularity: row.get::<_, Option<i64>>(6)?.map(clamp_popularity),
        external_url: row.get(7)?,
        genre: row.get(8)?,
        release_year: row.get::<_, Option<i64>>(9)?.map(|y| y as i32),
    })
}

fn profile_from_row(row: &Row) -> rusqlite::Result<ArtistProfile> {
    let genres: String = row.get(2)?;
    let images: String = row.get(5)?;
    Ok(ArtistProfile {
        artist_id: row.get(0)?,
        name: row.get(1)?,
        genres: parse_json_column(&genres),
        popularity: clamp_popularity(row.get(3)?),
        followers: row.get::<_, Option<i64>>(4)?.map(|f| f.max(0) as u64),
        images: parse_json_column(&images),
    })
}

fn parse_json_column<T: serde::de::DeserializeOwned>(json: &str) -> Vec<T> {
    serde_json::from_str(json).unwrap_or_else(|e| {
        warn!("Malformed JSON array in discovery db: {}: {}", json, e);
        Vec::new()
    })
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

impl DiscoveryStore for SqliteDiscoveryStore {
    fn get_artist_profile(&self, artist_id: &str) -> Result<Option<ArtistProfile>> {
        let conn = self.get_read_conn();
        let conn = conn.lock().unwrap();
        let profile = conn
            .query_row(
                &format!(
                    "SELECT {} FROM artist_profiles WHERE artist_id = ?1",
                    PROFILE_COLUMNS
                ),
                params![artist_id],
                profile_from_row,
            )
            .optional()?;
        Ok(profile)
    }

    fn get_artist_profiles_by_ids(&self, artist_ids: &[String]) -> Result<Vec<ArtistProfile>> {
        if artist_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM artist_profiles WHERE artist_id IN ({})",
            PROFILE_COLUMNS,
            placeholders(1, artist_ids.len())
        );
        let values = artist_ids.iter().cloned().map(Value::Text).collect();
        self.query_profiles(&sql, values)
    }

    fn get_artist_profiles_by_names(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, ArtistProfile>> {
        let values = lower_names(names);
        if values.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT {} FROM artist_profiles WHERE name_lower IN ({})",
            PROFILE_COLUMNS,
            placeholders(1, values.len())
        );
        let profiles = self.query_profiles(&sql, values)?;
        Ok(profiles
            .into_iter()
            .map(|p| (p.name.trim().to_lowercase(), p))
            .collect())
    }

    fn sample_artist_profiles(&self, limit: usize) -> Result<Vec<ArtistProfile>> {
        let sql = format!(
            "SELECT {} FROM artist_profiles ORDER BY RANDOM() LIMIT ?1",
            PROFILE_COLUMNS
        );
        self.query_profiles(&sql, vec![Value::Integer(limit as i64)])
    }

    fn get_popular_artists(&self, limit: usize) -> Result<Vec<ArtistProfile>> {
        let sql = format!(
            "SELECT {} FROM artist_profiles ORDER BY popularity DESC, artist_id LIMIT ?1",
            PROFILE_COLUMNS
        );
        self.query_profiles(&sql, vec![Value::Integer(limit as i64)])
    }

    fn search_artists_by_genre(&self, genre: &str, limit: usize) -> Result<Vec<ArtistProfile>> {
        let needle = genre.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM artist_profiles WHERE lower(genres) LIKE ?1 ESCAPE '\\'
             ORDER BY popularity DESC LIMIT ?2",
            PROFILE_COLUMNS
        );
        let escaped = needle
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        self.query_profiles(
            &sql,
            vec![
                Value::Text(format!("%{}%", escaped)),
                Value::Integer(limit as i64),
            ],
        )
    }

    fn upsert_artist_profile(&self, profile: &ArtistProfile) -> Result<()> {
        let genres = serde_json::to_string(&profile.genres)?;
        let images = serde_json::to_string(&profile.images)?;
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "INSERT INTO artist_profiles
                (artist_id, name, name_lower, genres, popularity, followers, images, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(artist_id) DO UPDATE SET
                name = excluded.name,
                name_lower = excluded.name_lower,
                genres = CASE WHEN excluded.genres = '[]' THEN genres ELSE excluded.genres END,
                popularity = excluded.popularity,
                followers = COALESCE(excluded.followers, followers),
                images = CASE WHEN excluded.images = '[]' THEN images ELSE excluded.images END,
                updated_at = excluded.updated_at",
            params![
                profile.artist_id,
                profile.name,
                profile.name.trim().to_lowercase(),
                genres,
                profile.popularity as i64,
                profile.followers.map(|f| f as i64),
                images,
                now_secs(),
            ],
        )?;
        Ok(())
    }

    fn get_track(&self, track_id: &str) -> Result<Option<TrackRecord>> {
        let conn = self.get_read_conn();
        let conn = conn.lock().unwrap();
        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks WHERE track_id = ?1", TRACK_COLUMNS),
                params![track_id],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    fn fetch_tracks(&self, query: &TrackWindowQuery) -> Result<Vec<TrackRecord>> {
        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(min) = query.min_popularity {
            values.push(Value::Integer(min as i64));
            conditions.push(format!("popularity >= ?{}", values.len()));
        }
        if let Some(max) = query.max_popularity {
            values.push(Value::Integer(max as i64));
            conditions.push(format!("popularity <= ?{}", values.len()));
        }
        if query.require_genre || !query.genres.is_empty() {
            conditions.push("genre IS NOT NULL AND genre != ''".to_string());
        }
        if !query.genres.is_empty() {
            let mut matches: Vec<String> = Vec::new();
            for term in &query.genres {
                values.push(Value::Text(term.clone()));
                let n = values.len();
                matches.push(format!("instr(lower(genre), ?{n}) > 0"));
                matches.push(format!("instr(?{n}, lower(trim(genre))) > 0"));
                let words: Vec<&str> = term.split_whitespace().collect();
                if words.len() > 1 {
                    for word in words {
                        values.push(Value::Text(word.to_string()));
                        matches.push(format!("instr(lower(genre), ?{}) > 0", values.len()));
                    }
                }
            }
            conditions.push(format!("({})", matches.join(" OR ")));
        }
        if query.profiled_only {
            conditions.push(
                "artist_name_lower IN (SELECT name_lower FROM artist_profiles)".to_string(),
            );
        }
        if !query.exclude_track_ids.is_empty() {
            let first = values.len() + 1;
            values.extend(query.exclude_track_ids.iter().cloned().map(Value::Text));
            conditions.push(format!(
                "track_id NOT IN ({})",
                placeholders(first, query.exclude_track_ids.len())
            ));
        }
        let excluded_artists = lower_names(&query.exclude_artist_names);
        if !excluded_artists.is_empty() {
            let first = values.len() + 1;
            let n = excluded_artists.len();
            values.extend(excluded_artists);
            conditions.push(format!(
                "artist_name_lower NOT IN ({})",
                placeholders(first, n)
            ));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let order_clause = match query.order {
            TrackOrder::Random => "ORDER BY RANDOM()",
            TrackOrder::PopularityDesc => "ORDER BY COALESCE(popularity, 0) DESC, track_id",
        };

        values.push(Value::Integer(query.limit as i64));
        let sql = format!(
            "SELECT {} FROM tracks {} {} LIMIT ?{}",
            TRACK_COLUMNS,
            where_clause,
            order_clause,
            values.len()
        );
        self.query_tracks(&sql, values)
    }

    fn get_tracks_by_artist_names(
        &self,
        names: &[String],
        limit: usize,
    ) -> Result<Vec<TrackRecord>> {
        let mut values = lower_names(names);
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let n = values.len();
        values.push(Value::Integer(limit as i64));
        let sql = format!(
            "SELECT {} FROM tracks WHERE artist_name_lower IN ({})
             ORDER BY COALESCE(popularity, 0) DESC, track_id LIMIT ?{}",
            TRACK_COLUMNS,
            placeholders(1, n),
            n + 1
        );
        self.query_tracks(&sql, values)
    }

    fn get_tracks_by_artist_id(&self, artist_id: &str, limit: usize) -> Result<Vec<TrackRecord>> {
        let sql = format!(
            "SELECT {} FROM tracks WHERE artist_id = ?1
             ORDER BY COALESCE(popularity, 0) DESC, track_id LIMIT ?2",
            TRACK_COLUMNS
        );
        self.query_tracks(
            &sql,
            vec![
                Value::Text(artist_id.to_string()),
                Value::Integer(limit as i64),
            ],
        )
    }

    fn upsert_track(&self, track: &TrackRecord) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tracks
                (track_id, name, artist_name, artist_name_lower, artist_id, album_name,
                 duration_ms, popularity, external_url, genre, release_year, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(track_id) DO UPDATE SET
                artist_id = COALESCE(artist_id, excluded.artist_id),
                album_name = COALESCE(album_name, excluded.album_name),
                duration_ms = COALESCE(duration_ms, excluded.duration_ms),
                popularity = COALESCE(excluded.popularity, popularity),
                external_url = COALESCE(external_url, excluded.external_url),
                genre = COALESCE(NULLIF(genre, ''), excluded.genre),
                release_year = COALESCE(release_year, excluded.release_year),
                updated_at = excluded.updated_at",
            params![
                track.track_id,
                track.name,
                track.artist_name,
                track.artist_name.trim().to_lowercase(),
                track.artist_id,
                track.album_name,
                track.duration_ms.map(|d| d as i64),
                track.popularity.map(|p| p as i64),
                track.external_url,
                track.genre,
                track.release_year.map(|y| y as i64),
                now_secs(),
            ],
        )?;
        Ok(())
    }

    fn apply_track_patch(&self, track_id: &str, patch: &TrackPatch) -> Result<bool> {
        let conn = self.write_conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE tracks SET
                album_name = COALESCE(album_name, ?1),
                duration_ms = COALESCE(?2, duration_ms),
                popularity = COALESCE(?3, popularity),
                external_url = COALESCE(?4, external_url),
                genre = CASE
                    WHEN genre IS NULL OR genre = '' OR genre = ?8 THEN COALESCE(?5, genre)
                    ELSE genre END,
                release_year = CASE
                    WHEN release_year IS NULL OR release_year = ?9 THEN COALESCE(?6, release_year)
                    ELSE release_year END,
                updated_at = ?7
             WHERE track_id = ?10",
            params![
                patch.album_name,
                patch.duration_ms.map(|d| d as i64),
                patch.popularity.map(|p| p as i64),
                patch.external_url,
                patch.genre,
                patch.release_year.map(|y| y as i64),
                now_secs(),
                UNKNOWN_GENRE,
                UNKNOWN_RELEASE_YEAR as i64,
                track_id,
            ],
        )?;
        Ok(changed > 0)
    }

    fn mark_track_metadata_unknown(&self, track_id: &str) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "UPDATE tracks SET
                genre = COALESCE(NULLIF(genre, ''), ?1),
                release_year = COALESCE(release_year, ?2),
                updated_at = ?3
             WHERE track_id = ?4",
            params![
                UNKNOWN_GENRE,
                UNKNOWN_RELEASE_YEAR as i64,
                now_secs(),
                track_id
            ],
        )?;
        Ok(())
    }

    fn get_tracks_missing_metadata(&self, limit: usize) -> Result<Vec<TrackRecord>> {
        let sql = format!(
            "SELECT {} FROM tracks
             WHERE release_year IS NULL OR genre IS NULL OR genre = ''
             ORDER BY COALESCE(popularity, 0) DESC, track_id LIMIT ?1",
            TRACK_COLUMNS
        );
        self.query_tracks(&sql, vec![Value::Integer(limit as i64)])
    }

    fn get_relationships(
        &self,
        source_artist_id: &str,
        min_strength: f64,
        limit: usize,
    ) -> Result<Vec<ArtistRelationship>> {
        let conn = self.get_read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT source_artist_id, related_artist_id, related_artist_name, strength,
                    relationship_type, cached_at
             FROM artist_relationships
             WHERE source_artist_id = ?1 AND strength >= ?2
             ORDER BY strength DESC, related_artist_id
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![source_artist_id, min_strength, limit as i64],
                |row| {
                    let type_str: String = row.get(4)?;
                    Ok(ArtistRelationship {
                        source_artist_id: row.get(0)?,
                        related_artist_id: row.get(1)?,
                        related_artist_name: row.get(2)?,
                        strength: row.get(3)?,
                        relationship_type: RelationshipType::from_str(&type_str)
                            .unwrap_or(RelationshipType::Related),
                        cached_at: row.get(5)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn save_relationships(
        &self,
        source_artist_id: &str,
        source_artist_name: &str,
        edges: &[RelationshipEdge],
    ) -> Result<usize> {
        let conn = self.write_conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let now = now_secs();
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO artist_relationships
                    (source_artist_id, source_artist_name, related_artist_id,
                     related_artist_name, strength, relationship_type, cached_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(source_artist_id, related_artist_id) DO UPDATE SET
                    source_artist_name = excluded.source_artist_name,
                    related_artist_name = excluded.related_artist_name,
                    strength = excluded.strength,
                    relationship_type = excluded.relationship_type,
                    cached_at = excluded.cached_at",
            )?;
            for edge in edges {
                written += stmt.execute(params![
                    source_artist_id,
                    source_artist_name,
                    edge.related_artist_id,
                    edge.related_artist_name,
                    edge.strength,
                    edge.relationship_type.as_str(),
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn get_counts(&self) -> Result<StoreCounts> {
        let conn = self.get_read_conn();
        let conn = conn.lock().unwrap();
        count_rows(&conn)
    }
}
