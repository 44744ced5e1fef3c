//! SQLite schema definitions for the discovery database.
//!
//! Tracks reference artists by display name (that is what the game shows and
//! what older rows carry); a track counts as profiled when a row in
//! `artist_profiles` has the same lower-cased name.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};
use anyhow::Result;
use rusqlite::Connection;

const ARTIST_PROFILES_TABLE: Table = Table {
    name: "artist_profiles",
    columns: &[
        sqlite_column!("artist_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("name_lower", &SqlType::Text, non_null = true),
        sqlite_column!("genres", &SqlType::Text, non_null = true), // JSON array
        sqlite_column!("popularity", &SqlType::Integer, non_null = true),
        sqlite_column!("followers", &SqlType::Integer),
        sqlite_column!("images", &SqlType::Text, non_null = true), // JSON array
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_artist_profiles_name_lower", "name_lower"),
        ("idx_artist_profiles_popularity", "popularity"),
    ],
    unique_constraints: &[],
};

const TRACKS_TABLE: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("track_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("artist_name", &SqlType::Text, non_null = true),
        sqlite_column!("artist_name_lower", &SqlType::Text, non_null = true),
        sqlite_column!("artist_id", &SqlType::Text),
        sqlite_column!("album_name", &SqlType::Text),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("popularity", &SqlType::Integer),
        sqlite_column!("external_url", &SqlType::Text),
        sqlite_column!("genre", &SqlType::Text),
        sqlite_column!("release_year", &SqlType::Integer),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_tracks_artist_name_lower", "artist_name_lower"),
        ("idx_tracks_artist_id", "artist_id"),
        ("idx_tracks_popularity", "popularity"),
    ],
    unique_constraints: &[],
};

const ARTIST_RELATIONSHIPS_TABLE: Table = Table {
    name: "artist_relationships",
    columns: &[
        sqlite_column!("source_artist_id", &SqlType::Text, non_null = true),
        sqlite_column!("source_artist_name", &SqlType::Text, non_null = true),
        sqlite_column!("related_artist_id", &SqlType::Text, non_null = true),
        sqlite_column!("related_artist_name", &SqlType::Text, non_null = true),
        sqlite_column!("strength", &SqlType::Real, non_null = true),
        sqlite_column!("relationship_type", &SqlType::Text, non_null = true),
        sqlite_column!(
            "cached_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[(
        "idx_artist_relationships_source_strength",
        "source_artist_id, strength",
    )],
    unique_constraints: &[&["source_artist_id", "related_artist_id"]],
};

/// Name keys are stored trimmed from version 1 on.
fn trim_name_keys(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE artist_profiles SET name_lower = trim(name_lower) WHERE name_lower != trim(name_lower)",
        [],
    )?;
    conn.execute(
        "UPDATE tracks SET artist_name_lower = trim(artist_name_lower)
         WHERE artist_name_lower != trim(artist_name_lower)",
        [],
    )?;
    Ok(())
}

pub const DISCOVERY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[
            ARTIST_PROFILES_TABLE,
            TRACKS_TABLE,
            ARTIST_RELATIONSHIPS_TABLE,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[
            ARTIST_PROFILES_TABLE,
            TRACKS_TABLE,
            ARTIST_RELATIONSHIPS_TABLE,
        ],
        migration: Some(trim_name_keys),
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_persistence::{migrate_if_needed, BASE_DB_VERSION};

    #[test]
    fn version_one_trims_name_keys() {
        let mut conn = Connection::open_in_memory().unwrap();
        DISCOVERY_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        conn.execute(
            "INSERT INTO artist_profiles (artist_id, name, name_lower, genres, popularity, images)
             VALUES ('a1', ' Band ', ' band ', '[]', 10, '[]')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tracks (track_id, name, artist_name, artist_name_lower)
             VALUES ('t1', 'Song', ' Band', ' band')",
            [],
        )
        .unwrap();

        migrate_if_needed(&mut conn, DISCOVERY_VERSIONED_SCHEMAS, "test").unwrap();

        let profile_key: String = conn
            .query_row("SELECT name_lower FROM artist_profiles", [], |r| r.get(0))
            .unwrap();
        let track_key: String = conn
            .query_row("SELECT artist_name_lower FROM tracks", [], |r| r.get(0))
            .unwrap();
        assert_eq!((profile_key.as_str(), track_key.as_str()), ("band", "band"));
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, (BASE_DB_VERSION + 1) as i64);
    }
}
