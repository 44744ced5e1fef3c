//! Test constants for the seeded discovery store

// Profiled artists: "artist-{i}" named "Artist {i}", popularity i * 10
pub const PROFILED_ARTIST_COUNT: usize = 10;
pub const TRACKS_PER_ARTIST: usize = 3;

// Genre tags cycled over the profiled artists
pub const ARTIST_GENRES: [&[&str]; 5] = [
    &["rock", "grunge"],
    &["jazz"],
    &["pop", "dance pop"],
    &["rock", "indie rock"],
    &["hip hop"],
];

// Artists with tracks but no profile row
pub const UNPROFILED_ARTISTS: [&str; 2] = ["Ghost A", "Ghost B"];
pub const UNPROFILED_POPULARITY: u8 = 99;

// Upstream-only entities, known to the fake catalog but not the store
pub const UPSTREAM_ARTIST_ID: &str = "upstream-artist";
pub const UPSTREAM_ARTIST_NAME: &str = "Upstream Artist";
pub const UPSTREAM_TRACK_ID: &str = "upstream-track";

// Track used by the backfill scenarios
pub const BACKFILL_TRACK_ID: &str = "backfill-track";
pub const BACKFILL_ARTIST: &str = "Mother Love Bone";
pub const BACKFILL_TITLE: &str = "Chloe Dancer";
pub const BACKFILL_RELEASE_DATE: &str = "1994-03-15";
pub const BACKFILL_POPULARITY: u8 = 72;
