use super::{lower_genres, CandidateQuery, CandidateSource};
use crate::discovery_store::{ArtistProfile, CandidateTrack};
use crate::relationship_graph::genre_overlap_ratio;
use rand::seq::SliceRandom;
use std::collections::HashMap;

/// Targets with at most this many genres also accept popularity neighbours.
const SPARSE_GENRE_THRESHOLD: usize = 2;
/// Maximum popularity distance for a popularity neighbour.
const POPULARITY_WINDOW: i32 = 20;
/// Candidates at or above this overlap ratio are too similar for "further".
const FURTHER_MAX_OVERLAP: f64 = 0.5;
/// Genres of the target searched directly by the closer strategy.
const MAX_SEARCHED_GENRES: usize = 3;

/// Closeness of `candidate` to `target`, or None when it does not qualify.
fn closer_score(target: &ArtistProfile, candidate: &ArtistProfile) -> Option<f64> {
    let overlap = genre_overlap_ratio(&target.genres, &candidate.genres);
    if overlap > 0.0 {
        return Some(1.0 + overlap);
    }
    let target_genres = lower_genres(&target.genres).len();
    let distance = (target.popularity as i32 - candidate.popularity as i32).abs();
    if target_genres <= SPARSE_GENRE_THRESHOLD && distance <= POPULARITY_WINDOW {
        return Some(1.0 - distance as f64 / 100.0);
    }
    None
}

fn is_further(target: &ArtistProfile, candidate: &ArtistProfile) -> bool {
    genre_overlap_ratio(&target.genres, &candidate.genres) < FURTHER_MAX_OVERLAP
}

impl CandidateSource {
    /// Closer-to-target: artists sharing a genre with `target`, or, when the
    /// target has at most two genres, within 20 popularity points of it.
    pub async fn fetch_closer_to_target(
        &self,
        query: &CandidateQuery,
        target: &ArtistProfile,
    ) -> Vec<CandidateTrack> {
        if query.needed_artists == 0 {
            return Vec::new();
        }
        let pool_size = self.oversample(query.needed_artists);

        let sample_size = self.config.random_fetch_window;

        let mut pool: Vec<ArtistProfile> = Vec::new();
        for genre in lower_genres(&target.genres).into_iter().take(MAX_SEARCHED_GENRES) {
            pool.extend(
                self.read("candidates_artists_by_genre", move |s| {
                    s.search_artists_by_genre(&genre, pool_size)
                })
                .await,
            );
        }
        pool.extend(
            self.read("candidates_sample_artists", move |s| {
                s.sample_artist_profiles(sample_size)
            })
            .await,
        );

        let mut scored: Vec<(ArtistProfile, f64)> = Vec::new();
        for artist in pool {
            if artist.artist_id == target.artist_id
                || scored.iter().any(|(a, _)| a.artist_id == artist.artist_id)
            {
                continue;
            }
            if let Some(score) = closer_score(target, &artist) {
                scored.push((artist, score));
            }
        }
        scored.shuffle(&mut rand::rng());
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let artists: Vec<ArtistProfile> = scored.into_iter().map(|(a, _)| a).collect();
        self.tracks_for_ranked_artists("closer", artists, query, pool_size)
            .await
    }

    /// Further-from-target: artists whose genre overlap with `target` is
    /// below one half.
    pub async fn fetch_further_from_target(
        &self,
        query: &CandidateQuery,
        target: &ArtistProfile,
    ) -> Vec<CandidateTrack> {
        if query.needed_artists == 0 {
            return Vec::new();
        }
        let pool_size = self.oversample(query.needed_artists);
        let sample_size = self.config.random_fetch_window;

        let mut artists: Vec<ArtistProfile> = self
            .read("candidates_sample_artists", move |s| {
                s.sample_artist_profiles(sample_size)
            })
            .await
            .into_iter()
            .filter(|a| a.artist_id != target.artist_id && is_further(target, a))
            .collect();
        artists.shuffle(&mut rand::rng());

        self.tracks_for_ranked_artists("further", artists, query, pool_size)
            .await
    }

    /// Fetch tracks for the first `pool_size` eligible artists and assemble
    /// them in artist rank order.
    async fn tracks_for_ranked_artists(
        &self,
        strategy: &str,
        artists: Vec<ArtistProfile>,
        query: &CandidateQuery,
        pool_size: usize,
    ) -> Vec<CandidateTrack> {
        let artists: Vec<ArtistProfile> = artists
            .into_iter()
            .filter(|a| !query.is_existing(&a.name.trim().to_lowercase()))
            .take(pool_size)
            .collect();
        if artists.is_empty() {
            return Vec::new();
        }

        let rank: HashMap<String, usize> = artists
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.trim().to_lowercase(), i))
            .collect();
        let names: Vec<String> = artists.iter().map(|a| a.name.clone()).collect();
        let limit = self.oversample(artists.len() * query.tracks_per_artist);
        let mut tracks = self
            .read("candidates_tracks_by_artists", move |s| {
                s.get_tracks_by_artist_names(&names, limit)
            })
            .await;
        // Stable: keeps popularity order within an artist.
        tracks.sort_by_key(|t| {
            rank.get(&t.artist_name.trim().to_lowercase())
                .copied()
                .unwrap_or(usize::MAX)
        });

        let profiles: HashMap<String, ArtistProfile> = artists
            .into_iter()
            .map(|a| (a.name.trim().to_lowercase(), a))
            .collect();
        self.assemble(
            strategy,
            tracks,
            &profiles,
            query,
            query.tracks_per_artist,
            true,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn target(genres: &[&str], popularity: u8) -> ArtistProfile {
        ArtistProfile {
            artist_id: "target".into(),
            name: "Target".into(),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            popularity,
            followers: None,
            images: vec![],
        }
    }

    #[test]
    fn closer_score_prefers_genre_then_popularity() {
        let t = target(&["rock"], 50);
        assert!(closer_score(&t, &profile(0)).unwrap() > 1.0);
        // jazz artist with popularity 60: popularity neighbour only.
        let jazz = profile(6);
        let score = closer_score(&t, &jazz).unwrap();
        assert!(score < 1.0);
        // Too far in popularity.
        assert!(closer_score(&t, &profile(1)).is_none());

        let rich = target(&["rock", "metal", "punk"], 50);
        assert!(closer_score(&rich, &jazz).is_none());
    }

    #[tokio::test]
    async fn closer_returns_genre_and_popularity_neighbours() {
        let (_dir, store) = seeded_store();
        let source = source(store);
        let t = target(&["grunge"], 45);

        let picked = source
            .fetch_closer_to_target(&CandidateQuery::new(10), &t)
            .await;
        let mut ids: Vec<_> = picked.iter().map(|c| c.artist_id.as_str()).collect();
        // Genre match ranks first.
        assert_eq!(ids.first(), Some(&"artist-0"));
        ids.sort();
        assert_eq!(ids, vec!["artist-0", "artist-3", "artist-4", "artist-5", "artist-6"]);
    }

    #[tokio::test]
    async fn further_excludes_similar_artists() {
        let (_dir, store) = seeded_store();
        let source = source(store);
        let t = target(&["rock"], 50);

        let picked = source
            .fetch_further_from_target(&CandidateQuery::new(10), &t)
            .await;
        assert!(!picked.is_empty());
        for c in &picked {
            let i: usize = c.artist_id.trim_start_matches("artist-").parse().unwrap();
            assert!(!GENRES[i % GENRES.len()].contains(&"rock"));
        }
    }

    #[tokio::test]
    async fn existing_artists_are_skipped() {
        let (_dir, store) = seeded_store();
        let source = source(store);
        let t = target(&["grunge"], 45);
        let query = CandidateQuery::new(10).existing_artists(["artist 0"]);

        let picked = source.fetch_closer_to_target(&query, &t).await;
        assert!(picked.iter().all(|c| c.artist_id != "artist-0"));
    }
}
