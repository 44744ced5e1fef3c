use super::{lower_genres, CandidateQuery, CandidateSource};
use crate::discovery_store::{CandidateTrack, TrackWindowQuery, UNKNOWN_GENRE};

/// Popularity bounds for the genre strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopularityRange {
    pub min: Option<u8>,
    pub max: Option<u8>,
}

/// True when the track genre and any requested genre contain one another,
/// or share a whole word.
fn genre_matches(track_genre: &str, wanted: &[String]) -> bool {
    let tg = track_genre.trim().to_lowercase();
    if tg.is_empty() || tg == UNKNOWN_GENRE.to_lowercase() {
        return false;
    }
    let track_words: Vec<&str> = tg.split_whitespace().collect();
    wanted.iter().any(|w| {
        tg.contains(w.as_str())
            || w.contains(tg.as_str())
            || w.split_whitespace().any(|word| track_words.contains(&word))
    })
}

impl CandidateSource {
    /// Genre match: tracks in a popularity range whose genre tag matches one
    /// of `genres`, one track per artist.
    pub async fn fetch_tracks_by_genres(
        &self,
        query: &CandidateQuery,
        genres: &[String],
        popularity: PopularityRange,
    ) -> Vec<CandidateTrack> {
        let wanted = lower_genres(genres);
        if query.needed_artists == 0 || wanted.is_empty() {
            return Vec::new();
        }

        let window = self
            .config
            .random_fetch_window
            .max(self.oversample(query.needed_artists));
        // The store narrows by substring; word-level matching happens here.
        let window_query = TrackWindowQuery {
            min_popularity: popularity.min,
            max_popularity: popularity.max,
            require_genre: true,
            genres: wanted.clone(),
            profiled_only: true,
            ..query.window(window, true)
        };
        let tracks: Vec<_> = self
            .read("candidates_genre_window", move |s| s.fetch_tracks(&window_query))
            .await
            .into_iter()
            .filter(|t| t.genre.as_deref().is_some_and(|g| genre_matches(g, &wanted)))
            .collect();

        let profiles = self.profiles_for(&tracks).await;
        self.assemble("genre", tracks, &profiles, query, 1, true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::discovery_store::DiscoveryStore;
    use std::collections::HashSet;

    #[test]
    fn matching_is_case_insensitive_and_word_aware() {
        let wanted = vec!["rock".to_string()];
        assert!(genre_matches("Indie Rock", &wanted));
        assert!(genre_matches("ROCK", &wanted));
        assert!(!genre_matches("jazz", &wanted));
        assert!(!genre_matches("Unknown", &["unknown".to_string()]));

        let wanted = vec!["dance pop".to_string()];
        assert!(genre_matches("pop", &wanted));
    }

    #[tokio::test]
    async fn never_returns_unprofiled_artists() {
        let (_dir, store) = seeded_store();
        let source = source(store);

        for genres in [
            vec!["rock".to_string()],
            vec!["ROCK".to_string(), "jazz".to_string()],
            vec!["pop".to_string(), "hip hop".to_string(), "grunge".to_string()],
            vec!["".to_string()],
        ] {
            let picked = source
                .fetch_tracks_by_genres(&CandidateQuery::new(20), &genres, PopularityRange::default())
                .await;
            assert!(picked
                .iter()
                .all(|c| profiled_names().contains(&c.artist_name)));
        }
    }

    #[tokio::test]
    async fn one_track_per_artist_within_popularity_range() {
        let (_dir, store) = seeded_store();
        let source = source(store);
        let picked = source
            .fetch_tracks_by_genres(
                &CandidateQuery::new(10),
                &["rock".to_string()],
                PopularityRange {
                    min: Some(30),
                    max: Some(89),
                },
            )
            .await;

        // rock leads for artists 0, 3, 5 and 8; artist 0 is below the range.
        let artists: HashSet<_> = picked.iter().map(|c| c.artist_id.as_str()).collect();
        assert_eq!(artists, HashSet::from(["artist-3", "artist-5", "artist-8"]));
        assert_eq!(picked.len(), 3);
    }

    #[tokio::test]
    async fn rare_genre_is_found_in_a_large_store() {
        let (_dir, store) = seeded_store();
        let mut p = profile(0);
        p.artist_id = "crowd".to_string();
        p.name = "Crowd".to_string();
        store.upsert_artist_profile(&p).unwrap();
        for i in 0..500 {
            store
                .upsert_track(&track(&format!("crowd-{}", i), "Crowd", Some("pop"), 50))
                .unwrap();
        }
        let source = source(store);

        for _ in 0..10 {
            let picked = source
                .fetch_tracks_by_genres(
                    &CandidateQuery::new(1),
                    &["jazz".to_string()],
                    PopularityRange::default(),
                )
                .await;
            assert_eq!(picked.len(), 1);
            // Artists 1 and 6 carry jazz.
            assert!(picked[0].artist_id == "artist-1" || picked[0].artist_id == "artist-6");
        }
    }
}
