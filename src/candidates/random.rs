use super::{CandidateQuery, CandidateSource};
use crate::discovery_store::{CandidateTrack, TrackWindowQuery};
use rand::seq::SliceRandom;

impl CandidateSource {
    /// Random sampling: shuffle a bounded window of tracks and fill per-artist
    /// quotas until `needed_artists` distinct profiled artists are reached.
    pub async fn fetch_random_tracks(&self, query: &CandidateQuery) -> Vec<CandidateTrack> {
        if query.needed_artists == 0 {
            return Vec::new();
        }

        let window = self
            .config
            .random_fetch_window
            .max(self.oversample(query.needed_artists * query.tracks_per_artist));
        let window_query = TrackWindowQuery {
            profiled_only: true,
            ..query.window(window, true)
        };
        let mut tracks = self
            .read("candidates_random_window", move |s| s.fetch_tracks(&window_query))
            .await;
        tracks.shuffle(&mut rand::rng());

        let profiles = self.profiles_for(&tracks).await;
        self.assemble(
            "random",
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
    use crate::discovery_store::DiscoveryStore;
    use std::collections::HashSet;

    #[tokio::test]
    async fn returns_at_most_needed_artists() {
        let (_dir, store) = seeded_store();
        let source = source(store);

        for _ in 0..10 {
            let picked = source.fetch_random_tracks(&CandidateQuery::new(3)).await;
            let artists: HashSet<_> = picked.iter().map(|c| c.artist_id.clone()).collect();
            assert!(artists.len() <= 3);
            assert_eq!(picked.len(), artists.len());
            assert!(picked.iter().all(|c| profiled_names().contains(&c.artist_name)));
        }
    }

    #[tokio::test]
    async fn never_returns_existing_artists_or_excluded_tracks() {
        let (_dir, store) = seeded_store();
        let source = source(store);
        let existing: Vec<String> = (0..8).map(|i| format!("artist {}", i)).collect();
        let query = CandidateQuery::new(5)
            .tracks_per_artist(3)
            .existing_artists(&existing)
            .exclude_tracks(["t8-0", "t9-0"]);

        let picked = source.fetch_random_tracks(&query).await;
        let names: HashSet<_> = picked.iter().map(|c| c.artist_name.as_str()).collect();
        assert_eq!(names, HashSet::from(["Artist 8", "Artist 9"]));
        assert_eq!(picked.len(), 4);
        assert!(picked
            .iter()
            .all(|c| c.track.track_id != "t8-0" && c.track.track_id != "t9-0"));
    }

    #[tokio::test]
    async fn unprofiled_tracks_do_not_crowd_out_the_window() {
        let (_dir, store) = seeded_store();
        for i in 0..300 {
            store
                .upsert_track(&track(&format!("noise-{}", i), "Nobody", Some("pop"), 50))
                .unwrap();
        }
        let source = source(store);

        let picked = source.fetch_random_tracks(&CandidateQuery::new(10)).await;
        assert_eq!(picked.len(), 10);
    }

    #[tokio::test]
    async fn zero_needed_is_empty() {
        let (_dir, store) = seeded_store();
        assert!(source(store)
            .fetch_random_tracks(&CandidateQuery::new(0))
            .await
            .is_empty());
    }
}
