use super::{CandidateQuery, CandidateSource};
use crate::discovery_store::{
    ArtistProfile, CandidateTrack, TrackOrder, TrackRecord, TrackWindowQuery,
};
use std::collections::HashMap;
use tracing::warn;

/// Artist identity for a track that may have no profile.
fn fallback_artist_id(track: &TrackRecord) -> String {
    track
        .artist_id
        .clone()
        .unwrap_or_else(|| format!("name:{}", track.artist_name.trim().to_lowercase()))
}

impl CandidateSource {
    /// Absolute fallback: the most popular non-excluded tracks, with no
    /// profile or genre constraint. Distinct artists are preferred; the
    /// remainder is filled with further tracks in popularity order.
    pub async fn fetch_absolute_fallback(&self, query: &CandidateQuery) -> Vec<CandidateTrack> {
        let wanted = query.needed_artists * query.tracks_per_artist;
        if wanted == 0 {
            return Vec::new();
        }

        let window_query = TrackWindowQuery {
            order: TrackOrder::PopularityDesc,
            ..query.window(self.oversample(wanted), false)
        };
        let tracks: Vec<TrackRecord> = self
            .read("candidates_fallback_window", move |s| s.fetch_tracks(&window_query))
            .await
            .into_iter()
            .filter(|t| !t.artist_name.trim().is_empty())
            .collect();

        let mut per_artist: HashMap<String, usize> = HashMap::new();
        let mut picked: Vec<usize> = Vec::new();
        for (i, track) in tracks.iter().enumerate() {
            if picked.len() >= wanted {
                break;
            }
            let count = per_artist.entry(fallback_artist_id(track)).or_insert(0);
            if *count < query.tracks_per_artist {
                *count += 1;
                picked.push(i);
            }
        }
        for i in 0..tracks.len() {
            if picked.len() >= wanted {
                break;
            }
            if !picked.contains(&i) {
                picked.push(i);
            }
        }
        picked.sort_unstable();

        if picked.is_empty() {
            warn!("No candidates available: absolute fallback found no tracks");
        }

        tracks
            .into_iter()
            .enumerate()
            .filter(|(i, _)| picked.binary_search(i).is_ok())
            .map(|(_, track)| {
                self.observe(&track);
                CandidateTrack {
                    artist_id: fallback_artist_id(&track),
                    artist_name: track.artist_name.clone(),
                    track,
                }
            })
            .collect()
    }

    /// Tracks for an explicit set of artist ids, used to force-include
    /// specific artists. Existing-artist filtering does not apply.
    pub async fn fetch_tracks_by_artist_ids(
        &self,
        artist_ids: &[String],
        query: &CandidateQuery,
    ) -> Vec<CandidateTrack> {
        if artist_ids.is_empty() {
            return Vec::new();
        }

        let ids = artist_ids.to_vec();
        let artists: Vec<ArtistProfile> = self
            .read("candidates_profiles_by_ids", move |s| {
                s.get_artist_profiles_by_ids(&ids)
            })
            .await;
        if artists.is_empty() {
            return Vec::new();
        }

        let names: Vec<String> = artists.iter().map(|a| a.name.clone()).collect();
        let limit = self.oversample(artists.len() * query.tracks_per_artist);
        let tracks = self
            .read("candidates_tracks_by_artists", move |s| {
                s.get_tracks_by_artist_names(&names, limit)
            })
            .await;

        let profiles: HashMap<String, ArtistProfile> = artists
            .into_iter()
            .map(|a| (a.name.trim().to_lowercase(), a))
            .collect();
        let forced = CandidateQuery {
            needed_artists: artist_ids.len(),
            ..query.clone()
        };
        self.assemble(
            "by_artist_ids",
            tracks,
            &profiles,
            &forced,
            query.tracks_per_artist,
            false,
        )
    }
}
