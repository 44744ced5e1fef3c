//! Persisted, weighted, directed cache of artist-to-artist relationships.
//!
//! A miss is not an error: it tells the caller to fall back to a slower
//! discovery path and then `save` what it found.

use crate::discovery_store::{
    ArtistProfile, ArtistRelationship, DiscoveryStore, RelationshipEdge, RelationshipType,
};
use crate::stats::StatisticsTracker;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Lowest strength assigned to an edge derived from a ranked list.
const MIN_RANKED_STRENGTH: f64 = 0.1;

pub struct ArtistRelationshipGraph {
    store: Arc<dyn DiscoveryStore>,
    tracker: StatisticsTracker,
}

impl ArtistRelationshipGraph {
    pub fn new(store: Arc<dyn DiscoveryStore>, tracker: StatisticsTracker) -> Self {
        Self { store, tracker }
    }

    /// Edges from `source_artist_id` with `strength >= min_strength`,
    /// strongest first, at most `limit`.
    pub fn get(
        &self,
        source_artist_id: &str,
        min_strength: f64,
        limit: usize,
    ) -> Result<Vec<ArtistRelationship>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let edges = self
            .store
            .get_relationships(source_artist_id, min_strength, limit);
        self.tracker
            .record_db_query("graph_get", start.elapsed().as_millis() as u64);
        edges
    }

    /// Upsert edges keyed by (source, related). Strength is clamped to [0, 1],
    /// self-edges are dropped, and for a pair repeated within `edges` the last
    /// occurrence wins. Returns the number of edges written.
    pub fn save(
        &self,
        source_artist_id: &str,
        source_artist_name: &str,
        edges: &[RelationshipEdge],
    ) -> Result<usize> {
        let mut seen = HashSet::new();
        let mut cleaned: Vec<RelationshipEdge> = Vec::with_capacity(edges.len());
        for edge in edges.iter().rev() {
            if edge.related_artist_id.is_empty() || edge.related_artist_id == source_artist_id {
                continue;
            }
            if !seen.insert(edge.related_artist_id.as_str()) {
                continue;
            }
            let strength = if edge.strength.is_nan() {
                0.0
            } else {
                edge.strength.clamp(0.0, 1.0)
            };
            cleaned.push(RelationshipEdge {
                strength,
                ..edge.clone()
            });
        }
        cleaned.reverse();

        if cleaned.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let written = self
            .store
            .save_relationships(source_artist_id, source_artist_name, &cleaned)?;
        self.tracker
            .record_db_query("graph_save", start.elapsed().as_millis() as u64);
        debug!(
            "Cached {} relationship edges for artist {}",
            written, source_artist_id
        );
        Ok(written)
    }
}

/// Edges for an upstream related-artists answer. The list is ranked, so
/// strength decays linearly with position.
pub fn ranked_edges(related: &[ArtistProfile], relationship_type: RelationshipType) -> Vec<RelationshipEdge> {
    let n = related.len().max(1) as f64;
    related
        .iter()
        .enumerate()
        .map(|(i, artist)| RelationshipEdge {
            related_artist_id: artist.artist_id.clone(),
            related_artist_name: artist.name.clone(),
            strength: (1.0 - i as f64 / n).max(MIN_RANKED_STRENGTH),
            relationship_type,
        })
        .collect()
}

/// Share of `a`'s genres that also appear in `b`, case-insensitively.
/// Zero when `a` has no genres.
pub fn genre_overlap_ratio(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<String> = a.iter().map(|g| g.trim().to_lowercase()).filter(|g| !g.is_empty()).collect();
    if a.is_empty() {
        return 0.0;
    }
    let b: HashSet<String> = b.iter().map(|g| g.trim().to_lowercase()).collect();
    a.intersection(&b).count() as f64 / a.len() as f64
}

/// Edges inferred from genre overlap with `target`. Candidates with no
/// overlap are skipped.
pub fn genre_similarity_edges(target: &ArtistProfile, candidates: &[ArtistProfile]) -> Vec<RelationshipEdge> {
    let mut edges: Vec<RelationshipEdge> = candidates
        .iter()
        .filter(|c| c.artist_id != target.artist_id)
        .filter_map(|c| {
            let overlap = genre_overlap_ratio(&target.genres, &c.genres);
            (overlap > 0.0).then(|| RelationshipEdge {
                related_artist_id: c.artist_id.clone(),
                related_artist_name: c.name.clone(),
                strength: overlap,
                relationship_type: RelationshipType::GenreSimilar,
            })
        })
        .collect();
    edges.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    edges
}
