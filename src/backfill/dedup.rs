//! In-flight and recent-attempt bookkeeping for backfill.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// What is being enriched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackfillKind {
    TrackMetadata,
    TrackDetails,
    ArtistProfile,
}

impl BackfillKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillKind::TrackMetadata => "track_metadata",
            BackfillKind::TrackDetails => "track_details",
            BackfillKind::ArtistProfile => "artist_profile",
        }
    }
}

/// Why an attempt could not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    InFlight,
    RecentlyAttempted,
}

#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    at: Instant,
    success: bool,
}

fn key(kind: BackfillKind, id: &str) -> String {
    format!("{}:{}", kind.as_str(), id)
}

#[derive(Default)]
struct LedgerState {
    ongoing: HashSet<String>,
    recent: HashMap<String, AttemptRecord>,
}

impl LedgerState {
    fn attempted_recently(&self, key: &str, ttl: Duration) -> bool {
        self.recent.get(key).is_some_and(|r| r.at.elapsed() < ttl)
    }
}

/// Tracks which ids are being enriched right now and which were tried
/// within the TTL, whatever the outcome. Both live under one lock so a claim
/// sees a consistent picture.
pub struct AttemptLedger {
    state: Mutex<LedgerState>,
    ttl: Duration,
}

impl AttemptLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            ttl,
        }
    }

    /// Cheap check used before scheduling work.
    pub fn would_start(&self, kind: BackfillKind, id: &str) -> bool {
        let key = key(kind, id);
        let state = self.state.lock().unwrap();
        !state.ongoing.contains(&key) && !state.attempted_recently(&key, self.ttl)
    }

    /// Claim `id` for `kind`. The claim is released when the guard drops; call
    /// [`AttemptGuard::finish`] to also record the attempt.
    pub fn try_begin(&self, kind: BackfillKind, id: &str) -> Result<AttemptGuard<'_>, Rejected> {
        let key = key(kind, id);
        let mut state = self.state.lock().unwrap();
        if state.attempted_recently(&key, self.ttl) {
            return Err(Rejected::RecentlyAttempted);
        }
        if !state.ongoing.insert(key.clone()) {
            return Err(Rejected::InFlight);
        }
        Ok(AttemptGuard {
            ledger: self,
            key,
            released: false,
        })
    }

    /// Outcome of the last attempt within the TTL, if any.
    pub fn last_outcome(&self, kind: BackfillKind, id: &str) -> Option<bool> {
        self.state
            .lock()
            .unwrap()
            .recent
            .get(&key(kind, id))
            .filter(|r| r.at.elapsed() < self.ttl)
            .map(|r| r.success)
    }

    /// Drop recent-attempt records older than the TTL. Returns how many went.
    pub fn evict_expired(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let before = state.recent.len();
        state.recent.retain(|_, r| r.at.elapsed() < self.ttl);
        before - state.recent.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().ongoing.len()
    }

    pub fn recent_len(&self) -> usize {
        self.state.lock().unwrap().recent.len()
    }
}

/// Exclusive claim on one backfill key.
pub struct AttemptGuard<'a> {
    ledger: &'a AttemptLedger,
    key: String,
    released: bool,
}

impl AttemptGuard<'_> {
    /// Record the attempt and release the claim in one step, so it is not
    /// repeated within the TTL.
    pub fn finish(mut self, success: bool) {
        let mut state = self.ledger.state.lock().unwrap();
        state.recent.insert(
            self.key.clone(),
            AttemptRecord {
                at: Instant::now(),
                success,
            },
        );
        state.ongoing.remove(&self.key);
        drop(state);
        self.released = true;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.ledger.state.lock().unwrap().ongoing.remove(&self.key);
        }
    }
}
