//! Ephemeral, TTL'd store of speculative precomputations.
//!
//! Process-local: a miss is normal and callers recompute.

use crate::stats::metrics;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Composite request signature. Built from its parts in any order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PrepJobKey(String);

impl PrepJobKey {
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parts: Vec<String> = parts
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .collect();
        parts.sort();

        let mut hasher = Sha256::new();
        hasher.update(parts.join("\u{1f}").as_bytes());
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrepJobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepJobStatus {
    Warming,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrepJob<T> {
    pub id: String,
    pub key: PrepJobKey,
    pub status: PrepJobStatus,
    pub payload: Option<T>,
    pub error: Option<String>,
    pub expires_at: Instant,
}

impl<T> PrepJob<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Prep jobs keyed by id. Expired jobs are removed when read.
pub struct PrepJobCache<T> {
    jobs: Mutex<HashMap<String, PrepJob<T>>>,
}

impl<T: Clone> Default for PrepJobCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> PrepJobCache<T> {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Start a `warming` job. Returns its id.
    pub fn create_prep_job(&self, key: PrepJobKey, ttl: Duration) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let job = PrepJob {
            id: id.clone(),
            key,
            status: PrepJobStatus::Warming,
            payload: None,
            error: None,
            expires_at: Instant::now() + ttl,
        };
        let mut jobs = self.jobs.lock().unwrap();
        jobs.insert(id.clone(), job);
        metrics::set_prep_jobs(jobs.len());
        debug!("Prep job {} warming", id);
        id
    }

    /// Returns false when the job is gone or expired.
    pub fn mark_prep_ready(&self, id: &str, payload: T) -> bool {
        self.transition(id, |job| {
            job.status = PrepJobStatus::Ready;
            job.payload = Some(payload);
            job.error = None;
        })
    }

    /// Returns false when the job is gone or expired.
    pub fn mark_prep_failed(&self, id: &str, error: impl Into<String>) -> bool {
        let error = error.into();
        self.transition(id, |job| {
            job.status = PrepJobStatus::Failed;
            job.error = Some(error);
        })
    }

    fn transition(&self, id: &str, apply: impl FnOnce(&mut PrepJob<T>)) -> bool {
        let now = Instant::now();
        let mut jobs = self.jobs.lock().unwrap();
        let expired = match jobs.get(id) {
            Some(job) => job.is_expired(now),
            None => return false,
        };
        if expired {
            jobs.remove(id);
            metrics::set_prep_jobs(jobs.len());
            return false;
        }
        if let Some(job) = jobs.get_mut(id) {
            apply(job);
        }
        true
    }

    pub fn get_prep_job(&self, id: &str) -> Option<PrepJob<T>> {
        let now = Instant::now();
        let mut jobs = self.jobs.lock().unwrap();
        let expired = jobs.get(id)?.is_expired(now);
        if expired {
            jobs.remove(id);
            metrics::set_prep_jobs(jobs.len());
            return None;
        }
        jobs.get(id).cloned()
    }

    /// The `ready` job for `key` expiring last. Expired jobs met on the way
    /// are removed.
    pub fn find_ready_job_by_key(&self, key: &PrepJobKey) -> Option<PrepJob<T>> {
        let now = Instant::now();
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, job| job.key != *key || !job.is_expired(now));
        if jobs.len() != before {
            metrics::set_prep_jobs(jobs.len());
        }
        jobs.values()
            .filter(|job| job.key == *key && job.status == PrepJobStatus::Ready)
            .max_by_key(|job| job.expires_at)
            .cloned()
    }

    /// Remove every expired job. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, job| !job.is_expired(now));
        metrics::set_prep_jobs(jobs.len());
        before - jobs.len()
    }

    /// Jobs held, expired ones included until they are read or purged.
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PrepJobKey {
        PrepJobKey::from_parts(["user-1", "round-3", "rock"])
    }

    #[test]
    fn key_ignores_part_order_and_case() {
        assert_eq!(key(), PrepJobKey::from_parts(["ROCK", "round-3", "user-1"]));
        assert_ne!(key(), PrepJobKey::from_parts(["user-1", "round-4", "rock"]));
        assert_eq!(key().as_str().len(), 64);
    }

    #[test]
    fn lifecycle_warming_then_ready() {
        let cache: PrepJobCache<Vec<String>> = PrepJobCache::new();
        let id = cache.create_prep_job(key(), Duration::from_secs(60));

        let job = cache.get_prep_job(&id).unwrap();
        assert_eq!(job.status, PrepJobStatus::Warming);
        assert!(cache.find_ready_job_by_key(&key()).is_none());

        assert!(cache.mark_prep_ready(&id, vec!["t1".to_string()]));
        let ready = cache.find_ready_job_by_key(&key()).unwrap();
        assert_eq!(ready.id, id);
        assert_eq!(ready.payload, Some(vec!["t1".to_string()]));
    }

    #[test]
    fn failed_jobs_keep_the_error() {
        let cache: PrepJobCache<u32> = PrepJobCache::new();
        let id = cache.create_prep_job(key(), Duration::from_secs(60));
        assert!(cache.mark_prep_failed(&id, "upstream down"));

        let job = cache.get_prep_job(&id).unwrap();
        assert_eq!(job.status, PrepJobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("upstream down"));
        assert!(cache.find_ready_job_by_key(&key()).is_none());
        assert!(!cache.mark_prep_ready("missing", 1));
    }

    #[test]
    fn expired_jobs_are_absent_and_evicted_on_read() {
        let cache: PrepJobCache<u32> = PrepJobCache::new();
        let id = cache.create_prep_job(key(), Duration::from_millis(1));
        assert!(cache.mark_prep_ready(&id, 7));
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get_prep_job(&id).is_none());
        assert!(cache.find_ready_job_by_key(&key()).is_none());
        assert!(cache.is_empty());
        assert!(!cache.mark_prep_ready(&id, 8));
    }

    #[test]
    fn purge_removes_only_expired() {
        let cache: PrepJobCache<u32> = PrepJobCache::new();
        cache.create_prep_job(key(), Duration::from_millis(1));
        cache.create_prep_job(PrepJobKey::from_parts(["other"]), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
