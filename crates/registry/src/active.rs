//! Hot-swappable holder for the currently active in-memory artifact.
//!
//! Readers clone an `Arc` snapshot under a read lock; a concurrent swap is
//! a single pointer exchange under the write lock. In-flight consumers keep
//! using their snapshot until they drop it - the old value is freed when
//! the last clone goes away, not at swap time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Metadata travelling with a loaded artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveInfo {
    pub artifact_id: String,
    pub name: String,
    pub version: String,
    pub manifest_hash: String,
    pub activated_at: DateTime<Utc>,
}

/// A loaded artifact plus its registry identity.
#[derive(Debug)]
pub struct ActiveEntry<T> {
    pub value: Arc<T>,
    pub info: ActiveInfo,
}

/// Process-wide holder for one artifact class (ruleset, scorer model).
///
/// Created at start-up and passed as a dependency; there is no global
/// instance.
#[derive(Debug)]
pub struct ActiveArtifact<T> {
    slot: RwLock<Option<ActiveEntry<T>>>,
}

impl<T> Default for ActiveArtifact<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ActiveArtifact<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Replace the active artifact, returning the previous snapshot (if
    /// any). Passing `None` clears the slot explicitly.
    pub fn swap(&self, entry: Option<ActiveEntry<T>>) -> Option<Arc<T>> {
        let mut slot = self.slot.write().expect("active artifact lock poisoned");
        let incoming = entry.as_ref().map(|e| e.info.artifact_id.clone());
        let previous = std::mem::replace(&mut *slot, entry);
        let outgoing = previous.as_ref().map(|e| e.info.artifact_id.clone());
        info!(
            from = outgoing.as_deref().unwrap_or("none"),
            to = incoming.as_deref().unwrap_or("none"),
            "active artifact swapped"
        );
        previous.map(|e| e.value)
    }

    /// Snapshot of the current artifact. O(1); never blocks on a swap
    /// beyond the reference exchange.
    pub fn current(&self) -> Option<Arc<T>> {
        let slot = self.slot.read().expect("active artifact lock poisoned");
        slot.as_ref().map(|e| Arc::clone(&e.value))
    }

    /// Metadata of the current artifact, for API surfaces that must not
    /// expose artifact bytes.
    pub fn info(&self) -> Option<ActiveInfo> {
        let slot = self.slot.read().expect("active artifact lock poisoned");
        slot.as_ref().map(|e| e.info.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.slot
            .read()
            .expect("active artifact lock poisoned")
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn entry(id: &str, value: Vec<u32>) -> ActiveEntry<Vec<u32>> {
        ActiveEntry {
            value: Arc::new(value),
            info: ActiveInfo {
                artifact_id: id.to_string(),
                name: "ruleset".to_string(),
                version: "1".to_string(),
                manifest_hash: format!("hash-{id}"),
                activated_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_swap_and_clear() {
        let holder = ActiveArtifact::new();
        assert!(holder.current().is_none());

        holder.swap(Some(entry("a", vec![1])));
        assert_eq!(*holder.current().unwrap(), vec![1]);
        assert_eq!(holder.info().unwrap().artifact_id, "a");

        let old = holder.swap(Some(entry("b", vec![2])));
        assert_eq!(*old.unwrap(), vec![1]);
        assert_eq!(*holder.current().unwrap(), vec![2]);

        holder.swap(None);
        assert!(!holder.is_loaded());
    }

    #[test]
    fn test_old_snapshot_survives_swap() {
        let holder = ActiveArtifact::new();
        holder.swap(Some(entry("a", vec![1, 2, 3])));

        let snapshot = holder.current().unwrap();
        holder.swap(Some(entry("b", vec![9])));

        // The in-flight consumer still sees the pre-swap value.
        assert_eq!(*snapshot, vec![1, 2, 3]);
        assert_eq!(*holder.current().unwrap(), vec![9]);
    }

    #[test]
    fn test_concurrent_readers_observe_pre_or_post_only() {
        let holder = Arc::new(ActiveArtifact::new());
        let pre = Arc::new(vec![1u32]);
        let post = Arc::new(vec![2u32]);
        holder.swap(Some(ActiveEntry {
            value: Arc::clone(&pre),
            info: entry("pre", vec![]).info,
        }));

        let stop = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::new();
        for _ in 0..4 {
            let holder = Arc::clone(&holder);
            let pre = Arc::clone(&pre);
            let post = Arc::clone(&post);
            let stop = Arc::clone(&stop);
            readers.push(thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let seen = holder.current().unwrap();
                    // Reference equality: every observation is exactly the
                    // pre or the post value, never anything else.
                    assert!(Arc::ptr_eq(&seen, &pre) || Arc::ptr_eq(&seen, &post));
                }
            }));
        }

        for _ in 0..100 {
            holder.swap(Some(ActiveEntry {
                value: Arc::clone(&post),
                info: entry("post", vec![]).info,
            }));
            holder.swap(Some(ActiveEntry {
                value: Arc::clone(&pre),
                info: entry("pre", vec![]).info,
            }));
        }

        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
