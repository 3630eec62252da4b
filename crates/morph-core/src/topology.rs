//! Versioned topology store
//!
//! Holds the single current [`TopologySnapshot`]. Readers always get a whole
//! snapshot behind an `Arc`; writers propose `version + 1` and the proposal is
//! rejected when another writer got there first (optimistic concurrency).

use crate::error::TopologyError;
use crate::types::TopologySnapshot;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;

/// Single source of truth for the current topology
#[derive(Debug)]
pub struct TopologyStore {
    current: RwLock<Arc<TopologySnapshot>>,
    history: RwLock<VecDeque<Arc<TopologySnapshot>>>,
    history_limit: usize,
    publisher: watch::Sender<Arc<TopologySnapshot>>,
}

impl TopologyStore {
    /// Create a store seeded with `initial` as the current snapshot
    #[must_use]
    pub fn new(initial: TopologySnapshot, history_limit: usize) -> Self {
        let initial = Arc::new(initial);
        let (publisher, _) = watch::channel(Arc::clone(&initial));
        let mut history = VecDeque::new();
        history.push_back(Arc::clone(&initial));
        Self {
            current: RwLock::new(initial),
            history: RwLock::new(history),
            history_limit: history_limit.max(1),
            publisher,
        }
    }

    /// Current snapshot
    #[inline]
    #[must_use]
    pub fn current(&self) -> Arc<TopologySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Current version number
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Publish `candidate` if it is exactly one version ahead of current
    ///
    /// # Errors
    /// `VersionConflict` when another writer already advanced the store.
    pub fn compare_and_swap(
        &self,
        candidate: TopologySnapshot,
    ) -> Result<Arc<TopologySnapshot>, TopologyError> {
        let mut current = self.current.write();
        if candidate.version != current.version + 1 {
            return Err(TopologyError::VersionConflict {
                proposed: candidate.version,
                current: current.version,
            });
        }

        let published = Arc::new(candidate);
        *current = Arc::clone(&published);

        {
            let mut history = self.history.write();
            history.push_back(Arc::clone(&published));
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }
        self.publisher.send_replace(Arc::clone(&published));
        drop(current);

        tracing::debug!(version = published.version, "published topology");
        Ok(published)
    }

    /// Read-modify-write with automatic retry on version conflicts
    ///
    /// `edit` runs against a fresh successor of the current snapshot on every
    /// attempt and must not assume anything survived from a previous attempt.
    ///
    /// # Errors
    /// Errors returned by `edit` abort immediately; `CasRetriesExhausted` once
    /// `max_attempts` proposals were all rejected.
    pub fn update<T, E, F>(
        &self,
        max_attempts: u32,
        mut edit: F,
    ) -> Result<(Arc<TopologySnapshot>, T), E>
    where
        F: FnMut(&mut TopologySnapshot) -> Result<T, E>,
        E: From<TopologyError>,
    {
        let max_attempts = max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let mut candidate = self.current().successor();
            let output = edit(&mut candidate)?;
            match self.compare_and_swap(candidate) {
                Ok(published) => return Ok((published, output)),
                Err(TopologyError::VersionConflict { proposed, current }) => {
                    tracing::debug!(attempt, proposed, current, "topology CAS lost, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(TopologyError::CasRetriesExhausted {
            attempts: max_attempts,
        }
        .into())
    }

    /// Most recent snapshots, oldest first
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<Arc<TopologySnapshot>> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Subscribe to published snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<TopologySnapshot>> {
        self.publisher.subscribe()
    }
}

impl Default for TopologyStore {
    fn default() -> Self {
        Self::new(TopologySnapshot::empty(), 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceAllocation, ServiceDescriptor};

    fn seeded() -> TopologyStore {
        TopologyStore::new(
            TopologySnapshot::empty().with_service(ServiceDescriptor::new("x")),
            10,
        )
    }

    #[test]
    fn cas_rejects_stale_writer() {
        let store = seeded();
        let base = store.current();

        let first = base.successor();
        let second = base.successor();

        assert!(store.compare_and_swap(first).is_ok());
        assert!(matches!(
            store.compare_and_swap(second),
            Err(TopologyError::VersionConflict {
                proposed: 1,
                current: 1
            })
        ));
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn update_retries_with_fresh_state() {
        let store = seeded();
        let mut raced = false;

        let (published, ()) = store
            .update::<_, TopologyError, _>(4, |candidate| {
                if !raced {
                    raced = true;
                    // a concurrent writer sneaks in between read and write
                    store.compare_and_swap(store.current().successor())?;
                }
                let x = candidate.services.get_mut(&"x".into()).unwrap();
                x.resource_allocation = ResourceAllocation::new(2.0, 2.0);
                Ok(())
            })
            .unwrap();

        assert_eq!(published.version, 2);
        assert_eq!(
            store.current().service(&"x".into()).unwrap().resource_allocation,
            ResourceAllocation::new(2.0, 2.0)
        );
    }

    #[test]
    fn history_is_bounded() {
        let store = TopologyStore::new(TopologySnapshot::empty(), 3);
        for _ in 0..5 {
            store.compare_and_swap(store.current().successor()).unwrap();
        }
        let versions: Vec<u64> = store.history(10).iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![3, 4, 5]);
        assert_eq!(store.history(1)[0].version, 5);
    }

    #[tokio::test]
    async fn subscribers_observe_new_versions() {
        let store = seeded();
        let mut rx = store.subscribe();
        store.compare_and_swap(store.current().successor()).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().version, 1);
    }
}
