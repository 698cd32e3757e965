//! Connection registry.
//!
//! Holds the set of open sessions and the last reported location of each
//! session that has reported at least once. An entry exists only while its
//! session is open, so a report that races past its own disconnect is
//! rejected instead of leaving a ghost entry behind.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::{BeaconError, BeaconResult};
use crate::model::{ConnectionId, Location, Snapshot, UserEntry};

#[derive(Debug, Clone)]
struct Entry {
    location: Location,
    reported_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    open: HashSet<ConnectionId>,
    entries: HashMap<ConnectionId, Entry>,
    version: u64,
}

/// Authoritative map from connection to last known location.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a session as open. It has no entry until its first report.
    pub fn open(&self, id: ConnectionId) -> BeaconResult<()> {
        let mut inner = self.inner.write();
        if inner.open.contains(&id) {
            return Err(BeaconError::DuplicateConnection(id));
        }
        let _ = inner.open.insert(id);
        Ok(())
    }

    /// Insert or replace the entry for `id` (last write wins).
    ///
    /// Returns the registry version after the write.
    pub fn upsert(&self, id: &ConnectionId, location: Location) -> BeaconResult<u64> {
        self.upsert_at(id, location, Utc::now())
    }

    pub(crate) fn upsert_at(
        &self,
        id: &ConnectionId,
        location: Location,
        reported_at: DateTime<Utc>,
    ) -> BeaconResult<u64> {
        let mut inner = self.inner.write();
        if !inner.open.contains(id) {
            debug!(conn_id = %id, "rejecting report for closed connection");
            return Err(BeaconError::UnknownConnection(id.clone()));
        }
        let _ = inner.entries.insert(
            id.clone(),
            Entry {
                location,
                reported_at,
            },
        );
        inner.version += 1;
        Ok(inner.version)
    }

    /// Close the session and drop its entry. Safe to call repeatedly.
    ///
    /// Returns `true` when an entry was removed, i.e. snapshots change.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let mut inner = self.inner.write();
        let _ = inner.open.remove(id);
        let removed = inner.entries.remove(id).is_some();
        if removed {
            inner.version += 1;
        }
        removed
    }

    /// Copy all current entries, ordered by connection id.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read();
        let mut users: Vec<UserEntry> = inner
            .entries
            .iter()
            .map(|(id, entry)| UserEntry {
                id: id.clone(),
                location: entry.location,
            })
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Snapshot {
            version: inner.version,
            users,
        }
    }

    /// Number of entries (sessions that have reported).
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of open sessions, reported or not.
    pub fn open_count(&self) -> usize {
        self.inner.read().open.len()
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self, id: &ConnectionId) -> bool {
        self.inner.read().open.contains(id)
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// When `id` last reported, if it has an entry.
    pub fn last_report_at(&self, id: &ConnectionId) -> Option<DateTime<Utc>> {
        self.inner.read().entries.get(id).map(|e| e.reported_at)
    }

    /// Sessions whose last report is older than `cutoff`.
    pub fn stale_since(&self, cutoff: DateTime<Utc>) -> Vec<ConnectionId> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|(_, entry)| entry.reported_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::from(s)
    }

    fn open_registry(ids: &[&str]) -> Registry {
        let registry = Registry::new();
        for s in ids {
            registry.open(id(s)).unwrap();
        }
        registry
    }

    #[test]
    fn test_open_without_report_is_not_visible() {
        let registry = open_registry(&["a"]);
        assert!(registry.is_open(&id("a")));
        assert_eq!(registry.open_count(), 1);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_duplicate_open_rejected() {
        let registry = open_registry(&["a"]);
        let err = registry.open(id("a")).unwrap_err();
        assert!(matches!(err, BeaconError::DuplicateConnection(_)));
        assert_eq!(registry.open_count(), 1);
    }

    #[test]
    fn test_upsert_then_snapshot() {
        let registry = open_registry(&["a"]);
        registry.upsert(&id("a"), Location::new(10.0, 20.0)).unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.users[0].id, id("a"));
        assert_eq!(snapshot.users[0].location, Location::new(10.0, 20.0));
    }

    #[test]
    fn test_last_write_wins() {
        let registry = open_registry(&["a"]);
        registry.upsert(&id("a"), Location::new(10.0, 20.0)).unwrap();
        registry
            .upsert(&id("a"), Location::new(11.0, 21.0).with_accuracy(3.0))
            .unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.users[0].location,
            Location::new(11.0, 21.0).with_accuracy(3.0)
        );
    }

    #[test]
    fn test_repeated_identical_upsert_keeps_content() {
        let registry = open_registry(&["a"]);
        registry.upsert(&id("a"), Location::new(1.0, 2.0)).unwrap();
        let first = registry.snapshot();
        registry.upsert(&id("a"), Location::new(1.0, 2.0)).unwrap();
        let second = registry.snapshot();
        assert_eq!(first.users, second.users);
        assert!(second.version > first.version);
    }

    #[test]
    fn test_upsert_unknown_connection_rejected() {
        let registry = Registry::new();
        let err = registry.upsert(&id("ghost"), Location::new(0.0, 0.0)).unwrap_err();
        assert!(matches!(err, BeaconError::UnknownConnection(_)));
        assert!(registry.is_empty());
        assert_eq!(registry.version(), 0);
    }

    #[test]
    fn test_report_after_remove_creates_no_ghost() {
        let registry = open_registry(&["a"]);
        registry.upsert(&id("a"), Location::new(1.0, 1.0)).unwrap();
        assert!(registry.remove(&id("a")));
        assert!(registry.upsert(&id("a"), Location::new(2.0, 2.0)).is_err());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = open_registry(&["a", "b"]);
        registry.upsert(&id("a"), Location::new(1.0, 1.0)).unwrap();
        registry.upsert(&id("b"), Location::new(2.0, 2.0)).unwrap();

        assert!(registry.remove(&id("a")));
        let once = registry.snapshot();
        assert!(!registry.remove(&id("a")));
        let twice = registry.snapshot();

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
        assert!(!registry.is_open(&id("a")));
    }

    #[test]
    fn test_remove_unreported_does_not_bump_version() {
        let registry = open_registry(&["a"]);
        assert!(!registry.remove(&id("a")));
        assert_eq!(registry.version(), 0);
        assert_eq!(registry.open_count(), 0);
    }

    #[test]
    fn test_sequence_matches_last_write_wins_model() {
        let registry = open_registry(&["a", "b", "c"]);
        let mut expected: HashMap<ConnectionId, Location> = HashMap::new();

        let ops: Vec<(&str, Option<(f64, f64)>)> = vec![
            ("a", Some((1.0, 1.0))),
            ("b", Some((2.0, 2.0))),
            ("a", Some((3.0, 3.0))),
            ("c", Some((4.0, 4.0))),
            ("b", None),
            ("c", Some((5.0, 5.0))),
            ("b", None),
        ];
        for (who, op) in ops {
            match op {
                Some((lat, lon)) => {
                    registry.upsert(&id(who), Location::new(lat, lon)).unwrap();
                    let _ = expected.insert(id(who), Location::new(lat, lon));
                }
                None => {
                    let _ = registry.remove(&id(who));
                    let _ = expected.remove(&id(who));
                }
            }
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), expected.len());
        for user in &snapshot.users {
            assert_eq!(expected.get(&user.id), Some(&user.location));
        }
    }

    #[test]
    fn test_snapshot_sorted_by_id() {
        let registry = open_registry(&["c", "a", "b"]);
        for s in ["c", "a", "b"] {
            registry.upsert(&id(s), Location::new(0.0, 0.0)).unwrap();
        }
        let ids: Vec<String> = registry
            .snapshot()
            .users
            .into_iter()
            .map(|u| u.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_stale_since() {
        let registry = open_registry(&["old", "fresh"]);
        let now = Utc::now();
        registry
            .upsert_at(&id("old"), Location::new(0.0, 0.0), now - Duration::seconds(120))
            .unwrap();
        registry
            .upsert_at(&id("fresh"), Location::new(0.0, 0.0), now)
            .unwrap();

        let stale = registry.stale_since(now - Duration::seconds(60));
        assert_eq!(stale, vec![id("old")]);
        assert_eq!(
            registry.last_report_at(&id("fresh")),
            Some(now)
        );
        assert_eq!(registry.last_report_at(&id("missing")), None);
    }

    #[test]
    fn test_concurrent_upserts_for_distinct_ids() {
        let registry = Arc::new(Registry::new());
        let threads = 8;
        let reports = 250;
        for t in 0..threads {
            registry.open(id(&format!("conn-{t}"))).unwrap();
        }

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let conn = id(&format!("conn-{t}"));
                    for i in 0..reports {
                        registry
                            .upsert(&conn, Location::new(t as f64, i as f64))
                            .unwrap();
                        let snapshot = registry.snapshot();
                        assert!(snapshot.contains(&conn));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), threads);
        assert_eq!(snapshot.version, (threads * reports) as u64);
        for t in 0..threads {
            let entry = snapshot.get(&id(&format!("conn-{t}"))).unwrap();
            assert_eq!(entry.location, Location::new(t as f64, (reports - 1) as f64));
        }
    }
}
