//! Presence domain models.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identity of one transport session.
///
/// Assigned by the transport at connect time. A reconnecting client gets a
/// fresh id with no relation to its previous session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a new random connection id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A reported geographic position.
///
/// Coordinates are stored exactly as reported; no range checks are applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
        }
    }

    /// Attach a horizontal accuracy in meters.
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

/// One connected client's last known position.
///
/// Serialized flat: `{"id": .., "latitude": .., "longitude": .., "accuracy": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEntry {
    pub id: ConnectionId,
    #[serde(flatten)]
    pub location: Location,
}

/// Immutable copy of the registry at one point in time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Registry mutation counter when the copy was taken.
    pub version: u64,
    pub users: Vec<UserEntry>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Find the entry for a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<&UserEntry> {
        self.users.iter().find(|u| &u.id == id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.get(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_entry_serializes_flat() {
        let entry = UserEntry {
            id: "a".into(),
            location: Location::new(10.0, 20.0).with_accuracy(5.0),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["id"], "a");
        assert_eq!(json["latitude"], 10.0);
        assert_eq!(json["longitude"], 20.0);
        assert_eq!(json["accuracy"], 5.0);
    }

    #[test]
    fn test_accuracy_omitted_when_absent() {
        let json = serde_json::to_string(&Location::new(1.0, 2.0)).unwrap();
        assert!(!json.contains("accuracy"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = Snapshot {
            version: 3,
            users: vec![UserEntry {
                id: "b".into(),
                location: Location::new(30.0, 40.0),
            }],
        };
        assert!(snapshot.contains(&"b".into()));
        assert!(!snapshot.contains(&"a".into()));
        assert_eq!(snapshot.len(), 1);
    }
}
