//! Wire messages exchanged with clients.
//!
//! Frames are JSON text, adjacently tagged with `type` and `data`:
//!
//! ```text
//! -> {"type":"updateLocation","data":{"latitude":10.0,"longitude":20.0}}
//! <- {"type":"updateUsers","data":[{"id":"..","latitude":10.0,"longitude":20.0}]}
//! <- {"type":"error","data":{"message":".."}}
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{BeaconError, BeaconResult};
use crate::model::{Location, Snapshot, UserEntry};
use crate::transport::Frame;

/// Messages sent by clients.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// The sender's current position.
    UpdateLocation(Location),
}

/// Messages sent to clients.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Full set of known user positions.
    UpdateUsers(Vec<UserEntry>),
    /// A non-fatal problem with something the client sent.
    Error { message: String },
}

impl ServerMessage {
    pub fn users(snapshot: &Snapshot) -> Self {
        Self::UpdateUsers(snapshot.users.clone())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize into a shareable text frame.
    pub fn to_frame(&self) -> BeaconResult<Frame> {
        let json = serde_json::to_string(self)?;
        Ok(Arc::from(json))
    }
}

/// Parse an inbound text frame.
///
/// Accepts the tagged envelope or a bare location object. Anything else,
/// including missing or non-numeric coordinates, is a malformed report.
pub fn parse_client_message(text: &str) -> BeaconResult<ClientMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => Ok(msg),
        Err(tagged_err) => serde_json::from_str::<Location>(text)
            .map(ClientMessage::UpdateLocation)
            .map_err(|_| BeaconError::malformed(tagged_err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_report() {
        let msg = parse_client_message(
            r#"{"type":"updateLocation","data":{"latitude":10.5,"longitude":-20.25,"accuracy":12}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::UpdateLocation(Location::new(10.5, -20.25).with_accuracy(12.0))
        );
    }

    #[test]
    fn test_parse_bare_location() {
        let msg = parse_client_message(r#"{"latitude":1,"longitude":2}"#).unwrap();
        assert_eq!(msg, ClientMessage::UpdateLocation(Location::new(1.0, 2.0)));
    }

    #[test]
    fn test_out_of_range_is_accepted() {
        let msg = parse_client_message(r#"{"latitude":512.0,"longitude":-999.0}"#).unwrap();
        assert_eq!(msg, ClientMessage::UpdateLocation(Location::new(512.0, -999.0)));
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let err = parse_client_message(r#"{"type":"updateLocation","data":{"latitude":1}}"#)
            .unwrap_err();
        assert!(err.is_client_fault());
    }

    #[test]
    fn test_non_numeric_field_is_malformed() {
        let err = parse_client_message(r#"{"latitude":"north","longitude":2}"#).unwrap_err();
        assert!(matches!(err, BeaconError::MalformedReport(_)));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(parse_client_message("not json").is_err());
        assert!(parse_client_message(r#"{"type":"chat","data":"hi"}"#).is_err());
    }

    #[test]
    fn test_update_users_frame_shape() {
        let snapshot = Snapshot {
            version: 1,
            users: vec![UserEntry {
                id: "a".into(),
                location: Location::new(10.0, 20.0),
            }],
        };
        let frame = ServerMessage::users(&snapshot).to_frame().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["type"], "updateUsers");
        assert_eq!(parsed["data"][0]["id"], "a");
        assert_eq!(parsed["data"][0]["latitude"], 10.0);
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = ServerMessage::error("bad report").to_frame().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["data"]["message"], "bad report");
    }
}
