// Wire frame definitions
// Client ↔ server frames for the per-ride room protocol

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames sent from client to server (tagged by "event").
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "event")]
pub enum ClientFrame {
    /// Subscribe to one ride's update stream.
    #[serde(rename = "joinRideRoom")]
    JoinRideRoom {
        #[serde(rename = "rideId")]
        ride_id: i64,
        #[serde(rename = "userId")]
        user_id: i64,
        role: String,
    },

    /// Unsubscribe from a ride's update stream.
    #[serde(rename = "leaveRideRoom")]
    LeaveRideRoom {
        #[serde(rename = "rideId")]
        ride_id: i64,
        #[serde(rename = "userId")]
        user_id: i64,
    },
}

/// Frames sent from server to client (tagged by "event").
///
/// Anything that fails to deserialize into one of these is logged and
/// ignored; upstream noise must not interrupt the tracking session.
#[derive(Debug, Deserialize)]
#[serde(tag = "event")]
pub enum ServerFrame {
    /// Acknowledgement of a join request; echoes the ride when the server
    /// bothers to.
    #[serde(rename = "roomAdded")]
    RoomAdded {
        #[serde(rename = "rideId", default)]
        ride_id: Option<i64>,
    },

    /// The primary location-update event.
    #[serde(rename = "updatePassengers")]
    UpdatePassengers(RawLocationUpdate),

    /// Acknowledgement of a leave request.
    #[serde(rename = "roomLeft")]
    RoomLeft {
        #[serde(rename = "rideId", default)]
        ride_id: Option<i64>,
    },

    /// Non-fatal server advisory.
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

/// Raw location payload as it arrives off the wire.
///
/// Coordinates are kept as `serde_json::Value` because the upstream sends
/// them as strings or numbers (and sometimes placeholder text); the
/// normalizer owns the parsing precedence.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawLocationUpdate {
    #[serde(default)]
    pub lat: Option<Value>,
    #[serde(default)]
    pub long: Option<Value>,
    #[serde(default)]
    pub lng: Option<Value>,
    #[serde(rename = "rideId", default)]
    pub ride_id: Option<i64>,
    #[serde(rename = "userId", default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub speed: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_join_frame() {
        let frame = ClientFrame::JoinRideRoom {
            ride_id: 8,
            user_id: 42,
            role: "admin".to_string(),
        };

        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"event\":\"joinRideRoom\""));
        assert!(json.contains("\"rideId\":8"));
        assert!(json.contains("\"userId\":42"));
        assert!(json.contains("\"role\":\"admin\""));
    }

    #[test]
    fn test_serialize_leave_frame() {
        let frame = ClientFrame::LeaveRideRoom {
            ride_id: 8,
            user_id: 42,
        };

        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"event\":\"leaveRideRoom\""));
        assert!(json.contains("\"rideId\":8"));
    }

    #[test]
    fn test_deserialize_update_with_string_coordinates() {
        let json = r#"{
            "event": "updatePassengers",
            "lat": "24.8607",
            "long": "67.0011",
            "rideId": 8,
            "userId": 42,
            "speed": 31.5
        }"#;

        let frame: ServerFrame = serde_json::from_str(json).unwrap();
        match frame {
            ServerFrame::UpdatePassengers(raw) => {
                assert_eq!(raw.lat, Some(Value::from("24.8607")));
                assert_eq!(raw.long, Some(Value::from("67.0011")));
                assert_eq!(raw.lng, None);
                assert_eq!(raw.ride_id, Some(8));
                assert_eq!(raw.user_id, Some(42));
                assert_eq!(raw.speed, Some(31.5));
            }
            other => panic!("expected UpdatePassengers, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_update_with_numeric_coordinates() {
        let json = r#"{"event": "updatePassengers", "lat": 24.86, "lng": 67.0}"#;

        let frame: ServerFrame = serde_json::from_str(json).unwrap();
        match frame {
            ServerFrame::UpdatePassengers(raw) => {
                assert_eq!(raw.lat, Some(Value::from(24.86)));
                assert_eq!(raw.lng, Some(Value::from(67.0)));
                assert_eq!(raw.ride_id, None);
            }
            other => panic!("expected UpdatePassengers, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_room_added() {
        let frame: ServerFrame = serde_json::from_str(r#"{"event": "roomAdded", "rideId": 8}"#).unwrap();
        match frame {
            ServerFrame::RoomAdded { ride_id } => assert_eq!(ride_id, Some(8)),
            other => panic!("expected RoomAdded, got {:?}", other),
        }

        // Ack without an echoed ride is still an ack
        let frame: ServerFrame = serde_json::from_str(r#"{"event": "roomAdded"}"#).unwrap();
        assert!(matches!(frame, ServerFrame::RoomAdded { ride_id: None }));
    }

    #[test]
    fn test_deserialize_error_frame() {
        let frame: ServerFrame = serde_json::from_str(r#"{"event": "error", "message": "room full"}"#).unwrap();
        match frame {
            ServerFrame::Error { message } => assert_eq!(message.as_deref(), Some("room full")),
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result = serde_json::from_str::<ServerFrame>(r#"{"event": "rideUpdate", "lat": 1.0}"#);
        assert!(result.is_err());
    }
}
