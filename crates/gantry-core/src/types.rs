use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TransportKind — identifies which transport backend reaches a system
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    WebSocket,
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

// ---------------------------------------------------------------------------
// Direction — which way a payload is being mapped
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// External representation -> internal representation.
    In,
    /// Internal representation -> external representation.
    Out,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

// ---------------------------------------------------------------------------
// SystemStatus — snapshot returned by the facade
// ---------------------------------------------------------------------------

/// Point-in-time view of one external system, as reported by
/// `Bridge::get_system_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub authenticated: bool,
    pub remaining_requests: usize,
    pub queue_size: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Utc>>,
    pub transport: TransportStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportStatus {
    pub kind: TransportKind,
    pub connected: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kind_display_and_serialize() {
        assert_eq!(TransportKind::WebSocket.to_string(), "websocket");
        assert_eq!(TransportKind::Http.to_string(), "http");

        let json = serde_json::to_string(&TransportKind::WebSocket).unwrap();
        assert_eq!(json, "\"websocket\"");
        let back: TransportKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TransportKind::WebSocket);
    }

    #[test]
    fn direction_display() {
        assert_eq!(Direction::In.to_string(), "in");
        assert_eq!(Direction::Out.to_string(), "out");
    }

    #[test]
    fn system_status_round_trips() {
        let status = SystemStatus {
            authenticated: true,
            remaining_requests: 7,
            queue_size: 2,
            last_activity: Some(chrono::Utc::now()),
            transport: TransportStatus {
                kind: TransportKind::Http,
                connected: false,
            },
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["authenticated"], true);
        assert_eq!(json["transport"]["kind"], "http");
        let back: SystemStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back.remaining_requests, 7);
    }
}
