use serde::{Deserialize, Serialize};

/// The physical link a recorded message crossed.
///
/// This is about which way the bytes travelled, not about who called whom:
/// the result of an upstream-initiated call is recorded as
/// [`Direction::DownstreamToUpstream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Editor -> agent.
    UpstreamToDownstream,
    /// Agent -> editor.
    DownstreamToUpstream,
}

impl Direction {
    /// The opposite link, used for the result half of a call.
    pub fn reverse(self) -> Self {
        match self {
            Direction::UpstreamToDownstream => Direction::DownstreamToUpstream,
            Direction::DownstreamToUpstream => Direction::UpstreamToDownstream,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::UpstreamToDownstream => "upstream_to_downstream",
            Direction::DownstreamToUpstream => "downstream_to_upstream",
        }
    }
}

/// A single audit record for one message that crossed the gate.
///
/// Records are immutable once built. Empty strings handed to the builder
/// methods are stored as `None` so the persisted line carries `null` rather
/// than `""`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(rename = "ts_unix_ms", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub direction: Direction,
    pub session_id: Option<String>,
    pub method: Option<String>,
    pub is_request: bool,
    pub is_notify: bool,
    /// Kept for the line format; handlers never see the JSON-RPC id, so
    /// this is always written as `null`.
    pub rpc_id: Option<serde_json::Value>,
    pub raw: serde_json::Value,
    pub user_text: Option<String>,
    pub agent_text: Option<String>,
}

impl AuditRecord {
    fn new(direction: Direction, method: &str, raw: serde_json::Value) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            direction,
            session_id: None,
            method: non_empty(method),
            is_request: false,
            is_notify: false,
            rpc_id: None,
            raw,
            user_text: None,
            agent_text: None,
        }
    }

    /// Record for the call half of a request.
    pub fn request(direction: Direction, method: &str, raw: serde_json::Value) -> Self {
        Self {
            is_request: true,
            ..Self::new(direction, method, raw)
        }
    }

    /// Record for a result travelling back over `direction`.
    pub fn response(direction: Direction, method: &str, raw: serde_json::Value) -> Self {
        Self::new(direction, method, raw)
    }

    /// Record for a one-way notification.
    pub fn notification(direction: Direction, method: &str, raw: serde_json::Value) -> Self {
        Self {
            is_notify: true,
            ..Self::new(direction, method, raw)
        }
    }

    /// Attach the session id and the user/agent text pulled out of the
    /// payload. Empty values are dropped.
    pub fn with_extracted(mut self, session_id: &str, user_text: &str, agent_text: &str) -> Self {
        self.session_id = non_empty(session_id);
        self.user_text = non_empty(user_text);
        self.agent_text = non_empty(agent_text);
        self
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
