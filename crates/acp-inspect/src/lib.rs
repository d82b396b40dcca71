//! # acp-inspect
//!
//! Best-effort reading of ACP messages for the audit trail. Given a method
//! name and its params, [`extract`] pulls out the session id, the text the
//! user sent and the text the agent produced, without ever failing: anything
//! it does not understand simply comes back empty.
//!
//! Params are decoded into the `agent-client-protocol` types; when a payload
//! does not fit them, only its `sessionId` is kept.
//!
//! ```rust
//! let got = acp_inspect::extract(
//!     "session/prompt",
//!     br#"{"sessionId":"sess_x","prompt":[{"type":"text","text":"Hello"}]}"#,
//! );
//! assert_eq!(got.session_id, "sess_x");
//! assert_eq!(got.user_text, "Hello");
//! ```

mod inspect;

pub use inspect::{extract, extract_value, join_text, prompt, session_update, Extraction};
