use agent_client_protocol as acp;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// What the inspector could pull out of one message. Fields it could not
/// find are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub session_id: String,
    pub user_text: String,
    pub agent_text: String,
}

impl Extraction {
    fn session(session_id: String) -> Self {
        Self {
            session_id,
            ..Self::default()
        }
    }

    fn user(session_id: String, user_text: String) -> Self {
        Self {
            session_id,
            user_text,
            agent_text: String::new(),
        }
    }

    fn agent(session_id: String, agent_text: String) -> Self {
        Self {
            session_id,
            user_text: String::new(),
            agent_text,
        }
    }
}

/// Fallback view for params the typed decoders reject, and for methods
/// that carry no text.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionScoped {
    #[serde(default)]
    session_id: Option<acp::SessionId>,
}

/// Extract session id and text from raw JSON params of `method`.
///
/// Never fails: params that are not valid JSON, or that do not have the
/// shape the method calls for, produce an empty [`Extraction`].
pub fn extract(method: &str, raw_params: &[u8]) -> Extraction {
    match serde_json::from_slice::<serde_json::Value>(raw_params) {
        Ok(params) => extract_value(method, &params),
        Err(_) => Extraction::default(),
    }
}

/// Same as [`extract`], for params that are already parsed.
///
/// `session/prompt` and `session/update` are decoded into their ACP types.
/// Anything else, and any payload those types reject (a `null` where a list
/// belongs, an update kind newer than this build), still reports the
/// `sessionId` if it has one.
pub fn extract_value(method: &str, params: &serde_json::Value) -> Extraction {
    if method == acp::AGENT_METHOD_NAMES.session_prompt {
        if let Some(req) = decode::<acp::PromptRequest>(params) {
            return prompt(&req);
        }
    } else if method == acp::CLIENT_METHOD_NAMES.session_update {
        if let Some(notification) = decode::<acp::SessionNotification>(params) {
            return session_update(&notification);
        }
    }

    match decode::<SessionScoped>(params) {
        Some(SessionScoped {
            session_id: Some(id),
        }) => Extraction::session(id.0.to_string()),
        _ => Extraction::default(),
    }
}

/// The session and the user's text of a `session/prompt` call.
pub fn prompt(req: &acp::PromptRequest) -> Extraction {
    Extraction::user(req.session_id.0.to_string(), join_text(&req.prompt))
}

/// The session and text of a `session/update` notification. Agent message
/// and thought chunks, tool calls and tool call updates are agent text;
/// user message chunks are user text. Other update kinds only report the
/// session.
pub fn session_update(notification: &acp::SessionNotification) -> Extraction {
    let sid = notification.session_id.0.to_string();
    match &notification.update {
        acp::SessionUpdate::AgentMessageChunk(chunk)
        | acp::SessionUpdate::AgentThoughtChunk(chunk) => {
            Extraction::agent(sid, block_text(&chunk.content).unwrap_or_default().to_string())
        }
        acp::SessionUpdate::UserMessageChunk(chunk) => {
            Extraction::user(sid, block_text(&chunk.content).unwrap_or_default().to_string())
        }
        acp::SessionUpdate::ToolCall(call) => Extraction::agent(sid, tool_text(&call.content)),
        acp::SessionUpdate::ToolCallUpdate(update) => {
            let text = update
                .fields
                .content
                .as_deref()
                .map(tool_text)
                .unwrap_or_default();
            Extraction::agent(sid, text)
        }
        _ => Extraction::session(sid),
    }
}

/// ACP params are always JSON objects. serde would happily decode a struct
/// from an array, so anything else is rejected up front.
fn decode<T: DeserializeOwned>(params: &serde_json::Value) -> Option<T> {
    if !params.is_object() {
        return None;
    }
    T::deserialize(params).ok()
}

fn block_text(block: &acp::ContentBlock) -> Option<&str> {
    match block {
        acp::ContentBlock::Text(text) if !text.text.is_empty() => Some(text.text.as_str()),
        _ => None,
    }
}

/// Newline-join the text of every text block, in order. Blocks without
/// text are skipped rather than contributing empty lines.
pub fn join_text(blocks: &[acp::ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(block_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn tool_text(items: &[acp::ToolCallContent]) -> String {
    items
        .iter()
        .filter_map(|item| match item {
            acp::ToolCallContent::Content(content) => block_text(&content.content),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
