//! Optional operations a downstream agent may or may not implement.

use std::collections::BTreeSet;

use agent_client_protocol as acp;

/// Optional operation sets a peer may or may not implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// `session/load`
    LoadSession,
    /// `session/set_model` (unstable in ACP)
    SetSessionModel,
}

impl Capability {
    pub fn method(self) -> &'static str {
        match self {
            Capability::LoadSession => acp::AGENT_METHOD_NAMES.session_load,
            Capability::SetSessionModel => acp::AGENT_METHOD_NAMES.session_set_model,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::LoadSession => "load_session",
            Capability::SetSessionModel => "set_session_model",
        }
    }

    /// The error returned instead of forwarding a call the next hop does
    /// not support.
    pub fn not_supported(self) -> acp::Error {
        acp::Error::method_not_found().data(serde_json::json!({
            "capability": self.as_str(),
            "method": self.method(),
        }))
    }
}

/// Whether `err` is a [`Capability::not_supported`] rejection rather than
/// an error from the agent itself.
pub fn is_not_supported(err: &acp::Error) -> bool {
    err.code == acp::Error::method_not_found().code
        && err
            .data
            .as_ref()
            .and_then(|d| d.get("capability"))
            .is_some()
}

/// The optional capabilities a peer currently supports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn supports(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.insert(capability);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_set_membership() {
        let caps = Capabilities::default().with(Capability::LoadSession);
        assert!(caps.supports(Capability::LoadSession));
        assert!(!caps.supports(Capability::SetSessionModel));

        let all: Capabilities = [Capability::SetSessionModel, Capability::LoadSession]
            .into_iter()
            .collect();
        assert_eq!(
            all.iter().collect::<Vec<_>>(),
            vec![Capability::LoadSession, Capability::SetSessionModel]
        );
    }

    #[test]
    fn capability_error_names_the_method() {
        let err = Capability::LoadSession.not_supported();
        assert!(is_not_supported(&err));
        assert_eq!(
            err.data,
            Some(serde_json::json!({"capability": "load_session", "method": "session/load"}))
        );
        assert!(!is_not_supported(&acp::Error::method_not_found()));
        assert_eq!(Capability::SetSessionModel.method(), "session/set_model");
    }
}
