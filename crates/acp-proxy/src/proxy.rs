//! The two halves of the auditing proxy.
//!
//! [`ProxyAgent`] faces the upstream client (editor) and forwards to the
//! downstream agent; [`ProxyClient`] faces the downstream agent and forwards
//! back upstream. Each keeps a write-once slot for its next hop so the two
//! connections can be wired into each other after construction.

use std::cell::{OnceCell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use agent_client_protocol::{self as acp, AGENT_METHOD_NAMES, CLIENT_METHOD_NAMES};
use audit_log::{AuditRecord, AuditStore, Direction};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::capability::{Capabilities, Capability};

/// Writes call and notification records for one proxy half.
///
/// Store failures never reach the caller; they are logged and dropped.
struct Auditor {
    store: OnceCell<Arc<dyn AuditStore>>,
    direction: Direction,
}

impl Auditor {
    fn new(direction: Direction) -> Self {
        Self {
            store: OnceCell::new(),
            direction,
        }
    }

    fn set_store(&self, store: Arc<dyn AuditStore>) {
        if self.store.set(store).is_err() {
            warn!("audit store already set; keeping the first one");
        }
    }

    /// One record for the call, then one for the result if the call
    /// succeeded. Error results are not recorded.
    async fn call<P, R>(&self, method: &str, params: &P, outcome: &Result<R, acp::Error>)
    where
        P: Serialize,
        R: Serialize,
    {
        self.request(method, params).await;
        if let (Some(store), Ok(result)) = (self.store.get(), outcome) {
            let raw = to_raw(method, result);
            let record = AuditRecord::response(self.direction.reverse(), method, raw);
            write(store.as_ref(), record).await;
        }
    }

    /// The call record alone. Used directly for calls that never produce a
    /// result.
    async fn request<P: Serialize>(&self, method: &str, params: &P) {
        let Some(store) = self.store.get() else {
            return;
        };
        let raw = to_raw(method, params);
        let found = acp_inspect::extract_value(method, &raw);
        let record = AuditRecord::request(self.direction, method, raw).with_extracted(
            &found.session_id,
            &found.user_text,
            &found.agent_text,
        );
        write(store.as_ref(), record).await;
    }

    async fn notification<P: Serialize>(&self, method: &str, params: &P) {
        let Some(store) = self.store.get() else {
            return;
        };
        let raw = to_raw(method, params);
        let found = acp_inspect::extract_value(method, &raw);
        let record = AuditRecord::notification(self.direction, method, raw).with_extracted(
            &found.session_id,
            &found.user_text,
            &found.agent_text,
        );
        write(store.as_ref(), record).await;
    }
}

fn to_raw<T: Serialize>(method: &str, value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|err| {
        debug!(method, %err, "audit payload did not serialize");
        Value::Null
    })
}

async fn write(store: &dyn AuditStore, record: AuditRecord) {
    let method = record.method.clone();
    if let Err(err) = store.write(record).await {
        debug!(?method, %err, "audit write failed");
    }
}

fn peer_not_connected() -> acp::Error {
    acp::Error::internal_error().data("peer not connected")
}

/// Agent role presented to the upstream client.
///
/// Optional operations are only forwarded once the downstream agent has
/// advertised them: `loadSession` in its `initialize` result, a `models`
/// object in a `session/new` or `session/load` result.
pub struct ProxyAgent {
    downstream: OnceCell<Rc<dyn acp::Agent>>,
    capabilities: RefCell<Capabilities>,
    audit: Auditor,
}

impl Default for ProxyAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyAgent {
    pub fn new() -> Self {
        Self {
            downstream: OnceCell::new(),
            capabilities: RefCell::new(Capabilities::default()),
            audit: Auditor::new(Direction::UpstreamToDownstream),
        }
    }

    /// Wire in the downstream agent. Only the first call has any effect.
    pub fn set_downstream(&self, downstream: Rc<dyn acp::Agent>) {
        if self.downstream.set(downstream).is_err() {
            warn!("downstream agent already set; keeping the first one");
        }
    }

    /// Start auditing into `store`. Without one, calls are forwarded only.
    pub fn set_store(&self, store: Arc<dyn AuditStore>) {
        self.audit.set_store(store);
    }

    /// What the downstream agent has advertised so far.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities.borrow().clone()
    }

    fn learn(&self, capability: Capability) {
        if self.capabilities.borrow().supports(capability) {
            return;
        }
        debug!(capability = capability.as_str(), "downstream advertised capability");
        self.capabilities.borrow_mut().insert(capability);
    }

    fn downstream(&self) -> Result<&Rc<dyn acp::Agent>, acp::Error> {
        self.downstream.get().ok_or_else(peer_not_connected)
    }

    /// The downstream agent, provided it supports `capability`.
    fn supporting(&self, capability: Capability) -> Result<&Rc<dyn acp::Agent>, acp::Error> {
        let downstream = self.downstream()?;
        if self.capabilities.borrow().supports(capability) {
            Ok(downstream)
        } else {
            debug!(capability = capability.as_str(), "downstream lacks capability");
            Err(capability.not_supported())
        }
    }
}

#[async_trait::async_trait(?Send)]
impl acp::Agent for ProxyAgent {
    async fn initialize(
        &self,
        args: acp::InitializeRequest,
    ) -> Result<acp::InitializeResponse, acp::Error> {
        let result = self.downstream()?.initialize(args.clone()).await;
        if let Ok(response) = &result {
            if response.agent_capabilities.load_session {
                self.learn(Capability::LoadSession);
            }
        }
        self.audit
            .call(AGENT_METHOD_NAMES.initialize, &args, &result)
            .await;
        result
    }

    async fn authenticate(
        &self,
        args: acp::AuthenticateRequest,
    ) -> Result<acp::AuthenticateResponse, acp::Error> {
        let result = self.downstream()?.authenticate(args.clone()).await;
        self.audit
            .call(AGENT_METHOD_NAMES.authenticate, &args, &result)
            .await;
        result
    }

    async fn new_session(
        &self,
        args: acp::NewSessionRequest,
    ) -> Result<acp::NewSessionResponse, acp::Error> {
        let result = self.downstream()?.new_session(args.clone()).await;
        if matches!(&result, Ok(response) if response.models.is_some()) {
            self.learn(Capability::SetSessionModel);
        }
        self.audit
            .call(AGENT_METHOD_NAMES.session_new, &args, &result)
            .await;
        result
    }

    async fn load_session(
        &self,
        args: acp::LoadSessionRequest,
    ) -> Result<acp::LoadSessionResponse, acp::Error> {
        let downstream = self.supporting(Capability::LoadSession)?;
        let result = downstream.load_session(args.clone()).await;
        if matches!(&result, Ok(response) if response.models.is_some()) {
            self.learn(Capability::SetSessionModel);
        }
        self.audit
            .call(AGENT_METHOD_NAMES.session_load, &args, &result)
            .await;
        result
    }

    async fn set_session_mode(
        &self,
        args: acp::SetSessionModeRequest,
    ) -> Result<acp::SetSessionModeResponse, acp::Error> {
        let result = self.downstream()?.set_session_mode(args.clone()).await;
        self.audit
            .call(AGENT_METHOD_NAMES.session_set_mode, &args, &result)
            .await;
        result
    }

    async fn prompt(&self, args: acp::PromptRequest) -> Result<acp::PromptResponse, acp::Error> {
        let result = self.downstream()?.prompt(args.clone()).await;
        self.audit
            .call(AGENT_METHOD_NAMES.session_prompt, &args, &result)
            .await;
        result
    }

    /// Recorded as a call that has no result half.
    async fn cancel(&self, args: acp::CancelNotification) -> Result<(), acp::Error> {
        let result = self.downstream()?.cancel(args.clone()).await;
        self.audit
            .request(AGENT_METHOD_NAMES.session_cancel, &args)
            .await;
        result
    }

    async fn set_session_model(
        &self,
        args: acp::SetSessionModelRequest,
    ) -> Result<acp::SetSessionModelResponse, acp::Error> {
        let downstream = self.supporting(Capability::SetSessionModel)?;
        let result = downstream.set_session_model(args.clone()).await;
        self.audit
            .call(AGENT_METHOD_NAMES.session_set_model, &args, &result)
            .await;
        result
    }
}

/// Client role presented to the downstream agent.
pub struct ProxyClient {
    upstream: OnceCell<Rc<dyn acp::Client>>,
    audit: Auditor,
}

impl Default for ProxyClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyClient {
    pub fn new() -> Self {
        Self {
            upstream: OnceCell::new(),
            audit: Auditor::new(Direction::DownstreamToUpstream),
        }
    }

    /// Wire in the upstream client. Only the first call has any effect.
    pub fn set_upstream(&self, upstream: Rc<dyn acp::Client>) {
        if self.upstream.set(upstream).is_err() {
            warn!("upstream client already set; keeping the first one");
        }
    }

    pub fn set_store(&self, store: Arc<dyn AuditStore>) {
        self.audit.set_store(store);
    }

    fn upstream(&self) -> Result<&Rc<dyn acp::Client>, acp::Error> {
        self.upstream.get().ok_or_else(peer_not_connected)
    }
}

#[async_trait::async_trait(?Send)]
impl acp::Client for ProxyClient {
    async fn request_permission(
        &self,
        args: acp::RequestPermissionRequest,
    ) -> Result<acp::RequestPermissionResponse, acp::Error> {
        let result = self.upstream()?.request_permission(args.clone()).await;
        self.audit
            .call(CLIENT_METHOD_NAMES.session_request_permission, &args, &result)
            .await;
        result
    }

    async fn session_notification(&self, args: acp::SessionNotification) -> Result<(), acp::Error> {
        let result = self.upstream()?.session_notification(args.clone()).await;
        self.audit
            .notification(CLIENT_METHOD_NAMES.session_update, &args)
            .await;
        result
    }

    async fn read_text_file(
        &self,
        args: acp::ReadTextFileRequest,
    ) -> Result<acp::ReadTextFileResponse, acp::Error> {
        let result = self.upstream()?.read_text_file(args.clone()).await;
        self.audit
            .call(CLIENT_METHOD_NAMES.fs_read_text_file, &args, &result)
            .await;
        result
    }

    async fn write_text_file(
        &self,
        args: acp::WriteTextFileRequest,
    ) -> Result<acp::WriteTextFileResponse, acp::Error> {
        let result = self.upstream()?.write_text_file(args.clone()).await;
        self.audit
            .call(CLIENT_METHOD_NAMES.fs_write_text_file, &args, &result)
            .await;
        result
    }

    async fn create_terminal(
        &self,
        args: acp::CreateTerminalRequest,
    ) -> Result<acp::CreateTerminalResponse, acp::Error> {
        let result = self.upstream()?.create_terminal(args.clone()).await;
        self.audit
            .call(CLIENT_METHOD_NAMES.terminal_create, &args, &result)
            .await;
        result
    }

    async fn terminal_output(
        &self,
        args: acp::TerminalOutputRequest,
    ) -> Result<acp::TerminalOutputResponse, acp::Error> {
        let result = self.upstream()?.terminal_output(args.clone()).await;
        self.audit
            .call(CLIENT_METHOD_NAMES.terminal_output, &args, &result)
            .await;
        result
    }

    async fn release_terminal(
        &self,
        args: acp::ReleaseTerminalRequest,
    ) -> Result<acp::ReleaseTerminalResponse, acp::Error> {
        let result = self.upstream()?.release_terminal(args.clone()).await;
        self.audit
            .call(CLIENT_METHOD_NAMES.terminal_release, &args, &result)
            .await;
        result
    }

    async fn wait_for_terminal_exit(
        &self,
        args: acp::WaitForTerminalExitRequest,
    ) -> Result<acp::WaitForTerminalExitResponse, acp::Error> {
        let result = self.upstream()?.wait_for_terminal_exit(args.clone()).await;
        self.audit
            .call(CLIENT_METHOD_NAMES.terminal_wait_for_exit, &args, &result)
            .await;
        result
    }

    async fn kill_terminal_command(
        &self,
        args: acp::KillTerminalCommandRequest,
    ) -> Result<acp::KillTerminalCommandResponse, acp::Error> {
        let result = self.upstream()?.kill_terminal_command(args.clone()).await;
        self.audit
            .call(CLIENT_METHOD_NAMES.terminal_kill, &args, &result)
            .await;
        result
    }
}
