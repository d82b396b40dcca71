//! # acp-proxy
//!
//! An ACP proxy that sits between an editor (the upstream client) and an
//! agent (downstream), forwarding every call unchanged in both directions and
//! recording each one into an [`AuditStore`](audit_log::AuditStore).
//!
//! The proxy is two objects, one per role:
//!
//! * [`ProxyAgent`] is the agent the editor talks to.
//! * [`ProxyClient`] is the client the real agent talks to.
//!
//! Each is handed to an SDK connection and then pointed at the other side's
//! connection. The connections are `!Send`, so everything runs on a
//! [`LocalSet`](tokio::task::LocalSet):
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use acp_proxy::acp;
//! use acp_proxy::{ProxyAgent, ProxyClient};
//! use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
//!
//! # async fn wire(
//! #     up_tx: tokio::io::Stdout, up_rx: tokio::io::Stdin,
//! #     down_tx: tokio::process::ChildStdin, down_rx: tokio::process::ChildStdout,
//! # ) {
//! let proxy_agent = Rc::new(ProxyAgent::new());
//! let proxy_client = Rc::new(ProxyClient::new());
//!
//! let (upstream, up_io) = acp::AgentSideConnection::new(
//!     proxy_agent.clone(), up_tx.compat_write(), up_rx.compat(),
//!     |fut| { tokio::task::spawn_local(fut); },
//! );
//! let (downstream, down_io) = acp::ClientSideConnection::new(
//!     proxy_client.clone(), down_tx.compat_write(), down_rx.compat(),
//!     |fut| { tokio::task::spawn_local(fut); },
//! );
//!
//! proxy_agent.set_downstream(Rc::new(downstream));
//! proxy_client.set_upstream(Rc::new(upstream));
//!
//! tokio::task::spawn_local(up_io);
//! tokio::task::spawn_local(down_io);
//! # }
//! ```

mod capability;
mod proxy;

pub use agent_client_protocol as acp;
pub use capability::{is_not_supported, Capabilities, Capability};
pub use proxy::{ProxyAgent, ProxyClient};
