//! Byte-stream tunnels between gates.
//!
//! A tunnel is one gRPC bidirectional stream (`acpgate.v1.Gate/Tunnel`)
//! carrying opaque byte chunks in both directions, one chunk per message.
//! On top of it this crate provides [`AsyncRead`]/[`AsyncWrite`] adapters,
//! a server that hands each tunnel to a [`TunnelService`], and the
//! [`bridge`] that joins two byte-stream pairs.
//!
//! # Architecture
//!
//! ```text
//! Editor <-stdio-> gate (client) <=tunnel=> gate (relay) <=tunnel=> gate (server) <-pipes-> Agent
//!                   [bridge]                 [bridge]                [proxy + audit]
//! ```
//!
//! The relay and client hops never parse the bytes; only the server end runs
//! the ACP proxy.
//!
//! [`AsyncRead`]: tokio::io::AsyncRead
//! [`AsyncWrite`]: tokio::io::AsyncWrite

pub mod bridge;
pub mod codec;
pub mod error;
pub mod relay;
pub mod server;
pub mod stream;

pub use bridge::bridge;
pub use codec::RawCodec;
pub use error::TunnelError;
pub use relay::RelayService;
pub use server::{dial, GateServer, TunnelService, TUNNEL_PATH};
pub use stream::{Tunnel, TunnelReader, TunnelWriter};
