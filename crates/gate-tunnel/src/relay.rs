use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bridge::bridge;
use crate::server::{dial, TunnelService};
use crate::stream::Tunnel;

/// Forwards every inbound tunnel to another gate without looking at the
/// bytes.
pub struct RelayService {
    target: String,
}

impl RelayService {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

#[async_trait]
impl TunnelService for RelayService {
    async fn serve_tunnel(&self, inbound: Tunnel, cancel: CancellationToken) -> anyhow::Result<()> {
        let outbound = dial(&self.target)
            .await
            .with_context(|| format!("relay to {}", self.target))?;
        tracing::debug!(remote = %self.target, "relay connected");
        bridge(inbound.into_io(), outbound.into_io(), cancel)
            .await
            .with_context(|| format!("relay bridge to {}", self.target))?;
        tracing::debug!(remote = %self.target, "relay finished");
        Ok(())
    }
}
