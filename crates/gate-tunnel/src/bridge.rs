use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Join two byte-stream pairs until one direction finishes.
///
/// Bytes read from `inbound` are written to `outbound` and vice versa, each
/// direction in its own task. When the inbound side reaches end-of-stream the
/// outbound writer is shut down so the far end sees close-of-send. The bridge
/// returns on the first of: `cancel` firing, the forward copy finishing, the
/// backward copy finishing. The other copy is aborted, not awaited.
///
/// Cancellation is a clean return; any I/O error from the copy that finished
/// first is the bridge's error.
pub async fn bridge<IR, IW, OR, OW>(
    inbound: (IR, IW),
    outbound: (OR, OW),
    cancel: CancellationToken,
) -> io::Result<()>
where
    IR: AsyncRead + Unpin + Send + 'static,
    IW: AsyncWrite + Unpin + Send + 'static,
    OR: AsyncRead + Unpin + Send + 'static,
    OW: AsyncWrite + Unpin + Send + 'static,
{
    let (mut in_rx, mut in_tx) = inbound;
    let (mut out_rx, mut out_tx) = outbound;

    let mut forward = tokio::spawn(async move {
        let bytes = tokio::io::copy(&mut in_rx, &mut out_tx).await?;
        out_tx.shutdown().await?;
        debug!(bytes, "inbound ended; closed outbound send side");
        Ok::<_, io::Error>(())
    });

    let mut backward = tokio::spawn(async move {
        let bytes = tokio::io::copy(&mut out_rx, &mut in_tx).await?;
        debug!(bytes, "outbound ended");
        Ok::<_, io::Error>(())
    });

    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("bridge cancelled");
            Ok(())
        }
        joined = &mut forward => flatten(joined),
        joined = &mut backward => flatten(joined),
    };

    forward.abort();
    backward.abort();
    outcome
}

fn flatten(joined: Result<io::Result<()>, JoinError>) -> io::Result<()> {
    joined.map_err(io::Error::other)?
}
