//! Real gRPC tunnels on loopback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gate_tunnel::{dial, GateServer, RawCodec, RelayService, Tunnel, TunnelService};
use http::uri::PathAndQuery;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Writes back whatever it reads, then closes its send side.
struct Echo;

#[async_trait]
impl TunnelService for Echo {
    async fn serve_tunnel(&self, tunnel: Tunnel, _cancel: CancellationToken) -> anyhow::Result<()> {
        let (mut rx, mut tx) = tunnel.into_io();
        tokio::io::copy(&mut rx, &mut tx).await?;
        tx.shutdown().await?;
        Ok(())
    }
}

async fn start<S: TunnelService>(service: S, cancel: &CancellationToken) -> String {
    let server = GateServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.serve(Arc::new(service), cancel.clone()));
    addr
}

#[tokio::test]
async fn echo_through_a_relay_preserves_order() {
    let cancel = CancellationToken::new();
    let echo = start(Echo, &cancel).await;
    let relay = start(RelayService::new(echo), &cancel).await;

    let (mut rx, mut tx) = dial(&relay).await.unwrap().into_io();
    let chunks: [&[u8]; 3] = [b"one", b"two", b"three"];
    for chunk in chunks {
        tx.write_all(chunk).await.unwrap();
        tx.flush().await.unwrap();
    }

    let mut got = vec![0u8; "onetwothree".len()];
    tokio::time::timeout(Duration::from_secs(10), rx.read_exact(&mut got))
        .await
        .expect("echo did not arrive")
        .unwrap();
    assert_eq!(got, b"onetwothree");

    cancel.cancel();
}

#[tokio::test]
async fn close_of_send_still_lets_replies_through() {
    let cancel = CancellationToken::new();
    let echo = start(Echo, &cancel).await;

    let (mut rx, mut tx) = dial(&format!("http://{echo}")).await.unwrap().into_io();
    tx.write_all(b"last words").await.unwrap();
    tx.shutdown().await.unwrap();

    let mut got = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), rx.read_to_end(&mut got))
        .await
        .expect("echo did not finish")
        .unwrap();
    assert_eq!(got, b"last words");

    cancel.cancel();
}

#[tokio::test]
async fn binary_chunks_survive_the_codec() {
    let cancel = CancellationToken::new();
    let echo = start(Echo, &cancel).await;

    let (mut rx, mut tx) = dial(&echo).await.unwrap().into_io();
    let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
    tx.write_all(&payload).await.unwrap();
    tx.shutdown().await.unwrap();

    let mut got = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), rx.read_to_end(&mut got))
        .await
        .expect("echo did not finish")
        .unwrap();
    assert_eq!(got, payload);

    cancel.cancel();
}

#[tokio::test]
async fn unknown_method_is_unimplemented() {
    let cancel = CancellationToken::new();
    let echo = start(Echo, &cancel).await;

    let channel = tonic::transport::Endpoint::from_shared(format!("http://{echo}"))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready().await.unwrap();
    let outgoing = tokio_stream::iter(vec![Bytes::from_static(b"hi")]);
    let status = grpc
        .streaming(
            tonic::Request::new(outgoing),
            PathAndQuery::from_static("/acpgate.v1.Gate/Other"),
            RawCodec,
        )
        .await
        .err()
        .unwrap();
    assert_eq!(status.code(), tonic::Code::Unimplemented);

    cancel.cancel();
}

#[tokio::test]
async fn dial_failure_names_the_url() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = dial(&addr.to_string()).await.err().unwrap();
    assert!(err.to_string().contains(&addr.to_string()), "{err}");
}
