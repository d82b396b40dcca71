use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use http::uri::PathAndQuery;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::body::BoxBody;
use tonic::codegen::{empty_body, Body, BoxFuture, Service, StdError};
use tonic::server::{Grpc, NamedService, StreamingService};
use tonic::transport::{Endpoint, Server};
use tonic::{Status, Streaming};

use crate::codec::RawCodec;
use crate::error::TunnelError;
use crate::stream::{chunk_sink, chunk_stream, Tunnel, SEND_QUEUE};

/// gRPC service name.
pub const SERVICE_NAME: &str = "acpgate.v1.Gate";

/// Path of the single tunnel operation, a bidirectional stream of raw
/// byte messages.
pub const TUNNEL_PATH: &str = "/acpgate.v1.Gate/Tunnel";

/// Handles one accepted tunnel.
///
/// Called on its own task for every tunnel; `cancel` is a child of the
/// server's token and fires when the server shuts down.
#[async_trait]
pub trait TunnelService: Send + Sync + 'static {
    async fn serve_tunnel(&self, tunnel: Tunnel, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Accepts tunnels on a TCP listener and hands each one to a
/// [`TunnelService`].
pub struct GateServer {
    listener: TcpListener,
}

impl GateServer {
    pub async fn bind(addr: &str) -> Result<Self, TunnelError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TunnelError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve tunnels until `cancel` fires. Each tunnel runs in its own task;
    /// a failing tunnel is logged and does not affect the others.
    pub async fn serve<S>(
        self,
        service: Arc<S>,
        cancel: CancellationToken,
    ) -> Result<(), TunnelError>
    where
        S: TunnelService + ?Sized,
    {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "gate listening");
        }

        let gate = GateService {
            service,
            cancel: cancel.clone(),
        };
        Server::builder()
            .add_service(gate)
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(self.listener),
                cancel.cancelled_owned(),
            )
            .await
            .map_err(TunnelError::Serve)?;

        tracing::info!("gate stopped accepting");
        Ok(())
    }
}

/// The `acpgate.v1.Gate` gRPC service. Only [`TUNNEL_PATH`] is routed; any
/// other method is answered with `UNIMPLEMENTED`.
struct GateService<S: ?Sized> {
    service: Arc<S>,
    cancel: CancellationToken,
}

impl<S: ?Sized> Clone for GateService<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: ?Sized> NamedService for GateService<S> {
    const NAME: &'static str = SERVICE_NAME;
}

impl<S, B> Service<http::Request<B>> for GateService<S>
where
    S: TunnelService + ?Sized,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        if req.uri().path() != TUNNEL_PATH {
            tracing::warn!(path = req.uri().path(), "unknown gate method");
            return Box::pin(async move {
                let mut response = http::Response::new(empty_body());
                let headers = response.headers_mut();
                headers.insert(
                    Status::GRPC_STATUS,
                    (tonic::Code::Unimplemented as i32).into(),
                );
                headers.insert(
                    http::header::CONTENT_TYPE,
                    tonic::metadata::GRPC_CONTENT_TYPE,
                );
                Ok(response)
            });
        }

        let call = TunnelCall(self.clone());
        Box::pin(async move { Ok(Grpc::new(RawCodec).streaming(call, req).await) })
    }
}

/// One `Tunnel` call: the request stream feeds the tunnel's reader and the
/// tunnel's writer feeds the response stream.
struct TunnelCall<S: ?Sized>(GateService<S>);

impl<S> StreamingService<Bytes> for TunnelCall<S>
where
    S: TunnelService + ?Sized,
{
    type Response = Bytes;
    type ResponseStream = ReceiverStream<Result<Bytes, Status>>;
    type Future = BoxFuture<tonic::Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: tonic::Request<Streaming<Bytes>>) -> Self::Future {
        let service = Arc::clone(&self.0.service);
        let cancel = self.0.cancel.child_token();
        let remote_addr = request.remote_addr();

        let (tx, rx) = mpsc::channel(SEND_QUEUE);
        let tunnel = Tunnel::new(chunk_stream(request.into_inner()), chunk_sink(tx, Ok));

        tokio::spawn(async move {
            let connection_id = uuid::Uuid::new_v4();
            tracing::info!(%connection_id, ?remote_addr, "tunnel opened");
            match service.serve_tunnel(tunnel, cancel).await {
                Ok(()) => tracing::info!(%connection_id, ?remote_addr, "tunnel closed"),
                Err(err) => tracing::error!(
                    %connection_id,
                    ?remote_addr,
                    err = format!("{err:#}"),
                    "tunnel failed"
                ),
            }
        });

        Box::pin(async move { Ok(tonic::Response::new(ReceiverStream::new(rx))) })
    }
}

/// Open a tunnel to a gate server.
///
/// `addr` is either `host:port` or an `http://` URL, with or without the
/// tunnel path.
pub async fn dial(addr: &str) -> Result<Tunnel, TunnelError> {
    let url = endpoint_url(addr);
    let dial_error = |source| TunnelError::Dial {
        url: url.clone(),
        source,
    };

    let channel = Endpoint::from_shared(url.clone())
        .map_err(dial_error)?
        .connect()
        .await
        .map_err(dial_error)?;
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready().await.map_err(dial_error)?;

    let (tx, rx) = mpsc::channel(SEND_QUEUE);
    let response = grpc
        .streaming(
            tonic::Request::new(ReceiverStream::new(rx)),
            PathAndQuery::from_static(TUNNEL_PATH),
            RawCodec,
        )
        .await
        .map_err(|source| TunnelError::Open {
            url: url.clone(),
            source,
        })?;
    tracing::debug!(%url, "tunnel dialled");

    let incoming = chunk_stream(response.into_inner());
    Ok(Tunnel::new(incoming, chunk_sink(tx, std::convert::identity)))
}

/// The gRPC endpoint for `addr`: scheme and authority only.
pub fn endpoint_url(addr: &str) -> String {
    if !addr.contains("://") {
        return format!("http://{addr}");
    }
    let trimmed = addr.trim_end_matches('/');
    trimmed
        .strip_suffix(TUNNEL_PATH)
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_forms() {
        assert_eq!(endpoint_url("127.0.0.1:9000"), "http://127.0.0.1:9000");
        assert_eq!(
            endpoint_url("http://gate.internal:9000/"),
            "http://gate.internal:9000"
        );
        assert_eq!(endpoint_url("http://h:1/acpgate.v1.Gate/Tunnel"), "http://h:1");
        assert_eq!(endpoint_url("https://h:1"), "https://h:1");
    }

    #[test]
    fn tunnel_path_is_under_the_service_name() {
        assert_eq!(TUNNEL_PATH, format!("/{SERVICE_NAME}/Tunnel"));
        assert_eq!(<GateService<dyn TunnelService> as NamedService>::NAME, SERVICE_NAME);
    }

    #[tokio::test]
    async fn bind_reports_the_address() {
        let err = GateServer::bind("not an address").await.err().unwrap();
        assert!(err.to_string().contains("not an address"));

        let server = GateServer::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }
}
