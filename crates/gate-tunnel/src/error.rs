/// Errors raised while setting up or serving tunnels.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("gate server failed")]
    Serve(#[source] tonic::transport::Error),

    #[error("failed to connect to {url}")]
    Dial {
        url: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("failed to open tunnel to {url}")]
    Open {
        url: String,
        #[source]
        source: tonic::Status,
    },
}
