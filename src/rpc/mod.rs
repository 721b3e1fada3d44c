//! Remote control server and client.
//!
//! A thin TCP front end over the engine. Frames are length-prefixed JSON in
//! both directions.
//!
//! - `protocol`: request/response types and framing
//! - `transport`: TCP listener, one task per connection
//! - `methods`: command dispatch
//! - `client`: client used by `bkjobs remote`

pub mod client;
pub mod methods;
mod protocol;
mod transport;

use std::net::SocketAddr;
use tokio::sync::broadcast;

use crate::context::AppContext;
use transport::Transport;

pub use client::{ClientError, RpcClient};
pub use methods::MethodHandler;
pub use protocol::{MAX_FRAME_LEN, Request, Response, read_frame, write_frame};

pub struct RpcServer {
    transport: Transport,
    shutdown_tx: broadcast::Sender<()>,
}

impl RpcServer {
    /// Bind the listening socket. Port 0 picks a free port, see `local_addr`.
    pub async fn bind(ctx: AppContext, bind_addr: SocketAddr) -> anyhow::Result<Self> {
        let handler = MethodHandler::new(ctx);
        let transport = Transport::bind(bind_addr, handler).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            transport,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Serve until `shutdown` is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.transport.listen(shutdown_rx).await
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
