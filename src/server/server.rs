use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::server::handler::Dispatcher;
use crate::server::state::Registry;

#[derive(Error, Debug)]
pub enum Error {
    #[error("server I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("cannot load mock definitions: {0}")]
    MockLoadError(String),
}

/// A configured but not yet started mock server. Construct one through
/// [`NgApimockServerBuilder`](crate::server::NgApimockServerBuilder).
pub struct NgApimockServer {
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    host: &'static str,
    port: u16,
}

impl NgApimockServer {
    pub(crate) fn new(
        registry: Arc<Registry>,
        dispatcher: Arc<Dispatcher>,
        host: &'static str,
        port: u16,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            host,
            port,
        }
    }

    /// The process-wide registry, e.g. for registering additional mock
    /// definitions after a file-watch reload.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Runs the server until the process is terminated.
    pub async fn start(&self) -> Result<(), Error> {
        self.start_with_signals(None, std::future::pending::<()>())
            .await
    }

    /// Runs the server, reporting the bound address through `addr_sender`
    /// (useful with port 0) and shutting down gracefully when `shutdown`
    /// resolves.
    pub async fn start_with_signals(
        &self,
        addr_sender: Option<oneshot::Sender<SocketAddr>>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind((self.host, self.port)).await?;
        let addr = listener.local_addr()?;

        tracing::info!("listening on http://{addr}");
        if let Some(sender) = addr_sender {
            let _ = sender.send(addr);
        }

        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, _peer) = accepted?;
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req: Request<Incoming>| {
                            let dispatcher = dispatcher.clone();
                            async move { Ok::<_, Infallible>(handle(dispatcher, req).await) }
                        });
                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            tracing::debug!("connection error: {err}");
                        }
                    });
                }
            }
        }
    }
}

async fn handle(dispatcher: Arc<Dispatcher>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::debug!("cannot read request body: {err}");
            Bytes::new()
        }
    };
    dispatcher.dispatch(parts, body).await
}
