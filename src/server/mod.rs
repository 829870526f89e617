mod routes;

use anyhow::{Result, anyhow};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::llm::provider::LlmProvider;
use crate::pipeline::ChatPipeline;

pub use routes::{CHAT_PATH, ChatError, ChatRequest, MAX_BODY_BYTES, handle};

/// HTTP front end for a shared [`ChatPipeline`]. One task per connection.
pub struct ChatServer<P> {
    listener: TcpListener,
    pipeline: Arc<ChatPipeline<P>>,
}

impl<P> ChatServer<P>
where
    P: LlmProvider + Send + Sync + 'static,
{
    pub async fn bind(host: &str, port: u16, pipeline: Arc<ChatPipeline<P>>) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|err| anyhow!("Failed to bind {host}:{port}: {err}"))?;
        Ok(Self { listener, pipeline })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` resolves. Connections already in
    /// flight are left to finish on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(%addr, "chat server listening");
        let mut shutdown = std::pin::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(error = %err, "failed to accept connection");
                            continue;
                        }
                    };
                    debug!(%peer, "connection accepted");
                    self.spawn_connection(stream);
                }
            }
        }
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream) {
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            let service = service_fn(move |request| {
                let pipeline = Arc::clone(&pipeline);
                async move { Ok::<_, Infallible>(handle(&pipeline, request).await) }
            });
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(error = %err, "connection closed with error");
            }
        });
    }
}
