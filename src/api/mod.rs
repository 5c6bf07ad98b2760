//! Inbound trigger listener.
//!
//! ## Endpoints
//!
//! - `POST /webhook/{agent}` - Queue an immediate run (202, or 404 for unknown agents)
//! - `GET /health` - Liveness and the list of live agents
//!
//! The listener only ever writes to the [`TriggerQueue`]; it never touches
//! agent state.

mod routes;

pub use routes::{router, ListenerState};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::scheduler::TriggerQueue;

/// A running listener. Dropping it without [`shutdown`](Self::shutdown)
/// leaves the server task running until the runtime exits.
pub struct TriggerListener {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TriggerListener {
    /// Bind `addr` and spawn the server task.
    pub async fn start(addr: SocketAddr, queue: Arc<TriggerQueue>) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let app = router(queue);

        tracing::info!("Trigger listener on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("Trigger listener shutting down");
                })
                .await
            {
                tracing::error!("Trigger listener error: {}", e);
            }
        });

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_accepts_over_tcp_and_shuts_down() {
        let queue = Arc::new(TriggerQueue::new(["chat"]));
        let mut listener = TriggerListener::start("127.0.0.1:0".parse().unwrap(), queue.clone())
            .await
            .unwrap();
        let base = format!("http://{}", listener.local_addr());

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .unwrap();
        let resp = client.post(format!("{}/webhook/chat", base)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 202);
        let resp = client.post(format!("{}/webhook/nope", base)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        assert_eq!(queue.drain(), vec!["chat"]);

        listener.shutdown().await;
        assert!(client.post(format!("{}/webhook/chat", base)).send().await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let queue = Arc::new(TriggerQueue::new(["chat"]));
        let mut first = TriggerListener::start("127.0.0.1:0".parse().unwrap(), queue.clone())
            .await
            .unwrap();

        let taken = first.local_addr();
        assert!(TriggerListener::start(taken, queue).await.is_err());
        first.shutdown().await;
    }
}
