//! Fleet-link TCP server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use flotilla_deploy::DeploymentManager;
use flotilla_proto::{decode_line, encode_line, Message};
use flotilla_registry::{RoutingHandle, WorkerRegistry};

/// Accepts worker connections and dispatches their frames.
pub struct FleetServer {
    registry: Arc<WorkerRegistry>,
    manager: Arc<DeploymentManager>,
    next_conn_id: AtomicU64,
}

impl FleetServer {
    pub fn new(registry: Arc<WorkerRegistry>, manager: Arc<DeploymentManager>) -> Self {
        Self {
            registry,
            manager,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Accept loop. Each connection gets its own task.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            addr = ?listener.local_addr().ok(),
            "fleet link listening"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
                            debug!(conn_id, %peer, "worker connection accepted");
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                server.serve_connection(stream, conn_id).await;
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("fleet link shutting down");
                    break;
                }
            }
        }
    }

    async fn serve_connection(&self, stream: TcpStream, conn_id: u64) {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let line = match encode_line(&message) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "dropping unencodable frame");
                        continue;
                    }
                };
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match decode_line(&line) {
                    Ok(message) => self.dispatch(conn_id, message, &tx).await,
                    Err(e) => warn!(conn_id, error = %e, "dropping malformed frame"),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(conn_id, error = %e, "fleet link read failed");
                    break;
                }
            }
        }

        if let Err(e) = self.registry.detach(conn_id).await {
            warn!(conn_id, error = %e, "detach failed");
        }
        drop(tx);
        let _ = writer.await;
        debug!(conn_id, "worker connection closed");
    }

    async fn dispatch(&self, conn_id: u64, message: Message, tx: &mpsc::UnboundedSender<Message>) {
        match message {
            Message::RegisterWorker { hostname, .. } => {
                let handle = RoutingHandle {
                    conn_id,
                    tx: tx.clone(),
                };
                match self.registry.register(&hostname, handle).await {
                    Ok(id) => {
                        let _ = tx.send(Message::WorkerRegistered { id });
                    }
                    Err(e) => {
                        warn!(conn_id, %hostname, error = %e, "registration failed");
                        let _ = tx.send(Message::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }

            Message::WorkerStatus {
                worker_id,
                status,
                load,
                ..
            } => {
                if let Err(e) = self.registry.update_status(worker_id, status, load).await {
                    warn!(conn_id, worker_id, error = %e, "status update rejected");
                    let _ = tx.send(Message::Error {
                        message: e.to_string(),
                    });
                }
            }

            Message::DeploymentStatus {
                worker_id,
                deployment_id,
                replica_id,
                status,
                metrics,
                error,
                ..
            } => {
                if let Some(error) = &error {
                    warn!(
                        worker_id,
                        deployment_id,
                        replica_id,
                        %error,
                        "worker task failed"
                    );
                }
                if let Err(e) = self
                    .manager
                    .apply_deployment_status(worker_id, deployment_id, replica_id, status, metrics)
                    .await
                {
                    warn!(deployment_id, error = %e, "deployment status not applied");
                }
            }

            Message::ReplicaRemoved {
                deployment_id,
                replica_id,
                ..
            } => {
                if let Err(e) = self
                    .manager
                    .apply_replica_removed(deployment_id, replica_id)
                    .await
                {
                    warn!(deployment_id, error = %e, "replica removal not applied");
                }
            }

            // Orchestrator→worker frames have no business arriving here.
            other => {
                warn!(conn_id, frame = ?other, "dropping frame sent in the wrong direction");
            }
        }
    }
}
