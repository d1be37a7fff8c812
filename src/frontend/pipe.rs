//! Pipe frontend: accepts client connections and relays framed requests.
//!
//! One worker per accepted connection; within a connection requests are
//! serviced strictly in arrival order (the worker does not read the next
//! request before the previous response is written). Worker failures end
//! only that connection; the accept loop keeps serving. There is no
//! admission limiting on concurrent connections.

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use super::HealthFlag;
use crate::agent::AgentClient;
use crate::error::Result;
use crate::protocol::read_request_frame;
use crate::transport::PipeListener;

/// Running pipe frontend.
///
/// Created by [`PipeFrontend::start`]; torn down by [`PipeFrontend::stop`],
/// which blocks until the accept loop has observed the stop signal and
/// released the listener and every worker.
pub struct PipeFrontend {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PipeFrontend {
    /// Bind the listener at `listen_path` and start the accept loop.
    ///
    /// A bind failure aborts only this frontend; the caller decides whether
    /// the rest of the process keeps running.
    pub async fn start(
        listen_path: &str,
        agent_endpoint: &str,
        health: HealthFlag,
    ) -> Result<Self> {
        info!(path = listen_path, "starting pipe frontend");
        let listener = PipeListener::bind(listen_path)?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            agent_endpoint.to_string(),
            health,
            cancel.clone(),
        ));

        Ok(Self { cancel, task })
    }

    /// Signal the accept loop to stop and wait for full quiescence.
    pub async fn stop(self) {
        info!("stopping pipe frontend");
        self.cancel.cancel();
        let _ = self.task.await;
        info!("pipe frontend stopped");
    }
}

async fn accept_loop(
    listener: PipeListener,
    agent_endpoint: String,
    health: HealthFlag,
    cancel: CancellationToken,
) {
    let agent = AgentClient::new();
    let workers = TaskTracker::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    debug!("accepted pipe connection");
                    workers.spawn(serve_connection(
                        stream,
                        agent.clone(),
                        agent_endpoint.clone(),
                        health.clone(),
                        cancel.clone(),
                    ));
                }
                Err(e) => {
                    health.set(false);
                    error!(error = %e, "pipe accept failed");
                }
            },
        }
    }

    // Release the endpoint before waiting out in-flight exchanges, so a
    // restart can rebind immediately.
    drop(listener);
    workers.close();
    workers.wait().await;
}

/// Serve one client connection until it closes, fails, or the frontend
/// stops. Cancellation is observed only at frame boundaries: an in-flight
/// relay always completes and its response is written back.
async fn serve_connection(
    stream: UnixStream,
    agent: AgentClient,
    agent_endpoint: String,
    health: HealthFlag,
    cancel: CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = read_request_frame(&mut reader) => match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("pipe connection closed by client");
                    return;
                }
                Err(e) => {
                    health.set(false);
                    error!(error = %e, "failed to read request frame from pipe");
                    return;
                }
            },
        };

        let reply = match agent.relay(&frame, &agent_endpoint).await {
            Ok(reply) => reply,
            Err(e) => {
                health.set(false);
                error!(error = %e, "failed to query upstream agent");
                return;
            }
        };

        if let Err(e) = write_half.write_all(&reply).await {
            health.set(false);
            error!(error = %e, "failed to write reply to pipe");
            return;
        }
        health.set(true);
        debug!(reply = reply.len(), "relayed one pipe exchange");
    }
}
