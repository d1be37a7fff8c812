//! Notification frontend: legacy shared-memory handoff.
//!
//! Registers the per-user notification endpoint and serves its three
//! notification kinds sequentially on one message loop. A data-copy
//! notification is handled entirely within one call: open the referenced
//! segment, validate its owner, map it, relay the embedded frame, and write
//! the reply back over the request starting at offset 0. The segment is
//! never partially overwritten before a successful relay, and the mapping
//! and handle are released on every exit path.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::HealthFlag;
use crate::agent::AgentClient;
use crate::error::{BridgeError, Result};
use crate::protocol::{AGENT_MAX_MESSAGE_LEN, LENGTH_PREFIX_LEN};
use crate::security::SegmentPolicy;
use crate::segment::Segment;
use crate::supervisor::RestartHandle;
use crate::transport::{notify, Notification, NotificationEndpoint};

/// Running notification frontend.
pub struct NotificationFrontend {
    path: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl NotificationFrontend {
    /// Register the notification endpoint and start the message loop.
    ///
    /// A registration failure aborts only this frontend.
    pub async fn start(
        notify_path: &str,
        agent_endpoint: &str,
        health: HealthFlag,
        policy: Arc<dyn SegmentPolicy>,
        restart: RestartHandle,
    ) -> Result<Self> {
        info!(path = notify_path, "starting notification frontend");
        let endpoint = NotificationEndpoint::bind(notify_path)?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(message_loop(
            endpoint,
            agent_endpoint.to_string(),
            health,
            policy,
            restart,
            cancel.clone(),
        ));

        Ok(Self {
            path: notify_path.to_string(),
            cancel,
            task,
        })
    }

    /// Send a terminate notification to the endpoint, then wait for the
    /// message loop to acknowledge by exiting.
    ///
    /// Safe to call even if the loop has already exited: the terminate send
    /// then fails and the cancellation token covers the teardown.
    pub async fn stop(self) {
        info!("stopping notification frontend");
        if let Err(e) = notify(&self.path, &Notification::Terminate).await {
            warn!(error = %e, "terminate notification not delivered, cancelling directly");
        }
        self.cancel.cancel();
        let _ = self.task.await;
        info!("notification frontend stopped");
    }
}

/// The message loop. Notifications are handled one at a time: the native
/// message pump this mirrors owns its endpoint from a single execution
/// context, and the one-shot segment handoff gives no benefit to
/// interleaving.
async fn message_loop(
    endpoint: NotificationEndpoint,
    agent_endpoint: String,
    health: HealthFlag,
    policy: Arc<dyn SegmentPolicy>,
    restart: RestartHandle,
    cancel: CancellationToken,
) {
    let agent = AgentClient::new();

    loop {
        let (notification, reply) = tokio::select! {
            _ = cancel.cancelled() => break,
            next = endpoint.next() => match next {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "dropping malformed or failed notification");
                    continue;
                }
            },
        };

        match notification {
            Notification::Terminate => {
                info!("received terminate notification, stopping message loop");
                reply.send(true).await;
                break;
            }
            Notification::RestartRequest => {
                info!("received restart-request notification");
                restart.request();
                reply.send(true).await;
            }
            Notification::DataCopy { segment } => {
                match handle_data_copy(&segment, &*policy, &agent, &agent_endpoint).await {
                    Ok(()) => {
                        health.set(true);
                        info!(segment = %segment, "relayed shared-memory exchange");
                        reply.send(true).await;
                    }
                    Err(e) => {
                        health.set(false);
                        error!(segment = %segment, error = %e, "shared-memory exchange failed");
                        reply.send(false).await;
                    }
                }
            }
        }
    }
}

/// Handle one data-copy notification.
///
/// The segment is exclusive to this call: the handle and mapping drop on
/// every return path. The reply overwrites the request in place only after
/// the relay succeeded.
async fn handle_data_copy(
    segment_name: &str,
    policy: &dyn SegmentPolicy,
    agent: &AgentClient,
    agent_endpoint: &str,
) -> Result<()> {
    let segment = Segment::open(segment_name)?;

    if !policy.validate(&segment) {
        return Err(BridgeError::Untrusted);
    }

    let mut view = segment.map()?;
    let total = view.payload_len()? as usize + LENGTH_PREFIX_LEN;
    if total > AGENT_MAX_MESSAGE_LEN {
        return Err(BridgeError::MessageTooLong(total));
    }

    let request = view.read(total)?;
    let reply = agent.relay(request, agent_endpoint).await?;

    view.write(&reply)
}
