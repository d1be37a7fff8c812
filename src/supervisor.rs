//! Supervisor owning both frontends as a coherent unit.
//!
//! The supervisor starts and stops the pipe and notification frontends,
//! coalesces concurrent restart requests down to a single stop/start cycle,
//! and exposes aggregate health to whatever sits above it. It is an explicit
//! context object: every collaborator is injected, nothing is process-wide.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::frontend::{HealthFlag, NotificationFrontend, PipeFrontend};
use crate::security::SegmentPolicy;
use crate::transport::{
    agent_pipe_path, current_username, notify_socket_path, obfuscated_tag, PROTOCOL_CLASS_NAME,
};

/// Resolved endpoints the supervisor wires the frontends to.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Upstream agent endpoint both frontends relay to.
    pub agent_endpoint: String,
    /// Client-facing pipe endpoint.
    pub pipe_path: String,
    /// Notification endpoint.
    pub notify_path: String,
}

impl SupervisorConfig {
    /// Derive the per-user endpoint paths for the current user.
    pub fn for_current_user(agent_endpoint: String) -> Self {
        let username = current_username();
        let tag = obfuscated_tag(PROTOCOL_CLASS_NAME);
        Self {
            agent_endpoint,
            pipe_path: agent_pipe_path(&username, &tag),
            notify_path: notify_socket_path(&username),
        }
    }
}

/// Coarse lifecycle state, readable without locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Neither frontend is running.
    Stopped,
    /// Frontends are running (possibly degraded, see health).
    Running,
    /// A restart cycle is in flight; further requests are dropped.
    RestartInFlight,
}

/// Cloneable handle for requesting a supervisor restart.
///
/// Requests arriving while a restart is already in flight are dropped
/// silently; at most one cycle runs at a time.
#[derive(Clone)]
pub struct RestartHandle {
    tx: mpsc::Sender<()>,
    in_flight: Arc<AtomicBool>,
}

impl RestartHandle {
    /// Request a restart; a no-op if one is already in flight.
    pub fn request(&self) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("restart already in flight, dropping request");
            return;
        }
        if self.tx.try_send(()).is_err() {
            self.in_flight.store(false, Ordering::SeqCst);
            warn!("restart watcher unavailable, dropping request");
        }
    }
}

struct Frontends {
    pipe: Option<PipeFrontend>,
    notify: Option<NotificationFrontend>,
}

/// Owner of both frontends' lifecycles.
pub struct Supervisor {
    weak: Weak<Supervisor>,
    config: SupervisorConfig,
    policy: Arc<dyn SegmentPolicy>,
    pipe_health: HealthFlag,
    notify_health: HealthFlag,
    frontends: Mutex<Frontends>,
    active: AtomicBool,
    restart_in_flight: Arc<AtomicBool>,
    restart_tx: mpsc::Sender<()>,
    restart_rx: Mutex<Option<mpsc::Receiver<()>>>,
    restart_cycles: AtomicUsize,
}

impl Supervisor {
    /// Create a supervisor; call [`Supervisor::start`] to launch the
    /// frontends.
    pub fn new(config: SupervisorConfig, policy: Arc<dyn SegmentPolicy>) -> Arc<Self> {
        let (restart_tx, restart_rx) = mpsc::channel(1);
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            config,
            policy,
            pipe_health: HealthFlag::new(),
            notify_health: HealthFlag::new(),
            frontends: Mutex::new(Frontends {
                pipe: None,
                notify: None,
            }),
            active: AtomicBool::new(false),
            restart_in_flight: Arc::new(AtomicBool::new(false)),
            restart_tx,
            restart_rx: Mutex::new(Some(restart_rx)),
            restart_cycles: AtomicUsize::new(0),
        })
    }

    /// Handle the notification frontend uses to request restarts.
    pub fn restart_handle(&self) -> RestartHandle {
        RestartHandle {
            tx: self.restart_tx.clone(),
            in_flight: Arc::clone(&self.restart_in_flight),
        }
    }

    /// Launch both frontends and, on first call, the restart watcher task.
    ///
    /// A frontend that fails to initialize aborts only itself: the failure
    /// is logged, its health flag drops, and the other frontend keeps
    /// running.
    pub async fn start(&self) {
        let mut frontends = self.frontends.lock().await;
        if self.active.load(Ordering::SeqCst) {
            warn!("supervisor already running, ignoring start");
            return;
        }

        match PipeFrontend::start(
            &self.config.pipe_path,
            &self.config.agent_endpoint,
            self.pipe_health.clone(),
        )
        .await
        {
            Ok(frontend) => frontends.pipe = Some(frontend),
            Err(e) => {
                self.pipe_health.set(false);
                error!(error = %e, "pipe frontend failed to start");
            }
        }

        match NotificationFrontend::start(
            &self.config.notify_path,
            &self.config.agent_endpoint,
            self.notify_health.clone(),
            Arc::clone(&self.policy),
            self.restart_handle(),
        )
        .await
        {
            Ok(frontend) => frontends.notify = Some(frontend),
            Err(e) => {
                self.notify_health.set(false);
                error!(error = %e, "notification frontend failed to start");
            }
        }

        self.active.store(true, Ordering::SeqCst);
        info!("pipe and notification frontends started");

        if let Some(mut rx) = self.restart_rx.lock().await.take() {
            let weak = self.weak.clone();
            tokio::spawn(async move {
                while rx.recv().await.is_some() {
                    let Some(supervisor) = weak.upgrade() else {
                        break;
                    };
                    info!("received restart request, restarting frontends");
                    // Route the restart through a type-erased `dyn Future`
                    // helper: a spawned task that calls the recursive
                    // `async fn start` directly defeats `Send` auto-trait
                    // inference. The boxed helper is an opaque `Send` future,
                    // so the compiler can prove this task is `Send`.
                    supervisor.restart_once().await;
                }
            });
        }
    }

    /// Run a single stop/start restart cycle and clear the in-flight flag.
    ///
    /// Returns a boxed `Send` future so the restart-watcher task, which calls
    /// back into the recursive [`Supervisor::start`], can be proven `Send`.
    fn restart_once(self: Arc<Self>) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            self.stop().await;
            self.start().await;
            self.restart_cycles.fetch_add(1, Ordering::SeqCst);
            self.restart_in_flight.store(false, Ordering::SeqCst);
        })
    }

    /// Request a restart of both frontends.
    ///
    /// Dropped silently if a restart is already in flight.
    pub fn request_restart(&self) {
        self.restart_handle().request();
    }

    /// Signal both frontends to stop and wait until both have acknowledged.
    ///
    /// Cooperative and unbounded: a frontend that never acknowledges makes
    /// this call hang.
    pub async fn stop(&self) {
        let mut frontends = self.frontends.lock().await;

        if let Some(pipe) = frontends.pipe.take() {
            pipe.stop().await;
        }
        if let Some(notify) = frontends.notify.take() {
            notify.stop().await;
        }

        self.active.store(false, Ordering::SeqCst);
        info!("all frontends stopped");
    }

    /// Aggregate health: the AND of both frontends' last-observed flags.
    ///
    /// Purely reflective; performs no probing.
    pub fn health(&self) -> bool {
        self.pipe_health.get() && self.notify_health.get()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        if self.restart_in_flight.load(Ordering::SeqCst) {
            SupervisorState::RestartInFlight
        } else if self.active.load(Ordering::SeqCst) {
            SupervisorState::Running
        } else {
            SupervisorState::Stopped
        }
    }

    /// Number of completed restart cycles.
    pub fn restart_cycles(&self) -> usize {
        self.restart_cycles.load(Ordering::SeqCst)
    }
}
