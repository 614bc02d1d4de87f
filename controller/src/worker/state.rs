use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use strum_macros::Display;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::types::jobs::Job;
use crate::utils::metrics::CONTROLLER_METRICS;
use crate::worker::transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ShutdownReason {
    /// Finish the in-flight job within the grace period, then stop.
    Graceful,
    /// The machine is about to be taken away: requeue the in-flight job right now.
    SpotReclaim,
}

/// State shared by the controller loop and the signal path of one controller instance.
#[derive(Debug)]
pub struct ControllerState {
    local_id: String,
    grace_period: Duration,
    active_job: Mutex<Option<Job>>,
    shutdown: Mutex<Option<ShutdownReason>>,
    /// Cancelled when no new job may be picked.
    scheduling: CancellationToken,
    /// Cancelled when the in-flight worker command must be killed.
    job_kill: CancellationToken,
    /// Child of `job_kill` for the running job only, cancelled on a peer abort.
    current_job: Mutex<Option<CancellationToken>>,
    peer_abort: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ControllerState {
    pub fn new(local_id: impl Into<String>, grace_period: Duration) -> Self {
        Self {
            local_id: local_id.into(),
            grace_period,
            active_job: Mutex::new(None),
            shutdown: Mutex::new(None),
            scheduling: CancellationToken::new(),
            job_kill: CancellationToken::new(),
            current_job: Mutex::new(None),
            peer_abort: AtomicBool::new(false),
        }
    }

    pub fn set_active(&self, job: Job) {
        *lock(&self.active_job) = Some(job);
    }

    /// Whoever takes the active job owns its terminal transition.
    pub fn take_active(&self) -> Option<Job> {
        lock(&self.active_job).take()
    }

    pub fn has_active(&self) -> bool {
        lock(&self.active_job).is_some()
    }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        *lock(&self.shutdown)
    }

    pub fn scheduling_token(&self) -> &CancellationToken {
        &self.scheduling
    }

    pub fn job_token(&self) -> &CancellationToken {
        &self.job_kill
    }

    /// Token of the job about to run. An abort requested before this call does not carry over.
    pub fn begin_job(&self) -> CancellationToken {
        self.peer_abort.store(false, Ordering::SeqCst);
        let token = self.job_kill.child_token();
        *lock(&self.current_job) = Some(token.clone());
        token
    }

    /// Kills the running job because a peer failed its conflation. The controller keeps scheduling.
    pub fn abort_current_job(&self) -> bool {
        let current = lock(&self.current_job);
        let Some(token) = current.as_ref() else {
            info!("Peer abort received with no job running, ignoring");
            return false;
        };
        warn!("Peer abort received, killing the running job only");
        self.peer_abort.store(true, Ordering::SeqCst);
        token.cancel();
        true
    }

    /// Ends the running job. Returns whether it was killed by a peer abort rather than a shutdown.
    pub fn finish_job(&self) -> bool {
        lock(&self.current_job).take();
        self.peer_abort.swap(false, Ordering::SeqCst) && !self.job_kill.is_cancelled()
    }

    /// Starts the shutdown sequence. Only the first request has an effect.
    pub fn request_shutdown(self: &Arc<Self>, reason: ShutdownReason) {
        {
            let mut shutdown = lock(&self.shutdown);
            if let Some(current) = *shutdown {
                warn!(current = %current, requested = %reason, "Shutdown already in progress, ignoring request");
                return;
            }
            *shutdown = Some(reason);
        }
        self.scheduling.cancel();

        match reason {
            ShutdownReason::Graceful => {
                info!(grace_period = ?self.grace_period, "Graceful shutdown requested, draining in-flight job");
                self.arm_grace_timer();
            }
            ShutdownReason::SpotReclaim => {
                CONTROLLER_METRICS.spot_reclaims.add(1, &[]);
                warn!("Spot reclaim notice received, requeueing in-flight job");
                self.job_kill.cancel();
                if let Some(job) = self.take_active() {
                    if let Err(e) = transition::requeue(&job, &self.local_id) {
                        error!(file = %job.display_name(), error = %e, "Failed to requeue job on spot reclaim");
                    }
                }
            }
        }
    }

    fn arm_grace_timer(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to time the grace period, killing in-flight job now");
            self.job_kill.cancel();
            return;
        };
        let state = Arc::clone(self);
        runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(state.grace_period) => {
                    if state.has_active() {
                        warn!("Grace period elapsed, killing in-flight job");
                    }
                    state.job_kill.cancel();
                }
                _ = state.job_kill.cancelled() => {}
            }
        });
    }
}

/// Cloneable handle used by signal listeners (and tests) to stop a controller or its running job.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<ControllerState>);

impl ShutdownHandle {
    pub fn new(state: Arc<ControllerState>) -> Self {
        Self(state)
    }

    pub fn request(&self, reason: ShutdownReason) {
        self.0.request_shutdown(reason);
    }

    pub fn abort_job(&self) -> bool {
        self.0.abort_current_job()
    }
}
