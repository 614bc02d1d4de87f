use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::types::jobs::status::PEER_ABORT_CODE;
use crate::types::jobs::{Job, JobName, Status, StatusClass};
use crate::utils::metrics::CONTROLLER_METRICS;
use crate::worker::conflation::{Admission, ConflationBookkeeping};
use crate::worker::executor::Executor;
use crate::worker::fs_watcher::FsWatcher;
use crate::worker::state::{ControllerState, ShutdownHandle, ShutdownReason};
use crate::worker::transition::{self, Transition};

/// Polls the request directories and runs one job at a time until a shutdown is requested.
pub struct Controller {
    watcher: Arc<FsWatcher>,
    executor: Executor,
    retry_delays: Vec<Duration>,
    spot_instance_reclaim_time: Duration,
    state: Arc<ControllerState>,
    conflations: Option<Arc<ConflationBookkeeping>>,
}

impl Controller {
    pub fn new(
        watcher: FsWatcher,
        executor: Executor,
        retry_delays: Vec<Duration>,
        termination_grace_period: Duration,
        spot_instance_reclaim_time: Duration,
    ) -> Self {
        let state = Arc::new(ControllerState::new(watcher.local_id(), termination_grace_period));
        Self {
            watcher: Arc::new(watcher),
            executor,
            retry_delays,
            spot_instance_reclaim_time,
            state,
            conflations: None,
        }
    }

    /// Enables the shared failure markers and the bootstrap bookkeeping of pipeline jobs.
    pub fn with_conflations(mut self, conflations: ConflationBookkeeping) -> Self {
        self.conflations = Some(Arc::new(conflations));
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let watcher = FsWatcher::new(config.local_id.clone(), config.scheduled.clone());
        let executor = Executor::new(config.local_id.clone(), config.commands.clone(), config.rules.clone());
        let controller = Self::new(
            watcher,
            executor,
            config.retry_delays.clone(),
            config.termination_grace_period,
            config.spot_instance_reclaim_time,
        );
        match config.limitless.shared_failures() {
            Some(failures) => controller.with_conflations(ConflationBookkeeping::from_catalog(failures, &config.catalog)),
            None => controller,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.state.clone())
    }

    pub fn state(&self) -> &Arc<ControllerState> {
        &self.state
    }

    /// Runs until a shutdown request and returns its reason.
    pub async fn run(self) -> Option<ShutdownReason> {
        let span = info_span!("controller", local_id = %self.watcher.local_id());
        async move {
            let recovered = self
                .scan(|watcher| {
                    watcher.prepare_dirs();
                    watcher.recover_dangling()
                })
                .await
                .unwrap_or_default();
            if recovered > 0 {
                info!(recovered, "Requeued files left in progress by a previous run");
            }
            info!(jobs = ?self.watcher.definitions().iter().map(|d| d.name).collect::<Vec<_>>(), "Controller started");

            let scheduling = self.state.scheduling_token().clone();
            let mut idle_polls = 0usize;
            while !scheduling.is_cancelled() {
                if self.process_next().await.is_some() {
                    idle_polls = 0;
                    continue;
                }
                let delay = retry_delay(&self.retry_delays, idle_polls);
                idle_polls = idle_polls.saturating_add(1);
                debug!(delay = ?delay, idle_polls, "No job available, backing off");
                tokio::select! {
                    biased;
                    _ = scheduling.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            // Nothing is in flight anymore, disarm the grace timer
            self.state.job_token().cancel();
            let reason = self.state.shutdown_reason();
            if reason == Some(ShutdownReason::SpotReclaim) {
                info!(wait = ?self.spot_instance_reclaim_time, "Waiting for the instance to be reclaimed");
                tokio::time::sleep(self.spot_instance_reclaim_time).await;
            }
            info!(reason = ?reason, "Controller stopped");
            reason
        }
        .instrument(span)
        .await
    }

    /// Locks, runs and finalizes the best available job. Returns `None` when nothing was locked or
    /// the locked job was handed back untouched.
    pub async fn process_next(&self) -> Option<Transition> {
        let job = self.scan(FsWatcher::get_best).await.flatten()?;
        let local_id = self.watcher.local_id();
        let rules = self.executor.rules();
        let span = info_span!("job", job = %job.name(), range = %format!("{}-{}", job.start(), job.end()));

        async move {
            info!(file = %job.display_name(), large = job.is_large(), "Processing job");
            match self.admit(&job).await {
                Admission::Run => {}
                Admission::Skip { markers } => {
                    warn!(markers = ?markers, "Conflation already failed on a peer, skipping job");
                    let status = Status::new(PEER_ABORT_CODE);
                    let transition = transition::apply(&job, Transition::Failure, status, local_id);
                    self.record(&job, transition, status).await;
                    return Some(transition);
                }
                Admission::Requeue => {
                    if let Err(e) = transition::requeue(&job, local_id) {
                        error!(file = %job.display_name(), error = %e, "Failed to hand the job back");
                    }
                    return None;
                }
            }

            let started = Instant::now();
            self.state.set_active(job.clone());

            let kill = self.state.begin_job();
            let mut status = if kill.is_cancelled() {
                Status::new(rules.killed_by_scheduler_code)
            } else {
                self.executor.run(&job, &kill).await
            };
            if self.state.finish_job() && status.classify(rules) == StatusClass::KilledByScheduler {
                warn!("Job killed after a peer failed the conflation");
                status = Status::new(PEER_ABORT_CODE);
            }
            CONTROLLER_METRICS.record_outcome(job.name(), status.classify(rules), started.elapsed().as_secs_f64());

            let transition = match self.state.take_active() {
                Some(active) => {
                    let transition = match Transition::for_status(&active, status, rules) {
                        Transition::Success if self.keeps_bootstrap_request(&active) => Transition::PartialSuccess,
                        other => other,
                    };
                    transition::apply(&active, transition, status, local_id)
                }
                None => {
                    // Requeued by the spot reclaim path while the command was being killed
                    transition::discard_outputs(&job, local_id);
                    Transition::Requeue
                }
            };
            self.record(&job, transition, status).await;
            info!(exit_code = status.exit_code, transition = ?transition, elapsed = ?started.elapsed(), "Job done");
            Some(transition)
        }
        .instrument(span)
        .await
    }

    fn keeps_bootstrap_request(&self, job: &Job) -> bool {
        self.conflations.is_some() && job.name() == JobName::Bootstrap
    }

    async fn admit(&self, job: &Job) -> Admission {
        let Some(conflations) = &self.conflations else { return Admission::Run };
        let job = job.clone();
        off_runtime(conflations, move |conflations| conflations.admit(&job)).await.unwrap_or(Admission::Requeue)
    }

    async fn record(&self, job: &Job, transition: Transition, status: Status) {
        let Some(conflations) = &self.conflations else { return };
        let job = job.clone();
        off_runtime(conflations, move |conflations| conflations.record(&job, transition, status)).await;
    }

    /// Runs blocking directory work of the watcher off the async workers.
    async fn scan<T, F>(&self, work: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&FsWatcher) -> T + Send + 'static,
    {
        off_runtime(&self.watcher, work).await
    }
}

/// Runs `work` on the blocking pool. `None` when the task panicked.
async fn off_runtime<S, T, F>(subject: &Arc<S>, work: F) -> Option<T>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> T + Send + 'static,
{
    let subject = Arc::clone(subject);
    match tokio::task::spawn_blocking(move || work(&subject)).await {
        Ok(result) => Some(result),
        Err(e) => {
            error!(error = %e, "Blocking directory task failed");
            None
        }
    }
}

/// Backoff before the next poll after `idle_polls` empty polls in a row, clamped to the last delay.
pub fn retry_delay(delays: &[Duration], idle_polls: usize) -> Duration {
    delays.get(idle_polls).or(delays.last()).copied().unwrap_or_default()
}
