use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{ControllerError, ControllerResult};
use crate::worker::{ShutdownHandle, ShutdownReason};

/// What a received signal asks of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Shutdown(ShutdownReason),
    /// A peer failed the conflation of the running job.
    AbortJob,
}

/// Translates OS signals into controller requests.
///
/// - SIGTERM, SIGINT: graceful drain of the in-flight job
/// - SIGUSR1: spot instance reclaim notice
/// - SIGUSR2: peer abort, kills the running job and keeps the controller up
pub struct SignalHandler {
    sigterm: Signal,
    sigint: Signal,
    sigusr1: Signal,
    sigusr2: Signal,
}

fn listen(kind: SignalKind, name: &str) -> ControllerResult<Signal> {
    signal(kind).map_err(|e| ControllerError::SignalError(format!("Failed to create {name} handler: {e}")))
}

impl SignalHandler {
    /// Installs the listeners. Must be called from within a tokio runtime.
    pub fn new() -> ControllerResult<Self> {
        Ok(Self {
            sigterm: listen(SignalKind::terminate(), "SIGTERM")?,
            sigint: listen(SignalKind::interrupt(), "SIGINT")?,
            sigusr1: listen(SignalKind::user_defined1(), "SIGUSR1")?,
            sigusr2: listen(SignalKind::user_defined2(), "SIGUSR2")?,
        })
    }

    /// Waits for the next signal of interest. `None` once the listeners are closed.
    pub async fn next(&mut self) -> Option<SignalAction> {
        tokio::select! {
            received = self.sigterm.recv() => received.map(|_| {
                info!("Graceful shutdown initiated (SIGTERM)");
                SignalAction::Shutdown(ShutdownReason::Graceful)
            }),
            received = self.sigint.recv() => received.map(|_| {
                info!("Interactive shutdown initiated (SIGINT/Ctrl+C)");
                SignalAction::Shutdown(ShutdownReason::Graceful)
            }),
            received = self.sigusr1.recv() => received.map(|_| {
                warn!("Spot instance reclaim notice received (SIGUSR1)");
                SignalAction::Shutdown(ShutdownReason::SpotReclaim)
            }),
            received = self.sigusr2.recv() => received.map(|_| {
                warn!("Abort by peer received (SIGUSR2)");
                SignalAction::AbortJob
            }),
        }
    }

    /// Forwards every signal to `handle` until the listeners close.
    pub fn spawn(mut self, handle: ShutdownHandle) -> JoinHandle<()> {
        info!("Signal handler initialized, listening for SIGTERM, SIGINT, SIGUSR1 and SIGUSR2");
        tokio::spawn(async move {
            while let Some(action) = self.next().await {
                match action {
                    SignalAction::Shutdown(reason) => handle.request(reason),
                    SignalAction::AbortJob => {
                        handle.abort_job();
                    }
                }
            }
        })
    }
}
