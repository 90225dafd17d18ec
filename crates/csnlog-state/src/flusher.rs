//! Periodic saving of a persistent server state.

use crate::persistent::PersistentServerState;
use crate::store::StateStore;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Handle on a running flusher task.
pub struct FlusherHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl FlusherHandle {
    /// Stop the task after a final save and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!(error = %err, "server state flusher ended abnormally");
        }
    }

    /// Stop the task without waiting for it.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Spawn a task saving `state` every `save_interval` of its configuration.
///
/// The interval is non-zero: `PersistentServerState::with_config` rejects
/// a configuration without one.
///
/// Failed saves are logged and retried on the next tick; the in-memory
/// state stays authoritative meanwhile. Must be called from within a
/// tokio runtime.
pub fn spawn_state_flusher<S>(state: Arc<PersistentServerState<S>>) -> FlusherHandle
where
    S: StateStore + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let period = state.config().save_interval;

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => save_logged(&state),
                _ = &mut shutdown_rx => {
                    save_logged(&state);
                    debug!(domain = %state.domain(), "server state flusher stopped");
                    break;
                }
            }
        }
    });

    FlusherHandle {
        shutdown: Some(shutdown_tx),
        task,
    }
}

fn save_logged<S: StateStore>(state: &PersistentServerState<S>) {
    if let Err(err) = state.save() {
        warn!(
            domain = %state.domain(),
            replica_id = state.replica_id(),
            error = %err,
            "failed to save server state, will retry"
        );
    }
}
