use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use fleetlearn_config::OnLearningError;

use crate::error::LearningError;
use crate::handle::LearnerHandle;
use crate::shared::{RunningGuard, Shared};
use crate::Learner;

/// The learning loop running in the background.
pub struct LearningTask {
    handle: LearnerHandle,
    shared: Arc<Shared>,
    join: JoinHandle<Result<(), LearningError>>,
}

impl LearningTask {
    pub fn handle(&self) -> &LearnerHandle {
        &self.handle
    }

    /// Ask the loop to stop once the current round, if any, is over.
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Stop the loop right away, possibly in the middle of a round.
    pub fn abort(&self) {
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to end. Fails with the fault it aborted on.
    pub async fn join(self) -> Result<(), LearningError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(LearningError::Panicked(panic_message(&*e.into_panic()))),
            Err(_) => Ok(()),
        }
    }
}

impl Learner {
    /// Move the learner into a background task on the current runtime.
    ///
    /// Unless `start_now` is set, the first round only happens after one
    /// interval, or when learning is requested through a handle.
    pub fn spawn(self, start_now: bool) -> LearningTask {
        let handle = self.handle();
        let shared = Arc::clone(&self.shared);
        let join = tokio::spawn(self.run(start_now));

        LearningTask {
            handle,
            shared,
            join,
        }
    }

    /// Seed, then learn until stopped, on the current task.
    pub async fn run(mut self, start_now: bool) -> Result<(), LearningError> {
        let shared = Arc::clone(&self.shared);
        let _running = RunningGuard::new(&shared);

        info!(
            seeds = self.config.seed_nodes.len(),
            relay = self.role.is_relay(),
            "Starting learning loop"
        );

        if !self.seeds.is_done() {
            let seeded = AssertUnwindSafe(self.load_seed_nodes())
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(LearningError::Panicked(panic_message(&*panic))));

            if let Err(e) = seeded {
                self.handle_learning_error(e)?;
            }
        }

        if !start_now {
            pause(&shared, self.schedule.interval()).await;
        }

        loop {
            if shared.is_stopping() {
                info!(round = shared.round(), "Learning loop stopped");
                return Ok(());
            }

            let eagerness = self.config.eagerness;
            let result = AssertUnwindSafe(self.learn_from_teacher_node(eagerness))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(LearningError::Panicked(panic_message(&*panic))));

            match result {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    debug!(error = %e, "Learning round ended early");
                }
                Err(e) if e.is_protocol_fault() => {
                    error!(error = %e, "Learning round aborted");
                }
                Err(e) => self.handle_learning_error(e)?,
            }

            pause(&shared, self.schedule.interval()).await;
        }
    }

    /// Apply the configured policy to a fatal fault.
    fn handle_learning_error(&mut self, error: LearningError) -> Result<(), LearningError> {
        match self.config.on_error {
            OnLearningError::Abort => {
                error!(%error, "Unhandled error during node learning, aborting");

                if let Some(teardown) = self.teardown.take() {
                    teardown(&error);
                }

                self.shared.record_crash(error.clone());
                Err(error)
            }
            OnLearningError::Resume => {
                warn!(%error, "Unhandled error during node learning, resuming");
                Ok(())
            }
        }
    }
}

/// Wait for the next round: one interval, or less if woken up.
async fn pause(shared: &Shared, interval: Duration) {
    tokio::select! {
        _ = sleep(interval) => {}
        _ = shared.learn_now.notified() => debug!("Learning about nodes now"),
        _ = shared.stop.notified() => {}
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
