mod actor;
mod messages;

use self::{
    actor::Supervisor,
    messages::SupervisorMessage::{self, Admit, GetStatus, Stop},
};
use crate::env::EnvView;
use crate::errors;
use crate::events::{Admission, SlotStatus, StopOutcome};
use crate::strategy::ExecutionStrategy;
use crate::types::Job;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A `Supervisor` which admits jobs into the single job slot and stops them.
///
/// This struct is actually an actor handle, the real work is done in the actor spawned by
/// `SupervisorHandle::spawn`. Every request goes through one inbox, so stopping the old
/// occupant and installing the new one happen as one step even when requests race.
/// The handle can be cloned freely across tasks.
#[derive(Clone)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorMessage>,
}

impl SupervisorHandle {
    /// Spawn a new supervisor.
    ///
    /// Specify the capacity for the supervisor's message queue. This limits the build-up of inbound messages.
    pub fn spawn(
        strategy: Arc<dyn ExecutionStrategy>,
        env: EnvView,
        message_capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(message_capacity);
        Supervisor::spawn(receiver, strategy, env);
        Self { sender }
    }

    /// Admit a job, preempting whatever currently occupies the slot.
    pub async fn admit(&self, job: Job) -> errors::Result<Admission> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Admit { job, response: tx })
            .await
            .expect("Supervisor exited");
        rx.await.expect("Supervisor exited")
    }

    /// Stop the active job, if any.
    pub async fn stop(&self) -> StopOutcome {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Stop { response: tx })
            .await
            .expect("Supervisor exited");
        rx.await.expect("Supervisor exited")
    }

    pub async fn status(&self) -> SlotStatus {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GetStatus { response: tx })
            .await
            .expect("Supervisor exited");
        rx.await.expect("Supervisor exited")
    }
}
