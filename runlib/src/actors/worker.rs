mod actor;
mod messages;

use crate::errors::StopError;
use crate::events::JobStatus;
use actor::Actor;
use messages::WorkerMessage;
use std::time::Duration;
use tokio::{
    process::Child,
    sync::{mpsc, oneshot},
};

/// Supervises one child process: forwards its output to the log stream,
/// records how it exited and terminates it on request.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
    /// Take ownership of a spawned child. `grace` bounds how long a stop
    /// waits after SIGTERM before escalating to SIGKILL.
    pub fn spawn(child: Child, grace: Duration) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        Actor::spawn(inbox, child, grace);
        Self { sender }
    }

    pub async fn status(&self) -> Option<JobStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerMessage::GetStatus { response: tx })
            .ok()?;
        rx.await.ok()
    }

    /// Terminate the process. A process that already exited is not an error.
    pub async fn stop(&self) -> Result<(), StopError> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(WorkerMessage::Stop { response: tx })
            .is_err()
        {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }
}
