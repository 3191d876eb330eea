use crate::errors::StopError;
use crate::events::JobStatus;
use tokio::sync::oneshot;

pub enum WorkerMessage {
    GetStatus {
        response: oneshot::Sender<JobStatus>,
    },
    Stop {
        response: oneshot::Sender<Result<(), StopError>>,
    },
}
