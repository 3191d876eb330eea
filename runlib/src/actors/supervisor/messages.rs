use crate::errors;
use crate::events::{Admission, SlotStatus, StopOutcome};
use crate::types::Job;
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum SupervisorMessage {
    Admit {
        job: Job,
        response: oneshot::Sender<errors::Result<Admission>>,
    },
    Stop {
        response: oneshot::Sender<StopOutcome>,
    },
    GetStatus {
        response: oneshot::Sender<SlotStatus>,
    },
}
