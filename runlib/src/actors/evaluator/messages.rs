use crate::errors::StopError;
use std::time::Duration;
use tokio::sync::oneshot;

pub type TimerId = u32;

#[derive(Debug)]
pub enum EvalMessage {
    Stop {
        response: oneshot::Sender<Result<(), StopError>>,
    },
}

/// Sent by host functions while guest code runs.
#[derive(Debug)]
pub enum TimerCommand {
    Schedule {
        id: TimerId,
        callback: String,
        delay: Duration,
        repeat: bool,
    },
    Clear {
        id: TimerId,
    },
}

/// A timer elapsed and its callback should run.
#[derive(Debug)]
pub struct Fired {
    pub id: TimerId,
    pub callback: String,
    pub repeat: bool,
}
