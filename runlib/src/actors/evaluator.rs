mod actor;
mod messages;

use crate::errors::StopError;
use crate::strategy::embedded::host::{HostState, Interrupt};
use actor::Actor;
use messages::EvalMessage;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use wasmtime::{Instance, Store};

pub(crate) use messages::{TimerCommand, TimerId};

/// Owns a running embedded job: its store, its timers and its epoch ticker.
///
/// This struct is an actor handle. Dropping every handle tears the job down
/// the same way `stop` does.
#[derive(Clone)]
pub struct EvaluatorHandle {
    sender: mpsc::UnboundedSender<EvalMessage>,
    interrupt: Arc<Interrupt>,
}

impl EvaluatorHandle {
    pub fn spawn(
        store: Store<HostState>,
        instance: Instance,
        timer_rx: mpsc::UnboundedReceiver<TimerCommand>,
        interrupt: Arc<Interrupt>,
        ticker: JoinHandle<()>,
        budget: Duration,
    ) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        Actor::spawn(
            inbox,
            timer_rx,
            store,
            instance,
            interrupt.clone(),
            ticker,
            budget,
        );
        Self { sender, interrupt }
    }

    /// Interrupt guest code, cancel timers and run the job's stop procedure.
    pub async fn stop(&self) -> Result<(), StopError> {
        // trap whatever callback is running so the actor can pick up the message
        self.interrupt.cancel();
        let (tx, rx) = oneshot::channel();
        if self.sender.send(EvalMessage::Stop { response: tx }).is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }
}
