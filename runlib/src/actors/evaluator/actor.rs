use super::messages::{EvalMessage, Fired, TimerCommand, TimerId};
use crate::errors::StopError;
use crate::strategy::embedded::{
    failure,
    host::{HostState, Interrupt},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{
    select,
    sync::mpsc,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};
use wasmtime::{Instance, Store};

const FIRED_CAPACITY: usize = 16;

type SharedStore = Arc<Mutex<Store<HostState>>>;

pub struct Actor {
    inbox: mpsc::UnboundedReceiver<EvalMessage>,
    timer_rx: mpsc::UnboundedReceiver<TimerCommand>,
    fired_tx: mpsc::Sender<Fired>,
    fired_rx: mpsc::Receiver<Fired>,
    store: SharedStore,
    instance: Instance,
    timers: HashMap<TimerId, JoinHandle<()>>,
    interrupt: Arc<Interrupt>,
    ticker: JoinHandle<()>,
    budget: Duration,
}

impl Actor {
    pub fn spawn(
        inbox: mpsc::UnboundedReceiver<EvalMessage>,
        timer_rx: mpsc::UnboundedReceiver<TimerCommand>,
        store: Store<HostState>,
        instance: Instance,
        interrupt: Arc<Interrupt>,
        ticker: JoinHandle<()>,
        budget: Duration,
    ) {
        let (fired_tx, fired_rx) = mpsc::channel(FIRED_CAPACITY);
        let actor = Actor {
            inbox,
            timer_rx,
            fired_tx,
            fired_rx,
            store: Arc::new(Mutex::new(store)),
            instance,
            timers: HashMap::new(),
            interrupt,
            ticker,
            budget,
        };
        tokio::spawn(async move { actor.run().await });
    }

    async fn run(mut self) {
        loop {
            select! {
                maybe_msg = self.inbox.recv() => {
                    match maybe_msg {
                        Some(EvalMessage::Stop { response }) => {
                            let result = self.shutdown().await;
                            let _ = response.send(result);
                        }
                        None => {
                            // every handle dropped, nobody can stop us later
                            if let Err(err) = self.shutdown().await {
                                warn!(error = %err, "embedded job teardown failed");
                            }
                        }
                    }
                    return;
                }
                Some(command) = self.timer_rx.recv() => self.schedule(command),
                Some(fired) = self.fired_rx.recv() => self.fire(fired).await,
            }
        }
    }

    fn schedule(&mut self, command: TimerCommand) {
        match command {
            TimerCommand::Schedule {
                id,
                callback,
                delay,
                repeat,
            } => {
                debug!(id, %callback, ?delay, repeat, "timer scheduled");
                let fired_tx = self.fired_tx.clone();
                let task = tokio::spawn(async move {
                    if repeat {
                        let mut interval = time::interval_at(time::Instant::now() + delay, delay);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        loop {
                            interval.tick().await;
                            let fired = Fired {
                                id,
                                callback: callback.clone(),
                                repeat,
                            };
                            if fired_tx.send(fired).await.is_err() {
                                break;
                            }
                        }
                    } else {
                        time::sleep(delay).await;
                        let _ = fired_tx
                            .send(Fired {
                                id,
                                callback,
                                repeat,
                            })
                            .await;
                    }
                });
                self.timers.insert(id, task);
            }
            TimerCommand::Clear { id } => {
                if let Some(task) = self.timers.remove(&id) {
                    debug!(id, "timer cleared");
                    task.abort();
                }
            }
        }
    }

    async fn fire(&mut self, fired: Fired) {
        let live = if fired.repeat {
            self.timers.contains_key(&fired.id)
        } else {
            self.timers.remove(&fired.id).is_some()
        };
        if !live || self.interrupt.is_cancelled() {
            return;
        }

        let store = self.store.clone();
        let instance = self.instance;
        let callback = fired.callback.clone();
        let result =
            tokio::task::spawn_blocking(move || call_export(&mut lock(&store), &instance, &callback))
                .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(timer = fired.id, callback = %fired.callback, error = %err, "timer callback failed")
            }
            Err(err) => warn!(timer = fired.id, error = %err, "timer callback panicked"),
        }
    }

    async fn shutdown(&mut self) -> Result<(), StopError> {
        self.interrupt.cancel();
        for (_, task) in self.timers.drain() {
            task.abort();
        }

        let store = self.store.clone();
        let instance = self.instance;
        let budget = self.budget;
        let result = tokio::task::spawn_blocking(move || {
            let mut store = lock(&store);
            let interrupt = store.data().interrupt.clone();
            interrupt.reset();
            let Some(name) = store.data().stop_export.clone() else {
                debug!("no stop procedure registered");
                interrupt.cancel();
                return Ok(());
            };

            info!(procedure = %name, "running job stop procedure");
            store.set_epoch_deadline(1);
            interrupt.arm(budget);
            let called = call_export(&mut store, &instance, &name);
            interrupt.disarm();
            interrupt.cancel();
            called
        })
        .await;

        self.ticker.abort();
        match result {
            Ok(called) => called,
            Err(err) => Err(StopError::Procedure(err.to_string())),
        }
    }
}

fn call_export(
    store: &mut Store<HostState>,
    instance: &Instance,
    name: &str,
) -> Result<(), StopError> {
    instance
        .get_typed_func::<(), ()>(&mut *store, name)
        .and_then(|func| func.call(&mut *store, ()))
        .map_err(|err| StopError::Procedure(failure(err).to_string()))
}

fn lock(store: &SharedStore) -> MutexGuard<'_, Store<HostState>> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
