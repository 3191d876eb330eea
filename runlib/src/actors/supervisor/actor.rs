use super::messages::SupervisorMessage;
use crate::env::EnvView;
use crate::errors::{self, AdmissionError, CODE_REQUIRED};
use crate::events::{Admission, Occupant, SlotStatus, StopOutcome};
use crate::logs::LogBuffer;
use crate::stop::StopHandle;
use crate::strategy::ExecutionStrategy;
use crate::types::{Job, JobId};
use std::{collections::VecDeque, sync::Arc, time::SystemTime};
use tokio::{
    select,
    sync::{mpsc, oneshot},
};
use tracing::{error, info, warn};

/// The job slot and its single writer.
pub struct Supervisor {
    inbox: mpsc::Receiver<SupervisorMessage>,
    /// Admissions that arrived while another job was launching.
    deferred: VecDeque<SupervisorMessage>,
    strategy: Arc<dyn ExecutionStrategy>,
    env: EnvView,
    slot: Option<Installed>,
}

struct Installed {
    job_id: JobId,
    started_at: SystemTime,
    handle: StopHandle,
}

impl Supervisor {
    pub fn spawn(
        inbox: mpsc::Receiver<SupervisorMessage>,
        strategy: Arc<dyn ExecutionStrategy>,
        env: EnvView,
    ) {
        let actor = Self {
            inbox,
            deferred: VecDeque::new(),
            strategy,
            env,
            slot: None,
        };
        tokio::spawn(async move { actor.run().await });
    }

    async fn run(mut self) {
        use self::SupervisorMessage::*;
        while let Some(msg) = self.next_message().await {
            match msg {
                Admit { job, response } => {
                    let _ = response.send(self.admit(job).await);
                }
                Stop { response } => {
                    let _ = response.send(self.stop_occupant("stop requested").await);
                }
                GetStatus { response } => {
                    let _ = response.send(self.status());
                }
            }
        }
        // every handle is gone; don't leave the job running unsupervised
        self.stop_occupant("supervisor shutting down").await;
    }

    async fn next_message(&mut self) -> Option<SupervisorMessage> {
        match self.deferred.pop_front() {
            Some(msg) => Some(msg),
            None => self.inbox.recv().await,
        }
    }

    async fn admit(&mut self, job: Job) -> errors::Result<Admission> {
        if job.source.trim().is_empty() {
            return Err(AdmissionError::InvalidInput(CODE_REQUIRED.into()));
        }
        self.env.merge(&job.environment);

        let strategy = self.strategy.name();
        let prepared = self.strategy.prepare(job, &self.env).map_err(|err| {
            warn!(strategy, error = %err, "job rejected before launch");
            err
        })?;

        self.stop_occupant("preempted by a new job").await;

        // the launch may run user code for as long as it likes, so keep
        // serving the inbox and abort it when it is stopped or preempted
        let logs = LogBuffer::new();
        let abort = prepared.abort_handle();
        let mut launching = prepared.launch(logs.clone());
        let mut stops: Vec<oneshot::Sender<StopOutcome>> = Vec::new();
        let launched = loop {
            select! {
                launched = &mut launching => break launched,
                Some(msg) = self.inbox.recv() => match msg {
                    SupervisorMessage::GetStatus { response } => {
                        let _ = response.send(self.status());
                    }
                    SupervisorMessage::Stop { response } => {
                        warn!(strategy, "stop requested while the job was starting");
                        abort.abort();
                        stops.push(response);
                    }
                    admit @ SupervisorMessage::Admit { .. } => {
                        warn!(strategy, "job preempted while starting");
                        abort.abort();
                        self.deferred.push_back(admit);
                    }
                },
            }
        };

        let admitted = match launched {
            Ok(handle) => {
                let job_id = uuid::Uuid::new_v4();
                info!(%job_id, strategy, "job installed");
                self.slot = Some(Installed {
                    job_id,
                    started_at: SystemTime::now(),
                    handle,
                });
                Ok(Admission {
                    job_id,
                    logs: logs.flatten(),
                })
            }
            Err(err) => {
                error!(strategy, error = %err, "job failed to start");
                Err(err)
            }
        };

        if !stops.is_empty() {
            // the launch may have won the race against the abort
            self.stop_occupant("stop requested").await;
            for response in stops {
                let _ = response.send(StopOutcome::Stopped);
            }
        }
        admitted
    }

    /// Stop and clear the occupant. Stop failures are logged, never returned.
    async fn stop_occupant(&mut self, reason: &str) -> StopOutcome {
        let Some(mut occupant) = self.slot.take() else {
            return StopOutcome::NotRunning;
        };
        match occupant.handle.stop().await {
            Ok(()) => info!(job_id = %occupant.job_id, reason, "job stopped"),
            Err(err) => error!(job_id = %occupant.job_id, reason, error = %err, "failed to stop job"),
        }
        StopOutcome::Stopped
    }

    fn status(&self) -> SlotStatus {
        SlotStatus {
            occupant: self.slot.as_ref().map(|installed| Occupant {
                job_id: installed.job_id,
                strategy: self.strategy.name(),
                started_at: installed.started_at,
            }),
        }
    }
}
