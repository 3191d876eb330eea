//! Execution strategies.
//!
//! Admission is split in two phases so that a job can be rejected without
//! disturbing the one already running:
//!
//! - [`ExecutionStrategy::prepare`] validates the program and stages
//!   everything that has no side effects on the host;
//! - [`PreparedJob::launch`] actually starts it and hands back the
//!   [`StopHandle`] for the job slot.
//!
//! [`embedded`] evaluates a WebAssembly module inside the supervisor process.
//! [`subprocess`] wraps the program and runs it as a child process.

pub mod embedded;
pub mod subprocess;

use crate::env::EnvView;
use crate::errors::Result;
use crate::logs::LogBuffer;
use crate::stop::{LaunchAbort, StopHandle};
use crate::types::Job;
use futures::future::BoxFuture;

pub use embedded::{EmbeddedConfig, EmbeddedStrategy};
pub use subprocess::{SubprocessConfig, SubprocessStrategy, WrapperDialect};

/// Line appended to the log once a job started without an immediate error.
pub const CONFIRMATION: &str = "User code executed without immediate error.";

pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check the job and stage it. Must not touch any running job.
    fn prepare(&self, job: Job, env: &EnvView) -> Result<Box<dyn PreparedJob>>;
}

pub trait PreparedJob: Send {
    /// Signal that makes an in-flight [`launch`](PreparedJob::launch) give up.
    fn abort_handle(&self) -> LaunchAbort {
        LaunchAbort::noop()
    }

    /// Start the job, writing its output into `logs`.
    fn launch(self: Box<Self>, logs: LogBuffer) -> BoxFuture<'static, Result<StopHandle>>;
}
