use crate::errors::StopError;
use futures::future::{BoxFuture, FutureExt};
use std::{fmt, future::Future, sync::Arc};

/// Terminates one job and releases what it held.
///
/// The stop procedure is a lazy future that runs at most once: the first
/// `stop` drives it, every later call returns `Ok(())` without touching the
/// job again.
pub struct StopHandle {
    pending: Option<BoxFuture<'static, Result<(), StopError>>>,
}

impl StopHandle {
    pub fn new<F>(procedure: F) -> Self
    where
        F: Future<Output = Result<(), StopError>> + Send + 'static,
    {
        Self {
            pending: Some(procedure.boxed()),
        }
    }

    pub fn noop() -> Self {
        Self { pending: None }
    }

    pub async fn stop(&mut self) -> Result<(), StopError> {
        match self.pending.take() {
            Some(procedure) => procedure.await,
            None => Ok(()),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.pending.is_none()
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Interrupts a job whose launch has not finished yet.
///
/// Launching may run user code (an entry function that never returns, for
/// instance), so the supervisor keeps this signal around until the job's
/// [`StopHandle`] is available.
#[derive(Clone, Default)]
pub struct LaunchAbort {
    signal: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl LaunchAbort {
    pub fn new<F>(signal: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            signal: Some(Arc::new(signal)),
        }
    }

    /// For launches that finish on their own in bounded time.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        if let Some(signal) = &self.signal {
            signal();
        }
    }
}

impl fmt::Debug for LaunchAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchAbort")
            .field("noop", &self.signal.is_none())
            .finish()
    }
}
