use crate::types::JobId;
use std::{fmt, time::SystemTime};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Exited { code: i32 },
    Killed { signal: i32 },
}

/// Which pipe a subprocess line came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => f.write_str("stdout"),
            Stream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Result of a successful admission.
#[derive(Clone, Debug)]
pub struct Admission {
    pub job_id: JobId,
    /// Log lines buffered before control returned, flattened.
    pub logs: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped,
}

/// Snapshot of the job slot.
#[derive(Clone, Debug, Default)]
pub struct SlotStatus {
    pub occupant: Option<Occupant>,
}

#[derive(Clone, Debug)]
pub struct Occupant {
    pub job_id: JobId,
    pub strategy: &'static str,
    pub started_at: SystemTime,
}
