use std::{fmt, io, result};
use thiserror::Error;

pub const CODE_REQUIRED: &str = "field `code` (string) is required";

/// Why a job was not admitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Malformed request: the caller should fix the input.
    #[error("{0}")]
    InvalidInput(String),
    /// The program has no usable entry point (or lacks a required token).
    #[error("{0}")]
    StructuralFailure(String),
    /// The program failed while being evaluated or started.
    #[error("{0}")]
    RuntimeFailure(Failure),
}

impl AdmissionError {
    pub fn runtime(message: impl Into<String>) -> Self {
        AdmissionError::RuntimeFailure(Failure {
            message: message.into(),
            trace: None,
        })
    }
}

/// Detail of a runtime failure: a message plus an optional backtrace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub message: String,
    pub trace: Option<String>,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.trace {
            Some(trace) => write!(f, "{}\n{}", self.message, trace),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Failure while stopping a job. Never surfaced to callers, only logged.
#[derive(Error, Debug)]
pub enum StopError {
    #[error("failed to signal process {pid}: {source}")]
    Signal { pid: i32, source: io::Error },
    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),
    #[error("stop procedure failed: {0}")]
    Procedure(String),
}

pub type Result<T> = result::Result<T, AdmissionError>;
