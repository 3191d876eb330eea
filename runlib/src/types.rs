use std::collections::HashMap;
use uuid::Uuid;

pub type Source = String;
pub type Envs = HashMap<String, String>;
pub type JobId = Uuid;

/// One admitted unit of work: program text plus the caller's environment.
#[derive(Clone, Debug, Default)]
pub struct Job {
    pub source: Source,
    pub environment: Envs,
}

impl Job {
    pub fn new(source: impl Into<Source>, environment: Envs) -> Self {
        Self {
            source: source.into(),
            environment,
        }
    }
}
