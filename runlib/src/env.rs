use crate::types::Envs;

/// Process-wide environment view.
///
/// Seeded from the real process environment and merged additively on every
/// admission. Values are never removed, so later jobs observe variables
/// supplied by earlier callers. Owned by the supervisor actor; strategies
/// receive snapshots.
#[derive(Clone, Debug, Default)]
pub struct EnvView {
    vars: Envs,
}

impl EnvView {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, envs: &Envs) {
        self.vars
            .extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn snapshot(&self) -> Envs {
        self.vars.clone()
    }
}
