use std::sync::{Arc, Mutex};
use tracing::info;

/// Line-oriented log sink for one job.
///
/// Clones share the same buffer, so the sink can be handed to host
/// callbacks while the supervisor keeps a copy to flatten into the response.
/// Every line is also mirrored to the process log stream.
#[derive(Clone, Debug, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self, line: impl Into<String>) {
        let line = line.into();
        info!(target: "bot", "{}", line);
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Join all lines, newline-terminated.
    pub fn flatten(&self) -> String {
        let mut text = self.lines().join("\n");
        text.push('\n');
        text
    }
}
