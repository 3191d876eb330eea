//! Out-of-process execution.
//!
//! The source is wrapped by a [`WrapperDialect`], written to a scratch
//! artifact and run by the dialect's interpreter in its own process group.
//! Stopping signals the group and deletes the artifact.

mod wrapper;

pub use wrapper::{is_env_key, WrapperDialect};

use super::{ExecutionStrategy, PreparedJob};
use crate::actors::worker::WorkerHandle;
use crate::env::EnvView;
use crate::errors::{AdmissionError, Result};
use crate::logs::LogBuffer;
use crate::stop::StopHandle;
use crate::types::{Envs, Job};
use anyhow::ensure;
use futures::future::{BoxFuture, FutureExt};
use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    process::Command,
};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct SubprocessConfig {
    /// Where wrapper artifacts are written. Created on first use.
    pub scratch_dir: PathBuf,
    pub dialect: WrapperDialect,
    /// Overrides the dialect's default interpreter.
    pub interpreter: Option<String>,
    /// Connection secret every job must supply.
    pub token_key: String,
    /// Optional grouping identifier forwarded to the wrapper.
    pub group_key: String,
    /// How long a stop waits after SIGTERM.
    pub stop_grace: Duration,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("bot-jobs"),
            dialect: WrapperDialect::Node,
            interpreter: None,
            token_key: "DISCORD_TOKEN".into(),
            group_key: "GUILD_ID".into(),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl SubprocessConfig {
    fn interpreter(&self) -> &str {
        self.interpreter
            .as_deref()
            .unwrap_or_else(|| self.dialect.interpreter())
    }
}

pub struct SubprocessStrategy {
    config: Arc<SubprocessConfig>,
}

impl SubprocessStrategy {
    pub fn new(config: SubprocessConfig) -> anyhow::Result<Self> {
        ensure!(
            is_env_key(&config.token_key),
            "invalid token key `{}`",
            config.token_key
        );
        ensure!(
            is_env_key(&config.group_key),
            "invalid group key `{}`",
            config.group_key
        );
        Ok(Self {
            config: Arc::new(config),
        })
    }
}

impl ExecutionStrategy for SubprocessStrategy {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn prepare(&self, job: Job, env: &EnvView) -> Result<Box<dyn PreparedJob>> {
        let token_key = &self.config.token_key;
        if job
            .environment
            .get(token_key)
            .map_or(true, |token| token.is_empty())
        {
            return Err(AdmissionError::StructuralFailure(format!(
                "env.{token_key} is required"
            )));
        }

        let program = self
            .config
            .dialect
            .render(&job.source, token_key, &self.config.group_key);
        let mut envs = env.snapshot();
        envs.extend(job.environment);
        Ok(Box::new(PreparedProcess {
            config: self.config.clone(),
            program,
            envs,
        }))
    }
}

struct PreparedProcess {
    config: Arc<SubprocessConfig>,
    program: String,
    envs: Envs,
}

impl PreparedJob for PreparedProcess {
    fn launch(self: Box<Self>, logs: LogBuffer) -> BoxFuture<'static, Result<StopHandle>> {
        async move {
            let config = &self.config;
            let artifact =
                write_artifact(&config.scratch_dir, config.dialect.extension(), &self.program)
                    .await
                    .map_err(|err| {
                        AdmissionError::runtime(format!("failed to write job artifact: {err}"))
                    })?;

            let interpreter = config.interpreter();
            let spawned = Command::new(interpreter)
                .arg(&artifact)
                .env_clear()
                .envs(&self.envs)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .process_group(0)
                .kill_on_drop(true)
                .spawn();
            let child = match spawned {
                Ok(child) => child,
                Err(err) => {
                    remove_artifact(&artifact).await;
                    return Err(AdmissionError::runtime(format!(
                        "failed to spawn `{interpreter}`: {err}"
                    )));
                }
            };

            let pid = child.id().unwrap_or_default();
            info!(pid, artifact = %artifact.display(), "job process started");
            logs.line(format!("bot process started (pid {pid})"));

            let worker = WorkerHandle::spawn(child, config.stop_grace);
            Ok(StopHandle::new(async move {
                let stopped = worker.stop().await;
                if let Some(status) = worker.status().await {
                    debug!(pid, ?status, "job process final status");
                }
                remove_artifact(&artifact).await;
                stopped
            }))
        }
        .boxed()
    }
}

/// Write `program` to a new `job-<unix-millis>.<ext>` file in `dir`.
async fn write_artifact(dir: &Path, extension: &str, program: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();

    let mut attempt = 0u32;
    loop {
        let name = match attempt {
            0 => format!("job-{millis}.{extension}"),
            n => format!("job-{millis}-{n}.{extension}"),
        };
        let path = dir.join(name);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(program.as_bytes()).await?;
                file.flush().await?;
                return Ok(path);
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(err),
        }
    }
}

async fn remove_artifact(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(artifact = %path.display(), "job artifact removed"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(artifact = %path.display(), "job artifact already removed")
        }
        Err(err) => warn!(artifact = %path.display(), error = %err, "failed to remove job artifact"),
    }
}
