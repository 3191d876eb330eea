use super::messages::WorkerMessage;
use crate::errors::StopError;
use crate::events::{JobStatus, Stream};

use std::{io, os::unix::process::ExitStatusExt, process::ExitStatus, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Child,
    select,
    sync::mpsc,
    time,
};
use tracing::{debug, info, warn};

pub struct Actor {
    inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    job_status: JobStatus,
    pid: Option<u32>,
    grace: Duration,
}

impl Actor {
    pub fn spawn(inbox: mpsc::UnboundedReceiver<WorkerMessage>, child: Child, grace: Duration) {
        let actor = Self {
            inbox,
            job_status: JobStatus::Running,
            pid: child.id(),
            grace,
        };
        tokio::spawn(async move { actor.run(child).await });
    }

    async fn run(mut self, mut child: Child) {
        let pid = self.pid.unwrap_or_default();
        // pipe stdout and stderr to the log stream, if they've been piped
        if let Some(stdout) = child.stdout.take() {
            pipe_lines(stdout, pid, Stream::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            pipe_lines(stderr, pid, Stream::Stderr);
        }

        loop {
            select! {
                maybe_msg = self.inbox.recv() => {
                    match maybe_msg {
                        Some(WorkerMessage::GetStatus { response }) => {
                            let _ = response.send(self.job_status);
                        }
                        Some(WorkerMessage::Stop { response }) => {
                            let _ = response.send(self.terminate(&mut child).await);
                        }
                        None => {
                            // actor handle dropped, make sure we kill the child process before we exit
                            if let Err(err) = self.terminate(&mut child).await {
                                warn!(pid, error = %err, "failed to terminate orphaned job process");
                            }
                            return;
                        }
                    }
                }
                exit_status = child.wait(), if self.job_status == JobStatus::Running => {
                    match exit_status {
                        Ok(exit_status) => {
                            self.job_status = job_status(exit_status);
                            info!(pid, status = ?self.job_status, "job process exited");
                        }
                        Err(err) => {
                            warn!(pid, error = %err, "failed to wait for job process");
                            self.job_status = JobStatus::Exited { code: -1 };
                        }
                    }
                }
            }
        }
    }

    /// SIGTERM the process group, then SIGKILL once the grace period runs out.
    async fn terminate(&mut self, child: &mut Child) -> Result<(), StopError> {
        let pid = match (self.job_status, child.id()) {
            (JobStatus::Running, Some(pid)) => pid as i32,
            _ => {
                debug!(status = ?self.job_status, "job process already exited");
                return Ok(());
            }
        };

        signal_group(pid, libc::SIGTERM)?;
        match time::timeout(self.grace, child.wait()).await {
            Ok(Ok(exit_status)) => {
                self.job_status = job_status(exit_status);
                info!(pid, status = ?self.job_status, "job process terminated");
                Ok(())
            }
            Ok(Err(err)) => Err(StopError::Wait(err)),
            Err(_) => {
                warn!(pid, grace = ?self.grace, "job process ignored SIGTERM, killing");
                signal_group(pid, libc::SIGKILL)?;
                let exit_status = child.wait().await.map_err(StopError::Wait)?;
                self.job_status = job_status(exit_status);
                Ok(())
            }
        }
    }
}

fn job_status(exit_status: ExitStatus) -> JobStatus {
    match (exit_status.code(), exit_status.signal()) {
        (Some(code), _) => JobStatus::Exited { code },
        (None, Some(signal)) => JobStatus::Killed { signal },
        (None, None) => JobStatus::Exited { code: -1 },
    }
}

/// Deliver `signal` to the process group led by `pid`. A group that no
/// longer exists counts as delivered.
fn signal_group(pid: i32, signal: i32) -> Result<(), StopError> {
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        debug!(pid, "job process group already gone");
        Ok(())
    } else {
        Err(StopError::Signal { pid, source: err })
    }
}

fn pipe_lines<R>(reader: R, pid: u32, stream: Stream)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match stream {
                    Stream::Stdout => {
                        info!(target: "remote_job", pid, %stream, "[remote job][{}] {}", stream, line)
                    }
                    Stream::Stderr => {
                        warn!(target: "remote_job", pid, %stream, "[remote job][{}] {}", stream, line)
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    debug!(pid, %stream, error = %err, "job output closed");
                    break;
                }
            }
        }
    });
}
