//! Host facilities linked into embedded jobs.
//!
//! Everything a job can reach lives in the `host` import namespace:
//!
//! | import        | signature                                   |
//! |---------------|---------------------------------------------|
//! | `log`         | `(ptr, len)`                                |
//! | `env_get`     | `(key_ptr, key_len, out_ptr, out_cap) -> len` (`-1` if unset) |
//! | `set_timeout` | `(name_ptr, name_len, delay_ms) -> id`      |
//! | `set_interval`| `(name_ptr, name_len, period_ms) -> id`     |
//! | `clear_timer` | `(id)`                                      |
//! | `set_stop`    | `(name_ptr, name_len)`                      |
//!
//! Strings are UTF-8 slices of the job's exported `memory`. Timer and stop
//! callbacks name exported `() -> ()` functions.

use crate::actors::evaluator::{TimerCommand, TimerId};
use crate::logs::LogBuffer;
use crate::types::Envs;
use anyhow::{anyhow, bail};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use wasmtime::{Caller, Engine, Linker, Memory, UpdateDeadline};

const HOST: &str = "host";
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Per-store state visible to host functions.
pub struct HostState {
    pub logs: LogBuffer,
    pub env: Envs,
    pub interrupt: Arc<Interrupt>,
    /// Export registered through `set_stop`.
    pub stop_export: Option<String>,
    timers: mpsc::UnboundedSender<TimerCommand>,
    next_timer: TimerId,
}

impl HostState {
    pub fn new(
        logs: LogBuffer,
        env: Envs,
        interrupt: Arc<Interrupt>,
        timers: mpsc::UnboundedSender<TimerCommand>,
    ) -> Self {
        Self {
            logs,
            env,
            interrupt,
            stop_export: None,
            timers,
            next_timer: 1,
        }
    }
}

/// Wall-clock budget and cancellation flag consulted on every epoch tick.
#[derive(Debug, Default)]
pub struct Interrupt {
    cancelled: AtomicBool,
    deadline: Mutex<Option<(Instant, Duration)>>,
}

impl Interrupt {
    /// Start enforcing `budget` from now.
    pub fn arm(&self, budget: Duration) {
        *self.lock() = Some((Instant::now() + budget, budget));
    }

    pub fn disarm(&self) {
        *self.lock() = None;
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Epoch deadline callback: trap when stopped or over budget.
    pub fn check(&self) -> anyhow::Result<UpdateDeadline> {
        if self.is_cancelled() {
            bail!("job was stopped");
        }
        if let Some((deadline, budget)) = *self.lock() {
            if Instant::now() >= deadline {
                bail!("script execution timed out after {}ms", budget.as_millis());
            }
        }
        Ok(UpdateDeadline::Continue(1))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(Instant, Duration)>> {
        self.deadline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn linker(engine: &Engine) -> anyhow::Result<Linker<HostState>> {
    let mut linker = Linker::new(engine);

    linker.func_wrap(
        HOST,
        "log",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let line = read_string(&mut caller, ptr, len)?;
            caller.data().logs.line(line);
            Ok(())
        },
    )?;

    linker.func_wrap(
        HOST,
        "env_get",
        |mut caller: Caller<'_, HostState>,
         key_ptr: i32,
         key_len: i32,
         out_ptr: i32,
         out_cap: i32|
         -> anyhow::Result<i32> {
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let Some(value) = caller.data().env.get(&key).cloned() else {
                return Ok(-1);
            };
            let len = i32::try_from(value.len())?;
            if len <= out_cap {
                let offset = usize::try_from(out_ptr)?;
                memory(&mut caller)?.write(&mut caller, offset, value.as_bytes())?;
            }
            Ok(len)
        },
    )?;

    linker.func_wrap(
        HOST,
        "set_timeout",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32, delay_ms: i32| {
            schedule(&mut caller, ptr, len, delay_ms, false)
        },
    )?;

    linker.func_wrap(
        HOST,
        "set_interval",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32, period_ms: i32| {
            schedule(&mut caller, ptr, len, period_ms, true)
        },
    )?;

    linker.func_wrap(
        HOST,
        "clear_timer",
        |caller: Caller<'_, HostState>, id: i32| {
            if let Ok(id) = TimerId::try_from(id) {
                let _ = caller.data().timers.send(TimerCommand::Clear { id });
            }
        },
    )?;

    linker.func_wrap(
        HOST,
        "set_stop",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let name = read_string(&mut caller, ptr, len)?;
            caller.data_mut().stop_export = Some(name);
            Ok(())
        },
    )?;

    Ok(linker)
}

fn schedule(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
    millis: i32,
    repeat: bool,
) -> anyhow::Result<i32> {
    let callback = read_string(caller, ptr, len)?;
    let mut delay = Duration::from_millis(u64::try_from(millis.max(0))?);
    if repeat {
        delay = delay.max(MIN_INTERVAL);
    }

    let state = caller.data_mut();
    let id = state.next_timer;
    state.next_timer += 1;
    state
        .timers
        .send(TimerCommand::Schedule {
            id,
            callback,
            delay,
            repeat,
        })
        .map_err(|_| anyhow!("timers are no longer available"))?;
    Ok(i32::try_from(id)?)
}

fn memory(caller: &mut Caller<'_, HostState>) -> anyhow::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .ok_or_else(|| anyhow!("module must export `memory` to use host facilities"))
}

fn read_string(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> anyhow::Result<String> {
    let memory = memory(caller)?;
    let start = usize::try_from(ptr)?;
    let end = start
        .checked_add(usize::try_from(len)?)
        .ok_or_else(|| anyhow!("string out of bounds"))?;
    let bytes = memory
        .data(&*caller)
        .get(start..end)
        .ok_or_else(|| anyhow!("string out of bounds: {start}..{end}"))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}
