//! In-process evaluation of WebAssembly jobs.
//!
//! The job is a module in text or binary form exporting a `default`
//! function. It only sees the imports listed in [`host`]. Instantiation
//! (including the module's `start` function) runs under a wall-clock budget;
//! the entry call is awaited without one but can be aborted by the
//! supervisor, and the timers it schedules keep running in an
//! [`EvaluatorHandle`] actor until the job is stopped.

pub(crate) mod host;

use super::{ExecutionStrategy, PreparedJob, CONFIRMATION};
use crate::actors::evaluator::EvaluatorHandle;
use crate::env::EnvView;
use crate::errors::{AdmissionError, Failure, Result};
use crate::logs::LogBuffer;
use crate::stop::{LaunchAbort, StopHandle};
use crate::types::{Envs, Job};
use futures::future::{BoxFuture, FutureExt};
use host::{HostState, Interrupt};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;
use wasmtime::{Config, Engine, ExternType, Instance, Module, Store, WasmBacktrace};

pub const ENTRY_EXPORT: &str = "default";
const EPOCH_TICK: Duration = Duration::from_millis(10);

#[derive(Clone, Debug)]
pub struct EmbeddedConfig {
    /// Budget for the synchronous top-level evaluation.
    pub eval_budget: Duration,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            eval_budget: Duration::from_millis(10_000),
        }
    }
}

pub struct EmbeddedStrategy {
    engine: Engine,
    config: EmbeddedConfig,
}

impl EmbeddedStrategy {
    pub fn new(config: EmbeddedConfig) -> anyhow::Result<Self> {
        let mut wasm_config = Config::new();
        wasm_config.epoch_interruption(true);
        let engine = Engine::new(&wasm_config)?;
        Ok(Self { engine, config })
    }
}

impl ExecutionStrategy for EmbeddedStrategy {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn prepare(&self, job: Job, env: &EnvView) -> Result<Box<dyn PreparedJob>> {
        let module = normalize(&self.engine, &job.source)?;
        Ok(Box::new(PreparedModule {
            engine: self.engine.clone(),
            module,
            env: env.snapshot(),
            interrupt: Arc::new(Interrupt::default()),
            budget: self.config.eval_budget,
        }))
    }
}

/// Compile the program and check it follows the entry convention.
/// A program that does not compile has no entry point either.
fn normalize(engine: &Engine, source: &str) -> Result<Module> {
    let source = source.trim_start_matches('\u{feff}');
    let module = Module::new(engine, source).map_err(|err| {
        AdmissionError::StructuralFailure(format!(
            "user code does not compile: {}",
            failure(err).message
        ))
    })?;
    match module.get_export(ENTRY_EXPORT) {
        Some(ExternType::Func(ty)) if ty.params().len() == 0 && ty.results().len() == 0 => {
            Ok(module)
        }
        _ => Err(AdmissionError::StructuralFailure(
            "export default function not found in user code".into(),
        )),
    }
}

struct PreparedModule {
    engine: Engine,
    module: Module,
    env: Envs,
    interrupt: Arc<Interrupt>,
    budget: Duration,
}

impl PreparedJob for PreparedModule {
    fn abort_handle(&self) -> LaunchAbort {
        let interrupt = self.interrupt.clone();
        LaunchAbort::new(move || interrupt.cancel())
    }

    fn launch(self: Box<Self>, logs: LogBuffer) -> BoxFuture<'static, Result<StopHandle>> {
        async move {
            let PreparedModule {
                engine,
                module,
                env,
                interrupt,
                budget,
            } = *self;
            let (timer_tx, timer_rx) = mpsc::unbounded_channel();
            let state = HostState::new(logs.clone(), env, interrupt.clone(), timer_tx);
            let ticker = spawn_ticker(engine.clone());

            let evaluated =
                tokio::task::spawn_blocking(move || evaluate(&engine, &module, state, budget))
                    .await
                    .map_err(|err| AdmissionError::runtime(err.to_string()))
                    .and_then(|result| result.map_err(AdmissionError::RuntimeFailure));

            match evaluated {
                Ok((store, instance)) => {
                    logs.line(CONFIRMATION);
                    let evaluator =
                        EvaluatorHandle::spawn(store, instance, timer_rx, interrupt, ticker, budget);
                    Ok(StopHandle::new(async move { evaluator.stop().await }))
                }
                Err(err) => {
                    ticker.abort();
                    Err(err)
                }
            }
        }
        .boxed()
    }
}

fn evaluate(
    engine: &Engine,
    module: &Module,
    state: HostState,
    budget: Duration,
) -> std::result::Result<(Store<HostState>, Instance), Failure> {
    let linker = host::linker(engine).map_err(failure)?;
    let mut store = Store::new(engine, state);
    store.epoch_deadline_callback(|ctx| ctx.data().interrupt.check());
    store.set_epoch_deadline(1);

    store.data().interrupt.arm(budget);
    let instance = linker.instantiate(&mut store, module);
    store.data().interrupt.disarm();
    let instance = instance.map_err(failure)?;

    debug!("calling entry function");
    let entry = instance
        .get_typed_func::<(), ()>(&mut store, ENTRY_EXPORT)
        .map_err(failure)?;
    entry.call(&mut store, ()).map_err(failure)?;
    Ok((store, instance))
}

/// Advance the engine epoch so running guest code observes the interrupt.
fn spawn_ticker(engine: Engine) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EPOCH_TICK);
        loop {
            interval.tick().await;
            engine.increment_epoch();
        }
    })
}

pub(crate) fn failure(err: anyhow::Error) -> Failure {
    Failure {
        message: err.root_cause().to_string(),
        trace: err
            .downcast_ref::<WasmBacktrace>()
            .map(|backtrace| backtrace.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG_AB: &str = r#"
        (module
          (import "host" "log" (func $log (param i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "ab")
          (func (export "default")
            (call $log (i32.const 0) (i32.const 1))
            (call $log (i32.const 1) (i32.const 1))))
    "#;

    const TICKER: &str = r#"
        (module
          (import "host" "log" (func $log (param i32 i32)))
          (import "host" "set_interval" (func $every (param i32 i32 i32) (result i32)))
          (import "host" "set_stop" (func $on_stop (param i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "tick")
          (data (i32.const 16) "stopping")
          (data (i32.const 32) "cleanup")
          (func (export "tick")
            (call $log (i32.const 0) (i32.const 4)))
          (func (export "cleanup")
            (call $log (i32.const 16) (i32.const 8)))
          (func (export "default")
            (drop (call $every (i32.const 0) (i32.const 4) (i32.const 10)))
            (call $on_stop (i32.const 32) (i32.const 7))))
    "#;

    const ONE_SHOT: &str = r#"
        (module
          (import "host" "log" (func $log (param i32 i32)))
          (import "host" "set_timeout" (func $after (param i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "tick")
          (func (export "tick")
            (call $log (i32.const 0) (i32.const 4)))
          (func (export "default")
            (drop (call $after (i32.const 0) (i32.const 4) (i32.const 10)))))
    "#;

    const CLEARED: &str = r#"
        (module
          (import "host" "log" (func $log (param i32 i32)))
          (import "host" "set_timeout" (func $after (param i32 i32 i32) (result i32)))
          (import "host" "clear_timer" (func $clear (param i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "tick")
          (func (export "tick")
            (call $log (i32.const 0) (i32.const 4)))
          (func (export "default")
            (call $clear (call $after (i32.const 0) (i32.const 4) (i32.const 50)))))
    "#;

    const SPINNING_STOP: &str = r#"
        (module
          (import "host" "set_stop" (func $on_stop (param i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "cleanup")
          (func (export "cleanup")
            (loop $forever (br $forever)))
          (func (export "default")
            (call $on_stop (i32.const 0) (i32.const 7))))
    "#;

    const READ_ENV: &str = r#"
        (module
          (import "host" "log" (func $log (param i32 i32)))
          (import "host" "env_get" (func $env (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "GREETING")
          (func (export "default")
            (local $len i32)
            (local.set $len (call $env (i32.const 0) (i32.const 8) (i32.const 64) (i32.const 64)))
            (call $log (i32.const 64) (local.get $len))))
    "#;

    fn strategy(budget: Duration) -> EmbeddedStrategy {
        EmbeddedStrategy::new(EmbeddedConfig {
            eval_budget: budget,
        })
        .expect("engine")
    }

    async fn launch(source: &str, env: EnvView) -> (Result<StopHandle>, LogBuffer) {
        let logs = LogBuffer::new();
        let prepared = strategy(Duration::from_secs(2))
            .prepare(Job::new(source, Envs::new()), &env)
            .expect("prepare");
        (prepared.launch(logs.clone()).await, logs)
    }

    #[tokio::test]
    async fn logs_in_call_order() {
        let (handle, logs) = launch(LOG_AB, EnvView::empty()).await;
        handle.expect("launch").stop().await.expect("stop");
        assert_eq!(logs.flatten(), format!("a\nb\n{CONFIRMATION}\n"));
    }

    #[tokio::test]
    async fn missing_entry_is_structural() {
        let err = strategy(Duration::from_secs(1))
            .prepare(
                Job::new(r#"(module (func (export "main")))"#, Envs::new()),
                &EnvView::empty(),
            )
            .err()
            .expect("structural failure");
        assert!(matches!(err, AdmissionError::StructuralFailure(_)));
    }

    #[tokio::test]
    async fn entry_with_arguments_is_structural() {
        let err = strategy(Duration::from_secs(1))
            .prepare(
                Job::new(
                    r#"(module (func (export "default") (param i32)))"#,
                    Envs::new(),
                ),
                &EnvView::empty(),
            )
            .err()
            .expect("structural failure");
        assert!(matches!(err, AdmissionError::StructuralFailure(_)));
    }

    #[tokio::test]
    async fn syntax_error_is_structural() {
        let err = strategy(Duration::from_secs(1))
            .prepare(Job::new("(module (func", Envs::new()), &EnvView::empty())
            .err()
            .expect("compile failure");
        match err {
            AdmissionError::StructuralFailure(message) => {
                assert!(message.starts_with("user code does not compile"), "{message}")
            }
            other => panic!("expected structural failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn aborting_a_hung_entry_fails_the_launch() {
        let source = r#"(module (func (export "default") (loop $forever (br $forever))))"#;
        let prepared = strategy(Duration::from_secs(1))
            .prepare(Job::new(source, Envs::new()), &EnvView::empty())
            .expect("prepare");
        let abort = prepared.abort_handle();
        let launching = tokio::spawn(prepared.launch(LogBuffer::new()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        abort.abort();

        let launched = tokio::time::timeout(Duration::from_secs(2), launching)
            .await
            .expect("launch gave up")
            .expect("join");
        match launched {
            Err(AdmissionError::RuntimeFailure(failure)) => {
                assert!(failure.message.contains("stopped"), "{}", failure.message)
            }
            other => panic!("expected runtime failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn top_level_spin_times_out() {
        let source = r#"
            (module
              (func $spin (loop $forever (br $forever)))
              (start $spin)
              (func (export "default")))
        "#;
        let prepared = strategy(Duration::from_millis(200))
            .prepare(Job::new(source, Envs::new()), &EnvView::empty())
            .expect("prepare");
        let err = prepared.launch(LogBuffer::new()).await.unwrap_err();
        match err {
            AdmissionError::RuntimeFailure(failure) => {
                assert!(failure.message.contains("timed out"), "{}", failure.message)
            }
            other => panic!("expected runtime failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn trap_in_entry_carries_trace() {
        let source = r#"(module (func (export "default") unreachable))"#;
        let (handle, logs) = launch(source, EnvView::empty()).await;
        match handle {
            Err(AdmissionError::RuntimeFailure(failure)) => assert!(failure.trace.is_some()),
            other => panic!("expected runtime failure, got {other:?}"),
        }
        assert!(!logs.lines().iter().any(|line| line == CONFIRMATION));
    }

    #[tokio::test]
    async fn reads_merged_environment() {
        let mut env = EnvView::empty();
        env.merge(&Envs::from([("GREETING".into(), "hello".into())]));
        let (handle, logs) = launch(READ_ENV, env).await;
        handle.expect("launch").stop().await.expect("stop");
        assert_eq!(logs.lines()[0], "hello");
    }

    #[tokio::test]
    async fn timeout_fires_once() {
        let (handle, logs) = launch(ONE_SHOT, EnvView::empty()).await;
        let mut handle = handle.expect("launch");
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.stop().await.expect("stop");
        let ticks = logs.lines().iter().filter(|l| *l == "tick").count();
        assert_eq!(ticks, 1);
    }

    #[tokio::test]
    async fn cleared_timer_never_fires() {
        let (handle, logs) = launch(CLEARED, EnvView::empty()).await;
        let mut handle = handle.expect("launch");
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.stop().await.expect("stop");
        assert!(!logs.lines().iter().any(|l| l == "tick"));
    }

    #[tokio::test]
    async fn spinning_stop_procedure_is_cut_off_by_budget() {
        let logs = LogBuffer::new();
        let mut handle = strategy(Duration::from_millis(200))
            .prepare(Job::new(SPINNING_STOP, Envs::new()), &EnvView::empty())
            .expect("prepare")
            .launch(logs)
            .await
            .expect("launch");

        let err = tokio::time::timeout(Duration::from_secs(3), handle.stop())
            .await
            .expect("stop returned")
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        handle.stop().await.expect("second stop is a no-op");
    }

    #[tokio::test]
    async fn stop_cancels_timers_and_runs_stop_procedure() {
        let (handle, logs) = launch(TICKER, EnvView::empty()).await;
        let mut handle = handle.expect("launch");
        tokio::time::sleep(Duration::from_millis(200)).await;
        let ticks = |logs: &LogBuffer| logs.lines().iter().filter(|l| *l == "tick").count();
        assert!(ticks(&logs) > 0);

        handle.stop().await.expect("stop");
        let after_stop = ticks(&logs);
        assert_eq!(logs.lines().last().map(String::as_str), Some("stopping"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks(&logs), after_stop);
        handle.stop().await.expect("second stop is a no-op");
    }
}
