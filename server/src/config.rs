//! Server configuration: CLI flags with environment fallbacks.

use clap::{Parser, ValueEnum};
use runlib::strategy::{
    EmbeddedConfig, EmbeddedStrategy, ExecutionStrategy, SubprocessConfig, SubprocessStrategy,
    WrapperDialect,
};
use std::{net::IpAddr, path::PathBuf, sync::Arc, time::Duration};

/// Run user-supplied code as the single active job of this host
#[derive(Debug, Clone, Parser)]
#[command(name = "bot-runner", version)]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "RUNNER_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// How admitted jobs are executed
    #[arg(long, env = "RUNNER_STRATEGY", value_enum, default_value_t = StrategyKind::Embedded)]
    pub strategy: StrategyKind,

    /// Directory for subprocess job artifacts
    #[arg(long, env = "RUNNER_SCRATCH_DIR", default_value = "bot-jobs")]
    pub scratch_dir: PathBuf,

    /// Language of the generated subprocess wrapper
    #[arg(long, env = "RUNNER_DIALECT", value_enum, default_value_t = Dialect::Node)]
    pub dialect: Dialect,

    /// Interpreter for subprocess jobs (defaults to the dialect's)
    #[arg(long, env = "RUNNER_INTERPRETER")]
    pub interpreter: Option<String>,

    /// Environment key holding the connection secret
    #[arg(long, env = "RUNNER_TOKEN_KEY", default_value = "DISCORD_TOKEN")]
    pub token_key: String,

    /// Environment key holding the optional grouping identifier
    #[arg(long, env = "RUNNER_GROUP_KEY", default_value = "GUILD_ID")]
    pub group_key: String,

    /// Wall-clock budget for top-level evaluation of embedded jobs, in ms
    #[arg(long, env = "RUNNER_EVAL_BUDGET_MS", default_value_t = 10_000)]
    pub eval_budget_ms: u64,

    /// Grace period between SIGTERM and SIGKILL for subprocess jobs, in ms
    #[arg(long, env = "RUNNER_STOP_GRACE_MS", default_value_t = 5_000)]
    pub stop_grace_ms: u64,

    /// Log level (error, warn, info, debug, trace); RUST_LOG wins when unset
    #[arg(long, env = "RUNNER_LOG", value_enum)]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum StrategyKind {
    /// Evaluate WebAssembly jobs inside this process
    Embedded,
    /// Run wrapped jobs as child processes
    Subprocess,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Dialect {
    Node,
    Shell,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Config {
    pub fn build_strategy(&self) -> anyhow::Result<Arc<dyn ExecutionStrategy>> {
        let strategy: Arc<dyn ExecutionStrategy> = match self.strategy {
            StrategyKind::Embedded => Arc::new(EmbeddedStrategy::new(EmbeddedConfig {
                eval_budget: Duration::from_millis(self.eval_budget_ms),
            })?),
            StrategyKind::Subprocess => Arc::new(SubprocessStrategy::new(SubprocessConfig {
                scratch_dir: self.scratch_dir.clone(),
                dialect: match self.dialect {
                    Dialect::Node => WrapperDialect::Node,
                    Dialect::Shell => WrapperDialect::Shell,
                },
                interpreter: self.interpreter.clone(),
                token_key: self.token_key.clone(),
                group_key: self.group_key.clone(),
                stop_grace: Duration::from_millis(self.stop_grace_ms),
            })?),
        };
        Ok(strategy)
    }
}
