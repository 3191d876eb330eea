//! Wrapper programs around user-supplied source.

use std::{fmt, str::FromStr};

const SOURCE: &str = "__JOB_SOURCE__";
const TOKEN_KEY: &str = "__TOKEN_KEY__";
const GROUP_KEY: &str = "__GROUP_KEY__";

const NODE_WRAPPER: &str = r#"// generated job wrapper, do not edit
const TOKEN_KEY = "__TOKEN_KEY__";
const GROUP_KEY = "__GROUP_KEY__";

const token = process.env[TOKEN_KEY];
if (!token) {
  console.error(`[wrapper] ${TOKEN_KEY} is not set, exiting`);
  process.exit(1);
}
const guildId = process.env[GROUP_KEY];

process.on("unhandledRejection", (err) => {
  console.error("[wrapper] unhandled rejection:", err);
});
process.on("uncaughtException", (err) => {
  console.error("[wrapper] uncaught exception:", err);
});

const { Client, GatewayIntentBits } = require("discord.js");
const client = new Client({
  intents: [
    GatewayIntentBits.Guilds,
    GatewayIntentBits.GuildMessages,
    GatewayIntentBits.MessageContent,
  ],
});

try {
__JOB_SOURCE__
} catch (err) {
  console.error("[wrapper] user code error:", err);
}

client
  .login(token)
  .then(() => console.log("[wrapper] logged in", guildId ? `(guild ${guildId})` : ""))
  .catch((err) => {
    console.error("[wrapper] login failed:", err);
    process.exit(1);
  });
"#;

const SHELL_WRAPPER: &str = r#"#!/bin/sh
# generated job wrapper, do not edit
if [ -z "${__TOKEN_KEY__:-}" ]; then
  echo "[wrapper] __TOKEN_KEY__ is not set, exiting" >&2
  exit 1
fi
GROUP_ID="${__GROUP_KEY__:-}"

job_main() {
:
__JOB_SOURCE__
}

( job_main )
status=$?
if [ "$status" -ne 0 ]; then
  echo "[wrapper] user code failed with status $status" >&2
fi
"#;

/// Language the wrapper is generated in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WrapperDialect {
    #[default]
    Node,
    Shell,
}

impl WrapperDialect {
    pub fn interpreter(&self) -> &'static str {
        match self {
            WrapperDialect::Node => "node",
            WrapperDialect::Shell => "sh",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            WrapperDialect::Node => "cjs",
            WrapperDialect::Shell => "sh",
        }
    }

    /// Embed `source` verbatim in the dialect's guarded region.
    ///
    /// Keys must be plain environment variable names, see [`is_env_key`].
    pub fn render(&self, source: &str, token_key: &str, group_key: &str) -> String {
        let template = match self {
            WrapperDialect::Node => NODE_WRAPPER,
            WrapperDialect::Shell => SHELL_WRAPPER,
        };
        // substitute keys first so the source is never rescanned
        let (head, tail) = template.split_once(SOURCE).unwrap_or((template, ""));
        let fill = |part: &str| part.replace(TOKEN_KEY, token_key).replace(GROUP_KEY, group_key);
        format!("{}{}{}", fill(head), source, fill(tail))
    }
}

impl fmt::Display for WrapperDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WrapperDialect::Node => f.write_str("node"),
            WrapperDialect::Shell => f.write_str("shell"),
        }
    }
}

impl FromStr for WrapperDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "node" | "js" => Ok(WrapperDialect::Node),
            "shell" | "sh" => Ok(WrapperDialect::Shell),
            other => Err(format!("unknown wrapper dialect `{other}`")),
        }
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
