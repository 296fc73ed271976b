//! Script Execution Bridge
//!
//! Everything between a decoded request and a local process invocation:
//!
//! - `resolver.rs`: script name validation and path confinement
//! - `marshal.rs`: parameters to argument vectors (real and redacted)
//! - `runner.rs`: child process invocation with output capture
//! - `redact.rs`: credential scrubbing for captured output
//!
//! The bridge knows nothing about HTTP. Callers hand it a script name, a
//! [`ParameterSet`] and the caller address, and map the result to a
//! response themselves.
//!
//! # Example
//!
//! ```no_run
//! use backup_validator::bridge::{ExecutionBridge, ParameterSet, PathResolver, ScriptRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bridge = ExecutionBridge::new(PathResolver::new("scripts"), ScriptRunner::default());
//!
//!     let params: ParameterSet = [("target", "db1")].into_iter().collect();
//!     let message = bridge.execute("check", &params, "127.0.0.1".parse()?).await?;
//!     println!("{}", message);
//!
//!     Ok(())
//! }
//! ```

mod marshal;
mod redact;
mod resolver;
mod runner;

pub use marshal::{is_sensitive, marshal, MarshalledArgs, ParameterSet};
pub use redact::redact;
pub use resolver::{validate_identifier, PathResolver, ResolveError, ScriptPath, SCRIPT_SUFFIXES};
pub use runner::{ExecutionOutcome, RunError, RunnerConfig, ScriptRunner, MAX_OUTPUT_SIZE};

use std::net::IpAddr;

use tracing::{debug, info, warn};

use crate::metrics;

/// Replacement for sensitive values in logs and responses
pub const MASK: &str = "********";

/// Message returned when a failing script printed nothing
pub const UNKNOWN_ERROR: &str = "Unknown error occurred";

/// Steps a request passes through; any of them may abort it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Resolving,
    Marshalling,
    Invoking,
    Redacting,
}

/// Error types for script execution
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Invalid script name")]
    InvalidIdentifier(String),

    #[error("Script {0} not found")]
    NotFound(String),

    #[error("Access denied")]
    AccessDenied(String),

    /// The script ran and exited non-zero. `message` is already redacted.
    #[error("{message}")]
    ExecutionFailure {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("Script {script} {source}")]
    Timeout {
        script: String,
        #[source]
        source: RunError,
    },

    #[error("{0}")]
    InternalFault(String),
}

impl BridgeError {
    /// Step at which this error aborts a request
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidIdentifier(_) => Stage::Validating,
            Self::NotFound(_) | Self::AccessDenied(_) => Stage::Resolving,
            Self::ExecutionFailure { .. } => Stage::Redacting,
            Self::Timeout { .. } | Self::InternalFault(_) => Stage::Invoking,
        }
    }
}

impl From<ResolveError> for BridgeError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidIdentifier(name) => Self::InvalidIdentifier(name),
            ResolveError::NotFound(name) => Self::NotFound(name),
            ResolveError::AccessDenied(path) => Self::AccessDenied(path.display().to_string()),
            ResolveError::Io(e) => Self::InternalFault(e.to_string()),
        }
    }
}

/// Orchestrates resolution, marshalling, invocation and redaction
///
/// Stateless across requests; share one instance behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ExecutionBridge {
    resolver: PathResolver,
    runner: ScriptRunner,
}

impl ExecutionBridge {
    pub fn new(resolver: PathResolver, runner: ScriptRunner) -> Self {
        Self { resolver, runner }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn runner(&self) -> &ScriptRunner {
        &self.runner
    }

    /// Run the named script with `params` on behalf of `caller`
    ///
    /// # Returns
    ///
    /// The redacted, trimmed stdout of a script that exited with code 0.
    ///
    /// # Errors
    ///
    /// Any [`BridgeError`]; a non-zero exit surfaces as `ExecutionFailure`
    /// carrying redacted stderr, else redacted stdout, else
    /// [`UNKNOWN_ERROR`].
    pub async fn execute(
        &self,
        identifier: &str,
        params: &ParameterSet,
        caller: IpAddr,
    ) -> Result<String, BridgeError> {
        let result = self.run_stages(identifier, params, caller).await;
        if let Err(e) = &result {
            debug!(script = identifier, stage = ?e.stage(), "Request aborted: {}", e);
        }
        result
    }

    async fn run_stages(
        &self,
        identifier: &str,
        params: &ParameterSet,
        caller: IpAddr,
    ) -> Result<String, BridgeError> {
        validate_identifier(identifier)?;

        let script = self.resolver.resolve(identifier)?;

        let args = marshal(&script, params);
        info!(caller = %caller, command = ?args.redacted, "Executing command");

        let active = metrics::ActiveScript::start();
        let result = self.runner.run(&args).await;
        drop(active);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e @ RunError::TimedOut(_)) => {
                return Err(BridgeError::Timeout {
                    script: identifier.to_string(),
                    source: e,
                })
            }
            Err(e) => return Err(BridgeError::InternalFault(e.to_string())),
        };

        metrics::SCRIPT_DURATION_SECONDS
            .with_label_values(&[identifier])
            .observe(outcome.duration.as_secs_f64());

        if outcome.success() {
            info!(script = identifier, "{}", outcome.summary());
            return Ok(redact(outcome.stdout.trim()));
        }

        warn!(script = identifier, "{}", outcome.summary());
        let message = [outcome.stderr.trim(), outcome.stdout.trim()]
            .into_iter()
            .find(|text| !text.is_empty())
            .map(redact)
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string());

        Err(BridgeError::ExecutionFailure {
            exit_code: outcome.exit_code,
            message,
        })
    }
}
