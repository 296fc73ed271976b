//! Script Runner
//!
//! Spawns resolved scripts as child processes and captures their output.
//! Processes are always started from a discrete argument vector, never
//! through a shell.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command as TokioCommand;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::marshal::MarshalledArgs;

/// Maximum captured output size in bytes (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Error types for script invocation
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to spawn process {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to collect process output: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("Execution slots closed")]
    Closed,
}

/// Captured result of one script invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Exit code (None if the process was killed by a signal)
    pub exit_code: Option<i32>,

    /// Standard output (truncated if too large)
    pub stdout: String,

    /// Standard error (truncated if too large)
    pub stderr: String,

    /// Wall-clock duration
    pub duration: Duration,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} (exit code: {:?}, {:.0}ms, {} bytes output)",
            if self.success() { "Success" } else { "Failed" },
            self.exit_code,
            self.duration.as_secs_f64() * 1000.0,
            self.stdout.len() + self.stderr.len()
        )
    }
}

/// Configuration for script execution
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Deadline per invocation (default: none)
    pub timeout: Option<Duration>,

    /// Maximum captured size per stream in bytes (default: 1MB)
    pub max_output_size: usize,

    /// Cap on simultaneously running scripts (default: unbounded)
    pub max_concurrent: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            max_output_size: MAX_OUTPUT_SIZE,
            max_concurrent: None,
        }
    }
}

impl RunnerConfig {
    /// Create a runner config with a deadline
    pub fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            timeout: Some(Duration::from_secs(timeout_secs)),
            ..Default::default()
        }
    }

    /// Create a runner config with a custom output limit
    pub fn with_max_output_size(size: usize) -> Self {
        Self {
            max_output_size: size,
            ..Default::default()
        }
    }
}

/// Runs marshalled scripts
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    config: RunnerConfig,
    slots: Option<Arc<Semaphore>>,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

impl ScriptRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let slots = config
            .max_concurrent
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        Self { config, slots }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run the script and wait for it to exit
    ///
    /// Waits for a free slot first when a concurrency cap is configured.
    /// The child is killed if the deadline passes or the returned future is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The process fails to spawn
    /// - Output collection fails
    /// - The deadline passes
    pub async fn run(&self, args: &MarshalledArgs) -> Result<ExecutionOutcome, RunError> {
        let _permit = match &self.slots {
            Some(slots) => Some(slots.acquire().await.map_err(|_| RunError::Closed)?),
            None => None,
        };

        let start = Instant::now();

        let mut process = TokioCommand::new(args.program());
        process
            .args(args.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = process.spawn().map_err(|source| RunError::Spawn {
            program: args.program().to_string(),
            source,
        })?;

        let output = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    // Dropping the wait future drops the child, which kills it.
                    warn!(program = args.program(), "Script timed out after {:?}", limit);
                    return Err(RunError::TimedOut(limit));
                }
            },
            None => child.wait_with_output().await?,
        };

        let outcome = ExecutionOutcome {
            exit_code: output.status.code(),
            stdout: truncate_string(
                String::from_utf8_lossy(&output.stdout).into_owned(),
                self.config.max_output_size,
            ),
            stderr: truncate_string(
                String::from_utf8_lossy(&output.stderr).into_owned(),
                self.config.max_output_size,
            ),
            duration: start.elapsed(),
        };

        debug!(program = args.program(), "{}", outcome.summary());
        Ok(outcome)
    }
}

/// Truncate a string to a maximum length, adding ellipsis if truncated
fn truncate_string(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len.saturating_sub(3);
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}
