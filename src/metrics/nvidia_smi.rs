// nvidia-smi telemetry source
//
// Runs the NVIDIA System Management Interface once per cycle and returns its
// CSV output untouched. The query asks for exactly the columns the parser
// expects, in the order it expects them.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{CollectError, GpuSource};

const DEFAULT_PROGRAM: &str = "nvidia-smi";

const QUERY_ARGS: [&str; 2] = [
    "--query-gpu=index,utilization.gpu,memory.used,memory.total,temperature.gpu,power.draw",
    "--format=csv,noheader,nounits",
];

/// GPU source backed by the `nvidia-smi` command line tool
///
/// # Requirements
/// - NVIDIA driver installed
/// - `nvidia-smi` reachable on `PATH` (or an explicit path via [`NvidiaSmi::with_program`])
pub struct NvidiaSmi {
    program: String,
    args: Vec<String>,
}

impl NvidiaSmi {
    /// Creates a source that runs `nvidia-smi` from `PATH`
    pub fn new() -> Self {
        Self::with_program(DEFAULT_PROGRAM)
    }

    /// Creates a source that runs the given binary with the standard query
    pub fn with_program(program: impl Into<String>) -> Self {
        NvidiaSmi {
            program: program.into(),
            args: QUERY_ARGS.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    /// Replaces the argument list. Used to point the source at a stand-in
    /// command that prints canned output.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl GpuSource for NvidiaSmi {
    fn name(&self) -> &str {
        &self.program
    }

    async fn query(&self) -> Result<String, CollectError> {
        debug!("Running {} {}", self.program, self.args.join(" "));

        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CollectError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CollectError::ToolFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| CollectError::InvalidOutput {
            program: self.program.clone(),
        })
    }
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::new()
    }
}
