mod driver;
mod process_runner;

pub use driver::case_payload;
pub use process_runner::ProcessRunner;

use std::process::ExitStatus;
use std::time::Duration;

use crate::config::LimitsConfig;

/// Raw capture of one sandboxed driver run
///
/// The artifact records exactly what the process did: its exit status, the
/// captured (possibly truncated) output streams, the measured wall time and
/// whether the run was cut off at the wall-clock budget. Interpretation into
/// a verdict happens elsewhere.
#[derive(Debug)]
pub struct RunArtifact {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub wall_time_us: u32,
    pub timed_out: bool,
    pub stdout_truncated: bool,
}

/// Per-run resource bounds, resolved once from the service configuration.
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Wall-clock budget for one test case
    pub wall_time: Duration,
    /// CPU-seconds backstop enforced with RLIMIT_CPU
    pub cpu_secs: u64,
    /// Address-space cap in kilobytes; unlimited when absent
    pub memory_kb: Option<u64>,
    /// Cap on captured stdout and on files the candidate writes
    pub output_limit: usize,
}

impl RunLimits {
    pub fn from_config(limits: &LimitsConfig) -> Self {
        RunLimits {
            wall_time: Duration::from_millis(limits.time_limit_ms),
            cpu_secs: limits.time_limit_ms.div_ceil(1000) + 1,
            memory_kb: limits.memory_limit_kb,
            output_limit: limits.output_limit_bytes as usize,
        }
    }
}
