use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::config::RunnerSpec;

use super::driver::{self, CASE_FILE};
use super::{RunArtifact, RunLimits};

/// Extra wall budget on top of the per-case limit, absorbing interpreter
/// startup so short submissions are not charged for it.
const STARTUP_GRACE_MS: u64 = 500;

/// Cap on captured stderr; only a tail of it ever reaches a diagnostic.
const STDERR_CAP: usize = 64 * 1024;

/// Executes candidate code in a throwaway subprocess per test case
///
/// Every run gets a fresh working directory holding exactly three files: the
/// candidate source, the fixed driver for the language and the JSON case
/// payload. The child is detached into its own process group with a cleared
/// environment, null stdin and kernel resource limits, so a timeout can kill
/// the whole group and one run can never observe another.
pub struct ProcessRunner {
    /// Unique identifier for this instance
    id: u8,
    /// Root under which per-case directories are created
    work_root: PathBuf,
    /// Monotonic counter naming per-case directories
    run_seq: AtomicU64,
}

impl ProcessRunner {
    pub fn build(id: u8) -> Result<Self> {
        // Keyed by process id as well, so two service instances on one
        // host never share a work root
        let work_root = std::env::temp_dir()
            .join("dojo-sandbox")
            .join(format!("{}-{id}", std::process::id()));
        if work_root.exists() {
            fs::remove_dir_all(&work_root)?;
        }
        fs::create_dir_all(&work_root)?;

        log::info!("ProcessRunner {id} initialized at {}", work_root.display());

        Ok(Self {
            id,
            work_root,
            run_seq: AtomicU64::new(0),
        })
    }

    /// Runs the candidate's entry point against one test input.
    ///
    /// Returns the raw artifact of the run; interpreting it into a verdict is
    /// the caller's concern. An `Err` here means the judge itself could not
    /// stage or spawn the run, never that the candidate failed.
    pub async fn run_case(
        &self,
        spec: &RunnerSpec,
        function: &str,
        code: &str,
        input: &Value,
        limits: &RunLimits,
    ) -> Result<RunArtifact> {
        let case_dir = self.create_case_dir()?;
        let result = self
            .run_in_dir(&case_dir, spec, function, code, input, limits)
            .await;
        if let Err(e) = fs::remove_dir_all(&case_dir) {
            log::warn!(
                "Runner {}: failed to remove case dir {}: {e}",
                self.id,
                case_dir.display()
            );
        }
        result
    }

    fn create_case_dir(&self) -> Result<PathBuf> {
        let seq = self.run_seq.fetch_add(1, Ordering::Relaxed);
        let case_dir = self.work_root.join(format!("run-{seq}"));
        if case_dir.exists() {
            // Leftover from a predecessor that died mid-run
            fs::remove_dir_all(&case_dir)?;
        }
        fs::create_dir_all(&case_dir)?;
        Ok(case_dir)
    }

    async fn run_in_dir(
        &self,
        case_dir: &Path,
        spec: &RunnerSpec,
        function: &str,
        code: &str,
        input: &Value,
        limits: &RunLimits,
    ) -> Result<RunArtifact> {
        stage_case(case_dir, spec, function, code, input)?;

        let mut cmd = build_command(case_dir, spec, limits)?;
        let mut child = cmd.spawn().with_context(|| {
            format!("failed to spawn runner process for language {}", spec.name)
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("runner stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("runner stderr was not captured"))?;

        // Both pipes are drained concurrently with the wait so the child can
        // never block on a full pipe while we block on it.
        let stdout_task = tokio::spawn(read_capped(stdout, limits.output_limit));
        let stderr_task = tokio::spawn(read_capped(stderr, STDERR_CAP));

        let wall_budget = limits.wall_time + std::time::Duration::from_millis(STARTUP_GRACE_MS);
        let started = Instant::now();

        let (status, timed_out) = match timeout(wall_budget, child.wait()).await {
            Ok(status) => (
                status.context("failed to wait for runner process")?,
                false,
            ),
            Err(_) => {
                kill_process_group(&child);
                let _ = child.start_kill();
                let status = child
                    .wait()
                    .await
                    .context("failed to reap runner process after timeout")?;
                (status, true)
            }
        };

        let wall_time_us = started.elapsed().as_micros().min(u128::from(u32::MAX)) as u32;

        let (stdout, stdout_truncated) = stdout_task
            .await
            .unwrap_or_else(|_| (String::new(), false));
        let (stderr, _) = stderr_task
            .await
            .unwrap_or_else(|_| (String::new(), false));

        Ok(RunArtifact {
            status,
            stdout,
            stderr,
            wall_time_us,
            timed_out,
            stdout_truncated,
        })
    }
}

/// Writes the three staged files for one run.
///
/// The case payload travels as serialized JSON; no part of the candidate code
/// or the test data is ever concatenated into the driver source.
fn stage_case(
    case_dir: &Path,
    spec: &RunnerSpec,
    function: &str,
    code: &str,
    input: &Value,
) -> Result<()> {
    let kind = spec.driver;
    fs::write(case_dir.join(kind.source_name()), format!("{code}\n"))?;
    fs::write(case_dir.join(kind.driver_name()), kind.template())?;

    let payload = driver::case_payload(function, input);
    fs::write(case_dir.join(CASE_FILE), serde_json::to_vec(&payload)?)?;

    Ok(())
}

fn build_command(case_dir: &Path, spec: &RunnerSpec, limits: &RunLimits) -> Result<Command> {
    let argv: Vec<String> = spec
        .command
        .iter()
        .map(|part| part.replace("%DRIVER%", spec.driver.driver_name()))
        .collect();
    let program = argv
        .first()
        .ok_or_else(|| anyhow!("runner command for language {} is empty", spec.name))?;

    let mut cmd = Command::new(program);
    cmd.args(&argv[1..])
        .current_dir(case_dir)
        .env_clear()
        .env("PATH", "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        let cpu_secs = limits.cpu_secs;
        let memory_kb = limits.memory_kb;
        let file_cap = limits.output_limit as u64;
        let setup = move || -> std::io::Result<()> {
            // SAFETY: setsid carries no arguments and is async-signal-safe.
            if unsafe { libc::setsid() } == -1 {
                return Err(std::io::Error::last_os_error());
            }
            let set = |resource, value: u64| {
                let limit = libc::rlimit {
                    rlim_cur: value as libc::rlim_t,
                    rlim_max: value as libc::rlim_t,
                };
                // SAFETY: setrlimit only reads the limit struct.
                if unsafe { libc::setrlimit(resource, &limit) } == 0 {
                    Ok(())
                } else {
                    Err(std::io::Error::last_os_error())
                }
            };
            set(libc::RLIMIT_CPU, cpu_secs)?;
            set(libc::RLIMIT_CORE, 0)?;
            set(libc::RLIMIT_FSIZE, file_cap)?;
            set(libc::RLIMIT_NOFILE, 64)?;
            // Generous enough for interpreter threads; a fork bomb still
            // hits the ceiling and the group kill reaps whatever spawned.
            set(libc::RLIMIT_NPROC, 4096)?;
            if let Some(kb) = memory_kb {
                set(libc::RLIMIT_AS, kb.saturating_mul(1024))?;
            }
            Ok(())
        };
        // SAFETY: `setup` only performs async-signal-safe operations between
        // fork and exec.
        unsafe {
            cmd.pre_exec(setup);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = limits;
    }

    Ok(cmd)
}

/// Kills the child's whole process group so grandchildren die with it.
///
/// The child was made a session leader in pre_exec, so its pid doubles as the
/// process group id.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Reads a stream to the end, keeping at most `cap` bytes.
///
/// Past the cap the stream is still drained so the writer never stalls on a
/// full pipe; the overflow is discarded and flagged.
async fn read_capped<R: AsyncRead + Unpin>(mut source: R, cap: usize) -> (String, bool) {
    let mut buf = Vec::with_capacity(1024);
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match source.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = n.min(cap - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    (String::from_utf8_lossy(&buf).into_owned(), truncated)
}
