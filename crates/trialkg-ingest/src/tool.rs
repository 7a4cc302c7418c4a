//! Running external annotation tools (Java NLP pipelines) with a deadline.
//!
//! A tool is described by a [`ToolSpec`]: the program, its argument template
//! (`{input}` / `{output}` placeholders are substituted per call) and a
//! timeout, five minutes unless configured. Timeouts and non-zero exits come
//! back as [`ToolOutcome`] values; only spawn/IO problems are errors at this
//! layer.
//!
//! On unix the tool runs in its own process group and the whole group is
//! killed at the deadline, so wrapper scripts cannot leave a grandchild
//! holding the output pipes open.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use crate::error::{IngestError, IngestResult};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long output collection may outlast the child before it is abandoned.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;

pub fn default_timeout_secs() -> Option<u64> {
    Some(DEFAULT_TOOL_TIMEOUT_SECS)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds before the child is killed; `None` waits indefinitely.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<u64>,
}

impl ToolSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Argument list with `{input}` and `{output}` substituted.
    pub fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let (input, output) = (input.display().to_string(), output.display().to_string());
        self.args
            .iter()
            .map(|a| a.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }

    pub fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.render_args(input, output));
        cmd
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success { stdout: String, stderr: String },
    Timeout { after: Duration },
    NonZeroExit { code: Option<i32>, stderr: String },
}

impl ToolOutcome {
    /// Map timeouts and failing exits to [`IngestError::ExternalTool`].
    pub fn into_result(self, tool: &str) -> IngestResult<String> {
        match self {
            ToolOutcome::Success { stdout, .. } => Ok(stdout),
            ToolOutcome::Timeout { after } => Err(IngestError::ExternalTool {
                tool: tool.to_string(),
                reason: format!("timed out after {}s", after.as_secs()),
            }),
            ToolOutcome::NonZeroExit { code, stderr } => Err(IngestError::ExternalTool {
                tool: tool.to_string(),
                reason: match code {
                    Some(code) => format!("exit status {code}: {}", stderr.trim()),
                    None => format!("terminated by signal: {}", stderr.trim()),
                },
            }),
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// A drain thread's output, or `None` if the pipe is still open at
/// `deadline` (held by some process other than the tool itself).
fn collect(rx: &Receiver<String>, deadline: Option<Instant>) -> Option<String> {
    match deadline {
        Some(deadline) => rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .ok(),
        None => rx.recv().ok(),
    }
}

#[cfg(unix)]
fn isolate(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    // The child leads its own group (see `isolate`); a negative pid signals
    // every member.
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: kill(2) has no memory-safety preconditions.
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

fn poll_until(child: &mut Child, deadline: Option<Instant>, tool: &str) -> IngestResult<bool> {
    let Some(deadline) = deadline else {
        return Ok(true);
    };
    loop {
        let polled = child.try_wait().map_err(|source| IngestError::Spawn {
            tool: tool.to_string(),
            source,
        })?;
        if polled.is_some() {
            return Ok(true);
        }
        if Instant::now() > deadline {
            kill_tree(child);
            return Ok(false);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Run `cmd` to completion or until `timeout` elapses, capturing output.
pub fn run_with_timeout(
    mut cmd: Command,
    timeout: Option<Duration>,
    tool: &str,
) -> IngestResult<ToolOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate(&mut cmd);
    let started = Instant::now();
    let deadline = timeout.map(|t| started + t);
    let mut child = cmd.spawn().map_err(|source| IngestError::Spawn {
        tool: tool.to_string(),
        source,
    })?;
    // Pipes are drained concurrently so a chatty child cannot block on a
    // full buffer while we poll.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let finished = poll_until(&mut child, deadline, tool)?;
    let status = child.wait().map_err(|source| IngestError::Spawn {
        tool: tool.to_string(),
        source,
    })?;

    if !finished {
        let grace = Some(Instant::now() + DRAIN_GRACE);
        let _ = (collect(&stdout, grace), collect(&stderr, grace));
        let after = timeout.unwrap_or_default();
        tracing::warn!(
            tool,
            secs = after.as_secs(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "external tool timed out"
        );
        return Ok(ToolOutcome::Timeout { after });
    }

    let grace = deadline.map(|d| d + DRAIN_GRACE);
    let (mut out, mut err) = (collect(&stdout, grace), collect(&stderr, grace));
    if out.is_none() || err.is_none() {
        tracing::warn!(tool, "processes left behind by the tool hold its output open, killing them");
        kill_tree(&mut child);
        let after_kill = Some(Instant::now() + DRAIN_GRACE);
        out = out.or_else(|| collect(&stdout, after_kill));
        err = err.or_else(|| collect(&stderr, after_kill));
    }
    let (stdout, stderr) = (out.unwrap_or_default(), err.unwrap_or_default());
    if status.success() {
        Ok(ToolOutcome::Success { stdout, stderr })
    } else {
        tracing::warn!(tool, code = ?status.code(), "external tool exited with failure");
        Ok(ToolOutcome::NonZeroExit {
            code: status.code(),
            stderr,
        })
    }
}

/// Run a [`ToolSpec`] against an input/output path pair.
pub fn run_tool(spec: &ToolSpec, input: &Path, output: &Path) -> IngestResult<ToolOutcome> {
    tracing::debug!(program = %spec.program, input = %input.display(), "running external tool");
    run_with_timeout(spec.command(input, output), spec.timeout(), &spec.program)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn renders_placeholders() {
        let spec = ToolSpec::new("java", &["-i", "{input}", "-o", "{output}/out"]);
        let args = spec.render_args(Path::new("/tmp/in.txt"), Path::new("/tmp/o"));
        assert_eq!(args, vec!["-i", "/tmp/in.txt", "-o", "/tmp/o/out"]);
    }

    #[test]
    fn captures_stdout_on_success() {
        let outcome = run_with_timeout(sh("echo hello; echo warn >&2"), None, "sh").unwrap();
        assert_eq!(
            outcome,
            ToolOutcome::Success {
                stdout: "hello\n".to_string(),
                stderr: "warn\n".to_string()
            }
        );
    }

    #[test]
    fn non_zero_exit_is_reported() {
        let outcome =
            run_with_timeout(sh("echo boom >&2; exit 3"), Some(Duration::from_secs(10)), "sh")
                .unwrap();
        assert!(matches!(
            outcome,
            ToolOutcome::NonZeroExit { code: Some(3), .. }
        ));
        let err = outcome.into_result("sh").unwrap_err();
        assert!(err.to_string().contains("exit status 3"));
    }

    #[test]
    fn slow_tool_is_killed_at_deadline() {
        let start = Instant::now();
        let outcome = run_with_timeout(sh("exec sleep 5"), Some(Duration::from_millis(200)), "sh").unwrap();
        assert!(matches!(outcome, ToolOutcome::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(matches!(
            outcome.into_result("sh"),
            Err(IngestError::ExternalTool { .. })
        ));
    }

    #[test]
    fn wrapper_script_children_are_killed_with_it() {
        // No `exec`: `sleep` is a grandchild that inherits the output pipes.
        let start = Instant::now();
        let outcome =
            run_with_timeout(sh("sleep 3; echo done"), Some(Duration::from_millis(200)), "sh")
                .unwrap();
        assert_eq!(
            outcome,
            ToolOutcome::Timeout {
                after: Duration::from_millis(200)
            }
        );
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn background_grandchild_cannot_hold_a_finished_tool() {
        // The tool exits at once but leaves a process writing to its pipes.
        let start = Instant::now();
        let outcome = run_with_timeout(
            sh("(sleep 3; echo late) & echo early"),
            Some(Duration::from_millis(300)),
            "sh",
        )
        .unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(
            outcome,
            ToolOutcome::Success {
                stdout: "early\n".to_string(),
                stderr: String::new()
            }
        );
    }

    #[test]
    fn specs_are_bounded_by_default() {
        assert_eq!(
            ToolSpec::new("java", &[]).timeout(),
            Some(Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS))
        );
        let spec: ToolSpec = serde_json::from_str(r#"{"program": "c2q"}"#).unwrap();
        assert_eq!(spec.timeout_secs, Some(DEFAULT_TOOL_TIMEOUT_SECS));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let spec = ToolSpec::new("/definitely/not/a/program", &[]);
        assert!(matches!(
            run_tool(&spec, Path::new("in"), Path::new("out")),
            Err(IngestError::Spawn { .. })
        ));
    }
}
