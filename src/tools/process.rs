//! Process execution for external tools
//!
//! Every terraform/helm/kubectl call goes through a [`CommandRunner`] so the
//! scenario logic can be exercised against a recording double.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::Tool;
use crate::common::{Error, Result};

/// A resolved invocation of one external tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Which tool this is
    pub tool: Tool,
    /// Executable to spawn
    pub program: PathBuf,
    /// Arguments from the tool config, placed before `args`
    pub prefix: Vec<String>,
    /// Tool arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    /// Command line as a reader would type it (`terraform apply ...`)
    pub fn command_line(&self) -> String {
        let mut line = self.tool.name().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// First argument, i.e. the tool subcommand
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Exit code 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Turn a non-zero exit into [`Error::ToolFailed`]
    pub fn into_result(self, invocation: &Invocation) -> Result<ToolOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::tool_failed(
                invocation.tool.name(),
                &invocation.command_line(),
                self.code,
                &self.combined(),
            ))
        }
    }
}

/// Executes tool invocations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. A non-zero exit is not an
    /// error at this level; only failing to spawn is.
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Runs invocations as real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        tracing::debug!(command = %invocation, cwd = ?invocation.cwd, "Running");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.prefix)
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| Error::ToolSpawn {
            command: invocation.command_line(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("Failed to get child stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("Failed to get child stderr".to_string()))?;

        let tool = invocation.tool.name();
        let stdout_task = tokio::spawn(collect_lines(stdout, tool, "stdout"));
        let stderr_task = tokio::spawn(collect_lines(stderr, tool, "stderr"));

        let status = child.wait().await?;
        let stdout = stdout_task
            .await
            .map_err(|e| Error::Internal(format!("stdout reader failed: {}", e)))?;
        let stderr = stderr_task
            .await
            .map_err(|e| Error::Internal(format!("stderr reader failed: {}", e)))?;

        tracing::debug!(command = %invocation, code = ?status.code(), "Finished");

        Ok(ToolOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Read a stream to the end, echoing each line to the log
///
/// Lines that are not valid UTF-8 are decoded lossily so the rest of the
/// stream is still drained and captured.
async fn collect_lines<R>(stream: R, tool: &'static str, source: &'static str) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut collected = String::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                tracing::debug!(target: "infra_harness::tool_output", tool, source, "{}", line);
                collected.push_str(line);
                collected.push('\n');
            }
            Err(e) => {
                tracing::warn!(tool, source, error = %e, "Failed to read tool output");
                break;
            }
        }
    }
    collected
}

/// Canned response for invocations whose command line contains `pattern`
#[derive(Debug, Clone)]
struct Response {
    pattern: String,
    output: ToolOutput,
    remaining: Option<u32>,
}

/// Records invocations instead of running them
///
/// Answers every call with success and empty output unless a response
/// registered with [`RecordingRunner::respond`] matches. Used by `plan`
/// and by tests.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Invocation>>,
    responses: Mutex<Vec<Response>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every matching invocation with `output`
    pub fn respond(&self, pattern: &str, output: ToolOutput) {
        self.push_response(pattern, output, None);
    }

    /// Answer the next `times` matching invocations with `output`
    pub fn respond_times(&self, pattern: &str, output: ToolOutput, times: u32) {
        self.push_response(pattern, output, Some(times));
    }

    fn push_response(&self, pattern: &str, output: ToolOutput, remaining: Option<u32>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(Response {
                pattern: pattern.to_string(),
                output,
                remaining,
            });
        }
    }

    /// Everything run so far, in order
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Command lines run so far, in order
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::command_line).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        let line = invocation.command_line();
        self.calls
            .lock()
            .map_err(|_| Error::Internal("recording runner poisoned".to_string()))?
            .push(invocation.clone());

        let mut responses = self
            .responses
            .lock()
            .map_err(|_| Error::Internal("recording runner poisoned".to_string()))?;
        for response in responses.iter_mut() {
            if !line.contains(&response.pattern) {
                continue;
            }
            match response.remaining {
                Some(0) => continue,
                Some(ref mut n) => *n -= 1,
                None => {}
            }
            return Ok(response.output.clone());
        }
        Ok(ToolOutput::ok(""))
    }
}
