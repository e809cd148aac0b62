// src/utils/streams.rs: running external tools and chaining their pipes
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};


#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChildStream {
    Stdout,
    Stderr,
}

/// Captured result of a finished tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub tool: String,
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// One process in a pipe chain.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStage {
    pub tool: String,
    pub args: Vec<String>,
}

impl PipelineStage {
    pub fn new(tool: &str, args: Vec<String>) -> Self {
        PipelineStage { tool: tool.to_string(), args }
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.tool.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}


/// Reads all lines from one of a child's output streams.
///
/// # Arguments
///
/// * `child` - Spawned child with the requested stream piped.
/// * `stream` - Which stream to drain.
///
/// # Returns
/// Vec of lines.
pub async fn read_child_output_to_vec(child: &mut Child, stream: ChildStream) -> Result<Vec<String>> {
    let mut lines_out = Vec::new();
    match stream {
        ChildStream::Stdout => {
            let stdout = child.stdout.take().ok_or_else(|| anyhow!("Child stdout was not piped"))?;
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                lines_out.push(line);
            }
        }
        ChildStream::Stderr => {
            let stderr = child.stderr.take().ok_or_else(|| anyhow!("Child stderr was not piped"))?;
            let mut lines = BufReader::new(stderr).lines();
            while let Some(line) = lines.next_line().await? {
                lines_out.push(line);
            }
        }
    }
    child.wait().await?;
    Ok(lines_out)
}


/// Runs a tool to completion, capturing stdout and stderr.
///
/// A spawn failure (tool not installed, bad cwd) is an error; a non-zero exit is not,
/// callers decide via `ToolOutput::success`.
pub async fn run_tool(tool: &str, args: &[String], cwd: Option<&Path>) -> Result<ToolOutput> {
    let mut cmd = Command::new(tool);
    cmd.args(args).stdin(Stdio::null());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    debug!("Running command {} {}", tool, args.join(" "));
    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to spawn {}. Is it installed?", tool))?;

    Ok(ToolOutput {
        tool: tool.to_string(),
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}


/// Logs a warning with stderr when a tool exited non-zero.
///
/// # Returns
/// true if the tool succeeded.
pub fn warn_on_failure(output: &ToolOutput, what: &str) -> bool {
    if output.success() {
        return true;
    }
    warn!("{} returned non-zero exit code ({})", what, output.status);
    warn!("Stderr: {}", output.stderr.trim_end());
    false
}


/// Spawns `stages` as a shell-style pipe chain and waits for every process.
///
/// Each stage's stdout feeds the next stage's stdin. The last stage writes to
/// `final_stdout` when given, otherwise its stdout is discarded. Stderr of every
/// stage is discarded.
///
/// # Returns
/// (tool, exit status) for each stage, in chain order.
pub async fn run_pipeline(stages: &[PipelineStage], final_stdout: Option<&Path>) -> Result<Vec<(String, ExitStatus)>> {
    if stages.is_empty() {
        return Err(anyhow!("Cannot run an empty pipeline"));
    }

    let mut children: Vec<(String, Child)> = Vec::with_capacity(stages.len());
    let last = stages.len() - 1;

    for (i, stage) in stages.iter().enumerate() {
        let stdin: Stdio = match children.last_mut() {
            Some((prev_tool, prev)) => {
                let prev_stdout = prev
                    .stdout
                    .take()
                    .ok_or_else(|| anyhow!("Stdout of {} was not piped", prev_tool))?;
                prev_stdout.try_into()?
            }
            None => Stdio::null(),
        };

        let stdout: Stdio = if i < last {
            Stdio::piped()
        } else {
            match final_stdout {
                Some(path) => {
                    let file = std::fs::File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    Stdio::from(file)
                }
                None => Stdio::null(),
            }
        };

        debug!("Pipeline stage {}: {}", i, stage.command_line());
        let child = Command::new(&stage.tool)
            .args(&stage.args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}. Is it installed?", stage.tool))?;
        children.push((stage.tool.clone(), child));
    }

    let mut statuses = Vec::with_capacity(children.len());
    for (tool, mut child) in children {
        let status = child.wait().await?;
        statuses.push((tool, status));
    }
    Ok(statuses)
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_run_tool_captures_stdout() -> Result<()> {
        let output = run_tool("echo", &["hello".to_string()], None).await?;
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        Ok(())
    }

    #[tokio::test]
    async fn test_run_tool_non_zero_is_not_an_error() -> Result<()> {
        let output = run_tool("false", &[], None).await?;
        assert!(!output.success());
        assert!(!warn_on_failure(&output, "false"));
        Ok(())
    }

    #[tokio::test]
    async fn test_run_tool_missing_binary() {
        let result = run_tool("betaduck-no-such-tool", &[], None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pipeline_chains_stdout() -> Result<()> {
        let dir = tempdir()?;
        let out = dir.path().join("out.txt");
        let stages = vec![
            PipelineStage::new("echo", vec!["chained".to_string()]),
            PipelineStage::new("cat", vec![]),
            PipelineStage::new("cat", vec![]),
        ];
        let statuses = run_pipeline(&stages, Some(&out)).await?;
        assert_eq!(statuses.len(), 3);
        assert!(statuses.iter().all(|(_, s)| s.success()));
        assert_eq!(std::fs::read_to_string(&out)?.trim(), "chained");
        Ok(())
    }

    #[tokio::test]
    async fn test_pipeline_reports_failing_stage() -> Result<()> {
        let stages = vec![
            PipelineStage::new("echo", vec!["x".to_string()]),
            PipelineStage::new("false", vec![]),
        ];
        let statuses = run_pipeline(&stages, None).await?;
        assert_eq!(statuses[1].0, "false");
        assert!(!statuses[1].1.success());
        Ok(())
    }

    #[tokio::test]
    async fn test_read_child_output_to_vec() -> Result<()> {
        let mut child = Command::new("printf")
            .arg("a\\nb\\n")
            .stdout(Stdio::piped())
            .spawn()?;
        let lines = read_child_output_to_vec(&mut child, ChildStream::Stdout).await?;
        assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);
        Ok(())
    }
}
