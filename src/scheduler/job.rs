//! Job bodies run under a lock.

use crate::error::{LeaseError, Result};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;

/// Maximum stderr lines kept in a failed command's error.
const STDERR_MAX_LINES: usize = 20;

/// Maximum stderr characters kept in a failed command's error.
const STDERR_MAX_CHARS: usize = 2_000;

/// Summary a job hands back for logging. The scheduler does not interpret it
/// beyond the counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobReport {
    /// Items looked at.
    pub total: u64,
    /// Items changed.
    pub updated: u64,
    /// Items that failed.
    pub errors: u64,
    /// One line per failed item.
    pub error_details: Vec<String>,
}

/// Periodic unit of work protected by a lock.
///
/// Several replicas may schedule the same job; the scheduler only runs it
/// on the one holding the job's lock. Bodies should still be idempotent,
/// since a lease can expire while a slow run is in progress.
#[async_trait]
pub trait Job: Send + Sync {
    /// Name used in logs and lock metadata.
    fn name(&self) -> &str;

    async fn run(&self) -> anyhow::Result<JobReport>;
}

/// Job that runs an external command.
///
/// The command is split with shell quoting rules and executed directly (no
/// shell). A non-zero exit fails the run. If the last non-empty stdout line
/// is a JSON object it is read as the [`JobReport`]; otherwise the report is
/// empty.
#[derive(Debug, Clone)]
pub struct CommandJob {
    name: String,
    command: String,
    program: String,
    args: Vec<String>,
}

impl CommandJob {
    pub fn parse(name: &str, command: &str) -> Result<Self> {
        let command = command.trim();
        let parts = shell_words::split(command).map_err(|e| {
            LeaseError::UserError(format!(
                "failed to parse job command '{}': {}\n\
                 Fix: check for unmatched quotes or invalid escape sequences.",
                command, e
            ))
        })?;

        let Some((program, args)) = parts.split_first() else {
            return Err(LeaseError::UserError(format!(
                "job command is empty after parsing: '{}'",
                command
            )));
        };

        Ok(Self {
            name: name.to_string(),
            command: command.to_string(),
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl Job for CommandJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<JobReport> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| {
                format!(
                    "failed to execute '{}'\nFix: ensure the command is installed and in PATH.",
                    self.command
                )
            })?;

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = truncate_output(&stderr, STDERR_MAX_LINES, STDERR_MAX_CHARS);
            if tail.is_empty() {
                anyhow::bail!("command '{}' failed with exit code {}", self.command, exit_code);
            }
            anyhow::bail!(
                "command '{}' failed with exit code {}\n{}",
                self.command,
                exit_code,
                tail
            );
        }

        Ok(parse_report(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Read the last non-empty line as a report, if it is one.
pub(crate) fn parse_report(stdout: &str) -> JobReport {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| serde_json::from_str::<JobReport>(line).ok())
        .unwrap_or_default()
}

/// Keep the last `max_lines` lines, then at most the last `max_chars` chars.
fn truncate_output(output: &str, max_lines: usize, max_chars: usize) -> String {
    let lines: Vec<&str> = output.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    let result = lines[start..].join("\n");

    let char_count = result.chars().count();
    if char_count <= max_chars {
        return result;
    }
    let tail: String = result.chars().skip(char_count - max_chars).collect();
    format!("...(truncated)...\n{}", tail)
}
