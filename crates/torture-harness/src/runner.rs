//! Subprocess execution for one unit.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command as ProcessCommand;
use tracing::debug;

use crate::stage::Command;
use crate::unit::{ExecutionResult, TestUnit, UnitStatus};

/// Run `command` for `unit`, killing it once `timeout` elapses.
///
/// Never returns an error: launch failures, non-zero exits, failed
/// follow-up renames and timeouts all become a failing [`UnitStatus`].
pub async fn run_command(
    unit: TestUnit,
    command: &Command,
    timeout: Option<Duration>,
) -> ExecutionResult {
    let start = Instant::now();
    let command_line = command.render();
    debug!(unit = %unit.name(), command = %command_line, "Running unit");

    let mut process = ProcessCommand::new(&command.program);
    process
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &command.cwd {
        process.current_dir(cwd);
    }

    let finish = |status: UnitStatus, output: String| ExecutionResult {
        unit: unit.clone(),
        status,
        output,
        duration_ms: start.elapsed().as_millis() as u64,
        command_line: command_line.clone(),
    };

    let child = match process.spawn() {
        Ok(child) => child,
        Err(e) => {
            return finish(
                UnitStatus::Failed { exit_code: None },
                format!("failed to launch {}: {}", command.program.display(), e),
            )
        }
    };

    // Dropping the pending future on timeout drops the child, which kills it.
    let waited = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(waited) => waited,
            Err(_) => {
                let limit_ms = limit.as_millis() as u64;
                return finish(
                    UnitStatus::TimedOut { limit_ms },
                    format!("timed out after {} ms", limit_ms),
                );
            }
        },
        None => child.wait_with_output().await,
    };

    let output = match waited {
        Ok(output) => output,
        Err(e) => {
            return finish(
                UnitStatus::Failed { exit_code: None },
                format!("failed waiting for {}: {}", command.program.display(), e),
            )
        }
    };

    let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
    captured.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return finish(
            UnitStatus::Failed {
                exit_code: output.status.code(),
            },
            captured,
        );
    }

    if let Some(follow_up) = &command.follow_up {
        if let Err(e) = tokio::fs::rename(&follow_up.from, &follow_up.to).await {
            captured.push_str(&format!(
                "\nfailed to move {} to {}: {}",
                follow_up.from.display(),
                follow_up.to.display(),
                e
            ));
            return finish(UnitStatus::Failed { exit_code: Some(0) }, captured);
        }
    }

    finish(UnitStatus::Passed, captured)
}
