use serde::Deserialize;

use ::windows::Win32::Foundation::CloseHandle;
use ::windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

use super::new_command;
use crate::error::{Result, ShellError};
use crate::reaper::ProcessEntry;

const PROCESS_QUERY: &str = "Get-CimInstance Win32_Process | \
    Select-Object ProcessId,ExecutablePath,CommandLine | \
    ConvertTo-Json -Compress";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Win32Process {
    process_id: u32,
    executable_path: Option<String>,
    command_line: Option<String>,
}

// ConvertTo-Json emits a bare object when there is a single row.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Snapshot {
    Many(Vec<Win32Process>),
    One(Win32Process),
}

/// Snapshot the process table through PowerShell's CIM query.
pub fn list_processes() -> Result<Vec<ProcessEntry>> {
    let output = new_command("powershell")
        .args(["-NoProfile", "-NonInteractive", "-Command", PROCESS_QUERY])
        .output()
        .or_else(|_| {
            new_command("pwsh")
                .args(["-NoProfile", "-NonInteractive", "-Command", PROCESS_QUERY])
                .output()
        })
        .map_err(|e| ShellError::ProcessScan(format!("failed to execute PowerShell: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ShellError::ProcessScan(format!(
            "PowerShell process query failed: {stderr}"
        )));
    }

    parse_snapshot(&String::from_utf8_lossy(&output.stdout))
}

fn parse_snapshot(stdout: &str) -> Result<Vec<ProcessEntry>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let rows = match serde_json::from_str::<Snapshot>(trimmed)
        .map_err(|e| ShellError::ProcessScan(format!("unreadable process snapshot: {e}")))?
    {
        Snapshot::Many(rows) => rows,
        Snapshot::One(row) => vec![row],
    };

    Ok(rows.into_iter().filter_map(to_entry).collect())
}

fn to_entry(row: Win32Process) -> Option<ProcessEntry> {
    let mut tokens = split_command_line(row.command_line.as_deref().unwrap_or_default());
    let first = if tokens.is_empty() {
        None
    } else {
        Some(tokens.remove(0))
    };
    let command = row.executable_path.or(first)?;

    Some(ProcessEntry {
        pid: row.process_id,
        command,
        arguments: tokens,
    })
}

/// Whitespace split that keeps double-quoted runs together.
fn split_command_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Terminate `pid` with `TerminateProcess`.
pub fn terminate(pid: u32) -> Result<()> {
    let reap_error = |e: ::windows::core::Error| ShellError::Reap {
        pid,
        reason: e.to_string(),
    };

    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, false, pid).map_err(reap_error)?;
        let outcome = TerminateProcess(handle, 1);
        let _ = CloseHandle(handle);
        outcome.map_err(reap_error)
    }
}
