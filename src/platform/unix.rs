use std::process::Command;

use crate::error::{Result, ShellError};
use crate::reaper::ProcessEntry;

/// Snapshot the process table with `ps`.
pub fn list_processes() -> Result<Vec<ProcessEntry>> {
    let output = Command::new("ps")
        .args(["-eo", "pid=,args="])
        .output()
        .map_err(|e| ShellError::ProcessScan(format!("failed to execute ps: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ShellError::ProcessScan(if stderr.is_empty() {
            "ps exited with an error".to_string()
        } else {
            format!("ps failed: {stderr}")
        }));
    }

    Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `ps -eo pid=,args=` rows. Lines that do not start with a pid
/// followed by a command are skipped.
pub(crate) fn parse_ps_output(stdout: &str) -> Vec<ProcessEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let pid = tokens.next()?.parse::<u32>().ok()?;
            let command = tokens.next()?.to_string();
            Some(ProcessEntry {
                pid,
                command,
                arguments: tokens.map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Send SIGTERM to `pid`.
pub fn terminate(pid: u32) -> Result<()> {
    let raw = i32::try_from(pid).map_err(|_| ShellError::Reap {
        pid,
        reason: "pid out of range".to_string(),
    })?;

    if unsafe { libc::kill(raw, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(ShellError::Reap {
            pid,
            reason: std::io::Error::last_os_error().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pid_command_and_arguments() {
        let out = "    1 /sbin/init splash\n\
                   4242 /opt/terminusdb/swipl /opt/terminusdb/start.pl serve\n\
                   \n\
                   garbage line\n\
                   77 bash\n";

        let rows = parse_ps_output(out);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].pid, 4242);
        assert_eq!(rows[1].command, "/opt/terminusdb/swipl");
        assert_eq!(rows[1].arguments, vec!["/opt/terminusdb/start.pl", "serve"]);
        assert!(rows[2].arguments.is_empty());
    }

    #[test]
    fn terminating_a_missing_process_reports_an_error() {
        // pid_max on Linux tops out well below this value.
        let err = terminate(i32::MAX as u32).unwrap_err();
        assert!(matches!(err, ShellError::Reap { .. }));
    }

    #[test]
    fn snapshot_includes_current_process() {
        let rows = list_processes().unwrap();
        assert!(rows.iter().any(|row| row.pid == std::process::id()));
    }
}
