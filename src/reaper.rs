use std::path::Path;

use crate::error::Result;
use crate::platform;

/// A row of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub command: String,
    pub arguments: Vec<String>,
}

/// Identifies server processes by executable name and a required argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapSignature {
    pub command: String,
    pub argument: String,
}

impl ReapSignature {
    pub fn new(command: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            argument: argument.into(),
        }
    }

    /// The invocation every TerminusDB server is started with, whichever
    /// run launched it.
    pub fn terminusdb_server() -> Self {
        Self::new("swipl", "serve")
    }

    pub fn matches(&self, entry: &ProcessEntry) -> bool {
        let name = Path::new(&entry.command)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| entry.command.clone());

        name.contains(&self.command) && entry.arguments.iter().any(|a| *a == self.argument)
    }
}

pub trait ProcessTable {
    fn find(&self, signature: &ReapSignature) -> Result<Vec<ProcessEntry>>;
    fn kill(&self, pid: u32) -> Result<()>;
}

/// The live process table of this machine.
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn find(&self, signature: &ReapSignature) -> Result<Vec<ProcessEntry>> {
        Ok(platform::list_processes()?
            .into_iter()
            .filter(|entry| signature.matches(entry))
            .collect())
    }

    fn kill(&self, pid: u32) -> Result<()> {
        platform::terminate(pid)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
    pub matched: usize,
    pub terminated: usize,
    pub failed: usize,
}

pub struct OrphanReaper<T: ProcessTable> {
    table: T,
    signature: ReapSignature,
}

impl<T: ProcessTable> OrphanReaper<T> {
    pub fn new(table: T, signature: ReapSignature) -> Self {
        Self { table, signature }
    }

    #[cfg(test)]
    pub(crate) fn table(&self) -> &T {
        &self.table
    }

    /// Send a termination signal to every process matching the signature.
    /// Best-effort: a failed kill is logged and the scan continues.
    pub fn reap_all(&self) -> ReapReport {
        log::info!(
            "Looking for {} {} processes",
            self.signature.command,
            self.signature.argument
        );

        let matches = match self.table.find(&self.signature) {
            Ok(matches) => matches,
            Err(e) => {
                log::warn!("Skipping reap: {}", e);
                return ReapReport::default();
            }
        };

        let mut report = ReapReport {
            matched: matches.len(),
            ..ReapReport::default()
        };

        for entry in &matches {
            log::info!(
                "Terminating PID: {}, COMMAND: {}, ARGUMENTS: {}",
                entry.pid,
                entry.command,
                entry.arguments.join(" ")
            );
            match self.table.kill(entry.pid) {
                Ok(()) => report.terminated += 1,
                Err(e) => {
                    log::warn!("{}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}
