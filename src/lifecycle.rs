use std::sync::Mutex;

use tauri::{AppHandle, ExitRequestApi, Manager};

use crate::reaper::{OrphanReaper, ProcessTable, ReapSignature, SystemProcessTable};
use crate::state::{lock, ShellState};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    #[default]
    Running,
    ShuttingDown,
    Exited,
}

/// What the exit hook should do with a quit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitDecision {
    /// Veto the exit and run cleanup.
    BeginShutdown,
    /// Veto the exit; cleanup is already in flight.
    AlreadyShuttingDown,
    /// Cleanup finished, let the exit through.
    Permit,
}

/// Gatekeeper for process exit. Exit is only permitted once the reap has
/// completed, and the real exit is issued exactly once.
#[derive(Debug, Default)]
pub struct LifecycleController {
    phase: Mutex<LifecyclePhase>,
}

impl LifecycleController {
    pub fn phase(&self) -> LifecyclePhase {
        *lock(&self.phase)
    }

    pub fn quit_permitted(&self) -> bool {
        self.phase() == LifecyclePhase::Exited
    }

    pub fn is_quitting(&self) -> bool {
        self.phase() != LifecyclePhase::Running
    }

    pub fn request_quit(&self) -> QuitDecision {
        let mut phase = lock(&self.phase);
        match *phase {
            LifecyclePhase::Running => {
                *phase = LifecyclePhase::ShuttingDown;
                QuitDecision::BeginShutdown
            }
            LifecyclePhase::ShuttingDown => QuitDecision::AlreadyShuttingDown,
            LifecyclePhase::Exited => QuitDecision::Permit,
        }
    }

    /// Reap matching server processes, stop the tracked child and open the
    /// quit gate. Returns `true` to the single caller that must now issue
    /// the exit; `false` if no shutdown was in progress.
    ///
    /// The reap runs whether or not this run ever started a server, so a
    /// stale instance from an earlier session is still cleaned up.
    pub fn finish_shutdown<T, F>(&self, reaper: &OrphanReaper<T>, terminate_tracked: F) -> bool
    where
        T: ProcessTable,
        F: FnOnce(),
    {
        if self.phase() != LifecyclePhase::ShuttingDown {
            return false;
        }

        let report = reaper.reap_all();
        log::info!(
            "Reaped {} of {} server processes ({} failed)",
            report.terminated,
            report.matched,
            report.failed
        );
        terminate_tracked();

        let mut phase = lock(&self.phase);
        if *phase == LifecyclePhase::ShuttingDown {
            *phase = LifecyclePhase::Exited;
            true
        } else {
            false
        }
    }

    /// Last-chance cleanup when the process is exiting without having gone
    /// through [`request_quit`](Self::request_quit), e.g. Cmd+Q on macOS.
    /// Runs the same reap and child termination on the calling thread.
    /// Returns `false` when shutdown had already completed.
    pub fn shutdown_on_exit<T, F>(&self, reaper: &OrphanReaper<T>, terminate_tracked: F) -> bool
    where
        T: ProcessTable,
        F: FnOnce(),
    {
        if self.quit_permitted() {
            return false;
        }
        {
            let mut phase = lock(&self.phase);
            if *phase == LifecyclePhase::Running {
                *phase = LifecyclePhase::ShuttingDown;
            }
        }
        self.finish_shutdown(reaper, terminate_tracked);
        true
    }
}

fn system_reaper() -> OrphanReaper<SystemProcessTable> {
    OrphanReaper::new(SystemProcessTable, ReapSignature::terminusdb_server())
}

/// `RunEvent::ExitRequested` hook.
pub fn handle_exit_requested(app: &AppHandle, api: &ExitRequestApi) {
    let state = app.state::<ShellState>();

    match state.lifecycle.request_quit() {
        QuitDecision::Permit => {}
        QuitDecision::AlreadyShuttingDown => {
            log::debug!("Quit already in progress");
            api.prevent_exit();
        }
        QuitDecision::BeginShutdown => {
            api.prevent_exit();
            log::info!("Shutting down TerminusDB before exit");

            let handle = app.clone();
            tauri::async_runtime::spawn_blocking(move || {
                let state = handle.state::<ShellState>();
                if state
                    .lifecycle
                    .finish_shutdown(&system_reaper(), || state.terminate_server())
                {
                    log::info!("Quitting...");
                    handle.exit(0);
                }
            });
        }
    }
}

/// `RunEvent::Exit` hook. `ExitRequested` is not delivered on every exit
/// path on macOS, so cleanup that never ran happens here.
pub fn handle_exit(app: &AppHandle) {
    let state = app.state::<ShellState>();
    if state
        .lifecycle
        .shutdown_on_exit(&system_reaper(), || state.terminate_server())
    {
        log::warn!("Exited without a quit request, cleaned up on exit");
    }
}
