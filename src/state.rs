use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tauri::{AppHandle, Emitter};

use crate::lifecycle::LifecycleController;
use crate::server::{ServerProcess, ServerState};
use crate::tray;

pub const STATUS_EVENT: &str = "terminusdb://server-status";

/// Server status as shown by the shell.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerStatus {
    #[default]
    NotFound,
    Starting,
    Ready,
    Terminated,
    Failed,
}

impl From<ServerState> for ServerStatus {
    fn from(state: ServerState) -> Self {
        match state {
            ServerState::Starting => Self::Starting,
            ServerState::Ready => Self::Ready,
            ServerState::Terminated => Self::Terminated,
            ServerState::Failed => Self::Failed,
        }
    }
}

impl ServerStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::NotFound => "server not found",
            Self::Starting => "starting",
            Self::Ready => "running",
            Self::Terminated => "stopped",
            Self::Failed => "failed to start",
        }
    }
}

/// Recover the guard from a poisoned lock; the protected values stay valid
/// across a panicking writer.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|error| {
        log::warn!("Recovering poisoned lock");
        PoisonError::into_inner(error)
    })
}

#[derive(Default)]
pub struct ShellState {
    pub lifecycle: LifecycleController,
    server: Mutex<Option<ServerProcess>>,
    status: Mutex<ServerStatus>,
}

impl ShellState {
    pub fn status(&self) -> ServerStatus {
        if let Some(server) = lock(&self.server).as_ref() {
            if server.state() == ServerState::Terminated {
                return ServerStatus::Terminated;
            }
        }
        *lock(&self.status)
    }

    pub fn set_status(&self, app: &AppHandle, status: ServerStatus) {
        *lock(&self.status) = status;
        log::info!("TerminusDB {}", status.label());

        tray::update(app, status);
        if let Err(e) = app.emit(STATUS_EVENT, status) {
            log::debug!("Failed to emit server status: {}", e);
        }
    }

    pub fn track(&self, server: ServerProcess) {
        *lock(&self.server) = Some(server);
    }

    /// Stop the tracked server and wait until it is gone. Blocking.
    pub fn terminate_server(&self) {
        if let Some(server) = lock(&self.server).as_mut() {
            log::info!("Stopping TerminusDB (PID {:?})", server.pid());
            let state = server.terminate();
            log::info!("TerminusDB {}", ServerStatus::from(state).label());
        }
    }
}
