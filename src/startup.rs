use std::time::Duration;

use tauri::{AppHandle, Manager};
use tokio::sync::watch;

use crate::config::ShellConfig;
use crate::data_dir::{self, DetachedInit};
use crate::error::{Result, ShellError};
use crate::platform;
use crate::server::{self, ServerState};
use crate::state::{ServerStatus, ShellState};
use crate::window;

/// Locate the bundled server, prepare its data directory and start it.
///
/// Only a data directory failure is returned. Everything else is logged and
/// leaves the shell running without a server, with the window open on the
/// endpoint so the user sees the failure.
pub fn launch(app: &AppHandle, config: &ShellConfig) -> Result<()> {
    let state = app.state::<ShellState>();

    let Some(profile) = platform::locate(&config.app_dir) else {
        log::error!("{}", ShellError::BinaryNotFound(config.app_dir.clone()));
        state.set_status(app, ServerStatus::NotFound);
        window::open_main_window_logged(app);
        return Ok(());
    };
    log::info!("Found TerminusDB at {}", profile.binary_path.display());

    let env = data_dir::prepare(
        config.home_dir.as_deref(),
        &config.app_dir,
        &profile,
        &DetachedInit,
    )?;
    state.set_status(app, ServerStatus::Starting);

    let handle = app.clone();
    let ready_timeout = config.ready_timeout;
    tauri::async_runtime::spawn(async move {
        let on_ready = {
            let handle = handle.clone();
            move || {
                handle
                    .state::<ShellState>()
                    .set_status(&handle, ServerStatus::Ready);
                window::open_main_window_logged(&handle);
            }
        };

        let state = handle.state::<ShellState>();
        match server::start(&profile, &env, on_ready) {
            Ok(process) => {
                let states = process.subscribe();
                state.track(process);
                watch_exit(handle.clone(), states.clone());
                if let Some(deadline) = ready_timeout {
                    watch_readiness(handle.clone(), states, deadline);
                }
            }
            Err(e) => {
                log::error!("{}", e);
                state.set_status(&handle, ServerState::Failed.into());
                window::open_main_window_logged(&handle);
            }
        }
    });

    Ok(())
}

/// Waits for the first state change away from `Starting`. `None` means the
/// deadline passed first.
async fn wait_for_settle(
    mut states: watch::Receiver<ServerState>,
    deadline: Duration,
) -> Option<ServerState> {
    let settled =
        match tokio::time::timeout(deadline, states.wait_for(|s| *s != ServerState::Starting)).await
        {
            Ok(Ok(state)) => Some(*state),
            Ok(Err(_)) => Some(ServerState::Terminated),
            Err(_) => None,
        };
    settled
}

/// Open the window anyway if the server stays silent past `deadline`.
fn watch_readiness(app: AppHandle, states: watch::Receiver<ServerState>, deadline: Duration) {
    tauri::async_runtime::spawn(async move {
        if wait_for_settle(states, deadline).await.is_none() {
            log::warn!(
                "TerminusDB not ready after {:?}, opening the window anyway",
                deadline
            );
            window::open_main_window_logged(&app);
        }
    });
}

/// Reflect an unexpected server exit in the tray.
fn watch_exit(app: AppHandle, mut states: watch::Receiver<ServerState>) {
    tauri::async_runtime::spawn(async move {
        if states.wait_for(|s| *s == ServerState::Terminated).await.is_err() {
            return;
        }
        let state = app.state::<ShellState>();
        if !state.lifecycle.is_quitting() {
            log::warn!("TerminusDB exited while the shell is running");
            state.set_status(&app, ServerStatus::Terminated);
        }
    });
}
