use tauri::{
    AppHandle, Manager, WebviewUrl, WebviewWindow, WebviewWindowBuilder, Window, WindowEvent,
};

use crate::config::SERVER_URL;
use crate::state::ShellState;
use crate::trust;

pub const MAIN_WINDOW: &str = "main";

/// Open the viewport on the local server, or bring it back if it exists.
pub fn open_main_window(app: &AppHandle) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(win) = app.get_webview_window(MAIN_WINDOW) {
        win.show()?;
        win.set_focus()?;
        return Ok(());
    }

    let url = url::Url::parse(SERVER_URL)?;
    let builder = WebviewWindowBuilder::new(app, MAIN_WINDOW, WebviewUrl::External(url))
        .title("TerminusDB")
        .inner_size(1024.0, 768.0)
        .incognito(true)
        .on_navigation(|url| {
            if trust::is_trusted_origin(url.as_str()) {
                return true;
            }
            log::info!("Opening {} in the system browser", url);
            if let Err(e) = open::that(url.as_str()) {
                log::warn!("Failed to open {}: {}", url, e);
            }
            false
        });

    #[cfg(not(target_os = "macos"))]
    let builder = builder.menu(build_app_menu(app)?);

    let _window = builder.build()?;

    #[cfg(not(target_os = "macos"))]
    _window.hide_menu()?;

    Ok(())
}

pub fn open_main_window_logged(app: &AppHandle) {
    if let Err(e) = open_main_window(app) {
        log::error!("Failed to open main window: {}", e);
    }
}

/// Keyboard shortcuts for the viewport. The menu bar itself stays hidden.
#[cfg(not(target_os = "macos"))]
fn build_app_menu(app: &AppHandle) -> tauri::Result<tauri::menu::Menu<tauri::Wry>> {
    use tauri::menu::{MenuBuilder, MenuItemBuilder};

    MenuBuilder::new(app)
        .item(
            &MenuItemBuilder::with_id("reload", "Reload (Ctrl+R)")
                .accelerator("Ctrl+R")
                .build(app)?,
        )
        .item(
            &MenuItemBuilder::with_id("reload-f5", "Reload (F5)")
                .accelerator("F5")
                .build(app)?,
        )
        .item(
            &MenuItemBuilder::with_id("back", "Back")
                .accelerator("Alt+Left")
                .build(app)?,
        )
        .item(
            &MenuItemBuilder::with_id("forward", "Forward")
                .accelerator("Alt+Right")
                .build(app)?,
        )
        .item(
            &MenuItemBuilder::with_id("open-in-browser", "Open in Browser")
                .accelerator("Ctrl+B")
                .build(app)?,
        )
        .item(
            &MenuItemBuilder::with_id("devtools", "Developer Tools")
                .accelerator("Ctrl+Shift+I")
                .build(app)?,
        )
        .build()
}

fn main_window(app: &AppHandle) -> Option<WebviewWindow> {
    app.get_webview_window(MAIN_WINDOW)
}

pub fn show(app: &AppHandle) {
    match main_window(app) {
        Some(win) => {
            let _ = win.unminimize();
            let _ = win.show();
            let _ = win.set_focus();
        }
        None => log::info!("Main window not open yet, TerminusDB is still starting"),
    }
}

pub fn hide(app: &AppHandle) {
    if let Some(win) = main_window(app) {
        let _ = win.hide();
    }
}

fn run_script(app: &AppHandle, script: &str) {
    if let Some(win) = main_window(app) {
        if let Err(e) = win.eval(script) {
            log::warn!("Failed to run `{}` in main window: {}", script, e);
        }
    }
}

pub fn reload(app: &AppHandle) {
    run_script(app, "window.location.reload()");
}

pub fn back(app: &AppHandle) {
    run_script(app, "window.history.back()");
}

pub fn forward(app: &AppHandle) {
    run_script(app, "window.history.forward()");
}

pub fn toggle_devtools(app: &AppHandle) {
    if let Some(win) = main_window(app) {
        if win.is_devtools_open() {
            win.close_devtools();
        } else {
            win.open_devtools();
        }
    }
}

pub fn open_in_browser() {
    if let Err(e) = open::that(SERVER_URL) {
        log::warn!("Failed to open {}: {}", SERVER_URL, e);
    }
}

/// Closing or minimizing the main window hides it to the tray, unless the
/// app is on its way out.
pub fn handle_window_event(window: &Window, event: &WindowEvent) {
    if window.label() != MAIN_WINDOW {
        return;
    }

    let quitting = window.app_handle().state::<ShellState>().lifecycle.is_quitting();

    match event {
        WindowEvent::CloseRequested { api, .. } => {
            if !quitting {
                api.prevent_close();
                let _ = window.hide();
            }
        }
        _ => {
            if minimized_to_tray(event, quitting, || window.is_minimized().unwrap_or(false)) {
                let _ = window.hide();
            }
        }
    }
}

// Tauri has no minimize event. A minimize shows up as a resize on Windows
// and Linux and as a focus loss on macOS, so both are checked.
fn minimized_to_tray<F>(event: &WindowEvent, quitting: bool, is_minimized: F) -> bool
where
    F: FnOnce() -> bool,
{
    if quitting {
        return false;
    }
    matches!(event, WindowEvent::Resized(_) | WindowEvent::Focused(false)) && is_minimized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tauri::{PhysicalPosition, PhysicalSize};

    #[test]
    fn minimize_via_resize_or_focus_loss_hides() {
        let resized = WindowEvent::Resized(PhysicalSize::new(0, 0));
        assert!(minimized_to_tray(&resized, false, || true));
        assert!(minimized_to_tray(&WindowEvent::Focused(false), false, || true));
    }

    #[test]
    fn restored_window_stays_visible() {
        let resized = WindowEvent::Resized(PhysicalSize::new(1024, 768));
        assert!(!minimized_to_tray(&resized, false, || false));
        assert!(!minimized_to_tray(&WindowEvent::Focused(true), false, || true));
        let moved = WindowEvent::Moved(PhysicalPosition::new(10, 10));
        assert!(!minimized_to_tray(&moved, false, || true));
    }

    #[test]
    fn quitting_never_hides() {
        let resized = WindowEvent::Resized(PhysicalSize::new(0, 0));
        assert!(!minimized_to_tray(&resized, true, || panic!("not consulted")));
    }
}
