mod config;
mod data_dir;
mod error;
mod lifecycle;
mod platform;
mod reaper;
mod server;
mod startup;
mod state;
mod tray;
mod trust;
mod window;

use tauri::{Manager, RunEvent};

use crate::config::ShellConfig;
use crate::state::ShellState;

pub fn run() {
    let app = tauri::Builder::default()
        // Must be registered first so a second launch never starts a server.
        .plugin(tauri_plugin_single_instance::init(|app, _argv, _cwd| {
            let status = app.state::<ShellState>().status();
            log::info!("Second launch while TerminusDB is {}", status.label());
            window::show(app);
        }))
        .plugin(
            tauri_plugin_log::Builder::new()
                .targets([
                    tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::Stdout),
                    tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::LogDir {
                        file_name: None,
                    }),
                ])
                .level(if cfg!(debug_assertions) {
                    log::LevelFilter::Debug
                } else {
                    log::LevelFilter::Info
                })
                .build(),
        )
        .manage(ShellState::default())
        .on_window_event(window::handle_window_event)
        .setup(|app| {
            let config = ShellConfig::resolve(app.path().resource_dir().ok());
            log::info!("Looking for TerminusDB in {}", config.app_dir.display());

            tray::setup(app)?;
            startup::launch(app.handle(), &config)?;
            Ok(())
        })
        .build(tauri::generate_context!())
        .expect("error while building terminusdb desktop");

    app.run(|app, event| match event {
        RunEvent::ExitRequested { api, .. } => lifecycle::handle_exit_requested(app, &api),
        RunEvent::Exit => lifecycle::handle_exit(app),
        _ => {}
    });
}
