use std::path::{Path, PathBuf};

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::{list_processes, terminate};
#[cfg(windows)]
pub use windows::{list_processes, terminate};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

const APPIMAGE: &str = "TerminusDB-amd64.AppImage";
const WINDOWS_LAUNCHER: &str = "windows/start_windows.bat";
const MACOS_INTERPRETER: &str = "SWI-Prolog.app/Contents/MacOS/swipl";
const MACOS_START_SCRIPT: &str = "terminusdb-server/src/start.pl";

const SERVE_ARGS: [&str; 1] = ["serve"];
const STORE_INIT_ARGS: [&str; 4] = ["store", "init", "--key", "root"];

/// Binary and argument set used to run the server on this install layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    pub binary_path: PathBuf,
    pub launch_args: Vec<String>,
    pub init_args: Vec<String>,
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Candidate layouts in probe order: packaged Linux image, Windows launcher
/// script, macOS embedded interpreter running the server's start script.
fn candidates(app_dir: &Path) -> Vec<PlatformProfile> {
    let start_script = app_dir.join(MACOS_START_SCRIPT).to_string_lossy().to_string();

    let mut macos_launch = vec![start_script.clone()];
    macos_launch.extend(strings(&SERVE_ARGS));

    let mut macos_init = vec!["-g".to_string(), "halt".to_string(), start_script];
    macos_init.extend(strings(&STORE_INIT_ARGS));

    vec![
        PlatformProfile {
            binary_path: app_dir.join(APPIMAGE),
            launch_args: strings(&SERVE_ARGS),
            init_args: strings(&STORE_INIT_ARGS),
        },
        PlatformProfile {
            binary_path: app_dir.join(WINDOWS_LAUNCHER),
            launch_args: strings(&SERVE_ARGS),
            init_args: strings(&STORE_INIT_ARGS),
        },
        PlatformProfile {
            binary_path: app_dir.join(MACOS_INTERPRETER),
            launch_args: macos_launch,
            init_args: macos_init,
        },
    ]
}

/// Find the first candidate layout that exists under `app_dir`.
pub fn locate(app_dir: &Path) -> Option<PlatformProfile> {
    locate_with(app_dir, |path| path.exists())
}

/// Same as [`locate`] with a caller-supplied existence probe. Probing stops
/// at the first hit.
pub fn locate_with<F>(app_dir: &Path, mut probe: F) -> Option<PlatformProfile>
where
    F: FnMut(&Path) -> bool,
{
    candidates(app_dir)
        .into_iter()
        .find(|profile| probe(&profile.binary_path))
}

/// `std::process::Command` that does not flash a console window.
#[cfg(windows)]
fn new_command(program: &str) -> std::process::Command {
    use std::os::windows::process::CommandExt;

    let mut cmd = std::process::Command::new(program);
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

/// `tokio::process::Command` without a console window on Windows.
pub fn new_async_command(program: &Path) -> tokio::process::Command {
    #[allow(unused_mut)]
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(windows)]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}
