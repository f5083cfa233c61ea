use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::error::{Result, ShellError};
use crate::platform::{self, PlatformProfile};

const DATA_DIR_NAME: &str = ".terminusdb";

pub const PACK_DIR_VAR: &str = "TERMINUSDB_SERVER_PACK_DIR";
pub const DB_PATH_VAR: &str = "TERMINUSDB_SERVER_DB_PATH";
pub const REGISTRY_PATH_VAR: &str = "TERMINUSDB_SERVER_REGISTRY_PATH";
pub const INDEX_PATH_VAR: &str = "TERMINUSDB_SERVER_INDEX_PATH";
pub const AUTOLOGIN_VAR: &str = "TERMINUSDB_AUTOLOGIN_ENABLED";

/// Per-user server state under `<home>/.terminusdb`. Only `root` is created
/// here; `db` belongs to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDirectory {
    pub root: PathBuf,
    pub db: PathBuf,
    pub registry: PathBuf,
    pub index: PathBuf,
}

impl DataDirectory {
    pub fn under_home(home: &Path) -> Self {
        let root = home.join(DATA_DIR_NAME);
        Self {
            db: root.join("db"),
            registry: root.join("registry.pl"),
            index: root.join("index.html"),
            root,
        }
    }
}

/// Environment handed to the init command and the server, on top of the
/// inherited one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerEnv {
    vars: Vec<(String, OsString)>,
}

impl ServerEnv {
    pub fn for_data_dir(dir: &DataDirectory, app_dir: &Path) -> Self {
        Self {
            vars: vec![
                (PACK_DIR_VAR.to_string(), app_dir.join("pack").into_os_string()),
                (DB_PATH_VAR.to_string(), dir.db.clone().into_os_string()),
                (REGISTRY_PATH_VAR.to_string(), dir.registry.clone().into_os_string()),
                (INDEX_PATH_VAR.to_string(), dir.index.clone().into_os_string()),
                (AUTOLOGIN_VAR.to_string(), OsString::from("true")),
            ],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_os_str()))
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&OsStr> {
        self.iter().find(|(k, _)| *k == name).map(|(_, v)| v)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Dispatches the one-time store initialisation.
pub trait InitLauncher {
    fn launch(&self, binary: &Path, args: &[String], env: &ServerEnv) -> Result<()>;
}

/// Runs the init command on the async runtime without waiting for it. Its
/// output and exit status are only logged, so the server may be spawned
/// before the store exists.
pub struct DetachedInit;

impl InitLauncher for DetachedInit {
    fn launch(&self, binary: &Path, args: &[String], env: &ServerEnv) -> Result<()> {
        let binary = binary.to_path_buf();
        let args = args.to_vec();
        let env = env.clone();

        tauri::async_runtime::spawn(async move {
            let output = platform::new_async_command(&binary)
                .args(&args)
                .envs(env.iter())
                .stdin(Stdio::null())
                .output()
                .await;

            match output {
                Ok(output) => {
                    for stream in [&output.stdout, &output.stderr] {
                        let text = String::from_utf8_lossy(stream);
                        if !text.trim().is_empty() {
                            log::info!("store init: {}", text.trim_end());
                        }
                    }
                    if output.status.success() {
                        log::info!("Store initialised");
                    } else {
                        log::warn!("Store init exited with {}", output.status);
                    }
                }
                Err(source) => {
                    log::error!("{}", ShellError::Spawn { binary, source });
                }
            }
        });

        Ok(())
    }
}

/// Make sure the data directory exists, kick off store initialisation when
/// the store is missing and build the server environment.
///
/// Without a home directory nothing is created and the server runs with the
/// inherited environment only.
pub fn prepare<L: InitLauncher>(
    home: Option<&Path>,
    app_dir: &Path,
    profile: &PlatformProfile,
    launcher: &L,
) -> Result<ServerEnv> {
    let Some(home) = home else {
        log::warn!("No home directory, skipping data directory setup");
        return Ok(ServerEnv::default());
    };

    let dir = DataDirectory::under_home(home);
    let env = ServerEnv::for_data_dir(&dir, app_dir);

    if !dir.root.exists() {
        fs::create_dir_all(&dir.root).map_err(|source| ShellError::DataDir {
            path: dir.root.clone(),
            source,
        })?;
    }

    if !dir.db.exists() {
        log::info!(
            "No store at {}, running {} {}",
            dir.db.display(),
            profile.binary_path.display(),
            profile.init_args.join(" ")
        );
        if let Err(e) = launcher.launch(&profile.binary_path, &profile.init_args, &env) {
            log::warn!("Store init not started: {}", e);
        }
    }

    Ok(env)
}
