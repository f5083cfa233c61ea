use std::path::PathBuf;
use std::time::Duration;

/// Local endpoint served by TerminusDB.
pub const SERVER_URL: &str = "https://127.0.0.1:6363/";

/// Overrides the directory probed for the bundled server.
pub const APP_DIR_ENV: &str = "TERMINUSDB_DESKTOP_APP_DIR";
/// Opt-in deadline for the readiness wait, in milliseconds. Unset or zero
/// means wait indefinitely.
pub const READY_TIMEOUT_ENV: &str = "TERMINUSDB_DESKTOP_READY_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub app_dir: PathBuf,
    pub home_dir: Option<PathBuf>,
    pub ready_timeout: Option<Duration>,
}

impl ShellConfig {
    pub fn resolve(resource_dir: Option<PathBuf>) -> Self {
        Self::from_lookup(
            |name| std::env::var(name).ok(),
            resource_dir,
            dirs::home_dir(),
        )
    }

    fn from_lookup<F>(lookup: F, resource_dir: Option<PathBuf>, home_dir: Option<PathBuf>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_dir = lookup(APP_DIR_ENV)
            .map(|dir| dir.trim().to_string())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or(resource_dir)
            .or_else(exe_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            app_dir,
            home_dir,
            ready_timeout: parse_timeout_ms(lookup(READY_TIMEOUT_ENV).as_deref()),
        }
    }
}

fn exe_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(|dir| dir.to_path_buf())
}

fn parse_timeout_ms(raw: Option<&str>) -> Option<Duration> {
    let ms = raw?.trim().parse::<u64>().ok()?;
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn env_override_wins_over_resource_dir() {
        let config = ShellConfig::from_lookup(
            lookup(&[(APP_DIR_ENV, "/opt/terminusdb")]),
            Some(PathBuf::from("/usr/lib/terminusdb")),
            None,
        );
        assert_eq!(config.app_dir, PathBuf::from("/opt/terminusdb"));
    }

    #[test]
    fn falls_back_to_resource_dir() {
        let config = ShellConfig::from_lookup(
            lookup(&[(APP_DIR_ENV, "  ")]),
            Some(PathBuf::from("/usr/lib/terminusdb")),
            Some(PathBuf::from("/home/ada")),
        );
        assert_eq!(config.app_dir, PathBuf::from("/usr/lib/terminusdb"));
        assert_eq!(config.home_dir, Some(PathBuf::from("/home/ada")));
    }

    #[test]
    fn falls_back_to_executable_dir() {
        let config = ShellConfig::from_lookup(lookup(&[]), None, None);
        assert_eq!(config.app_dir, exe_dir().unwrap());
    }

    #[test]
    fn readiness_wait_is_unbounded_by_default() {
        let config = ShellConfig::from_lookup(lookup(&[]), None, None);
        assert_eq!(config.ready_timeout, None);
    }

    #[test]
    fn parses_ready_timeout() {
        assert_eq!(
            parse_timeout_ms(Some("2500")),
            Some(Duration::from_millis(2500))
        );
        assert_eq!(parse_timeout_ms(Some("0")), None);
        assert_eq!(parse_timeout_ms(Some("soon")), None);
        assert_eq!(parse_timeout_ms(None), None);
    }
}
