use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{oneshot, watch};

use crate::data_dir::ServerEnv;
use crate::error::{Result, ShellError};
use crate::platform::{self, PlatformProfile};

/// Logged by the server on stderr once it accepts connections. The line is
/// prefixed with a two-character log marker, so the text sits at byte
/// offset 2 of the chunk that carries it. This is a contract with the
/// server's log format: a marker anywhere else does not count.
pub const READINESS_MARKER: &[u8] = b"Started server";
const READINESS_OFFSET: usize = 2;

/// How long a terminate request waits for a graceful exit before killing.
const STOP_GRACE: Duration = Duration::from_secs(3);
/// Extra time allowed for the hard kill to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(2);
const STOP_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Ready,
    Terminated,
    Failed,
}

/// Fires once, on the first stderr chunk carrying the readiness marker.
#[derive(Debug, Default)]
pub struct ReadinessDetector {
    fired: bool,
}

impl ReadinessDetector {
    pub fn observe(&mut self, chunk: &[u8]) -> bool {
        if self.fired {
            return false;
        }
        let end = READINESS_OFFSET + READINESS_MARKER.len();
        self.fired = chunk.get(READINESS_OFFSET..end) == Some(READINESS_MARKER);
        self.fired
    }

    pub fn fired(&self) -> bool {
        self.fired
    }
}

/// Handle on a running server. The child itself is owned by a supervisor
/// task and is killed if that task is dropped.
#[derive(Debug)]
pub struct ServerProcess {
    pid: Option<u32>,
    state: watch::Receiver<ServerState>,
    stop: Option<oneshot::Sender<()>>,
}

impl ServerProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Stop the server: SIGTERM (or `TerminateProcess`), then a hard kill if
    /// it is still alive after a short grace period. Blocks the calling
    /// thread until the process has been reaped, so it must not run on an
    /// async worker. Repeated calls return once the server is gone.
    pub fn terminate(&mut self) -> ServerState {
        if let Some(stop) = self.stop.take() {
            // A reaped pid may already belong to another process.
            if let Some(pid) = self.pid.filter(|_| self.state() != ServerState::Terminated) {
                if let Err(e) = platform::terminate(pid) {
                    log::warn!("{}", e);
                }
            }
            let _ = stop.send(());
        }

        let deadline = Instant::now() + STOP_GRACE + KILL_WAIT;
        loop {
            let state = self.state();
            if state == ServerState::Terminated || self.state.has_changed().is_err() {
                return ServerState::Terminated;
            }
            if Instant::now() >= deadline {
                log::warn!("TerminusDB (PID {:?}) still running after stop", self.pid);
                return state;
            }
            std::thread::sleep(STOP_POLL);
        }
    }

    /// Observe state transitions, e.g. to bound the readiness wait.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.clone()
    }
}

/// Spawn `binary launch_args...` with `env` and watch its stderr for the
/// readiness marker. `on_ready` runs at most once, on the reader task.
///
/// Must be called from within a Tokio runtime. There is no readiness
/// deadline here: a server that never logs the marker stays `Starting`.
pub fn start<F>(profile: &PlatformProfile, env: &ServerEnv, on_ready: F) -> Result<ServerProcess>
where
    F: FnOnce() + Send + 'static,
{
    log::info!(
        "Starting TerminusDB: {} {}",
        profile.binary_path.display(),
        profile.launch_args.join(" ")
    );

    let mut child = platform::new_async_command(&profile.binary_path)
        .args(&profile.launch_args)
        .envs(env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ShellError::Spawn {
            binary: profile.binary_path.clone(),
            source,
        })?;

    let pid = child.id();
    log::info!("TerminusDB started with PID: {:?}", pid);

    let (state_tx, state_rx) = watch::channel(ServerState::Starting);
    let state_tx = Arc::new(state_tx);
    let (stop_tx, stop_rx) = oneshot::channel();

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(watch_stderr(stderr, state_tx.clone(), on_ready));
    }
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(drain_stdout(stdout));
    }
    tokio::spawn(supervise(child, stop_rx, state_tx));

    Ok(ServerProcess {
        pid,
        state: state_rx,
        stop: Some(stop_tx),
    })
}

async fn watch_stderr<F>(mut stderr: ChildStderr, state: Arc<watch::Sender<ServerState>>, on_ready: F)
where
    F: FnOnce() + Send + 'static,
{
    let mut detector = ReadinessDetector::default();
    let mut on_ready = Some(on_ready);
    let mut buf = vec![0u8; 8192];

    loop {
        let n = match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::warn!("TerminusDB stderr reader error: {}", e);
                break;
            }
        };

        // Keep draining after readiness so the pipe never fills up.
        if detector.fired() {
            continue;
        }

        let chunk = &buf[..n];
        log::info!("stderr: {}", String::from_utf8_lossy(chunk).trim_end());

        if detector.observe(chunk) {
            let became_ready = state.send_if_modified(|s| {
                if *s == ServerState::Starting {
                    *s = ServerState::Ready;
                    true
                } else {
                    false
                }
            });
            if became_ready {
                log::info!("TerminusDB ready");
                if let Some(on_ready) = on_ready.take() {
                    on_ready();
                }
            }
        }
    }

    log::debug!("TerminusDB stderr closed");
}

// Reads raw bytes: the server's output is not guaranteed to be UTF-8, and
// closing the pipe early would kill it with SIGPIPE.
async fn drain_stdout(stdout: ChildStdout) {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                if !text.trim().is_empty() {
                    log::debug!("stdout: {}", text.trim_end());
                }
            }
            Err(e) => {
                log::warn!("TerminusDB stdout reader error: {}", e);
                break;
            }
        }
    }
}

async fn supervise(
    mut child: Child,
    stop: oneshot::Receiver<()>,
    state: Arc<watch::Sender<ServerState>>,
) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => log::info!("TerminusDB exited with {}", status),
            Err(e) => log::warn!("Failed to wait on TerminusDB: {}", e),
        },
        _ = stop => {
            if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_err() {
                log::warn!("TerminusDB did not exit after {:?}, killing", STOP_GRACE);
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill TerminusDB: {}", e);
                }
            }
            log::info!("TerminusDB terminated");
        }
    }

    state.send_replace(ServerState::Terminated);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn marker_at_offset_two_fires() {
        let mut detector = ReadinessDetector::default();
        assert!(detector.observe(b"% Started server at https://127.0.0.1:6363\n"));
        assert!(detector.fired());
    }

    #[test]
    fn marker_elsewhere_does_not_fire() {
        let mut detector = ReadinessDetector::default();
        assert!(!detector.observe(b"Started server at https://127.0.0.1:6363"));
        assert!(!detector.observe(b"%  Started server"));
        assert!(!detector.observe(b"% Welcome. Started server soon"));
        assert!(!detector.observe(b"% Started serv"));
        assert!(!detector.observe(b""));
        assert!(!detector.fired());
    }

    #[test]
    fn fires_only_once() {
        let mut detector = ReadinessDetector::default();
        assert!(detector.observe(b"xxStarted server"));
        assert!(!detector.observe(b"xxStarted server"));
        assert!(!detector.observe(b"% Started server again"));
        assert!(detector.fired());
    }

    #[cfg(unix)]
    fn shell(script: &str) -> PlatformProfile {
        PlatformProfile {
            binary_path: "/bin/sh".into(),
            launch_args: vec!["-c".to_string(), script.to_string()],
            init_args: Vec::new(),
        }
    }

    async fn wait_until<P>(server: &ServerProcess, done: P) -> ServerState
    where
        P: Fn(&ServerState) -> bool,
    {
        let mut rx = server.subscribe();
        let state = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| done(s)))
            .await
            .expect("server state did not settle");
        state.map(|s| *s).unwrap_or(ServerState::Terminated)
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = count.clone();
        (count, move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ready_fires_once_for_repeated_markers() {
        let (count, on_ready) = counter();
        let profile = shell(
            "printf '%% Started server at https://127.0.0.1:6363\\n' >&2; sleep 0.2; \
             printf '%% Started server at https://127.0.0.1:6363\\n' >&2; sleep 0.2",
        );

        let server = start(&profile, &ServerEnv::default(), on_ready).unwrap();
        assert!(server.pid().is_some());

        let state = wait_until(&server, |s| *s != ServerState::Starting).await;
        assert_eq!(state, ServerState::Ready);

        wait_until(&server, |s| *s == ServerState::Terminated).await;
        assert_eq!(server.state(), ServerState::Terminated);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn marker_at_wrong_offset_never_readies() {
        let (count, on_ready) = counter();
        let profile = shell("printf 'Started server at https://127.0.0.1:6363\\n' >&2");

        let server = start(&profile, &ServerEnv::default(), on_ready).unwrap();

        let state = wait_until(&server, |s| *s != ServerState::Starting).await;
        assert_eq!(state, ServerState::Terminated);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_sees_prepared_environment() {
        use crate::data_dir::{DataDirectory, DB_PATH_VAR};
        use std::path::Path;

        let (count, on_ready) = counter();
        let env = ServerEnv::for_data_dir(
            &DataDirectory::under_home(Path::new("/home/ada")),
            Path::new("/opt/tdb"),
        );
        let profile = shell(&format!(
            "[ \"${DB_PATH_VAR}\" = /home/ada/.terminusdb/db ] && printf '%% Started server\\n' >&2; sleep 0.2"
        ));

        let server = start(&profile, &env, on_ready).unwrap();

        let state = wait_until(&server, |s| *s != ServerState::Starting).await;
        assert_eq!(state, ServerState::Ready);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    fn is_alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[cfg(unix)]
    async fn terminate_on_worker(server: ServerProcess) -> (ServerProcess, ServerState) {
        tokio::task::spawn_blocking(move || {
            let mut server = server;
            let state = server.terminate();
            (server, state)
        })
        .await
        .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn terminate_returns_after_the_server_is_gone() {
        let (_count, on_ready) = counter();
        let profile = shell("printf '%% Started server\\n' >&2; exec sleep 30");

        let server = start(&profile, &ServerEnv::default(), on_ready).unwrap();
        let pid = server.pid().unwrap();
        wait_until(&server, |s| *s != ServerState::Starting).await;

        let (server, state) = terminate_on_worker(server).await;
        assert_eq!(state, ServerState::Terminated);
        assert_eq!(server.state(), ServerState::Terminated);
        assert!(!is_alive(pid));

        let (_, state) = terminate_on_worker(server).await;
        assert_eq!(state, ServerState::Terminated);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn server_ignoring_sigterm_is_killed_after_grace() {
        let (_count, on_ready) = counter();
        let profile = shell(
            "trap '' TERM; printf '%% Started server\\n' >&2; while :; do sleep 0.1; done",
        );

        let server = start(&profile, &ServerEnv::default(), on_ready).unwrap();
        let pid = server.pid().unwrap();
        wait_until(&server, |s| *s != ServerState::Starting).await;

        let (_, state) = terminate_on_worker(server).await;
        assert_eq!(state, ServerState::Terminated);
        assert!(!is_alive(pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_stdout_keeps_the_server_alive() {
        let (count, on_ready) = counter();
        let profile = shell(
            "printf '\\377\\n'; sleep 0.3; echo again; \
             printf '%% Started server\\n' >&2; sleep 0.2",
        );

        let server = start(&profile, &ServerEnv::default(), on_ready).unwrap();

        let state = wait_until(&server, |s| *s != ServerState::Starting).await;
        assert_eq!(state, ServerState::Ready);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let (count, on_ready) = counter();
        let profile = PlatformProfile {
            binary_path: "/nonexistent/terminusdb/swipl".into(),
            launch_args: vec!["serve".to_string()],
            init_args: Vec::new(),
        };

        let err = start(&profile, &ServerEnv::default(), on_ready).unwrap_err();
        assert!(matches!(err, ShellError::Spawn { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
