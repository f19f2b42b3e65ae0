//! Common utilities for integration tests.
//!
//! Spawning the server binary against scratch directories, managing ports, and waiting for
//! the listener to come up.

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    time::{Duration, Instant},
};

use tempfile::TempDir;

pub fn get_free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("failed to bind to address")
        .local_addr()
        .unwrap()
        .port()
}

/// Guard that kills and waits on a child process when dropped.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        drop(self.0.kill());
        drop(self.0.wait());
    }
}

fn get_server_bin() -> &'static str {
    env!("CARGO_BIN_EXE_mediahost")
}

/// Scratch directories for one server process.
pub struct Sandbox {
    pub root: TempDir,
    envs: Vec<(String, String)>,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("failed to create temp dir"),
            envs: Vec::new(),
        }
    }

    pub fn dir(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    pub fn web_dir(&self) -> PathBuf {
        self.dir("web")
    }

    /// Put a minimal web client into the web directory.
    pub fn with_web_client(self) -> Self {
        let web = self.web_dir();
        fs::create_dir_all(&web).expect("failed to create web dir");
        fs::write(web.join("index.html"), "<html>mediahost</html>").expect("failed to write web client");
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_owned(), value.to_owned()));
        self
    }

    fn path_args(&self) -> Vec<String> {
        [
            ("--datadir", "data"),
            ("--configdir", "config"),
            ("--cachedir", "cache"),
            ("--webdir", "web"),
        ]
        .into_iter()
        .flat_map(|(flag, dir)| [flag.to_owned(), path_str(&self.dir(dir))])
        .collect()
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(get_server_bin());
        cmd.args(self.path_args())
            .args(args)
            .env("MEDIAHOST_STORAGE__ENGINE", "memory")
            .env("MEDIAHOST_LOGGING__WRITE_FILE", "false")
            .env_remove("RUST_LOG")
            .envs(self.envs.iter().map(|(key, value)| (key, value)))
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    /// Spawn the server listening on `127.0.0.1:port`.
    pub fn spawn(&self, port: u16, args: &[&str]) -> KillOnDrop {
        let port = port.to_string();
        let mut all_args = vec!["--bind", "127.0.0.1", "--port", port.as_str()];
        all_args.extend_from_slice(args);
        KillOnDrop(
            self.command(&all_args)
                .spawn()
                .expect("failed to start mediahost"),
        )
    }

    /// Run the server to completion with exactly `args` after the path arguments.
    pub fn run(&self, args: &[&str]) -> ExitStatus {
        self.command(args)
            .status()
            .expect("failed to run mediahost")
    }
}

fn path_str(path: &Path) -> String {
    path.to_str().expect("temp paths are valid unicode").to_owned()
}

/// Run the server binary with only `args`, no sandbox.
pub fn run_bare(args: &[&str]) -> ExitStatus {
    Command::new(get_server_bin())
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("failed to run mediahost")
}

/// Block until a TCP listener is accepting on `127.0.0.1:port` or timeout.
pub async fn wait_for_listening(port: u16, timeout_secs: u64) {
    let start = Instant::now();
    while std::net::TcpStream::connect(("127.0.0.1", port)).is_err() {
        assert!(
            start.elapsed() <= Duration::from_secs(timeout_secs),
            "server did not start within timeout"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Wait for the child to exit on its own, killing it after `timeout_secs`.
pub async fn wait_for_exit(child: &mut KillOnDrop, timeout_secs: u64) -> ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.0.try_wait().expect("failed to poll child") {
            return status;
        }
        assert!(
            start.elapsed() <= Duration::from_secs(timeout_secs),
            "server did not exit within timeout"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
