use std::net::SocketAddr;
use std::path::Path;

use backup_validator::{
    bridge::{ExecutionBridge, PathResolver, RunnerConfig, ScriptRunner},
    policy::{AllowList, IpPolicy},
    server::{self, AppState},
};
use reqwest::Client;
use tempfile::TempDir;
use tokio::{net::TcpListener, task};

pub struct TestServer {
    pub address: SocketAddr,
    pub scripts: TempDir,
    pub client: Client,
    server_handle: task::JoinHandle<()>,
}

impl TestServer {
    /// Server admitting the given allow list, with an empty scripts directory
    pub async fn with_allow_list(allow_list: &str) -> Self {
        Self::with_runner(allow_list, RunnerConfig::default()).await
    }

    pub async fn with_runner(allow_list: &str, runner: RunnerConfig) -> Self {
        let scripts = TempDir::new().expect("Failed to create scripts dir");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        let address = listener.local_addr().expect("Failed to get address");

        let bridge = ExecutionBridge::new(
            PathResolver::new(scripts.path()),
            ScriptRunner::new(runner),
        );
        let policy = IpPolicy::new(AllowList::from_csv(allow_list));
        let state = AppState::new(bridge, policy, false);

        let server_handle = task::spawn(async move {
            let _ = server::serve(listener, state).await;
        });

        Self {
            address,
            scripts,
            client: Client::new(),
            server_handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    /// Install an executable shell script under the scripts directory
    #[cfg(unix)]
    pub fn script(&self, name: &str, body: &str) {
        write_script(self.scripts.path(), name, body);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}
