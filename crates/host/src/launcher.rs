use std::env;
use std::process::{Command, Stdio};

use crate::client::WorkerClient;
use crate::{WorkerHandle, WorkerLaunchConfig, WorkerLauncher};

pub const ENV_EXEC_TIMEOUT_SECS: &str = "RUNPAD_EXEC_TIMEOUT_SECS";
pub const ENV_EXEC_LOG: &str = "RUNPAD_EXEC_LOG";

pub fn build_launcher(config: WorkerLaunchConfig) -> Box<dyn WorkerLauncher> {
    Box::new(LocalProcessLauncher { config })
}

/// Spawns the worker binary that ships next to the host executable.
struct LocalProcessLauncher {
    config: WorkerLaunchConfig,
}

impl WorkerLauncher for LocalProcessLauncher {
    fn launch(&self) -> Result<Box<dyn WorkerHandle>, String> {
        let worker_bin = resolve_worker_bin()?;
        let mut command = Command::new(worker_bin);
        apply_engine_env(&mut command, &self.config);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let child = command
            .spawn()
            .map_err(|err| format!("failed to spawn worker process: {err}"))?;
        let mut client = WorkerClient::new(child)?;
        client.ping()?;
        Ok(Box::new(client))
    }
}

fn resolve_worker_bin() -> Result<std::path::PathBuf, String> {
    let current =
        env::current_exe().map_err(|err| format!("failed to resolve current executable: {err}"))?;
    let mut worker = current
        .parent()
        .ok_or_else(|| "failed to resolve executable directory".to_owned())?
        .to_path_buf();
    worker.push("exec_worker");
    if let Some(ext) = current.extension() {
        worker.set_extension(ext);
    }
    if !worker.exists() {
        return Err(format!(
            "worker binary not found at {}. Build it with `cargo build -p host --bin exec_worker`",
            worker.display()
        ));
    }
    Ok(worker)
}

fn apply_engine_env(command: &mut Command, config: &WorkerLaunchConfig) {
    command.env(
        ENV_EXEC_TIMEOUT_SECS,
        config.engine.execution_timeout_secs.to_string(),
    );
    command.env(
        ENV_EXEC_LOG,
        if config.engine.log_executions { "1" } else { "0" },
    );
}
