use std::thread;

use tokio::sync::{mpsc, oneshot};

use crate::EngineConfig;
use crate::interp::{ExecRecord, PyEnv};
use crate::log::ExecutionLog;

enum EngineCommand {
    Execute {
        code: String,
        response: oneshot::Sender<anyhow::Result<ExecRecord>>,
    },
    Reset {
        response: oneshot::Sender<()>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

/// Async facade over the dedicated interpreter thread. The interpreter is
/// created lazily on first execute and dropped on reset.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::UnboundedSender<EngineCommand>,
}

struct EngineCore {
    config: EngineConfig,
    env: Option<PyEnv>,
    log: ExecutionLog,
}

impl EngineCore {
    fn new(config: EngineConfig) -> Self {
        let log = ExecutionLog::new(config.log_executions);
        Self {
            config,
            env: None,
            log,
        }
    }

    fn execute(&mut self, code: &str) -> anyhow::Result<ExecRecord> {
        if self.env.is_none() {
            self.env = Some(PyEnv::new(&self.config)?);
        }
        let env = self
            .env
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("interpreter not initialized"))?;
        let record = env.execute(code)?;
        self.log.record(code, &record);
        self.log.display_last();
        Ok(record)
    }

    fn reset(&mut self) {
        self.env = None;
        self.log.clear();
    }
}

impl EngineHandle {
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name("engine-worker".to_owned())
            .spawn(move || {
                let mut core = EngineCore::new(config);
                while let Some(command) = receiver.blocking_recv() {
                    match command {
                        EngineCommand::Execute { code, response } => {
                            let _ = response.send(core.execute(&code));
                        }
                        EngineCommand::Reset { response } => {
                            core.reset();
                            let _ = response.send(());
                        }
                        EngineCommand::Shutdown { response } => {
                            let _ = response.send(());
                            break;
                        }
                    }
                }
            })?;

        Ok(Self { sender })
    }

    pub async fn execute(&self, code: String) -> anyhow::Result<ExecRecord> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Execute {
                code,
                response: response_tx,
            })
            .map_err(|_| anyhow::anyhow!("failed to send execute command to engine worker"))?;
        response_rx
            .await
            .map_err(|_| anyhow::anyhow!("engine worker dropped execute response"))?
    }

    pub async fn reset(&self) -> anyhow::Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Reset {
                response: response_tx,
            })
            .map_err(|_| anyhow::anyhow!("failed to send reset command to engine worker"))?;
        response_rx
            .await
            .map_err(|_| anyhow::anyhow!("engine worker dropped reset response"))
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Shutdown {
                response: response_tx,
            })
            .map_err(|_| anyhow::anyhow!("failed to send shutdown command to engine worker"))?;
        response_rx
            .await
            .map_err(|_| anyhow::anyhow!("engine worker dropped shutdown response"))
    }
}
