use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

use engine::EngineHandle;

use crate::dispatch::{BridgeHandle, DispatchError, ExecJob};
use crate::outcome::{ExecutionOutcome, FailureKind};

/// The one operation UI code can ask of the host. Calls always resolve to an
/// outcome; transport and machinery failures arrive in-band.
#[async_trait]
pub trait ExecutionBridge: Send + Sync {
    async fn execute_code(&self, code: &str) -> ExecutionOutcome;
}

/// Notification helper exposed to the UI layer next to the bridge.
pub trait IpcChannel: Send + Sync {
    fn emit(&self, channel: &str, payload: Value);
}

/// The fixed set of host capabilities handed to the UI layer at startup.
#[derive(Clone)]
pub struct Capabilities {
    pub ipc: Arc<dyn IpcChannel>,
    pub api: Arc<dyn ExecutionBridge>,
}

/// Production bridge: routes executions through the dispatcher to a worker
/// process.
#[derive(Clone)]
pub struct DispatchBridge {
    handle: BridgeHandle,
}

impl DispatchBridge {
    pub fn new(handle: BridgeHandle) -> Self {
        Self { handle }
    }

    pub async fn execute(&self, code: &str, reset: bool) -> ExecutionOutcome {
        let (respond_to, response) = oneshot::channel();
        let job = ExecJob {
            code: code.to_owned(),
            reset,
            respond_to,
        };
        if let Err(err) = self.handle.try_dispatch(job) {
            return fold_dispatch_error(err);
        }
        match response.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => fold_dispatch_error(err),
            Err(_) => ExecutionOutcome::failure(
                FailureKind::Internal,
                "execution response channel closed",
                Vec::new(),
            ),
        }
    }
}

#[async_trait]
impl ExecutionBridge for DispatchBridge {
    async fn execute_code(&self, code: &str) -> ExecutionOutcome {
        self.execute(code, false).await
    }
}

/// Embedded bridge: drives an engine in this process, skipping the worker
/// boundary. Used by tests and library consumers.
pub struct InProcessBridge {
    engine: EngineHandle,
}

impl InProcessBridge {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ExecutionBridge for InProcessBridge {
    async fn execute_code(&self, code: &str) -> ExecutionOutcome {
        match self.engine.execute(code.to_owned()).await {
            Ok(record) => ExecutionOutcome::from_record(record),
            Err(err) => {
                ExecutionOutcome::failure(FailureKind::Internal, err.to_string(), Vec::new())
            }
        }
    }
}

fn fold_dispatch_error(err: DispatchError) -> ExecutionOutcome {
    let kind = match err {
        DispatchError::Overloaded => FailureKind::Overloaded,
        DispatchError::Internal(_) => FailureKind::Internal,
    };
    ExecutionOutcome::failure(kind, err.to_string(), Vec::new())
}

#[derive(Debug, Clone, PartialEq)]
pub struct IpcEvent {
    pub channel: String,
    pub payload: Value,
}

/// Broadcast-backed `IpcChannel`; events with no subscribers are dropped.
#[derive(Clone)]
pub struct EventIpc {
    sender: broadcast::Sender<IpcEvent>,
}

impl EventIpc {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IpcEvent> {
        self.sender.subscribe()
    }
}

impl IpcChannel for EventIpc {
    fn emit(&self, channel: &str, payload: Value) {
        let _ = self.sender.send(IpcEvent {
            channel: channel.to_owned(),
            payload,
        });
    }
}
