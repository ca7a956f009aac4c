use std::sync::mpsc;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::thread;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::outcome::ExecutionOutcome;
use crate::pool::WorkerPool;
use crate::{WorkerHandle, WorkerLauncher};

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("execution queue is full; retry later")]
    Overloaded,
    #[error("dispatcher unavailable: {0}")]
    Internal(String),
}

#[derive(Debug)]
pub struct ExecJob {
    pub code: String,
    pub reset: bool,
    pub respond_to: oneshot::Sender<Result<ExecutionOutcome, DispatchError>>,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub ingress_capacity: usize,
    pub pool_size: usize,
}

/// Ingress side of the dispatcher. Executions run in submission order with
/// at most one in flight; a full queue is reported instead of blocking.
#[derive(Clone)]
pub struct BridgeHandle {
    sender: SyncSender<ExecJob>,
}

impl BridgeHandle {
    pub fn try_dispatch(&self, job: ExecJob) -> Result<(), DispatchError> {
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DispatchError::Overloaded),
            Err(TrySendError::Disconnected(_)) => {
                Err(DispatchError::Internal("dispatcher thread is gone".to_owned()))
            }
        }
    }
}

pub fn spawn_dispatcher(
    config: DispatchConfig,
    launcher: Box<dyn WorkerLauncher>,
) -> Result<BridgeHandle, String> {
    let pool = WorkerPool::new(launcher, config.pool_size)?;
    let (sender, receiver) = mpsc::sync_channel::<ExecJob>(config.ingress_capacity.max(1));

    thread::Builder::new()
        .name("bridge-dispatcher".to_owned())
        .spawn(move || {
            run_dispatch_loop(pool, receiver);
        })
        .map_err(|err| format!("failed to spawn dispatcher: {err}"))?;

    Ok(BridgeHandle { sender })
}

fn run_dispatch_loop(mut pool: WorkerPool, receiver: Receiver<ExecJob>) {
    let mut current: Option<Box<dyn WorkerHandle>> = None;

    while let Ok(job) = receiver.recv() {
        let ExecJob {
            code,
            reset,
            respond_to,
        } = job;

        if current.is_none() {
            match pool.acquire() {
                Ok(handle) => current = Some(handle),
                Err(err) => {
                    let _ = respond_to.send(Err(DispatchError::Internal(err)));
                    continue;
                }
            }
        }

        let handle = current.as_mut().expect("worker acquired before dispatch");
        match handle.execute(&code, reset) {
            Ok(outcome) => {
                let _ = respond_to.send(Ok(outcome));
            }
            Err(err) => {
                if let Some(failed) = current.take() {
                    pool.retire(failed);
                }
                let _ = respond_to.send(Err(DispatchError::Internal(err)));
            }
        }
    }

    if let Some(handle) = current.take() {
        pool.retire(handle);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{Sender, channel};

    use super::*;

    struct ScriptedWorker {
        id: usize,
        executed: Sender<(usize, String)>,
        fail_on: Option<String>,
    }

    impl WorkerHandle for ScriptedWorker {
        fn execute(&mut self, code: &str, _reset: bool) -> Result<ExecutionOutcome, String> {
            self.executed
                .send((self.id, code.to_owned()))
                .map_err(|_| "test channel closed".to_owned())?;
            if self.fail_on.as_deref() == Some(code) {
                return Err("worker crashed".to_owned());
            }
            Ok(ExecutionOutcome::success(
                Some(serde_json::Value::from(code.len() as u64)),
                Vec::new(),
            ))
        }

        fn terminate(&mut self) {}

        fn identifier(&self) -> String {
            format!("scripted:{}", self.id)
        }
    }

    struct ScriptedLauncher {
        launches: Arc<AtomicUsize>,
        executed: Sender<(usize, String)>,
        fail_on: Option<String>,
    }

    impl WorkerLauncher for ScriptedLauncher {
        fn launch(&self) -> Result<Box<dyn WorkerHandle>, String> {
            let id = self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedWorker {
                id,
                executed: self.executed.clone(),
                fail_on: self.fail_on.clone(),
            }))
        }
    }

    fn dispatch(handle: &BridgeHandle, code: &str) -> oneshot::Receiver<Result<ExecutionOutcome, DispatchError>> {
        let (respond_to, response) = oneshot::channel();
        handle
            .try_dispatch(ExecJob {
                code: code.to_owned(),
                reset: false,
                respond_to,
            })
            .expect("dispatch");
        response
    }

    #[tokio::test]
    async fn executes_jobs_in_submission_order() {
        let (executed_tx, executed_rx) = channel();
        let handle = spawn_dispatcher(
            DispatchConfig {
                ingress_capacity: 8,
                pool_size: 0,
            },
            Box::new(ScriptedLauncher {
                launches: Arc::new(AtomicUsize::new(0)),
                executed: executed_tx,
                fail_on: None,
            }),
        )
        .expect("dispatcher");

        let first = dispatch(&handle, "a = 1");
        let second = dispatch(&handle, "b = 2");
        let third = dispatch(&handle, "c = 3");
        for response in [first, second, third] {
            response.await.expect("response").expect("outcome");
        }

        let order: Vec<String> = executed_rx.try_iter().map(|(_, code)| code).collect();
        assert_eq!(order, ["a = 1", "b = 2", "c = 3"]);
    }

    #[tokio::test]
    async fn failed_workers_are_retired_and_replaced() {
        let launches = Arc::new(AtomicUsize::new(0));
        let (executed_tx, executed_rx) = channel();
        let handle = spawn_dispatcher(
            DispatchConfig {
                ingress_capacity: 8,
                pool_size: 0,
            },
            Box::new(ScriptedLauncher {
                launches: launches.clone(),
                executed: executed_tx,
                fail_on: Some("boom".to_owned()),
            }),
        )
        .expect("dispatcher");

        dispatch(&handle, "fine").await.expect("response").expect("outcome");
        let failed = dispatch(&handle, "boom").await.expect("response");
        assert!(matches!(failed, Err(DispatchError::Internal(_))));
        dispatch(&handle, "after").await.expect("response").expect("outcome");

        let runs: Vec<(usize, String)> = executed_rx.try_iter().collect();
        assert_eq!(runs[0].0, runs[1].0);
        assert_ne!(runs[1].0, runs[2].0);
        assert_eq!(launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reports_overload_when_the_queue_is_full() {
        let (executed_tx, executed_rx) = channel();
        let (release_tx, release_rx) = channel::<()>();

        struct BlockingWorker {
            entered: Sender<()>,
            release: Receiver<()>,
        }

        impl WorkerHandle for BlockingWorker {
            fn execute(&mut self, _code: &str, _reset: bool) -> Result<ExecutionOutcome, String> {
                let _ = self.entered.send(());
                let _ = self.release.recv();
                Ok(ExecutionOutcome::success(None, Vec::new()))
            }

            fn terminate(&mut self) {}

            fn identifier(&self) -> String {
                "blocking".to_owned()
            }
        }

        struct BlockingLauncher {
            worker: std::sync::Mutex<Option<BlockingWorker>>,
        }

        impl WorkerLauncher for BlockingLauncher {
            fn launch(&self) -> Result<Box<dyn WorkerHandle>, String> {
                let worker = self
                    .worker
                    .lock()
                    .map_err(|_| "launcher poisoned".to_owned())?
                    .take()
                    .ok_or_else(|| "single worker already launched".to_owned())?;
                Ok(Box::new(worker))
            }
        }

        let handle = spawn_dispatcher(
            DispatchConfig {
                ingress_capacity: 1,
                pool_size: 0,
            },
            Box::new(BlockingLauncher {
                worker: std::sync::Mutex::new(Some(BlockingWorker {
                    entered: executed_tx,
                    release: release_rx,
                })),
            }),
        )
        .expect("dispatcher");

        let in_flight = dispatch(&handle, "slow");
        executed_rx.recv().expect("worker entered");
        let queued = dispatch(&handle, "queued");

        let (respond_to, _rejected) = oneshot::channel();
        let overflow = handle.try_dispatch(ExecJob {
            code: "overflow".to_owned(),
            reset: false,
            respond_to,
        });
        assert!(matches!(overflow, Err(DispatchError::Overloaded)));

        release_tx.send(()).expect("release first");
        executed_rx.recv().expect("worker entered again");
        release_tx.send(()).expect("release second");
        in_flight.await.expect("response").expect("outcome");
        queued.await.expect("response").expect("outcome");
    }
}
