use std::process::{Command, Stdio};

use host::WorkerHandle;
use host::client::WorkerClient;
use host::outcome::{ExecutionOutcome, FailureKind};
use serde_json::Value;

fn spawn_worker() -> WorkerClient {
    let child = Command::new(env!("CARGO_BIN_EXE_exec_worker"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn worker");
    let mut client = WorkerClient::new(child).expect("worker client");
    client.ping().expect("ping");
    client
}

fn expect_failure(outcome: ExecutionOutcome) -> (FailureKind, String) {
    match outcome {
        ExecutionOutcome::Failure { kind, error, .. } => (kind, error),
        ExecutionOutcome::Success { .. } => panic!("expected failure"),
    }
}

#[test]
fn worker_executes_over_the_line_protocol() {
    let mut worker = spawn_worker();

    let outcome = worker.execute("x = 20\nx + 22", false).expect("execute");
    match outcome {
        ExecutionOutcome::Success { value, .. } => {
            assert_eq!(value, Some(Value::from(42)));
        }
        ExecutionOutcome::Failure { .. } => panic!("expected success"),
    }

    let outcome = worker.execute("print('hello')", false).expect("execute");
    assert!(outcome.is_success());
    assert_eq!(outcome.logs(), ["hello"]);

    // The namespace survives between executions until a reset discards it.
    let outcome = worker.execute("x", true).expect("execute");
    let (kind, error) = expect_failure(outcome);
    assert_eq!(kind, FailureKind::Runtime);
    assert!(error.contains("NameError"));

    let outcome = worker.execute("def (", false).expect("execute");
    let (kind, error) = expect_failure(outcome);
    assert_eq!(kind, FailureKind::Syntax);
    assert!(!error.is_empty());

    worker.terminate();
}
