use std::env;
use std::io::{self, BufRead, Write};

use engine::{EngineConfig, EngineHandle};
use host::launcher::{ENV_EXEC_LOG, ENV_EXEC_TIMEOUT_SECS};
use host::outcome::ExecutionOutcome;
use host::protocol::{WorkerRequest, WorkerResponse};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = engine_config_from_env()?;
    let engine = EngineHandle::new(config)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let _ = emit(
                    &mut stdout,
                    &WorkerResponse::Error {
                        message: format!("stdin read failed: {err}"),
                    },
                );
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let request = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                let _ = emit(
                    &mut stdout,
                    &WorkerResponse::Error {
                        message: format!("invalid request: {err}"),
                    },
                );
                continue;
            }
        };
        match request {
            WorkerRequest::Ping => emit(&mut stdout, &WorkerResponse::Pong)?,
            WorkerRequest::Shutdown => {
                let _ = runtime.block_on(engine.shutdown());
                emit(&mut stdout, &WorkerResponse::Ack)?;
                break;
            }
            WorkerRequest::Execute { code, reset } => {
                match run_execute(&runtime, &engine, code, reset) {
                    Ok(outcome) => emit(&mut stdout, &WorkerResponse::Outcome(outcome))?,
                    Err(err) => emit(&mut stdout, &WorkerResponse::Error { message: err })?,
                }
            }
        }
    }
    Ok(())
}

fn run_execute(
    runtime: &tokio::runtime::Runtime,
    engine: &EngineHandle,
    code: String,
    reset: bool,
) -> Result<ExecutionOutcome, String> {
    if reset {
        runtime
            .block_on(engine.reset())
            .map_err(|err| err.to_string())?;
    }
    let record = runtime
        .block_on(engine.execute(code))
        .map_err(|err| err.to_string())?;
    Ok(ExecutionOutcome::from_record(record))
}

fn engine_config_from_env() -> Result<EngineConfig, String> {
    let mut config = EngineConfig::default();
    if let Ok(raw) = env::var(ENV_EXEC_TIMEOUT_SECS) {
        config.execution_timeout_secs = raw
            .trim()
            .parse()
            .map_err(|_| format!("invalid {ENV_EXEC_TIMEOUT_SECS}: {raw}"))?;
    }
    if let Ok(raw) = env::var(ENV_EXEC_LOG) {
        let raw = raw.trim();
        config.log_executions = raw == "1" || raw.eq_ignore_ascii_case("true");
    }
    Ok(config)
}

fn emit(stdout: &mut impl Write, response: &WorkerResponse) -> Result<(), String> {
    let payload = serde_json::to_string(response).map_err(|err| err.to_string())?;
    stdout
        .write_all(payload.as_bytes())
        .map_err(|err| format!("stdout write failed: {err}"))?;
    stdout
        .write_all(b"\n")
        .map_err(|err| format!("stdout write failed: {err}"))?;
    stdout
        .flush()
        .map_err(|err| format!("stdout flush failed: {err}"))
}
