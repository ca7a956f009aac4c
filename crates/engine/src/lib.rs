pub mod interp;
pub mod log;
pub mod worker;

pub use interp::{ExecFailure, ExecFailureKind, ExecRecord, PyEnv};
pub use worker::EngineHandle;

pub const DEFAULT_EXECUTION_TIMEOUT_SECS: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub execution_timeout_secs: f64,
    pub log_executions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: DEFAULT_EXECUTION_TIMEOUT_SECS,
            log_executions: false,
        }
    }
}
