use engine::{ExecFailureKind, ExecRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const FALLBACK_FAILURE_MESSAGE: &str = "execution failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Syntax,
    Runtime,
    Timeout,
    Overloaded,
    Internal,
}

impl From<ExecFailureKind> for FailureKind {
    fn from(kind: ExecFailureKind) -> Self {
        match kind {
            ExecFailureKind::Syntax => Self::Syntax,
            ExecFailureKind::Runtime => Self::Runtime,
            ExecFailureKind::Timeout => Self::Timeout,
        }
    }
}

/// Unified bridge result. The two variants keep `error` and `result`
/// mutually exclusive; wire records that mix them do not deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireOutcome", into = "WireOutcome")]
pub enum ExecutionOutcome {
    Success {
        value: Option<Value>,
        logs: Vec<String>,
    },
    Failure {
        kind: FailureKind,
        error: String,
        logs: Vec<String>,
    },
}

impl ExecutionOutcome {
    pub fn success(value: Option<Value>, logs: Vec<String>) -> Self {
        Self::Success { value, logs }
    }

    pub fn failure(kind: FailureKind, error: impl Into<String>, logs: Vec<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            FALLBACK_FAILURE_MESSAGE.to_owned()
        } else {
            error
        };
        Self::Failure { kind, error, logs }
    }

    pub fn from_record(record: ExecRecord) -> Self {
        let mut logs: Vec<String> = record.stdout.lines().map(str::to_owned).collect();
        logs.extend(record.stderr.lines().map(str::to_owned));
        match record.failure {
            Some(failure) => Self::failure(failure.kind.into(), failure.message, logs),
            None => Self::success(record.value, logs),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn logs(&self) -> &[String] {
        match self {
            Self::Success { logs, .. } | Self::Failure { logs, .. } => logs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireOutcome {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    logs: Vec<String>,
}

impl From<ExecutionOutcome> for WireOutcome {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Success { value, logs } => Self {
                success: true,
                result: value,
                error: None,
                error_kind: None,
                logs,
            },
            ExecutionOutcome::Failure { kind, error, logs } => Self {
                success: false,
                result: None,
                error: Some(error),
                error_kind: Some(kind),
                logs,
            },
        }
    }
}

impl TryFrom<WireOutcome> for ExecutionOutcome {
    type Error = String;

    fn try_from(wire: WireOutcome) -> Result<Self, String> {
        if wire.success {
            if wire.error.is_some() || wire.error_kind.is_some() {
                return Err("successful outcome must not carry an error".to_owned());
            }
            return Ok(Self::Success {
                value: wire.result,
                logs: wire.logs,
            });
        }
        if wire.result.is_some() {
            return Err("failed outcome must not carry a result".to_owned());
        }
        let error = wire
            .error
            .filter(|message| !message.trim().is_empty())
            .ok_or_else(|| "failed outcome requires a non-empty error".to_owned())?;
        Ok(Self::Failure {
            kind: wire.error_kind.unwrap_or(FailureKind::Internal),
            error,
            logs: wire.logs,
        })
    }
}
