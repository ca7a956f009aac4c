use serde::{Deserialize, Serialize};

use crate::outcome::ExecutionOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerRequest {
    Ping,
    Execute { code: String, reset: bool },
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerResponse {
    Pong,
    Ack,
    Outcome(ExecutionOutcome),
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::FailureKind;

    #[test]
    fn requests_round_trip_as_tagged_json() {
        let request = WorkerRequest::Execute {
            code: "1+1".to_owned(),
            reset: true,
        };
        let encoded = serde_json::to_string(&request).expect("serialize");
        assert!(encoded.contains("\"kind\":\"execute\""));
        let decoded: WorkerRequest = serde_json::from_str(&encoded).expect("deserialize");
        assert!(matches!(decoded, WorkerRequest::Execute { reset: true, .. }));
    }

    #[test]
    fn outcome_responses_keep_the_bridge_wire_shape() {
        let response = WorkerResponse::Outcome(ExecutionOutcome::failure(
            FailureKind::Runtime,
            "NameError: name 'x' is not defined",
            Vec::new(),
        ));
        let encoded = serde_json::to_string(&response).expect("serialize");
        assert!(encoded.contains("\"kind\":\"outcome\""));
        assert!(encoded.contains("\"success\":false"));
        let decoded: WorkerResponse = serde_json::from_str(&encoded).expect("deserialize");
        assert!(matches!(decoded, WorkerResponse::Outcome(_)));
    }
}
