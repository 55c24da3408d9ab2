//! JSON-RPC types for the daemon protocol.
//!
//! Requests and responses follow JSON-RPC 2.0. Application errors use the
//! -32000..-32009 range with the stable error code in `data.error_code`.

use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, RetryAdvice};
use crate::types::{FailureReason, JobParams, JobState, LoopConstraints, LoopMetadata};

/// JSON-RPC version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Integer(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

/// A JSON-RPC request wrapper.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub id: RequestId,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A JSON-RPC response wrapper.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse<T: Serialize> {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub result: T,
}

impl<T: Serialize> JsonRpcResponse<T> {
    pub fn new(id: RequestId, result: T) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// A JSON-RPC error response.
#[derive(Debug, Serialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: &'static str,
    pub id: Option<RequestId>,
    pub error: JsonRpcError,
}

impl JsonRpcErrorResponse {
    pub fn new(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonRpcErrorData>,
}

/// Extended error data for application-specific errors.
#[derive(Debug, Serialize)]
pub struct JsonRpcErrorData {
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub recovery_hint: String,
    pub retry: RetryAdvice,
}

impl JsonRpcError {
    /// Creates a parse error (-32700).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    /// Creates an invalid request error (-32600).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    /// Creates a method not found error (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method),
            data: None,
        }
    }

    /// Creates an invalid params error (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    /// Creates an internal error (-32603).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }
}

impl From<&DaemonError> for JsonRpcError {
    fn from(err: &DaemonError) -> Self {
        Self {
            code: err.code.rpc_code(),
            message: err.code.description().to_string(),
            data: Some(JsonRpcErrorData {
                error_code: err.code.as_str().to_string(),
                details: Some(err.message.clone()),
                recovery_hint: err.code.recovery_hint().to_string(),
                retry: err.code.retry_advice(),
            }),
        }
    }
}

impl From<DaemonError> for JsonRpcError {
    fn from(err: DaemonError) -> Self {
        Self::from(&err)
    }
}

// ============================================================================
// Requests and results
// ============================================================================

/// Parameters for a generate request.
#[derive(Debug, Deserialize)]
pub struct GenerateParams {
    /// Text description of desired music.
    pub prompt: String,

    /// Target tempo (24-240 BPM).
    pub bpm: f64,

    /// Shortest acceptable loop in seconds (8-128).
    pub min_duration: f64,

    /// Longest acceptable loop in seconds (8-128).
    pub max_duration: f64,

    /// Random seed for reproducibility; null for random.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Model label recorded with the job; defaults to the daemon's generator.
    #[serde(default)]
    pub model: Option<String>,
}

impl GenerateParams {
    /// Validates the constraints and builds job parameters.
    pub fn into_job_params(self) -> Result<JobParams, JsonRpcError> {
        let constraints =
            LoopConstraints::new(self.bpm, self.min_duration, self.max_duration, self.seed)
                .map_err(|e| JsonRpcError::from(DaemonError::from(e)))?;
        let params = JobParams {
            prompt: self.prompt,
            constraints,
            model: self.model,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Response for a generate request.
#[derive(Debug, Serialize)]
pub struct GenerateResult {
    pub job_id: String,

    /// Deterministic id the finished loop will be stored under.
    pub loop_id: String,

    /// State right after submission.
    pub state: JobState,

    /// Queue position (0 = next to run), if still queued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,

    /// Seed that will be used.
    pub seed: u64,
}

/// Parameters naming a single job.
#[derive(Debug, Deserialize)]
pub struct JobIdParams {
    pub job_id: String,
}

/// Response for `status`, `cancel` and `subscribe`.
#[derive(Debug, Serialize)]
pub struct JobStatusResult {
    pub job_id: String,
    pub loop_id: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<LoopMetadata>,
    /// Where the loop was written, once stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

// ============================================================================
// Notifications
// ============================================================================

/// A JSON-RPC notification (no id field).
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<T: Serialize> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: T,
}

impl<T: Serialize> JsonRpcNotification<T> {
    pub fn new(method: &'static str, params: T) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Notification sent when a loop has been rendered and written.
#[derive(Debug, Serialize)]
pub struct LoopCompleteParams {
    pub job_id: String,
    pub loop_id: String,

    /// Absolute path to the loop WAV file.
    pub path: String,

    pub prompt: String,

    pub metadata: LoopMetadata,
}

/// Notification sent when a job fails or is cancelled.
#[derive(Debug, Serialize)]
pub struct LoopErrorParams {
    pub job_id: String,

    /// Error code.
    pub code: String,

    /// Human-readable error message.
    pub message: String,

    pub recovery_hint: String,

    pub retry: RetryAdvice,
}

impl LoopErrorParams {
    pub fn new(job_id: impl Into<String>, reason: &FailureReason) -> Self {
        Self {
            job_id: job_id.into(),
            code: reason.code.as_str().to_string(),
            message: reason.message.clone(),
            recovery_hint: reason.code.recovery_hint().to_string(),
            retry: reason.code.retry_advice(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn params(prompt: &str, bpm: f64, min: f64, max: f64) -> GenerateParams {
        GenerateParams {
            prompt: prompt.to_string(),
            bpm,
            min_duration: min,
            max_duration: max,
            seed: Some(42),
            model: None,
        }
    }

    #[test]
    fn request_id_from_int() {
        let id: RequestId = 42.into();
        assert_eq!(id, RequestId::Integer(42));
    }

    #[test]
    fn request_id_from_string() {
        let id: RequestId = "abc".to_string().into();
        assert_eq!(id, RequestId::String("abc".to_string()));
    }

    #[test]
    fn generate_params_validate_empty_prompt() {
        let err = params("", 120.0, 16.0, 32.0).into_job_params().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPrompt.rpc_code());
    }

    #[test]
    fn generate_params_validate_long_prompt() {
        let err = params(&"x".repeat(1001), 120.0, 16.0, 32.0)
            .into_job_params()
            .unwrap_err();
        assert_eq!(err.code, -32000);
    }

    #[test]
    fn generate_params_validate_constraints() {
        let err = params("lofi", 300.0, 16.0, 32.0).into_job_params().unwrap_err();
        assert_eq!(err.code, -32001);
        let err = params("lofi", 120.0, 40.0, 20.0).into_job_params().unwrap_err();
        assert_eq!(err.data.unwrap().error_code, "INVALID_CONSTRAINTS");
    }

    #[test]
    fn generate_params_validate_ok() {
        let job = params("lofi", 90.0, 16.0, 32.0).into_job_params().unwrap();
        assert_eq!(job.constraints.seed, Some(42));
        assert_eq!(job.constraints.bpm, 90.0);
    }

    #[test]
    fn generate_params_deserialize_defaults() {
        let parsed: GenerateParams = serde_json::from_value(serde_json::json!({
            "prompt": "rain",
            "bpm": 80,
            "min_duration": 16,
            "max_duration": 24
        }))
        .unwrap();
        assert_eq!(parsed.seed, None);
        assert_eq!(parsed.model, None);
    }

    #[test]
    fn json_rpc_error_codes() {
        assert_eq!(JsonRpcError::parse_error("").code, -32700);
        assert_eq!(JsonRpcError::invalid_request("").code, -32600);
        assert_eq!(JsonRpcError::method_not_found("").code, -32601);
        assert_eq!(JsonRpcError::invalid_params("").code, -32602);
        assert_eq!(JsonRpcError::internal_error("").code, -32603);
        assert_eq!(JsonRpcError::from(DaemonError::queue_full(10)).code, -32002);
        assert_eq!(JsonRpcError::from(DaemonError::job_not_found("x")).code, -32003);
    }

    #[test]
    fn daemon_error_carries_hint_and_retry() {
        let err = JsonRpcError::from(DaemonError::queue_full(3));
        let data = err.data.unwrap();
        assert_eq!(data.error_code, "QUEUE_FULL");
        assert_eq!(data.retry, RetryAdvice::RetryAsIs);
        assert!(!data.recovery_hint.is_empty());
    }

    #[test]
    fn loop_error_params_from_failure() {
        let reason = FailureReason {
            code: ErrorCode::NoValidLoopPoint,
            message: "no candidate".into(),
        };
        let params = LoopErrorParams::new("job", &reason);
        assert_eq!(params.code, "NO_VALID_LOOP_POINT");
        assert_eq!(params.retry, RetryAdvice::ChangeRequest);
    }
}
