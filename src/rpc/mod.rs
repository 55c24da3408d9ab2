//! JSON-RPC module for daemon communication.
//!
//! Provides the JSON-RPC 2.0 server implementation for:
//! - `generate`: Submit a loop job and stream its progress
//! - `subscribe`: Stream an existing job's progress (replay, then live)
//! - `cancel`: Cancel a job
//! - `status`: Look up a job
//! - `ping`: Health check
//! - `shutdown`: Graceful shutdown
//!
//! Notifications:
//! - `loop_progress`: One per progress event
//! - `loop_complete`: Loop written to disk
//! - `loop_error`: Job failed or was cancelled

pub mod methods;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use server::{run_server, serve, Outbox, ServerState};
pub use types::{
    GenerateParams, GenerateResult, JobIdParams, JobStatusResult, JsonRpcError,
    JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, LoopCompleteParams,
    LoopErrorParams, RequestId,
};
