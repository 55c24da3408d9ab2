//! JSON-RPC server over stdin/stdout.
//!
//! Implements the JSON-RPC 2.0 protocol for daemon communication. Requests
//! are handled one line at a time on the reading thread; notifications come
//! from per-subscription forwarding threads and share the same writer. A
//! forwarder starts only after the response that created it is written.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, error, info, warn};

use crate::cache::LoopStore;
use crate::config::DaemonConfig;
use crate::error::Result;
use crate::generation::{JobOrchestrator, Subscription};

use super::methods::{handle_request, spawn_forwarder};
use super::types::{JsonRpcError, JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Line-oriented JSON writer shared by responses and notifications.
#[derive(Clone)]
pub struct Outbox {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Outbox {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Outbox writing to stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Writes one line and flushes. Write failures are logged, not returned.
    pub fn send_line(&self, line: &str) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!(error = %e, "failed to write to client");
        }
    }

    /// Sends a JSON-RPC notification.
    pub fn notify<T: serde::Serialize>(&self, method: &'static str, params: T) {
        match serde_json::to_string(&JsonRpcNotification::new(method, params)) {
            Ok(json) => self.send_line(&json),
            Err(e) => error!(method, error = %e, "failed to serialize notification"),
        }
    }
}

/// State shared across all request handlers.
pub struct ServerState {
    pub orchestrator: Arc<JobOrchestrator>,
    /// Where completed loops are written.
    pub store: Arc<Mutex<LoopStore>>,
    /// Daemon configuration.
    pub config: DaemonConfig,
    pub outbox: Outbox,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    /// Flag to signal server shutdown.
    shutdown: AtomicBool,
}

impl ServerState {
    /// Creates new server state.
    pub fn new(orchestrator: JobOrchestrator, config: DaemonConfig, outbox: Outbox) -> Self {
        let store = LoopStore::new(config.effective_output_path());
        Self {
            orchestrator: Arc::new(orchestrator),
            store: Arc::new(Mutex::new(store)),
            config,
            outbox,
            forwarders: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Keeps a forwarding thread so shutdown can wait for it.
    pub(crate) fn track_forwarder(&self, handle: JoinHandle<()>) {
        let mut forwarders = self.forwarders.lock().unwrap_or_else(PoisonError::into_inner);
        forwarders.retain(|h| !h.is_finished());
        forwarders.push(handle);
    }

    /// Signals the server to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Returns true if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stops the orchestrator and waits for every forwarding thread to drain.
    pub fn finish(&self) {
        self.orchestrator.shutdown();
        let handles: Vec<_> = self
            .forwarders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("notification forwarder panicked");
            }
        }
    }
}

/// Runs the JSON-RPC server, reading from stdin and writing to stdout.
pub fn run_server(state: ServerState) -> Result<()> {
    let stdin = io::stdin();
    serve(stdin.lock(), &state);
    Ok(())
}

/// Serves requests from `reader` until EOF or a `shutdown` request.
pub fn serve<R: BufRead>(reader: R, state: &ServerState) {
    info!(generator = state.orchestrator.generator_name(), "JSON-RPC server started");

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "error reading stdin");
                break;
            }
        };

        // Skip empty lines
        if line.trim().is_empty() {
            continue;
        }

        let (response, follow) = process_request(&line, state);
        state.outbox.send_line(&response);
        if let Some(subscription) = follow {
            spawn_forwarder(state, subscription);
        }

        if state.is_shutdown() {
            info!("server shutdown requested");
            break;
        }
    }

    state.finish();
    info!("JSON-RPC server stopped");
}

/// Processes a single JSON-RPC request line.
///
/// Returns the response line and, for streaming methods, the subscription
/// to relay once the response is out.
fn process_request(line: &str, state: &ServerState) -> (String, Option<Subscription>) {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            let error = JsonRpcErrorResponse::new(
                None,
                JsonRpcError::parse_error(format!("Invalid JSON: {}", e)),
            );
            return (serde_json::to_string(&error).unwrap_or_default(), None);
        }
    };

    if request.jsonrpc != "2.0" {
        let error = JsonRpcErrorResponse::new(
            Some(request.id),
            JsonRpcError::invalid_request("Invalid JSON-RPC version (expected 2.0)"),
        );
        return (serde_json::to_string(&error).unwrap_or_default(), None);
    }

    debug!(method = %request.method, "request");
    match handle_request(&request.method, request.params, state) {
        Ok(reply) => (
            serde_json::to_string(&JsonRpcResponse::new(request.id, reply.result)).unwrap_or_default(),
            reply.follow,
        ),
        Err(error) => (
            serde_json::to_string(&JsonRpcErrorResponse::new(Some(request.id), error))
                .unwrap_or_default(),
            None,
        ),
    }
}
