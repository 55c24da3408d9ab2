//! Job scheduling and the generator seam.
//!
//! - [`JobOrchestrator`]: lanes, queue, progress streams and cancellation
//! - [`Generator`]: text-to-music model interface with synthetic and
//!   external-command implementations

pub mod backend;
pub mod command;
pub mod orchestrator;
pub mod queue;
pub mod synthetic;

pub use backend::{create_generator, GenerationRequest, Generator, GeneratorKind};
pub use command::CommandGenerator;
pub use orchestrator::{JobOrchestrator, OrchestratorConfig, Subscription};
pub use queue::{JobQueue, QueueFullError, DEFAULT_MAX_QUEUE};
pub use synthetic::SyntheticGenerator;
