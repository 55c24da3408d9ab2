//! Progress events streamed to job subscribers.

use serde::{Deserialize, Serialize};

use crate::engine::EngineStage;

/// Stage tag carried by every progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Generating,
    Analyzing,
    SearchingLoopPoint,
    Rendering,
    Completed,
    Failed,
    Cancelled,
}

impl Stage {
    /// Returns the wire name of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Generating => "generating",
            Stage::Analyzing => "analyzing",
            Stage::SearchingLoopPoint => "searching_loop_point",
            Stage::Rendering => "rendering",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::Cancelled => "cancelled",
        }
    }

    /// Returns true for the last event a job will ever emit.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed | Stage::Cancelled)
    }
}

impl From<EngineStage> for Stage {
    fn from(stage: EngineStage) -> Self {
        match stage {
            EngineStage::Analyzing => Stage::Analyzing,
            EngineStage::SearchingLoopPoint => Stage::SearchingLoopPoint,
            EngineStage::Rendering => Stage::Rendering,
        }
    }
}

/// One entry in a job's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    /// Position in the job's event log, starting at 0.
    pub seq: u32,
    pub stage: Stage,
    /// Fraction complete in `[0, 1]`, or `None` when indeterminate.
    pub progress: Option<f32>,
    pub detail: String,
}

impl ProgressEvent {
    pub fn new(
        job_id: impl Into<String>,
        seq: u32,
        stage: Stage,
        progress: Option<f32>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            seq,
            stage,
            progress: progress.map(|p| p.clamp(0.0, 1.0)),
            detail: detail.into(),
        }
    }
}
