use serde::{Deserialize, Serialize};

/// How the orchestrator treats a side-effect that follows a matriculation write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Failure aborts the pipeline, reverts the write and reaches the caller.
    Required,
    /// Failure is logged and swallowed; later triggers still run.
    BestEffort,
}

impl TriggerKind {
    pub fn is_required(&self) -> bool {
        matches!(self, TriggerKind::Required)
    }
}
