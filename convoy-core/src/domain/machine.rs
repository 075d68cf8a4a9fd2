//! Machine assignment domain model
//!
//! Represents one pipeline instance deployed on one machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::lifecycle::MachineState;
use crate::{MachineId, PipelineId};

/// Lifecycle record of a pipeline instance on a machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineAssignment {
    pub pipeline_id: PipelineId,
    pub machine_id: MachineId,

    /// Current lifecycle state
    pub state: MachineState,

    /// Process id of the launched pipeline, while one is believed alive
    pub process_pid: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MachineAssignment {
    /// A freshly created pairing, waiting for its first initialization
    pub fn new(pipeline_id: PipelineId, machine_id: MachineId) -> Self {
        let now = Utc::now();
        Self {
            pipeline_id,
            machine_id,
            state: MachineState::Initializing,
            process_pid: None,
            created_at: now,
            updated_at: now,
        }
    }
}
