//! In-flight registry
//!
//! Tracks which (pipeline, machine) pairs and which tasks have an operation
//! running in this process. A claim is released when its guard is dropped.

use convoy_core::{MachineId, PipelineId};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

type Set<K> = Arc<Mutex<HashSet<K>>>;

#[derive(Clone, Default)]
pub(crate) struct InFlight {
    machines: Set<(PipelineId, MachineId)>,
    tasks: Set<Uuid>,
}

/// Guard holding one registry entry
pub(crate) struct Claim<K: Eq + Hash> {
    set: Set<K>,
    key: K,
}

impl<K: Eq + Hash> Drop for Claim<K> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl InFlight {
    /// Claims every machine or none of them
    ///
    /// Returns the id of the first machine that is already busy on failure.
    pub fn claim_machines(
        &self,
        pipeline_id: PipelineId,
        machine_ids: &[MachineId],
    ) -> Result<Vec<Claim<(PipelineId, MachineId)>>, MachineId> {
        let mut set = self.machines.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(busy) = machine_ids
            .iter()
            .find(|id| set.contains(&(pipeline_id, **id)))
        {
            return Err(*busy);
        }

        Ok(machine_ids
            .iter()
            .map(|id| {
                set.insert((pipeline_id, *id));
                Claim {
                    set: Arc::clone(&self.machines),
                    key: (pipeline_id, *id),
                }
            })
            .collect())
    }

    pub fn claim_task(&self, task_id: Uuid) -> Claim<Uuid> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id);
        Claim {
            set: Arc::clone(&self.tasks),
            key: task_id,
        }
    }

    pub fn is_machine_busy(&self, pipeline_id: PipelineId, machine_id: MachineId) -> bool {
        self.machines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(pipeline_id, machine_id))
    }

    pub fn is_pipeline_busy(&self, pipeline_id: PipelineId) -> bool {
        self.machines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(p, _)| *p == pipeline_id)
    }

    pub fn is_task_running(&self, task_id: Uuid) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_are_exclusive_and_released_on_drop() {
        let registry = InFlight::default();

        let claims = registry.claim_machines(1, &[10, 11]).unwrap();
        assert!(registry.is_machine_busy(1, 10));
        assert!(registry.is_pipeline_busy(1));
        assert_eq!(registry.claim_machines(1, &[12, 11]).err(), Some(11));

        // The failed claim must not have taken machine 12
        assert!(!registry.is_machine_busy(1, 12));

        drop(claims);
        assert!(!registry.is_pipeline_busy(1));
        assert!(registry.claim_machines(1, &[11]).is_ok());
    }

    #[test]
    fn test_same_machine_on_another_pipeline() {
        let registry = InFlight::default();
        let _claims = registry.claim_machines(1, &[10]).unwrap();
        assert!(registry.claim_machines(2, &[10]).is_ok());
    }

    #[test]
    fn test_task_claim() {
        let registry = InFlight::default();
        let task_id = Uuid::new_v4();
        let claim = registry.claim_task(task_id);
        assert!(registry.is_task_running(task_id));
        drop(claim);
        assert!(!registry.is_task_running(task_id));
    }
}
