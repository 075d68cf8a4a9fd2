//! ID resolver module
//!
//! Resolves task id prefixes to full UUIDs by searching a pipeline's tasks,
//! so users can type short prefixes instead of full ids.

use anyhow::{Context, Result, anyhow};
use convoy_core::PipelineId;
use convoy_orchestrator::Orchestrator;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a task ID or prefix within a pipeline
///
/// # Errors
/// Returns an error if:
/// - No task matches the prefix in this pipeline
/// - Multiple tasks match the prefix (ambiguous)
/// - The ledger cannot be read
pub async fn resolve_task_id(
    orchestrator: &Orchestrator,
    pipeline_id: PipelineId,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let ids = orchestrator
        .task_ids(pipeline_id)
        .await
        .context("Failed to fetch tasks for ID resolution")?;

    pick_unique(&ids, id_or_prefix, pipeline_id)
}

fn pick_unique(ids: &[Uuid], id_or_prefix: &IdOrPrefix, pipeline_id: PipelineId) -> Result<Uuid> {
    let matches: Vec<&Uuid> = ids.iter().filter(|id| id_or_prefix.matches(id)).collect();

    match matches.as_slice() {
        [] => Err(anyhow!(
            "No task found with ID starting with '{}' in pipeline {}",
            id_or_prefix,
            pipeline_id
        )),
        [id] => Ok(**id),
        _ => {
            let ids: Vec<String> = matches.iter().map(|id| id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple tasks in pipeline {}: {}",
                id_or_prefix,
                pipeline_id,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<Uuid> {
        [
            "ab120000-0000-4000-8000-000000000000",
            "ab340000-0000-4000-8000-000000000000",
            "cd560000-0000-4000-8000-000000000000",
        ]
        .iter()
        .map(|s| Uuid::parse_str(s).unwrap())
        .collect()
    }

    #[test]
    fn test_unique_prefix() {
        let ids = ids();
        assert_eq!(pick_unique(&ids, &IdOrPrefix::parse("cd"), 1).unwrap(), ids[2]);
        assert_eq!(pick_unique(&ids, &IdOrPrefix::parse("ab3"), 1).unwrap(), ids[1]);
    }

    #[test]
    fn test_ambiguous_and_missing_prefix() {
        let ids = ids();
        let err = pick_unique(&ids, &IdOrPrefix::parse("ab"), 1).unwrap_err();
        assert!(err.to_string().contains("Ambiguous"));

        let err = pick_unique(&ids, &IdOrPrefix::parse("ff"), 1).unwrap_err();
        assert!(err.to_string().contains("No task found"));
    }
}
