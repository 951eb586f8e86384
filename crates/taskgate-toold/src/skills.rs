// taskgate-toold/src/skills.rs
// ============================================================================
// Module: Built-In Sentinel Skills
// Description: The three always-registered skills used to exercise
// SkillExecute without a real subprocess backend.
// Purpose: Give operators and tests a deterministic tool to probe the
// daemon's job lifecycle.
// Dependencies: crate::state
// ============================================================================

//! ## Overview
//! `job.noop` and `skill-execute` succeed trivially. `job.log` emits each
//! string in the task payload's `lines` array as a `log` event, then
//! succeeds. `job.fail` emits an `error` event and transitions straight to
//! `failed`. None of these ever reach [`crate::executor::Executor`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::registry::ToolEntry;
use crate::state::JobState;
use crate::state::StateStore;
use crate::state::StateStoreError;

/// Tool ids handled directly by [`run_builtin_skill`] rather than routed
/// through an [`crate::executor::Executor`].
pub const BUILTIN_TOOL_IDS: [&str; 3] = ["job.noop", "job.log", "job.fail"];

/// Returns [`ToolEntry`] registrations for the built-in sentinel skills, so
/// a fresh registry always has them available.
#[must_use]
pub fn builtin_tool_entries() -> Vec<ToolEntry> {
    BUILTIN_TOOL_IDS
        .iter()
        .map(|tool_id| ToolEntry {
            tool_id: (*tool_id).to_string(),
            description: builtin_description(tool_id).to_string(),
            version: "0.1.0".to_string(),
            executor_backend: "builtin".to_string(),
            entrypoint: Vec::new(),
            env_allowlist: None,
        })
        .collect()
}

fn builtin_description(tool_id: &str) -> &'static str {
    match tool_id {
        "job.noop" => "succeeds immediately with no side effects",
        "job.log" => "emits each string in task.lines as a log event, then succeeds",
        "job.fail" => "emits an error event and transitions to failed",
        _ => "",
    }
}

/// Whether `tool_id` is one of the built-in sentinels.
#[must_use]
pub fn is_builtin(tool_id: &str) -> bool {
    BUILTIN_TOOL_IDS.contains(&tool_id)
}

/// Runs a built-in skill to completion against `store`, appending its
/// events and driving the job's terminal transition.
///
/// # Errors
///
/// Returns [`StateStoreError`] if `job_id` does not exist or the job is
/// already terminal.
pub fn run_builtin_skill(
    store: &dyn StateStore,
    job_id: &str,
    tool_id: &str,
    task: &serde_json::Value,
) -> Result<(), StateStoreError> {
    store.transition(job_id, JobState::Running)?;
    match tool_id {
        "job.log" => {
            let lines = task.get("lines").and_then(serde_json::Value::as_array).cloned().unwrap_or_default();
            for line in &lines {
                let text = line.as_str().map_or_else(|| line.to_string(), str::to_string);
                store.append_event(job_id, "log", serde_json::json!({"stream": "stdout", "line": text}))?;
            }
            store.transition(job_id, JobState::Succeeded)?;
        }
        "job.fail" => {
            store.append_event(job_id, "error", serde_json::json!({"reason": "job.fail sentinel invoked"}))?;
            store.transition(job_id, JobState::Failed)?;
        }
        _ => {
            store.transition(job_id, JobState::Succeeded)?;
        }
    }
    store.append_event(job_id, "state_change", serde_json::json!({"tool_id": tool_id}))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::*;
    use crate::state::InMemoryStateStore;

    fn seeded_job(store: &InMemoryStateStore, job_id: &str, skill_id: &str) {
        store
            .submit(
                crate::state::JobRecord {
                    job_id: job_id.to_string(),
                    run_id: "run-1".to_string(),
                    state: JobState::Queued,
                    skill_id: skill_id.to_string(),
                    profile: "default".to_string(),
                    idempotency_key: format!("key-{job_id}"),
                    request_hash: "hash".to_string(),
                    artifacts: Vec::new(),
                    events: Vec::new(),
                    updated_at_epoch: crate::state::now_epoch(),
                },
                "client",
            )
            .unwrap();
    }

    #[test]
    fn job_noop_succeeds_with_no_events_beyond_the_state_change() {
        let store = InMemoryStateStore::new();
        seeded_job(&store, "job-1", "job.noop");
        run_builtin_skill(&store, "job-1", "job.noop", &serde_json::json!({})).unwrap();
        let job = store.get("job-1").unwrap();
        assert_eq!(job.state, JobState::Succeeded);
    }

    #[test]
    fn job_log_emits_a_log_event_per_line_then_succeeds() {
        let store = InMemoryStateStore::new();
        seeded_job(&store, "job-1", "job.log");
        run_builtin_skill(&store, "job-1", "job.log", &serde_json::json!({"lines": ["a", "b"]})).unwrap();
        let job = store.get("job-1").unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        let log_events = job.events.iter().filter(|event| event.event_type == "log").count();
        assert_eq!(log_events, 2);
    }

    #[test]
    fn job_fail_emits_an_error_and_transitions_to_failed() {
        let store = InMemoryStateStore::new();
        seeded_job(&store, "job-1", "job.fail");
        run_builtin_skill(&store, "job-1", "job.fail", &serde_json::json!({})).unwrap();
        let job = store.get("job-1").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.events.iter().any(|event| event.event_type == "error"));
    }
}
