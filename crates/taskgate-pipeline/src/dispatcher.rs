// taskgate-pipeline/src/dispatcher.rs
// ============================================================================
// Module: Taskgate Dispatcher Supervisor
// Description: Topologically schedules ready tasks into concurrent waves
// with a deterministic tie-break, enforcing tool contracts before dispatch.
// Purpose: The only place a task's worker function is actually invoked.
// Dependencies: taskgate-core, taskgate-eventbus, tokio
// ============================================================================

//! ## Overview
//! Mirrors the orchestrator's `DispatcherSupervisor.dispatch` loop: compute
//! the ready set, sort by tie-break key, take up to `max_workers`, fan the
//! wave out to a bounded pool, collect completions, and repeat until the
//! queue is drained. No teacher crate in this pack schedules bounded
//! concurrent work anywhere in its own `src/` trees other than `tokio::spawn`
//! used by test-only mock servers, so the wave fan-out here follows that same
//! idiom: each wave is a bounded set of `tokio::task::spawn_blocking` calls
//! joined with a `JoinSet`, rather than a hand-rolled thread pool.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use taskgate_core::AttemptRecord;
use taskgate_core::AttemptStatus;
use taskgate_core::RunId;
use taskgate_core::SpawnSpecError;
use taskgate_core::Task;
use taskgate_core::TaskContractError;
use taskgate_core::TaskId;
use taskgate_core::TaskResult;
use taskgate_core::WaveId;
use taskgate_core::WorkQueue;
use taskgate_core::WorkQueueError;
use taskgate_core::model::topics;
use taskgate_eventbus::EventBus;
use taskgate_eventbus::EventBusError;
use thiserror::Error;
use tokio::task::JoinSet;

/// A worker function invoked once per task, producing its complete result
/// (retries, if any, are the caller's concern — see [`crate::harness`]).
pub type WorkerFn = Arc<dyn Fn(&Task) -> TaskResult + Send + Sync>;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised dispatching a work queue.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The work queue failed structural validation.
    #[error(transparent)]
    Graph(#[from] WorkQueueError),
    /// A task failed its tool-contract guard.
    #[error(transparent)]
    Contract(#[from] TaskContractError),
    /// A task's spawn spec failed validation.
    #[error(transparent)]
    Spawn(#[from] SpawnSpecError),
    /// The worker model pool was empty.
    #[error("dispatcher requires at least one worker model")]
    EmptyWorkerModels,
    /// Pending tasks remain but none are ready: a cycle or missing
    /// dependency slipped past graph validation.
    #[error("no dispatchable tasks remain with {pending} pending")]
    NoDispatchableTasks {
        /// Number of tasks still pending when the stall was detected.
        pending: usize,
    },
    /// Publishing an event to the bus failed.
    #[error(transparent)]
    Bus(#[from] EventBusError),
    /// A spawned worker task panicked and could not be joined.
    #[error("worker task join failed: {0}")]
    Join(String),
}

// ============================================================================
// SECTION: Dispatch Summary
// ============================================================================

/// One entry in [`DispatchSummary::dispatch_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOrderEntry {
    /// The wave the task was dispatched in.
    pub wave_id: WaveId,
    /// The dispatched task's identifier.
    pub task_id: TaskId,
    /// The tie-break key used to order this task within its wave.
    pub tiebreak: (String, String, String, String),
}

/// The complete outcome of dispatching a work queue to completion.
#[derive(Debug, Clone)]
pub struct DispatchSummary {
    /// The work queue's run identifier.
    pub run_id: RunId,
    /// Every task's dispatch order, across all waves, in dispatch order.
    pub dispatch_order: Vec<DispatchOrderEntry>,
    /// Every task's final result, in work-queue task order.
    pub results: Vec<TaskResult>,
}

// ============================================================================
// SECTION: Dispatcher Supervisor
// ============================================================================

/// Fans a [`WorkQueue`] out to a bounded worker pool, one wave at a time.
pub struct DispatcherSupervisor {
    bus: Arc<EventBus>,
    worker_models: Vec<String>,
    worker_fn: WorkerFn,
}

impl DispatcherSupervisor {
    /// Builds a new supervisor publishing onto `bus`, round-robining
    /// `worker_models` for tasks that don't request a specific model.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EmptyWorkerModels`] if `worker_models` is empty.
    pub fn new(
        bus: Arc<EventBus>,
        worker_models: Vec<String>,
        worker_fn: WorkerFn,
    ) -> Result<Self, DispatchError> {
        if worker_models.is_empty() {
            return Err(DispatchError::EmptyWorkerModels);
        }
        Ok(Self {
            bus,
            worker_models,
            worker_fn,
        })
    }

    /// Runs `work_queue` to completion, dispatching ready tasks in
    /// deterministic waves (`spec` §4.6).
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the queue is malformed, a task fails its
    /// tool-contract guard, or the bus fails to publish.
    pub async fn dispatch(&self, work_queue: &WorkQueue) -> Result<DispatchSummary, DispatchError> {
        work_queue.validate_task_graph()?;
        for task in &work_queue.tasks {
            task.validate_tool_contract()?;
            if let Some(spawn_spec) = &task.spawn_spec {
                spawn_spec.validate(&work_queue.run_id)?;
            }
        }

        let tasks_by_id: BTreeMap<TaskId, Task> =
            work_queue.tasks.iter().map(|task| (task.task_id.clone(), task.clone())).collect();
        let mut pending: BTreeSet<TaskId> = tasks_by_id.keys().cloned().collect();
        let mut completed: BTreeSet<TaskId> = BTreeSet::new();
        let mut results_by_id: BTreeMap<TaskId, TaskResult> = BTreeMap::new();
        let mut dispatch_order = Vec::new();
        let wave_id = WaveId::new(format!("{}-wave-001", work_queue.run_id));
        let mut model_cursor = 0usize;

        self.bus.publish(EventBus::new_event(
            topics::PLAN_WAVE_CREATED,
            work_queue.run_id.clone(),
            serde_json::json!({"wave_id": wave_id.to_string(), "task_count": pending.len()}),
        ))?;

        while !pending.is_empty() {
            let mut ready: Vec<&Task> = pending
                .iter()
                .filter_map(|id| tasks_by_id.get(id))
                .filter(|task| task.dependencies.iter().all(|dep| completed.contains(dep)))
                .collect();
            if ready.is_empty() {
                return Err(DispatchError::NoDispatchableTasks {
                    pending: pending.len(),
                });
            }
            ready.sort_by_key(|task| task.tiebreak_key());

            let max_workers = work_queue.max_workers as usize;
            let wave: Vec<Task> = ready.into_iter().take(max_workers.max(1)).cloned().collect();

            let mut join_set: JoinSet<(TaskId, TaskResult)> = JoinSet::new();
            for mut task in wave {
                let tiebreak = task.tiebreak_key();
                if task.worker_model.is_none() {
                    task.worker_model = Some(self.worker_models[model_cursor % self.worker_models.len()].clone());
                    model_cursor += 1;
                }
                self.bus.publish(EventBus::new_event(
                    topics::TASK_ASSIGNED,
                    work_queue.run_id.clone(),
                    serde_json::json!({
                        "task_id": task.task_id.to_string(),
                        "wave_id": wave_id.to_string(),
                        "worker_model": task.worker_model,
                        "tiebreak": [tiebreak.0, tiebreak.1, tiebreak.2, tiebreak.3],
                    }),
                ))?;
                dispatch_order.push(DispatchOrderEntry {
                    wave_id: wave_id.clone(),
                    task_id: task.task_id.clone(),
                    tiebreak,
                });

                let worker_fn = Arc::clone(&self.worker_fn);
                join_set.spawn_blocking(move || {
                    let task_id = task.task_id.clone();
                    let result = match std::panic::catch_unwind(AssertUnwindSafe(|| worker_fn(&task))) {
                        Ok(result) => result,
                        Err(payload) => panicked_result(&task, &payload),
                    };
                    (task_id, result)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let (task_id, result) = joined.map_err(|err| DispatchError::Join(err.to_string()))?;
                for attempt in attempt_records_to_publish(&result) {
                    self.bus.publish(EventBus::new_event(
                        topics::TASK_RESULT_RAW,
                        work_queue.run_id.clone(),
                        serde_json::json!({
                            "task_id": task_id.to_string(),
                            "attempt": attempt.attempt,
                            "status": attempt.status,
                            "reason_code": attempt.reason_code,
                            "notes": attempt.notes,
                        }),
                    ))?;
                }
                pending.remove(&task_id);
                completed.insert(task_id.clone());
                results_by_id.insert(task_id, result);
            }
        }

        let results = work_queue
            .tasks
            .iter()
            .filter_map(|task| results_by_id.remove(&task.task_id))
            .collect();

        Ok(DispatchSummary {
            run_id: work_queue.run_id.clone(),
            dispatch_order,
            results,
        })
    }
}

/// Returns the attempt records a completion should publish one
/// `task.result.raw` event per, per `spec` §4.6 step 6 (one per historical
/// attempt, or a single synthetic record when there is none).
fn attempt_records_to_publish(result: &TaskResult) -> Vec<AttemptRecord> {
    if result.attempt_history.is_empty() {
        vec![AttemptRecord {
            attempt: 1,
            status: result.status,
            reason_code: result.reason_code.clone(),
            notes: None,
            duration_ms: 0,
            backoff_ms: None,
        }]
    } else {
        result.attempt_history.clone()
    }
}

/// Builds the result recorded when a worker function panics, per `spec`
/// §4.6 step 5.
fn panicked_result(task: &Task, payload: &(dyn std::any::Any + Send)) -> TaskResult {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string());
    TaskResult {
        task_id: task.task_id.clone(),
        status: AttemptStatus::Fail,
        attempts: 1,
        attempt_history: vec![AttemptRecord {
            attempt: 1,
            status: AttemptStatus::Fail,
            reason_code: Some(taskgate_core::reason_code::EXEC_NONZERO_EXIT.to_string()),
            notes: Some(message),
            duration_ms: 0,
            backoff_ms: None,
        }],
        retry_backoff_ms: Vec::new(),
        reason_code: Some(taskgate_core::reason_code::EXEC_NONZERO_EXIT.to_string()),
        worker_model: task.worker_model.clone().unwrap_or_default(),
        transient: Some(false),
        evidence_bundle_path: String::new(),
        attempt_history_path: String::new(),
        dlq_path: None,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Test-only assertions and a deliberate worker panic are permitted."
)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use taskgate_core::RunId;
    use taskgate_core::TaskId;
    use taskgate_core::TaskStatus;

    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            task_id: TaskId::new(id),
            goal: "goal".to_string(),
            status: TaskStatus::Queued,
            dependencies: deps.iter().map(|d| TaskId::new(*d)).collect::<BTreeSet<_>>(),
            worker_model: None,
            priority: None,
            created_at: None,
            payload_digest: None,
            requested_method: None,
            tool_contract: None,
            spawn_spec: None,
            extra: serde_json::Map::new(),
        }
    }

    fn passing_result(task: &Task) -> TaskResult {
        TaskResult {
            task_id: task.task_id.clone(),
            status: AttemptStatus::Pass,
            attempts: 1,
            attempt_history: vec![],
            retry_backoff_ms: vec![],
            reason_code: None,
            worker_model: task.worker_model.clone().unwrap_or_default(),
            transient: None,
            evidence_bundle_path: String::new(),
            attempt_history_path: String::new(),
            dlq_path: None,
        }
    }

    #[tokio::test]
    async fn dispatches_a_linear_chain_in_order() {
        let bus = Arc::new(EventBus::new(None).unwrap());
        let queue = WorkQueue {
            version: "dome.work.queue/v0.2".to_string(),
            run_id: RunId::new("run-1"),
            base_ref: "main".to_string(),
            max_workers: 2,
            tasks: vec![task("a", &[]), task("b", &["a"])],
        };
        let supervisor = DispatcherSupervisor::new(
            bus,
            vec!["model-a".to_string()],
            Arc::new(passing_result),
        )
        .unwrap();
        let summary = supervisor.dispatch(&queue).await.unwrap();
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.dispatch_order[0].task_id.as_str(), "a");
        assert_eq!(summary.dispatch_order[1].task_id.as_str(), "b");
    }

    #[tokio::test]
    async fn fans_out_an_independent_wave_together() {
        let bus = Arc::new(EventBus::new(None).unwrap());
        let queue = WorkQueue {
            version: "dome.work.queue/v0.2".to_string(),
            run_id: RunId::new("run-1"),
            base_ref: "main".to_string(),
            max_workers: 4,
            tasks: vec![task("a", &[]), task("b", &[]), task("c", &[])],
        };
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = Arc::clone(&seen);
        let worker: WorkerFn = Arc::new(move |t: &Task| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            passing_result(t)
        });
        let supervisor = DispatcherSupervisor::new(bus, vec!["model-a".to_string()], worker).unwrap();
        let summary = supervisor.dispatch(&queue).await.unwrap();
        assert_eq!(summary.results.len(), 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn round_robins_worker_models_when_unset() {
        let bus = Arc::new(EventBus::new(None).unwrap());
        let queue = WorkQueue {
            version: "dome.work.queue/v0.2".to_string(),
            run_id: RunId::new("run-1"),
            base_ref: "main".to_string(),
            max_workers: 1,
            tasks: vec![task("a", &[]), task("b", &["a"])],
        };
        let supervisor = DispatcherSupervisor::new(
            bus,
            vec!["model-a".to_string(), "model-b".to_string()],
            Arc::new(passing_result),
        )
        .unwrap();
        let summary = supervisor.dispatch(&queue).await.unwrap();
        assert_eq!(summary.results[0].worker_model, "model-a");
        assert_eq!(summary.results[1].worker_model, "model-b");
    }

    #[tokio::test]
    async fn worker_panic_becomes_a_fail_result() {
        let bus = Arc::new(EventBus::new(None).unwrap());
        let queue = WorkQueue {
            version: "dome.work.queue/v0.2".to_string(),
            run_id: RunId::new("run-1"),
            base_ref: "main".to_string(),
            max_workers: 1,
            tasks: vec![task("a", &[])],
        };
        let worker: WorkerFn = Arc::new(|_: &Task| panic!("boom"));
        let supervisor = DispatcherSupervisor::new(bus, vec!["model-a".to_string()], worker).unwrap();
        let summary = supervisor.dispatch(&queue).await.unwrap();
        assert_eq!(summary.results[0].status, AttemptStatus::Fail);
        assert_eq!(
            summary.results[0].reason_code.as_deref(),
            Some(taskgate_core::reason_code::EXEC_NONZERO_EXIT)
        );
    }

    #[tokio::test]
    async fn rejects_empty_worker_model_pool() {
        let bus = Arc::new(EventBus::new(None).unwrap());
        assert!(matches!(
            DispatcherSupervisor::new(bus, vec![], Arc::new(passing_result)),
            Err(DispatchError::EmptyWorkerModels)
        ));
    }
}
