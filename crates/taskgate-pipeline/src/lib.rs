// taskgate-pipeline/src/lib.rs
// ============================================================================
// Module: Taskgate Pipeline Library
// Description: Public API surface for the planner, dispatcher, implementer
// harness, checker, promoter, and state writer.
// Purpose: Give the run loop and CLI a single crate implementing every
// pipeline stage between a pre-contract and a persisted state space.
// Dependencies: crate::{planner, dispatcher, harness, checker, promoter,
// statewriter}
// ============================================================================

//! ## Overview
//! Data flows through these modules in one fixed order: a [`PreContract`]
//! becomes a [`WorkQueue`] ([`planner`]); the queue is dispatched to workers
//! in waves ([`dispatcher`]); each task's attempts are retried and persisted
//! ([`harness`]); the run's summary is gated into a single verdict
//! ([`checker`]); the verdict becomes a promotion decision ([`promoter`]);
//! and the promotion folds into the run's persisted state space
//! ([`statewriter`]).

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod checker;
pub mod dispatcher;
pub mod harness;
pub mod planner;
pub mod promoter;
pub mod statewriter;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use checker::CheckerError;
pub use checker::VerifyOutcome;
pub use checker::alert;
pub use checker::create_gate_decision;
pub use checker::deterministic_trace_ref;
pub use checker::record_gate_decision;

pub use dispatcher::DispatchError;
pub use dispatcher::DispatchOrderEntry;
pub use dispatcher::DispatchSummary;
pub use dispatcher::DispatcherSupervisor;
pub use dispatcher::WorkerFn;

pub use harness::HarnessError;
pub use harness::ImplementerHarness;
pub use harness::PersistedTaskResult;
pub use harness::RawOutcome;
pub use harness::RawWorkerFn;
pub use harness::RetryPolicy;
pub use harness::RetryingWorker;
pub use harness::RunSummary;
pub use harness::dlq;
pub use harness::jittered_backoff_ms;

pub use planner::PlannerError;
pub use planner::WORK_QUEUE_VERSION;
pub use planner::pre_contract_to_work_queue;
pub use planner::run_id_for;
pub use planner::task_ids_for_packet;

pub use promoter::PromotionPolicy;
pub use promoter::create_promotion_decision;
pub use promoter::record_promotion;

pub use statewriter::STATE_SPACE_VERSION;
pub use statewriter::StateSpace;
pub use statewriter::StateWriterError;
pub use statewriter::TaskPreferences;
pub use statewriter::WorkItem;
pub use statewriter::WorkItemGate;
pub use statewriter::WorkItemNode;
pub use statewriter::replay_state_space_from_events;
pub use statewriter::substrate;
pub use statewriter::update_state_space;
