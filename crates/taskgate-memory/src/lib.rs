// taskgate-memory/src/lib.rs
// ============================================================================
// Module: Taskgate Memory Library
// Description: Public API surface for the long-horizon memory materializer,
// fact store, and deterministic binder.
// Purpose: Give the CLI a single crate to fold finished runs into a
// queryable fact store and derive reusable binder artifacts from it.
// Dependencies: crate::{checkpoint, store, materializer, binder}
// ============================================================================

//! ## Overview
//! [`checkpoint`] tracks which runs have already been folded in.
//! [`materializer`] discovers pending runs and upserts them into the
//! [`store::FactStore`]. [`binder`] derives stable, fingerprinted artifacts
//! from the fact store's `task_fact` rows.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod binder;
pub mod checkpoint;
pub mod health;
pub mod materializer;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use binder::BINDER_VERSION;
pub use binder::BinderMode;
pub use binder::BinderRow;
pub use binder::derive_rows_from_task_rows;

pub use checkpoint::Checkpoint;
pub use checkpoint::CheckpointError;
pub use checkpoint::discover_runs;
pub use checkpoint::load_checkpoint;
pub use checkpoint::pending_runs;
pub use checkpoint::save_checkpoint;

pub use health::CheckpointHealth;
pub use health::evaluate as evaluate_checkpoint_health;

pub use materializer::MaterializerConfig;
pub use materializer::MaterializerError;
pub use materializer::run_loop;
pub use materializer::run_once;
pub use materializer::run_once_with_audit;

pub use store::EventFact;
pub use store::FactStore;
pub use store::FactStoreError;
pub use store::RunFact;
pub use store::TaskFact;
