//! Planner, scheduler, layered config, and aggregation for the check
//! execution engine (§4.1, §4.2, §4.6, §4.11). Grounded on the teacher's
//! `src-tauri/src/orchestrator/` module, generalised from a flat task runner
//! to a dependency-aware, routing-driven step engine.

pub mod aggregation;
pub mod config;
pub mod error;
pub mod planner;
pub mod scheduler;

pub use aggregation::{aggregate, has_user_visible_failure, ReviewSummary, RunStats, StepOutcome};
pub use config::{
    ConfigSnapshot, ConfigSnapshotStore, ConfigStore, ExtendsSpec, MemoryConfig, RawStep, RoutingDefaults,
    SnapshotTrigger, TagFilter, VisorConfig, WorkspaceConfig,
};
pub use error::{ConfigError, PlanError, SchedulerError};
pub use planner::{Plan, PlannedStep, Planner};
pub use scheduler::{Engine, EngineOptions};
