//! Shared data model for the Visor check execution engine.
//!
//! Every other crate in the workspace depends on these types rather than
//! redefining them; config, planning, routing, and provider dispatch all
//! speak the same `Event`/`Scope`/`CheckResult` vocabulary.

mod check;
mod event;
mod result;
pub mod rule_ids;
mod scope;

pub use check::{
    BackoffConfig, BackoffMode, Criticality, Fanout, FailIfCondition, FailIfSpec, RetryConfig,
    RoutingBlock, SchemaRef, SessionMode, StepConfig, Transition,
};
pub use event::{Event, EventType};
pub use result::{CheckResult, CheckStatus, Issue, Severity};
pub use scope::{Scope, ScopeSegment};
