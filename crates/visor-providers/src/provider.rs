use async_trait::async_trait;
use serde_json::Value;
use visor_types::CheckResult;

use crate::context::{DispatchContext, DispatchError};

/// A named implementation satisfying §4.4's provider contract. Providers
/// must be re-entrant across scopes: the same `Provider` instance executes
/// once per `(scope, step)` dispatch and must not retain state between
/// calls beyond what `ctx` hands it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The `type` tag checks declare to select this provider (§4.4's
    /// registered provider types list).
    fn provider_type(&self) -> &'static str;

    /// Structural validation of a check's declared options, run once at
    /// plan time before any dispatch. Should not perform I/O.
    fn validate(&self, options: &Value) -> Result<(), DispatchError>;

    async fn execute(
        &self,
        ctx: &DispatchContext,
        options: &Value,
    ) -> Result<CheckResult, DispatchError>;
}
