use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use visor_expr::EvalContext;
use visor_memory::MemoryHandle;
use visor_session::{Message, SessionRegistry};
use visor_types::{Event, Scope};

/// Errors a provider or the dispatcher surfaces for one execution. Anything
/// that should become a `CheckResult::failure` issue, not an engine-level
/// abort — the dispatcher is responsible for turning this into issues, not
/// for propagating it past the check boundary.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no provider registered for check type `{0}`")]
    UnknownProviderType(String),
    #[error("invalid options for check `{check}` (type `{provider_type}`): {message}")]
    InvalidOptions {
        check: String,
        provider_type: String,
        message: String,
    },
    #[error("check timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Session(#[from] visor_session::SessionError),
    #[error(transparent)]
    Memory(#[from] visor_memory::MemoryError),
    #[error(transparent)]
    Eval(#[from] visor_expr::EvalError),
    #[error("provider execution failed: {0}")]
    Provider(#[from] anyhow::Error),
}

/// Everything a provider needs to execute one check (§4.4): readonly event,
/// a read-only snapshot of the scope's outputs map (writes flow back through
/// the scheduler, not through the provider), a memory accessor, the run's
/// workspace path, a session registry handle, and a cancellation token.
pub struct DispatchContext {
    pub event: Event,
    pub scope: Scope,
    pub check_name: String,
    pub outputs: Value,
    pub memory: MemoryHandle,
    pub sessions: Arc<SessionRegistry>,
    /// `Some(id)` when the step declared `reuse_ai_session`; the history is
    /// already sanitized by the registry before dispatch.
    pub session_id: Option<String>,
    pub session_history: Vec<Message>,
    pub working_directory: PathBuf,
    pub env: Value,
    pub cancellation: CancellationToken,
    pub attempt: u32,
}

impl DispatchContext {
    /// Builds the sandbox's variable set from this dispatch's view of the
    /// world. Providers that need to resolve a `_js` option (a dynamic
    /// command, URL, or body) evaluate it against this context rather than
    /// rolling their own variable plumbing.
    pub fn eval_context(&self) -> EvalContext {
        EvalContext::new(self.check_name.clone())
            .with_outputs(self.outputs.clone())
            .with_event(&self.event)
            .with_attempt(self.attempt)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
