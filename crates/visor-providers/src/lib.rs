//! Provider registry and dispatcher (§4.4): looks up a provider by declared
//! `type`, validates its options, invokes it under a timeout, and normalises
//! whatever comes back into a `CheckResult`. The 15 registered provider
//! types live under `providers/`; the `ai`/`claude-code` completion backends
//! live in `llm`.

mod context;
mod llm;
mod provider;
mod providers;
mod registry;

#[cfg(test)]
mod test_support;

pub use context::{DispatchContext, DispatchError};
pub use provider::Provider;
pub use providers::{
    ClaudeCodeProvider, CommandProvider, GitCheckoutProvider, GithubProvider, HttpClientProvider,
    HttpInputProvider, HttpProvider, HumanInputProvider, LlmProvider, LogProvider, McpProvider,
    MemoryProvider, NoopProvider, ScriptProvider, WorkflowProvider,
};
pub use registry::{Dispatcher, ProviderRegistry};
