mod ai;
mod command;
mod contract;
mod http;
mod memory;
mod noop;

pub use ai::{ClaudeCodeProvider, LlmProvider};
pub use command::{CommandProvider, ScriptProvider};
pub use contract::{GitCheckoutProvider, GithubProvider, HumanInputProvider, McpProvider, WorkflowProvider};
pub use http::{HttpClientProvider, HttpInputProvider, HttpProvider};
pub use memory::MemoryProvider;
pub use noop::{LogProvider, NoopProvider};
