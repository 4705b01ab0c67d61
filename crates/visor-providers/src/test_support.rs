use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use visor_memory::{Backend, MemoryStore};
use visor_session::SessionRegistry;
use visor_types::{Event, EventType, Scope};

use crate::context::DispatchContext;

/// Builds a minimal, fully-wired `DispatchContext` for provider unit tests:
/// in-memory memory store, empty session registry, the process's own
/// working directory, and a live (never cancelled) token.
pub async fn test_ctx() -> DispatchContext {
    DispatchContext {
        event: Event::new(EventType::Manual),
        scope: Scope::root(EventType::Manual),
        check_name: "test-check".to_string(),
        outputs: json!({}),
        memory: MemoryStore::new(Backend::InMemory).await.unwrap(),
        sessions: Arc::new(SessionRegistry::new()),
        session_id: None,
        session_history: Vec::new(),
        working_directory: std::env::temp_dir(),
        env: json!({}),
        cancellation: CancellationToken::new(),
        attempt: 0,
    }
}
