use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use visor_types::SessionMode;

use crate::message::Message;
use crate::sanitize::sanitize_history;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session/unresolved: no session registered under id {0}")]
    Unresolved(String),
}

pub type SessionHandle = Arc<Mutex<Vec<Message>>>;

/// Registry of live AI conversation handles, keyed by opaque session id.
/// Guarded by a single top-level mutex over the id->handle map; each
/// session's own history lives behind its own handle mutex so concurrent
/// readers of *different* sessions never contend.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a brand-new session (typically the id an AI provider just
    /// minted) with its initial history.
    pub async fn register(&self, id: impl Into<String>, history: Vec<Message>) -> SessionHandle {
        let handle: SessionHandle = Arc::new(Mutex::new(history));
        self.sessions.lock().await.insert(id.into(), handle.clone());
        handle
    }

    pub async fn handle(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.get(id).cloned()
    }

    pub async fn append_message(&self, id: &str, message: Message) -> Result<(), SessionError> {
        let handle = self
            .handle(id)
            .await
            .ok_or_else(|| SessionError::Unresolved(id.to_string()))?;
        handle.lock().await.push(message);
        Ok(())
    }

    pub async fn history(&self, id: &str) -> Result<Vec<Message>, SessionError> {
        let handle = self
            .handle(id)
            .await
            .ok_or_else(|| SessionError::Unresolved(id.to_string()))?;
        Ok(handle.lock().await.clone())
    }

    pub async fn release(&self, id: &str) {
        self.sessions.lock().await.remove(id);
    }

    /// Resolves `reuse_ai_session` for a child step. Sanitizes the parent's
    /// history (drops invalid-JSON-retry pairs, strips the parent's trailing
    /// JSON tail) before handing it to the child.
    ///
    /// `clone` deep-copies the sanitized history under a fresh id, isolated
    /// from further writes to the parent. `append` rewrites the parent's own
    /// handle in place with the sanitized history and hands back the same
    /// id/handle, so subsequent messages land on the shared history.
    pub async fn reuse(
        &self,
        parent_id: &str,
        mode: SessionMode,
        new_id: impl FnOnce() -> String,
    ) -> Result<(String, SessionHandle), SessionError> {
        let parent_handle = self
            .handle(parent_id)
            .await
            .ok_or_else(|| SessionError::Unresolved(parent_id.to_string()))?;
        let before = parent_handle.lock().await.len();
        let sanitized = sanitize_history(&parent_handle.lock().await);
        tracing::debug!(
            parent_id,
            messages_before = before,
            messages_after = sanitized.len(),
            mode = ?mode,
            "sanitized session history for reuse"
        );

        match mode {
            SessionMode::Clone => {
                let id = new_id();
                let handle: SessionHandle = Arc::new(Mutex::new(sanitized));
                self.sessions.lock().await.insert(id.clone(), handle.clone());
                Ok((id, handle))
            }
            SessionMode::Append => {
                *parent_handle.lock().await = sanitized;
                Ok((parent_id.to_string(), parent_handle))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    fn msg(role: Role, content: &str) -> Message {
        Message::new(role, content)
    }

    #[tokio::test]
    async fn clone_reuse_is_independent_of_parent() {
        let registry = SessionRegistry::new();
        registry
            .register("parent", vec![msg(Role::Assistant, "hello {\"a\": 1}")])
            .await;

        let (child_id, child_handle) = registry
            .reuse("parent", SessionMode::Clone, || "child".to_string())
            .await
            .unwrap();
        assert_eq!(child_id, "child");
        assert_eq!(child_handle.lock().await.len(), 1);
        assert_eq!(child_handle.lock().await[0].content, "hello");

        registry
            .append_message("child", msg(Role::User, "new message"))
            .await
            .unwrap();
        let parent_history = registry.history("parent").await.unwrap();
        assert_eq!(parent_history.len(), 1);
    }

    #[tokio::test]
    async fn append_reuse_shares_same_id_and_sanitized_history() {
        let registry = SessionRegistry::new();
        registry
            .register(
                "parent",
                vec![
                    msg(Role::User, "CRITICAL JSON ERROR: retry"),
                    msg(Role::Assistant, "retrying"),
                    msg(Role::Assistant, "final {\"x\": true}"),
                ],
            )
            .await;

        let (id, handle) = registry
            .reuse("parent", SessionMode::Append, || unreachable!())
            .await
            .unwrap();
        assert_eq!(id, "parent");
        let history = handle.lock().await.clone();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "final");
    }

    #[tokio::test]
    async fn reuse_of_unknown_session_is_unresolved() {
        let registry = SessionRegistry::new();
        let err = registry
            .reuse("missing", SessionMode::Clone, || "x".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Unresolved(id) if id == "missing"));
    }
}
