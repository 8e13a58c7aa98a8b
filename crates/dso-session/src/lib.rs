//! Process-wide session bookkeeping: a concurrent `id -> Session` map plus a
//! `callerKey -> id` index enforcing one live session per caller.
//!
//! Grounded on `debug_session_manager.go`'s `debugSessionManage` /
//! `userDebugManage` (`sync.Map`-backed singletons), generalized per the
//! "global state" design note into explicitly constructed, injected
//! components rather than package-level `var`s.

use std::sync::Arc;

use dashmap::DashMap;
use dso_analyzer::VisualAnalyzer;
use dso_debugger::Debugger;
use dso_error::DsoError;
use tokio::sync::mpsc;

/// Domain event or terminal signal delivered to a session's SSE consumer.
pub use dso_debugger::DomainEvent;

const EVENT_CHANNEL_CAPACITY: usize = 10;
const DESTROY_CHANNEL_CAPACITY: usize = 2;

/// One caller's live debugging session: the debugger driving the sandbox,
/// the code-structure analyzer, and the channels that carry events out to
/// whatever transport (SSE, in this crate's case) is attached.
pub struct Session {
    /// Behind a lock rather than a plain field: `Start` constructs a fresh
    /// `Debugger` bound to the caller's code/language/breakpoints and swaps
    /// it in via [`SessionRegistry::set_debugger`] — the event/destroy
    /// channels (and any SSE consumer already attached to them since
    /// `CreateSession`) must survive that swap untouched.
    pub debugger: tokio::sync::Mutex<Arc<Debugger>>,
    pub analyzer: Arc<VisualAnalyzer>,
    pub event_tx: mpsc::Sender<DomainEvent>,
    pub event_rx: tokio::sync::Mutex<mpsc::Receiver<DomainEvent>>,
    pub destroy_tx: mpsc::Sender<()>,
    pub destroy_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

/// Concurrent `session id -> Session` map with create/destroy semantics.
///
/// Sends to a session id that no longer exists are logged and dropped, never
/// a panic or an error surfaced to the caller — matching
/// `debugSessionManage.SendEvent`/`SendDestroyEvent`.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Builds a fresh session from an already-constructed `Debugger` and
    /// `VisualAnalyzer`, replacing any existing session under `id`.
    ///
    /// The registry itself stays debugger/analyzer-agnostic: callers (the
    /// `dso` façade) own construction so this crate doesn't need to know
    /// about port pools, sandbox runtimes, or AI providers.
    pub fn create(&self, id: String, debugger: Arc<Debugger>, analyzer: Arc<VisualAnalyzer>) -> Arc<Session> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (destroy_tx, destroy_rx) = mpsc::channel(DESTROY_CHANNEL_CAPACITY);
        let session = Arc::new(Session {
            debugger: tokio::sync::Mutex::new(debugger),
            analyzer,
            event_tx,
            event_rx: tokio::sync::Mutex::new(event_rx),
            destroy_tx,
            destroy_rx: tokio::sync::Mutex::new(destroy_rx),
        });
        self.sessions.insert(id, session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    /// Swaps in a freshly constructed `Debugger` for an existing session,
    /// leaving its event/destroy channels (and whatever SSE consumer is
    /// already draining them) untouched. Used by `Start`, which builds a new
    /// `Debugger` once it knows the caller's code/language/breakpoints.
    pub async fn set_debugger(&self, id: &str, debugger: Arc<Debugger>) -> Result<(), DsoError> {
        let session = self.get(id).ok_or(DsoError::SessionNotFound)?;
        *session.debugger.lock().await = debugger;
        Ok(())
    }

    /// Pushes a domain event onto the session's channel, blocking while the
    /// channel is full so a stalled SSE consumer back-pressures the DAP
    /// event dispatch that produced it, matching `sendEventToSse`'s
    /// blocking `session.DtoEventChan <- event`.
    pub async fn send_event(&self, id: &str, event: DomainEvent) {
        match self.get(id) {
            Some(session) => {
                if session.event_tx.send(event).await.is_err() {
                    tracing::warn!(session_id = id, "send_event: channel closed, session gone");
                }
            }
            None => tracing::warn!(session_id = id, "send_event: session not found"),
        }
    }

    pub fn send_destroy(&self, id: &str) {
        match self.get(id) {
            Some(session) => {
                let _ = session.destroy_tx.try_send(());
            }
            None => tracing::warn!(session_id = id, "send_destroy: session not found"),
        }
    }

    /// Terminates the debugger and drops the session's map entry. Idempotent:
    /// destroying an id that isn't present is a no-op.
    pub async fn destroy(&self, id: &str) {
        let Some((_, session)) = self.sessions.remove(id) else {
            return;
        };
        session.debugger.lock().await.terminate().await;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }
}

/// Maps an authenticated-user or visitor key to their one live session id.
///
/// Grounded on `userDebugManage`: a caller may hold at most one session at a
/// time, and creating a new one supersedes the old.
#[derive(Default)]
pub struct UserSessionIndex {
    by_caller: DashMap<String, String>,
}

impl UserSessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, caller_key: &str) -> Option<String> {
        self.by_caller.get(caller_key).map(|entry| entry.clone())
    }

    pub fn store(&self, caller_key: &str, session_id: String) {
        self.by_caller.insert(caller_key.to_string(), session_id);
    }
}

/// The caller key a request is filed under: an authenticated user id, or
/// `"visitor:" + visitor_id` for anonymous callers. Mirrors `gerVisitorID`.
pub fn caller_key(user_id: Option<&str>, visitor_id: Option<&str>) -> Result<String, DsoError> {
    if let Some(user_id) = user_id.filter(|s| !s.is_empty()) {
        return Ok(user_id.to_string());
    }
    if let Some(visitor_id) = visitor_id.filter(|s| !s.is_empty()) {
        return Ok(format!("visitor:{visitor_id}"));
    }
    Err(DsoError::Internal("no authenticated user id or visitor id present".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dso_debugger::DebugOption;
    use dso_error::Language;
    use dso_port_pool::PortPool;
    use dso_sandbox::fake::FakeSandboxRuntime;
    use std::time::Duration;

    fn option() -> DebugOption {
        DebugOption {
            language: Language::Go,
            image: "debuggers/go".to_string(),
            code: "package main".to_string(),
            breakpoints: vec![],
            compile_timeout: Duration::from_secs(30),
            op_timeout: Duration::from_secs(2),
            debug_timeout: Duration::from_secs(600),
            memory_bytes: 1 << 30,
            cpu_quota: 300_000,
            temp_dir: "/tmp/dso".to_string(),
        }
    }

    fn make_debugger() -> Arc<Debugger> {
        let pool = Arc::new(PortPool::new(30000, 30100));
        Arc::new(Debugger::new(option(), pool, Arc::new(FakeSandboxRuntime)))
    }

    fn make_analyzer() -> Arc<VisualAnalyzer> {
        let provider = dso_analyzer::build_provider(&dso_analyzer::AiProviderConfig {
            kind: "openai".to_string(),
            api_key: "test-key".to_string(),
            api_base: "http://localhost:1".to_string(),
            model: "test-model".to_string(),
            timeout_sec: 1,
        });
        Arc::new(VisualAnalyzer::new(provider))
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let registry = SessionRegistry::new();
        let analyzer = make_analyzer();
        registry.create("abc".to_string(), make_debugger(), analyzer);
        assert!(registry.get("abc").is_some());
        assert!(registry.contains("abc"));
    }

    #[tokio::test]
    async fn recreate_under_same_id_replaces_entry() {
        let registry = SessionRegistry::new();
        let analyzer = make_analyzer();
        let first = registry.create("abc".to_string(), make_debugger(), analyzer.clone());
        let second = registry.create("abc".to_string(), make_debugger(), analyzer);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&registry.get("abc").expect("present"), &second));
    }

    #[tokio::test]
    async fn send_event_to_missing_session_does_not_panic() {
        let registry = SessionRegistry::new();
        registry.send_event("nope", DomainEvent::Terminated).await;
        registry.send_destroy("nope");
    }

    #[tokio::test]
    async fn destroy_removes_entry_and_is_idempotent() {
        let registry = SessionRegistry::new();
        let analyzer = make_analyzer();
        registry.create("abc".to_string(), make_debugger(), analyzer);
        registry.destroy("abc").await;
        assert!(!registry.contains("abc"));
        // Second destroy is a no-op, not an error.
        registry.destroy("abc").await;
    }

    #[test]
    fn caller_key_prefers_user_id() {
        assert_eq!(caller_key(Some("42"), Some("v1")).unwrap(), "42");
    }

    #[test]
    fn caller_key_falls_back_to_visitor() {
        assert_eq!(caller_key(None, Some("v1")).unwrap(), "visitor:v1");
    }

    #[test]
    fn caller_key_errors_when_both_absent() {
        assert!(caller_key(None, None).is_err());
    }

    #[tokio::test]
    async fn user_session_index_store_then_get() {
        let index = UserSessionIndex::new();
        index.store("visitor:v1", "sess-1".to_string());
        assert_eq!(index.get("visitor:v1"), Some("sess-1".to_string()));
        assert_eq!(index.get("nobody"), None);
    }
}
