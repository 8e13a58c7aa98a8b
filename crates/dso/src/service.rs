//! `DebugService`: the thin caller-facing façade translating the domain API
//! of SPEC_FULL.md §6 into `SessionRegistry` + `Debugger` + `VisualAnalyzer`
//! calls.
//!
//! Grounded on `debug_service.go`'s `debugService` (the HTTP/gin framing it
//! also carries is out of scope per spec.md's Non-goals; only the
//! domain-level translation survives). `CreateSseConnect`'s event loop is
//! reproduced as `attach_event_stream`, returning a `Stream` a caller-chosen
//! transport (e.g. an axum SSE handler) can forward — this crate does not
//! itself speak HTTP.

use std::sync::Arc;

use dso_analyzer::{VisualAnalyzer, VisualDescription};
use dso_debugger::{
    Array2DVisualData, Array2DVisualQuery, ArrayVisualData, ArrayVisualQuery, Breakpoint, DebugOption, Debugger,
    DomainEvent, EventCallback, StackFrame, StructVisualData, StructVisualQuery, Variable,
};
use dso_error::{DsoError, Language};
use dso_port_pool::PortPool;
use dso_sandbox::SandboxRuntime;
use dso_session::{caller_key, SessionRegistry, UserSessionIndex};
use uuid::Uuid;

use crate::config::DsoConfig;

/// Parameters for `DebugService::start`, mirroring `dto.StartDebugRequest`.
pub struct StartRequest {
    pub language: Language,
    pub code: String,
    pub breakpoints: Vec<u32>,
}

pub struct DebugService {
    config: Arc<DsoConfig>,
    port_pool: Arc<PortPool>,
    sandbox_runtime: Arc<dyn SandboxRuntime>,
    registry: Arc<SessionRegistry>,
    user_index: Arc<UserSessionIndex>,
}

impl DebugService {
    pub fn new(config: Arc<DsoConfig>, port_pool: Arc<PortPool>, sandbox_runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self {
            config,
            port_pool,
            sandbox_runtime,
            registry: Arc::new(SessionRegistry::new()),
            user_index: Arc::new(UserSessionIndex::new()),
        }
    }

    /// Looks up the caller's prior session (if any), tears it down, then
    /// allocates a fresh session id and registers an (as yet un-started)
    /// debugger + analyzer pair under it.
    pub async fn create_debug_session(
        &self,
        user_id: Option<&str>,
        visitor_id: Option<&str>,
    ) -> Result<String, DsoError> {
        let key = caller_key(user_id, visitor_id)?;

        if let Some(previous_id) = self.user_index.get(&key) {
            if self.registry.get(&previous_id).is_some() {
                self.registry.destroy(&previous_id).await;
                self.registry.send_destroy(&previous_id);
            }
        }

        let id = Uuid::new_v4().to_string();
        let provider = dso_analyzer::build_provider(&self.config.ai_provider_config());
        let analyzer = Arc::new(VisualAnalyzer::new(provider));
        let option = DebugOption {
            language: Language::Go,
            image: self.config.debugger_image.clone(),
            code: String::new(),
            breakpoints: vec![],
            compile_timeout: self.config.compile_timeout(),
            op_timeout: self.config.op_timeout(),
            debug_timeout: self.config.debug_timeout(),
            memory_bytes: self.config.memory_bytes,
            cpu_quota: self.config.cpu_quota,
            temp_dir: self.config.temp_dir.clone(),
        };
        let debugger = Arc::new(Debugger::new(option, self.port_pool.clone(), self.sandbox_runtime.clone()));
        self.registry.create(id.clone(), debugger, analyzer);
        self.user_index.store(&key, id.clone());
        Ok(id)
    }

    /// Starts code analysis and the debuggee itself. The debugger's event
    /// callback forwards every domain event onto the session's channel, and
    /// additionally sends a destroy signal once a `Terminated` event fires —
    /// matching `notificationCallback`'s `SendDestroyEvent` on exit.
    pub async fn start(&self, id: &str, req: StartRequest) -> Result<(), DsoError> {
        let session = self.registry.get(id).ok_or(DsoError::DebuggerClosed)?;

        session
            .analyzer
            .start_analyze_code(req.code.clone(), req.language.to_string())
            .await
            .map_err(DsoError::from)?;

        let option = DebugOption {
            language: req.language,
            image: self.config.debugger_image.clone(),
            code: req.code,
            breakpoints: req.breakpoints,
            compile_timeout: self.config.compile_timeout(),
            op_timeout: self.config.op_timeout(),
            debug_timeout: self.config.debug_timeout(),
            memory_bytes: self.config.memory_bytes,
            cpu_quota: self.config.cpu_quota,
            temp_dir: self.config.temp_dir.clone(),
        };
        let debugger = Arc::new(Debugger::new(option, self.port_pool.clone(), self.sandbox_runtime.clone()));

        let registry = self.registry.clone();
        let session_id = id.to_string();
        let callback: EventCallback = Arc::new(move |event: DomainEvent| {
            let registry = registry.clone();
            let session_id = session_id.clone();
            Box::pin(async move {
                let terminated = matches!(event, DomainEvent::Terminated);
                registry.send_event(&session_id, event).await;
                if terminated {
                    registry.send_destroy(&session_id);
                }
            })
        });

        debugger.start(callback).await.map_err(DsoError::from)?;
        self.registry.set_debugger(id, debugger).await?;
        Ok(())
    }

    pub async fn step_in(&self, id: &str) -> Result<(), DsoError> {
        self.debugger(id).await?.step_in().await.map_err(DsoError::from)
    }

    pub async fn step_over(&self, id: &str) -> Result<(), DsoError> {
        self.debugger(id).await?.step_over().await.map_err(DsoError::from)
    }

    pub async fn step_out(&self, id: &str) -> Result<(), DsoError> {
        self.debugger(id).await?.step_out().await.map_err(DsoError::from)
    }

    pub async fn continue_(&self, id: &str) -> Result<(), DsoError> {
        self.debugger(id).await?.continue_().await.map_err(DsoError::from)
    }

    pub async fn set_breakpoints(&self, id: &str, lines: &[u32]) -> Result<Vec<Breakpoint>, DsoError> {
        self.debugger(id)
            .await?
            .set_breakpoints(lines)
            .await
            .map_err(DsoError::from)
    }

    pub async fn send_to_console(&self, id: &str, input: &str) -> Result<(), DsoError> {
        self.debugger(id).await?.send(input).await.map_err(DsoError::from)
    }

    pub async fn get_stack_trace(&self, id: &str) -> Result<Vec<StackFrame>, DsoError> {
        self.debugger(id).await?.get_stack_trace().await.map_err(DsoError::from)
    }

    pub async fn get_frame_variables(&self, id: &str, frame_id: i64) -> Result<Vec<Variable>, DsoError> {
        self.debugger(id)
            .await?
            .get_frame_variables(frame_id)
            .await
            .map_err(DsoError::from)
    }

    pub async fn get_variables(&self, id: &str, reference: i64) -> Result<Vec<Variable>, DsoError> {
        self.debugger(id)
            .await?
            .get_variables(reference)
            .await
            .map_err(DsoError::from)
    }

    pub async fn struct_visual(&self, id: &str, query: &StructVisualQuery) -> Result<StructVisualData, DsoError> {
        self.debugger(id)
            .await?
            .struct_visual(query)
            .await
            .map_err(DsoError::from)
    }

    pub async fn array_visual(&self, id: &str, query: &ArrayVisualQuery) -> Result<ArrayVisualData, DsoError> {
        self.debugger(id)
            .await?
            .array_visual(query)
            .await
            .map_err(DsoError::from)
    }

    pub async fn array2d_visual(&self, id: &str, query: &Array2DVisualQuery) -> Result<Array2DVisualData, DsoError> {
        self.debugger(id)
            .await?
            .array2d_visual(query)
            .await
            .map_err(DsoError::from)
    }

    /// Blocks until the analyzer completes, per SPEC_FULL.md §6.
    pub async fn get_visual_description(&self, id: &str) -> Result<VisualDescription, DsoError> {
        let session = self.registry.get(id).ok_or(DsoError::DebuggerClosed)?;
        session
            .analyzer
            .get_visual_description()
            .await
            .map_err(DsoError::from)
    }

    pub async fn terminate(&self, id: &str) -> Result<(), DsoError> {
        let session = self.registry.get(id).ok_or(DsoError::DebuggerClosed)?;
        session.debugger.lock().await.terminate().await;
        self.registry.send_destroy(id);
        Ok(())
    }

    async fn debugger(&self, id: &str) -> Result<Arc<Debugger>, DsoError> {
        let session = self.registry.get(id).ok_or(DsoError::DebuggerClosed)?;
        Ok(session.debugger.lock().await.clone())
    }

    /// The per-attachment SSE loop: forwards events, then a terminal
    /// `Terminated` once the destroy channel fires, and tears the session
    /// down. `on_event`/`on_terminated` are the caller's write-and-flush
    /// hooks into whatever transport framing it uses.
    pub async fn attach_event_stream(
        &self,
        id: &str,
        mut on_event: impl FnMut(DomainEvent),
        mut on_terminated: impl FnMut(),
    ) -> Result<(), DsoError> {
        let session = self.registry.get(id).ok_or(DsoError::SessionNotFound)?;
        let mut event_rx = session.event_rx.lock().await;
        let mut destroy_rx = session.destroy_rx.lock().await;
        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(event) => on_event(event),
                        None => break,
                    }
                }
                _ = destroy_rx.recv() => {
                    on_terminated();
                    drop(event_rx);
                    drop(destroy_rx);
                    self.registry.destroy(id).await;
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
