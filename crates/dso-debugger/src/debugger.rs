//! The per-session state machine: compiles code, brings up a DAP server
//! inside a sandbox, drives it, and answers stack/variable/visualization
//! queries.
//!
//! Grounded end-to-end on `debugger_debug.go`'s `debugger` struct and its
//! `Start`/`compile`/`startDap`/`dapEventCallback` methods, with the
//! "global state" and "cyclic/back references" design notes applied: the
//! port pool and sandbox runtime are injected, not global; the DAP event
//! callback closes over a session id and looks the session up through the
//! caller-supplied callback rather than holding an owning reference back
//! into whatever container (e.g. a `SessionRegistry`) constructed it.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dso_dap::{DapTransport, Event};
use dso_error::{DapError, DebuggerError};
use dso_idle_guard::IdleGuard;
use dso_port_pool::PortPool;
use dso_sandbox::{Sandbox, SandboxConfig, SandboxRuntime};
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

use crate::dap_ops;
use crate::language::{adapter_for, LanguageAdapter};
use crate::types::{
    Array2DVisualData, Array2DVisualQuery, ArrayVisualData, ArrayVisualQuery, Breakpoint, DebugOption,
    DomainEvent, PreAction, StackFrame, StructVisualData, StructVisualQuery, Variable,
};
use crate::visual;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const ATTACH_LISTEN_RETRY: u32 = 100;
const ATTACH_LISTEN_POLL: Duration = Duration::from_millis(100);

/// A session's event sink. Returns a future rather than being plain `Fn` so
/// a caller backed by a bounded channel (e.g. `SessionRegistry::send_event`)
/// can genuinely block the event-dispatch task on a full channel instead of
/// dropping the event.
pub type EventCallback = Arc<dyn Fn(DomainEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Running {
    sandbox: Box<dyn Sandbox>,
    port: u16,
    work_dir: String,
    main_file: String,
    dap: OnceCell<Arc<DapTransport>>,
    /// The debuggee's stdin, from the attached interactive shell. Filled in
    /// once `launch_and_connect` brings the DAP server up; `send` writes
    /// straight to it rather than through a DAP request.
    stdin: Mutex<Option<std::pin::Pin<Box<dyn tokio::io::AsyncWrite + Send>>>>,
    pre_action: std::sync::Mutex<PreAction>,
    skip_continued: AtomicI64,
}

/// Drives one debuggee from launch to termination.
pub struct Debugger {
    option: DebugOption,
    adapter: Arc<dyn LanguageAdapter>,
    port_pool: Arc<PortPool>,
    sandbox_runtime: Arc<dyn SandboxRuntime>,
    running: Mutex<Option<Arc<Running>>>,
}

impl Debugger {
    pub fn new(option: DebugOption, port_pool: Arc<PortPool>, sandbox_runtime: Arc<dyn SandboxRuntime>) -> Self {
        let adapter = adapter_for(option.language);
        Self {
            option,
            adapter,
            port_pool,
            sandbox_runtime,
            running: Mutex::new(None),
        }
    }

    /// Step 1-7 of the start algorithm run here and return once the sandbox
    /// and idle guard are live; compilation and DAP bring-up (steps 8-12)
    /// continue in the background and report through `callback`.
    pub async fn start(self: &Arc<Self>, callback: EventCallback) -> Result<(), DebuggerError> {
        {
            let guard = self.running.lock().await;
            if guard.is_some() {
                return Err(DebuggerError::AlreadyRunning);
            }
        }

        let port = self.port_pool.acquire()?;

        let sandbox = self
            .sandbox_runtime
            .create(SandboxConfig {
                image: self.option.image.clone(),
                memory_bytes: self.option.memory_bytes,
                cpu_quota: self.option.cpu_quota,
                binds: vec![],
                port_mappings: vec![(8080, port)],
            })
            .await
            .inspect_err(|_| self.port_pool.release(port))?;

        let work_dir = format!("{}/{}", self.option.temp_dir, Uuid::new_v4());
        let main_file = self.adapter.main_file_name().to_string();
        sandbox
            .exec(&["mkdir".to_string(), "-p".to_string(), work_dir.clone()])
            .await?;
        sandbox
            .copy_to(&work_dir, &main_file, self.option.code.as_bytes())
            .await?;

        let running = Arc::new(Running {
            sandbox,
            port,
            work_dir: work_dir.clone(),
            main_file: main_file.clone(),
            dap: OnceCell::new(),
            stdin: Mutex::new(None),
            pre_action: std::sync::Mutex::new(PreAction::Init),
            skip_continued: AtomicI64::new(0),
        });

        let guard_debugger = self.clone();
        let guard_callback = callback.clone();
        let idle_guard = IdleGuard::start(self.option.debug_timeout, move || {
            let debugger = guard_debugger.clone();
            let callback = guard_callback.clone();
            async move {
                debugger.terminate().await;
                callback(DomainEvent::Terminated).await;
            }
        });

        {
            let mut guard = self.running.lock().await;
            *guard = Some(running.clone());
        }

        let idle_guard = Arc::new(idle_guard);
        let this = self.clone();
        tokio::spawn(async move {
            this.bring_up(running, callback, idle_guard).await;
        });

        Ok(())
    }

    async fn bring_up(
        self: Arc<Self>,
        running: Arc<Running>,
        callback: EventCallback,
        idle_guard: Arc<IdleGuard>,
    ) {
        let compile_result = tokio::time::timeout(
            self.option.compile_timeout,
            self.adapter.compile(running.sandbox.as_ref(), &running.work_dir, &running.main_file),
        )
        .await
        .unwrap_or_else(|_| Err("compile timed out".to_string()));

        match compile_result {
            Ok(exec_file) => {
                idle_guard.reset();
                callback(DomainEvent::Compile {
                    success: true,
                    message: "compile succeeded".to_string(),
                })
                .await;
                if let Err(err) = self
                    .launch_and_connect(&running, &exec_file, &callback, &idle_guard)
                    .await
                {
                    tracing::warn!(error = %err, "dap bring-up failed");
                    callback(DomainEvent::Terminated).await;
                    self.terminate().await;
                }
            }
            Err(message) => {
                idle_guard.reset();
                callback(DomainEvent::Compile {
                    success: false,
                    message,
                })
                .await;
                self.terminate().await;
            }
        }
    }

    async fn launch_and_connect(
        &self,
        running: &Arc<Running>,
        exec_file: &str,
        callback: &EventCallback,
        idle_guard: &Arc<IdleGuard>,
    ) -> Result<(), DebuggerError> {
        let launch_cmd = self.adapter.launch_command(exec_file, &running.main_file);
        let attach = running
            .sandbox
            .attach_interactive(&["sh".to_string(), "-c".to_string(), launch_cmd])
            .await?;

        let mut output = attach.output;
        let mut input = attach.input;
        use futures::StreamExt;
        use tokio::io::AsyncWriteExt;

        // Drain until the in-sandbox DAP server announces readiness, or
        // give up after a bounded number of polls.
        let mut ready = false;
        for _ in 0..ATTACH_LISTEN_RETRY {
            match tokio::time::timeout(ATTACH_LISTEN_POLL, output.next()).await {
                Ok(Some(Ok(chunk))) => {
                    let text = String::from_utf8_lossy(&chunk);
                    if text.contains("listening") || text.contains("Started server") {
                        ready = true;
                        break;
                    }
                }
                Ok(Some(Err(_))) | Ok(None) => break,
                Err(_) => continue,
            }
        }
        if !ready {
            return Err(DebuggerError::Sandbox(dso_error::SandboxError::AttachFailed(
                "dap server never reported readiness".to_string(),
            )));
        }

        let work_dir = running.work_dir.clone();
        let pre_action_callback = callback.clone();
        let idle_guard_for_events = idle_guard.clone();
        let dap_cell: Arc<OnceCell<Arc<DapTransport>>> = Arc::new(OnceCell::new());
        let policy_running = running.clone();
        let policy_dap_cell = dap_cell.clone();

        let on_event: Arc<dyn Fn(Event) + Send + Sync> = Arc::new(move |event: Event| {
            let work_dir = work_dir.clone();
            let callback = pre_action_callback.clone();
            let idle_guard = idle_guard_for_events.clone();
            let running = policy_running.clone();
            let dap_cell = policy_dap_cell.clone();
            tokio::spawn(async move {
                handle_dap_event(event, &work_dir, &running, &dap_cell, &callback, &idle_guard).await;
            });
        });

        let dap = DapTransport::connect(("127.0.0.1", running.port), DIAL_TIMEOUT, on_event, None)
            .await
            .map_err(DebuggerError::from)?;
        let dap = Arc::new(dap);
        let _ = dap_cell.set(dap.clone());
        let _ = running.dap.set(dap.clone());

        dap_ops::initialize(&dap, self.op_timeout()).await?;
        dap_ops::set_breakpoints(&dap, &running.main_file, &self.option_breakpoints(), self.op_timeout())
            .await?;
        dap_ops::configuration_done(&dap, self.op_timeout()).await?;

        let output_callback = callback.clone();
        let output_idle_guard = idle_guard.clone();
        tokio::spawn(async move {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(bytes) => {
                        output_idle_guard.reset();
                        output_callback(DomainEvent::Output {
                            output: String::from_utf8_lossy(&bytes).to_string(),
                        })
                        .await;
                    }
                    Err(_) => break,
                }
            }
        });
        input.flush().await.map_err(DapError::Io).map_err(DebuggerError::from)?;
        *running.stdin.lock().await = Some(input);

        Ok(())
    }

    fn option_breakpoints(&self) -> Vec<u32> {
        self.option.breakpoints.clone()
    }

    pub async fn step_in(&self) -> Result<(), DebuggerError> {
        self.motion("stepIn", PreAction::StepIn).await
    }

    pub async fn step_over(&self) -> Result<(), DebuggerError> {
        self.motion("next", PreAction::StepOver).await
    }

    pub async fn step_out(&self) -> Result<(), DebuggerError> {
        self.motion("stepOut", PreAction::StepOut).await
    }

    pub async fn continue_(&self) -> Result<(), DebuggerError> {
        self.motion("continue", PreAction::Continue).await
    }

    async fn motion(&self, command: &str, action: PreAction) -> Result<(), DebuggerError> {
        let running = self.current_running().await?;
        let dap = self.current_dap(&running)?;
        dap_ops::motion(&dap, command, self.op_timeout()).await?;
        *running.pre_action.lock().expect("pre_action mutex poisoned") = action;
        Ok(())
    }

    pub async fn set_breakpoints(&self, lines: &[u32]) -> Result<Vec<Breakpoint>, DebuggerError> {
        let running = self.current_running().await?;
        let dap = self.current_dap(&running)?;
        Ok(dap_ops::set_breakpoints(&dap, &running.main_file, lines, self.op_timeout()).await?)
    }

    /// Writes raw bytes straight to the debuggee's stdin via the attached
    /// interactive stream. This is not a DAP request: the debuggee reads its
    /// own stdin exactly like it would outside a debugger.
    pub async fn send(&self, input: &str) -> Result<(), DebuggerError> {
        use tokio::io::AsyncWriteExt;

        let running = self.current_running().await?;
        let mut guard = running.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(DebuggerError::StdinNotReady)?;
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(DapError::Io)
            .map_err(DebuggerError::from)?;
        stdin.flush().await.map_err(DapError::Io).map_err(DebuggerError::from)?;
        Ok(())
    }

    /// Frames with `path` stripped to be work-dir-relative and `line` zeroed
    /// unless the frame is the user's own compiled file, matching
    /// `GetStackTrace`. The foreign-frame policy in [`handle_dap_event`]
    /// uses the raw, unstripped path instead — it needs the absolute path to
    /// compare against `work_dir`.
    pub async fn get_stack_trace(&self) -> Result<Vec<StackFrame>, DebuggerError> {
        let running = self.current_running().await?;
        let dap = self.current_dap(&running)?;
        let frames = dap_ops::get_stack_trace(&dap, self.op_timeout()).await?;
        let compile_file = format!("{}/{}", running.work_dir, running.main_file);
        Ok(frames
            .into_iter()
            .map(|f| relativize_frame(f, &running.work_dir, &compile_file))
            .collect())
    }

    pub async fn get_frame_variables(&self, frame_id: i64) -> Result<Vec<Variable>, DebuggerError> {
        let running = self.current_running().await?;
        let dap = self.current_dap(&running)?;
        Ok(dap_ops::get_frame_variables(&dap, frame_id, self.op_timeout()).await?)
    }

    pub async fn get_variables(&self, reference: i64) -> Result<Vec<Variable>, DebuggerError> {
        let running = self.current_running().await?;
        let dap = self.current_dap(&running)?;
        Ok(dap_ops::get_variables(&dap, reference, self.op_timeout()).await?)
    }

    pub async fn struct_visual(&self, query: &StructVisualQuery) -> Result<StructVisualData, DebuggerError> {
        let running = self.current_running().await?;
        let dap = self.current_dap(&running)?;
        Ok(visual::struct_visual(&dap, self.adapter.as_ref(), query, self.op_timeout()).await?)
    }

    pub async fn array_visual(&self, query: &ArrayVisualQuery) -> Result<ArrayVisualData, DebuggerError> {
        let running = self.current_running().await?;
        let dap = self.current_dap(&running)?;
        Ok(visual::array_visual(&dap, self.adapter.as_ref(), query, self.op_timeout()).await?)
    }

    pub async fn array2d_visual(&self, query: &Array2DVisualQuery) -> Result<Array2DVisualData, DebuggerError> {
        let running = self.current_running().await?;
        let dap = self.current_dap(&running)?;
        Ok(visual::array2d_visual(&dap, self.adapter.as_ref(), query, self.op_timeout()).await?)
    }

    /// Closes the DAP transport, destroys the sandbox, and releases the
    /// port. Idempotent: calling on an already-terminated debugger is a
    /// no-op rather than an error.
    pub async fn terminate(&self) {
        let running = {
            let mut guard = self.running.lock().await;
            guard.take()
        };
        let Some(running) = running else {
            return;
        };
        if let Some(dap) = running.dap.get() {
            dap.close().await;
        }
        if let Err(err) = running.sandbox.destroy().await {
            tracing::warn!(error = %err, "sandbox destroy reported an error");
        }
        self.port_pool.release(running.port);
    }

    async fn current_running(&self) -> Result<Arc<Running>, DebuggerError> {
        self.running
            .lock()
            .await
            .clone()
            .ok_or(DebuggerError::NotStarted)
    }

    fn current_dap(&self, running: &Running) -> Result<Arc<DapTransport>, DebuggerError> {
        running
            .dap
            .get()
            .cloned()
            .ok_or(DebuggerError::Dap(DapError::Closed))
    }

    fn op_timeout(&self) -> Duration {
        self.option.op_timeout
    }
}


/// Strips the sandbox work directory out of a frame's path and zeroes its
/// line number unless the frame is the user's compiled file, matching
/// `GetStackTrace`'s `strings.Replace(s.Source.Path, d.workPath, "", 1)` /
/// `compileFile` check.
fn relativize_frame(frame: StackFrame, work_dir: &str, compile_file: &str) -> StackFrame {
    let line = if frame.path == compile_file { frame.line } else { 0 };
    StackFrame {
        path: frame.path.replacen(work_dir, "", 1),
        line,
        ..frame
    }
}

/// Implements the "step-out of foreign frame" policy: a `Stopped` whose top
/// frame lies outside `work_dir` is swallowed and answered with an internal
/// auto-continue/step-out, and the balancing `Continued` is swallowed too.
async fn handle_dap_event(
    event: Event,
    work_dir: &str,
    running: &Running,
    dap_cell: &OnceCell<Arc<DapTransport>>,
    callback: &EventCallback,
    idle_guard: &Arc<IdleGuard>,
) {
    if event.event != "terminated" && event.event != "exited" {
        idle_guard.reset();
    }

    match event.event.as_str() {
        "stopped" => {
            let Some(dap) = dap_cell.get().cloned() else { return };
            let reason = event
                .body
                .as_ref()
                .and_then(|b| b.get("reason"))
                .and_then(|r| r.as_str())
                .unwrap_or("unknown")
                .to_string();

            let frames = dap_ops::get_stack_trace(&dap, Duration::from_secs(5)).await.unwrap_or_default();
            let top_is_foreign = match frames.first() {
                Some(frame) => !frame.path.starts_with(work_dir),
                None => false,
            };

            if top_is_foreign {
                running.skip_continued.fetch_add(1, Ordering::SeqCst);
                let pre_action = *running.pre_action.lock().expect("pre_action mutex poisoned");
                let command = if pre_action == PreAction::StepIn { "stepOut" } else { "continue" };
                let req = dap.new_request(command, Some(serde_json::json!({ "threadId": 1 })));
                let _ = dap.send_with_timeout(req, Duration::from_secs(5)).await;
            } else {
                callback(DomainEvent::Stopped { reason }).await;
            }
        }
        "continued" => {
            let mut skip = running.skip_continued.load(Ordering::SeqCst);
            let mut emit = false;
            loop {
                if skip <= 0 {
                    emit = true;
                    break;
                }
                match running.skip_continued.compare_exchange(
                    skip,
                    skip - 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => break,
                    Err(observed) => skip = observed,
                }
            }
            if emit {
                callback(DomainEvent::Continued).await;
            }
        }
        "terminated" | "exited" => {
            callback(DomainEvent::Terminated).await;
        }
        other => {
            tracing::debug!(event = other, "unhandled dap event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_scripted_dap_server;
    use dso_sandbox::fake::FakeSandboxRuntime;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    async fn fake_running(work_dir: &str) -> Running {
        let sandbox = FakeSandboxRuntime
            .create(SandboxConfig {
                image: "debuggers/go".to_string(),
                memory_bytes: 1 << 20,
                cpu_quota: 100_000,
                binds: vec![],
                port_mappings: vec![],
            })
            .await
            .expect("fake sandbox never fails");
        Running {
            sandbox,
            port: 0,
            work_dir: work_dir.to_string(),
            main_file: "main.go".to_string(),
            dap: OnceCell::new(),
            stdin: Mutex::new(None),
            pre_action: std::sync::Mutex::new(PreAction::Init),
            skip_continued: AtomicI64::new(0),
        }
    }

    fn recording_callback() -> (EventCallback, Arc<StdMutex<Vec<DomainEvent>>>) {
        let events: Arc<StdMutex<Vec<DomainEvent>>> = Arc::new(StdMutex::new(Vec::new()));
        let events_for_cb = events.clone();
        let callback: EventCallback = Arc::new(move |event: DomainEvent| {
            let events = events_for_cb.clone();
            Box::pin(async move {
                events.lock().expect("events mutex poisoned").push(event);
            })
        });
        (callback, events)
    }

    fn started_idle_guard() -> Arc<IdleGuard> {
        Arc::new(IdleGuard::start(Duration::from_secs(60), || async {}))
    }

    async fn connected_dap_cell(addr: std::net::SocketAddr) -> OnceCell<Arc<DapTransport>> {
        let dap = Arc::new(
            DapTransport::connect(addr, Duration::from_secs(2), Arc::new(|_event| {}), None)
                .await
                .expect("connect"),
        );
        let cell = OnceCell::new();
        let _ = cell.set(dap);
        cell
    }

    #[tokio::test]
    async fn foreign_top_frame_is_skipped_and_its_paired_continued_is_suppressed() {
        let addr = spawn_scripted_dap_server(|command, _args| match command {
            "stackTrace" => json!({
                "stackFrames": [{ "id": 1, "name": "foreign", "source": { "path": "/usr/lib/go/runtime.go" }, "line": 10 }],
            }),
            _ => json!({}),
        })
        .await;
        let dap_cell = connected_dap_cell(addr).await;
        let running = fake_running("/work/abc").await;
        let (callback, events) = recording_callback();
        let idle_guard = started_idle_guard();

        let stopped = Event {
            seq: 1,
            type_: "event".to_string(),
            event: "stopped".to_string(),
            body: Some(json!({ "reason": "step" })),
        };
        handle_dap_event(stopped, "/work/abc", &running, &dap_cell, &callback, &idle_guard).await;
        assert_eq!(running.skip_continued.load(Ordering::SeqCst), 1);
        assert!(
            events.lock().expect("events mutex poisoned").is_empty(),
            "a stop in a foreign frame must not surface a Stopped event"
        );

        let continued = Event {
            seq: 2,
            type_: "event".to_string(),
            event: "continued".to_string(),
            body: None,
        };
        handle_dap_event(continued, "/work/abc", &running, &dap_cell, &callback, &idle_guard).await;
        assert_eq!(running.skip_continued.load(Ordering::SeqCst), 0);
        assert!(
            events.lock().expect("events mutex poisoned").is_empty(),
            "the Continued paired with a swallowed foreign stop must be swallowed too"
        );
    }

    #[tokio::test]
    async fn local_top_frame_stop_and_its_unpaired_continue_both_surface() {
        let addr = spawn_scripted_dap_server(|command, _args| match command {
            "stackTrace" => json!({
                "stackFrames": [{ "id": 1, "name": "main", "source": { "path": "/work/abc/main.go" }, "line": 7 }],
            }),
            _ => json!({}),
        })
        .await;
        let dap_cell = connected_dap_cell(addr).await;
        let running = fake_running("/work/abc").await;
        let (callback, events) = recording_callback();
        let idle_guard = started_idle_guard();

        let stopped = Event {
            seq: 1,
            type_: "event".to_string(),
            event: "stopped".to_string(),
            body: Some(json!({ "reason": "breakpoint" })),
        };
        handle_dap_event(stopped, "/work/abc", &running, &dap_cell, &callback, &idle_guard).await;
        assert_eq!(running.skip_continued.load(Ordering::SeqCst), 0);
        {
            let seen = events.lock().expect("events mutex poisoned");
            assert!(matches!(seen[0], DomainEvent::Stopped { .. }));
        }

        let continued = Event {
            seq: 2,
            type_: "event".to_string(),
            event: "continued".to_string(),
            body: None,
        };
        handle_dap_event(continued, "/work/abc", &running, &dap_cell, &callback, &idle_guard).await;
        let seen = events.lock().expect("events mutex poisoned");
        assert!(matches!(seen[1], DomainEvent::Continued));
    }

    #[test]
    fn relativize_frame_strips_work_dir_and_keeps_line_for_compiled_file() {
        let frame = StackFrame {
            id: 1,
            name: "main".to_string(),
            path: "/work/abc/main.go".to_string(),
            line: 42,
        };
        let out = relativize_frame(frame, "/work/abc", "/work/abc/main.go");
        assert_eq!(out.path, "/main.go");
        assert_eq!(out.line, 42);
    }

    #[test]
    fn relativize_frame_zeroes_line_for_a_file_outside_the_compiled_target() {
        let frame = StackFrame {
            id: 2,
            name: "runtime.gopark".to_string(),
            path: "/usr/lib/go/runtime.go".to_string(),
            line: 99,
        };
        let out = relativize_frame(frame, "/work/abc", "/work/abc/main.go");
        assert_eq!(out.path, "/usr/lib/go/runtime.go");
        assert_eq!(out.line, 0);
    }
}
