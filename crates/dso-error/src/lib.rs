//! Error taxonomy shared across the orchestrator's subsystems.
//!
//! Each subsystem owns a small `thiserror` enum; [`DsoError`] composes them
//! at the crate boundary via `#[from]` so callers see one stable type while
//! each layer's `source()` chain stays intact for logging.

use std::fmt;

/// Supported debuggee languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    C,
    Cpp,
    Go,
    Java,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Go => "go",
            Language::Java => "java",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Language {
    type Err = DsoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            "go" => Ok(Language::Go),
            "java" => Ok(Language::Java),
            other => Err(DsoError::UnsupportedLanguage(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PortPoolError {
    #[error("no port available in range {start}..={end}")]
    NoPortAvailable { start: u16, end: u16 },
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to create sandbox: {0}")]
    CreateFailed(String),
    #[error("exec failed in sandbox: {0}")]
    ExecFailed(String),
    #[error("failed to copy file into sandbox: {0}")]
    CopyFailed(String),
    #[error("failed to attach interactive stream: {0}")]
    AttachFailed(String),
    #[error("failed to destroy sandbox: {0}")]
    DestroyFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DapError {
    #[error("dial timed out connecting to dap server")]
    DialTimeout,
    #[error("request timed out waiting for response")]
    Timeout,
    #[error("dap server returned an error response: {0}")]
    ErrorResponse(String),
    #[error("transport closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed dap message: {0}")]
    Protocol(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DebuggerError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error(transparent)]
    Port(#[from] PortPoolError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("compile failed: {0}")]
    CompileFailed(String),
    #[error(transparent)]
    Dap(#[from] DapError),
    #[error("debugger already running")]
    AlreadyRunning,
    #[error("debugger not started")]
    NotStarted,
    #[error("debuggee stdin is not attached yet")]
    StdinNotReady,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("analyzer is busy")]
    Busy,
    #[error("analyzer call failed: {0}")]
    Failed(String),
    #[error("no description available yet")]
    NotFound,
}

/// Top-level error surfaced to callers of the service façade.
#[derive(Debug, thiserror::Error)]
pub enum DsoError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("session not found")]
    SessionNotFound,
    #[error("debugger closed")]
    DebuggerClosed,
    #[error(transparent)]
    Port(#[from] PortPoolError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Dap(#[from] DapError),
    #[error(transparent)]
    Debugger(#[from] DebuggerError),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type DsoResult<T> = Result<T, DsoError>;
