//! Per-session debugger state machine: compiles code, brings up a DAP
//! server inside a sandbox, drives it through stepping/breakpoints, and
//! answers stack/variable/visualization queries.
//!
//! Grounded end-to-end on `backend/service/visual_debug_servcie/debug_core`
//! (`debugger_debug.go`, `debugger_variable.go`, `debugger_visual.go`); see
//! each submodule's header for its specific source file.

mod dap_ops;
mod debugger;
mod language;
#[cfg(test)]
mod test_support;
mod types;
mod visual;

pub use debugger::{Debugger, EventCallback};
pub use language::{adapter_for, LanguageAdapter};
pub use types::{
    Array2DVisualData, Array2DVisualQuery, ArrayVisualData, ArrayVisualQuery, Breakpoint, DebugOption, DomainEvent,
    PreAction, Scope, StackFrame, StructVisualData, StructVisualNode, StructVisualQuery, Variable,
};
