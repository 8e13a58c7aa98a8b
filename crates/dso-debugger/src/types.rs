//! Domain types for one debugging session.
//!
//! Mirrors `backend/service/visual_debug_servcie/debug_core/objects.go` and
//! the `Option` struct from `debug_core/interface.go`, and the `StructVisual*`
//! / `ArrayVisual*` / `Array2DVisual*` query/data families from
//! `debugger_visual.go`.

use std::time::Duration;

use dso_error::Language;
use serde::{Deserialize, Serialize};

/// Launch parameters for `Debugger::start`.
#[derive(Debug, Clone)]
pub struct DebugOption {
    pub language: Language,
    pub image: String,
    pub code: String,
    pub breakpoints: Vec<u32>,
    pub compile_timeout: Duration,
    pub op_timeout: Duration,
    pub debug_timeout: Duration,
    pub memory_bytes: i64,
    pub cpu_quota: i64,
    pub temp_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Breakpoint {
    pub line: u32,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scope {
    pub name: String,
    #[serde(rename = "variablesReference")]
    pub variables_reference: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "variablesReference", default)]
    pub variables_reference: i64,
    #[serde(rename = "namedVariables", default)]
    pub named_variables: i64,
    #[serde(rename = "indexedVariables", default)]
    pub indexed_variables: i64,
}

impl Variable {
    pub fn is_expandable(&self) -> bool {
        self.variables_reference != 0
    }

    pub fn is_pointer(&self) -> bool {
        self.type_.starts_with('*')
    }
}

/// What the user last asked for; drives the foreign-frame skip policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreAction {
    Init,
    StepOver,
    StepIn,
    StepOut,
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum DomainEvent {
    Compile {
        success: bool,
        message: String,
    },
    Output {
        output: String,
    },
    Stopped {
        reason: String,
    },
    Continued,
    Terminated,
}

// --- visualization queries/data, §4.5.3 -----------------------------------

#[derive(Debug, Clone)]
pub struct StructVisualQuery {
    pub struct_name: String,
    pub value_fields: Vec<String>,
    pub pointer_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructVisualNode {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub values: Vec<(String, String)>,
    pub pointers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructVisualData {
    pub pointer_roots: Vec<Variable>,
    pub nodes: Vec<StructVisualNode>,
}

#[derive(Debug, Clone)]
pub struct ArrayVisualQuery {
    pub array_name: String,
    pub point_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArrayVisualData {
    pub elements: Vec<String>,
    pub points: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct Array2DVisualQuery {
    pub array_name: String,
    pub row_point_names: Vec<String>,
    pub col_point_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Array2DVisualData {
    pub rows: Vec<Vec<String>>,
    pub row_points: Vec<(String, String)>,
    pub col_points: Vec<(String, String)>,
}
