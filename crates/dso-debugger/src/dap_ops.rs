//! Thin request/response helpers over [`DapTransport`] for the handful of
//! DAP commands the debugger needs, plus the variable post-processing rules
//! from `debugger_variable.go`.

use std::time::Duration;

use dso_dap::{DapTransport, Request};
use dso_error::DapError;
use serde_json::{json, Value};

use crate::types::{Scope, StackFrame, Variable};

pub async fn initialize(dap: &DapTransport, timeout: Duration) -> Result<(), DapError> {
    let req = dap.new_request(
        "initialize",
        Some(json!({
            "pathFormat": "path",
            "linesStartAt1": true,
            "columnsStartAt1": true,
            "supportsVariableType": true,
            "supportsVariablePaging": true,
        })),
    );
    send_checked(dap, req, timeout).await.map(|_| ())
}

pub async fn set_breakpoints(
    dap: &DapTransport,
    main_file: &str,
    lines: &[u32],
    timeout: Duration,
) -> Result<Vec<crate::types::Breakpoint>, DapError> {
    let mut deduped = lines.to_vec();
    deduped.sort_unstable();
    deduped.dedup();

    let req = dap.new_request(
        "setBreakpoints",
        Some(json!({
            "source": { "path": main_file },
            "breakpoints": deduped.iter().map(|l| json!({ "line": l })).collect::<Vec<_>>(),
        })),
    );
    let resp = send_checked(dap, req, timeout).await?;
    let breakpoints = resp
        .get("breakpoints")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(breakpoints
        .into_iter()
        .map(|b| crate::types::Breakpoint {
            line: b.get("line").and_then(Value::as_u64).unwrap_or(0) as u32,
            verified: b.get("verified").and_then(Value::as_bool).unwrap_or(false),
            message: b.get("message").and_then(Value::as_str).map(str::to_string),
        })
        .collect())
}

pub async fn configuration_done(dap: &DapTransport, timeout: Duration) -> Result<(), DapError> {
    let req = dap.new_request("configurationDone", None);
    send_checked(dap, req, timeout).await.map(|_| ())
}

pub async fn motion(dap: &DapTransport, command: &str, timeout: Duration) -> Result<(), DapError> {
    let req = dap.new_request(command, Some(json!({ "threadId": 1 })));
    send_checked(dap, req, timeout).await.map(|_| ())
}

/// `stackTrace` with the original's fixed `levels: 20`.
pub async fn get_stack_trace(dap: &DapTransport, timeout: Duration) -> Result<Vec<StackFrame>, DapError> {
    let req = dap.new_request("stackTrace", Some(json!({ "threadId": 1, "levels": 20 })));
    let body = send_checked(dap, req, timeout).await?;
    let frames = body.get("stackFrames").and_then(Value::as_array).cloned().unwrap_or_default();
    Ok(frames
        .into_iter()
        .map(|f| StackFrame {
            id: f.get("id").and_then(Value::as_i64).unwrap_or(0),
            name: f.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            path: f
                .get("source")
                .and_then(|s| s.get("path"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            line: f.get("line").and_then(Value::as_u64).unwrap_or(0) as u32,
        })
        .collect())
}

pub async fn get_scopes(dap: &DapTransport, frame_id: i64, timeout: Duration) -> Result<Vec<Scope>, DapError> {
    let req = dap.new_request("scopes", Some(json!({ "frameId": frame_id })));
    let body = send_checked(dap, req, timeout).await?;
    let scopes = body.get("scopes").and_then(Value::as_array).cloned().unwrap_or_default();
    Ok(scopes
        .into_iter()
        .filter_map(|s| serde_json::from_value(s).ok())
        .collect())
}

/// `variables` with `format.hex=true`, filtering `~r`-prefixed synthesized
/// slots and auto-dereferencing single-level pointers so they expand
/// directly to the pointed-at struct, per `debugger_variable.go`.
pub async fn get_variables(
    dap: &DapTransport,
    variables_reference: i64,
    timeout: Duration,
) -> Result<Vec<Variable>, DapError> {
    let raw = get_variables_raw(dap, variables_reference, timeout).await?;
    let mut out = Vec::with_capacity(raw.len());
    for var in raw {
        if var.name.starts_with("~r") {
            continue;
        }
        if var.is_pointer() && var.is_expandable() {
            let children = get_variables_raw(dap, var.variables_reference, timeout).await.unwrap_or_default();
            if let Some(first_child) = children.first() {
                let mut deref = var.clone();
                deref.variables_reference = first_child.variables_reference;
                out.push(deref);
                continue;
            }
        }
        out.push(var);
    }
    Ok(out)
}

async fn get_variables_raw(
    dap: &DapTransport,
    variables_reference: i64,
    timeout: Duration,
) -> Result<Vec<Variable>, DapError> {
    let req = dap.new_request(
        "variables",
        Some(json!({
            "variablesReference": variables_reference,
            "format": { "hex": true },
        })),
    );
    let body = send_checked(dap, req, timeout).await?;
    let vars = body.get("variables").and_then(Value::as_array).cloned().unwrap_or_default();
    Ok(vars.into_iter().filter_map(|v| serde_json::from_value(v).ok()).collect())
}

/// Scopes whose lower-cased name contains `local`; empty if none match.
pub async fn get_frame_variables(
    dap: &DapTransport,
    frame_id: i64,
    timeout: Duration,
) -> Result<Vec<Variable>, DapError> {
    let scopes = get_scopes(dap, frame_id, timeout).await?;
    let local_scope = scopes.into_iter().find(|s| s.name.to_lowercase().contains("local"));
    match local_scope {
        Some(scope) => get_variables(dap, scope.variables_reference, timeout).await,
        None => Ok(Vec::new()),
    }
}

async fn send_checked(dap: &DapTransport, req: Request, timeout: Duration) -> Result<Value, DapError> {
    let resp = dap.send_with_timeout(req, timeout).await?;
    if !resp.success {
        return Err(DapError::ErrorResponse(resp.message.unwrap_or_else(|| "unknown dap error".to_string())));
    }
    Ok(resp.body.unwrap_or(Value::Null))
}
