//! `StructVisual` / `ArrayVisual` / `Array2DVisual`: interpret live debuggee
//! state as a graph, a 1-D sequence, or a 2-D sequence.
//!
//! Grounded on `debugger_visual.go` (`StructVisual`, `getArrayNodesForGo`,
//! `getArrayNodesForC`, `getStructVariableForC`, `Array2DVisual`).

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use dso_dap::DapTransport;
use dso_error::DapError;

use crate::dap_ops::{get_frame_variables, get_stack_trace, get_variables};
use crate::language::LanguageAdapter;
use crate::types::{
    Array2DVisualData, Array2DVisualQuery, ArrayVisualData, ArrayVisualQuery, StructVisualData,
    StructVisualNode, StructVisualQuery, Variable,
};

async fn all_frame_variables(dap: &DapTransport, timeout: Duration) -> Result<Vec<Vec<Variable>>, DapError> {
    let frames = get_stack_trace(dap, timeout).await?;
    let mut out = Vec::with_capacity(frames.len());
    for frame in frames {
        out.push(get_frame_variables(dap, frame.id, timeout).await.unwrap_or_default());
    }
    Ok(out)
}

pub async fn struct_visual(
    dap: &DapTransport,
    adapter: &dyn LanguageAdapter,
    query: &StructVisualQuery,
    timeout: Duration,
) -> Result<StructVisualData, DapError> {
    let frames = all_frame_variables(dap, timeout).await?;
    let top_frame = frames.first().cloned().unwrap_or_default();

    let pointer_roots: Vec<Variable> = top_frame
        .iter()
        .filter(|v| adapter.is_target_struct_type(&v.type_, &query.struct_name))
        .cloned()
        .collect();

    let mut frontier: VecDeque<Variable> = frames
        .iter()
        .flatten()
        .filter(|v| adapter.is_target_struct_type(&v.type_, &query.struct_name))
        .cloned()
        .collect();

    let mut visited: HashSet<String> = HashSet::new();
    let mut nodes: Vec<StructVisualNode> = Vec::new();

    while let Some(var) = frontier.pop_front() {
        if var.variables_reference == 0 || var.value.is_empty() {
            continue;
        }
        if !visited.insert(var.value.clone()) {
            continue;
        }

        let children = get_variables(dap, var.variables_reference, timeout).await.unwrap_or_default();
        let mut values = Vec::new();
        let mut pointers = Vec::new();
        for child in &children {
            if query.value_fields.contains(&child.name) {
                values.push((child.name.clone(), child.value.clone()));
            }
            if query.pointer_fields.contains(&child.name) {
                pointers.push((child.name.clone(), child.value.clone()));
                if child.variables_reference != 0 {
                    frontier.push_back(child.clone());
                }
            }
        }

        nodes.push(StructVisualNode {
            id: var.value.clone(),
            type_: var.type_.clone(),
            values,
            pointers,
        });
    }

    Ok(StructVisualData {
        pointer_roots,
        nodes,
    })
}

pub async fn array_visual(
    dap: &DapTransport,
    adapter: &dyn LanguageAdapter,
    query: &ArrayVisualQuery,
    timeout: Duration,
) -> Result<ArrayVisualData, DapError> {
    let frames = all_frame_variables(dap, timeout).await?;
    let top_frame = frames.first().cloned().unwrap_or_default();

    let points: Vec<(String, String)> = top_frame
        .iter()
        .filter(|v| query.point_names.contains(&v.name))
        .map(|v| (v.name.clone(), v.value.clone()))
        .collect();

    let mut array_root = top_frame.iter().find(|v| v.name == query.array_name).cloned();

    // C surfaces the array variable itself as a bare pointer with no
    // children; if so, look in lower frames for a variable sharing that
    // pointer's value with a real reference and use it instead.
    if let Some(root) = &array_root {
        if root.variables_reference == 0 {
            array_root = frames
                .iter()
                .skip(1)
                .flatten()
                .find(|v| v.value == root.value && v.variables_reference != 0)
                .cloned()
                .or(array_root);
        }
    }

    let elements = match &array_root {
        Some(root) if root.variables_reference != 0 => get_variables(dap, root.variables_reference, timeout)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|v| adapter.overlay_array_element(&v.value, &v.type_))
            .collect(),
        Some(root) => adapter.leaf_array_elements(&root.type_, &root.value).unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(ArrayVisualData { elements, points })
}

pub async fn array2d_visual(
    dap: &DapTransport,
    adapter: &dyn LanguageAdapter,
    query: &Array2DVisualQuery,
    timeout: Duration,
) -> Result<Array2DVisualData, DapError> {
    let frames = all_frame_variables(dap, timeout).await?;
    let top_frame = frames.first().cloned().unwrap_or_default();

    let row_points: Vec<(String, String)> = top_frame
        .iter()
        .filter(|v| query.row_point_names.contains(&v.name))
        .map(|v| (v.name.clone(), v.value.clone()))
        .collect();
    let col_points: Vec<(String, String)> = top_frame
        .iter()
        .filter(|v| query.col_point_names.contains(&v.name))
        .map(|v| (v.name.clone(), v.value.clone()))
        .collect();

    let root = top_frame.iter().find(|v| v.name == query.array_name).cloned();
    let mut rows = Vec::new();
    if let Some(root) = root {
        if root.variables_reference != 0 {
            let row_vars = get_variables(dap, root.variables_reference, timeout).await.unwrap_or_default();
            for row_var in row_vars {
                let cells = if row_var.variables_reference != 0 {
                    get_variables(dap, row_var.variables_reference, timeout)
                        .await
                        .unwrap_or_default()
                        .into_iter()
                        .map(|v| adapter.overlay_array_element(&v.value, &v.type_))
                        .collect()
                } else {
                    adapter
                        .leaf_array_elements(&row_var.type_, &row_var.value)
                        .unwrap_or_default()
                };
                rows.push(cells);
            }
        }
    }

    Ok(Array2DVisualData {
        rows,
        row_points,
        col_points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{CAdapter, GoAdapter};
    use crate::test_support::spawn_scripted_dap_server;
    use serde_json::json;

    fn variables_reference_of(args: &Option<serde_json::Value>) -> i64 {
        args.as_ref()
            .and_then(|a| a.get("variablesReference"))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(-1)
    }

    async fn connect(addr: std::net::SocketAddr) -> DapTransport {
        DapTransport::connect(addr, Duration::from_secs(2), std::sync::Arc::new(|_event| {}), None)
            .await
            .expect("connect")
    }

    #[tokio::test]
    async fn array_visual_reads_int_array_elements_unmangled() {
        let addr = spawn_scripted_dap_server(|command, args| match command {
            "stackTrace" => json!({
                "stackFrames": [{ "id": 1, "name": "main", "source": { "path": "/work/main.c" }, "line": 5 }],
            }),
            "scopes" => json!({ "scopes": [{ "name": "Locals", "variablesReference": 10 }] }),
            "variables" => match variables_reference_of(&args) {
                10 => json!({
                    "variables": [{ "name": "arr", "type": "int *", "value": "0x1000", "variablesReference": 20 }],
                }),
                20 => json!({
                    "variables": [
                        { "name": "[0]", "type": "int", "value": "1", "variablesReference": 0 },
                        { "name": "[1]", "type": "int", "value": "2", "variablesReference": 0 },
                    ],
                }),
                _ => json!({ "variables": [] }),
            },
            _ => json!({}),
        })
        .await;

        let dap = connect(addr).await;
        let adapter = CAdapter;
        let query = ArrayVisualQuery {
            array_name: "arr".to_string(),
            point_names: vec![],
        };
        let data = array_visual(&dap, &adapter, &query, Duration::from_secs(2)).await.expect("array_visual");
        assert_eq!(data.elements, vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn array_visual_walks_go_string_leaf_value() {
        let addr = spawn_scripted_dap_server(|command, _args| match command {
            "stackTrace" => json!({
                "stackFrames": [{ "id": 1, "name": "main", "source": { "path": "/work/main.go" }, "line": 3 }],
            }),
            "scopes" => json!({ "scopes": [{ "name": "Locals", "variablesReference": 10 }] }),
            "variables" => json!({
                "variables": [{ "name": "s", "type": "string", "value": "\"ab\"", "variablesReference": 0 }],
            }),
            _ => json!({}),
        })
        .await;

        let dap = connect(addr).await;
        let adapter = GoAdapter;
        let query = ArrayVisualQuery {
            array_name: "s".to_string(),
            point_names: vec![],
        };
        let data = array_visual(&dap, &adapter, &query, Duration::from_secs(2)).await.expect("array_visual");
        assert_eq!(data.elements, vec!["'a'".to_string(), "'b'".to_string()]);
    }

    #[tokio::test]
    async fn array2d_visual_reads_nested_rows() {
        let addr = spawn_scripted_dap_server(|command, args| match command {
            "stackTrace" => json!({
                "stackFrames": [{ "id": 1, "name": "main", "source": { "path": "/work/main.c" }, "line": 5 }],
            }),
            "scopes" => json!({ "scopes": [{ "name": "Locals", "variablesReference": 10 }] }),
            "variables" => match variables_reference_of(&args) {
                10 => json!({
                    "variables": [{ "name": "grid", "type": "int **", "value": "0x200", "variablesReference": 40 }],
                }),
                40 => json!({
                    "variables": [
                        { "name": "[0]", "type": "int *", "value": "0x210", "variablesReference": 50 },
                        { "name": "[1]", "type": "int *", "value": "0x220", "variablesReference": 60 },
                    ],
                }),
                50 => json!({
                    "variables": [
                        { "name": "[0]", "type": "int", "value": "1", "variablesReference": 0 },
                        { "name": "[1]", "type": "int", "value": "2", "variablesReference": 0 },
                    ],
                }),
                60 => json!({
                    "variables": [
                        { "name": "[0]", "type": "int", "value": "3", "variablesReference": 0 },
                        { "name": "[1]", "type": "int", "value": "4", "variablesReference": 0 },
                    ],
                }),
                _ => json!({ "variables": [] }),
            },
            _ => json!({}),
        })
        .await;

        let dap = connect(addr).await;
        let adapter = CAdapter;
        let query = Array2DVisualQuery {
            array_name: "grid".to_string(),
            row_point_names: vec![],
            col_point_names: vec![],
        };
        let data = array2d_visual(&dap, &adapter, &query, Duration::from_secs(2)).await.expect("array2d_visual");
        assert_eq!(
            data.rows,
            vec![vec!["1".to_string(), "2".to_string()], vec!["3".to_string(), "4".to_string()]]
        );
    }

    #[tokio::test]
    async fn struct_visual_walks_pointer_chain_and_collects_fields() {
        let addr = spawn_scripted_dap_server(|command, args| match command {
            "stackTrace" => json!({
                "stackFrames": [{ "id": 1, "name": "main", "source": { "path": "/work/main.go" }, "line": 8 }],
            }),
            "scopes" => json!({ "scopes": [{ "name": "Locals", "variablesReference": 10 }] }),
            "variables" => match variables_reference_of(&args) {
                10 => json!({
                    "variables": [{ "name": "n", "type": "*main.Node", "value": "0xc0001", "variablesReference": 30 }],
                }),
                // DAP represents a pointer variable's expansion as one
                // synthetic dereferenced child; `get_variables` follows it
                // to the real struct's own reference (35) before returning.
                30 => json!({
                    "variables": [
                        { "name": "*main.Node", "type": "main.Node", "value": "{...}", "variablesReference": 35 },
                    ],
                }),
                35 => json!({
                    "variables": [
                        { "name": "Value", "type": "int", "value": "42", "variablesReference": 0 },
                        { "name": "Next", "type": "*main.Node", "value": "0x0", "variablesReference": 0 },
                    ],
                }),
                _ => json!({ "variables": [] }),
            },
            _ => json!({}),
        })
        .await;

        let dap = connect(addr).await;
        let adapter = GoAdapter;
        let query = StructVisualQuery {
            struct_name: "Node".to_string(),
            value_fields: vec!["Value".to_string()],
            pointer_fields: vec!["Next".to_string()],
        };
        let data = struct_visual(&dap, &adapter, &query, Duration::from_secs(2)).await.expect("struct_visual");
        assert_eq!(data.pointer_roots.len(), 1);
        assert_eq!(data.pointer_roots[0].name, "n");
        assert_eq!(data.nodes.len(), 1);
        assert_eq!(data.nodes[0].values, vec![("Value".to_string(), "42".to_string())]);
        assert_eq!(data.nodes[0].pointers, vec![("Next".to_string(), "0x0".to_string())]);
    }
}
