//! Single-shot producer, many blocked consumers: analyze the user's code
//! once and let every `get_visual_description` caller await the same result.
//!
//! Grounded on `ai_analyze_core/visual_description_analyse.go`'s
//! `VisualDescriptionAnalyzer` (`sync.Cond`-based wait/broadcast). Per the
//! "async/blocking" design note, this uses `tokio::sync::Notify` plus a
//! mutex-guarded result slot instead of a recurring condvar — `start_analyze_code`
//! runs once, `get_visual_description` can be awaited by any number of
//! callers before or after it completes.

use std::sync::Arc;

use dso_error::AnalyzerError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

use crate::description::{ArrayDisplayType, VisualDescription};
use crate::provider::AiProvider;

#[derive(Default)]
struct State {
    analyzing: bool,
    result: Option<VisualDescription>,
    error: Option<String>,
    started: bool,
}

pub struct VisualAnalyzer {
    provider: Arc<dyn AiProvider>,
    state: Mutex<State>,
    notify: Notify,
}

impl VisualAnalyzer {
    pub fn new(provider: Arc<dyn AiProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Starts the AI round-trip in the background. Refuses if one is
    /// already in flight; returns `AnalyzerError::Busy` in that case.
    pub async fn start_analyze_code(self: &Arc<Self>, code: String, language: String) -> Result<(), AnalyzerError> {
        {
            let mut state = self.state.lock().await;
            if state.analyzing {
                return Err(AnalyzerError::Busy);
            }
            state.analyzing = true;
            state.started = true;
            state.result = None;
            state.error = None;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let prompt = build_analysis_prompt(&code, &language);
            let outcome = this.provider.chat(&prompt).await.and_then(|raw| parse_ai_response(&raw));

            let mut state = this.state.lock().await;
            match outcome {
                Ok(desc) => state.result = Some(desc),
                Err(err) => state.error = Some(err.to_string()),
            }
            state.analyzing = false;
            drop(state);
            this.notify.notify_waiters();
        });

        Ok(())
    }

    /// Blocks until the in-flight analysis (if any) completes, then returns
    /// its result. Multiple concurrent callers all observe the same value.
    pub async fn get_visual_description(&self) -> Result<VisualDescription, AnalyzerError> {
        loop {
            let notified = {
                let state = self.state.lock().await;
                if !state.analyzing {
                    if let Some(desc) = &state.result {
                        return Ok(desc.clone());
                    }
                    if let Some(err) = &state.error {
                        return Err(AnalyzerError::Failed(err.clone()));
                    }
                    if !state.started {
                        return Err(AnalyzerError::NotFound);
                    }
                }
                self.notify.notified()
            };
            notified.await;
        }
    }

    /// Best-effort regex classification when the AI round-trip itself
    /// fails; never blocks on `start_analyze_code`.
    pub fn analyze_with_fallback(code: &str) -> VisualDescription {
        rule_based_analysis(code)
    }
}

fn parse_ai_response(raw: &str) -> Result<VisualDescription, AnalyzerError> {
    let json_slice = extract_json_from_response(raw)
        .ok_or_else(|| AnalyzerError::Failed("no json object found in ai response".to_string()))?;
    let value: Value = serde_json::from_str(json_slice)
        .map_err(|e| AnalyzerError::Failed(format!("malformed json in ai response: {e}")))?;

    let visual_type = value
        .get("visualType")
        .and_then(Value::as_str)
        .unwrap_or("array");
    let visual_type = if is_valid_visual_type(visual_type) {
        visual_type
    } else {
        "array"
    };

    let mut tagged = serde_json::Map::new();
    tagged.insert("visualType".to_string(), Value::String(visual_type.to_string()));
    if let Some(desc) = value.get("description") {
        tagged.insert("description".to_string(), desc.clone());
    }

    serde_json::from_value(Value::Object(tagged))
        .map_err(|e| AnalyzerError::Failed(format!("description did not match {visual_type} schema: {e}")))
}

/// Finds the outermost `{...}` span, tolerating prose before/after it
/// (models often wrap JSON in markdown fences or commentary).
fn extract_json_from_response(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

fn is_valid_visual_type(kind: &str) -> bool {
    matches!(kind, "array" | "array2d" | "linkList" | "binaryTree" | "graph")
}

fn build_analysis_prompt(code: &str, language: &str) -> String {
    format!(
        "You are analyzing {language} source code to determine which data structure \
         it visualizes at runtime. Respond with exactly one JSON object of the shape \
         {{\"visualType\": one of \"array\"|\"array2d\"|\"linkList\"|\"binaryTree\"|\"graph\", \
         \"description\": {{...fields for that type...}}}}. No prose, no markdown fences.\n\n\
         Code:\n```\n{code}\n```"
    )
}

static LINKED_LIST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(next|prev)\b.*\b(ListNode|Node)\b|\bListNode\b").expect("static regex"));
static BINARY_TREE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bleft\b[\s\S]{0,200}\bright\b|\bTreeNode\b").expect("static regex"));
static GRAPH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bneighbors\b|\badjacency\b|\bgraph\b|\[\]\s*\*\w+|map\[[^\]]+\]\s*\[\]")
        .expect("static regex")
});

fn contains_linked_list_pattern(code: &str) -> bool {
    LINKED_LIST_RE.is_match(code)
}

fn contains_binary_tree_pattern(code: &str) -> bool {
    BINARY_TREE_RE.is_match(code)
}

fn contains_graph_pattern(code: &str) -> bool {
    GRAPH_RE.is_match(code)
}

fn rule_based_analysis(code: &str) -> VisualDescription {
    if contains_binary_tree_pattern(code) {
        VisualDescription::BinaryTree {
            tree_node: "TreeNode".to_string(),
            data: "val".to_string(),
            left: "left".to_string(),
            right: "right".to_string(),
        }
    } else if contains_linked_list_pattern(code) {
        VisualDescription::LinkList {
            link_node: "ListNode".to_string(),
            data: "val".to_string(),
            next: "next".to_string(),
            prev: None,
        }
    } else if contains_graph_pattern(code) {
        VisualDescription::Graph {
            graph_node: "Node".to_string(),
            data: "val".to_string(),
            nexts: vec!["neighbors".to_string()],
        }
    } else {
        VisualDescription::Array {
            array_name: "arr".to_string(),
            point_names: vec![],
            display_type: ArrayDisplayType::Array,
        }
    }
}
