//! Wire shape of a data-structure classification, keyed by `visualType`.
//!
//! Mirrors the five payload schemas in the original's
//! `ai_analyze_core/visual_description_analyse.go` (`buildDescriptionObject`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "visualType", content = "description")]
pub enum VisualDescription {
    #[serde(rename = "array")]
    Array {
        #[serde(rename = "arrayName")]
        array_name: String,
        #[serde(rename = "pointNames")]
        point_names: Vec<String>,
        #[serde(rename = "displayType")]
        display_type: ArrayDisplayType,
    },
    #[serde(rename = "array2d")]
    Array2D {
        #[serde(rename = "arrayName")]
        array_name: String,
        #[serde(rename = "rowPointNames")]
        row_point_names: Vec<String>,
        #[serde(rename = "colPointNames")]
        col_point_names: Vec<String>,
    },
    #[serde(rename = "linkList")]
    LinkList {
        #[serde(rename = "linkNode")]
        link_node: String,
        data: String,
        next: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        prev: Option<String>,
    },
    #[serde(rename = "binaryTree")]
    BinaryTree {
        #[serde(rename = "treeNode")]
        tree_node: String,
        data: String,
        left: String,
        right: String,
    },
    #[serde(rename = "graph")]
    Graph {
        #[serde(rename = "graphNode")]
        graph_node: String,
        data: String,
        nexts: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ArrayDisplayType {
    Array,
    ArrayBar,
}

impl VisualDescription {
    /// The discriminator string as used on the wire and in prompts.
    pub fn kind(&self) -> &'static str {
        match self {
            VisualDescription::Array { .. } => "array",
            VisualDescription::Array2D { .. } => "array2d",
            VisualDescription::LinkList { .. } => "linkList",
            VisualDescription::BinaryTree { .. } => "binaryTree",
            VisualDescription::Graph { .. } => "graph",
        }
    }
}
