//! Flat-document data model.
//!
//! These mirror the JSON envelopes on disk; every document is a single
//! object wrapping a list, except settings which is stored bare.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::http::{RequestData, ResponseData};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceData {
    pub workspaces: Vec<Workspace>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionRequest {
    pub id: String,
    pub name: String,
    pub collection_id: String,
    pub request: RequestData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub workspace_id: String,
    pub requests: Vec<CollectionRequest>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionData {
    pub collections: Vec<Collection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Environment {
    pub id: String,
    pub name: String,
    pub variables: HashMap<String, String>,
    pub workspace_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentData {
    pub environments: Vec<Environment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryItem {
    pub id: String,
    pub request: RequestData,
    pub response: Option<ResponseData>,
    pub timestamp: Option<DateTime<Utc>>,
    pub workspace_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryData {
    pub items: Vec<HistoryItem>,
}

/// Application settings, stored as a bare record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub ui_scale: u32,
    pub theme: String,
    pub layout_mode: String,
    pub auto_save_history: bool,
    pub max_history_items: u32,
    pub default_timeout: u32,
    pub pretty_print_by_default: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ui_scale: 100,
            theme: "dark".to_string(),
            layout_mode: "horizontal".to_string(),
            auto_save_history: true,
            max_history_items: 100,
            default_timeout: 30_000,
            pretty_print_by_default: true,
        }
    }
}
