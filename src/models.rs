use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Normal,
    MissingFile,
    MissingParent,
    MissingBcd,
    Mounted,
    Error,
}

impl Default for NodeStatus {
    fn default() -> Self {
        NodeStatus::Normal
    }
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Normal => "normal",
            NodeStatus::MissingFile => "missing_file",
            NodeStatus::MissingParent => "missing_parent",
            NodeStatus::MissingBcd => "missing_bcd",
            NodeStatus::Mounted => "mounted",
            NodeStatus::Error => "error",
        }
    }

    /// Parse a stored status. Older state files wrote the `Debug` form.
    pub fn from_stored(value: &str) -> Self {
        match value {
            "missing_file" | "MissingFile" => NodeStatus::MissingFile,
            "missing_parent" | "MissingParent" => NodeStatus::MissingParent,
            "missing_bcd" | "MissingBcd" => NodeStatus::MissingBcd,
            "mounted" | "Mounted" => NodeStatus::Mounted,
            "error" | "Error" => NodeStatus::Error,
            _ => NodeStatus::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub path: String,
    pub bcd_guid: Option<String>,
    pub desc: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: NodeStatus,
    pub boot_files_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WimImageInfo {
    pub index: u32,
    pub name: String,
    pub description: Option<String>,
    pub size: Option<String>,
}

/// One entry of the boot store as reported by a verbose enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BcdEntry {
    pub identifier: String,
    pub description: Option<String>,
    pub vhd_path: Option<String>,
}
