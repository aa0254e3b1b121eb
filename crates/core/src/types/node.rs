use serde::{Deserialize, Serialize};

/// Registration payload announcing this node's capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRegistration {
    /// Empty to let the coordinator assign an id.
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(rename = "gpuName")]
    pub gpu_name: Option<String>,
    #[serde(rename = "gpuSpecs")]
    pub gpu_specs: String,
    pub owner: Option<String>,
    #[serde(rename = "memoryAvailable")]
    pub memory_available: u64,
}

/// Node record returned by the coordinator after registration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisteredNode {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(default)]
    pub status: String,
}
