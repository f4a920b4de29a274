//! Response bodies for the probe endpoints

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    pub ready: bool,
    /// Only meaningful when leader election is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_leader: Option<bool>,
}
