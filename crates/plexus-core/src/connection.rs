use serde::{Deserialize, Serialize};

/// Tenant and actor behind a physical connection.
///
/// Resolved once from the bearer credential when the connection is
/// established and never changes for the connection's lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub workspace: String,
    pub personal_workspace: String,
    pub social_id: String,
}

impl ConnectionInfo {
    pub fn new(
        workspace: impl Into<String>,
        personal_workspace: impl Into<String>,
        social_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            personal_workspace: personal_workspace.into(),
            social_id: social_id.into(),
        }
    }
}
