//! MCP `proposition_stats` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `proposition_stats` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PropositionStatsParams {
    /// Optional context id to restrict statistics to.
    #[schemars(description = "Optional context id to filter stats by. Defaults to storage.default_context when configured")]
    pub context: Option<String>,
}
