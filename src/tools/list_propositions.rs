//! MCP `list_propositions` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `list_propositions` MCP tool.
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListPropositionsParams {
    #[schemars(description = "Restrict to one context id. Defaults to storage.default_context when configured")]
    pub context: Option<String>,

    #[schemars(description = "Restrict by status: 'active', 'superseded', 'contradicted', 'promoted'")]
    pub status: Option<String>,

    #[schemars(description = "Minimum abstraction level")]
    pub min_level: Option<u32>,

    #[schemars(description = "Maximum abstraction level")]
    pub max_level: Option<u32>,

    #[schemars(description = "Only propositions created at or after this RFC 3339 instant")]
    pub created_after: Option<String>,

    #[schemars(description = "Only propositions created at or before this RFC 3339 instant")]
    pub created_before: Option<String>,

    #[schemars(description = "Drop propositions whose decayed confidence is below this (0.0-1.0)")]
    pub min_effective_confidence: Option<f64>,

    #[schemars(description = "Decay constant per year for effective confidence. Defaults to the configured value.")]
    pub decay_k: Option<f64>,

    #[schemars(description = "RFC 3339 instant to evaluate decay at. Defaults to now.")]
    pub as_of: Option<String>,

    #[schemars(
        description = "Ordering: 'effective_confidence', 'created', 'revised', 'reinforce_count' or 'none'"
    )]
    pub order_by: Option<String>,

    /// Applied before the decay filter, so fewer rows than `limit` may come back.
    #[schemars(description = "Maximum number of rows fetched before decay filtering")]
    pub limit: Option<usize>,
}
