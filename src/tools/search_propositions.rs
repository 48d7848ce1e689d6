//! MCP `search_propositions` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `search_propositions` MCP tool.
///
/// Any of `context`, `status`, `min_level` or `max_level` switches to the
/// filtered search, which ranks the restricted set exactly.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchPropositionsParams {
    #[schemars(description = "Natural language text to find similar propositions for")]
    pub query: String,

    #[schemars(description = "Restrict to one context id. Defaults to storage.default_context when configured")]
    pub context: Option<String>,

    #[schemars(description = "Restrict by status: 'active', 'superseded', 'contradicted', 'promoted'")]
    pub status: Option<String>,

    #[schemars(description = "Minimum abstraction level")]
    pub min_level: Option<u32>,

    #[schemars(description = "Maximum abstraction level")]
    pub max_level: Option<u32>,

    /// Defaults to `retrieval.default_top_k`.
    #[schemars(description = "Maximum number of results (1-50)")]
    pub top_k: Option<usize>,

    /// Defaults to `retrieval.min_similarity`.
    #[schemars(description = "Minimum cosine similarity (0.0-1.0)")]
    pub min_similarity: Option<f64>,
}
