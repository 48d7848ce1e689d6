use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PropositionClustersParams {
    #[schemars(description = "Restrict clustering to one context id. Defaults to storage.default_context when configured")]
    pub context: Option<String>,

    #[schemars(description = "Minimum similarity to join a cluster (0.0-1.0). Defaults to the configured value.")]
    pub threshold: Option<f64>,

    #[schemars(description = "Maximum similar propositions per cluster. Defaults to the configured value.")]
    pub max_cluster_size: Option<usize>,
}
