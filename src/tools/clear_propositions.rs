use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ClearPropositionsParams {
    #[schemars(description = "Delete only propositions in this exact context id")]
    pub context: Option<String>,

    #[schemars(description = "Delete propositions whose context id starts with this prefix")]
    pub context_prefix: Option<String>,

    #[schemars(description = "Must be true. With neither context nor context_prefix every proposition is deleted.")]
    pub confirm: bool,
}
