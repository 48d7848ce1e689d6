use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PropositionsAboutEntityParams {
    #[schemars(description = "Resolved id of the entity")]
    pub entity_id: String,

    #[schemars(
        description = "Entity type, e.g. 'User' or 'Place'. Mentions whose type contains this (case-insensitive) also match."
    )]
    pub entity_type: String,
}
