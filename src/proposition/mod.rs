pub mod lookup;
pub mod query;
pub mod search;
pub mod stats;
pub mod store;
pub mod types;

pub use query::{OrderBy, PropositionQuery};
pub use store::PropositionStore;
pub use types::{
    Cluster, EntityMention, MentionRole, Proposition, PropositionStatus, RetrievableIdentifier,
    SimilarityResult, TextSimilaritySearchRequest,
};
