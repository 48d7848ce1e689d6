pub mod clear_propositions;
pub mod list_propositions;
pub mod proposition_clusters;
pub mod proposition_stats;
pub mod propositions_about_entity;
pub mod search_propositions;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clear_propositions::ClearPropositionsParams;
use list_propositions::ListPropositionsParams;
use proposition_clusters::PropositionClustersParams;
use proposition_stats::PropositionStatsParams;
use propositions_about_entity::PropositionsAboutEntityParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use search_propositions::SearchPropositionsParams;
use serde_json::json;

use crate::config::RecollectConfig;
use crate::db;
use crate::proposition::{
    OrderBy, PropositionQuery, PropositionStatus, PropositionStore, RetrievableIdentifier,
    TextSimilaritySearchRequest,
};

const MAX_TOP_K: usize = 50;

/// The recollect MCP tool handler. Holds the proposition store and config and
/// exposes the read and maintenance tools via the `#[tool_router]` macro.
#[derive(Clone)]
pub struct RecollectTools {
    tool_router: ToolRouter<Self>,
    store: Arc<PropositionStore>,
    config: Arc<RecollectConfig>,
}

/// Run store work on the blocking pool, flattening both error layers into a
/// tool error string.
async fn blocking<T, F>(f: F) -> Result<T, String>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| format!("task failed: {e}"))?
        .map_err(|e| format!("{e:#}"))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("serialization failed: {e}"))
}

fn parse_instant(field: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| format!("{field} is not an RFC 3339 timestamp: {e}"))
        })
        .transpose()
}

fn parse_status(value: Option<&str>) -> Result<Option<PropositionStatus>, String> {
    value
        .map(|s| s.parse::<PropositionStatus>().map_err(|e| e.to_string()))
        .transpose()
}

/// Map `list_propositions` parameters onto a typed query.
fn build_list_query(params: &ListPropositionsParams, config: &RecollectConfig) -> Result<PropositionQuery, String> {
    let mut query = PropositionQuery::new()
        .level_between(params.min_level, params.max_level)
        .created_between(
            parse_instant("created_after", params.created_after.as_deref())?,
            parse_instant("created_before", params.created_before.as_deref())?,
        );
    if let Some(context) = config.storage.context_or_default(params.context.clone()) {
        query = query.in_context(context);
    }
    if let Some(status) = parse_status(params.status.as_deref())? {
        query = query.with_status(status);
    }
    if let Some(min) = params.min_effective_confidence {
        if !(0.0..=1.0).contains(&min) {
            return Err("min_effective_confidence must be between 0.0 and 1.0".into());
        }
        let as_of = parse_instant("as_of", params.as_of.as_deref())?;
        let decay_k = params.decay_k.unwrap_or(config.retrieval.default_decay_k);
        query = query.min_effective_confidence(min, as_of, decay_k);
    }
    if let Some(order) = &params.order_by {
        query = query.ordered_by(order.parse::<OrderBy>().map_err(|e| e.to_string())?);
    }
    if let Some(limit) = params.limit {
        query = query.limit(limit);
    }
    Ok(query)
}

#[tool_router]
impl RecollectTools {
    pub fn new(store: Arc<PropositionStore>, config: Arc<RecollectConfig>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            store,
            config,
        }
    }

    /// Similarity search over proposition text.
    #[tool(description = "Find propositions similar to a natural language query. Returns (match, score) pairs, best first. Optional context/status/level filters restrict candidates before ranking.")]
    async fn search_propositions(
        &self,
        Parameters(params): Parameters<SearchPropositionsParams>,
    ) -> Result<String, String> {
        if params.query.trim().is_empty() {
            return Err("query must not be empty".into());
        }
        let top_k = params
            .top_k
            .unwrap_or(self.config.retrieval.default_top_k)
            .clamp(1, MAX_TOP_K);
        let threshold = params
            .min_similarity
            .unwrap_or(self.config.retrieval.min_similarity);
        if !(0.0..=1.0).contains(&threshold) {
            return Err("min_similarity must be between 0.0 and 1.0".into());
        }

        let status = parse_status(params.status.as_deref())?;
        let context = self.config.storage.context_or_default(params.context);
        let filtered = context.is_some()
            || status.is_some()
            || params.min_level.is_some()
            || params.max_level.is_some();
        let mut query = PropositionQuery::new().level_between(params.min_level, params.max_level);
        if let Some(context) = context {
            query = query.in_context(context);
        }
        if let Some(status) = status {
            query = query.with_status(status);
        }

        tracing::info!(query = %params.query, top_k, threshold, filtered, "search_propositions called");

        let request = TextSimilaritySearchRequest::new(params.query, top_k, threshold);
        let store = Arc::clone(&self.store);
        let results = blocking(move || {
            Ok(if filtered {
                store.find_similar_with_scores_filtered(&request, &query)
            } else {
                store.find_similar_with_scores(&request)
            })
        })
        .await?;

        to_json(&json!({ "results": results, "total": results.len() }))
    }

    /// Structured listing with decay filtering and ordering.
    #[tool(description = "List propositions by context, status, level and time range. Optionally drop propositions whose confidence, decayed since their last revision, falls below a threshold, and order by effective confidence, creation, revision or reinforcement count.")]
    async fn list_propositions(
        &self,
        Parameters(params): Parameters<ListPropositionsParams>,
    ) -> Result<String, String> {
        let query = build_list_query(&params, &self.config)?;
        tracing::info!(?query, "list_propositions called");

        let store = Arc::clone(&self.store);
        let propositions = blocking(move || Ok(store.query(&query))).await?;
        to_json(&json!({ "propositions": propositions, "total": propositions.len() }))
    }

    /// Propositions mentioning a resolved entity.
    #[tool(description = "List propositions with a mention resolved to the given entity id. Entity types match leniently: 'User' also matches 'ConversationalUser'.")]
    async fn propositions_about_entity(
        &self,
        Parameters(params): Parameters<PropositionsAboutEntityParams>,
    ) -> Result<String, String> {
        if params.entity_id.is_empty() {
            return Err("entity_id must not be empty".into());
        }
        tracing::info!(entity_id = %params.entity_id, entity_type = %params.entity_type, "propositions_about_entity called");

        let identifier = RetrievableIdentifier::new(params.entity_id, params.entity_type);
        let store = Arc::clone(&self.store);
        let propositions = blocking(move || Ok(store.find_by_entity(&identifier))).await?;
        to_json(&json!({ "propositions": propositions, "total": propositions.len() }))
    }

    /// Anchor + similar groupings for display.
    #[tool(description = "Group similar propositions into clusters of an anchor and its similar propositions. Computed on demand; not stored.")]
    async fn proposition_clusters(
        &self,
        Parameters(params): Parameters<PropositionClustersParams>,
    ) -> Result<String, String> {
        let threshold = params
            .threshold
            .unwrap_or(self.config.retrieval.cluster_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err("threshold must be between 0.0 and 1.0".into());
        }
        let max_size = params
            .max_cluster_size
            .unwrap_or(self.config.retrieval.cluster_max_size)
            .max(1);
        let query = self
            .config
            .storage
            .context_or_default(params.context)
            .map(PropositionQuery::for_context);
        tracing::info!(threshold, max_size, "proposition_clusters called");

        let store = Arc::clone(&self.store);
        let clusters = blocking(move || Ok(store.find_clusters(threshold, max_size, query.as_ref()))).await?;
        to_json(&json!({ "clusters": clusters, "total": clusters.len() }))
    }

    /// Store statistics.
    #[tool(description = "Get proposition store statistics: counts by status and context, unresolved mentions, processed windows, entities, relationships, storage size.")]
    async fn proposition_stats(
        &self,
        Parameters(params): Parameters<PropositionStatsParams>,
    ) -> Result<String, String> {
        let context = self.config.storage.context_or_default(params.context);
        tracing::info!(?context, "proposition_stats called");
        let store = Arc::clone(&self.store);
        let db_path = self.config.resolved_db_path();
        let stats = blocking(move || {
            let conn = db::lock(store.connection())?;
            crate::proposition::stats::proposition_stats(&conn, context.as_deref(), Some(&db_path))
        })
        .await?;
        to_json(&stats)
    }

    /// Bulk deletion.
    #[tool(description = "Delete propositions: all of them, one context, or every context with a prefix. Requires confirm=true as a safety gate.")]
    async fn clear_propositions(
        &self,
        Parameters(params): Parameters<ClearPropositionsParams>,
    ) -> Result<String, String> {
        if !params.confirm {
            return Err("confirm must be true to delete propositions".into());
        }
        if params.context.is_some() && params.context_prefix.is_some() {
            return Err("give either context or context_prefix, not both".into());
        }

        let store = Arc::clone(&self.store);
        let (scope, deleted) = blocking(move || {
            Ok(match (params.context, params.context_prefix) {
                (Some(ctx), _) => (format!("context {ctx}"), store.clear_by_context(&ctx)?),
                (None, Some(prefix)) => (format!("prefix {prefix}"), store.clear_by_context_prefix(&prefix)?),
                (None, None) => ("all".to_string(), store.clear_all()?),
            })
        })
        .await?;

        tracing::info!(scope = %scope, deleted, "clear_propositions completed");
        to_json(&json!({ "deleted": deleted, "scope": scope }))
    }
}

#[tool_handler]
impl ServerHandler for RecollectTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "recollect stores propositions: natural-language facts with confidence that \
                 decays over time. Use search_propositions for similarity search, \
                 list_propositions for structured filters, and propositions_about_entity to \
                 see everything known about an entity."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
