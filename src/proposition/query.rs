//! Typed proposition queries.
//!
//! A [`PropositionQuery`] is compiled deterministically into SQL by
//! [`compile`]. Effective-confidence filtering cannot be expressed in SQLite
//! without a custom function, so it runs afterwards as its own stage
//! ([`apply_decay_threshold`]), followed by [`apply_ordering`].
//!
//! The SQL `LIMIT` is applied before the decay stage. A query with both a
//! limit and a minimum effective confidence can therefore return fewer rows
//! than the limit even when more would qualify; request a larger limit and
//! truncate locally when an exact top-K after decay is needed.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;

use super::store::PROPOSITION_COLUMNS;
use super::types::{ParseError, Proposition, PropositionStatus};

/// Decay constant used when a query does not set one.
pub const DEFAULT_DECAY_K: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    EffectiveConfidenceDesc,
    CreatedDesc,
    RevisedDesc,
    ReinforceCountDesc,
    #[default]
    None,
}

impl std::str::FromStr for OrderBy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "effective_confidence" | "confidence" => Ok(Self::EffectiveConfidenceDesc),
            "created" => Ok(Self::CreatedDesc),
            "revised" => Ok(Self::RevisedDesc),
            "reinforce_count" | "reinforced" => Ok(Self::ReinforceCountDesc),
            "none" => Ok(Self::None),
            _ => Err(ParseError::new("ordering", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropositionQuery {
    pub context_id: Option<String>,
    pub status: Option<PropositionStatus>,
    pub min_level: Option<u32>,
    pub max_level: Option<u32>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub revised_after: Option<DateTime<Utc>>,
    pub revised_before: Option<DateTime<Utc>>,
    pub min_effective_confidence: Option<f64>,
    /// Instant the decay is evaluated at; `None` means now.
    pub as_of: Option<DateTime<Utc>>,
    pub decay_k: f64,
    /// Only propositions with a mention resolved to this entity.
    pub entity_id: Option<String>,
    pub order_by: OrderBy,
    pub limit: Option<usize>,
}

impl Default for PropositionQuery {
    fn default() -> Self {
        Self {
            context_id: None,
            status: None,
            min_level: None,
            max_level: None,
            created_after: None,
            created_before: None,
            revised_after: None,
            revised_before: None,
            min_effective_confidence: None,
            as_of: None,
            decay_k: DEFAULT_DECAY_K,
            entity_id: None,
            order_by: OrderBy::None,
            limit: None,
        }
    }
}

impl PropositionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_context(context_id: impl Into<String>) -> Self {
        Self::new().in_context(context_id)
    }

    pub fn in_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn with_status(mut self, status: PropositionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn level_between(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_level = min;
        self.max_level = max;
        self
    }

    pub fn created_between(mut self, after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    pub fn revised_between(mut self, after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Self {
        self.revised_after = after;
        self.revised_before = before;
        self
    }

    /// Keep only propositions whose decayed confidence at `as_of` reaches `min`.
    pub fn min_effective_confidence(mut self, min: f64, as_of: Option<DateTime<Utc>>, decay_k: f64) -> Self {
        self.min_effective_confidence = Some(min);
        self.as_of = as_of;
        self.decay_k = decay_k;
        self
    }

    pub fn mentioning_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn ordered_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_as_of(&self) -> DateTime<Utc> {
        self.as_of.unwrap_or_else(Utc::now)
    }
}

// ── Compilation ─────────────────────────────────────────────────────────

/// SQL text plus positional parameters, in `?N` order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlPlan {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Accumulates `AND`-joined predicates with numbered placeholders.
#[derive(Debug, Default)]
pub(crate) struct WhereBuilder {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl WhereBuilder {
    /// Start numbering after parameters the caller has already bound.
    pub(crate) fn after(params: Vec<Value>) -> Self {
        Self {
            clauses: Vec::new(),
            params,
        }
    }

    /// Bind `value` and add the clause produced for its placeholder.
    pub(crate) fn bind(&mut self, value: Value, clause: impl FnOnce(&str) -> String) -> &mut Self {
        self.params.push(value);
        let placeholder = format!("?{}", self.params.len());
        self.clauses.push(clause(&placeholder));
        self
    }

    pub(crate) fn clause(&self) -> String {
        if self.clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    pub(crate) fn into_params(self) -> Vec<Value> {
        self.params
    }
}

/// Add every SQL-expressible predicate of `query` (all but the decay threshold).
pub(crate) fn push_filters(query: &PropositionQuery, builder: &mut WhereBuilder) {
    let text = |s: &str| Value::Text(s.to_string());
    let millis = |t: &DateTime<Utc>| Value::Integer(t.timestamp_millis());

    if let Some(ctx) = &query.context_id {
        builder.bind(text(ctx), |p| format!("p.context_id = {p}"));
    }
    if let Some(status) = query.status {
        builder.bind(text(status.as_str()), |p| format!("p.status = {p}"));
    }
    if let Some(min) = query.min_level {
        builder.bind(Value::Integer(i64::from(min)), |p| format!("p.level >= {p}"));
    }
    if let Some(max) = query.max_level {
        builder.bind(Value::Integer(i64::from(max)), |p| format!("p.level <= {p}"));
    }
    if let Some(t) = &query.created_after {
        builder.bind(millis(t), |p| format!("p.created_at >= {p}"));
    }
    if let Some(t) = &query.created_before {
        builder.bind(millis(t), |p| format!("p.created_at <= {p}"));
    }
    if let Some(t) = &query.revised_after {
        builder.bind(millis(t), |p| format!("p.revised_at >= {p}"));
    }
    if let Some(t) = &query.revised_before {
        builder.bind(millis(t), |p| format!("p.revised_at <= {p}"));
    }
    if let Some(entity) = &query.entity_id {
        builder.bind(text(entity), |p| {
            format!(
                "EXISTS (SELECT 1 FROM mentions m WHERE m.proposition_id = p.id AND m.resolved_id = {p})"
            )
        });
    }
}

fn order_clause(order_by: OrderBy) -> &'static str {
    match order_by {
        // approximated in SQL, re-sorted by apply_ordering
        OrderBy::EffectiveConfidenceDesc => " ORDER BY p.confidence DESC, p.revised_at DESC, p.id",
        OrderBy::CreatedDesc => " ORDER BY p.created_at DESC, p.id",
        OrderBy::RevisedDesc => " ORDER BY p.revised_at DESC, p.id",
        OrderBy::ReinforceCountDesc => " ORDER BY p.reinforce_count DESC, p.id",
        OrderBy::None => " ORDER BY p.created_at, p.id",
    }
}

/// Compile a query to SQL. The same query always yields the same plan.
pub fn compile(query: &PropositionQuery) -> SqlPlan {
    let mut builder = WhereBuilder::default();
    push_filters(query, &mut builder);

    let mut sql = format!(
        "SELECT {PROPOSITION_COLUMNS} FROM propositions p WHERE {}",
        builder.clause()
    );
    sql.push_str(order_clause(query.order_by));

    let mut params = builder.into_params();
    if let Some(limit) = query.limit {
        params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" LIMIT ?{}", params.len()));
    }

    SqlPlan { sql, params }
}

// ── Post-execution stages ───────────────────────────────────────────────

/// Drop propositions whose effective confidence falls below the query's minimum.
pub fn apply_decay_threshold(propositions: Vec<Proposition>, query: &PropositionQuery) -> Vec<Proposition> {
    let Some(min) = query.min_effective_confidence else {
        return propositions;
    };
    let as_of = query.effective_as_of();
    propositions
        .into_iter()
        .filter(|p| p.effective_confidence(as_of, query.decay_k) >= min)
        .collect()
}

/// Re-sort locally when the ordering depends on decay; other orderings come from SQL.
pub fn apply_ordering(mut propositions: Vec<Proposition>, query: &PropositionQuery) -> Vec<Proposition> {
    if query.order_by == OrderBy::EffectiveConfidenceDesc {
        let as_of = query.effective_as_of();
        propositions.sort_by(|a, b| {
            b.effective_confidence(as_of, query.decay_k)
                .total_cmp(&a.effective_confidence(as_of, query.decay_k))
                .then_with(|| a.id.cmp(&b.id))
        });
    }
    propositions
}
