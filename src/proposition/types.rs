//! Core proposition type definitions.
//!
//! Defines [`Proposition`] (a persisted natural-language fact), its
//! [`EntityMention`]s, the [`PropositionStatus`] lifecycle, and the read-side
//! result shapes returned by similarity search and clustering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failure to decode an enum from its stored or user-supplied string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Lifecycle state of a proposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropositionStatus {
    Active,
    /// Replaced by a newer revision of the same fact.
    Superseded,
    /// Contradicted by later evidence.
    Contradicted,
    /// Abstracted into a higher-level proposition.
    Promoted,
}

impl PropositionStatus {
    pub const ALL: [PropositionStatus; 4] = [
        Self::Active,
        Self::Superseded,
        Self::Contradicted,
        Self::Promoted,
    ];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Contradicted => "contradicted",
            Self::Promoted => "promoted",
        }
    }
}

impl std::fmt::Display for PropositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PropositionStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "superseded" => Ok(Self::Superseded),
            "contradicted" => Ok(Self::Contradicted),
            "promoted" => Ok(Self::Promoted),
            _ => Err(ParseError::new("proposition status", s)),
        }
    }
}

/// Grammatical role of a mention within its proposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionRole {
    Subject,
    Object,
    Other,
}

impl MentionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Object => "object",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for MentionRole {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "subject" => Ok(Self::Subject),
            "object" => Ok(Self::Object),
            "other" => Ok(Self::Other),
            _ => Err(ParseError::new("mention role", s)),
        }
    }
}

/// A reference to an entity inside a proposition's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    /// Surface text as it appears in the proposition.
    pub span: String,
    /// Entity category, e.g. `"User"` or `"Place"`.
    #[serde(rename = "type")]
    pub mention_type: String,
    /// Canonical entity id, `None` while unresolved.
    pub resolved_id: Option<String>,
    pub role: MentionRole,
}

impl EntityMention {
    pub fn new(span: impl Into<String>, mention_type: impl Into<String>, role: MentionRole) -> Self {
        Self {
            span: span.into(),
            mention_type: mention_type.into(),
            resolved_id: None,
            role,
        }
    }

    pub fn resolved_to(mut self, id: impl Into<String>) -> Self {
        self.resolved_id = Some(id.into());
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_id.is_some()
    }
}

/// A timestamped natural-language statement, matching the `propositions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposition {
    /// UUID v7; immutable once created.
    pub id: String,
    /// Tenant/scope key.
    pub context_id: String,
    pub text: String,
    #[serde(default)]
    pub mentions: Vec<EntityMention>,
    /// In `[0.0, 1.0]`.
    pub confidence: f64,
    /// Per-proposition decay rate.
    pub decay: f64,
    pub importance: f64,
    pub reasoning: Option<String>,
    /// Ordered source-chunk references this fact was derived from.
    #[serde(default)]
    pub grounding: Vec<String>,
    pub created: DateTime<Utc>,
    pub revised: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub status: PropositionStatus,
    /// Abstraction level; 0 for facts extracted directly from a source.
    pub level: u32,
    /// Times the fact was re-observed.
    pub reinforce_count: u32,
    pub uri: Option<String>,
    #[serde(default)]
    pub source_ids: Vec<String>,
    /// Populated only on write paths; never serialized.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Proposition {
    /// A new active proposition with a fresh id and all timestamps set to now.
    pub fn new(context_id: impl Into<String>, text: impl Into<String>, confidence: f64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            context_id: context_id.into(),
            text: text.into(),
            mentions: Vec::new(),
            confidence,
            decay: 0.0,
            importance: 0.5,
            reasoning: None,
            grounding: Vec::new(),
            created: now,
            revised: now,
            last_accessed: now,
            status: PropositionStatus::Active,
            level: 0,
            reinforce_count: 0,
            uri: None,
            source_ids: Vec::new(),
            embedding: None,
        }
    }

    pub fn with_mentions(mut self, mentions: Vec<EntityMention>) -> Self {
        self.mentions = mentions;
        self
    }

    pub fn with_grounding(mut self, grounding: Vec<String>) -> Self {
        self.grounding = grounding;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// True iff every mention carries a resolved id.
    pub fn is_fully_resolved(&self) -> bool {
        self.mentions.iter().all(EntityMention::is_resolved)
    }

    /// First mention playing the given role.
    pub fn mention_with_role(&self, role: MentionRole) -> Option<&EntityMention> {
        self.mentions.iter().find(|m| m.role == role)
    }

    /// Whole days between the last revision and `as_of`, never negative.
    pub fn days_since_revision(&self, as_of: DateTime<Utc>) -> i64 {
        let reference = self.revised.max(self.created);
        (as_of - reference).num_days().max(0)
    }

    /// Confidence decayed exponentially by the time since last revision.
    pub fn effective_confidence(&self, as_of: DateTime<Utc>, decay_k: f64) -> f64 {
        decayed_confidence(self.confidence, decay_k, self.days_since_revision(as_of))
    }
}

/// `confidence * exp(-decay_k * days / 365)`.
pub fn decayed_confidence(confidence: f64, decay_k: f64, days: i64) -> f64 {
    confidence * (-decay_k * days as f64 / 365.0).exp()
}

/// Identifies an entity by canonical id and declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievableIdentifier {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

impl RetrievableIdentifier {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
        }
    }
}

/// A proposition paired with its similarity to a query.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityResult {
    #[serde(rename = "match")]
    pub proposition: Proposition,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f64,
}

/// Query-time grouping of similar propositions around an anchor. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub anchor: Proposition,
    /// Ranked by descending score.
    pub similar: Vec<SimilarityResult>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        1 + self.similar.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Free-text similarity request.
#[derive(Debug, Clone)]
pub struct TextSimilaritySearchRequest {
    pub query: String,
    pub top_k: usize,
    pub similarity_threshold: f64,
}

impl TextSimilaritySearchRequest {
    pub fn new(query: impl Into<String>, top_k: usize, similarity_threshold: f64) -> Self {
        Self {
            query: query.into(),
            top_k,
            similarity_threshold,
        }
    }
}
