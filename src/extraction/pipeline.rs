//! The extraction pipeline seam and its result type.
//!
//! Turning a text window into candidate propositions (normally a language
//! model call) happens behind [`PropositionPipeline`]. The orchestrator only
//! depends on the shape of [`ChunkPropositionResult`].

use std::collections::HashSet;

use anyhow::Result;
use serde::Serialize;

use super::context::SourceAnalysisContext;
use crate::graph::NamedEntity;
use crate::proposition::types::Proposition;

/// What extraction decided about one candidate proposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropositionOutcome {
    New,
    /// Merged into an existing proposition (revised text or confidence).
    Merged,
    /// Re-observation of an existing proposition.
    Reinforced,
    /// Identical to an existing proposition; nothing to persist.
    Duplicate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedProposition {
    pub proposition: Proposition,
    pub outcome: PropositionOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    pub new_count: usize,
    pub merged_count: usize,
    pub reinforced_count: usize,
    pub duplicate_count: usize,
}

impl ExtractionStats {
    pub fn updated_count(&self) -> usize {
        self.merged_count + self.reinforced_count
    }
}

/// Result of extracting one or more windows of a source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkPropositionResult {
    pub source_id: String,
    pub propositions: Vec<ExtractedProposition>,
    pub new_entities: Vec<NamedEntity>,
    pub updated_entities: Vec<NamedEntity>,
}

impl ChunkPropositionResult {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Default::default()
        }
    }

    pub fn with(mut self, proposition: Proposition, outcome: PropositionOutcome) -> Self {
        self.propositions.push(ExtractedProposition { proposition, outcome });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.propositions.is_empty()
    }

    /// Append another window's result.
    pub fn merge(&mut self, other: ChunkPropositionResult) {
        self.propositions.extend(other.propositions);
        self.new_entities.extend(other.new_entities);
        self.updated_entities.extend(other.updated_entities);
    }

    pub fn stats(&self) -> ExtractionStats {
        self.propositions
            .iter()
            .fold(ExtractionStats::default(), |mut s, p| {
                match p.outcome {
                    PropositionOutcome::New => s.new_count += 1,
                    PropositionOutcome::Merged => s.merged_count += 1,
                    PropositionOutcome::Reinforced => s.reinforced_count += 1,
                    PropositionOutcome::Duplicate => s.duplicate_count += 1,
                }
                s
            })
    }

    /// Every proposition that is not a duplicate.
    pub fn propositions_to_persist(&self) -> Vec<Proposition> {
        self.propositions
            .iter()
            .filter(|p| p.outcome != PropositionOutcome::Duplicate)
            .map(|p| p.proposition.clone())
            .collect()
    }

    /// New entities referenced by a resolved mention of a proposition to persist.
    pub fn referenced_new_entities(&self) -> Vec<&NamedEntity> {
        let referenced: HashSet<&str> = self
            .propositions
            .iter()
            .filter(|p| p.outcome != PropositionOutcome::Duplicate)
            .flat_map(|p| p.proposition.mentions.iter())
            .filter_map(|m| m.resolved_id.as_deref())
            .collect();
        self.new_entities
            .iter()
            .filter(|e| referenced.contains(e.id.as_str()))
            .collect()
    }

    /// One-line summary, optionally followed by one line per proposition.
    pub fn info_string(&self, verbose: bool) -> String {
        let stats = self.stats();
        let mut out = format!(
            "{}: {} propositions ({} new, {} merged, {} reinforced, {} duplicate), {} new entities",
            self.source_id,
            self.propositions.len(),
            stats.new_count,
            stats.merged_count,
            stats.reinforced_count,
            stats.duplicate_count,
            self.new_entities.len()
        );
        if verbose {
            for p in &self.propositions {
                out.push_str(&format!(
                    "\n  [{:?}] {:.2} '{}'",
                    p.outcome, p.proposition.confidence, p.proposition.text
                ));
            }
        }
        out
    }
}

pub trait PropositionPipeline: Send + Sync {
    /// Extract candidate propositions from one formatted window.
    ///
    /// May be slow and is always called from a blocking context.
    fn extract_from_window(
        &self,
        text: &str,
        source_id: &str,
        context: &SourceAnalysisContext,
    ) -> Result<ChunkPropositionResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposition::types::{EntityMention, MentionRole};

    #[test]
    fn only_referenced_new_entities_are_kept() {
        let referenced = Proposition::new("ctx", "Alice likes Paris", 0.9).with_mentions(vec![
            EntityMention::new("Paris", "Place", MentionRole::Object).resolved_to("paris"),
        ]);
        let duplicate = Proposition::new("ctx", "Alice likes Rome", 0.9).with_mentions(vec![
            EntityMention::new("Rome", "Place", MentionRole::Object).resolved_to("rome"),
        ]);
        let mut result = ChunkPropositionResult::new("src")
            .with(referenced, PropositionOutcome::New)
            .with(duplicate, PropositionOutcome::Duplicate);
        result.new_entities = vec![
            NamedEntity::new("paris", "Paris", "Place"),
            NamedEntity::new("rome", "Rome", "Place"),
            NamedEntity::new("orphan", "Nowhere", "Place"),
        ];

        let kept: Vec<_> = result.referenced_new_entities().into_iter().map(|e| e.id.as_str()).collect();
        assert_eq!(kept, vec!["paris"]);
        assert_eq!(result.propositions_to_persist().len(), 1);
    }

    #[test]
    fn stats_and_merge() {
        let mut a = ChunkPropositionResult::new("src")
            .with(Proposition::new("ctx", "one", 0.5), PropositionOutcome::New)
            .with(Proposition::new("ctx", "two", 0.5), PropositionOutcome::Reinforced);
        let b = ChunkPropositionResult::new("src")
            .with(Proposition::new("ctx", "three", 0.5), PropositionOutcome::Merged);
        a.merge(b);

        let stats = a.stats();
        assert_eq!(stats.new_count, 1);
        assert_eq!(stats.updated_count(), 2);
        assert!(a.info_string(false).starts_with("src: 3 propositions (1 new"));
        assert_eq!(a.info_string(true).lines().count(), 4);
    }
}
