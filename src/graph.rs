//! Graph projection of propositions into entity relationships.
//!
//! A [`GraphProjector`] turns persisted propositions into candidate
//! (subject, predicate, object) relationships; a [`RelationshipPersister`]
//! writes the accepted ones. Entities created during extraction are stored by
//! an [`EntityRepository`].

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{self, SharedConnection};
use crate::extraction::context::{Relations, Schema};
use crate::proposition::types::{MentionRole, Proposition};

// ── Entities ────────────────────────────────────────────────────────────

/// An entity created or updated by extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntity {
    pub id: String,
    pub name: String,
    pub labels: Vec<String>,
    pub description: Option<String>,
    pub context_id: Option<String>,
}

impl NamedEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            labels: vec![label.into()],
            description: None,
            context_id: None,
        }
    }
}

pub trait EntityRepository: Send + Sync {
    /// Insert or update by id.
    fn save(&self, entity: &NamedEntity) -> Result<()>;

    fn find_by_id(&self, id: &str) -> Result<Option<NamedEntity>>;
}

pub struct SqliteEntityRepository {
    db: SharedConnection,
}

impl SqliteEntityRepository {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }
}

impl EntityRepository for SqliteEntityRepository {
    fn save(&self, entity: &NamedEntity) -> Result<()> {
        let conn = db::lock(&self.db)?;
        let now = Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO entities (id, context_id, name, labels, description, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT(id) DO UPDATE SET context_id = excluded.context_id, name = excluded.name, \
               labels = excluded.labels, description = excluded.description, updated_at = excluded.updated_at",
            params![
                entity.id,
                entity.context_id,
                entity.name,
                serde_json::to_string(&entity.labels)?,
                entity.description,
                now,
            ],
        )?;
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<NamedEntity>> {
        let conn = db::lock(&self.db)?;
        let entity = conn
            .query_row(
                "SELECT id, name, labels, description, context_id FROM entities WHERE id = ?1",
                params![id],
                |row| {
                    let labels: String = row.get(2)?;
                    Ok(NamedEntity {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        labels: serde_json::from_str(&labels).unwrap_or_default(),
                        description: row.get(3)?,
                        context_id: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(entity)
    }
}

// ── Projection ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedRelationship {
    pub subject_id: String,
    pub predicate: String,
    pub object_id: String,
    pub proposition_id: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedProposition {
    pub proposition_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectionResults {
    pub projected: Vec<ProjectedRelationship>,
    pub skipped: Vec<SkippedProposition>,
}

pub trait GraphProjector: Send + Sync {
    fn project(&self, propositions: &[Proposition], schema: &Schema) -> ProjectionResults;
}

/// Projects fully resolved subject/object propositions whose text uses a
/// predicate from the relation vocabulary.
pub struct RelationBasedProjector {
    relations: Relations,
}

impl RelationBasedProjector {
    pub fn new(relations: Relations) -> Self {
        Self { relations }
    }

    fn project_one(&self, p: &Proposition, schema: &Schema) -> Result<ProjectedRelationship, String> {
        if !p.is_fully_resolved() {
            return Err("unresolved mentions".into());
        }
        let (Some(subject), Some(object)) = (
            p.mention_with_role(MentionRole::Subject),
            p.mention_with_role(MentionRole::Object),
        ) else {
            return Err("no subject and object mentions".into());
        };
        if !schema.accepts(&subject.mention_type) || !schema.accepts(&object.mention_type) {
            return Err(format!(
                "types {} -> {} not in schema",
                subject.mention_type, object.mention_type
            ));
        }

        let text = p.text.to_lowercase();
        let predicate = self
            .relations
            .predicates_for(&subject.mention_type)
            .into_iter()
            .find(|pred| text.contains(&pred.replace('_', " ")) || text.contains(*pred))
            .ok_or_else(|| format!("no known predicate for {}", subject.mention_type))?;

        match (&subject.resolved_id, &object.resolved_id) {
            (Some(subject_id), Some(object_id)) => Ok(ProjectedRelationship {
                subject_id: subject_id.clone(),
                predicate: predicate.to_string(),
                object_id: object_id.clone(),
                proposition_id: p.id.clone(),
                confidence: p.confidence,
            }),
            _ => Err("unresolved mentions".into()),
        }
    }
}

impl GraphProjector for RelationBasedProjector {
    fn project(&self, propositions: &[Proposition], schema: &Schema) -> ProjectionResults {
        let mut results = ProjectionResults::default();
        for p in propositions {
            match self.project_one(p, schema) {
                Ok(rel) => results.projected.push(rel),
                Err(reason) => results.skipped.push(SkippedProposition {
                    proposition_id: p.id.clone(),
                    reason,
                }),
            }
        }
        results
    }
}

// ── Persistence ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceResult {
    pub persisted_count: usize,
    /// Relationships that already existed.
    pub duplicate_count: usize,
}

pub trait RelationshipPersister: Send + Sync {
    fn persist(&self, projection: &ProjectionResults) -> Result<PersistenceResult>;
}

/// Writes relationships to `entity_relations`, deduplicated on the full triple.
pub struct SqliteRelationshipPersister {
    db: SharedConnection,
}

impl SqliteRelationshipPersister {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }
}

impl RelationshipPersister for SqliteRelationshipPersister {
    fn persist(&self, projection: &ProjectionResults) -> Result<PersistenceResult> {
        let mut conn = db::lock(&self.db)?;
        let tx = conn.transaction()?;
        let mut result = PersistenceResult::default();
        let mut seen = HashSet::new();

        for rel in &projection.projected {
            if !seen.insert((&rel.subject_id, &rel.predicate, &rel.object_id)) {
                result.duplicate_count += 1;
                continue;
            }
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM entity_relations \
                     WHERE subject_id = ?1 AND predicate = ?2 AND object_id = ?3",
                    params![rel.subject_id, rel.predicate, rel.object_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                result.duplicate_count += 1;
                continue;
            }

            tx.execute(
                "INSERT INTO entity_relations \
                 (id, subject_id, predicate, object_id, proposition_id, confidence, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    uuid::Uuid::now_v7().to_string(),
                    rel.subject_id,
                    rel.predicate,
                    rel.object_id,
                    rel.proposition_id,
                    rel.confidence,
                    Utc::now().timestamp_millis(),
                ],
            )?;
            result.persisted_count += 1;
        }

        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposition::types::EntityMention;

    fn shared_db() -> SharedConnection {
        db::shared(db::open_memory_database().unwrap())
    }

    fn liking(text: &str, object_id: Option<&str>) -> Proposition {
        let object = EntityMention::new("hiking", "Activity", MentionRole::Object);
        let object = match object_id {
            Some(id) => object.resolved_to(id),
            None => object,
        };
        Proposition::new("ctx", text, 0.8).with_mentions(vec![
            EntityMention::new("Alice", "User", MentionRole::Subject).resolved_to("u1"),
            object,
        ])
    }

    #[test]
    fn projector_accepts_vocabulary_predicates_only() {
        let projector = RelationBasedProjector::new(Relations::for_user(&["likes", "is_interested_in"]));
        let props = vec![
            liking("Alice likes hiking", Some("hiking")),
            liking("Alice is interested in hiking", Some("hiking")),
            liking("Alice hates hiking", Some("hiking")),
            liking("Alice likes hiking", None),
        ];

        let results = projector.project(&props, &Schema::default());
        assert_eq!(results.projected.len(), 2);
        assert_eq!(results.projected[0].predicate, "likes");
        assert_eq!(results.projected[1].predicate, "is_interested_in");
        assert_eq!(results.skipped.len(), 2);
        assert_eq!(results.skipped[1].reason, "unresolved mentions");
    }

    #[test]
    fn persister_deduplicates_triples() {
        let persister = SqliteRelationshipPersister::new(shared_db());
        let rel = ProjectedRelationship {
            subject_id: "u1".into(),
            predicate: "likes".into(),
            object_id: "hiking".into(),
            proposition_id: "p1".into(),
            confidence: 0.8,
        };
        let projection = ProjectionResults {
            projected: vec![rel.clone(), rel],
            skipped: vec![],
        };

        let first = persister.persist(&projection).unwrap();
        assert_eq!(first, PersistenceResult { persisted_count: 1, duplicate_count: 1 });
        let second = persister.persist(&projection).unwrap();
        assert_eq!(second.persisted_count, 0);
        assert_eq!(second.duplicate_count, 2);
    }

    #[test]
    fn entity_repository_upserts() {
        let repo = SqliteEntityRepository::new(shared_db());
        let mut entity = NamedEntity::new("e1", "Hiking", "Activity");
        repo.save(&entity).unwrap();

        entity.description = Some("walking in the hills".into());
        entity.labels.push("Hobby".into());
        repo.save(&entity).unwrap();

        assert_eq!(repo.find_by_id("e1").unwrap(), Some(entity));
        assert!(repo.find_by_id("missing").unwrap().is_none());
    }
}
