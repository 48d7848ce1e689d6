//! Proposition Store: durable CRUD for propositions and their mentions.
//!
//! [`PropositionStore`] owns the shared connection and the embedding provider.
//! Writes run inside a transaction per call; the embedding is attached in a
//! separate statement afterwards so that an embedding failure never loses the
//! proposition itself. Vector-index provisioning happens once, in
//! [`PropositionStore::new`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use super::lookup::{self, EntityLookup, GroundingLookup};
use super::types::{EntityMention, Proposition, PropositionStatus, RetrievableIdentifier};
use crate::db::{self, migrations, schema, SharedConnection};
use crate::embedding::{embedding_to_bytes, EmbeddingProvider};

/// Column list shared by every proposition read; order matches [`row_to_proposition`].
pub(crate) const PROPOSITION_COLUMNS: &str = "p.id, p.context_id, p.text, p.confidence, p.decay, \
     p.importance, p.reasoning, p.grounding, p.level, p.reinforce_count, p.created_at, \
     p.revised_at, p.last_accessed, p.status, p.uri, p.source_ids";

pub struct PropositionStore {
    db: SharedConnection,
    embedding: Arc<dyn EmbeddingProvider>,
    dimensions: usize,
}

impl PropositionStore {
    /// Create the store and provision the vector index for `dimensions`.
    ///
    /// Provisioning failure is logged; the store stays usable and similarity
    /// search degrades until the index exists.
    pub fn new(
        db: SharedConnection,
        embedding: Arc<dyn EmbeddingProvider>,
        dimensions: usize,
    ) -> Self {
        let store = Self {
            db,
            embedding,
            dimensions,
        };
        store.provision();
        store
    }

    /// Create the index if missing and record its real width. An index that
    /// already exists keeps the width it was built with.
    fn provision(&self) {
        let result = db::lock(&self.db).and_then(|conn| {
            let existed = schema::vector_index_exists(&conn);
            schema::provision_vector_index(&conn, self.dimensions)?;
            let actual = if existed {
                schema::vector_index_dimensions(&conn)
            } else {
                Some(self.dimensions)
            };
            if let Some(actual) = actual {
                if migrations::get_embedding_dimensions(&conn)? != Some(actual) {
                    migrations::set_embedding_dimensions(&conn, actual)?;
                }
            }
            Ok(actual)
        });
        match result {
            Ok(Some(actual)) if actual != self.dimensions => warn!(
                index = schema::VECTOR_INDEX_TABLE,
                index_dimensions = actual,
                configured = self.dimensions,
                "vector index width differs from the embedding width; run `recollect re-embed`"
            ),
            Ok(actual) => info!(
                index = schema::VECTOR_INDEX_TABLE,
                dimensions = ?actual,
                "vector index provisioned"
            ),
            Err(e) => warn!(
                index = schema::VECTOR_INDEX_TABLE,
                error = %e,
                "failed to provision vector index, similarity search unavailable"
            ),
        }
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.db
    }

    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Width of the vector index actually present in the database.
    pub fn index_dimensions(&self) -> Result<Option<usize>> {
        let conn = db::lock(&self.db)?;
        Ok(schema::vector_index_dimensions(&conn))
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Upsert a proposition and its mentions, then attach a fresh text embedding.
    ///
    /// An id that already exists keeps its original `created` timestamp.
    /// Embedding failures are logged and do not fail the save.
    pub fn save(&self, proposition: &Proposition) -> Result<()> {
        validate(proposition)?;

        // computed outside the lock; inference can be slow
        let embedding = self.embedding.embed(&proposition.text);

        let mut conn = db::lock(&self.db)?;
        let tx = conn.transaction()?;
        upsert_proposition(&tx, proposition)?;
        replace_mentions(&tx, &proposition.id, &proposition.mentions)?;
        tx.commit()
            .with_context(|| format!("failed to save proposition {}", proposition.id))?;

        let attached = embedding.and_then(|v| attach_embedding(&conn, &proposition.id, &v, self.dimensions));
        if let Err(e) = attached {
            warn!(id = %proposition.id, error = %e, "failed to attach embedding to proposition");
        }

        debug!(id = %proposition.id, context_id = %proposition.context_id, "proposition saved");
        Ok(())
    }

    /// Save each proposition in turn, returning how many were written.
    pub fn save_all(&self, propositions: &[Proposition]) -> Result<usize> {
        for proposition in propositions {
            self.save(proposition)?;
        }
        Ok(propositions.len())
    }

    /// Delete one proposition, its mentions, and its vector. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = db::lock(&self.db)?;
        let tx = conn.transaction()?;
        if schema::vector_index_exists(&tx) {
            tx.execute(
                &format!("DELETE FROM {} WHERE id = ?1", schema::VECTOR_INDEX_TABLE),
                params![id],
            )?;
        }
        let deleted = tx.execute("DELETE FROM propositions WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Delete every proposition. Returns the number deleted.
    pub fn clear_all(&self) -> Result<usize> {
        let deleted = self.clear_where("1 = 1", Vec::new())?;
        info!(count = deleted, "cleared all propositions");
        Ok(deleted)
    }

    /// Delete every proposition in one context. Returns the number deleted.
    pub fn clear_by_context(&self, context_id: &str) -> Result<usize> {
        let deleted = self.clear_where(
            "context_id = ?1",
            vec![Value::Text(context_id.to_string())],
        )?;
        info!(context_id, count = deleted, "cleared propositions for context");
        Ok(deleted)
    }

    /// Delete every proposition whose context starts with `prefix`. Returns the number deleted.
    pub fn clear_by_context_prefix(&self, prefix: &str) -> Result<usize> {
        let deleted = self.clear_where(
            "substr(context_id, 1, length(?1)) = ?1",
            vec![Value::Text(prefix.to_string())],
        )?;
        info!(prefix, count = deleted, "cleared propositions for context prefix");
        Ok(deleted)
    }

    /// Count matching rows, then delete them along with their vectors.
    fn clear_where(&self, predicate: &str, params: Vec<Value>) -> Result<usize> {
        let mut conn = db::lock(&self.db)?;
        let tx = conn.transaction()?;

        let count: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM propositions WHERE {predicate}"),
            rusqlite::params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        if count == 0 {
            return Ok(0);
        }

        if schema::vector_index_exists(&tx) {
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE id IN (SELECT id FROM propositions WHERE {predicate})",
                    schema::VECTOR_INDEX_TABLE
                ),
                rusqlite::params_from_iter(params.iter()),
            )?;
        }
        tx.execute(
            &format!("DELETE FROM propositions WHERE {predicate}"),
            rusqlite::params_from_iter(params.iter()),
        )?;
        tx.commit()?;
        Ok(count as usize)
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn find_by_id(&self, id: &str) -> Result<Option<Proposition>> {
        let conn = db::lock(&self.db)?;
        Ok(load_by_ids(&conn, &[id.to_string()])?.into_iter().next())
    }

    /// All propositions, oldest first.
    pub fn find_all(&self) -> Result<Vec<Proposition>> {
        let conn = db::lock(&self.db)?;
        find_all(&conn)
    }

    pub fn find_by_status(&self, status: PropositionStatus) -> Result<Vec<Proposition>> {
        let conn = db::lock(&self.db)?;
        query_propositions(
            &conn,
            &format!(
                "SELECT {PROPOSITION_COLUMNS} FROM propositions p \
                 WHERE p.status = ?1 ORDER BY p.created_at, p.id"
            ),
            &[Value::Text(status.as_str().to_string())],
        )
    }

    pub fn find_by_min_level(&self, min_level: u32) -> Result<Vec<Proposition>> {
        let conn = db::lock(&self.db)?;
        query_propositions(
            &conn,
            &format!(
                "SELECT {PROPOSITION_COLUMNS} FROM propositions p \
                 WHERE p.level >= ?1 ORDER BY p.level DESC, p.created_at, p.id"
            ),
            &[Value::Integer(min_level as i64)],
        )
    }

    pub fn find_by_min_level_and_context(
        &self,
        min_level: u32,
        context_id: &str,
    ) -> Result<Vec<Proposition>> {
        let conn = db::lock(&self.db)?;
        query_propositions(
            &conn,
            &format!(
                "SELECT {PROPOSITION_COLUMNS} FROM propositions p \
                 WHERE p.level >= ?1 AND p.context_id = ?2 \
                 ORDER BY p.level DESC, p.created_at, p.id"
            ),
            &[
                Value::Integer(min_level as i64),
                Value::Text(context_id.to_string()),
            ],
        )
    }

    pub fn find_by_context_id_value(&self, context_id: &str) -> Result<Vec<Proposition>> {
        let conn = db::lock(&self.db)?;
        query_propositions(
            &conn,
            &format!(
                "SELECT {PROPOSITION_COLUMNS} FROM propositions p \
                 WHERE p.context_id = ?1 ORDER BY p.created_at, p.id"
            ),
            &[Value::Text(context_id.to_string())],
        )
    }

    /// Propositions mentioning the identified entity with a compatible type.
    ///
    /// Falls back to a full scan when the indexed lookup fails.
    pub fn find_by_entity(&self, identifier: &RetrievableIdentifier) -> Vec<Proposition> {
        match db::lock(&self.db) {
            Ok(conn) => lookup::run(&conn, &EntityLookup::new(identifier.clone())),
            Err(e) => {
                tracing::error!(error = %e, "find_by_entity failed");
                Vec::new()
            }
        }
    }

    /// Propositions whose grounding contains `chunk_id`.
    pub fn find_by_grounding(&self, chunk_id: &str) -> Vec<Proposition> {
        match db::lock(&self.db) {
            Ok(conn) => lookup::run(&conn, &GroundingLookup::new(chunk_id)),
            Err(e) => {
                tracing::error!(error = %e, "find_by_grounding failed");
                Vec::new()
            }
        }
    }

    pub fn count(&self) -> Result<u64> {
        let conn = db::lock(&self.db)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM propositions", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Stored embedding for a proposition, if one was attached.
    pub fn embedding_of(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let conn = db::lock(&self.db)?;
        load_embedding(&conn, id)
    }
}

// ── Write helpers ───────────────────────────────────────────────────────

fn validate(proposition: &Proposition) -> Result<()> {
    if proposition.revised < proposition.created {
        bail!(
            "proposition {} revised ({}) before created ({})",
            proposition.id,
            proposition.revised,
            proposition.created
        );
    }
    if !(0.0..=1.0).contains(&proposition.confidence) {
        bail!(
            "proposition {} confidence {} outside [0, 1]",
            proposition.id,
            proposition.confidence
        );
    }
    Ok(())
}

fn upsert_proposition(conn: &Connection, p: &Proposition) -> Result<()> {
    conn.execute(
        "INSERT INTO propositions (id, context_id, text, confidence, decay, importance, reasoning, \
         grounding, level, reinforce_count, created_at, revised_at, last_accessed, status, uri, source_ids) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
         ON CONFLICT(id) DO UPDATE SET \
           context_id = excluded.context_id, text = excluded.text, confidence = excluded.confidence, \
           decay = excluded.decay, importance = excluded.importance, reasoning = excluded.reasoning, \
           grounding = excluded.grounding, level = excluded.level, \
           reinforce_count = excluded.reinforce_count, revised_at = excluded.revised_at, \
           last_accessed = excluded.last_accessed, status = excluded.status, uri = excluded.uri, \
           source_ids = excluded.source_ids",
        params![
            p.id,
            p.context_id,
            p.text,
            p.confidence,
            p.decay,
            p.importance,
            p.reasoning,
            serde_json::to_string(&p.grounding)?,
            p.level,
            p.reinforce_count,
            p.created.timestamp_millis(),
            p.revised.timestamp_millis(),
            p.last_accessed.timestamp_millis(),
            p.status.as_str(),
            p.uri,
            serde_json::to_string(&p.source_ids)?,
        ],
    )?;
    Ok(())
}

fn replace_mentions(conn: &Connection, proposition_id: &str, mentions: &[EntityMention]) -> Result<()> {
    conn.execute(
        "DELETE FROM mentions WHERE proposition_id = ?1",
        params![proposition_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO mentions (proposition_id, position, span, type, resolved_id, role) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (position, mention) in mentions.iter().enumerate() {
        stmt.execute(params![
            proposition_id,
            position as i64,
            mention.span,
            mention.mention_type,
            mention.resolved_id,
            mention.role.as_str(),
        ])?;
    }
    Ok(())
}

/// Replace the vector for `id`. vec0 has no upsert, so delete then insert.
pub(crate) fn attach_embedding(
    conn: &Connection,
    id: &str,
    embedding: &[f32],
    dimensions: usize,
) -> Result<()> {
    if embedding.len() != dimensions {
        bail!(
            "embedding has {} dimensions, index expects {dimensions}",
            embedding.len()
        );
    }
    let table = schema::VECTOR_INDEX_TABLE;
    conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
    conn.execute(
        &format!("INSERT INTO {table} (id, embedding) VALUES (?1, ?2)"),
        params![id, embedding_to_bytes(embedding)],
    )?;
    Ok(())
}

// ── Read helpers ────────────────────────────────────────────────────────

pub(crate) fn find_all(conn: &Connection) -> Result<Vec<Proposition>> {
    query_propositions(
        conn,
        &format!("SELECT {PROPOSITION_COLUMNS} FROM propositions p ORDER BY p.created_at, p.id"),
        &[],
    )
}

/// Every proposition (or one context's) with mentions, oldest first.
pub fn export_propositions(conn: &Connection, context_id: Option<&str>) -> Result<Vec<Proposition>> {
    match context_id {
        Some(ctx) => query_propositions(
            conn,
            &format!(
                "SELECT {PROPOSITION_COLUMNS} FROM propositions p \
                 WHERE p.context_id = ?1 ORDER BY p.created_at, p.id"
            ),
            &[Value::Text(ctx.to_string())],
        ),
        None => find_all(conn),
    }
}

/// Run a query selecting [`PROPOSITION_COLUMNS`] and attach mentions.
pub(crate) fn query_propositions(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> Result<Vec<Proposition>> {
    let mut stmt = conn.prepare(sql)?;
    let mut propositions = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), row_to_proposition)?
        .collect::<Result<Vec<_>, _>>()?;
    attach_mentions(conn, &mut propositions)?;
    Ok(propositions)
}

/// Load propositions by id, preserving the order of `ids` and skipping unknown ids.
pub(crate) fn load_by_ids(conn: &Connection, ids: &[String]) -> Result<Vec<Proposition>> {
    let sql = format!("SELECT {PROPOSITION_COLUMNS} FROM propositions p WHERE p.id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut propositions = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(p) = stmt.query_row(params![id], row_to_proposition).optional()? {
            propositions.push(p);
        }
    }
    attach_mentions(conn, &mut propositions)?;
    Ok(propositions)
}

fn attach_mentions(conn: &Connection, propositions: &mut [Proposition]) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT span, type, resolved_id, role FROM mentions \
         WHERE proposition_id = ?1 ORDER BY position",
    )?;
    for proposition in propositions.iter_mut() {
        proposition.mentions = stmt
            .query_map(params![proposition.id], |row| {
                let role: String = row.get(3)?;
                Ok(EntityMention {
                    span: row.get(0)?,
                    mention_type: row.get(1)?,
                    resolved_id: row.get(2)?,
                    role: role
                        .parse()
                        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
    }
    Ok(())
}

fn load_embedding(conn: &Connection, id: &str) -> Result<Option<Vec<f32>>> {
    if !schema::vector_index_exists(conn) {
        return Ok(None);
    }
    let bytes: Option<Vec<u8>> = conn
        .query_row(
            &format!("SELECT embedding FROM {} WHERE id = ?1", schema::VECTOR_INDEX_TABLE),
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(bytes.map(|b| crate::embedding::bytes_to_embedding(&b)))
}

/// Every stored embedding keyed by proposition id, in a single scan.
pub(crate) fn load_embeddings(conn: &Connection) -> Result<HashMap<String, Vec<f32>>> {
    if !schema::vector_index_exists(conn) {
        return Ok(HashMap::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT id, embedding FROM {}",
        schema::VECTOR_INDEX_TABLE
    ))?;
    let rows = stmt
        .query_map([], |row| {
            let bytes: Vec<u8> = row.get(1)?;
            Ok((row.get::<_, String>(0)?, crate::embedding::bytes_to_embedding(&bytes)))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Map a row selected with [`PROPOSITION_COLUMNS`]. Mentions are attached separately.
pub(crate) fn row_to_proposition(row: &Row<'_>) -> rusqlite::Result<Proposition> {
    let grounding: String = row.get(7)?;
    let status: String = row.get(13)?;
    let source_ids: String = row.get(15)?;
    Ok(Proposition {
        id: row.get(0)?,
        context_id: row.get(1)?,
        text: row.get(2)?,
        mentions: Vec::new(),
        confidence: row.get(3)?,
        decay: row.get(4)?,
        importance: row.get(5)?,
        reasoning: row.get(6)?,
        grounding: serde_json::from_str(&grounding).unwrap_or_default(),
        level: row.get(8)?,
        reinforce_count: row.get(9)?,
        created: millis_to_datetime(row.get(10)?),
        revised: millis_to_datetime(row.get(11)?),
        last_accessed: millis_to_datetime(row.get(12)?),
        status: status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(13, Type::Text, Box::new(e)))?,
        uri: row.get(14)?,
        source_ids: serde_json::from_str(&source_ids).unwrap_or_default(),
        embedding: None,
    })
}
