//! Two-path proposition lookups.
//!
//! A [`PropositionLookup`] pairs an indexed SQL query (the primary path) with
//! an in-memory predicate over the same data (the fallback path). [`run`]
//! tries the primary path and, if it fails, scans every proposition with the
//! predicate. Both paths are public so each can be tested on its own.

use anyhow::Result;
use rusqlite::{params, Connection};
use tracing::{error, warn};

use super::store::{find_all, load_by_ids};
use super::types::{Proposition, RetrievableIdentifier};

pub trait PropositionLookup {
    /// Short description for log lines.
    fn describe(&self) -> String;

    /// Ids of matching propositions, via an indexed query.
    fn primary_ids(&self, conn: &Connection) -> Result<Vec<String>>;

    /// The same predicate, evaluated against a loaded proposition.
    fn matches(&self, proposition: &Proposition) -> bool;
}

/// Primary path: run the indexed query and load the matches in result order.
pub fn primary(conn: &Connection, lookup: &dyn PropositionLookup) -> Result<Vec<Proposition>> {
    let ids = lookup.primary_ids(conn)?;
    load_by_ids(conn, &ids)
}

/// Fallback path: scan every proposition and keep the ones the predicate accepts.
pub fn fallback(conn: &Connection, lookup: &dyn PropositionLookup) -> Result<Vec<Proposition>> {
    Ok(find_all(conn)?
        .into_iter()
        .filter(|p| lookup.matches(p))
        .collect())
}

/// Primary path, degrading to the fallback scan and finally to an empty result.
pub fn run(conn: &Connection, lookup: &dyn PropositionLookup) -> Vec<Proposition> {
    match primary(conn, lookup) {
        Ok(found) => found,
        Err(e) => {
            warn!(lookup = %lookup.describe(), error = %e, "indexed lookup failed, falling back to full scan");
            fallback(conn, lookup).unwrap_or_else(|e| {
                error!(lookup = %lookup.describe(), error = %e, "fallback scan failed");
                Vec::new()
            })
        }
    }
}

/// Whether a mention of `mention_type` can refer to an entity declared as `identifier_type`.
///
/// Exact case-insensitive match, or a `User` identifier against any mention
/// type containing "user".
pub fn is_type_compatible(identifier_type: &str, mention_type: &str) -> bool {
    identifier_type.eq_ignore_ascii_case(mention_type)
        || (identifier_type.eq_ignore_ascii_case("user")
            && mention_type.to_ascii_lowercase().contains("user"))
}

// ── Entity ──────────────────────────────────────────────────────────────

/// Propositions with a resolved mention of one entity.
pub struct EntityLookup {
    identifier: RetrievableIdentifier,
}

impl EntityLookup {
    pub fn new(identifier: RetrievableIdentifier) -> Self {
        Self { identifier }
    }
}

impl PropositionLookup for EntityLookup {
    fn describe(&self) -> String {
        format!("entity {}:{}", self.identifier.entity_type, self.identifier.id)
    }

    fn primary_ids(&self, conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT p.id FROM propositions p \
             WHERE EXISTS ( \
               SELECT 1 FROM mentions m \
               WHERE m.proposition_id = p.id AND m.resolved_id = ?1 \
                 AND (lower(m.type) = lower(?2) \
                      OR (lower(?2) = 'user' AND instr(lower(m.type), 'user') > 0))) \
             ORDER BY p.created_at, p.id",
        )?;
        let ids = stmt
            .query_map(
                params![self.identifier.id, self.identifier.entity_type],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn matches(&self, proposition: &Proposition) -> bool {
        proposition.mentions.iter().any(|m| {
            m.resolved_id.as_deref() == Some(self.identifier.id.as_str())
                && is_type_compatible(&self.identifier.entity_type, &m.mention_type)
        })
    }
}

// ── Grounding ───────────────────────────────────────────────────────────

/// Propositions derived from one source chunk.
pub struct GroundingLookup {
    chunk_id: String,
}

impl GroundingLookup {
    pub fn new(chunk_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
        }
    }
}

impl PropositionLookup for GroundingLookup {
    fn describe(&self) -> String {
        format!("grounding {}", self.chunk_id)
    }

    fn primary_ids(&self, conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT p.id FROM propositions p \
             WHERE EXISTS (SELECT 1 FROM json_each(p.grounding) g WHERE g.value = ?1) \
             ORDER BY p.created_at, p.id",
        )?;
        let ids = stmt
            .query_map(params![self.chunk_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn matches(&self, proposition: &Proposition) -> bool {
        proposition.grounding.iter().any(|g| g == &self.chunk_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::proposition::test_support::test_store;
    use crate::proposition::types::{EntityMention, MentionRole};

    fn mention(span: &str, mention_type: &str, id: Option<&str>) -> EntityMention {
        let m = EntityMention::new(span, mention_type, MentionRole::Subject);
        match id {
            Some(id) => m.resolved_to(id),
            None => m,
        }
    }

    #[test]
    fn type_compatibility_rules() {
        assert!(is_type_compatible("Place", "place"));
        assert!(is_type_compatible("User", "ConversationalUser"));
        assert!(is_type_compatible("user", "USER_ACCOUNT"));
        assert!(!is_type_compatible("User", "Place"));
        // the loose rule only applies to User identifiers
        assert!(!is_type_compatible("Person", "PersonalUser"));
    }

    /// A lookup whose indexed query always fails.
    struct BrokenLookup(EntityLookup);

    impl PropositionLookup for BrokenLookup {
        fn describe(&self) -> String {
            "broken".into()
        }
        fn primary_ids(&self, conn: &Connection) -> Result<Vec<String>> {
            conn.prepare("SELECT id FROM no_such_table")?;
            Ok(vec![])
        }
        fn matches(&self, proposition: &Proposition) -> bool {
            self.0.matches(proposition)
        }
    }

    #[test]
    fn primary_and_fallback_agree_and_run_degrades() {
        let store = test_store();
        let ids = [
            ("Alice went hiking", mention("Alice", "ConversationalUser", Some("u1"))),
            ("Alice visited Paris", mention("Paris", "Place", Some("u1"))),
            ("Someone called", mention("someone", "User", None)),
        ]
        .into_iter()
        .map(|(text, m)| {
            let p = Proposition::new("ctx", text, 0.5).with_mentions(vec![m]);
            store.save(&p).unwrap();
            p.id
        })
        .collect::<Vec<_>>();

        let lookup = EntityLookup::new(RetrievableIdentifier::new("u1", "User"));
        let conn = db::lock(store.connection()).unwrap();

        let primary_ids: Vec<_> = primary(&conn, &lookup).unwrap().into_iter().map(|p| p.id).collect();
        let fallback_ids: Vec<_> = fallback(&conn, &lookup).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(primary_ids, vec![ids[0].clone()]);
        assert_eq!(primary_ids, fallback_ids);

        let degraded = run(&conn, &BrokenLookup(lookup));
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].id, ids[0]);
    }

    #[test]
    fn grounding_lookup_matches_exact_chunk() {
        let store = test_store();
        let a = Proposition::new("ctx", "from chunk a", 0.5).with_grounding(vec!["a".into(), "b".into()]);
        let b = Proposition::new("ctx", "from chunk ab", 0.5).with_grounding(vec!["ab".into()]);
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        let found = store.find_by_grounding("b");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);
        assert!(store.find_by_grounding("missing").is_empty());
    }
}
