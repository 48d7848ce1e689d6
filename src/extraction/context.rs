//! Analysis context handed to the extraction pipeline.
//!
//! Bundles the tenant context id, the entity resolver scoped to the current
//! user, the entity schema, and the relation vocabulary.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::proposition::lookup::is_type_compatible;

/// Entity type of the person the system is talking to.
pub const USER_ENTITY_TYPE: &str = "User";

/// Context name used when a user has not chosen one.
pub const DEFAULT_CONTEXT_NAME: &str = "personal";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub username: String,
    pub current_context_name: String,
}

impl User {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            username: username.into(),
            current_context_name: DEFAULT_CONTEXT_NAME.to_string(),
        }
    }

    pub fn in_context(mut self, context_name: impl Into<String>) -> Self {
        self.current_context_name = context_name.into();
        self
    }

    /// Context id propositions about this user are stored under: `{id}_{context}`.
    pub fn effective_context(&self) -> String {
        format!("{}_{}", self.id, self.current_context_name)
    }
}

/// An entity the resolver should recognise without a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownEntity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    /// Other surface forms that refer to this entity.
    pub aliases: Vec<String>,
}

impl KnownEntity {
    pub fn current_user(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.display_name.clone(),
            entity_type: USER_ENTITY_TYPE.to_string(),
            aliases: vec![user.username.clone(), "I".into(), "me".into(), "user".into()],
        }
    }

    fn is_named(&self, span: &str) -> bool {
        let span = span.trim();
        self.name.eq_ignore_ascii_case(span) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(span))
    }
}

/// Maps a mention span to a canonical entity id within a context.
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, span: &str, entity_type: &str, context_id: &str) -> Option<String>;
}

/// Resolves nothing; every mention stays unresolved.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnresolvedEntityResolver;

impl EntityResolver for UnresolvedEntityResolver {
    fn resolve(&self, _span: &str, _entity_type: &str, _context_id: &str) -> Option<String> {
        None
    }
}

/// Checks a fixed list of known entities before delegating.
pub struct KnownEntityResolver {
    known: Vec<KnownEntity>,
    delegate: Arc<dyn EntityResolver>,
}

impl KnownEntityResolver {
    pub fn new(known: Vec<KnownEntity>, delegate: Arc<dyn EntityResolver>) -> Self {
        Self { known, delegate }
    }
}

impl EntityResolver for KnownEntityResolver {
    fn resolve(&self, span: &str, entity_type: &str, context_id: &str) -> Option<String> {
        self.known
            .iter()
            .find(|k| is_type_compatible(&k.entity_type, entity_type) && k.is_named(span))
            .map(|k| k.id.clone())
            .or_else(|| self.delegate.resolve(span, entity_type, context_id))
    }
}

/// Entity types extraction may produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub entity_types: Vec<String>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            entity_types: [USER_ENTITY_TYPE, "Person", "Place", "Organization", "Activity", "Thing"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Schema {
    /// Whether `entity_type` is declared. An empty schema accepts everything.
    pub fn accepts(&self, entity_type: &str) -> bool {
        self.entity_types.is_empty()
            || self
                .entity_types
                .iter()
                .any(|t| is_type_compatible(t, entity_type))
    }
}

/// An allowed predicate for a subject type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub subject_type: String,
    pub predicate: String,
}

/// The relation vocabulary: which predicates each subject type may use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relations {
    relations: Vec<Relation>,
}

impl Relations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, subject_type: impl Into<String>, predicate: impl Into<String>) -> Self {
        self.relations.push(Relation {
            subject_type: subject_type.into(),
            predicate: predicate.into(),
        });
        self
    }

    /// Vocabulary with `predicates` available to the `User` subject type.
    pub fn for_user<S: AsRef<str>>(predicates: &[S]) -> Self {
        predicates
            .iter()
            .fold(Self::new(), |r, p| r.with(USER_ENTITY_TYPE, p.as_ref()))
    }

    /// Predicates a subject of `subject_type` may use.
    pub fn predicates_for(&self, subject_type: &str) -> Vec<&str> {
        self.relations
            .iter()
            .filter(|r| is_type_compatible(&r.subject_type, subject_type))
            .map(|r| r.predicate.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// Everything the pipeline needs to analyze one window for one user.
#[derive(Clone)]
pub struct SourceAnalysisContext {
    pub context_id: String,
    pub resolver: Arc<dyn EntityResolver>,
    pub schema: Arc<Schema>,
    pub relations: Arc<Relations>,
    pub known_entities: Vec<KnownEntity>,
    pub user: Option<User>,
}

impl SourceAnalysisContext {
    /// Context for `user`: their effective context and a resolver that knows them.
    pub fn for_user(
        user: &User,
        resolver: Arc<dyn EntityResolver>,
        schema: Arc<Schema>,
        relations: Arc<Relations>,
    ) -> Self {
        let me = KnownEntity::current_user(user);
        Self {
            context_id: user.effective_context(),
            resolver: Arc::new(KnownEntityResolver::new(vec![me.clone()], resolver)),
            schema,
            relations,
            known_entities: vec![me],
            user: Some(user.clone()),
        }
    }

    pub fn resolve(&self, span: &str, entity_type: &str) -> Option<String> {
        self.resolver.resolve(span, entity_type, &self.context_id)
    }
}

impl std::fmt::Debug for SourceAnalysisContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAnalysisContext")
            .field("context_id", &self.context_id)
            .field("relations", &self.relations.len())
            .field("known_entities", &self.known_entities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> User {
        User::new("u-alice", "Alice", "alice")
    }

    #[test]
    fn effective_context_combines_id_and_context_name() {
        assert_eq!(alice().effective_context(), "u-alice_personal");
        assert_eq!(alice().in_context("work").effective_context(), "u-alice_work");
    }

    #[test]
    fn known_user_is_resolved_before_delegate() {
        let ctx = SourceAnalysisContext::for_user(
            &alice(),
            Arc::new(UnresolvedEntityResolver),
            Arc::new(Schema::default()),
            Arc::new(Relations::new()),
        );
        assert_eq!(ctx.resolve("Alice", "User").as_deref(), Some("u-alice"));
        assert_eq!(ctx.resolve("me", "ConversationalUser").as_deref(), Some("u-alice"));
        assert_eq!(ctx.resolve("Alice", "Place"), None);
        assert_eq!(ctx.resolve("Bob", "User"), None);
    }

    #[test]
    fn relations_filter_by_subject_type() {
        let relations = Relations::for_user(&["likes", "works_on"]).with("Person", "knows");
        assert_eq!(relations.predicates_for("User"), vec!["likes", "works_on"]);
        assert_eq!(relations.predicates_for("person"), vec!["knows"]);
        assert_eq!(relations.len(), 3);
    }

    #[test]
    fn schema_accepts_declared_types() {
        let schema = Schema::default();
        assert!(schema.accepts("place"));
        assert!(!schema.accepts("Spaceship"));
        assert!(Schema { entity_types: vec![] }.accepts("Spaceship"));
    }
}
