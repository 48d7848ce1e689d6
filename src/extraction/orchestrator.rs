//! Incremental extraction orchestrator.
//!
//! Events are tracked synchronously (the in-flight counter goes up before any
//! hand-off), queued, and drained by whichever caller wins the single-flight
//! flag. Extraction is serialized across the whole instance, not per source.

use std::collections::VecDeque;
use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::context::{EntityResolver, Relations, Schema, SourceAnalysisContext, UnresolvedEntityResolver, User};
use super::pipeline::{ChunkPropositionResult, PropositionPipeline};
use super::source::{IncrementalSource, MessageFormatter, SourceFormatter};
use super::window::{IncrementalAnalyzer, WindowConfig};
use crate::config::ExtractionConfig;
use crate::graph::{
    EntityRepository, GraphProjector, RelationBasedProjector, RelationshipPersister, SqliteEntityRepository,
    SqliteRelationshipPersister,
};
use crate::history::{ChunkHistoryStore, ProcessedChunkRecord, SqliteChunkHistoryStore};
use crate::proposition::PropositionStore;

/// A source changed and should be analyzed for `user`.
#[derive(Clone)]
pub struct SourceAnalysisRequest {
    pub user: User,
    pub source: Arc<dyn IncrementalSource>,
}

impl SourceAnalysisRequest {
    pub fn new(user: User, source: Arc<dyn IncrementalSource>) -> Self {
        Self { user, source }
    }
}

// ── In-flight tracking ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    count: Arc<AtomicUsize>,
}

impl InFlightTracker {
    pub fn track(&self) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            count: self.count.clone(),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A request that has been counted as in flight.
pub struct TrackedRequest {
    request: SourceAnalysisRequest,
    _guard: InFlightGuard,
}

impl TrackedRequest {
    pub fn request(&self) -> &SourceAnalysisRequest {
        &self.request
    }
}

/// Clears the draining flag on every exit path.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── Components ──────────────────────────────────────────────────────────

/// Collaborators the orchestrator drives.
pub struct ExtractionComponents {
    pub store: Arc<PropositionStore>,
    pub history: Arc<dyn ChunkHistoryStore>,
    pub pipeline: Arc<dyn PropositionPipeline>,
    pub resolver: Arc<dyn EntityResolver>,
    pub projector: Arc<dyn GraphProjector>,
    pub persister: Arc<dyn RelationshipPersister>,
    pub entities: Arc<dyn EntityRepository>,
    pub formatter: Arc<dyn SourceFormatter>,
    pub schema: Arc<Schema>,
    pub relations: Arc<Relations>,
}

impl ExtractionComponents {
    /// Everything backed by the store's own database, with the default schema
    /// and a `User` relation vocabulary built from `predicates`.
    pub fn sqlite<S: AsRef<str>>(
        store: Arc<PropositionStore>,
        pipeline: Arc<dyn PropositionPipeline>,
        predicates: &[S],
    ) -> Self {
        let db = store.connection().clone();
        let relations = Relations::for_user(predicates);
        Self {
            history: Arc::new(SqliteChunkHistoryStore::new(db.clone())),
            pipeline,
            resolver: Arc::new(UnresolvedEntityResolver),
            projector: Arc::new(RelationBasedProjector::new(relations.clone())),
            persister: Arc::new(SqliteRelationshipPersister::new(db.clone())),
            entities: Arc::new(SqliteEntityRepository::new(db)),
            formatter: Arc::new(MessageFormatter),
            schema: Arc::new(Schema::default()),
            relations: Arc::new(relations),
            store,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn EntityResolver>) -> Self {
        self.resolver = resolver;
        self
    }
}

// ── Orchestrator ────────────────────────────────────────────────────────

pub struct IncrementalExtraction {
    components: ExtractionComponents,
    analyzer: IncrementalAnalyzer,
    config: WindowConfig,
    pending: Mutex<VecDeque<TrackedRequest>>,
    draining: AtomicBool,
    tracker: InFlightTracker,
}

impl IncrementalExtraction {
    pub fn new(components: ExtractionComponents, config: WindowConfig) -> Self {
        let analyzer = IncrementalAnalyzer::new(
            components.pipeline.clone(),
            components.history.clone(),
            components.formatter.clone(),
            config,
        );
        Self {
            components,
            analyzer,
            config,
            pending: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            tracker: InFlightTracker::default(),
        }
    }

    /// SQLite-backed orchestrator with the window policy and relation
    /// vocabulary from `config`.
    pub fn from_config(
        store: Arc<PropositionStore>,
        pipeline: Arc<dyn PropositionPipeline>,
        config: &ExtractionConfig,
    ) -> Result<Self> {
        let window = WindowConfig::from_config(config)?;
        let components = ExtractionComponents::sqlite(store, pipeline, &config.predicates);
        Ok(Self::new(components, window))
    }

    pub fn store(&self) -> &Arc<PropositionStore> {
        &self.components.store
    }

    /// Count `request` as in flight. Must happen before any asynchronous hand-off.
    pub fn track(&self, request: SourceAnalysisRequest) -> TrackedRequest {
        TrackedRequest {
            request,
            _guard: self.tracker.track(),
        }
    }

    /// Queue a tracked request and drain the queue unless another caller is.
    pub fn submit(&self, tracked: TrackedRequest) {
        match self.pending.lock() {
            Ok(mut pending) => pending.push_back(tracked),
            Err(_) => {
                warn!("pending queue poisoned, dropping extraction event");
                return;
            }
        }
        self.drain();
    }

    /// Track, queue and (if no drain is running) process `request`.
    pub fn extract_propositions(&self, request: SourceAnalysisRequest) {
        self.submit(self.track(request));
    }

    fn pop(&self) -> Option<TrackedRequest> {
        self.pending.lock().ok()?.pop_front()
    }

    fn queued(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn drain(&self) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!("extraction in progress, {} event(s) queued", self.queued());
                return;
            }
            {
                let _drain = DrainGuard(&self.draining);
                while let Some(tracked) = self.pop() {
                    self.process_event(tracked);
                }
            }
            // an event pushed between the last pop and the flag release
            if self.queued() == 0 {
                return;
            }
        }
    }

    fn process_event(&self, tracked: TrackedRequest) {
        let source_id = tracked.request.source.id().to_string();
        match catch_unwind(AssertUnwindSafe(|| self.process(&tracked.request))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(source_id = %source_id, "Failed to extract propositions: {e:#}"),
            Err(_) => warn!(source_id = %source_id, "Extraction panicked"),
        }
    }

    fn process(&self, request: &SourceAnalysisRequest) -> Result<()> {
        let source = request.source.as_ref();
        if source.len() < self.config.overlap_size {
            info!(
                "source {} has {} items, need at least {}",
                source.id(),
                source.len(),
                self.config.overlap_size
            );
            return Ok(());
        }

        let context = self.build_context(&request.user);
        let Some(analysis) = self.analyzer.analyze(source, &context)? else {
            info!(source_id = source.id(), "analysis skipped");
            return Ok(());
        };

        if analysis.result.is_empty() {
            info!(source_id = source.id(), "no propositions extracted");
            return self.record_windows(&analysis.records);
        }

        info!("{}", analysis.result.info_string(false));
        self.persist_and_project(&analysis.result, &context)?;
        self.record_windows(&analysis.records)?;
        self.log_all_propositions(&context.context_id);
        Ok(())
    }

    fn build_context(&self, user: &User) -> SourceAnalysisContext {
        SourceAnalysisContext::for_user(
            user,
            self.components.resolver.clone(),
            self.components.schema.clone(),
            self.components.relations.clone(),
        )
    }

    fn record_windows(&self, records: &[ProcessedChunkRecord]) -> Result<()> {
        for record in records {
            self.components.history.record_processed(record)?;
        }
        Ok(())
    }

    /// Store entities and propositions from `result`, then project relationships.
    /// Returns the number of propositions saved.
    fn persist_and_project(&self, result: &ChunkPropositionResult, context: &SourceAnalysisContext) -> Result<usize> {
        for entity in &result.new_entities {
            info!(id = %entity.id, labels = ?entity.labels, "New entity: {}", entity.name);
        }
        for entity in &result.updated_entities {
            info!(id = %entity.id, labels = ?entity.labels, "Updated entity: {}", entity.name);
        }

        let referenced = result.referenced_new_entities();
        let to_persist = result.propositions_to_persist();
        if to_persist.is_empty() && referenced.is_empty() && result.updated_entities.is_empty() {
            info!("No new data to persist");
            return Ok(0);
        }

        let store = &self.components.store;
        let before = store.count()?;
        let saved = store.save_all(&to_persist).context("persisting propositions")?;

        // entities only land once the propositions that reference them have
        for entity in &referenced {
            let mut entity = (*entity).clone();
            entity.context_id.get_or_insert_with(|| context.context_id.clone());
            self.components.entities.save(&entity)?;
        }
        for entity in &result.updated_entities {
            self.components.entities.save(entity)?;
        }
        let after = store.count()?;
        let stats = result.stats();
        info!(
            before,
            after,
            "Persisted {} new and {} updated propositions, {} of {} new entities",
            stats.new_count,
            stats.updated_count(),
            referenced.len(),
            result.new_entities.len()
        );

        let projection = self.components.projector.project(&to_persist, &self.components.schema);
        for skipped in &projection.skipped {
            debug!(proposition_id = %skipped.proposition_id, reason = %skipped.reason, "proposition not projected");
        }
        let persisted = self.components.persister.persist(&projection)?;
        info!(
            duplicates = persisted.duplicate_count,
            "Projected {} relationship(s) from {} proposition(s)",
            persisted.persisted_count,
            to_persist.len()
        );
        Ok(saved)
    }

    fn log_all_propositions(&self, context_id: &str) {
        let mut all = match self.components.store.find_by_context_id_value(context_id) {
            Ok(all) => all,
            Err(e) => {
                warn!(context_id, "could not list propositions: {e:#}");
                return;
            }
        };
        all.sort_by(|a, b| a.text.cmp(&b.text));
        info!("All propositions in context {} ({} total):", context_id, all.len());
        for p in &all {
            info!("  [{}] confidence={:.2} '{}'", p.status, p.confidence, p.text);
        }
    }

    /// Extract from a plain-text document in one pipeline call, bypassing
    /// windows and bookmarks. Returns the number of propositions saved.
    pub fn remember_file(&self, mut reader: impl Read, filename: &str, user: &User) -> Result<usize> {
        let _in_flight = self.tracker.track();

        let mut raw = String::new();
        reader
            .read_to_string(&mut raw)
            .with_context(|| format!("reading {filename}"))?;
        let text = paragraphs(&raw).join("\n\n");
        if text.is_empty() {
            info!("No text extracted from file: {filename}");
            return Ok(0);
        }

        let context = self.build_context(user);
        let source_id = format!("remember:{filename}");
        let mut result = self
            .components
            .pipeline
            .extract_from_window(&text, &source_id, &context)
            .with_context(|| format!("extracting from {filename}"))?;
        if result.is_empty() {
            info!("No propositions extracted from file: {filename}");
            return Ok(0);
        }
        for extracted in &mut result.propositions {
            let p = &mut extracted.proposition;
            if !p.source_ids.contains(&source_id) {
                p.source_ids.push(source_id.clone());
            }
        }

        info!("{}", result.info_string(true));
        let saved = self.persist_and_project(&result, &context)?;
        self.log_all_propositions(&context.context_id);
        info!("Remembered file: {filename}");
        Ok(saved)
    }

    /// No event queued, being processed, or waiting to be tracked out.
    pub fn is_idle(&self) -> bool {
        self.tracker.count() == 0 && self.queued() == 0 && !self.draining.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.count()
    }

    /// Poll until idle or `timeout` passes. Returns whether it went idle.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_idle() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

/// Non-empty paragraphs separated by blank lines, each trimmed.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::extraction::pipeline::PropositionOutcome;
    use crate::extraction::source::{Conversation, ConversationSource};
    use crate::graph::NamedEntity;
    use crate::proposition::test_support::test_store;
    use crate::proposition::types::{EntityMention, MentionRole, Proposition};

    /// Emits "Alice likes hiking" for every window and records the texts.
    #[derive(Default)]
    struct HikingPipeline {
        calls: StdMutex<Vec<String>>,
        fail: bool,
        out_of_range: bool,
    }

    impl PropositionPipeline for HikingPipeline {
        fn extract_from_window(
            &self,
            text: &str,
            source_id: &str,
            context: &SourceAnalysisContext,
        ) -> Result<ChunkPropositionResult> {
            self.calls.lock().unwrap().push(text.to_string());
            if self.fail {
                anyhow::bail!("model unavailable");
            }
            let user_id = context.resolve("Alice", "User");
            let mut subject = EntityMention::new("Alice", "User", MentionRole::Subject);
            subject.resolved_id = user_id;
            let confidence = if self.out_of_range { 1.5 } else { 0.9 };
            let p = Proposition::new(context.context_id.clone(), "Alice likes hiking", confidence).with_mentions(vec![
                subject,
                EntityMention::new("hiking", "Activity", MentionRole::Object).resolved_to("hiking"),
            ]);
            let mut result = ChunkPropositionResult::new(source_id).with(p, PropositionOutcome::New);
            result.new_entities = vec![
                NamedEntity::new("hiking", "Hiking", "Activity"),
                NamedEntity::new("orphan", "Nothing", "Thing"),
            ];
            Ok(result)
        }
    }

    fn alice() -> User {
        User::new("u1", "Alice", "alice")
    }

    fn orchestrator(pipeline: Arc<HikingPipeline>) -> IncrementalExtraction {
        let store = Arc::new(test_store());
        let components = ExtractionComponents::sqlite(store, pipeline, &["likes"]);
        IncrementalExtraction::new(components, WindowConfig::new(10, 2, 6).unwrap())
    }

    fn conversation(exchanges: usize) -> Arc<dyn IncrementalSource> {
        let mut conversation = Conversation::new("conv-1");
        for i in 0..exchanges {
            conversation.exchange(format!("I went hiking on day {i}"), "Sounds fun");
        }
        Arc::new(ConversationSource::new(conversation))
    }

    fn count_rows(extraction: &IncrementalExtraction, table: &str) -> i64 {
        let conn = crate::db::lock(extraction.store().connection()).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn extraction_persists_projects_and_goes_idle() {
        let extraction = orchestrator(Arc::new(HikingPipeline::default()));
        assert!(extraction.is_idle());

        extraction.extract_propositions(SourceAnalysisRequest::new(alice(), conversation(2)));

        assert!(extraction.is_idle());
        let props = extraction.store().find_by_context_id_value("u1_personal").unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].source_ids, vec!["conv-1".to_string()]);
        assert_eq!(count_rows(&extraction, "entities"), 1);
        assert_eq!(count_rows(&extraction, "entity_relations"), 1);
        assert_eq!(count_rows(&extraction, "processed_chunks"), 1);
    }

    #[test]
    fn too_short_source_is_skipped() {
        let pipeline = Arc::new(HikingPipeline::default());
        let extraction = orchestrator(pipeline.clone());
        let mut conversation = Conversation::new("tiny");
        conversation.push(crate::extraction::source::Message::user("hi"));

        extraction.extract_propositions(SourceAnalysisRequest::new(alice(), Arc::new(ConversationSource::new(conversation))));

        assert!(pipeline.calls.lock().unwrap().is_empty());
        assert!(extraction.is_idle());
    }

    #[test]
    fn pipeline_failure_keeps_counter_accurate_and_window_unrecorded() {
        let pipeline = Arc::new(HikingPipeline {
            fail: true,
            ..Default::default()
        });
        let extraction = orchestrator(pipeline.clone());

        extraction.extract_propositions(SourceAnalysisRequest::new(alice(), conversation(2)));
        extraction.extract_propositions(SourceAnalysisRequest::new(alice(), conversation(2)));

        assert_eq!(extraction.in_flight(), 0);
        assert!(extraction.is_idle());
        assert_eq!(pipeline.calls.lock().unwrap().len(), 2);
        assert_eq!(count_rows(&extraction, "processed_chunks"), 0);
    }

    #[test]
    fn queued_event_waits_for_running_drain() {
        let extraction = orchestrator(Arc::new(HikingPipeline::default()));
        extraction.draining.store(true, Ordering::Release);

        extraction.extract_propositions(SourceAnalysisRequest::new(alice(), conversation(2)));
        assert_eq!(extraction.in_flight(), 1);
        assert!(!extraction.is_idle());

        extraction.draining.store(false, Ordering::Release);
        extraction.drain();
        assert!(extraction.is_idle());
        assert_eq!(extraction.store().count().unwrap(), 1);
    }

    #[test]
    fn remember_file_extracts_once_with_file_source_id() {
        let pipeline = Arc::new(HikingPipeline::default());
        let extraction = orchestrator(pipeline.clone());
        let doc = "Alice likes hiking.\n\n\n  \nShe goes every weekend.\n";

        let saved = extraction.remember_file(doc.as_bytes(), "notes.txt", &alice()).unwrap();

        assert_eq!(saved, 1);
        let calls = pipeline.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), ["Alice likes hiking.\n\nShe goes every weekend."]);
        let props = extraction.store().find_by_context_id_value("u1_personal").unwrap();
        assert_eq!(props[0].source_ids, vec!["remember:notes.txt".to_string()]);
        assert_eq!(count_rows(&extraction, "processed_chunks"), 0);
        assert!(extraction.is_idle());
    }

    #[test]
    fn rejected_propositions_leave_no_entities_behind() {
        let pipeline = Arc::new(HikingPipeline {
            out_of_range: true,
            ..Default::default()
        });
        let extraction = orchestrator(pipeline);

        let err = extraction.remember_file("Alice likes hiking.".as_bytes(), "notes.txt", &alice());

        assert!(err.is_err());
        assert_eq!(count_rows(&extraction, "propositions"), 0);
        assert_eq!(count_rows(&extraction, "entities"), 0);
        assert!(extraction.is_idle());
    }

    #[test]
    fn empty_file_is_not_sent_to_pipeline() {
        let pipeline = Arc::new(HikingPipeline::default());
        let extraction = orchestrator(pipeline.clone());
        assert_eq!(extraction.remember_file("\n \n".as_bytes(), "blank.txt", &alice()).unwrap(), 0);
        assert!(pipeline.calls.lock().unwrap().is_empty());
    }
}
