//! Bounded event channel in front of the orchestrator.
//!
//! Publishing tracks the request first and only then sends it, so
//! [`IncrementalExtraction::is_idle`] sees an event as soon as it is published.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::orchestrator::{IncrementalExtraction, SourceAnalysisRequest, TrackedRequest};
use super::pipeline::PropositionPipeline;
use crate::config::ExtractionConfig;
use crate::proposition::PropositionStore;

#[derive(Clone)]
pub struct EventPublisher {
    extraction: Arc<IncrementalExtraction>,
    tx: mpsc::Sender<TrackedRequest>,
}

impl EventPublisher {
    /// Track `request` and wait for channel capacity.
    pub async fn publish(&self, request: SourceAnalysisRequest) -> Result<()> {
        let tracked = self.extraction.track(request);
        self.tx
            .send(tracked)
            .await
            .map_err(|_| anyhow!("extraction listener has stopped"))
    }

    /// Track `request` and send it without waiting. Fails when the channel is
    /// full or closed; the event is then released untracked.
    pub fn try_publish(&self, request: SourceAnalysisRequest) -> Result<()> {
        let tracked = self.extraction.track(request);
        self.tx.try_send(tracked).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => anyhow!("extraction queue is full"),
            mpsc::error::TrySendError::Closed(_) => anyhow!("extraction listener has stopped"),
        })
    }
}

pub struct ExtractionListener;

/// A configured orchestrator and the listener feeding it.
pub struct RunningExtraction {
    pub extraction: Arc<IncrementalExtraction>,
    pub publisher: EventPublisher,
    pub handle: JoinHandle<()>,
}

impl ExtractionListener {
    /// Build the orchestrator from `config` and start a listener sized by it.
    /// Returns `None` when extraction is disabled.
    pub fn start(
        store: Arc<PropositionStore>,
        pipeline: Arc<dyn PropositionPipeline>,
        config: &ExtractionConfig,
    ) -> Result<Option<RunningExtraction>> {
        if !config.enabled {
            info!("extraction disabled");
            return Ok(None);
        }
        let extraction = Arc::new(IncrementalExtraction::from_config(store, pipeline, config)?);
        let timeout = (config.extraction_timeout_secs > 0).then(|| Duration::from_secs(config.extraction_timeout_secs));
        let (publisher, handle) = Self::spawn(extraction.clone(), config.channel_capacity, timeout);
        info!(
            window_size = config.window_size,
            overlap_size = config.overlap_size,
            trigger_interval = config.trigger_interval,
            "extraction listener started"
        );
        Ok(Some(RunningExtraction {
            extraction,
            publisher,
            handle,
        }))
    }

    /// Start the listener. It runs until every publisher is dropped and all
    /// dispatched events have finished.
    ///
    /// `timeout` only bounds how long the listener waits before warning; the
    /// blocking extraction itself keeps running.
    pub fn spawn(
        extraction: Arc<IncrementalExtraction>,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> (EventPublisher, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<TrackedRequest>(capacity.max(1));
        let publisher = EventPublisher {
            extraction: extraction.clone(),
            tx,
        };

        let handle = tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            while let Some(tracked) = rx.recv().await {
                let source_id = tracked.request().source.id().to_string();
                let extraction = extraction.clone();
                let work = tokio::task::spawn_blocking(move || extraction.submit(tracked));
                tasks.spawn(async move {
                    let outcome = match timeout {
                        Some(limit) => match tokio::time::timeout(limit, work).await {
                            Ok(joined) => joined,
                            Err(_) => {
                                warn!(source_id = %source_id, "extraction still running after {:?}", limit);
                                return;
                            }
                        },
                        None => work.await,
                    };
                    if let Err(e) = outcome {
                        warn!(source_id = %source_id, "extraction task failed: {e}");
                    }
                });
                while tasks.try_join_next().is_some() {}
            }
            while tasks.join_next().await.is_some() {}
            debug!("extraction listener stopped");
        });

        (publisher, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::context::{SourceAnalysisContext, User};
    use crate::extraction::orchestrator::ExtractionComponents;
    use crate::extraction::pipeline::{ChunkPropositionResult, PropositionOutcome, PropositionPipeline};
    use crate::extraction::source::{Conversation, ConversationSource};
    use crate::extraction::window::WindowConfig;
    use crate::proposition::test_support::test_store;
    use crate::proposition::Proposition;

    struct OnePerWindow;

    impl PropositionPipeline for OnePerWindow {
        fn extract_from_window(
            &self,
            text: &str,
            source_id: &str,
            context: &SourceAnalysisContext,
        ) -> Result<ChunkPropositionResult> {
            Ok(ChunkPropositionResult::new(source_id).with(
                Proposition::new(context.context_id.clone(), format!("saw {} chars", text.len()), 0.8),
                PropositionOutcome::New,
            ))
        }
    }

    fn extraction() -> Arc<IncrementalExtraction> {
        let components = ExtractionComponents::sqlite(Arc::new(test_store()), Arc::new(OnePerWindow), &["likes"]);
        Arc::new(IncrementalExtraction::new(components, WindowConfig::new(4, 1, 0).unwrap()))
    }

    fn request(id: &str) -> SourceAnalysisRequest {
        let mut conversation = Conversation::new(id);
        conversation
            .exchange(format!("I like tea ({id})"), "Noted")
            .exchange("And coffee", "Noted too");
        SourceAnalysisRequest::new(User::new("u1", "Alice", "alice"), Arc::new(ConversationSource::new(conversation)))
    }

    #[tokio::test]
    async fn published_events_are_tracked_then_processed() {
        let extraction = extraction();
        let (publisher, handle) = ExtractionListener::spawn(extraction.clone(), 8, Some(Duration::from_secs(5)));

        publisher.publish(request("a")).await.unwrap();
        publisher.try_publish(request("b")).unwrap();

        assert!(extraction.wait_until_idle(Duration::from_secs(5)).await);
        assert_eq!(extraction.store().count().unwrap(), 2);

        drop(publisher);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn start_honours_enabled_flag_and_window_policy() {
        let store = Arc::new(test_store());
        let disabled = ExtractionConfig {
            enabled: false,
            ..ExtractionConfig::default()
        };
        assert!(ExtractionListener::start(store.clone(), Arc::new(OnePerWindow), &disabled)
            .unwrap()
            .is_none());

        let bad_overlap = ExtractionConfig {
            window_size: 2,
            overlap_size: 2,
            ..ExtractionConfig::default()
        };
        assert!(ExtractionListener::start(store.clone(), Arc::new(OnePerWindow), &bad_overlap).is_err());

        let config = ExtractionConfig {
            window_size: 4,
            overlap_size: 1,
            trigger_interval: 0,
            ..ExtractionConfig::default()
        };
        let running = ExtractionListener::start(store, Arc::new(OnePerWindow), &config)
            .unwrap()
            .unwrap();
        running.publisher.publish(request("c")).await.unwrap();
        assert!(running.extraction.wait_until_idle(Duration::from_secs(5)).await);
        assert_eq!(running.extraction.store().count().unwrap(), 1);

        drop(running.publisher);
        running.handle.await.unwrap();
    }
}
