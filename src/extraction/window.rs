//! Windowing policy and the bookmark-aware incremental analyzer.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::context::SourceAnalysisContext;
use super::pipeline::{ChunkPropositionResult, PropositionPipeline};
use super::source::{IncrementalSource, SourceFormatter};
use crate::config::ExtractionConfig;
use crate::history::{ChunkHistoryStore, ProcessedChunkRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowConfigError {
    #[error("window_size must be greater than zero")]
    ZeroWindow,
    #[error("overlap_size ({overlap}) must be smaller than window_size ({window})")]
    OverlapTooLarge { window: usize, overlap: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub window_size: usize,
    pub overlap_size: usize,
    pub trigger_interval: usize,
}

impl WindowConfig {
    pub fn new(
        window_size: usize,
        overlap_size: usize,
        trigger_interval: usize,
    ) -> Result<Self, WindowConfigError> {
        if window_size == 0 {
            return Err(WindowConfigError::ZeroWindow);
        }
        if overlap_size >= window_size {
            return Err(WindowConfigError::OverlapTooLarge {
                window: window_size,
                overlap: overlap_size,
            });
        }
        Ok(Self {
            window_size,
            overlap_size,
            trigger_interval,
        })
    }

    pub fn from_config(config: &ExtractionConfig) -> Result<Self, WindowConfigError> {
        Self::new(config.window_size, config.overlap_size, config.trigger_interval)
    }

    /// Window ranges covering `cursor..len`, each reaching `overlap_size`
    /// items back before the position it continues from.
    pub fn windows(&self, cursor: usize, len: usize) -> Vec<std::ops::Range<usize>> {
        let mut windows = Vec::new();
        let mut pos = cursor;
        while pos < len {
            let start = pos.saturating_sub(self.overlap_size);
            let end = (start + self.window_size).min(len);
            windows.push(start..end);
            pos = end;
        }
        windows
    }
}

/// Propositions from the analyzed windows, and the window records to write
/// once those propositions are safely stored.
#[derive(Debug, Clone)]
pub struct WindowAnalysis {
    pub result: ChunkPropositionResult,
    pub records: Vec<ProcessedChunkRecord>,
}

pub struct IncrementalAnalyzer {
    pipeline: Arc<dyn PropositionPipeline>,
    history: Arc<dyn ChunkHistoryStore>,
    formatter: Arc<dyn SourceFormatter>,
    config: WindowConfig,
}

impl IncrementalAnalyzer {
    pub fn new(
        pipeline: Arc<dyn PropositionPipeline>,
        history: Arc<dyn ChunkHistoryStore>,
        formatter: Arc<dyn SourceFormatter>,
        config: WindowConfig,
    ) -> Self {
        Self {
            pipeline,
            history,
            formatter,
            config,
        }
    }

    pub fn config(&self) -> WindowConfig {
        self.config
    }

    /// Analyze whatever part of `source` has not been processed yet.
    ///
    /// Returns `None` when nothing was analyzed: no new items, too few new
    /// items since the last bookmark, or every window already processed.
    pub fn analyze(
        &self,
        source: &dyn IncrementalSource,
        context: &SourceAnalysisContext,
    ) -> Result<Option<WindowAnalysis>> {
        let source_id = source.id();
        let len = source.len();
        let bookmark = self.history.get_last_bookmark(source_id)?;
        let cursor = bookmark.as_ref().map_or(0, |b| b.end_index.min(len));

        let new_items = len - cursor;
        if new_items == 0 {
            debug!(source_id, "no new items since last analysis");
            return Ok(None);
        }
        if bookmark.is_some() && new_items < self.config.trigger_interval {
            debug!(
                source_id,
                new_items,
                trigger_interval = self.config.trigger_interval,
                "not enough new items to re-analyze"
            );
            return Ok(None);
        }

        let mut result = ChunkPropositionResult::new(source_id);
        let mut records = Vec::new();
        for range in self.config.windows(cursor, len) {
            let items = source.items(range.clone());
            let text = self.formatter.format(&items);
            let record = ProcessedChunkRecord::new(source_id, &text, range.start, range.end);
            if self.history.is_processed(&record.content_hash)? {
                info!(source_id, start = range.start, end = range.end, "window already processed, skipping");
                continue;
            }

            let mut window = self
                .pipeline
                .extract_from_window(&text, source_id, context)
                .with_context(|| format!("extracting {source_id}[{}..{}]", range.start, range.end))?;
            for extracted in &mut window.propositions {
                let p = &mut extracted.proposition;
                if !p.grounding.contains(&record.content_hash) {
                    p.grounding.push(record.content_hash.clone());
                }
                if !p.source_ids.iter().any(|s| s == source_id) {
                    p.source_ids.push(source_id.to_string());
                }
            }
            result.merge(window);
            records.push(record);
        }

        if records.is_empty() {
            info!(source_id, "every window already processed, analysis skipped");
            return Ok(None);
        }
        Ok(Some(WindowAnalysis { result, records }))
    }
}
