//! Research engine entry point.
//!
//! Validates configuration, builds the per-run traversal context, drives the
//! [`TreeExplorer`] from the root, and finalizes the merged result with the
//! [`ContextAggregator`].

use super::aggregator::ContextAggregator;
use super::explorer::{TraversalContext, TreeExplorer};
use super::extractor::LearningExtractor;
use super::planner::QueryPlanner;
use super::progress::ProgressObserver;
use super::retriever::ContentRetriever;
use super::types::{AggregatedResult, ResearchProgress};
use crate::config::ResearchConfig;
use crate::error::{ConfigError, ResearchError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

/// Everything a finished (or cancelled) traversal produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub run_id: Uuid,
    pub topic: String,
    /// Finalized result: deduplicated learnings, sources, visited URLs,
    /// and the word-budgeted `context_text`.
    pub result: AggregatedResult,
    /// Last progress snapshot.
    pub progress: ResearchProgress,
    /// Whether cancellation cut the traversal short. The result then holds
    /// whatever was gathered before it.
    pub cancelled: bool,
    /// Most retrieval/extraction units that held a gate slot at once.
    #[serde(default)]
    pub peak_in_flight: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ResearchOutcome {
    fn path_for(base_dir: &Path, run_id: &Uuid) -> PathBuf {
        base_dir.join("research").join("runs").join(format!("{run_id}.json"))
    }

    /// Persist the outcome as `<base_dir>/research/runs/<run_id>.json`.
    pub fn save(&self, base_dir: &Path) -> std::result::Result<PathBuf, std::io::Error> {
        let path = Self::path_for(base_dir, &self.run_id);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        // Write-then-rename so readers never see a partial file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data.as_bytes())?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Load a previously saved outcome.
    pub fn load(base_dir: &Path, run_id: &Uuid) -> std::result::Result<Self, std::io::Error> {
        let data = std::fs::read_to_string(Self::path_for(base_dir, run_id))?;
        serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Consumer of the finalized context, typically a report generator.
#[async_trait]
pub trait ReportWriter: Send + Sync {
    async fn write_report(&self, topic: &str, result: &AggregatedResult) -> Result<String>;
}

/// Runs deep research traversals.
pub struct DeepResearcher {
    explorer: TreeExplorer,
    aggregator: ContextAggregator,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl DeepResearcher {
    /// Build an engine. Fails if the configuration cannot drive a traversal.
    pub fn new(
        config: ResearchConfig,
        planner: Arc<dyn QueryPlanner>,
        retriever: Arc<dyn ContentRetriever>,
        extractor: Arc<dyn LearningExtractor>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let aggregator = ContextAggregator::new(config.context_word_budget);
        Ok(Self {
            explorer: TreeExplorer::new(planner, retriever, extractor, config),
            aggregator,
            observer: None,
        })
    }

    /// Register the observer that receives every progress snapshot.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        self.explorer.config()
    }

    /// Research `topic` to completion.
    pub async fn run(&self, topic: &str) -> Result<ResearchOutcome> {
        self.run_with_cancellation(topic, CancellationToken::new())
            .await
    }

    /// Research `topic` until done or until `cancel` fires.
    ///
    /// On cancellation, units already running finish their retrieval and
    /// extraction, nothing new starts, and the partial result is returned.
    pub async fn run_with_cancellation(
        &self,
        topic: &str,
        cancel: CancellationToken,
    ) -> Result<ResearchOutcome> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ConfigError::invalid("topic", "must not be empty").into());
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let config = self.explorer.config();
        let ctx = TraversalContext::new(config, self.observer.clone(), cancel);

        let span = info_span!("deep_research", %run_id, topic);
        let merged = async {
            info!(
                breadth = config.breadth,
                depth = config.depth,
                concurrency = config.concurrency,
                estimated_queries = config.estimated_total_queries(),
                "Research started"
            );
            self.explorer.explore(topic, &ctx).await
        }
        .instrument(span.clone())
        .await;

        let result = self.aggregator.finalize(merged);
        let cancelled = ctx.cancel.is_cancelled();
        let progress = ctx.progress.snapshot();
        let peak_in_flight = ctx.gate.peak_in_flight();

        span.in_scope(|| {
            info!(
                completed = result.stats.completed_queries,
                failed = result.stats.failed_queries,
                skipped = result.stats.skipped_queries,
                learnings = result.learnings.len(),
                sources = result.sources.len(),
                max_depth = result.stats.max_depth_reached,
                peak_in_flight,
                cancelled,
                "Research finished"
            );
        });

        Ok(ResearchOutcome {
            run_id,
            topic: topic.to_string(),
            result,
            progress,
            cancelled,
            peak_in_flight,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Research `topic` and hand the finalized result to `writer`.
    pub async fn run_with_writer(
        &self,
        topic: &str,
        writer: &dyn ReportWriter,
    ) -> Result<(ResearchOutcome, String)> {
        let outcome = self.run(topic).await?;
        let report = writer
            .write_report(&outcome.topic, &outcome.result)
            .await
            .map_err(|e| match e {
                ResearchError::Writer { .. } => e,
                other => ResearchError::Writer {
                    message: other.to_string(),
                },
            })?;
        Ok((outcome, report))
    }
}
