//! Recursive breadth x depth exploration.
//!
//! Each node plans up to `breadth` queries and runs one branch per query
//! concurrently on the calling task. A branch acquires a gate slot only for
//! its own retrieval and extraction (the unit), then releases it before
//! recursing, so a parent never holds a slot its descendants are waiting for.
//!
//! ```text
//! PLANNING -> RETRIEVING -> EXTRACTING -> EXPANDING -> DONE
//!                 \______________\____________\______> FAILED (branch-local)
//! ```
//!
//! Failures stay inside their branch: a failed or panicking unit contributes
//! an empty result and its siblings keep running.

use super::extractor::LearningExtractor;
use super::gate::ConcurrencyGate;
use super::planner::{QueryPlanner, select_queries};
use super::progress::{ProgressObserver, ProgressTracker};
use super::retriever::{ContentRetriever, admit_new_sources};
use super::types::{AggregatedResult, Learning, ResearchNode, SourceRecord};
use crate::config::ResearchConfig;
use crate::error::{ExtractionError, RetrievalError, panic_message};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Per-traversal shared state: the gate, the progress tracker, and the
/// cancellation signal. Built once at the root and passed down by reference.
pub struct TraversalContext {
    pub gate: ConcurrencyGate,
    pub progress: ProgressTracker,
    pub cancel: CancellationToken,
}

impl TraversalContext {
    pub fn new(
        config: &ResearchConfig,
        observer: Option<Arc<dyn ProgressObserver>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gate: ConcurrencyGate::new(config.concurrency),
            progress: ProgressTracker::new(config, observer),
            cancel,
        }
    }
}

/// Output of one executed unit.
struct UnitOutput {
    sources: Vec<SourceRecord>,
    learnings: Vec<Learning>,
    follow_ups: Vec<String>,
}

enum UnitFailure {
    Retrieval(RetrievalError),
    Extraction(ExtractionError),
}

enum UnitOutcome {
    /// Cancelled before a gate slot was granted. Not counted as completed.
    Skipped,
    Done(UnitOutput),
    Failed(UnitFailure),
}

/// Drives planner, retriever, and extractor over the exploration tree.
pub struct TreeExplorer {
    planner: Arc<dyn QueryPlanner>,
    retriever: Arc<dyn ContentRetriever>,
    extractor: Arc<dyn LearningExtractor>,
    config: ResearchConfig,
}

impl TreeExplorer {
    pub fn new(
        planner: Arc<dyn QueryPlanner>,
        retriever: Arc<dyn ContentRetriever>,
        extractor: Arc<dyn LearningExtractor>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            planner,
            retriever,
            extractor,
            config,
        }
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Explore `topic` from the root. The returned result is merged but not
    /// yet finalized; see [`super::aggregator::ContextAggregator`].
    pub async fn explore(&self, topic: &str, ctx: &TraversalContext) -> AggregatedResult {
        let root = ResearchNode::root(topic, self.config.depth, self.config.breadth);
        self.explore_node(root, ctx).await
    }

    fn explore_node<'a>(
        &'a self,
        node: ResearchNode,
        ctx: &'a TraversalContext,
    ) -> BoxFuture<'a, AggregatedResult> {
        async move {
            let level = node.level(self.config.depth);
            if node.depth_remaining == 0 || ctx.cancel.is_cancelled() {
                return AggregatedResult::seeded(node.visited_urls);
            }

            ctx.progress.enter_level(level, node.breadth);
            let planning = AssertUnwindSafe(self.planner.generate_queries(
                &node.topic,
                node.breadth,
                &node.parent_learnings,
                &node.visited_queries,
            ))
            .catch_unwind()
            .await;
            let planned = match planning {
                Ok(planned) => planned,
                Err(panic) => {
                    error!(
                        level,
                        topic = %first_line(&node.topic),
                        panic = %panic_message(&*panic),
                        "Planner panicked; node contributes nothing"
                    );
                    let mut result = AggregatedResult::seeded(node.visited_urls);
                    result.stats.panicked_branches = 1;
                    return result;
                }
            };
            // Planners are trusted to honour the contract, but the tree shape
            // depends on it, so enforce it here too.
            let queries = select_queries(planned, node.breadth, &node.visited_queries);

            if queries.is_empty() {
                debug!(level, topic = %first_line(&node.topic), "No queries planned");
                return AggregatedResult::seeded(node.visited_urls);
            }
            debug!(level, count = queries.len(), "Fanning out");

            let mut visited_queries = node.visited_queries.clone();
            visited_queries.extend(queries.iter().cloned());

            let branches = queries
                .iter()
                .map(|query| self.run_branch(query, &node, &visited_queries, ctx));
            let results = join_all(branches).await;

            let mut merged = AggregatedResult::seeded(node.visited_urls.clone());
            for result in results {
                merged.merge(result);
            }
            merged
        }
        .boxed()
    }

    /// One branch: gated unit, progress update, optional recursion, merge.
    async fn run_branch(
        &self,
        query: &str,
        node: &ResearchNode,
        visited_queries: &BTreeSet<String>,
        ctx: &TraversalContext,
    ) -> AggregatedResult {
        let level = node.level(self.config.depth);
        let mut visited_urls = node.visited_urls.clone();

        let outcome = AssertUnwindSafe(self.execute_unit(query, &mut visited_urls, ctx))
            .catch_unwind()
            .await;

        let mut result = AggregatedResult::seeded(node.visited_urls.clone());
        let output = match outcome {
            Ok(UnitOutcome::Skipped) => {
                debug!(query, level, "Unit skipped after cancellation");
                result.stats.skipped_queries = 1;
                return result;
            }
            Ok(UnitOutcome::Failed(failure)) => {
                ctx.progress.record_completion(query, level, node.breadth);
                result.stats.completed_queries = 1;
                result.stats.failed_queries = 1;
                result.stats.max_depth_reached = level;
                match failure {
                    UnitFailure::Retrieval(e) => {
                        result.stats.retrieval_failures = 1;
                        warn!(query, level, error = %e, "Retrieval failed; branch contributes nothing");
                    }
                    UnitFailure::Extraction(e) => {
                        result.stats.extraction_failures = 1;
                        warn!(query, level, error = %e, "Extraction failed; branch contributes nothing");
                    }
                }
                return result;
            }
            Err(panic) => {
                ctx.progress.record_completion(query, level, node.breadth);
                result.stats.completed_queries = 1;
                result.stats.failed_queries = 1;
                result.stats.panicked_branches = 1;
                result.stats.max_depth_reached = level;
                error!(query, level, panic = %panic_message(&*panic), "Branch panicked; branch contributes nothing");
                return result;
            }
            Ok(UnitOutcome::Done(output)) => output,
        };

        ctx.progress.record_completion(query, level, node.breadth);

        let learnings: Vec<Arc<Learning>> = output.learnings.into_iter().map(Arc::new).collect();
        result.learnings = learnings.clone();
        result.sources = output.sources.into_iter().map(Arc::new).collect();
        result.visited_urls = visited_urls.clone();
        result.stats.completed_queries = 1;
        result.stats.max_depth_reached = level;

        let expand = node.depth_remaining > 1
            && !output.follow_ups.is_empty()
            && !ctx.cancel.is_cancelled();
        if expand {
            let next_breadth = self.config.breadth_policy.next(node.breadth);
            let child = node.child(
                query,
                &output.follow_ups,
                &learnings,
                visited_urls,
                visited_queries.clone(),
                next_breadth,
            );
            let child_result = self.explore_node(child, ctx).await;
            result.merge(child_result);
        }
        result
    }

    /// Retrieval and extraction for one query, holding a gate slot throughout.
    async fn execute_unit(
        &self,
        query: &str,
        visited_urls: &mut BTreeSet<String>,
        ctx: &TraversalContext,
    ) -> UnitOutcome {
        let Some(_permit) = ctx.gate.acquire_or_cancel(&ctx.cancel).await else {
            return UnitOutcome::Skipped;
        };
        let timeout = self.config.unit_timeout();

        let retrieved = match bounded(
            timeout,
            self.retriever.retrieve(query, self.config.documents_per_query),
        )
        .await
        {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => return UnitOutcome::Failed(UnitFailure::Retrieval(e)),
            Err(timeout_secs) => {
                return UnitOutcome::Failed(UnitFailure::Retrieval(RetrievalError::Timeout {
                    timeout_secs,
                }));
            }
        };

        let fresh = admit_new_sources(retrieved, visited_urls, self.config.max_excerpt_chars);
        if fresh.is_empty() {
            debug!(query, "No new documents; nothing to extract");
            return UnitOutcome::Done(UnitOutput {
                sources: Vec::new(),
                learnings: Vec::new(),
                follow_ups: Vec::new(),
            });
        }

        let extraction = match bounded(
            timeout,
            self.extractor
                .extract(query, &fresh, self.config.max_learnings_per_node),
        )
        .await
        {
            Ok(Ok(extraction)) => extraction,
            Ok(Err(e)) => return UnitOutcome::Failed(UnitFailure::Extraction(e)),
            Err(timeout_secs) => {
                return UnitOutcome::Failed(UnitFailure::Extraction(ExtractionError::Timeout {
                    timeout_secs,
                }));
            }
        };

        debug!(
            query,
            documents = fresh.len(),
            learnings = extraction.learnings.len(),
            follow_ups = extraction.follow_up_questions.len(),
            "Unit complete"
        );
        UnitOutcome::Done(UnitOutput {
            sources: fresh,
            learnings: extraction.learnings,
            follow_ups: extraction.follow_up_questions,
        })
    }
}

/// Run `fut` under an optional timeout; `Err` carries the timeout in seconds.
async fn bounded<F: Future>(timeout: Option<Duration>, fut: F) -> Result<F::Output, u64> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| limit.as_secs()),
        None => Ok(fut.await),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}
