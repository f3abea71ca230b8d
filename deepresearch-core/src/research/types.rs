//! Data model shared by the planner, explorer, and aggregator.

use super::aggregator::normalize_text;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// An atomic extracted fact. Immutable once created and shared via `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Learning {
    /// The fact itself.
    pub text: String,
    /// URL of the document the fact came from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl Learning {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_url: None,
        }
    }

    pub fn with_source(text: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_url: Some(source_url.into()),
        }
    }

    /// Whitespace-separated word count of the text.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Key used for exact deduplication.
    pub fn normalized(&self) -> String {
        normalize_text(&self.text)
    }
}

impl AsRef<Learning> for Learning {
    fn as_ref(&self) -> &Learning {
        self
    }
}

/// A retrieved document. Deduplicated globally by `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub title: String,
    pub content_excerpt: String,
}

impl SourceRecord {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        content_excerpt: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content_excerpt: content_excerpt.into(),
        }
    }

    /// Cut the excerpt to at most `max_chars` characters.
    pub fn truncated(mut self, max_chars: usize) -> Self {
        if let Some((idx, _)) = self.content_excerpt.char_indices().nth(max_chars) {
            self.content_excerpt.truncate(idx);
        }
        self
    }
}

/// One node of the exploration tree.
///
/// Created per recursive call and owned by it. Siblings never share a node:
/// each branch receives its own snapshot of the learnings and visited sets.
#[derive(Debug, Clone)]
pub struct ResearchNode {
    /// Topic handed to the planner: the root topic, or the parent query
    /// combined with its follow-up directions.
    pub topic: String,
    /// Levels left including this one. The root starts at the configured depth.
    pub depth_remaining: usize,
    /// Number of sub-queries to plan at this node.
    pub breadth: usize,
    /// Learnings gathered along the path from the root, in discovery order.
    pub parent_learnings: Vec<Arc<Learning>>,
    /// URLs already retrieved along this path.
    pub visited_urls: BTreeSet<String>,
    /// Queries already issued along this path (including sibling queries).
    pub visited_queries: BTreeSet<String>,
}

impl ResearchNode {
    pub fn root(topic: impl Into<String>, depth: usize, breadth: usize) -> Self {
        Self {
            topic: topic.into(),
            depth_remaining: depth,
            breadth,
            parent_learnings: Vec::new(),
            visited_urls: BTreeSet::new(),
            visited_queries: BTreeSet::new(),
        }
    }

    /// 1-based level of this node given the total configured depth.
    pub fn level(&self, total_depth: usize) -> usize {
        total_depth.saturating_sub(self.depth_remaining) + 1
    }

    /// Build the node one level below a branch that ran `query`.
    pub fn child(
        &self,
        query: &str,
        follow_ups: &[String],
        branch_learnings: &[Arc<Learning>],
        visited_urls: BTreeSet<String>,
        visited_queries: BTreeSet<String>,
        breadth: usize,
    ) -> Self {
        let mut parent_learnings = self.parent_learnings.clone();
        parent_learnings.extend(branch_learnings.iter().cloned());

        Self {
            topic: follow_up_topic(query, follow_ups),
            depth_remaining: self.depth_remaining.saturating_sub(1),
            breadth,
            parent_learnings,
            visited_urls,
            visited_queries,
        }
    }
}

/// Planner topic for the level below `query`.
pub fn follow_up_topic(query: &str, follow_ups: &[String]) -> String {
    let mut topic = format!("{query}\nFollow-up directions:");
    for question in follow_ups {
        topic.push_str("\n- ");
        topic.push_str(question);
    }
    topic
}

/// Live two-dimensional progress of a traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchProgress {
    /// Level (1-based) most recently worked on.
    pub current_depth: usize,
    pub total_depth: usize,
    /// Breadth declared at `current_depth`.
    pub current_breadth: usize,
    /// Breadth declared at the root.
    pub total_breadth: usize,
    pub completed_queries: usize,
    /// Pre-traversal estimate; raised if actual work exceeds it.
    pub total_queries: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_query: Option<String>,
}

impl ResearchProgress {
    /// Completed share of the estimated work, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_queries == 0 {
            return 0.0;
        }
        (self.completed_queries as f64 / self.total_queries as f64).min(1.0)
    }
}

/// Counters for a (sub)tree. Merged by sum, except `max_depth_reached`
/// which takes the maximum, so merge order never matters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalStats {
    /// Units that executed, whatever their outcome.
    pub completed_queries: usize,
    /// Units whose retrieval or extraction failed, or that panicked.
    pub failed_queries: usize,
    pub retrieval_failures: usize,
    pub extraction_failures: usize,
    pub panicked_branches: usize,
    /// Units dropped before execution because the traversal was cancelled.
    pub skipped_queries: usize,
    /// Deepest level (1-based) at which a unit executed.
    pub max_depth_reached: usize,
}

impl TraversalStats {
    pub fn merge(&mut self, other: &TraversalStats) {
        self.completed_queries += other.completed_queries;
        self.failed_queries += other.failed_queries;
        self.retrieval_failures += other.retrieval_failures;
        self.extraction_failures += other.extraction_failures;
        self.panicked_branches += other.panicked_branches;
        self.skipped_queries += other.skipped_queries;
        self.max_depth_reached = self.max_depth_reached.max(other.max_depth_reached);
    }
}

/// Result of a subtree, merged bottom-up and finalized once at the root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Learnings deduplicated by normalized text, in discovery order.
    pub learnings: Vec<Arc<Learning>>,
    pub visited_urls: BTreeSet<String>,
    /// Retrieved documents, one per URL.
    pub sources: Vec<Arc<SourceRecord>>,
    /// Word-budgeted context; empty until finalized by the aggregator.
    pub context_text: String,
    pub stats: TraversalStats,
}

impl AggregatedResult {
    /// Empty result that still carries the caller's visited URLs.
    pub fn seeded(visited_urls: BTreeSet<String>) -> Self {
        Self {
            visited_urls,
            ..Default::default()
        }
    }

    /// Fold `other` into `self`: learnings deduplicated by normalized text,
    /// URL sets unioned, sources appended unless their URL is already present.
    /// `visited_urls` only ever grows.
    pub fn merge(&mut self, other: AggregatedResult) {
        let mut seen: HashSet<String> = self.learnings.iter().map(|l| l.normalized()).collect();
        for learning in other.learnings {
            if seen.insert(learning.normalized()) {
                self.learnings.push(learning);
            }
        }

        let mut source_urls: HashSet<String> =
            self.sources.iter().map(|s| s.url.clone()).collect();
        for source in other.sources {
            if source_urls.insert(source.url.clone()) {
                self.sources.push(source);
            }
        }

        self.visited_urls.extend(other.visited_urls);
        self.stats.merge(&other.stats);
    }

    pub fn is_empty(&self) -> bool {
        self.learnings.is_empty() && self.sources.is_empty()
    }
}
